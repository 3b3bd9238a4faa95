//! Evaluation configuration.
//!
//! The mode is a plain value carried by an [`Evaluator`](crate::Evaluator);
//! there is no process-wide switch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable read by [`EvalConfig::from_env`].
pub const MODE_ENV_VAR: &str = "SYMBOLIC_EVAL_MODE";

/// When pending work is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMode {
    /// Derivatives expand when requested; applications reduce immediately.
    Eager,
    /// Derivatives stay as markers; applications reduce only once the
    /// bindings are complete or ready to bind, or when forced.
    #[default]
    Lazy,
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Unknown evaluation mode {0:?} (expected \"eager\" or \"lazy\")")]
pub struct ParseModeError(pub String);

impl FromStr for EvalMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(EvalMode::Eager),
            "lazy" => Ok(EvalMode::Lazy),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalMode::Eager => write!(f, "eager"),
            EvalMode::Lazy => write!(f, "lazy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub mode: EvalMode,
}

impl EvalConfig {
    pub fn eager() -> Self {
        Self {
            mode: EvalMode::Eager,
        }
    }

    pub fn lazy() -> Self {
        Self {
            mode: EvalMode::Lazy,
        }
    }

    /// Read the mode from `SYMBOLIC_EVAL_MODE`, defaulting to lazy when unset.
    pub fn from_env() -> Result<Self, ParseModeError> {
        match std::env::var(MODE_ENV_VAR) {
            Ok(raw) => Ok(Self { mode: raw.parse()? }),
            Err(_) => Ok(Self::default()),
        }
    }
}
