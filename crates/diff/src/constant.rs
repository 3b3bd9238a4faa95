//! Numeric constants with distinguished zero, one, two and Euler's number.

use std::f64::consts::E;
use std::fmt;

/// A numeric constant.
///
/// Construct with [`Constant::new`]; values equal to one of the specials
/// always come back as that special, so `Constant::new(0.0)` is `Zero`.
/// Negative zero keeps its sign as `Real(-0.0)` but still counts as zero.
#[derive(Debug, Clone, Copy)]
pub enum Constant {
    Zero,
    One,
    Two,
    E,
    Real(f64),
}

impl Constant {
    pub fn new(value: f64) -> Self {
        if value == 0.0 && value.is_sign_positive() {
            Constant::Zero
        } else if value == 1.0 {
            Constant::One
        } else if value == 2.0 {
            Constant::Two
        } else if value == E {
            Constant::E
        } else {
            Constant::Real(value)
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Constant::Zero => 0.0,
            Constant::One => 1.0,
            Constant::Two => 2.0,
            Constant::E => E,
            Constant::Real(v) => v,
        }
    }

    pub fn is_zero(self) -> bool {
        self.value() == 0.0
    }

    pub fn is_one(self) -> bool {
        matches!(self, Constant::One)
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl From<f64> for Constant {
    fn from(value: f64) -> Self {
        Constant::new(value)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::E => write!(f, "e"),
            other => write!(f, "{}", other.value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specials_are_canonical() {
        assert!(matches!(Constant::new(0.0), Constant::Zero));
        assert!(matches!(Constant::new(-0.0), Constant::Real(_)));
        assert!(matches!(Constant::new(1.0), Constant::One));
        assert!(matches!(Constant::new(2.0), Constant::Two));
        assert!(matches!(Constant::new(E), Constant::E));
        assert!(matches!(Constant::new(3.5), Constant::Real(_)));
    }

    #[test]
    fn test_negative_zero_keeps_its_sign() {
        let c = Constant::new(-0.0);
        assert!(c.is_zero());
        assert!(c.value().is_sign_negative());
        assert_eq!(c, Constant::Zero);
        assert_eq!(1.0 / c.value(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_display() {
        assert_eq!(Constant::E.to_string(), "e");
        assert_eq!(Constant::new(2.5).to_string(), "2.5");
    }
}
