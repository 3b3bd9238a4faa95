//! # Export - Expressions as Diagrams
//!
//! [`to_diagram`] walks an expression graph once and produces a
//! [`Diagram`] whose boxes are operator nodes and whose wires carry each
//! child's value into an input port of its parent. Shared subexpressions
//! appear once, with one outgoing wire per use.
//!
//! ```text
//!   x ──┐
//!       ├──[prod]──┐
//!   y ──┘          ├──[sum]──▶
//!   3 ─────────────┘
//! ```

use std::collections::HashMap;

use petgraph::graph::NodeIndex;
use symbolic_core::{Diagram, Node as DiagramNode, Port};

use crate::error::Result;
use crate::expr::{Expr, Node, NodeKind};

/// The operation carried by an exported diagram node.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportNode {
    pub kind: NodeKind,
    /// Variable name, constant value, or operator name.
    pub label: String,
}

impl ExportNode {
    fn of(expr: &Expr) -> Self {
        let label = match expr.node() {
            Node::Var(v) => v.to_string(),
            Node::Const(c) => c.to_string(),
            Node::Derivative { var, .. } => format!("d/d{}", var),
            _ => expr.kind().to_string(),
        };
        Self {
            kind: expr.kind(),
            label,
        }
    }
}

/// Export `root` as a diagram with a single output boundary at the root.
pub fn to_diagram(root: &Expr) -> Result<Diagram<ExportNode>> {
    let mut diagram = Diagram::new();
    let mut placed: HashMap<usize, NodeIndex> = HashMap::new();
    let mut stack: Vec<(&Expr, bool)> = vec![(root, false)];

    while let Some((expr, expanded)) = stack.pop() {
        if placed.contains_key(&expr.addr()) {
            continue;
        }
        let children = expr.children();
        if !expanded {
            stack.push((expr, true));
            for child in children.into_iter().rev() {
                if !placed.contains_key(&child.addr()) {
                    stack.push((child, false));
                }
            }
            continue;
        }

        let inputs = children.iter().map(|c| Port::new(c.shape().clone())).collect();
        let outputs = vec![Port::new(expr.shape().clone())];
        let index = diagram.add_node(DiagramNode::new(ExportNode::of(expr), inputs, outputs));
        for (port, child) in children.iter().enumerate() {
            if let Some(&from) = placed.get(&child.addr()) {
                diagram.connect(from, 0, index, port)?;
            }
        }
        placed.insert(expr.addr(), index);
    }

    if let Some(&root_index) = placed.get(&root.addr()) {
        diagram.set_outputs(vec![(root_index, 0)]);
    }
    Ok(diagram)
}

/// Render `root` in DOT format for Graphviz.
pub fn to_dot(root: &Expr) -> Result<String> {
    let diagram = to_diagram(root)?;
    let mut output = String::new();
    output.push_str("digraph Expr {\n");
    output.push_str("  rankdir=BT;\n");
    output.push_str("  node [shape=box];\n\n");

    for index in diagram.graph.node_indices() {
        let node = &diagram.graph[index];
        let color = match node.op.kind {
            NodeKind::Var | NodeKind::Const => "lightgray",
            NodeKind::Derivative | NodeKind::Composition => "lightyellow",
            _ => "lightblue",
        };
        let label = node.op.label.replace('"', "'");
        output.push_str(&format!(
            "  n{} [label=\"{}\\n{}\" style=filled fillcolor={}];\n",
            index.index(),
            label,
            node.outputs[0].shape,
            color
        ));
    }

    output.push('\n');

    for edge in diagram.graph.edge_indices() {
        if let Some((from, to)) = diagram.graph.edge_endpoints(edge) {
            output.push_str(&format!("  n{} -> n{};\n", from.index(), to.index()));
        }
    }

    output.push_str("}\n");
    Ok(output)
}
