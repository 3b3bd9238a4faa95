//! # Diagrams - Expression Graphs as Wiring
//!
//! An expression graph can be drawn as a diagram: boxes are operator nodes,
//! wires carry the value of a child expression into a port of its parent.
//! Graph-rendering tools consume this model instead of engine internals.
//!
//! ## Key Concepts
//!
//! - **Node**: An operation with shaped input ports and one or more outputs
//! - **Edge**: A wire from an output port to an input port
//! - **Diagram**: A directed acyclic graph with boundary ports

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::CoreError;
use crate::shape::Shape;

/// A port is a shaped connection point on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub shape: Shape,
}

impl Port {
    pub fn new(shape: Shape) -> Self {
        Self { shape }
    }
}

/// A node in the diagram, parameterized by operation type.
#[derive(Debug, Clone)]
pub struct Node<O> {
    /// The operation this node performs
    pub op: O,
    /// Input ports (data flows in)
    pub inputs: Vec<Port>,
    /// Output ports (data flows out)
    pub outputs: Vec<Port>,
}

impl<O> Node<O> {
    pub fn new(op: O, inputs: Vec<Port>, outputs: Vec<Port>) -> Self {
        Self {
            op,
            inputs,
            outputs,
        }
    }
}

/// An edge connects an output port of one node to an input port of another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Index of the output port on the source node
    pub from_port: usize,
    /// Index of the input port on the target node
    pub to_port: usize,
}

impl Edge {
    pub fn new(from_port: usize, to_port: usize) -> Self {
        Self { from_port, to_port }
    }
}

/// A boundary port reference: (node index, port index)
pub type BoundaryPort = (NodeIndex, usize);

/// A directed graph of nodes connected by edges, with an output boundary.
///
/// For an exported expression the single output boundary is the root's
/// value; leaves (variables and constants) have no input ports, so there
/// is no input boundary.
#[derive(Debug, Clone)]
pub struct Diagram<O> {
    /// The underlying graph structure
    pub graph: DiGraph<Node<O>, Edge>,
    /// Boundary output ports (where results exit)
    pub outputs: Vec<BoundaryPort>,
}

impl<O: Clone> Diagram<O> {
    /// Create a new empty diagram.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            outputs: Vec::new(),
        }
    }

    /// Add a node to the diagram, returning its index.
    pub fn add_node(&mut self, node: Node<O>) -> NodeIndex {
        self.graph.add_node(node)
    }

    /// Connect an output port of one node to an input port of another.
    ///
    /// Fails if either port index is out of bounds or the shapes differ.
    pub fn connect(
        &mut self,
        from_node: NodeIndex,
        from_port: usize,
        to_node: NodeIndex,
        to_port: usize,
    ) -> Result<(), CoreError> {
        let from_shape = self.port_shape(from_node, from_port, Direction::Outgoing)?;
        let to_shape = self.port_shape(to_node, to_port, Direction::Incoming)?;

        if !from_shape.is_compatible(&to_shape) {
            return Err(CoreError::ShapeMismatch {
                expected: to_shape,
                got: from_shape,
            });
        }

        self.graph
            .add_edge(from_node, to_node, Edge::new(from_port, to_port));
        Ok(())
    }

    fn port_shape(
        &self,
        node: NodeIndex,
        port: usize,
        direction: Direction,
    ) -> Result<Shape, CoreError> {
        let data = self
            .graph
            .node_weight(node)
            .ok_or_else(|| CoreError::ValidationError {
                reason: format!("Node {:?} not found", node),
            })?;
        let ports = match direction {
            Direction::Outgoing => &data.outputs,
            Direction::Incoming => &data.inputs,
        };
        ports
            .get(port)
            .map(|p| p.shape.clone())
            .ok_or(CoreError::InvalidPort {
                index: port,
                count: ports.len(),
            })
    }

    /// Set the output boundary ports.
    pub fn set_outputs(&mut self, outputs: Vec<BoundaryPort>) {
        self.outputs = outputs;
    }

    /// Get the shapes of all output boundary ports.
    pub fn output_shapes(&self) -> Vec<Shape> {
        self.outputs
            .iter()
            .filter_map(|(node_idx, port_idx)| {
                self.graph
                    .node_weight(*node_idx)
                    .and_then(|n| n.outputs.get(*port_idx))
                    .map(|p| p.shape.clone())
            })
            .collect()
    }

    /// Nodes with no incoming wires.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect()
    }

    /// Nodes ordered so that every node comes after all of its inputs.
    pub fn topological_order(&self) -> Result<Vec<NodeIndex>, CoreError> {
        toposort(&self.graph, None).map_err(|cycle| CoreError::ValidationError {
            reason: format!("Cycle through node {:?}", cycle.node_id()),
        })
    }

    /// Validate the diagram's internal consistency.
    ///
    /// Checks that every edge joins ports of equal shape, that the graph is
    /// acyclic and that the output boundary ports exist.
    pub fn validate(&self) -> Result<(), CoreError> {
        for edge_ref in self.graph.edge_references() {
            let edge = edge_ref.weight();
            let from = self.port_shape(edge_ref.source(), edge.from_port, Direction::Outgoing)?;
            let to = self.port_shape(edge_ref.target(), edge.to_port, Direction::Incoming)?;
            if !from.is_compatible(&to) {
                return Err(CoreError::ShapeMismatch {
                    expected: to,
                    got: from,
                });
            }
        }

        self.topological_order()?;

        for (node_idx, port_idx) in &self.outputs {
            self.port_shape(*node_idx, *port_idx, Direction::Outgoing)?;
        }

        Ok(())
    }

    /// Number of nodes in the diagram.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges in the diagram.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

impl<O: Clone> Default for Diagram<O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    enum TestOp {
        Leaf,
        Sum,
    }

    fn leaf(shape: Shape) -> Node<TestOp> {
        Node::new(TestOp::Leaf, vec![], vec![Port::new(shape)])
    }

    fn sum(shape: Shape) -> Node<TestOp> {
        Node::new(
            TestOp::Sum,
            vec![Port::new(shape.clone()), Port::new(shape.clone())],
            vec![Port::new(shape)],
        )
    }

    #[test]
    fn test_connect_matching_shapes() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(leaf(Shape::scalar()));
        let b = diagram.add_node(leaf(Shape::scalar()));
        let s = diagram.add_node(sum(Shape::scalar()));

        diagram.connect(a, 0, s, 0).unwrap();
        diagram.connect(b, 0, s, 1).unwrap();
        diagram.set_outputs(vec![(s, 0)]);

        assert_eq!(diagram.edge_count(), 2);
        assert_eq!(diagram.leaves(), vec![a, b]);
        assert_eq!(diagram.output_shapes(), vec![Shape::scalar()]);
        assert!(diagram.validate().is_ok());
    }

    #[test]
    fn test_connect_mismatched_shapes() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(leaf(Shape::scalar()));
        let s = diagram.add_node(sum(Shape::vector(3)));

        let result = diagram.connect(a, 0, s, 0);
        assert!(matches!(result, Err(CoreError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_connect_invalid_port() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(leaf(Shape::scalar()));
        let s = diagram.add_node(sum(Shape::scalar()));

        let result = diagram.connect(a, 0, s, 2);
        assert_eq!(result, Err(CoreError::InvalidPort { index: 2, count: 2 }));
    }

    #[test]
    fn test_missing_output_boundary_fails_validation() {
        let mut diagram = Diagram::new();
        let a = diagram.add_node(leaf(Shape::scalar()));
        diagram.set_outputs(vec![(a, 1)]);
        assert_eq!(
            diagram.validate(),
            Err(CoreError::InvalidPort { index: 1, count: 1 })
        );
    }

    #[test]
    fn test_topological_order_puts_inputs_first() {
        let mut diagram = Diagram::new();
        let s = diagram.add_node(sum(Shape::scalar()));
        let a = diagram.add_node(leaf(Shape::scalar()));
        diagram.connect(a, 0, s, 0).unwrap();
        diagram.connect(a, 0, s, 1).unwrap();

        let order = diagram.topological_order().unwrap();
        let pos = |n| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(s));
    }
}
