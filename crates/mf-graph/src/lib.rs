//! Variable dependency graph, expression connections and graph reduction.

pub mod component_graph;
pub mod error;
pub mod graph;
pub mod mapper;
pub mod path;
pub mod reduce;

pub use component_graph::ComponentGraph;
pub use error::{GraphError, GraphResult};
pub use graph::{EdgeKind, Node, NodeKind, VariableGraph};
pub use mapper::{ExprMapper, PSEUDO_OUTPUT, PSEUDO_PREFIX, PseudoKind, PseudoSpec};
pub use path::{IndexItem, flat_indices, overlaps, parse_indices, split_index};
pub use reduce::{CollapsedVar, CompRole, NameInfo, RNode, ReduceRequest, ReducedGraph, reduce_graph};
