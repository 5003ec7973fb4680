//! Fused elementwise subgraph IR.

pub mod graph;
pub mod op;

use thiserror::Error;

pub use graph::{Node, Subgraph, SubgraphBuilder, ValueId};
pub use op::Op;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubgraphError {
    #[error("subgraph '{0}' has no parameters")]
    NoParameters(String),
    #[error("subgraph '{0}' has no results")]
    NoResults(String),
    #[error("node {node} ({op}) expects {expected} inputs, got {actual}")]
    Arity {
        node: usize,
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("node {node} references undefined value {value}")]
    UndefinedValue { node: usize, value: usize },
    #[error("result value {0} is not defined")]
    UndefinedResult(usize),
    #[error("subgraph expects {expected} {what}, got {actual}")]
    PortCount {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

pub type SubgraphResult<T> = Result<T, SubgraphError>;
