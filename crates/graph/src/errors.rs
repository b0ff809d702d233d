//! Error type shared by every node in a graph.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    /// Invalid constructor arguments (divisibility, zero sizes, empty sums).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A node received (or was wired to receive) the wrong number of values.
    #[error("{node} expected {expected} values, got {actual}")]
    Arity {
        node: String,
        expected: usize,
        actual: usize,
    },

    /// Wrong rank or incongruent tensor shapes.
    #[error("shape error: {0}")]
    Shape(String),

    /// A node received a value of the wrong kind (e.g. dims where a tensor was expected).
    #[error("{node} expected a {expected} value, got {actual}")]
    ValueKind {
        node: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("context `{context}` has no key `{key}`")]
    ContextNotFound { context: String, key: String },

    #[error("context `{context}.{key}` was read before it was written")]
    ContextUnset { context: String, key: String },

    #[error("context `{context}.{key}` stack is empty")]
    EmptyStack { context: String, key: String },

    #[error("context `{context}.{key}` holds a {actual}, expected a {expected}")]
    ContextType {
        context: String,
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Failure reported by the tensor library.
    #[error("numeric error: {0}")]
    Numeric(#[from] candle_core::Error),
}
