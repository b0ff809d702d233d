//! Error types emitted by attention kernels.

use graph::GraphError;

/// Attention-specific error category.
#[derive(Debug)]
pub enum AttentionError {
    /// The supplied tensor shapes do not align with the documented contract.
    InvalidShape { context: String },
    /// The kernel does not support the requested data type.
    UnsupportedDType { requested: String },
    /// A backend-specific failure propagated to the caller.
    Backend { message: String },
}

impl std::fmt::Display for AttentionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionError::InvalidShape { context } => {
                write!(f, "invalid tensor shape: {context}")
            }
            AttentionError::UnsupportedDType { requested } => {
                write!(f, "unsupported dtype {requested}")
            }
            AttentionError::Backend { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for AttentionError {}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        AttentionError::Backend {
            message: err.to_string(),
        }
    }
}

impl From<AttentionError> for GraphError {
    fn from(err: AttentionError) -> Self {
        match err {
            AttentionError::InvalidShape { context } => GraphError::Shape(context),
            other => GraphError::Numeric(candle_core::Error::Msg(other.to_string())),
        }
    }
}
