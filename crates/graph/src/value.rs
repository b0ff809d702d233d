//! Values flowing between nodes.
//!
//! A node consumes and produces an ordered tuple of [`Value`]s. Most values are
//! tensors; dimension records travel alongside them when a shape has to be
//! restored later in the pass (see `Unflatten`).

use candle_core::Tensor;

use crate::errors::{GraphError, Result};

/// One element of a node's input or output tuple.
#[derive(Debug, Clone)]
pub enum Value {
    Tensor(Tensor),
    Dims(Vec<usize>),
}

/// Ordered tuple of values.
pub type Values = Vec<Value>;

impl Value {
    /// Short label used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::Dims(_) => "dims",
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            Value::Dims(_) => None,
        }
    }

    pub fn as_dims(&self) -> Option<&[usize]> {
        match self {
            Value::Dims(dims) => Some(dims),
            Value::Tensor(_) => None,
        }
    }

    /// Unwraps a tensor value, reporting `node` on mismatch.
    pub fn into_tensor(self, node: &str) -> Result<Tensor> {
        match self {
            Value::Tensor(tensor) => Ok(tensor),
            other => Err(GraphError::ValueKind {
                node: node.to_string(),
                expected: "tensor",
                actual: other.kind(),
            }),
        }
    }

    /// Unwraps a dims value, reporting `node` on mismatch.
    pub fn into_dims(self, node: &str) -> Result<Vec<usize>> {
        match self {
            Value::Dims(dims) => Ok(dims),
            other => Err(GraphError::ValueKind {
                node: node.to_string(),
                expected: "dims",
                actual: other.kind(),
            }),
        }
    }
}

impl From<Tensor> for Value {
    fn from(tensor: Tensor) -> Self {
        Value::Tensor(tensor)
    }
}

impl From<Vec<usize>> for Value {
    fn from(dims: Vec<usize>) -> Self {
        Value::Dims(dims)
    }
}

/// Fails with [`GraphError::Arity`] unless `inputs` holds exactly `expected` values.
pub fn expect_arity(node: &str, inputs: &[Value], expected: usize) -> Result<()> {
    if inputs.len() == expected {
        Ok(())
    } else {
        Err(GraphError::Arity {
            node: node.to_string(),
            expected,
            actual: inputs.len(),
        })
    }
}

/// Extracts the only tensor of a one-element tuple.
pub fn single_tensor(node: &str, inputs: Values) -> Result<Tensor> {
    expect_arity(node, &inputs, 1)?;
    match inputs.into_iter().next() {
        Some(value) => value.into_tensor(node),
        None => Err(GraphError::Arity {
            node: node.to_string(),
            expected: 1,
            actual: 0,
        }),
    }
}

/// Extracts `N` tensors from an `N`-element tuple.
pub fn tensors<const N: usize>(node: &str, inputs: Values) -> Result<[Tensor; N]> {
    expect_arity(node, &inputs, N)?;
    let collected = inputs
        .into_iter()
        .map(|value| value.into_tensor(node))
        .collect::<Result<Vec<_>>>()?;
    collected.try_into().map_err(|rest: Vec<Tensor>| GraphError::Arity {
        node: node.to_string(),
        expected: N,
        actual: rest.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn single_tensor_rejects_wrong_arity_and_kind() -> Result<()> {
        let t = Tensor::zeros((1, 2), DType::F32, &Device::Cpu)?;
        assert!(single_tensor("check", vec![t.clone().into()]).is_ok());

        let err = single_tensor("check", vec![t.clone().into(), t.into()]).unwrap_err();
        assert!(matches!(err, GraphError::Arity { expected: 1, actual: 2, .. }));

        let err = single_tensor("check", vec![Value::Dims(vec![2, 2])]).unwrap_err();
        assert!(matches!(err, GraphError::ValueKind { expected: "tensor", .. }));
        Ok(())
    }

    #[test]
    fn tensors_destructures_fixed_tuples() -> Result<()> {
        let device = Device::Cpu;
        let a = Tensor::zeros(2, DType::F32, &device)?;
        let b = Tensor::ones(3, DType::F32, &device)?;
        let [x, y] = tensors::<2>("pair", vec![a.into(), b.into()])?;
        assert_eq!(x.dims(), &[2]);
        assert_eq!(y.dims(), &[3]);
        Ok(())
    }
}
