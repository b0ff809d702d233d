//! Nodes that write to and read from the context store, with the named
//! strategies that decide how.

use std::fmt;

use crate::{
    context::{ContextKey, ContextStore, ContextValue},
    errors::{GraphError, Result},
    node::Node,
    value::{Value, Values},
};

/// Decides how a [`SetContext`] node updates its entry.
pub trait ContextWriter: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn write(&self, store: &mut ContextStore, target: &ContextKey, inputs: &[Value]) -> Result<()>;
}

/// Decides how a [`UseContext`] node turns its entry into an output value.
pub trait ContextReader: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn read(&self, store: &mut ContextStore, target: &ContextKey) -> Result<Value>;
}

/// Stores the first input as the entry's value.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreInput;

impl ContextWriter for StoreInput {
    fn name(&self) -> &'static str {
        "StoreInput"
    }

    fn write(&self, store: &mut ContextStore, target: &ContextKey, inputs: &[Value]) -> Result<()> {
        let value = inputs.first().cloned().ok_or_else(|| GraphError::Arity {
            node: "SetContext".into(),
            expected: 1,
            actual: 0,
        })?;
        store.set(&target.context, &target.key, ContextValue::Value(value));
        Ok(())
    }
}

/// Pushes dims `start_dim..=end_dim` of the first input tensor onto a stack entry.
#[derive(Debug, Clone, Copy)]
pub struct PushDims {
    pub start_dim: usize,
    /// Inclusive; `None` means the last dimension.
    pub end_dim: Option<usize>,
}

impl ContextWriter for PushDims {
    fn name(&self) -> &'static str {
        "PushDims"
    }

    fn write(&self, store: &mut ContextStore, target: &ContextKey, inputs: &[Value]) -> Result<()> {
        let dims = dims_range(inputs, self.start_dim, self.end_dim)?;
        store.push(target, Value::Dims(dims))
    }
}

/// Records dims `start_dim..=end_dim` of the first input tensor as a single value.
#[derive(Debug, Clone, Copy)]
pub struct RecordDims {
    pub start_dim: usize,
    pub end_dim: Option<usize>,
}

impl ContextWriter for RecordDims {
    fn name(&self) -> &'static str {
        "RecordDims"
    }

    fn write(&self, store: &mut ContextStore, target: &ContextKey, inputs: &[Value]) -> Result<()> {
        let dims = dims_range(inputs, self.start_dim, self.end_dim)?;
        store.entry(target)?;
        store.set(&target.context, &target.key, ContextValue::Value(Value::Dims(dims)));
        Ok(())
    }
}

fn dims_range(inputs: &[Value], start_dim: usize, end_dim: Option<usize>) -> Result<Vec<usize>> {
    let tensor = inputs
        .first()
        .and_then(Value::as_tensor)
        .ok_or_else(|| GraphError::ValueKind {
            node: "SetContext".into(),
            expected: "tensor",
            actual: inputs.first().map(Value::kind).unwrap_or("nothing"),
        })?;
    let dims = tensor.dims();
    let end = end_dim.unwrap_or_else(|| dims.len().saturating_sub(1));
    if dims.is_empty() || start_dim > end || end >= dims.len() {
        return Err(GraphError::Shape(format!(
            "cannot take dims {}..={} of a tensor shaped {:?}",
            start_dim, end, dims
        )));
    }
    Ok(dims[start_dim..=end].to_vec())
}

/// Returns a copy of the stored value.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneValue;

impl ContextReader for CloneValue {
    fn name(&self) -> &'static str {
        "CloneValue"
    }

    fn read(&self, store: &mut ContextStore, target: &ContextKey) -> Result<Value> {
        store.value(target)
    }
}

/// Pops the most recent element of a stack entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopLast;

impl ContextReader for PopLast {
    fn name(&self) -> &'static str {
        "PopLast"
    }

    fn read(&self, store: &mut ContextStore, target: &ContextKey) -> Result<Value> {
        store.pop(target)
    }
}

/// Side-effecting pass-through: updates a context entry, returns its inputs.
#[derive(Debug)]
pub struct SetContext {
    target: ContextKey,
    writer: Box<dyn ContextWriter>,
}

impl SetContext {
    /// Stores the first input under `context.key`.
    pub fn new(context: &str, key: &str) -> Self {
        Self::with_writer(context, key, StoreInput)
    }

    pub fn with_writer(context: &str, key: &str, writer: impl ContextWriter + 'static) -> Self {
        Self {
            target: ContextKey::new(context, key),
            writer: Box::new(writer),
        }
    }

    pub fn target(&self) -> &ContextKey {
        &self.target
    }
}

impl Node for SetContext {
    fn name(&self) -> &'static str {
        "SetContext"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("context", self.target.context.clone()),
            ("key", self.target.key.clone()),
            ("writer", self.writer.name().to_string()),
        ]
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> Result<Values> {
        self.writer.write(ctx, &self.target, &inputs)?;
        Ok(inputs)
    }
}

/// Ignores its inputs and returns a value taken from the context store.
#[derive(Debug)]
pub struct UseContext {
    target: ContextKey,
    reader: Box<dyn ContextReader>,
}

impl UseContext {
    /// Returns a copy of `context.key`.
    pub fn new(context: &str, key: &str) -> Self {
        Self::with_reader(context, key, CloneValue)
    }

    pub fn with_reader(context: &str, key: &str, reader: impl ContextReader + 'static) -> Self {
        Self {
            target: ContextKey::new(context, key),
            reader: Box::new(reader),
        }
    }

    pub fn target(&self) -> &ContextKey {
        &self.target
    }
}

impl Node for UseContext {
    fn name(&self) -> &'static str {
        "UseContext"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("context", self.target.context.clone()),
            ("key", self.target.key.clone()),
            ("reader", self.reader.name().to_string()),
        ]
    }

    fn context_reads(&self) -> Vec<ContextKey> {
        vec![self.target.clone()]
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, _inputs: Values, ctx: &mut ContextStore) -> Result<Values> {
        Ok(vec![self.reader.read(ctx, &self.target)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};

    fn image(dims: (usize, usize, usize, usize)) -> Result<Value> {
        Ok(Value::Tensor(Tensor::zeros(dims, DType::F32, &Device::Cpu)?))
    }

    #[test]
    fn push_dims_then_pop_last_round_trips_shape() -> Result<()> {
        let mut store = ContextStore::new();
        store.set("flatten", "sizes", ContextValue::empty_stack());
        let target = ContextKey::new("flatten", "sizes");

        let push = PushDims {
            start_dim: 2,
            end_dim: None,
        };
        push.write(&mut store, &target, &[image((1, 3, 5, 7))?])?;
        assert_eq!(store.stack_len(&target)?, 1);

        let popped = PopLast.read(&mut store, &target)?;
        assert_eq!(popped.as_dims(), Some(&[5usize, 7][..]));
        assert_eq!(store.stack_len(&target)?, 0);
        Ok(())
    }

    #[test]
    fn push_dims_requires_a_seeded_stack() -> Result<()> {
        let mut store = ContextStore::new();
        let target = ContextKey::new("flatten", "sizes");
        let push = PushDims {
            start_dim: 2,
            end_dim: None,
        };
        let err = push
            .write(&mut store, &target, &[image((1, 1, 2, 2))?])
            .unwrap_err();
        assert!(matches!(err, GraphError::ContextNotFound { .. }));
        Ok(())
    }

    #[test]
    fn record_dims_rejects_out_of_range_slices() -> Result<()> {
        let mut store = ContextStore::new();
        store.set("reshape", "spatial_dims", ContextValue::Unset);
        let target = ContextKey::new("reshape", "spatial_dims");
        let record = RecordDims {
            start_dim: 2,
            end_dim: Some(4),
        };
        let err = record
            .write(&mut store, &target, &[image((1, 1, 2, 2))?])
            .unwrap_err();
        assert!(matches!(err, GraphError::Shape(_)));
        Ok(())
    }

    #[test]
    fn set_context_passes_inputs_through() -> Result<()> {
        let mut store = ContextStore::new();
        let node = SetContext::new("cache", "last");
        let input = image((1, 2, 3, 4))?;
        let out = node.forward(vec![input], &mut store)?;
        assert_eq!(out.len(), 1);
        let stored = store.value(&ContextKey::new("cache", "last"))?;
        assert_eq!(stored.as_tensor().map(|t| t.dims().to_vec()), Some(vec![1, 2, 3, 4]));
        Ok(())
    }

    #[test]
    fn use_context_ignores_inputs() -> Result<()> {
        let mut store = ContextStore::new();
        store.set("ctx", "dims", ContextValue::Value(Value::Dims(vec![9])));
        let node = UseContext::new("ctx", "dims");
        let out = node.forward(vec![image((1, 1, 1, 1))?, image((2, 2, 2, 2))?], &mut store)?;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_dims(), Some(&[9usize][..]));
        assert_eq!(node.context_reads(), vec![ContextKey::new("ctx", "dims")]);
        Ok(())
    }
}
