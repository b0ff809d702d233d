//! The [`Node`] capability and learned-parameter handles.

use std::sync::{Arc, Mutex};

use candle_core::{Error, Tensor};

use crate::{
    context::{ContextKey, ContextStore, Contexts},
    errors::Result,
    value::Values,
};

/// Unit of computation in a graph.
///
/// Every node maps a tuple of values to a tuple of values. Composite nodes own
/// their children exclusively and expose them through [`Node::children`] so
/// that trees can be printed, compared, and traversed without knowing the
/// concrete types involved.
pub trait Node: Send + Sync {
    /// Type-level identity used for printing and structural comparison.
    fn name(&self) -> &'static str;

    /// Configuration fields that define the node's structure (never parameters).
    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    /// Ordered children of a composite node.
    fn children(&self) -> Vec<&dyn Node> {
        Vec::new()
    }

    /// Context entries this node needs seeded before a forward pass starts.
    fn init_context(&self) -> Contexts {
        Contexts::new()
    }

    /// Context entries this node reads (checked before the pass starts).
    fn context_reads(&self) -> Vec<ContextKey> {
        Vec::new()
    }

    /// Learned tensors held directly by this node (children excluded).
    fn own_parameters(&self) -> Vec<(&'static str, Parameter)> {
        Vec::new()
    }

    /// Number of inputs the node accepts, when statically known.
    fn input_arity(&self) -> Option<usize> {
        None
    }

    /// Number of outputs the node produces, when statically known.
    fn output_arity(&self) -> Option<usize> {
        None
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> Result<Values>;
}

/// Shared handle to a learned tensor.
///
/// Clones point at the same storage, so a handle obtained through
/// [`named_parameters`](crate::introspect::named_parameters) can overwrite the
/// weights a layer uses on its next forward call.
#[derive(Debug, Clone)]
pub struct Parameter {
    inner: Arc<Mutex<Tensor>>,
}

impl Parameter {
    pub fn new(tensor: Tensor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tensor)),
        }
    }

    /// Returns the current value (cheap: tensors are reference counted).
    pub fn tensor(&self) -> candle_core::Result<Tensor> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| Error::Msg("parameter mutex poisoned".into()))?;
        Ok(guard.clone())
    }

    pub fn dims(&self) -> candle_core::Result<Vec<usize>> {
        Ok(self.tensor()?.dims().to_vec())
    }

    /// Replaces the stored tensor, keeping the existing shape and dtype.
    pub fn assign(&self, value: &Tensor) -> candle_core::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::Msg("parameter mutex poisoned".into()))?;
        if guard.dims() != value.dims() {
            return Err(Error::Msg(format!(
                "parameter expects shape {:?}, got {:?}",
                guard.dims(),
                value.dims()
            )));
        }
        let cast = value.to_dtype(guard.dtype())?.to_device(guard.device())?;
        *guard = cast;
        Ok(())
    }

    /// Indicates whether both handles refer to the same storage.
    pub fn shares_storage(&self, other: &Parameter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn assign_updates_every_clone() -> candle_core::Result<()> {
        let device = Device::Cpu;
        let param = Parameter::new(Tensor::zeros((2, 2), DType::F32, &device)?);
        let alias = param.clone();
        param.assign(&Tensor::ones((2, 2), DType::F32, &device)?)?;
        let values = alias.tensor()?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(values, vec![1.0; 4]);
        assert!(param.shares_storage(&alias));
        Ok(())
    }

    #[test]
    fn assign_rejects_shape_changes() -> candle_core::Result<()> {
        let device = Device::Cpu;
        let param = Parameter::new(Tensor::zeros(3, DType::F32, &device)?);
        assert!(param.assign(&Tensor::zeros(4, DType::F32, &device)?).is_err());
        assert_eq!(param.dims()?, vec![3]);
        Ok(())
    }
}
