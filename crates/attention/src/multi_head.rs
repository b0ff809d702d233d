//! Multi-head wrapper around an [`AttentionKernel`].

use std::sync::Arc;

use candle_core::Tensor;
use graph::{value::tensors, ContextStore, GraphError, Node, Values};

use crate::{core::AttentionKernel, reference::ExactAttention};

/// Splits `(batch, seq, E)` projections into heads, runs the kernel and merges
/// the heads back.
#[derive(Debug, Clone)]
pub struct ScaledDotProductAttention {
    num_heads: usize,
    is_causal: Option<bool>,
    kernel: Arc<dyn AttentionKernel>,
}

impl ScaledDotProductAttention {
    pub fn new(num_heads: usize) -> graph::Result<Self> {
        if num_heads == 0 {
            return Err(GraphError::Config("num_heads must be at least 1".into()));
        }
        Ok(Self {
            num_heads,
            is_causal: None,
            kernel: Arc::new(ExactAttention::default()),
        })
    }

    /// Instance default for the causal flag; `None` falls back to `false`.
    pub fn with_causal(mut self, is_causal: Option<bool>) -> Self {
        self.is_causal = is_causal;
        self
    }

    pub fn with_kernel(mut self, kernel: Arc<dyn AttentionKernel>) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn is_causal(&self) -> Option<bool> {
        self.is_causal
    }

    /// `(batch, seq, E)` → `(batch, num_heads, seq, E / num_heads)`.
    pub fn split_to_multi_head(&self, x: &Tensor) -> graph::Result<Tensor> {
        let (batch, seq, embedding_dim) = match *x.dims() {
            [batch, seq, embedding_dim] => (batch, seq, embedding_dim),
            _ => {
                return Err(GraphError::Shape(format!(
                    "expected (batch, sequence_length, embedding_dim), got {:?}",
                    x.dims()
                )))
            }
        };
        if embedding_dim % self.num_heads != 0 {
            return Err(GraphError::Shape(format!(
                "embedding dim {embedding_dim} must be divisible by num heads {}",
                self.num_heads
            )));
        }
        Ok(x
            .reshape((batch, seq, self.num_heads, embedding_dim / self.num_heads))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    /// `(batch, num_heads, seq, head_dim)` → `(batch, seq, num_heads * head_dim)`.
    pub fn merge_multi_head(&self, x: &Tensor) -> graph::Result<Tensor> {
        let (batch, heads, seq, head_dim) = x.dims4()?;
        if heads != self.num_heads {
            return Err(GraphError::Shape(format!(
                "expected {} heads, got shape {:?}",
                self.num_heads,
                x.dims()
            )));
        }
        Ok(x.transpose(1, 2)?.reshape((batch, seq, heads * head_dim))?)
    }

    /// Attention with an explicit causal flag; `None` uses the instance default.
    pub fn forward_with(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        is_causal: Option<bool>,
    ) -> graph::Result<Tensor> {
        let is_causal = is_causal.or(self.is_causal).unwrap_or(false);
        let attended = self.kernel.attend(
            &self.split_to_multi_head(query)?,
            &self.split_to_multi_head(key)?,
            &self.split_to_multi_head(value)?,
            is_causal,
        )?;
        self.merge_multi_head(&attended)
    }
}

impl Node for ScaledDotProductAttention {
    fn name(&self) -> &'static str {
        "ScaledDotProductAttention"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("num_heads", self.num_heads.to_string()),
            ("is_causal", format!("{:?}", self.is_causal)),
        ]
    }

    fn input_arity(&self) -> Option<usize> {
        Some(3)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> graph::Result<Values> {
        let [query, key, value] = tensors::<3>(self.name(), inputs)?;
        Ok(vec![self.forward_with(&query, &key, &value, None)?.into()])
    }
}
