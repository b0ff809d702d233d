//! Reference attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`AttentionKernel`](crate::core::AttentionKernel) trait.

use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use candle_nn::ops::softmax_last_dim;

use crate::core::{AttentionError, AttentionKernel, Config, Precision};
use crate::masks::build_causal_mask;

/// Numerically stable, portable attention kernel.
#[derive(Debug, Default)]
pub struct ExactAttention {
    config: Config,
    first_call: OnceLock<()>,
}

impl ExactAttention {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            first_call: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn validate(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<[usize; 5], AttentionError> {
        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must reside on the same device".to_string(),
            });
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must share the same dtype".to_string(),
            });
        }
        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, heads, q_len, head_dim) =
            q.dims4().map_err(|_| AttentionError::InvalidShape {
                context: format!("q must be [batch, heads, seq_len, head_dim], got {:?}", q.dims()),
            })?;
        let (kb, kh, k_len, kd) = k.dims4().map_err(|_| AttentionError::InvalidShape {
            context: format!("k must be [batch, heads, seq_len, head_dim], got {:?}", k.dims()),
        })?;
        let (vb, vh, vk, vd) = v.dims4().map_err(|_| AttentionError::InvalidShape {
            context: format!("v must be [batch, heads, seq_len, head_dim], got {:?}", v.dims()),
        })?;

        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] \
                     got [{kb}, {kh}, {k_len}, {kd}]"
                ),
            });
        }
        if vb != batch || vh != heads || vk != k_len || vd != head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "v shape mismatch: expected [{batch}, {heads}, {k_len}, {head_dim}] \
                     got [{vb}, {vh}, {vk}, {vd}]"
                ),
            });
        }
        if head_dim == 0 || k_len == 0 {
            return Err(AttentionError::InvalidShape {
                context: "head_dim and k_len must be non-zero".to_string(),
            });
        }
        Ok([batch, heads, q_len, k_len, head_dim])
    }

    /// Number of merged `batch * heads` slices processed per chunk.
    fn chunk_len(&self, merged: usize, q_len: usize, k_len: usize) -> usize {
        let per_slice = (q_len * k_len).max(1);
        (self.config.max_score_elements / per_slice).clamp(1, merged.max(1))
    }
}

impl AttentionKernel for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        is_causal: bool,
    ) -> Result<Tensor, AttentionError> {
        let [batch, heads, q_len, k_len, head_dim] = Self::validate(q, k, v)?;

        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::reference init precision={:?} max_score_elements={} \
                 dtype={:?} device={:?}",
                self.config.precision,
                self.config.max_score_elements,
                q.dtype(),
                q.device().location()
            );
        }

        let work = |t: &Tensor| -> Result<Tensor, AttentionError> {
            let t = match self.config.precision {
                Precision::ForceF32 => t.to_dtype(DType::F32)?,
                Precision::Inherit => t.clone(),
            };
            Ok(t.contiguous()?)
        };

        let merged = batch * heads;
        let q_view = work(q)?.reshape((merged, q_len, head_dim))?;
        let k_view = work(k)?.reshape((merged, k_len, head_dim))?;
        let v_view = work(v)?.reshape((merged, k_len, head_dim))?;
        let scale = 1.0 / (head_dim as f64).sqrt();

        let mask = if is_causal {
            Some(build_causal_mask(q.device(), q_len, k_len)?)
        } else {
            None
        };

        let chunk = self.chunk_len(merged, q_len, k_len);
        let mut outputs = Vec::with_capacity(merged.div_ceil(chunk));
        let mut start = 0;
        while start < merged {
            let len = chunk.min(merged - start);
            let q_part = q_view.narrow(0, start, len)?;
            let k_part = k_view.narrow(0, start, len)?;
            let v_part = v_view.narrow(0, start, len)?;

            let mut scores = q_part
                .matmul(&k_part.transpose(1, 2)?.contiguous()?)?
                .affine(scale, 0.0)?;
            if let Some(mask) = &mask {
                scores = scores.broadcast_add(&mask.to_dtype(scores.dtype())?)?;
            }
            let probs = softmax_last_dim(&scores)?;
            outputs.push(probs.matmul(&v_part)?);
            start += len;
        }

        let output = if outputs.len() == 1 {
            outputs.remove(0)
        } else {
            Tensor::cat(&outputs, 0)?
        };
        Ok(output
            .reshape((batch, heads, q_len, head_dim))?
            .to_dtype(q.dtype())?)
    }
}
