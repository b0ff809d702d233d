//! Core traits and types shared across attention kernels.
//!
//! Kernels operate on tensors with layout `[batch, n_heads, seq_len,
//! head_dim]`. The output mirrors the query layout, and reductions accumulate
//! in `f32` by default regardless of the incoming dtype (`bf16`, `f16`, or
//! `f32`).

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{Config, Precision};
pub use errors::AttentionError;

/// Unified interface for scaled-dot-product attention kernels.
///
/// * `q` is `[batch, n_heads, q_len, head_dim]`; `k` and `v` are
///   `[batch, n_heads, k_len, head_dim]`.
/// * The returned tensor has the layout and dtype of `q`.
/// * With `is_causal`, query `i` sees keys `0..=i`.
pub trait AttentionKernel: Send + Sync + std::fmt::Debug {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        is_causal: bool,
    ) -> Result<Tensor, AttentionError>;
}
