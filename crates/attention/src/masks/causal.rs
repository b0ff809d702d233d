//! Builder for causal attention masks.
//!
//! The mask has dtype [`MASK_DTYPE`](super::MASK_DTYPE) and shape
//! `[q_len, k_len]`, broadcast over batch and heads by the kernel. Entries are
//! `0.0` where attention is permitted and `f32::NEG_INFINITY` otherwise.

use candle_core::{Device, Result, Tensor};

/// Construct a causal mask for the supplied sequence lengths.
///
/// Query `i` sees keys `0..=i`, aligned at the first position whatever the
/// two lengths are. Every row keeps at least key `0`.
pub fn build_causal_mask(device: &Device, q_len: usize, k_len: usize) -> Result<Tensor> {
    let data: Vec<f32> = (0..q_len)
        .flat_map(|q| (0..k_len).map(move |k| if k > q { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(data, (q_len, k_len), device)
}
