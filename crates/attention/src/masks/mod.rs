//! Additive attention masks.
//!
//! Masks are `f32` tensors holding `0.0` (keep) or `f32::NEG_INFINITY`
//! (discard), added to the scores before the softmax.

pub mod causal;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

pub use causal::build_causal_mask;
