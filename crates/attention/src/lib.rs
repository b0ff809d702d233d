//! Scaled-dot-product attention and the projection blocks built on it.
//!
//! Kernels implement [`AttentionKernel`] over tensors laid out as
//! `[batch, n_heads, seq_len, head_dim]`. Query and key lengths may differ;
//! the output follows the query. Scores and the softmax run in `f32` by
//! default and the result is cast back to the query dtype.
//!
//! [`ScaledDotProductAttention`] adapts a kernel to `(batch, seq, E)`
//! projections, and [`Attention`], [`SelfAttention`] and [`SelfAttention2d`]
//! wrap it with learned projections as [`graph::Node`] trees.

pub mod blocks;
pub mod core;
pub mod masks;
pub mod multi_head;
pub mod reference;

pub use blocks::{Attention, AttentionConfig, SelfAttention, SelfAttention2d};
pub use crate::core::{AttentionError, AttentionKernel, Config, Precision};
pub use multi_head::ScaledDotProductAttention;
pub use reference::ExactAttention;
