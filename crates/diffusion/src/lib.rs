//! Cross-attention blocks for conditioning latent feature maps.
//!
//! Blocks are [`graph::Node`] trees assembled from the `layers` and
//! `attention` crates. Conditioning tensors are passed to a forward pass as
//! provided contexts, usually built with [`conditioning`]:
//!
//! ```no_run
//! use candle_core::{Device, Tensor};
//! use diffusion::{conditioning, CrossAttention2dConfig, CrossAttentionBlock2d};
//! use layers::Placement;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = CrossAttention2dConfig::new(64, 768, "text").with_heads(8);
//! let block = CrossAttentionBlock2d::new(config, &Placement::cpu())?;
//! let x = Tensor::randn(0f32, 1.0, (2, 64, 16, 16), &Device::Cpu)?;
//! let text = Tensor::randn(0f32, 1.0, (2, 77, 768), &Device::Cpu)?;
//! let y = graph::forward_tensor(&block, &x, conditioning("text", text))?;
//! assert_eq!(y.dims(), x.dims());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cross_attention;
pub mod flatten;

pub use config::{CrossAttention2dConfig, CrossAttentionConfig, ProjectionKind};
pub use cross_attention::{
    conditioning, CrossAttentionBlock, CrossAttentionBlock2d, CROSS_ATTENTION_CONTEXT,
};
pub use flatten::StatefulFlatten;
