//! Composable node graphs and the cross-attention blocks built from them.
//!
//! This crate re-exports the workspace members under one roof:
//! [`graph`] for nodes, combinators and the context store, [`layers`] for
//! numeric leaves, [`attention`] for the attention kernel and blocks, and
//! [`diffusion`] for the conditioned feature-map blocks.

pub use attention;
pub use diffusion;
pub use graph;
pub use layers;

pub use diffusion::{
    conditioning, CrossAttention2dConfig, CrossAttentionBlock, CrossAttentionBlock2d,
    CrossAttentionConfig,
};
pub use graph::{forward, forward_tensor, GraphError, Node};
pub use layers::Placement;

use anyhow::Result;
use attention::{AttentionKernel, ExactAttention};
use candle_core::{DType, Device, Tensor};

/// Picks a CUDA device when one is present and passes a small attention-shaped
/// workload, otherwise the CPU.
pub fn setup_device() -> Result<Device> {
    match Device::cuda_if_available(0) {
        Ok(device) if device.is_cuda() => match preflight(&device) {
            Ok(()) => {
                log::info!("fluxgraph: using CUDA device {:?}", device);
                return Ok(device);
            }
            Err(err) => log::warn!("fluxgraph: CUDA preflight failed ({err}), falling back to CPU"),
        },
        Ok(_) => {}
        Err(err) => log::debug!("fluxgraph: CUDA unavailable: {err}"),
    }
    log::info!("fluxgraph: using CPU backend");
    Ok(Device::Cpu)
}

fn preflight(device: &Device) -> Result<()> {
    let q = Tensor::randn(0f32, 1.0, (1, 2, 16, 32), device)?;
    let out = ExactAttention::new().attend(&q, &q, &q, true)?;
    out.to_dtype(DType::F32)?.sum_all()?.to_vec0::<f32>()?;
    Ok(())
}
