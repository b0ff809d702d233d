//! Position-wise feed-forward blocks assembled from projections and activations.
//!
//! Feed-forward stacks map `(batch, seq, hidden)` to the same layout. The
//! first projection expands to `intermediate_size` (twice that when gated),
//! the activation (or GLU) follows, and a second projection contracts back to
//! `hidden_size`.

use graph::{Chain, GraphError, Node};

use crate::{
    activations::{Activation, ActivationKind, Glu},
    dtypes::Placement,
    linear::{Linear, LinearConfig},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    pub activation: ActivationKind,
    /// Whether the first projection feeds a GLU.
    pub gated: bool,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize, activation: ActivationKind) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation,
            gated: false,
        }
    }

    /// GLU feed-forward with a `4 * hidden_size` activation space.
    pub fn gated(hidden_size: usize, activation: ActivationKind) -> Self {
        Self {
            hidden_size,
            intermediate_size: 4 * hidden_size,
            activation,
            gated: true,
        }
    }
}

/// Builds `Linear → activation → Linear` as a [`Chain`].
pub fn feed_forward(config: &FeedForwardConfig, placement: &Placement) -> graph::Result<Chain> {
    if config.hidden_size == 0 || config.intermediate_size == 0 {
        return Err(GraphError::Config(format!(
            "feed-forward sizes must be non-zero, got {:?}",
            config
        )));
    }
    let expanded = if config.gated {
        2 * config.intermediate_size
    } else {
        config.intermediate_size
    };
    let activation: Box<dyn Node> = if config.gated {
        Box::new(Glu::new(config.activation))
    } else {
        Box::new(Activation::new(config.activation))
    };
    Chain::new(vec![
        Box::new(Linear::init(
            LinearConfig::new(config.hidden_size, expanded),
            placement,
        )?),
        activation,
        Box::new(Linear::init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            placement,
        )?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use graph::{describe, forward_tensor, Contexts};

    #[test]
    fn gated_feed_forward_preserves_shape() -> graph::Result<()> {
        let config = FeedForwardConfig::gated(8, ActivationKind::Gelu);
        let ffn = feed_forward(&config, &Placement::cpu())?;
        let x = Tensor::randn(0f32, 1.0, (2, 5, 8), &Device::Cpu)?;
        let out = forward_tensor(&ffn, &x, Contexts::new())?;
        assert_eq!(out.dims(), &[2, 5, 8]);
        assert_eq!(out.dtype(), DType::F32);

        let tree = describe(&ffn);
        assert!(tree.contains("Linear(in_features=8, out_features=64, bias=true)"));
        assert!(tree.contains("GLU(activation=GeLU)"));
        assert!(tree.contains("Linear(in_features=32, out_features=8, bias=true)"));
        Ok(())
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = FeedForwardConfig::new(0, 4, ActivationKind::Relu);
        assert!(matches!(
            feed_forward(&config, &Placement::cpu()),
            Err(GraphError::Config(_))
        ));
    }
}
