//! Conditioned transformer blocks for latent feature maps.
//!
//! [`CrossAttentionBlock`] operates on `(batch, seq, E)` sequences and reads
//! its conditioning tensor from the `cross_attention_block` context.
//! [`CrossAttentionBlock2d`] wraps a stack of them between projections that
//! move a `(batch, C, H, W)` map to a `(batch, H*W, C)` sequence and back,
//! with a residual around the whole thing.

use attention::{Attention, AttentionConfig, SelfAttention};
use candle_core::Tensor;
use graph::{
    context_of, Chain, ContextStore, ContextValue, Contexts, GraphError, Identity, Node, Parallel,
    PopLast, Sum, Transpose, Unflatten, UseContext, Values,
};
use layers::{
    feed_forward, ActivationKind, Conv2d, Conv2dConfig, FeedForwardConfig, GroupNorm, LayerNorm,
    Linear, LinearConfig, NormConfig, Placement,
};

use crate::{
    config::{CrossAttention2dConfig, CrossAttentionConfig, ProjectionKind},
    flatten::StatefulFlatten,
};

/// Context holding the conditioning tensors read by [`CrossAttentionBlock`].
pub const CROSS_ATTENTION_CONTEXT: &str = "cross_attention_block";

const FLATTEN_CONTEXT: &str = "flatten";
const SIZES_KEY: &str = "sizes";
const GROUP_NORM_EPS: f64 = 1e-6;

/// Provided contexts carrying `conditioning` under `context_key`.
pub fn conditioning(context_key: &str, tensor: Tensor) -> Contexts {
    context_of(CROSS_ATTENTION_CONTEXT, context_key, ContextValue::tensor(tensor))
}

fn residual(branch: Vec<Box<dyn Node>>) -> graph::Result<Box<dyn Node>> {
    Ok(Box::new(Sum::new(vec![
        Box::new(Identity),
        Box::new(Chain::new(branch)?),
    ])?))
}

/// Self-attention, cross-attention and a gated feed-forward, each pre-normed
/// and wrapped in a residual.
pub struct CrossAttentionBlock {
    config: CrossAttentionConfig,
    chain: Chain,
}

impl CrossAttentionBlock {
    pub fn new(config: CrossAttentionConfig, placement: &Placement) -> graph::Result<Self> {
        config.validate()?;
        let embedding_dim = config.embedding_dim;
        let norm = || -> graph::Result<Box<dyn Node>> {
            Ok(Box::new(LayerNorm::init(NormConfig::new(embedding_dim), placement)?))
        };

        let self_attention = residual(vec![
            norm()?,
            Box::new(SelfAttention::new(
                embedding_dim,
                config.num_heads,
                config.use_bias,
                None,
                placement,
            )?),
        ])?;

        let cross_attention = residual(vec![
            norm()?,
            Box::new(Parallel::new(vec![
                Box::new(Identity),
                Box::new(UseContext::new(CROSS_ATTENTION_CONTEXT, &config.context_key)),
                Box::new(UseContext::new(CROSS_ATTENTION_CONTEXT, &config.context_key)),
            ])?),
            Box::new(Attention::new(
                AttentionConfig::new(embedding_dim, config.num_heads)
                    .with_kv_dims(config.context_embedding_dim, config.context_embedding_dim)
                    .with_bias(config.use_bias),
                placement,
            )?),
        ])?;

        let mut feed_forward_branch = vec![norm()?];
        feed_forward_branch.extend(
            feed_forward(&FeedForwardConfig::gated(embedding_dim, ActivationKind::Gelu), placement)?
                .into_children(),
        );
        let feed_forward = residual(feed_forward_branch)?;

        let chain = Chain::new(vec![self_attention, cross_attention, feed_forward])?;
        Ok(Self { config, chain })
    }

    pub fn config(&self) -> &CrossAttentionConfig {
        &self.config
    }
}

impl Node for CrossAttentionBlock {
    fn name(&self) -> &'static str {
        "CrossAttentionBlock"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("embedding_dim", self.config.embedding_dim.to_string()),
            ("context_embedding_dim", self.config.context_embedding_dim.to_string()),
            ("context", CROSS_ATTENTION_CONTEXT.to_string()),
            ("context_key", self.config.context_key.clone()),
            ("num_heads", self.config.num_heads.to_string()),
            ("use_bias", self.config.use_bias.to_string()),
        ]
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.chain.children()
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> graph::Result<Values> {
        self.chain.forward(inputs, ctx)
    }
}

/// Residual stack of [`CrossAttentionBlock`]s over a `(batch, C, H, W)` map.
pub struct CrossAttentionBlock2d {
    config: CrossAttention2dConfig,
    sum: Sum,
}

impl CrossAttentionBlock2d {
    pub fn new(config: CrossAttention2dConfig, placement: &Placement) -> graph::Result<Self> {
        config.validate()?;
        let channels = config.channels;
        let projection = config.projection_kind();
        log::debug!(
            "diffusion::CrossAttentionBlock2d channels={} heads={} layers={} projection={}",
            channels,
            config.num_attention_heads,
            config.num_attention_layers,
            projection
        );

        let group_norm: Box<dyn Node> = Box::new(GroupNorm::new(
            channels,
            config.num_groups,
            GROUP_NORM_EPS,
            true,
            placement,
        )?);
        let flatten = || -> graph::Result<Box<dyn Node>> {
            Ok(Box::new(StatefulFlatten::new(FLATTEN_CONTEXT, SIZES_KEY, 2, None)?))
        };
        let linear = || -> graph::Result<Box<dyn Node>> {
            Ok(Box::new(Linear::init(LinearConfig::new(channels, channels), placement)?))
        };
        let conv = || -> graph::Result<Box<dyn Node>> {
            Ok(Box::new(Conv2d::init(Conv2dConfig::pointwise(channels, channels), placement)?))
        };
        let restore = || -> graph::Result<Vec<Box<dyn Node>>> {
            Ok(vec![
                Box::new(Transpose::new(1, 2)),
                Box::new(Parallel::new(vec![
                    Box::new(Identity),
                    Box::new(UseContext::with_reader(FLATTEN_CONTEXT, SIZES_KEY, PopLast)),
                ])?),
                Box::new(Unflatten::new(2)),
            ])
        };

        let (in_block, out_block) = match projection {
            ProjectionKind::Linear => {
                let in_block = vec![
                    group_norm,
                    flatten()?,
                    Box::new(Transpose::new(1, 2)),
                    linear()?,
                ];
                let mut out_block = vec![linear()?];
                out_block.extend(restore()?);
                (in_block, out_block)
            }
            ProjectionKind::Conv2d => {
                let in_block = vec![
                    group_norm,
                    conv()?,
                    flatten()?,
                    Box::new(Transpose::new(1, 2)),
                ];
                let mut out_block = restore()?;
                out_block.push(conv()?);
                (in_block, out_block)
            }
        };

        let stack = (0..config.num_attention_layers)
            .map(|_| -> graph::Result<Box<dyn Node>> {
                Ok(Box::new(CrossAttentionBlock::new(config.layer_config(), placement)?))
            })
            .collect::<graph::Result<Vec<_>>>()?;

        let sum = Sum::new(vec![
            Box::new(Identity),
            Box::new(Chain::new(vec![
                Box::new(Chain::new(in_block)?),
                Box::new(Chain::new(stack)?),
                Box::new(Chain::new(out_block)?),
            ])?),
        ])?;
        Ok(Self { config, sum })
    }

    pub fn config(&self) -> &CrossAttention2dConfig {
        &self.config
    }
}

impl Node for CrossAttentionBlock2d {
    fn name(&self) -> &'static str {
        "CrossAttentionBlock2d"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        let config = &self.config;
        vec![
            ("channels", config.channels.to_string()),
            ("in_channels", config.channels.to_string()),
            ("out_channels", config.channels.to_string()),
            ("context_embedding_dim", config.context_embedding_dim.to_string()),
            ("num_attention_heads", config.num_attention_heads.to_string()),
            ("num_attention_layers", config.num_attention_layers.to_string()),
            ("num_groups", config.num_groups.to_string()),
            ("context_key", config.context_key.clone()),
            ("use_linear_projection", config.use_linear_projection.to_string()),
            ("projection_type", config.projection_kind().to_string()),
        ]
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.sum.children()
    }

    fn init_context(&self) -> Contexts {
        context_of(FLATTEN_CONTEXT, SIZES_KEY, ContextValue::empty_stack())
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> graph::Result<Values> {
        self.sum.forward(inputs, ctx)
    }
}
