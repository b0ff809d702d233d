//! Projection + multi-head attention blocks assembled from graph combinators.
//!
//! * [`Attention`]: `Distribute(q, k, v projections) → ScaledDotProductAttention
//!   → output projection`, taking the tuple `(query, key, value)`.
//! * [`SelfAttention`]: the same chain behind `Parallel(Identity ×3)`, taking a
//!   single `(batch, seq, E)` tensor.
//! * [`SelfAttention2d`]: self-attention over `(batch, channels, height,
//!   width)` feature maps, flattening the spatial dims into a sequence and
//!   restoring them from the `reshape.spatial_dims` context entry.

use std::sync::Arc;

use graph::{
    context_of, Chain, ContextStore, ContextValue, Contexts, Distribute, Flatten, GraphError,
    Identity, Node, Parallel, RecordDims, SetContext, Transpose, Unflatten, UseContext, Values,
};
use layers::{Linear, LinearConfig, Placement};

use crate::{core::Config, multi_head::ScaledDotProductAttention, reference::ExactAttention};

/// Construction parameters for [`Attention`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttentionConfig {
    pub embedding_dim: usize,
    pub num_heads: usize,
    /// Defaults to `embedding_dim`.
    pub key_embedding_dim: Option<usize>,
    /// Defaults to `embedding_dim`.
    pub value_embedding_dim: Option<usize>,
    /// Bias on the q/k/v projections; the output projection always has one.
    pub use_bias: bool,
    pub is_causal: Option<bool>,
    /// Precision and chunking of the attention kernel.
    pub kernel: Config,
}

impl AttentionConfig {
    pub fn new(embedding_dim: usize, num_heads: usize) -> Self {
        Self {
            embedding_dim,
            num_heads,
            key_embedding_dim: None,
            value_embedding_dim: None,
            use_bias: true,
            is_causal: None,
            kernel: Config::default(),
        }
    }

    pub fn with_kv_dims(mut self, key_embedding_dim: usize, value_embedding_dim: usize) -> Self {
        self.key_embedding_dim = Some(key_embedding_dim);
        self.value_embedding_dim = Some(value_embedding_dim);
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_causal(mut self, is_causal: Option<bool>) -> Self {
        self.is_causal = is_causal;
        self
    }

    pub fn with_kernel_config(mut self, kernel: Config) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn key_dim(&self) -> usize {
        self.key_embedding_dim.unwrap_or(self.embedding_dim)
    }

    pub fn value_dim(&self) -> usize {
        self.value_embedding_dim.unwrap_or(self.embedding_dim)
    }

    pub fn heads_dim(&self) -> usize {
        self.embedding_dim / self.num_heads
    }

    pub fn validate(&self) -> graph::Result<()> {
        if self.num_heads == 0 {
            return Err(GraphError::Config("num_heads must be at least 1".into()));
        }
        if self.embedding_dim == 0 || self.key_dim() == 0 || self.value_dim() == 0 {
            return Err(GraphError::Config(format!(
                "embedding dims must be non-zero, got {:?}",
                self
            )));
        }
        if self.embedding_dim % self.num_heads != 0 {
            return Err(GraphError::Config(format!(
                "embedding_dim {} must be divisible by num_heads {}",
                self.embedding_dim, self.num_heads
            )));
        }
        Ok(())
    }

    fn attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("embedding_dim", self.embedding_dim.to_string()),
            ("num_heads", self.num_heads.to_string()),
            ("heads_dim", self.heads_dim().to_string()),
            ("key_embedding_dim", self.key_dim().to_string()),
            ("value_embedding_dim", self.value_dim().to_string()),
            ("use_bias", self.use_bias.to_string()),
            ("is_causal", format!("{:?}", self.is_causal)),
        ]
    }
}

fn attention_chain(config: &AttentionConfig, placement: &Placement) -> graph::Result<Chain> {
    config.validate()?;
    let projection = |input_dim: usize| -> graph::Result<Box<dyn Node>> {
        let linear = Linear::init(
            LinearConfig::new(input_dim, config.embedding_dim).with_bias(config.use_bias),
            placement,
        )?;
        Ok(Box::new(linear))
    };
    Chain::new(vec![
        Box::new(Distribute::new(vec![
            projection(config.embedding_dim)?,
            projection(config.key_dim())?,
            projection(config.value_dim())?,
        ])?),
        Box::new(
            ScaledDotProductAttention::new(config.num_heads)?
                .with_causal(config.is_causal)
                .with_kernel(Arc::new(ExactAttention::with_config(config.kernel.clone()))),
        ),
        Box::new(Linear::init(
            LinearConfig::new(config.embedding_dim, config.embedding_dim),
            placement,
        )?),
    ])
}

fn broadcast_three() -> graph::Result<Box<dyn Node>> {
    Ok(Box::new(Parallel::new(vec![
        Box::new(Identity),
        Box::new(Identity),
        Box::new(Identity),
    ])?))
}

/// Multi-head attention over a `(query, key, value)` tuple.
pub struct Attention {
    config: AttentionConfig,
    chain: Chain,
}

impl Attention {
    pub fn new(config: AttentionConfig, placement: &Placement) -> graph::Result<Self> {
        let chain = attention_chain(&config, placement)?;
        Ok(Self { config, chain })
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }
}

impl Node for Attention {
    fn name(&self) -> &'static str {
        "Attention"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        self.config.attrs()
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.chain.children()
    }

    fn input_arity(&self) -> Option<usize> {
        Some(3)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> graph::Result<Values> {
        self.chain.forward(inputs, ctx)
    }
}

/// Attention whose query, key and value all come from one input.
pub struct SelfAttention {
    config: AttentionConfig,
    chain: Chain,
}

impl SelfAttention {
    pub fn new(
        embedding_dim: usize,
        num_heads: usize,
        use_bias: bool,
        is_causal: Option<bool>,
        placement: &Placement,
    ) -> graph::Result<Self> {
        let config = AttentionConfig::new(embedding_dim, num_heads)
            .with_bias(use_bias)
            .with_causal(is_causal);
        let mut chain = attention_chain(&config, placement)?;
        chain.insert(0, broadcast_three()?)?;
        Ok(Self { config, chain })
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }
}

impl Node for SelfAttention {
    fn name(&self) -> &'static str {
        "SelfAttention"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        self.config.attrs()
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

const RESHAPE_CONTEXT: &str = "reshape";
const SPATIAL_DIMS_KEY: &str = "spatial_dims";

/// Self-attention over `(batch, channels, height, width)` feature maps.
pub struct SelfAttention2d {
    channels: usize,
    config: AttentionConfig,
    chain: Chain,
}

impl SelfAttention2d {
    pub fn new(
        channels: usize,
        num_heads: usize,
        use_bias: bool,
        is_causal: Option<bool>,
        placement: &Placement,
    ) -> graph::Result<Self> {
        if num_heads == 0 || channels % num_heads != 0 {
            return Err(GraphError::Config(format!(
                "channels {channels} must be divisible by num_heads {num_heads}"
            )));
        }
        let config = AttentionConfig::new(channels, num_heads)
            .with_bias(use_bias)
            .with_causal(is_causal);
        let mut chain = attention_chain(&config, placement)?;
        chain.insert(0, broadcast_three()?)?;

        let to_sequence: [Box<dyn Node>; 3] = [
            Box::new(SetContext::with_writer(
                RESHAPE_CONTEXT,
                SPATIAL_DIMS_KEY,
                RecordDims {
                    start_dim: 2,
                    end_dim: Some(3),
                },
            )),
            Box::new(Flatten::new(2, None)),
            Box::new(Transpose::new(1, 2)),
        ];
        for (index, node) in to_sequence.into_iter().enumerate() {
            chain.insert(index, node)?;
        }
        chain.append(Box::new(Transpose::new(1, 2)))?;
        chain.append(Box::new(Parallel::new(vec![
            Box::new(Identity),
            Box::new(UseContext::new(RESHAPE_CONTEXT, SPATIAL_DIMS_KEY)),
        ])?))?;
        chain.append(Box::new(Unflatten::new(2)))?;

        Ok(Self {
            channels,
            config,
            chain,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl Node for SelfAttention2d {
    fn name(&self) -> &'static str {
        "SelfAttention2d"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        let mut attrs = self.config.attrs();
        attrs.push(("channels", self.channels.to_string()));
        attrs
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.chain.children()
    }

    fn init_context(&self) -> Contexts {
        context_of(RESHAPE_CONTEXT, SPATIAL_DIMS_KEY, ContextValue::Unset)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> graph::Result<Values> {
        self.chain.forward(inputs, ctx)
    }
}
