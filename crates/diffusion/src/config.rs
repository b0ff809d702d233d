//! Construction parameters for the cross-attention blocks.
//!
//! Both structs deserialize with `serde`; omitted fields take the same
//! defaults the constructors document. Validation is explicit through
//! `validate()` and also runs inside the block constructors.

use std::fmt;

use graph::GraphError;
use serde::{Deserialize, Serialize};

fn default_heads() -> usize {
    1
}

fn default_layers() -> usize {
    1
}

fn default_groups() -> usize {
    32
}

fn default_bias() -> bool {
    true
}

/// Parameters of a single [`CrossAttentionBlock`](crate::CrossAttentionBlock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossAttentionConfig {
    pub embedding_dim: usize,
    pub context_embedding_dim: usize,
    /// Key of the conditioning tensor inside the `cross_attention_block` context.
    pub context_key: String,
    #[serde(default = "default_heads")]
    pub num_heads: usize,
    #[serde(default = "default_bias")]
    pub use_bias: bool,
}

impl CrossAttentionConfig {
    pub fn new(
        embedding_dim: usize,
        context_embedding_dim: usize,
        context_key: impl Into<String>,
    ) -> Self {
        Self {
            embedding_dim,
            context_embedding_dim,
            context_key: context_key.into(),
            num_heads: default_heads(),
            use_bias: default_bias(),
        }
    }

    pub fn with_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = num_heads;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn validate(&self) -> graph::Result<()> {
        if self.embedding_dim == 0 || self.context_embedding_dim == 0 {
            return Err(GraphError::Config(format!(
                "embedding dims must be non-zero, got embedding_dim={} context_embedding_dim={}",
                self.embedding_dim, self.context_embedding_dim
            )));
        }
        if self.context_key.is_empty() {
            return Err(GraphError::Config("context_key must not be empty".into()));
        }
        heads_divide(self.embedding_dim, self.num_heads, "embedding_dim")
    }
}

/// How `CrossAttentionBlock2d` moves between feature maps and sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    /// Flatten first, then a `Linear` over channels.
    Linear,
    /// A 1x1 `Conv2d` on the feature map, then flatten.
    Conv2d,
}

impl fmt::Display for ProjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionKind::Linear => f.write_str("Linear"),
            ProjectionKind::Conv2d => f.write_str("Conv2d"),
        }
    }
}

/// Parameters of a [`CrossAttentionBlock2d`](crate::CrossAttentionBlock2d).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossAttention2dConfig {
    pub channels: usize,
    pub context_embedding_dim: usize,
    pub context_key: String,
    #[serde(default = "default_heads")]
    pub num_attention_heads: usize,
    #[serde(default = "default_layers")]
    pub num_attention_layers: usize,
    #[serde(default = "default_groups")]
    pub num_groups: usize,
    #[serde(default = "default_bias")]
    pub use_bias: bool,
    #[serde(default)]
    pub use_linear_projection: bool,
}

impl CrossAttention2dConfig {
    pub fn new(
        channels: usize,
        context_embedding_dim: usize,
        context_key: impl Into<String>,
    ) -> Self {
        Self {
            channels,
            context_embedding_dim,
            context_key: context_key.into(),
            num_attention_heads: default_heads(),
            num_attention_layers: default_layers(),
            num_groups: default_groups(),
            use_bias: default_bias(),
            use_linear_projection: false,
        }
    }

    pub fn with_heads(mut self, num_attention_heads: usize) -> Self {
        self.num_attention_heads = num_attention_heads;
        self
    }

    pub fn with_layers(mut self, num_attention_layers: usize) -> Self {
        self.num_attention_layers = num_attention_layers;
        self
    }

    pub fn with_groups(mut self, num_groups: usize) -> Self {
        self.num_groups = num_groups;
        self
    }

    pub fn with_linear_projection(mut self, use_linear_projection: bool) -> Self {
        self.use_linear_projection = use_linear_projection;
        self
    }

    pub fn projection_kind(&self) -> ProjectionKind {
        if self.use_linear_projection {
            ProjectionKind::Linear
        } else {
            ProjectionKind::Conv2d
        }
    }

    /// Config of each stacked [`CrossAttentionBlock`](crate::CrossAttentionBlock).
    pub fn layer_config(&self) -> CrossAttentionConfig {
        CrossAttentionConfig {
            embedding_dim: self.channels,
            context_embedding_dim: self.context_embedding_dim,
            context_key: self.context_key.clone(),
            num_heads: self.num_attention_heads,
            use_bias: self.use_bias,
        }
    }

    pub fn validate(&self) -> graph::Result<()> {
        if self.num_attention_layers == 0 {
            return Err(GraphError::Config("num_attention_layers must be at least 1".into()));
        }
        if self.num_groups == 0 || self.channels % self.num_groups != 0 {
            return Err(GraphError::Config(format!(
                "channels {} must be divisible by num_groups {}",
                self.channels, self.num_groups
            )));
        }
        self.layer_config().validate()
    }
}

fn heads_divide(dim: usize, num_heads: usize, label: &str) -> graph::Result<()> {
    if num_heads == 0 {
        return Err(GraphError::Config("number of heads must be at least 1".into()));
    }
    if dim % num_heads != 0 {
        return Err(GraphError::Config(format!(
            "{label} {dim} must be divisible by num_heads {num_heads}"
        )));
    }
    Ok(())
}
