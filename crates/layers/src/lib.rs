//! Numeric leaf nodes for graphs built with the `graph` crate.
//!
//! Every layer exposes an inherent tensor-level method (`project`,
//! `normalize`, `convolve`, `gate`) returning `candle_core::Result`, and
//! implements [`graph::Node`] so it can sit inside a combinator tree. Learned
//! tensors are held as [`graph::Parameter`] handles created on a
//! [`Placement`](dtypes::Placement).

pub mod activations;
pub mod checks;
pub mod conv;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;

pub use activations::{Activation, ActivationKind, Glu};
pub use conv::{Conv2d, Conv2dConfig};
pub use dtypes::{Placement, PrecisionPolicy};
pub use linear::{Linear, LinearConfig, LinearInit};
pub use mlp::{feed_forward, FeedForwardConfig};
pub use norm::{GroupNorm, LayerNorm, NormConfig};
