//! Composable computation graphs over candle tensors.
//!
//! A graph is a tree of [`Node`]s. Leaves do numeric work; composites
//! ([`Chain`], [`Parallel`], [`Distribute`], [`Sum`]) route values between
//! their children. Values flow as ordered tuples ([`Values`]) so a node may
//! take or return several tensors, or a dimension record next to a tensor.
//!
//! Data that is not part of the positional flow travels through a
//! per-invocation [`ContextStore`]. [`SetContext`] nodes write to it,
//! [`UseContext`] nodes read from it, and the runner ([`forward`]) seeds it
//! from the schema each node declares before checking that every read will
//! find its entry. A missing entry is reported before any tensor is touched.

pub mod basics;
pub mod combinators;
pub mod context;
pub mod errors;
pub mod introspect;
pub mod node;
pub mod value;

use candle_core::Tensor;

pub use basics::{Flatten, Identity, Transpose, Unflatten};
pub use combinators::{Chain, Distribute, Parallel, Sum};
pub use context::{
    context_of, CloneValue, ContextKey, ContextReader, ContextStore, ContextValue, ContextWriter,
    Contexts, PopLast, PushDims, RecordDims, SetContext, StoreInput, UseContext,
};
pub use errors::{GraphError, Result};
pub use introspect::{describe, find_all, named_parameters, structural_eq};
pub use node::{Node, Parameter};
pub use value::{Value, Values};

/// Runs one forward pass of `root` with a fresh context store.
///
/// `provided` overlays the seeded schema; conditioning tensors for
/// cross-attention arrive this way.
pub fn forward(root: &dyn Node, inputs: Values, provided: Contexts) -> Result<Values> {
    let mut store = ContextStore::for_node(root, provided);
    forward_with_store(root, inputs, &mut store)
}

/// Runs one forward pass against a caller-prepared store.
pub fn forward_with_store(
    root: &dyn Node,
    inputs: Values,
    store: &mut ContextStore,
) -> Result<Values> {
    let reads = store.check_reads(root)?;
    log::debug!(
        "graph::forward {} inputs={} context_entries={} reads={}",
        root.name(),
        inputs.len(),
        store.len(),
        reads
    );
    root.forward(inputs, store)
}

/// Convenience wrapper for graphs mapping one tensor to one tensor.
pub fn forward_tensor(root: &dyn Node, input: &Tensor, provided: Contexts) -> Result<Tensor> {
    let outputs = forward(root, vec![Value::Tensor(input.clone())], provided)?;
    value::single_tensor(root.name(), outputs)
}
