//! Per-invocation side channel shared by the nodes of one forward pass.
//!
//! The store maps a context name to a set of keyed entries. Nodes declare the
//! entries they need through [`Node::init_context`]; the runner seeds those
//! entries for the whole tree before the pass starts, overlays whatever the
//! caller provides (conditioning tensors, typically), and hands the store down
//! the call tree by `&mut`. A store therefore lives for exactly one pass and
//! can never be observed by two concurrent passes.

mod nodes;

use std::{collections::BTreeMap, fmt};

use crate::{
    errors::{GraphError, Result},
    introspect,
    node::Node,
    value::Value,
};

pub use nodes::{
    CloneValue, ContextReader, ContextWriter, PopLast, PushDims, RecordDims, SetContext,
    StoreInput, UseContext,
};

/// Content of one context entry.
#[derive(Debug, Clone)]
pub enum ContextValue {
    /// Seeded placeholder that has not been written yet.
    Unset,
    Value(Value),
    /// LIFO stack used by producer/consumer node pairs.
    Stack(Vec<Value>),
}

impl ContextValue {
    pub fn empty_stack() -> Self {
        ContextValue::Stack(Vec::new())
    }

    pub fn tensor(tensor: candle_core::Tensor) -> Self {
        ContextValue::Value(Value::Tensor(tensor))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ContextValue::Unset => "unset entry",
            ContextValue::Value(_) => "value",
            ContextValue::Stack(_) => "stack",
        }
    }
}

pub type ContextEntries = BTreeMap<String, ContextValue>;
pub type Contexts = BTreeMap<String, ContextEntries>;

/// Builds a [`Contexts`] map holding a single entry.
pub fn context_of(context: &str, key: &str, value: ContextValue) -> Contexts {
    let mut entries = ContextEntries::new();
    entries.insert(key.to_string(), value);
    let mut contexts = Contexts::new();
    contexts.insert(context.to_string(), entries);
    contexts
}

/// Address of one entry in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextKey {
    pub context: String,
    pub key: String,
}

impl ContextKey {
    pub fn new(context: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            key: key.into(),
        }
    }

    fn not_found(&self) -> GraphError {
        GraphError::ContextNotFound {
            context: self.context.clone(),
            key: self.key.clone(),
        }
    }

    fn wrong_type(&self, expected: &'static str, actual: &ContextValue) -> GraphError {
        GraphError::ContextType {
            context: self.context.clone(),
            key: self.key.clone(),
            expected,
            actual: actual.kind(),
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.context, self.key)
    }
}

/// Mutable state for a single forward pass.
#[derive(Debug, Default)]
pub struct ContextStore {
    contexts: Contexts,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the schema of every node under `root`, then
    /// overlays `provided`.
    pub fn for_node(root: &dyn Node, provided: Contexts) -> Self {
        let mut store = Self::new();
        store.install_schema(root);
        store.update(provided);
        store
    }

    /// Seeds the entries declared by `root` and its descendants.
    pub fn install_schema(&mut self, root: &dyn Node) {
        let mut seeded = 0usize;
        introspect::walk(root, &mut |node, _depth| {
            for (context, entries) in node.init_context() {
                seeded += entries.len();
                self.contexts.entry(context).or_default().extend(entries);
            }
        });
        log::debug!("graph::context seeded {} entries for {}", seeded, root.name());
    }

    /// Merges `contexts` key by key, replacing existing entries.
    pub fn update(&mut self, contexts: Contexts) {
        for (context, entries) in contexts {
            self.contexts.entry(context).or_default().extend(entries);
        }
    }

    pub fn set(&mut self, context: &str, key: &str, value: ContextValue) {
        self.contexts
            .entry(context.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn contains(&self, context: &str, key: &str) -> bool {
        self.contexts
            .get(context)
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    /// Raw entry lookup.
    pub fn entry(&self, target: &ContextKey) -> Result<&ContextValue> {
        self.contexts
            .get(&target.context)
            .and_then(|entries| entries.get(&target.key))
            .ok_or_else(|| target.not_found())
    }

    fn entry_mut(&mut self, target: &ContextKey) -> Result<&mut ContextValue> {
        self.contexts
            .get_mut(&target.context)
            .and_then(|entries| entries.get_mut(&target.key))
            .ok_or_else(|| target.not_found())
    }

    /// Returns a copy of a single stored value.
    pub fn value(&self, target: &ContextKey) -> Result<Value> {
        match self.entry(target)? {
            ContextValue::Value(value) => Ok(value.clone()),
            ContextValue::Unset => Err(GraphError::ContextUnset {
                context: target.context.clone(),
                key: target.key.clone(),
            }),
            other => Err(target.wrong_type("value", other)),
        }
    }

    pub fn push(&mut self, target: &ContextKey, value: Value) -> Result<()> {
        match self.entry_mut(target)? {
            ContextValue::Stack(stack) => {
                stack.push(value);
                log::trace!("graph::context push {} depth={}", target, stack.len());
                Ok(())
            }
            other => Err(target.wrong_type("stack", other)),
        }
    }

    pub fn pop(&mut self, target: &ContextKey) -> Result<Value> {
        match self.entry_mut(target)? {
            ContextValue::Stack(stack) => {
                let value = stack.pop().ok_or_else(|| GraphError::EmptyStack {
                    context: target.context.clone(),
                    key: target.key.clone(),
                })?;
                log::trace!("graph::context pop {} depth={}", target, stack.len());
                Ok(value)
            }
            other => Err(target.wrong_type("stack", other)),
        }
    }

    pub fn stack_len(&self, target: &ContextKey) -> Result<usize> {
        match self.entry(target)? {
            ContextValue::Stack(stack) => Ok(stack.len()),
            other => Err(target.wrong_type("stack", other)),
        }
    }

    /// Verifies every entry read under `root` exists before the pass starts.
    pub fn check_reads(&self, root: &dyn Node) -> Result<usize> {
        let mut reads = Vec::new();
        introspect::walk(root, &mut |node, _depth| reads.extend(node.context_reads()));
        for target in &reads {
            self.entry(target)?;
        }
        Ok(reads.len())
    }

    pub fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    /// Total number of entries across all contexts.
    pub fn len(&self) -> usize {
        self.contexts.values().map(|entries| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
