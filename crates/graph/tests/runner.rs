use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use graph::{
    context_of, forward, forward_tensor, forward_with_store, Chain, ContextKey, ContextStore,
    ContextValue, Contexts, Flatten, GraphError, Identity, Node, Parallel, PopLast, PushDims,
    SetContext, Unflatten, UseContext, Values,
};

/// Flattens spatial dims and restores them from a stack entry it seeds itself.
struct Roundtrip {
    inner: Chain,
}

impl Roundtrip {
    fn new() -> Result<Self> {
        let inner = Chain::new(vec![
            Box::new(SetContext::with_writer(
                "flatten",
                "sizes",
                PushDims {
                    start_dim: 2,
                    end_dim: None,
                },
            )),
            Box::new(Flatten::new(2, None)),
            Box::new(Parallel::new(vec![
                Box::new(Identity),
                Box::new(UseContext::with_reader("flatten", "sizes", PopLast)),
            ])?),
            Box::new(Unflatten::new(2)),
        ])?;
        Ok(Self { inner })
    }
}

impl Node for Roundtrip {
    fn name(&self) -> &'static str {
        "Roundtrip"
    }

    fn children(&self) -> Vec<&dyn Node> {
        vec![&self.inner]
    }

    fn init_context(&self) -> Contexts {
        context_of("flatten", "sizes", ContextValue::empty_stack())
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> graph::Result<Values> {
        self.inner.forward(inputs, ctx)
    }
}

#[test]
fn schema_is_seeded_and_stack_balances() -> Result<()> {
    let node = Roundtrip::new()?;
    let x = Tensor::arange(0f32, 2.0 * 3.0 * 4.0 * 5.0, &Device::Cpu)?.reshape((2, 3, 4, 5))?;

    let mut store = ContextStore::for_node(&node, Contexts::new());
    let out = forward_with_store(&node, vec![x.clone().into()], &mut store)?;
    let out = out[0].as_tensor().cloned().ok_or_else(|| anyhow::anyhow!("tensor"))?;

    assert_eq!(out.dims(), x.dims());
    let diff = out.sub(&x)?.abs()?.max_all()?.to_vec0::<f32>()?;
    assert_eq!(diff, 0.0);
    assert_eq!(store.stack_len(&ContextKey::new("flatten", "sizes"))?, 0);
    Ok(())
}

#[test]
fn missing_context_fails_before_any_node_runs() -> Result<()> {
    let graph = Chain::new(vec![
        Box::new(SetContext::new("side_effect", "ran")),
        Box::new(Parallel::new(vec![
            Box::new(Identity),
            Box::new(UseContext::new("text", "embedding")),
        ])?),
    ])?;
    let x = Tensor::zeros((1, 4), DType::F32, &Device::Cpu)?;

    let mut store = ContextStore::new();
    let err = forward_with_store(&graph, vec![x.into()], &mut store).unwrap_err();
    assert!(matches!(err, GraphError::ContextNotFound { ref context, .. } if context == "text"));
    assert!(!store.contains("side_effect", "ran"));
    Ok(())
}

#[test]
fn provided_contexts_reach_readers() -> Result<()> {
    let graph = Parallel::new(vec![
        Box::new(Identity),
        Box::new(UseContext::new("text", "embedding")),
    ])?;
    let x = Tensor::zeros((1, 4), DType::F32, &Device::Cpu)?;
    let cond = Tensor::ones((1, 7, 8), DType::F32, &Device::Cpu)?;

    let out = forward(
        &graph,
        vec![x.into()],
        context_of("text", "embedding", ContextValue::tensor(cond)),
    )?;
    assert_eq!(out.len(), 2);
    assert_eq!(out[1].as_tensor().map(|t| t.dims().to_vec()), Some(vec![1, 7, 8]));
    Ok(())
}

#[test]
fn each_pass_gets_a_fresh_store() -> Result<()> {
    let node = Roundtrip::new()?;
    let x = Tensor::zeros((1, 2, 3, 3), DType::F32, &Device::Cpu)?;
    for _ in 0..3 {
        let out = forward_tensor(&node, &x, Contexts::new())?;
        assert_eq!(out.dims(), &[1, 2, 3, 3]);
    }
    Ok(())
}
