use graph::{Chain, ContextStore, Flatten, Node, PushDims, SetContext, Values};

/// Flatten that pushes the collapsed dims onto a context stack first, so a
/// later `UseContext(.., PopLast)` + `Unflatten` can restore them.
///
/// The stack entry itself is declared by whichever block owns the pair.
pub struct StatefulFlatten {
    start_dim: usize,
    end_dim: Option<usize>,
    chain: Chain,
}

impl StatefulFlatten {
    pub fn new(
        context: &str,
        key: &str,
        start_dim: usize,
        end_dim: Option<usize>,
    ) -> graph::Result<Self> {
        let chain = Chain::new(vec![
            Box::new(SetContext::with_writer(context, key, PushDims { start_dim, end_dim })),
            Box::new(Flatten::new(start_dim, end_dim)),
        ])?;
        Ok(Self {
            start_dim,
            end_dim,
            chain,
        })
    }
}

impl Node for StatefulFlatten {
    fn name(&self) -> &'static str {
        "StatefulFlatten"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("start_dim", self.start_dim.to_string()),
            ("end_dim", format!("{:?}", self.end_dim)),
        ]
    }

    fn children(&self) -> Vec<&dyn Node> {
        self.chain.children()
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> graph::Result<Values> {
        self.chain.forward(inputs, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use graph::{context_of, ContextKey, ContextValue, GraphError, Value};

    #[test]
    fn pushes_collapsed_dims_then_flattens() -> graph::Result<()> {
        let node = StatefulFlatten::new("flatten", "sizes", 2, None)?;
        let mut store = ContextStore::new();
        store.update(context_of("flatten", "sizes", ContextValue::empty_stack()));

        let x = Tensor::zeros((2, 4, 3, 5), DType::F32, &Device::Cpu)?;
        let out = node.forward(vec![x.clone().into()], &mut store)?;
        assert_eq!(out[0].as_tensor().map(|t| t.dims().to_vec()), Some(vec![2, 4, 15]));

        let y = Tensor::zeros((1, 2, 7, 2), DType::F32, &Device::Cpu)?;
        node.forward(vec![y.into()], &mut store)?;

        let target = ContextKey::new("flatten", "sizes");
        assert_eq!(store.stack_len(&target)?, 2);
        assert_eq!(store.pop(&target)?.as_dims(), Some(&[7usize, 2][..]));
        match store.pop(&target)? {
            Value::Dims(dims) => assert_eq!(dims, vec![3, 5]),
            other => panic!("expected dims, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_stack_entry_is_reported() -> graph::Result<()> {
        let node = StatefulFlatten::new("flatten", "sizes", 2, None)?;
        let x = Tensor::zeros((1, 2, 2, 2), DType::F32, &Device::Cpu)?;
        let err = node.forward(vec![x.into()], &mut ContextStore::new());
        assert!(matches!(err, Err(GraphError::ContextNotFound { .. })));
        Ok(())
    }
}
