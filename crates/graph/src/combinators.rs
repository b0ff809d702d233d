//! Composite nodes: [`Chain`], [`Parallel`], [`Distribute`] and [`Sum`].
//!
//! Each composite owns its children exclusively and applies its own
//! composition rule. Children run sequentially in declared order, and outputs
//! are assembled in that same order.

use candle_core::Tensor;

use crate::{
    context::ContextStore,
    errors::{GraphError, Result},
    node::Node,
    value::{expect_arity, Value, Values},
};

fn borrow_children(children: &[Box<dyn Node>]) -> Vec<&dyn Node> {
    children.iter().map(|child| child.as_ref()).collect()
}

fn summed_output_arity(children: &[Box<dyn Node>]) -> Option<usize> {
    children
        .iter()
        .map(|child| child.output_arity())
        .sum::<Option<usize>>()
}

/// Common input arity of nodes that all receive the same tuple.
fn shared_input_arity(owner: &str, children: &[Box<dyn Node>]) -> Result<Option<usize>> {
    let mut shared = None;
    for child in children {
        if let Some(arity) = child.input_arity() {
            match shared {
                Some(existing) if existing != arity => {
                    return Err(GraphError::Arity {
                        node: format!("{owner}({})", child.name()),
                        expected: existing,
                        actual: arity,
                    })
                }
                _ => shared = Some(arity),
            }
        }
    }
    Ok(shared)
}

fn check_link(previous: &dyn Node, next: &dyn Node) -> Result<()> {
    match (previous.output_arity(), next.input_arity()) {
        (Some(produced), Some(accepted)) if produced != accepted => Err(GraphError::Arity {
            node: format!("Chain({} -> {})", previous.name(), next.name()),
            expected: accepted,
            actual: produced,
        }),
        _ => Ok(()),
    }
}

/// Sequential composition: the output of child `i` is the input of child `i + 1`.
pub struct Chain {
    children: Vec<Box<dyn Node>>,
}

impl Chain {
    pub fn new(children: Vec<Box<dyn Node>>) -> Result<Self> {
        for pair in children.windows(2) {
            check_link(pair[0].as_ref(), pair[1].as_ref())?;
        }
        Ok(Self { children })
    }

    /// An empty chain behaves as the identity.
    pub fn empty() -> Self {
        Self {
            children: Vec::new(),
        }
    }

    pub fn append(&mut self, child: Box<dyn Node>) -> Result<()> {
        let index = self.children.len();
        self.insert(index, child)
    }

    /// Inserts `child` at `index`, re-checking arity against its new neighbours.
    pub fn insert(&mut self, index: usize, child: Box<dyn Node>) -> Result<()> {
        if index > self.children.len() {
            return Err(GraphError::Config(format!(
                "cannot insert at {} into a chain of {} nodes",
                index,
                self.children.len()
            )));
        }
        if index > 0 {
            check_link(self.children[index - 1].as_ref(), child.as_ref())?;
        }
        if let Some(next) = self.children.get(index) {
            check_link(child.as_ref(), next.as_ref())?;
        }
        self.children.insert(index, child);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn Node> {
        self.children.get(index).map(|child| child.as_ref())
    }

    /// Releases the children so they can be spliced into another chain.
    pub fn into_children(self) -> Vec<Box<dyn Node>> {
        self.children
    }
}

impl Node for Chain {
    fn name(&self) -> &'static str {
        "Chain"
    }

    fn children(&self) -> Vec<&dyn Node> {
        borrow_children(&self.children)
    }

    fn input_arity(&self) -> Option<usize> {
        self.children.first().and_then(|child| child.input_arity())
    }

    fn output_arity(&self) -> Option<usize> {
        self.children.last().and_then(|child| child.output_arity())
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> Result<Values> {
        let mut values = inputs;
        for child in &self.children {
            values = child.forward(values, ctx)?;
        }
        Ok(values)
    }
}

/// Fan-out: every child receives the same inputs; outputs are concatenated in child order.
pub struct Parallel {
    children: Vec<Box<dyn Node>>,
}

impl Parallel {
    pub fn new(children: Vec<Box<dyn Node>>) -> Result<Self> {
        shared_input_arity("Parallel", &children)?;
        Ok(Self { children })
    }
}

impl Node for Parallel {
    fn name(&self) -> &'static str {
        "Parallel"
    }

    fn children(&self) -> Vec<&dyn Node> {
        borrow_children(&self.children)
    }

    fn input_arity(&self) -> Option<usize> {
        shared_input_arity("Parallel", &self.children).ok().flatten()
    }

    fn output_arity(&self) -> Option<usize> {
        summed_output_arity(&self.children)
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> Result<Values> {
        let mut outputs = Vec::with_capacity(self.children.len());
        for child in &self.children {
            outputs.extend(child.forward(inputs.clone(), ctx)?);
        }
        Ok(outputs)
    }
}

/// Positional fan-out: child `i` receives only input `i`.
pub struct Distribute {
    children: Vec<Box<dyn Node>>,
}

impl Distribute {
    pub fn new(children: Vec<Box<dyn Node>>) -> Result<Self> {
        for child in &children {
            if let Some(arity) = child.input_arity() {
                if arity != 1 {
                    return Err(GraphError::Arity {
                        node: format!("Distribute({})", child.name()),
                        expected: 1,
                        actual: arity,
                    });
                }
            }
        }
        Ok(Self { children })
    }
}

impl Node for Distribute {
    fn name(&self) -> &'static str {
        "Distribute"
    }

    fn children(&self) -> Vec<&dyn Node> {
        borrow_children(&self.children)
    }

    fn input_arity(&self) -> Option<usize> {
        Some(self.children.len())
    }

    fn output_arity(&self) -> Option<usize> {
        summed_output_arity(&self.children)
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> Result<Values> {
        expect_arity("Distribute", &inputs, self.children.len())?;
        let mut outputs = Vec::with_capacity(self.children.len());
        for (child, input) in self.children.iter().zip(inputs) {
            outputs.extend(child.forward(vec![input], ctx)?);
        }
        Ok(outputs)
    }
}

/// Residual combination: branches see the same inputs and their outputs are
/// added elementwise, left to right in declared order.
pub struct Sum {
    branches: Vec<Box<dyn Node>>,
}

impl Sum {
    pub fn new(branches: Vec<Box<dyn Node>>) -> Result<Self> {
        if branches.is_empty() {
            return Err(GraphError::Config("Sum needs at least one branch".into()));
        }
        shared_input_arity("Sum", &branches)?;
        let mut produced: Option<usize> = None;
        for branch in &branches {
            if let Some(arity) = branch.output_arity() {
                match produced {
                    Some(existing) if existing != arity => {
                        return Err(GraphError::Arity {
                            node: format!("Sum({})", branch.name()),
                            expected: existing,
                            actual: arity,
                        })
                    }
                    _ => produced = Some(arity),
                }
            }
        }
        Ok(Self { branches })
    }

    fn accumulate(accumulated: Vec<Tensor>, branch: Vec<Tensor>) -> Result<Vec<Tensor>> {
        if accumulated.len() != branch.len() {
            return Err(GraphError::Arity {
                node: "Sum".into(),
                expected: accumulated.len(),
                actual: branch.len(),
            });
        }
        accumulated
            .iter()
            .zip(branch.iter())
            .map(|(acc, next)| {
                if acc.dims() != next.dims() {
                    return Err(GraphError::Shape(format!(
                        "Sum branches disagree on shape: {:?} vs {:?}",
                        acc.dims(),
                        next.dims()
                    )));
                }
                Ok(acc.add(next)?)
            })
            .collect()
    }
}

impl Node for Sum {
    fn name(&self) -> &'static str {
        "Sum"
    }

    fn children(&self) -> Vec<&dyn Node> {
        borrow_children(&self.branches)
    }

    fn input_arity(&self) -> Option<usize> {
        shared_input_arity("Sum", &self.branches).ok().flatten()
    }

    fn output_arity(&self) -> Option<usize> {
        self.branches.iter().find_map(|branch| branch.output_arity())
    }

    fn forward(&self, inputs: Values, ctx: &mut ContextStore) -> Result<Values> {
        let mut accumulated: Option<Vec<Tensor>> = None;
        for branch in &self.branches {
            let outputs = branch
                .forward(inputs.clone(), ctx)?
                .into_iter()
                .map(|value| value.into_tensor("Sum"))
                .collect::<Result<Vec<_>>>()?;
            accumulated = Some(match accumulated {
                None => outputs,
                Some(previous) => Self::accumulate(previous, outputs)?,
            });
        }
        let accumulated = accumulated
            .ok_or_else(|| GraphError::Config("Sum needs at least one branch".into()))?;
        Ok(accumulated.into_iter().map(Value::Tensor).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basics::{Flatten, Identity, Unflatten};
    use crate::context::UseContext;
    use candle_core::{DType, Device};

    /// Multiplies its only tensor input by a constant.
    struct Scale(f64);

    impl Node for Scale {
        fn name(&self) -> &'static str {
            "Scale"
        }

        fn structural_attrs(&self) -> Vec<(&'static str, String)> {
            vec![("factor", self.0.to_string())]
        }

        fn input_arity(&self) -> Option<usize> {
            Some(1)
        }

        fn output_arity(&self) -> Option<usize> {
            Some(1)
        }

        fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> Result<Values> {
            let x = crate::value::single_tensor("Scale", inputs)?;
            Ok(vec![x.affine(self.0, 0.0)?.into()])
        }
    }

    fn values(tensor: &Tensor) -> Result<Vec<f32>> {
        Ok(tensor.flatten_all()?.to_vec1::<f32>()?)
    }

    fn ones(n: usize) -> Result<Tensor> {
        Ok(Tensor::ones(n, DType::F32, &Device::Cpu)?)
    }

    #[test]
    fn chain_feeds_outputs_forward_in_order() -> Result<()> {
        let chain = Chain::new(vec![Box::new(Scale(2.0)), Box::new(Scale(3.0))])?;
        let out = chain.forward(vec![ones(2)?.into()], &mut ContextStore::new())?;
        let x = crate::value::single_tensor("test", out)?;
        assert_eq!(values(&x)?, vec![6.0, 6.0]);
        Ok(())
    }

    #[test]
    fn empty_chain_is_identity() -> Result<()> {
        let out = Chain::empty().forward(vec![ones(3)?.into()], &mut ContextStore::new())?;
        assert_eq!(out.len(), 1);
        Ok(())
    }

    #[test]
    fn chain_rejects_static_arity_mismatch() -> Result<()> {
        let parallel = Parallel::new(vec![Box::new(Scale(1.0)), Box::new(Scale(1.0))])?;
        let err = Chain::new(vec![Box::new(parallel), Box::new(Scale(1.0))])
            .err()
            .ok_or_else(|| GraphError::Config("chain accepted a mismatched link".into()))?;
        assert!(matches!(err, GraphError::Arity { expected: 1, actual: 2, .. }));
        Ok(())
    }

    #[test]
    fn chain_insert_rechecks_neighbours() -> Result<()> {
        let mut chain = Chain::new(vec![Box::new(Scale(1.0))])?;
        let pair = Distribute::new(vec![Box::new(Scale(1.0)), Box::new(Scale(1.0))])?;
        assert!(chain.insert(0, Box::new(pair)).is_err());
        assert_eq!(chain.len(), 1);

        chain.insert(0, Box::new(Scale(2.0)))?;
        chain.append(Box::new(Scale(3.0)))?;
        assert_eq!(chain.len(), 3);
        assert!(chain.insert(7, Box::new(Identity)).is_err());
        Ok(())
    }

    #[test]
    fn parallel_collects_outputs_in_declared_order() -> Result<()> {
        let parallel = Parallel::new(vec![
            Box::new(Scale(1.0)),
            Box::new(Scale(2.0)),
            Box::new(Scale(3.0)),
        ])?;
        let out = parallel.forward(vec![ones(1)?.into()], &mut ContextStore::new())?;
        let [a, b, c] = crate::value::tensors::<3>("test", out)?;
        assert_eq!(values(&a)?, vec![1.0]);
        assert_eq!(values(&b)?, vec![2.0]);
        assert_eq!(values(&c)?, vec![3.0]);
        Ok(())
    }

    #[test]
    fn distribute_routes_by_position_and_checks_length() -> Result<()> {
        let distribute = Distribute::new(vec![Box::new(Scale(10.0)), Box::new(Scale(-1.0))])?;
        let out = distribute.forward(
            vec![ones(1)?.into(), ones(1)?.into()],
            &mut ContextStore::new(),
        )?;
        let [a, b] = crate::value::tensors::<2>("test", out)?;
        assert_eq!(values(&a)?, vec![10.0]);
        assert_eq!(values(&b)?, vec![-1.0]);

        let err = distribute
            .forward(vec![ones(1)?.into()], &mut ContextStore::new())
            .unwrap_err();
        assert!(matches!(err, GraphError::Arity { expected: 2, actual: 1, .. }));
        Ok(())
    }

    #[test]
    fn sum_adds_identity_and_branch() -> Result<()> {
        let sum = Sum::new(vec![Box::new(Identity), Box::new(Scale(0.5))])?;
        let out = sum.forward(vec![ones(4)?.into()], &mut ContextStore::new())?;
        let x = crate::value::single_tensor("test", out)?;
        assert_eq!(values(&x)?, vec![1.5; 4]);
        Ok(())
    }

    #[test]
    fn sum_rejects_incongruent_branches() -> Result<()> {
        let flatten_then_back = Chain::new(vec![
            Box::new(Flatten::new(0, None)),
            Box::new(Parallel::new(vec![Box::new(Identity), Box::new(UseContext::new("c", "k"))])?),
            Box::new(Unflatten::new(0)),
        ])?;
        let mut store = ContextStore::new();
        store.set(
            "c",
            "k",
            crate::context::ContextValue::Value(Value::Dims(vec![2, 2])),
        );
        let sum = Sum::new(vec![Box::new(Identity), Box::new(flatten_then_back)])?;
        let err = sum.forward(vec![ones(4)?.into()], &mut store).unwrap_err();
        assert!(matches!(err, GraphError::Shape(_)));
        Ok(())
    }

    #[test]
    fn sum_reports_branch_output_mismatch() -> Result<()> {
        let pair = Parallel::new(vec![Box::new(Scale(1.0)), Box::new(Scale(2.0))])?;
        let err = Sum::new(vec![Box::new(Scale(1.0)), Box::new(pair)])
            .err()
            .ok_or_else(|| GraphError::Config("sum accepted mismatched branches".into()))?;
        assert!(matches!(err, GraphError::Arity { expected: 1, actual: 2, .. }));
        let message = err.to_string();
        assert_eq!(message, "Sum(Parallel) expected 1 values, got 2");
        assert!(!message.contains("input"));
        Ok(())
    }

    #[test]
    fn empty_sum_is_a_configuration_error() {
        assert!(matches!(Sum::new(Vec::new()), Err(GraphError::Config(_))));
    }
}
