//! Parameter-free plumbing nodes: identity and reshapes.

use crate::{
    context::ContextStore,
    errors::{GraphError, Result},
    node::Node,
    value::{expect_arity, single_tensor, Values},
};

/// Returns its inputs unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Node for Identity {
    fn name(&self) -> &'static str {
        "Identity"
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> Result<Values> {
        Ok(inputs)
    }
}

/// Collapses dims `start_dim..=end_dim` into one.
#[derive(Debug, Clone, Copy)]
pub struct Flatten {
    start_dim: usize,
    end_dim: Option<usize>,
}

impl Flatten {
    /// `end_dim = None` flattens through the last dimension.
    pub fn new(start_dim: usize, end_dim: Option<usize>) -> Self {
        Self { start_dim, end_dim }
    }
}

impl Node for Flatten {
    fn name(&self) -> &'static str {
        "Flatten"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("start_dim", self.start_dim.to_string()),
            ("end_dim", format!("{:?}", self.end_dim)),
        ]
    }

    fn input_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> Result<Values> {
        let x = single_tensor("Flatten", inputs)?;
        let rank = x.rank();
        let end = self.end_dim.unwrap_or_else(|| rank.saturating_sub(1));
        if rank == 0 || self.start_dim > end || end >= rank {
            return Err(GraphError::Shape(format!(
                "Flatten({}..={}) cannot apply to shape {:?}",
                self.start_dim,
                end,
                x.dims()
            )));
        }
        Ok(vec![x.flatten(self.start_dim, end)?.into()])
    }
}

/// Expands `dim` of the first input into the dims carried by the second input.
#[derive(Debug, Clone, Copy)]
pub struct Unflatten {
    dim: usize,
}

impl Unflatten {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Node for Unflatten {
    fn name(&self) -> &'static str {
        "Unflatten"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![("dim", self.dim.to_string())]
    }

    fn input_arity(&self) -> Option<usize> {
        Some(2)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> Result<Values> {
        expect_arity("Unflatten", &inputs, 2)?;
        let mut inputs = inputs.into_iter();
        let (x, sizes) = match (inputs.next(), inputs.next()) {
            (Some(x), Some(sizes)) => (x.into_tensor("Unflatten")?, sizes.into_dims("Unflatten")?),
            _ => {
                return Err(GraphError::Arity {
                    node: "Unflatten".into(),
                    expected: 2,
                    actual: 0,
                })
            }
        };
        let dims = x.dims();
        if self.dim >= dims.len() {
            return Err(GraphError::Shape(format!(
                "Unflatten dim {} out of range for shape {:?}",
                self.dim, dims
            )));
        }
        if sizes.iter().product::<usize>() != dims[self.dim] {
            return Err(GraphError::Shape(format!(
                "cannot unflatten dim {} of {:?} into {:?}",
                self.dim, dims, sizes
            )));
        }
        let mut shape = dims[..self.dim].to_vec();
        shape.extend_from_slice(&sizes);
        shape.extend_from_slice(&dims[self.dim + 1..]);
        Ok(vec![x.reshape(shape)?.into()])
    }
}

/// Swaps two dimensions; the result is made contiguous.
#[derive(Debug, Clone, Copy)]
pub struct Transpose {
    dim0: usize,
    dim1: usize,
}

impl Transpose {
    pub fn new(dim0: usize, dim1: usize) -> Self {
        Self { dim0, dim1 }
    }
}

impl Node for Transpose {
    fn name(&self) -> &'static str {
        "Transpose"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("dim0", self.dim0.to_string()),
            ("dim1", self.dim1.to_string()),
        ]
    }

    fn input_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> Result<Values> {
        let x = single_tensor("Transpose", inputs)?;
        if self.dim0.max(self.dim1) >= x.rank() {
            return Err(GraphError::Shape(format!(
                "Transpose({}, {}) out of range for shape {:?}",
                self.dim0,
                self.dim1,
                x.dims()
            )));
        }
        Ok(vec![x.transpose(self.dim0, self.dim1)?.contiguous()?.into()])
    }
}
