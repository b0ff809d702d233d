//! Activation nodes for feed-forward stacks.
//!
//! Activations return tensors with the input's layout. Each one promotes the
//! input to the compute dtype requested by [`PrecisionPolicy`] before
//! evaluating the non-linearity, then casts back to the input dtype.
//!
//! # Built-in formulas
//!
//! * **GELU** uses the erf form `0.5 * x * (1 + erf(x / sqrt(2)))`.
//! * **SiLU / Swish** computes `x * sigmoid(x)`.
//! * **GLU** splits the last axis in half and returns `x * act(gate)`.

use candle_core::{Error, Result, Tensor, D};
use graph::{value::single_tensor, ContextStore, Node, Values};

use crate::dtypes::PrecisionPolicy;

/// Identifies which non-linearity an [`Activation`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Identity,
    Gelu,
    Silu,
    Relu,
}

impl ActivationKind {
    pub fn apply(self, input: &Tensor) -> Result<Tensor> {
        let policy = PrecisionPolicy::from_parameter_dtype(input.dtype());
        let compute = policy.cast_for_matmul(input)?;
        let output = match self {
            ActivationKind::Identity => return Ok(input.clone()),
            ActivationKind::Gelu => compute.gelu_erf()?,
            ActivationKind::Silu => compute.silu()?,
            ActivationKind::Relu => compute.relu()?,
        };
        policy.cast_to_storage(&output)
    }

    fn label(self) -> &'static str {
        match self {
            ActivationKind::Identity => "Identity",
            ActivationKind::Gelu => "GeLU",
            ActivationKind::Silu => "SiLU",
            ActivationKind::Relu => "ReLU",
        }
    }
}

/// Elementwise non-linearity.
#[derive(Debug, Clone, Copy)]
pub struct Activation {
    kind: ActivationKind,
}

impl Activation {
    pub fn new(kind: ActivationKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ActivationKind {
        self.kind
    }
}

impl Node for Activation {
    fn name(&self) -> &'static str {
        "Activation"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![("kind", self.kind.label().to_string())]
    }

    fn input_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> graph::Result<Values> {
        let x = single_tensor(self.name(), inputs)?;
        Ok(vec![self.kind.apply(&x)?.into()])
    }
}

/// Gated linear unit: halves the last axis into `(x, gate)` and returns
/// `x * activation(gate)`.
#[derive(Debug, Clone, Copy)]
pub struct Glu {
    activation: ActivationKind,
}

impl Glu {
    pub fn new(activation: ActivationKind) -> Self {
        Self { activation }
    }

    pub fn gate(&self, input: &Tensor) -> Result<Tensor> {
        let last = input.dim(D::Minus1)?;
        if last % 2 != 0 {
            return Err(Error::Msg(format!(
                "glu.input: last dim must be even, got {:?}",
                input.dims()
            )));
        }
        let half = last / 2;
        let x = input.narrow(D::Minus1, 0, half)?;
        let gate = input.narrow(D::Minus1, half, half)?;
        x.mul(&self.activation.apply(&gate)?)
    }
}

impl Node for Glu {
    fn name(&self) -> &'static str {
        "GLU"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![("activation", self.activation.label().to_string())]
    }

    fn input_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> graph::Result<Values> {
        let x = single_tensor(self.name(), inputs)?;
        Ok(vec![self.gate(&x)?.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::f64::consts::SQRT_2;

    fn gelu_reference(x: &Tensor) -> Result<Tensor> {
        let inner = (x.affine(1.0 / SQRT_2, 0.0)?.erf()? + 1.0)?;
        x.affine(0.5, 0.0)?.mul(&inner)
    }

    #[test]
    fn gelu_matches_reference_formula() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-2.5f32, -0.5, 0.0, 1.0, 3.0], (5,), &device)?;
        let output = ActivationKind::Gelu.apply(&input)?;
        let diff = output
            .sub(&gelu_reference(&input)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }

    #[test]
    fn silu_matches_swish_reference() -> Result<()> {
        let device = Device::Cpu;
        let input = Tensor::from_slice(&[-3.0f32, -1.0, 0.0, 0.5, 2.0], (5,), &device)?;
        let output = ActivationKind::Silu.apply(&input)?;
        let sigmoid = (input.neg()?.exp()? + 1.0)?.recip()?;
        let reference = input.mul(&sigmoid)?;
        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }

    #[test]
    fn glu_multiplies_first_half_by_activated_second_half() -> Result<()> {
        let device = Device::Cpu;
        let data = [1.0f32, 2.0, 0.5, -1.0, 3.0, 4.0, 1.5, 0.0];
        let input = Tensor::from_slice(&data, (1, 2, 4), &device)?;
        let output = Glu::new(ActivationKind::Gelu).gate(&input)?;
        assert_eq!(output.dims(), &[1, 2, 2]);

        let x = input.narrow(2, 0, 2)?;
        let gate = input.narrow(2, 2, 2)?;
        let reference = x.mul(&gelu_reference(&gate)?)?;
        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 5e-6);
        Ok(())
    }

    #[test]
    fn glu_rejects_odd_width() -> Result<()> {
        let input = Tensor::zeros((1, 3), DType::F32, &Device::Cpu)?;
        assert!(Glu::new(ActivationKind::Relu).gate(&input).is_err());
        Ok(())
    }
}
