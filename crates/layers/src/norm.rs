//! Normalisation layers bundled with unified shape and dtype handling.
//!
//! [`LayerNorm`] normalises `(batch, seq, hidden)` inputs along the last axis.
//! [`GroupNorm`] normalises `(batch, channels, ...)` inputs over channel groups
//! and all trailing axes. Both promote statistics (mean, variance) to
//! [`PrecisionPolicy::reduction`] before casting the output back.

use candle_core::{Error, Result, Tensor, D};
use graph::{value::single_tensor, ContextStore, GraphError, Node, Parameter, Values};

use crate::{
    checks,
    dtypes::{Placement, PrecisionPolicy},
};

/// Configuration shared by the normalisation layers.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the axis carrying the affine parameters (hidden size or channels).
    pub hidden_size: usize,
    /// Numeric stabiliser applied to the variance.
    pub epsilon: f64,
}

impl NormConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
        }
    }
}

#[derive(Debug, Clone)]
struct Affine {
    weight: Parameter,
    bias: Parameter,
}

impl Affine {
    fn new(label: &str, hidden_size: usize, weight: Tensor, bias: Tensor) -> Result<Self> {
        for (suffix, tensor) in [("weight", &weight), ("bias", &bias)] {
            let label = format!("{label}.{suffix}");
            checks::expect_shape(&label, tensor, &[hidden_size])?;
            checks::expect_dtype_in(&label, tensor, checks::PARAMETER_DTYPES)?;
            checks::expect_contiguous(&label, tensor)?;
        }
        Ok(Self {
            weight: Parameter::new(weight),
            bias: Parameter::new(bias),
        })
    }

    fn ones_zeros(label: &str, hidden_size: usize, placement: &Placement) -> Result<Self> {
        let weight = Tensor::ones(hidden_size, placement.dtype, &placement.device)?;
        let bias = Tensor::zeros(hidden_size, placement.dtype, &placement.device)?;
        Self::new(label, hidden_size, weight, bias)
    }

    /// Applies `x * weight + bias` with parameters reshaped to `shape`.
    fn apply(&self, normalized: &Tensor, shape: &[usize]) -> Result<Tensor> {
        let weight = self
            .weight
            .tensor()?
            .to_dtype(normalized.dtype())?
            .reshape(shape)?;
        let bias = self
            .bias
            .tensor()?
            .to_dtype(normalized.dtype())?
            .reshape(shape)?;
        normalized.broadcast_mul(&weight)?.broadcast_add(&bias)
    }

    fn parameters(&self) -> Vec<(&'static str, Parameter)> {
        vec![("weight", self.weight.clone()), ("bias", self.bias.clone())]
    }
}

/// Standard LayerNorm with learnable scale and bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    policy: PrecisionPolicy,
    affine: Affine,
}

impl LayerNorm {
    /// Constructs a LayerNorm with learnable scale and bias parameters.
    pub fn new(weight: Tensor, bias: Tensor, config: NormConfig) -> Result<Self> {
        Ok(Self {
            policy: PrecisionPolicy::from_parameter_dtype(weight.dtype()),
            affine: Affine::new("layer_norm", config.hidden_size, weight, bias)?,
            config,
        })
    }

    /// LayerNorm initialised to the identity transform.
    pub fn init(config: NormConfig, placement: &Placement) -> Result<Self> {
        Ok(Self {
            affine: Affine::ones_zeros("layer_norm", config.hidden_size, placement)?,
            policy: placement.policy(),
            config,
        })
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn normalize(&self, hidden: &Tensor) -> Result<Tensor> {
        let hidden_size = self.config.hidden_size;
        match hidden.dims().last() {
            Some(&last) if last == hidden_size => {}
            _ => {
                return Err(Error::Msg(format!(
                    "layer_norm.input: expected trailing dim {}, got {:?}",
                    hidden_size,
                    hidden.dims()
                )))
            }
        }

        let compute = self.policy.cast_for_reduction(hidden)?;
        let mean = (compute.sum_keepdim(D::Minus1)? / hidden_size as f64)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size as f64)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let normalized = centered
            .broadcast_div(&denom)?
            .to_dtype(self.policy.compute())?;
        let scaled = self.affine.apply(&normalized, &[hidden_size])?;
        self.policy.cast_to_storage(&scaled)
    }
}

impl Node for LayerNorm {
    fn name(&self) -> &'static str {
        "LayerNorm"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("normalized_shape", self.config.hidden_size.to_string()),
            ("eps", self.config.epsilon.to_string()),
        ]
    }

    fn own_parameters(&self) -> Vec<(&'static str, Parameter)> {
        self.affine.parameters()
    }

    fn input_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> graph::Result<Values> {
        let hidden = single_tensor(self.name(), inputs)?;
        Ok(vec![self.normalize(&hidden)?.into()])
    }
}

/// Group normalisation over `(batch, channels, *spatial)` inputs.
#[derive(Debug, Clone)]
pub struct GroupNorm {
    channels: usize,
    num_groups: usize,
    epsilon: f64,
    policy: PrecisionPolicy,
    affine: Option<Affine>,
}

impl GroupNorm {
    /// Affine group norm initialised to the identity transform.
    pub fn new(
        channels: usize,
        num_groups: usize,
        epsilon: f64,
        affine: bool,
        placement: &Placement,
    ) -> graph::Result<Self> {
        if num_groups == 0 || channels % num_groups != 0 {
            return Err(GraphError::Config(format!(
                "channels {channels} must be divisible by num_groups {num_groups}"
            )));
        }
        let affine = if affine {
            Some(Affine::ones_zeros("group_norm", channels, placement)?)
        } else {
            None
        };
        Ok(Self {
            channels,
            num_groups,
            epsilon,
            policy: placement.policy(),
            affine,
        })
    }

    pub fn normalize(&self, x: &Tensor) -> Result<Tensor> {
        let dims = x.dims().to_vec();
        if dims.len() < 2 || dims[1] != self.channels {
            return Err(Error::Msg(format!(
                "group_norm.input: expected (batch, {}, ...), got {:?}",
                self.channels, dims
            )));
        }
        let batch = dims[0];
        let compute = self.policy.cast_for_reduction(x)?;
        let grouped = compute.reshape((batch, self.num_groups, ()))?;
        let group_size = grouped.dim(2)? as f64;

        let mean = (grouped.sum_keepdim(2)? / group_size)?;
        let centered = grouped.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(2)? / group_size)?;
        let denom = (variance + self.epsilon)?.sqrt()?;
        let mut normalized = centered
            .broadcast_div(&denom)?
            .reshape(dims.as_slice())?
            .to_dtype(self.policy.compute())?;

        if let Some(affine) = &self.affine {
            let mut shape = vec![1; dims.len()];
            shape[1] = self.channels;
            normalized = affine.apply(&normalized, &shape)?;
        }
        self.policy.cast_to_storage(&normalized)
    }
}

impl Node for GroupNorm {
    fn name(&self) -> &'static str {
        "GroupNorm"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("channels", self.channels.to_string()),
            ("num_groups", self.num_groups.to_string()),
            ("eps", self.epsilon.to_string()),
            ("affine", self.affine.is_some().to_string()),
        ]
    }

    fn own_parameters(&self) -> Vec<(&'static str, Parameter)> {
        self.affine.as_ref().map(Affine::parameters).unwrap_or_default()
    }

    fn input_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> graph::Result<Values> {
        let x = single_tensor(self.name(), inputs)?;
        Ok(vec![self.normalize(&x)?.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::ops;

    fn build_input(device: &Device, dtype: DType, shape: &[usize]) -> Result<Tensor> {
        let total: usize = shape.iter().product();
        let data = (0..total)
            .map(|i| (i as f32 * 0.25_f32) - 1.5_f32)
            .collect::<Vec<_>>();
        Tensor::from_vec(data, shape, device)?.to_dtype(dtype)
    }

    fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        a.to_dtype(DType::F32)?
            .sub(&b.to_dtype(DType::F32)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()
    }

    #[test]
    fn layer_norm_matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        let config = NormConfig::new(4);
        let weight_f32 = Tensor::from_vec(vec![1.0f32, 0.5, -0.25, 1.5], (4,), &device)?;
        let bias_f32 = Tensor::from_vec(vec![0.1f32, -0.2, 0.05, 0.0], (4,), &device)?;

        for &dtype in &[DType::F32, DType::F16, DType::BF16] {
            let input = build_input(&device, dtype, &[2, 3, 4])?;
            let weight = weight_f32.to_dtype(dtype)?;
            let bias = bias_f32.to_dtype(dtype)?;
            let layer = LayerNorm::new(weight.clone(), bias.clone(), config.clone())?;
            let output = layer.normalize(&input)?;

            assert_eq!(output.dims(), input.dims());
            assert_eq!(output.dtype(), dtype);

            let reference = ops::layer_norm(&input, &weight, &bias, config.epsilon as f32)?;
            let tol = match dtype {
                DType::F16 => 1e-3,
                DType::BF16 => 1e-2,
                _ => 5e-4,
            };
            let diff = max_diff(&output, &reference)?;
            assert!(diff < tol, "max diff {} for dtype {:?}", diff, dtype);
        }
        Ok(())
    }

    #[test]
    fn layer_norm_handles_edge_shapes() -> Result<()> {
        let device = Device::Cpu;
        for &(batch, seq, hidden) in &[(1, 1, 1), (2, 1, 1), (1, 64, 8), (2, 3, 256)] {
            let input = build_input(&device, DType::F32, &[batch, seq, hidden])?;
            let layer = LayerNorm::init(NormConfig::new(hidden), &Placement::cpu())?;
            let output = layer.normalize(&input)?;
            let weight = Tensor::ones((hidden,), DType::F32, &device)?;
            let bias = Tensor::zeros((hidden,), DType::F32, &device)?;
            let reference = ops::layer_norm(&input, &weight, &bias, 1e-5)?;
            let diff = max_diff(&output, &reference)?;
            assert!(diff < 5e-4, "shape {:?} diff {}", (batch, seq, hidden), diff);
        }
        Ok(())
    }

    #[test]
    fn group_norm_normalises_each_group() -> std::result::Result<(), GraphError> {
        let device = Device::Cpu;
        let norm = GroupNorm::new(4, 2, 1e-6, true, &Placement::cpu())?;
        let input = build_input(&device, DType::F32, &[2, 4, 3, 3])?;
        let output = norm.normalize(&input)?;
        assert_eq!(output.dims(), &[2, 4, 3, 3]);

        let grouped = output.reshape((2, 2, 18))?;
        let means = grouped.mean_keepdim(2)?.flatten_all()?.to_vec1::<f32>()?;
        let vars = grouped
            .broadcast_sub(&grouped.mean_keepdim(2)?)?
            .sqr()?
            .mean_keepdim(2)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        for (mean, var) in means.iter().zip(vars.iter()) {
            assert!(mean.abs() < 1e-4, "mean {mean}");
            assert!((var - 1.0).abs() < 1e-3, "var {var}");
        }
        Ok(())
    }

    #[test]
    fn group_norm_applies_per_channel_affine() -> std::result::Result<(), GraphError> {
        let device = Device::Cpu;
        let norm = GroupNorm::new(2, 1, 1e-6, true, &Placement::cpu())?;
        let params = norm.own_parameters();
        params[0].1.assign(&Tensor::new(&[2f32, 0.0], &device)?)?;
        params[1].1.assign(&Tensor::new(&[0f32, 3.0], &device)?)?;

        let input = build_input(&device, DType::F32, &[1, 2, 2, 2])?;
        let output = norm.normalize(&input)?;
        let second = output.narrow(1, 1, 1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(second.iter().all(|v| (v - 3.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn group_norm_without_affine_has_no_parameters() -> std::result::Result<(), GraphError> {
        let device = Device::Cpu;
        let plain = GroupNorm::new(4, 2, 1e-6, false, &Placement::cpu())?;
        let affine = GroupNorm::new(4, 2, 1e-6, true, &Placement::cpu())?;
        assert!(plain.own_parameters().is_empty());
        assert!(plain.structural_attrs().contains(&("affine", "false".to_string())));

        let input = build_input(&device, DType::F32, &[1, 4, 2, 2])?;
        let diff = plain
            .normalize(&input)?
            .sub(&affine.normalize(&input)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn group_norm_rejects_indivisible_channels() {
        let err = GroupNorm::new(6, 4, 1e-6, true, &Placement::cpu()).unwrap_err();
        assert!(matches!(err, GraphError::Config(_)));
    }
}
