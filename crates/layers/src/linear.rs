//! Dense affine projections.
//!
//! Linear layers expect inputs shaped `(batch, seq, in_dim)` (or `(rows,
//! in_dim)`) and return `(batch, seq, out_dim)`. Weights and activations are
//! cast to [`PrecisionPolicy::compute`] for the matmul and the result is cast
//! back with [`PrecisionPolicy::cast_to_storage`]. Weights default to Kaiming
//! uniform sampling; Glorot normal is available for deeper stacks.

use candle_core::{DType, Device, Error, Result, Tensor};
use graph::{value::single_tensor, ContextStore, Node, Parameter, Values};

use crate::{
    checks,
    dtypes::{Placement, PrecisionPolicy},
};

/// Shape of a dense projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
}

impl LinearConfig {
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }
}

/// Supported weight initialisation policies.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation.
    KaimingUniform { negative_slope: f64 },
}

impl Default for LinearInit {
    /// Kaiming uniform with slope `sqrt(5)`, i.e. `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    fn default() -> Self {
        LinearInit::KaimingUniform {
            negative_slope: 5f64.sqrt(),
        }
    }
}

impl LinearInit {
    fn sample(&self, shape: (usize, usize), device: &Device, dtype: DType) -> Result<Tensor> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let weight_f32 = match self {
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = 3f64.sqrt() * gain / fan_in.sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
        };
        if dtype == DType::F32 {
            Ok(weight_f32)
        } else {
            checks::ensure_cast_supported("linear.init", DType::F32, dtype)?;
            weight_f32.to_dtype(dtype)
        }
    }
}

/// Dense affine projection with optional bias.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    policy: PrecisionPolicy,
    weight: Parameter,
    bias: Option<Parameter>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters (`weight` is
    /// `(output_dim, input_dim)`).
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            policy: PrecisionPolicy::from_parameter_dtype(weight.dtype()),
            config,
            weight: Parameter::new(weight),
            bias: bias.map(Parameter::new),
        })
    }

    /// Builds a layer with weights sampled from `init` and a zero bias.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        placement: &Placement,
    ) -> Result<Self> {
        let weight = init.sample(
            (config.output_dim, config.input_dim),
            &placement.device,
            placement.dtype,
        )?;
        let bias = if config.bias {
            Some(Tensor::zeros(
                config.output_dim,
                placement.dtype,
                &placement.device,
            )?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Default-initialised layer.
    pub fn init(config: LinearConfig, placement: &Placement) -> Result<Self> {
        Self::with_init(config, &LinearInit::default(), placement)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn weight(&self) -> Result<Tensor> {
        self.weight.tensor()
    }

    pub fn bias(&self) -> Result<Option<Tensor>> {
        self.bias.as_ref().map(Parameter::tensor).transpose()
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, checks::PARAMETER_DTYPES)?;
        checks::expect_contiguous("linear.weight", weight)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, checks::PARAMETER_DTYPES)?;
                checks::expect_contiguous("linear.bias", tensor)
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    /// Applies `x @ weightᵀ + bias` over the last axis.
    pub fn project(&self, hidden: &Tensor) -> Result<Tensor> {
        let input = self.policy.cast_for_matmul(hidden)?;
        let weight_t = self.policy.cast_for_matmul(&self.weight.tensor()?)?.t()?;

        let mut output = match *input.dims() {
            [batch, seq, hidden_dim] if hidden_dim == self.config.input_dim => input
                .reshape((batch * seq, hidden_dim))?
                .matmul(&weight_t)?
                .reshape((batch, seq, self.config.output_dim))?,
            [_, hidden_dim] if hidden_dim == self.config.input_dim => input.matmul(&weight_t)?,
            _ => {
                return Err(Error::Msg(format!(
                    "linear.input: expected [B, T, {0}] or [T, {0}], got {1:?}",
                    self.config.input_dim,
                    input.dims()
                )))
            }
        };

        if let Some(bias) = &self.bias {
            let bias = self.policy.cast_for_matmul(&bias.tensor()?)?;
            output = output.broadcast_add(&bias)?;
        }

        self.policy.cast_to_storage(&output)
    }
}

impl Node for Linear {
    fn name(&self) -> &'static str {
        "Linear"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("in_features", self.config.input_dim.to_string()),
            ("out_features", self.config.output_dim.to_string()),
            ("bias", self.config.bias.to_string()),
        ]
    }

    fn own_parameters(&self) -> Vec<(&'static str, Parameter)> {
        let mut params = vec![("weight", self.weight.clone())];
        if let Some(bias) = &self.bias {
            params.push(("bias", bias.clone()));
        }
        params
    }

    fn input_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn output_arity(&self) -> Option<usize> {
        Some(1)
    }

    fn forward(&self, inputs: Values, _ctx: &mut ContextStore) -> graph::Result<Values> {
        let hidden = single_tensor(self.name(), inputs)?;
        Ok(vec![self.project(&hidden)?.into()])
    }
}
