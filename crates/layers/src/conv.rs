//! 2D convolution over `(batch, channels, height, width)` feature maps.

use candle_core::{Result, Tensor};
use graph::{value::single_tensor, ContextStore, GraphError, Node, Parameter, Values};

use crate::{
    checks,
    dtypes::{Placement, PrecisionPolicy},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv2dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub bias: bool,
}

impl Conv2dConfig {
    /// Pointwise (`1×1`) convolution with bias.
    pub fn pointwise(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_size: 1,
            stride: 1,
            padding: 0,
            bias: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Conv2d {
    config: Conv2dConfig,
    policy: PrecisionPolicy,
    weight: Parameter,
    bias: Option<Parameter>,
}

impl Conv2d {
    /// Uniform `±1/sqrt(fan_in)` initialisation for weight and bias.
    pub fn init(config: Conv2dConfig, placement: &Placement) -> graph::Result<Self> {
        if config.in_channels == 0 || config.out_channels == 0 || config.kernel_size == 0 {
            return Err(GraphError::Config(format!(
                "conv2d needs non-zero channels and kernel size, got {:?}",
                config
            )));
        }
        let fan_in = config.in_channels * config.kernel_size * config.kernel_size;
        let bound = 1.0 / (fan_in as f32).sqrt();
        let k = config.kernel_size;
        let weight = Tensor::rand(
            -bound,
            bound,
            (config.out_channels, config.in_channels, k, k),
            &placement.device,
        )?
        .to_dtype(placement.dtype)?;
        let bias = if config.bias {
            let bias = Tensor::rand(-bound, bound, config.out_channels, &placement.device)?
                .to_dtype(placement.dtype)?;
            Some(Parameter::new(bias))
        } else {
            None
        };
        Ok(Self {
            config,
            policy: placement.policy(),
            weight: Parameter::new(weight),
            bias,
        })
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.config
    }

    pub fn convolve(&self, x: &Tensor) -> Result<Tensor> {
        checks::expect_batch_channels_2d("conv2d.input", x, self.config.in_channels)?;
        let input = self.policy.cast_for_matmul(x)?;
        let weight = self.policy.cast_for_matmul(&self.weight.tensor()?)?;
        let mut output = input.conv2d(&weight, self.config.padding, self.config.stride, 1, 1)?;
        if let Some(bias) = &self.bias {
            let bias = self
                .policy
                .cast_for_matmul(&bias.tensor()?)?
                .reshape((1, self.config.out_channels, 1, 1))?;
            output = output.broadcast_add(&bias)?;
        }
        self.policy.cast_to_storage(&output)
    }
}

impl Node for Conv2d {
    fn name(&self) -> &'static str {
        "Conv2d"
    }

    fn structural_attrs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("in_channels", self.config.in_channels.to_string()),
            ("out_channels", self.config.out_channels.to_string()),
            ("kernel_size", self.config.kernel_size.to_string()),
            ("stride", self.config.stride.to_string()),
            ("padding", self.config.padding.to_string()),
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
        let x = single_tensor(self.name(), inputs)?;
        Ok(vec![self.convolve(&x)?.into()])
    }
}
