//! Lightweight validation helpers shared across layer components.
//!
//! Every helper takes a `label` naming the tensor being checked (for example
//! `"linear.weight"`) so a failure deep inside a block still points at the
//! offending parameter. They return `candle_core::Result<()>` so call sites can
//! propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {:?}, got {:?}",
            expected,
            tensor.dims()
        )))
    }
}

pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected rank {rank}, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Validates the `(batch, channels, height, width)` convention.
pub fn expect_batch_channels_2d(label: &str, tensor: &Tensor, channels: usize) -> Result<()> {
    match tensor.dims() {
        [_, actual, _, _] if *actual == channels => Ok(()),
        dims => Err(Error::Msg(format!(
            "{label}: expected (batch, {channels}, height, width) layout, got {:?}",
            dims
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {:?}, got {:?}",
            allowed, dtype
        )))
    }
}

/// Floating point storage dtypes accepted for learned parameters.
pub const PARAMETER_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32];

pub fn expect_contiguous(label: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{label}: expected a contiguous tensor")))
    }
}

/// Guards parameter initialisation against casts candle cannot perform.
pub fn ensure_cast_supported(label: &str, from: DType, to: DType) -> Result<()> {
    let float = |dtype: DType| PARAMETER_DTYPES.contains(&dtype) || dtype == DType::F64;
    if float(from) && float(to) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: unsupported cast from {:?} to {:?}",
            from, to
        )))
    }
}
