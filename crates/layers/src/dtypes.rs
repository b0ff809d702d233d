//! Placement and precision policy shared by every layer.
//!
//! Parameters live on the [`Placement`] chosen at construction time, often in
//! `f16`/`bf16` for memory efficiency, while matmuls and reductions promote to
//! `f32`. [`PrecisionPolicy`] captures those three dtypes so layers cast
//! consistently before matmuls, before reductions, and on the way out.

use candle_core::{DType, Device, Result, Tensor};

/// Device and storage dtype for newly created parameters.
#[derive(Debug, Clone)]
pub struct Placement {
    pub device: Device,
    pub dtype: DType,
}

impl Placement {
    pub fn new(device: Device, dtype: DType) -> Self {
        Self { device, dtype }
    }

    pub fn cpu() -> Self {
        Self::new(Device::Cpu, DType::F32)
    }

    /// Precision policy for layers whose parameters use this placement.
    pub fn policy(&self) -> PrecisionPolicy {
        PrecisionPolicy::from_parameter_dtype(self.dtype)
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::cpu()
    }
}

/// Describes how tensors should be cast during different phases of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    pub fn new(storage: DType, compute: DType, reduction: DType) -> Self {
        Self {
            storage,
            compute,
            reduction,
        }
    }

    /// Builds a policy from the parameter storage dtype.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        let reduction = match storage {
            DType::F64 => DType::F64,
            _ => DType::F32,
        };
        Self::new(storage, compute, reduction)
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn reduction(&self) -> DType {
        self.reduction
    }

    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute || self.compute != self.reduction
    }

    /// Casts a tensor to the compute dtype for matmul readiness.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor to the reduction dtype for statistics.
    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.reduction)
    }

    /// Casts a tensor back to the storage dtype (or leaves it unchanged).
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_precision_placements_compute_in_f32() {
        let policy = Placement::new(Device::Cpu, DType::F16).policy();
        assert_eq!(policy.storage(), DType::F16);
        assert_eq!(policy.compute(), DType::F32);
        assert_eq!(policy.reduction(), DType::F32);
        assert!(policy.is_mixed_precision());
        assert!(!Placement::cpu().policy().is_mixed_precision());
    }

    #[test]
    fn storage_cast_round_trips_within_bf16_tolerance() -> Result<()> {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        let base = Tensor::from_vec(vec![0.125f32, -0.75, 3.5], (3,), &Device::Cpu)?;
        let storage = base.to_dtype(policy.storage())?;

        let compute = policy.cast_for_matmul(&storage)?;
        assert_eq!(compute.dtype(), DType::F32);

        let restored = policy
            .cast_to_storage(&compute)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;
        for (orig, rest) in base.to_vec1::<f32>()?.iter().zip(restored.iter()) {
            assert!((orig - rest).abs() <= 2e-2);
        }
        Ok(())
    }
}
