//! Run-time knobs shared by attention kernels.

/// Dtype used for the score matrix and softmax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// Upcast q, k and v to `f32`; the result is cast back to the query dtype.
    #[default]
    ForceF32,
    /// Compute in the input dtype.
    Inherit,
}

/// Configuration driving kernel behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub precision: Precision,
    /// Upper bound on score-matrix elements materialised at once. The merged
    /// `batch * heads` axis is processed in chunks that stay under it (always at
    /// least one head per chunk).
    pub max_score_elements: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            precision: Precision::ForceF32,
            max_score_elements: 1 << 25,
        }
    }
}
