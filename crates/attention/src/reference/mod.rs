//! Portable, exact attention kernels.
//!
//! These paths favour clarity over absolute performance and serve as the
//! baseline the attention blocks run on.

pub mod exact;

pub use exact::ExactAttention;
