// src/transform/mod.rs

//! Lifting-scheme wavelet transforms and the multiresolution driver.

pub mod dwt;
pub mod lifting;
pub mod subband;
pub mod wavelet;

pub use lifting::{LiftingSample, analysis, synthesis};
pub use dwt::AxisAlignment;
pub use subband::{Alignment, Phase};
pub use wavelet::{Boundary, FilterFamily, Wavelet};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("signal length must be even for periodic extension (got {0})")]
    OddPeriodicLength(usize),
    #[error("integer CDF 9/7 lifting does not support boundary-wavelet extension")]
    IntegerBoundaryWavelet,
    #[error("buffer of {actual} samples does not match the {expected} the transform expects")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("{0} decomposition levels requested, at most 32 are supported")]
    TooManyLevels(u32),
    #[error("unknown filter family `{0}`")]
    UnknownFilter(String),
    #[error("unknown boundary extension `{0}`")]
    UnknownBoundary(String),
}
