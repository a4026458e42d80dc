// src/pyramid/mod.rs

//! Subband geometry and the spatial-orientation trees built on it.

pub mod subband_pyramid;
pub mod zerotree;

pub use subband_pyramid::SubbandPyramid;
pub use zerotree::{Symbol, VolumeTree, Zerotree};
