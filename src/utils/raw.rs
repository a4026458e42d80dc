// src/utils/raw.rs

//! Raw little-endian float blobs, the input format of the volume tools.

use crate::utils::buffer::{Dims, SampleArray};
use crate::utils::error::{CodecError, Result};

/// Storage precision of a raw sample file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
}

impl Precision {
    pub fn bytes(self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

/// Decodes a raw blob into an `f64` sample array of the given shape.
pub fn samples_from_bytes(bytes: &[u8], precision: Precision, dims: Dims) -> Result<SampleArray<f64>> {
    dims.validate()?;
    let width = precision.bytes();
    if bytes.len() != dims.len() * width {
        return Err(CodecError::config(format!(
            "raw input has {} bytes, expected {} for {} samples of {} bytes",
            bytes.len(),
            dims.len() * width,
            dims.len(),
            width
        )));
    }

    let data: Vec<f64> = match precision {
        Precision::Single => bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_bits(u32::from_le(bytemuck::pod_read_unaligned(chunk))) as f64)
            .collect(),
        Precision::Double => bytes
            .chunks_exact(8)
            .map(|chunk| f64::from_bits(u64::from_le(bytemuck::pod_read_unaligned(chunk))))
            .collect(),
    };
    SampleArray::from_vec(dims, data)
}

/// Serializes samples back into a raw little-endian blob.
pub fn samples_to_bytes(samples: &SampleArray<f64>, precision: Precision) -> Vec<u8> {
    match precision {
        Precision::Single => {
            let words: Vec<u32> = samples
                .as_slice()
                .iter()
                .map(|&v| (v as f32).to_bits().to_le())
                .collect();
            bytemuck::cast_slice(&words).to_vec()
        }
        Precision::Double => {
            let words: Vec<u64> = samples.as_slice().iter().map(|&v| v.to_bits().to_le()).collect();
            bytemuck::cast_slice(&words).to_vec()
        }
    }
}
