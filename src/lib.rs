//! # SPECK Wavelet Codec
//!
//! Embedded, bit-plane ordered compression of 2D images and 3D volumes of
//! floating-point samples.
//!
//! This library is organized into several modules:
//! - `utils`: Error handling, sample buffers and raw sample I/O
//! - `transform`: CDF 9/7 and 5/3 lifting, dyadic and packet decompositions
//! - `pyramid`: Subband bookkeeping and zerotree statistics
//! - `entropy`: Bit buffers and the adaptive binary arithmetic coder
//! - `encode`: Stream header, 1D/2D/3D SPECK coders, outlier corrections,
//!   chunked volumes and the encoder/decoder front end

// Re-export commonly used types at the crate root
pub use utils::error::{CodecError, Result};

// Core modules
pub mod utils {
    pub mod buffer;
    pub mod error;
    pub mod raw;
}

pub mod entropy;
pub mod pyramid;
pub mod transform;

pub mod encode;

// Public API exports
pub use encode::{
    ChunkedDecoder, ChunkedEncoder, DecodeParams, Decoded, Decomposition3d, Encoded, EncoderParams, Header, Quality,
    Realization, SpeckDecoder, SpeckEncoder, StreamKind, Volume3dParams,
};
pub use transform::{Boundary, FilterFamily, Wavelet};
pub use utils::buffer::{Dims, SampleArray};
pub use utils::raw::Precision;

// Constants
pub const SPECK_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SPECK_MAGIC: [u8; 4] = encode::header::MAGIC;

/// Encodes `samples` with `params`, choosing the 2D coder for single frames.
pub fn compress(samples: &SampleArray<f64>, params: EncoderParams) -> Result<Encoded> {
    let encoder = SpeckEncoder::new(params)?;
    if samples.dims().frames == 1 {
        encoder.encode_image(samples)
    } else {
        encoder.encode_volume(samples, &Volume3dParams::default())
    }
}

/// Decodes a complete stream.
pub fn decompress(data: &[u8]) -> Result<SampleArray<f64>> {
    Ok(SpeckDecoder::default().decode(data)?.samples)
}
