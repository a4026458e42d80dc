// src/encode/mod.rs

pub mod bitplane;
pub mod chunked;
pub mod encoder;
pub mod header;
pub mod outlier;
pub mod speck;
pub mod speck1d;
pub mod speck3d;

// Re-export the codec front end
pub use encoder::{
    DecodeParams, Decoded, Decomposition3d, Encoded, EncoderParams, Quality, SpeckDecoder, SpeckEncoder,
    Volume3dParams,
};
pub use chunked::{chunk_volume, Chunk, ChunkedDecoded, ChunkedDecoder, ChunkedEncoded, ChunkedEncoder};
pub use header::{Header, HeaderError, Realization, StreamKind};
pub use outlier::{find_outliers, Outlier, OutlierCoder};
pub use speck1d::Speck1d;

// Re-export error types for convenience
pub use crate::utils::error::{CodecError, Result};
