use std::error::Error;
use std::fmt;
use std::io;

use crate::encode::header::HeaderError;
use crate::entropy::EntropyError;
use crate::transform::TransformError;

/// Main error type for the wavelet/SPECK codec.
#[derive(Debug)]
pub enum CodecError {
    /// An I/O error occurred
    Io(io::Error),
    /// Parameters were rejected before any transform or coding work began
    Config(String),
    /// The lifting engine or decomposition driver refused its input
    Transform(TransformError),
    /// The arithmetic coder or bit buffer failed
    Entropy(EntropyError),
    /// A stream header was malformed
    Header(HeaderError),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Io(err) => write!(f, "I/O error: {}", err),
            CodecError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            CodecError::Transform(err) => write!(f, "Transform error: {}", err),
            CodecError::Entropy(err) => write!(f, "Entropy coder error: {}", err),
            CodecError::Header(err) => write!(f, "Header error: {}", err),
        }
    }
}

impl Error for CodecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CodecError::Io(err) => Some(err),
            CodecError::Transform(err) => Some(err),
            CodecError::Entropy(err) => Some(err),
            CodecError::Header(err) => Some(err),
            CodecError::Config(_) => None,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        CodecError::Io(err)
    }
}

impl From<TransformError> for CodecError {
    fn from(err: TransformError) -> Self {
        CodecError::Transform(err)
    }
}

impl From<EntropyError> for CodecError {
    fn from(err: EntropyError) -> Self {
        CodecError::Entropy(err)
    }
}

impl From<HeaderError> for CodecError {
    fn from(err: HeaderError) -> Self {
        CodecError::Header(err)
    }
}

impl CodecError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        CodecError::Config(msg.into())
    }
}

/// A specialized `Result` type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
