// src/entropy/mod.rs

//! Bit-level I/O and the context-adaptive arithmetic coder.

pub mod arithmetic;
pub mod bit_buffer;

pub use arithmetic::{Adaptation, ArithmeticDecoder, ArithmeticEncoder};
pub use bit_buffer::{BitReader, BitWriter};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntropyError {
    #[error("bit budget of {0} bits reached")]
    BudgetReached(u64),
    #[error("input stream exhausted")]
    Exhausted,
    #[error("end-of-data symbol decoded")]
    EndOfData,
    #[error("context {context} out of range ({available} contexts)")]
    BadContext { context: usize, available: usize },
    #[error("symbol {symbol} out of range for context {context}")]
    BadSymbol { symbol: usize, context: usize },
    #[error("probabilities can only be set on a non-adaptive model")]
    AdaptiveModel,
    #[error("invalid probability {0}")]
    InvalidProbability(f64),
    #[error("probabilities sum to {0}, more than 1")]
    ProbabilitySum(f64),
}

impl EntropyError {
    /// Conditions that end a coding pass normally rather than failing it.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(
            self,
            EntropyError::BudgetReached(_) | EntropyError::Exhausted | EntropyError::EndOfData
        )
    }
}
