// src/encode/bitplane.rs

//! Threshold loop shared by the 2D and 3D set-partitioning coders.
//!
//! Both coders run the same sorting/refinement schedule over decreasing
//! powers of two; they only differ in how sets are partitioned. [`CoderIo`]
//! lets one pass implementation serve both directions: when encoding the
//! supplied bit is written, when decoding it is ignored and the decoded bit
//! is returned instead.

use log::debug;

use crate::entropy::{ArithmeticDecoder, ArithmeticEncoder, BitReader, BitWriter, EntropyError};

/// Contexts of the significance coders. All of them are binary.
pub mod context {
    pub const SIGNIFICANCE: usize = 0;
    pub const S0: usize = 1;
    pub const S1: usize = 4;
    pub const S2: usize = 7;
    pub const S3: usize = 10;
    pub const SIGN: usize = 11;
    pub const REFINEMENT: usize = 12;
    pub const I: usize = 13;
    pub const COUNT: usize = 14;

    /// Alphabet sizes handed to the arithmetic coder.
    pub const NUM_SYMBOLS: [usize; COUNT] = [2; COUNT];
}

/// Most bit-planes a stream may carry.
pub const MAX_BITPLANES: i32 = 128;

pub enum CoderIo<'a> {
    Encode { coder: ArithmeticEncoder, out: BitWriter },
    Decode { coder: ArithmeticDecoder, input: BitReader<'a> },
}

impl<'a> CoderIo<'a> {
    pub fn encoder(out: BitWriter, target_bits: Option<u64>) -> Self {
        CoderIo::Encode {
            coder: ArithmeticEncoder::new(&context::NUM_SYMBOLS, target_bits),
            out,
        }
    }

    pub fn decoder(mut input: BitReader<'a>, max_bits: Option<u64>) -> Result<Self, EntropyError> {
        let coder = ArithmeticDecoder::start(&mut input, &context::NUM_SYMBOLS, max_bits)?;
        Ok(CoderIo::Decode { coder, input })
    }

    #[inline]
    pub fn is_encoder(&self) -> bool {
        matches!(self, CoderIo::Encode { .. })
    }

    /// Writes `bit` when encoding; reads and returns the next bit when decoding.
    #[inline]
    pub fn code(&mut self, context: usize, bit: bool) -> Result<bool, EntropyError> {
        match self {
            CoderIo::Encode { coder, out } => {
                coder.encode_bit(out, context, bit)?;
                Ok(bit)
            }
            CoderIo::Decode { coder, input } => coder.decode_bit(input, context),
        }
    }

    /// Like [`code`](Self::code), but `bit` is only evaluated on the encoder side.
    #[inline]
    pub fn code_with(&mut self, context: usize, bit: impl FnOnce() -> bool) -> Result<bool, EntropyError> {
        let bit = self.is_encoder() && bit();
        self.code(context, bit)
    }

    /// Bits written or consumed so far, header included.
    pub fn bits(&self) -> u64 {
        match self {
            CoderIo::Encode { out, .. } => out.bit_count(),
            CoderIo::Decode { input, .. } => input.bit_count(),
        }
    }

    /// Flushes the encoder; a no-op when decoding.
    pub fn finish(&mut self) -> Result<(), EntropyError> {
        match self {
            CoderIo::Encode { coder, out } => coder.flush(out),
            CoderIo::Decode { .. } => Ok(()),
        }
    }

    /// The padded output. `None` on the decoder side.
    pub fn into_output(self) -> Option<BitWriter> {
        match self {
            CoderIo::Encode { out, .. } => Some(out),
            CoderIo::Decode { .. } => None,
        }
    }
}

/// One significance coder driven by [`run_bitplanes`].
pub trait BitplaneCoder {
    fn sorting_pass(&mut self, io: &mut CoderIo<'_>, threshold: f64) -> Result<(), EntropyError>;

    fn refinement_pass(&mut self, io: &mut CoderIo<'_>, threshold: f64) -> Result<(), EntropyError>;

    /// Size of the significant-pixel list.
    fn significant_count(&self) -> usize;

    /// Extra per-plane detail for the debug log.
    fn describe_plane(&self, _threshold: f64) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Bit-planes whose sorting and refinement passes both completed.
    pub planes: Vec<i32>,
    /// The stream ended (budget or input) before the last requested plane.
    pub truncated: bool,
}

impl PassOutcome {
    /// Whether every plane down to `lowest` was coded.
    pub fn reached(&self, lowest: i32) -> bool {
        !self.truncated && self.planes.last() == Some(&lowest)
    }
}

/// Lowest plane a stream codes, given its top plane and the configured floor.
pub fn lowest_bitplane(top: i32, floor: Option<i32>, integer: bool) -> i32 {
    let mut lowest = top.saturating_sub(MAX_BITPLANES - 1);
    if let Some(floor) = floor {
        lowest = lowest.max(floor);
    }
    if integer {
        lowest = lowest.max(0);
    }
    lowest
}

/// Runs planes `top, top-1, ..., lowest`. End-of-stream conditions stop the
/// loop without failing; the encoder is flushed only when every plane fit.
pub fn run_bitplanes<C: BitplaneCoder>(
    coder: &mut C,
    io: &mut CoderIo<'_>,
    top: i32,
    lowest: i32,
) -> Result<PassOutcome, EntropyError> {
    let mut outcome = PassOutcome::default();

    let mut plane = top;
    while plane >= lowest {
        let threshold = 2f64.powi(plane);
        if let Some(detail) = coder.describe_plane(threshold) {
            debug!("bit-plane {}: {}", plane, detail);
        }

        let step = coder
            .sorting_pass(io, threshold)
            .and_then(|_| coder.refinement_pass(io, threshold));
        match step {
            Ok(()) => outcome.planes.push(plane),
            Err(e) if e.is_end_of_stream() => {
                debug!("bit-plane {} cut short at {} bits: {}", plane, io.bits(), e);
                outcome.truncated = true;
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        }

        debug!(
            "bit-plane {} (threshold {}): {} bits, {} significant",
            plane,
            threshold,
            io.bits(),
            coder.significant_count()
        );
        plane -= 1;
    }

    match io.finish() {
        Ok(()) => {}
        Err(e) if e.is_end_of_stream() => outcome.truncated = true,
        Err(e) => return Err(e),
    }
    Ok(outcome)
}
