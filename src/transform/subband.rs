// src/transform/subband.rs

//! Per-level phase and length bookkeeping.
//!
//! Both are pure functions of the original length, the level, the band and the
//! signal alignment. Analysis and synthesis must agree on them exactly; nothing
//! in the stream checks them.

/// Parity of the first sample of a signal at some decomposition level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Lowpass samples sit on even indices.
    Even,
    /// Lowpass samples sit on odd indices.
    Odd,
}

impl Phase {
    pub fn is_odd(self) -> bool {
        self == Phase::Odd
    }
}

/// Position of a signal inside a larger one, plus a per-level subsample flip.
///
/// Bit `k - 1` of `subsample_pattern` inverts the phase at level `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Alignment {
    pub origin: i64,
    pub subsample_pattern: u32,
}

impl Alignment {
    pub const fn new(origin: i64, subsample_pattern: u32) -> Self {
        Self {
            origin,
            subsample_pattern,
        }
    }

    /// Phase of the signal at decomposition level `level` (1-based).
    pub fn phase(&self, level: u32) -> Phase {
        phase_at(self.origin, self.subsample_pattern, level)
    }

    pub fn subband_length(&self, length: usize, level: u32, highband: bool) -> usize {
        subband_length(length, level, highband, *self)
    }
}

/// Phase at level `level >= 1`; level 0 is always even.
pub fn phase_at(origin: i64, subsample_pattern: u32, level: u32) -> Phase {
    if level == 0 {
        return Phase::Even;
    }
    // Levels past 62 have the same phase as 62 for any i64 origin.
    let k = level.min(62);
    let modulus = 1i64 << k;
    let residue = origin.rem_euclid(modulus);
    let origin_bit = (-residue) & (1i64 << (k - 1)) != 0;
    let pattern_bit = level <= 32 && (subsample_pattern >> (level - 1)) & 1 == 1;
    if origin_bit ^ pattern_bit {
        Phase::Odd
    } else {
        Phase::Even
    }
}

/// Splits `length` once: returns `(low, high)` for the given phase.
#[inline]
pub fn split(length: usize, phase: Phase) -> (usize, usize) {
    if length % 2 == 0 {
        (length / 2, length / 2)
    } else if phase.is_odd() {
        (length >> 1, (length >> 1) + 1)
    } else {
        ((length >> 1) + 1, length >> 1)
    }
}

/// Length of the lowpass (or highpass) subband at `level`.
pub fn subband_length(length: usize, level: u32, highband: bool, alignment: Alignment) -> usize {
    if level == 0 {
        return if highband { 0 } else { length };
    }

    let mut len = length;
    for scale in 1..level {
        len = split(len, alignment.phase(scale)).0;
    }

    let (low, high) = split(len, alignment.phase(level));
    if highband { high } else { low }
}
