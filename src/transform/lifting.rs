// src/transform/lifting.rs

//! The 1D lifting engine.
//!
//! Every predict/update step of every family goes through one routine,
//! parameterized by the sample type (which decides how a lifting product is
//! rounded) and by the boundary policy (which decides how a missing neighbour is
//! replaced). After lifting, the interleaved signal is split so the lowpass
//! coefficients come first.

use std::f64::consts::SQRT_2;
use std::fmt::Debug;
use std::ops::{Add, Sub};

use log::trace;

use super::TransformError;
use super::subband::{Alignment, Phase, split};
use super::wavelet::{Band, Boundary, FilterFamily, LiftingStep, Wavelet};

/// A sample type the lifting engine can operate on.
pub trait LiftingSample:
    Copy + Default + Debug + PartialEq + Send + Sync + Add<Output = Self> + Sub<Output = Self>
{
    /// Integer samples are lifted reversibly and never normalized.
    const REVERSIBLE: bool;

    /// Small integer multiple, used by the boundary formulas.
    fn times(self, k: i64) -> Self;

    /// Amount one lifting step adds to its target given the neighbour sum.
    fn lift_delta(step: &LiftingStep, neighbours: Self) -> Self;

    fn scale(self, factor: f64) -> Self;

    fn unscale(self, factor: f64) -> Self;
}

impl LiftingSample for f64 {
    const REVERSIBLE: bool = false;

    #[inline]
    fn times(self, k: i64) -> Self {
        self * k as f64
    }

    #[inline]
    fn lift_delta(step: &LiftingStep, neighbours: Self) -> Self {
        step.coefficient * neighbours
    }

    #[inline]
    fn scale(self, factor: f64) -> Self {
        self * factor
    }

    #[inline]
    fn unscale(self, factor: f64) -> Self {
        self / factor
    }
}

/// `value / 2^shift` rounded to nearest, ties away from zero.
#[inline]
pub fn round_shift(value: i64, shift: u32) -> i64 {
    if shift == 0 {
        return value;
    }
    let half = 1i64 << (shift - 1);
    if value >= 0 {
        (value + half) >> shift
    } else {
        -((-value + half) >> shift)
    }
}

macro_rules! impl_integer_sample {
    ($($t:ty),*) => {$(
        impl LiftingSample for $t {
            const REVERSIBLE: bool = true;

            #[inline]
            fn times(self, k: i64) -> Self {
                (self as i64 * k) as $t
            }

            #[inline]
            fn lift_delta(step: &LiftingStep, neighbours: Self) -> Self {
                round_shift(step.numerator * neighbours as i64, step.shift) as $t
            }

            #[inline]
            fn scale(self, _factor: f64) -> Self {
                self
            }

            #[inline]
            fn unscale(self, _factor: f64) -> Self {
                self
            }
        }
    )*};
}

impl_integer_sample!(i32, i64);

fn check_arguments<T: LiftingSample>(len: usize, wavelet: &Wavelet) -> Result<Boundary, TransformError> {
    if T::REVERSIBLE
        && wavelet.family() == FilterFamily::Cdf97
        && wavelet.boundary() == Boundary::BoundaryWavelet
    {
        return Err(TransformError::IntegerBoundaryWavelet);
    }
    match wavelet.boundary() {
        Boundary::Periodic if len > 1 && len % 2 == 1 => Err(TransformError::OddPeriodicLength(len)),
        Boundary::BoundaryWavelet if len < 4 => Ok(Boundary::Symmetric),
        b => Ok(b),
    }
}

/// Sum of the two neighbours of `i`, extended at the signal ends.
#[inline]
fn neighbour_sum<T: LiftingSample>(x: &[T], i: usize, boundary: Boundary) -> T {
    let n = x.len();
    let has_left = i > 0;
    let has_right = i + 1 < n;
    match (has_left, has_right) {
        (true, true) => x[i - 1] + x[i + 1],
        (false, true) => match boundary {
            Boundary::Symmetric => x[i + 1].times(2),
            Boundary::Periodic => x[n - 1] + x[i + 1],
            Boundary::BoundaryWavelet => x[i + 1].times(3) - x[i + 3],
        },
        (true, false) => match boundary {
            Boundary::Symmetric => x[i - 1].times(2),
            Boundary::Periodic => x[i - 1] + x[0],
            Boundary::BoundaryWavelet => x[i - 1].times(3) - x[i - 3],
        },
        // single sample signals never reach the lifting loop
        (false, false) => T::default(),
    }
}

#[inline]
fn first_index(band: Band, phase: Phase) -> usize {
    match (band, phase) {
        (Band::Low, Phase::Even) | (Band::High, Phase::Odd) => 0,
        (Band::High, Phase::Even) | (Band::Low, Phase::Odd) => 1,
    }
}

fn lift<T: LiftingSample>(x: &mut [T], step: &LiftingStep, phase: Phase, boundary: Boundary, forward: bool) {
    let mut i = first_index(step.target, phase);
    while i < x.len() {
        let delta = T::lift_delta(step, neighbour_sum(x, i, boundary));
        x[i] = if forward { x[i] + delta } else { x[i] - delta };
        i += 2;
    }
}

fn normalize<T: LiftingSample>(x: &mut [T], family: FilterFamily, phase: Phase, forward: bool) {
    let k = family.scale();
    let low = first_index(Band::Low, phase);
    for (i, v) in x.iter_mut().enumerate() {
        let is_low = i % 2 == low;
        *v = match (is_low, forward) {
            (true, true) => v.scale(k),
            (true, false) => v.unscale(k),
            (false, true) => v.unscale(-k),
            (false, false) => v.scale(-k),
        };
    }
}

/// Single-sample signals only get the lowpass/highpass normalization.
fn single_sample<T: LiftingSample>(x: &mut [T], phase: Phase, forward: bool) {
    if T::REVERSIBLE {
        return;
    }
    let up = matches!((phase, forward), (Phase::Even, true) | (Phase::Odd, false));
    x[0] = if up { x[0].scale(SQRT_2) } else { x[0].unscale(SQRT_2) };
}

/// Moves lowpass samples to the front, highpass to the back.
fn deinterleave<T: LiftingSample>(x: &mut [T], phase: Phase, scratch: &mut Vec<T>) {
    let low_start = first_index(Band::Low, phase);
    let high_start = first_index(Band::High, phase);

    scratch.clear();
    scratch.extend(x.iter().skip(low_start).step_by(2).copied());
    debug_assert_eq!(scratch.len(), split(x.len(), phase).0);
    scratch.extend(x.iter().skip(high_start).step_by(2).copied());
    x.copy_from_slice(scratch);
}

fn interleave<T: LiftingSample>(x: &mut [T], phase: Phase, scratch: &mut Vec<T>) {
    let (low_len, _) = split(x.len(), phase);
    let low_start = first_index(Band::Low, phase);
    let high_start = first_index(Band::High, phase);

    scratch.clear();
    scratch.extend_from_slice(x);
    for (k, &v) in scratch[..low_len].iter().enumerate() {
        x[low_start + 2 * k] = v;
    }
    for (k, &v) in scratch[low_len..].iter().enumerate() {
        x[high_start + 2 * k] = v;
    }
}

/// One analysis level with an explicit phase. `scratch` is reused across calls.
pub fn analysis_with_phase<T: LiftingSample>(
    signal: &mut [T],
    phase: Phase,
    wavelet: &Wavelet,
    scratch: &mut Vec<T>,
) -> Result<(), TransformError> {
    let boundary = check_arguments::<T>(signal.len(), wavelet)?;
    match signal.len() {
        0 => return Ok(()),
        1 => {
            single_sample(signal, phase, true);
            return Ok(());
        }
        _ => {}
    }

    trace!("analysis: {} samples, {:?} phase, {}", signal.len(), phase, wavelet);
    for step in wavelet.family().steps() {
        lift(signal, step, phase, boundary, true);
    }
    if !T::REVERSIBLE {
        normalize(signal, wavelet.family(), phase, true);
    }
    deinterleave(signal, phase, scratch);
    Ok(())
}

/// Exact inverse of [`analysis_with_phase`] for the same arguments.
pub fn synthesis_with_phase<T: LiftingSample>(
    signal: &mut [T],
    phase: Phase,
    wavelet: &Wavelet,
    scratch: &mut Vec<T>,
) -> Result<(), TransformError> {
    let boundary = check_arguments::<T>(signal.len(), wavelet)?;
    match signal.len() {
        0 => return Ok(()),
        1 => {
            single_sample(signal, phase, false);
            return Ok(());
        }
        _ => {}
    }

    interleave(signal, phase, scratch);
    if !T::REVERSIBLE {
        normalize(signal, wavelet.family(), phase, false);
    }
    for step in wavelet.family().steps().iter().rev() {
        lift(signal, step, phase, boundary, false);
    }
    Ok(())
}

/// Single-level analysis of a signal placed at `alignment`.
pub fn analysis<T: LiftingSample>(
    signal: &mut [T],
    alignment: Alignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    let mut scratch = Vec::with_capacity(signal.len());
    analysis_with_phase(signal, alignment.phase(1), wavelet, &mut scratch)
}

/// Single-level synthesis, inverse of [`analysis`].
pub fn synthesis<T: LiftingSample>(
    signal: &mut [T],
    alignment: Alignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    let mut scratch = Vec::with_capacity(signal.len());
    synthesis_with_phase(signal, alignment.phase(1), wavelet, &mut scratch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARIES: [Boundary; 3] = [Boundary::Symmetric, Boundary::Periodic, Boundary::BoundaryWavelet];
    const LENGTHS: [usize; 10] = [0, 1, 2, 3, 4, 5, 8, 9, 16, 31];

    fn sample_signal(len: usize) -> Vec<i64> {
        (0..len as i64).map(|i| (i * 37 + 11) % 23 - 9 + i * i / 3).collect()
    }

    #[test]
    fn test_round_shift_ties_away_from_zero() {
        assert_eq!(round_shift(3, 1), 2);
        assert_eq!(round_shift(-3, 1), -2);
        assert_eq!(round_shift(1, 2), 0);
        assert_eq!(round_shift(2, 2), 1);
        assert_eq!(round_shift(-2, 2), -1);
        assert_eq!(round_shift(-5, 0), -5);
    }

    #[test]
    fn test_scenario_a_integer_53() {
        let original: Vec<i64> = (1..=8).collect();
        let mut x = original.clone();
        let w = Wavelet::cdf53();
        analysis(&mut x, Alignment::default(), &w).unwrap();
        assert_ne!(x, original);
        synthesis(&mut x, Alignment::default(), &w).unwrap();
        assert_eq!(x, original);
    }

    #[test]
    fn test_integer_53_linear_ramp_has_flat_highpass() {
        let mut x: Vec<i64> = (1..=8).collect();
        analysis(&mut x, Alignment::default(), &Wavelet::cdf53()).unwrap();
        // interior highpass of a ramp is zero; only the mirrored end sees a step
        assert_eq!(&x[4..7], &[0, 0, 0]);
    }

    #[test]
    fn test_integer_round_trip_all_combinations() {
        for family in [FilterFamily::Cdf53, FilterFamily::Cdf97] {
            for boundary in BOUNDARIES {
                if family == FilterFamily::Cdf97 && boundary == Boundary::BoundaryWavelet {
                    continue;
                }
                let w = Wavelet::new(family, boundary);
                for len in LENGTHS {
                    if boundary == Boundary::Periodic && len > 1 && len % 2 == 1 {
                        continue;
                    }
                    for phase in [Phase::Even, Phase::Odd] {
                        let original = sample_signal(len);
                        let mut x = original.clone();
                        let mut scratch = Vec::new();
                        analysis_with_phase(&mut x, phase, &w, &mut scratch).unwrap();
                        synthesis_with_phase(&mut x, phase, &w, &mut scratch).unwrap();
                        assert_eq!(x, original, "{} len={} {:?}", w, len, phase);
                    }
                }
            }
        }
    }

    #[test]
    fn test_float_round_trip_all_combinations() {
        for family in [FilterFamily::Cdf53, FilterFamily::Cdf97] {
            for boundary in BOUNDARIES {
                let w = Wavelet::new(family, boundary);
                for len in LENGTHS {
                    if boundary == Boundary::Periodic && len > 1 && len % 2 == 1 {
                        continue;
                    }
                    for phase in [Phase::Even, Phase::Odd] {
                        let original: Vec<f64> = sample_signal(len).iter().map(|&v| v as f64 * 0.75).collect();
                        let mut x = original.clone();
                        let mut scratch = Vec::new();
                        analysis_with_phase(&mut x, phase, &w, &mut scratch).unwrap();
                        synthesis_with_phase(&mut x, phase, &w, &mut scratch).unwrap();
                        for (a, b) in x.iter().zip(&original) {
                            assert!((a - b).abs() < 1e-9, "{} len={} {:?}", w, len, phase);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_i32_samples() {
        let original: Vec<i32> = vec![5, -3, 12, 7, 0, 9, -8];
        let mut x = original.clone();
        let w = Wavelet::new(FilterFamily::Cdf97, Boundary::Symmetric);
        analysis(&mut x, Alignment::new(3, 0), &w).unwrap();
        synthesis(&mut x, Alignment::new(3, 0), &w).unwrap();
        assert_eq!(x, original);
    }

    #[test]
    fn test_degenerate_lengths() {
        let w = Wavelet::cdf97();
        let mut empty: Vec<f64> = Vec::new();
        analysis(&mut empty, Alignment::default(), &w).unwrap();
        assert!(empty.is_empty());

        let mut one = vec![2.0f64];
        analysis(&mut one, Alignment::default(), &w).unwrap();
        assert!((one[0] - 2.0 * SQRT_2).abs() < 1e-12);
        let mut one_odd = vec![2.0f64];
        analysis(&mut one_odd, Alignment::new(1, 0), &w).unwrap();
        assert!((one_odd[0] - 2.0 / SQRT_2).abs() < 1e-12);

        let mut one_int = vec![7i64];
        analysis(&mut one_int, Alignment::default(), &w).unwrap();
        assert_eq!(one_int, vec![7]);
    }

    #[test]
    fn test_constant_signal_has_zero_highpass() {
        let mut x = vec![3.0f64; 10];
        analysis(&mut x, Alignment::default(), &Wavelet::cdf97()).unwrap();
        for v in &x[5..] {
            assert!(v.abs() < 1e-9);
        }
    }

    #[test]
    fn test_rejected_arguments() {
        let mut odd = vec![1.0f64; 5];
        let periodic = Wavelet::cdf97().with_boundary(Boundary::Periodic);
        assert_eq!(
            analysis(&mut odd, Alignment::default(), &periodic),
            Err(TransformError::OddPeriodicLength(5))
        );

        let mut ints = vec![1i64; 8];
        let bw = Wavelet::cdf97().with_boundary(Boundary::BoundaryWavelet);
        assert_eq!(
            analysis(&mut ints, Alignment::default(), &bw),
            Err(TransformError::IntegerBoundaryWavelet)
        );
    }
}
