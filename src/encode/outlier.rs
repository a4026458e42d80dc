// src/encode/outlier.rs

//! Point-wise error corrections appended to tolerance-bounded streams.
//!
//! After the wavelet stream is decoded, some samples can still sit more than
//! the tolerance `t` away from the input. Each such error `e` is quantized to
//! `q = round(e / t)`, which is never zero, and the array of `q` (zero for
//! every other position) is coded with [`Speck1d`] down to bit-plane 0. Adding
//! `q * t` back leaves at most `t / 2` of error.
//!
//! Section layout: `f64` tolerance, `i32` top bit-plane (`i32::MIN` when there
//! is nothing to correct), then the flushed arithmetic-coded planes.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use super::bitplane::{run_bitplanes, CoderIo, MAX_BITPLANES};
use super::header::HeaderError;
use super::speck1d::Speck1d;
use crate::entropy::{BitReader, BitWriter, EntropyError};
use crate::utils::error::{CodecError, Result};

const NO_OUTLIERS: i32 = i32::MIN;

/// A sample whose reconstruction misses the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outlier {
    pub index: usize,
    /// `original - reconstructed`.
    pub error: f64,
}

/// Positions where `|original - reconstructed| > tolerance`.
pub fn find_outliers(original: &[f64], reconstructed: &[f64], tolerance: f64) -> Vec<Outlier> {
    original
        .iter()
        .zip(reconstructed)
        .enumerate()
        .filter_map(|(index, (&x, &y))| {
            let error = x - y;
            (error.abs() > tolerance).then_some(Outlier { index, error })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierCoder {
    tolerance: f64,
}

impl OutlierCoder {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Codes the corrections for `outliers` among `len` samples.
    pub fn encode(&self, len: usize, outliers: &[Outlier]) -> Result<Vec<u8>> {
        let mut steps = vec![0.0; len];
        for outlier in outliers {
            steps[outlier.index] = (outlier.error / self.tolerance).round();
        }
        let max = steps.iter().fold(0.0f64, |m, q| m.max(q.abs()));

        let mut out = BitWriter::new();
        out.write_f64::<BigEndian>(self.tolerance)?;
        if max == 0.0 {
            out.write_i32::<BigEndian>(NO_OUTLIERS)?;
            return Ok(out.into_bytes());
        }
        let top = max.log2().floor() as i32;
        if top >= MAX_BITPLANES {
            return Err(CodecError::config(format!(
                "errors up to {} tolerances are too large to correct",
                max
            )));
        }
        out.write_i32::<BigEndian>(top)?;

        let mut io = CoderIo::encoder(out, None);
        let mut coder = Speck1d::for_encoding(&steps);
        run_bitplanes(&mut coder, &mut io, top, 0)?;
        let out = io.into_output().unwrap_or_default();
        debug!(
            "{} outliers above {} coded in {} bits",
            outliers.len(),
            self.tolerance,
            out.bit_count()
        );
        Ok(out.into_bytes())
    }

    /// Reads a section written by [`encode`](Self::encode) and returns
    /// `(index, correction)` pairs to add to the reconstruction.
    pub fn decode(section: &[u8], len: usize) -> Result<(Self, Vec<(usize, f64)>)> {
        let mut input = BitReader::new(section);
        let tolerance = input.read_f64::<BigEndian>()?;
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(HeaderError::InvalidField {
                field: "outlier_tolerance",
                value: tolerance.to_bits() as i64,
            }
            .into());
        }
        let coder = Self::new(tolerance);
        let top = input.read_i32::<BigEndian>()?;
        if top == NO_OUTLIERS {
            return Ok((coder, Vec::new()));
        }
        if !(0..MAX_BITPLANES).contains(&top) {
            return Err(HeaderError::InvalidField {
                field: "outlier_bitplane",
                value: top as i64,
            }
            .into());
        }

        let mut io = CoderIo::decoder(input, None)?;
        let mut speck = Speck1d::for_decoding(len);
        let outcome = run_bitplanes(&mut speck, &mut io, top, 0)?;
        if !outcome.reached(0) {
            return Err(CodecError::Entropy(EntropyError::Exhausted));
        }

        let corrections = speck
            .into_coefficients()
            .into_iter()
            .enumerate()
            .filter_map(|(index, q)| {
                // a fully decoded magnitude sits half a step above the integer
                let q = q.trunc();
                (q != 0.0).then_some((index, q * tolerance))
            })
            .collect();
        Ok((coder, corrections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_outliers() {
        let original = [1.0, 2.0, 3.0, 4.0];
        let reconstructed = [1.2, 2.6, 3.0, 3.1];
        let outliers = find_outliers(&original, &reconstructed, 0.5);
        assert_eq!(outliers.len(), 2);
        assert_eq!(outliers[0].index, 1);
        assert!((outliers[0].error + 0.6).abs() < 1e-12);
        assert_eq!(outliers[1].index, 3);
    }

    #[test]
    fn test_corrections_bring_samples_within_tolerance() {
        let tolerance = 0.25;
        let original: Vec<f64> = (0..300).map(|i| (i as f64 * 0.7).sin() * 10.0).collect();
        // off by a few tolerances at a handful of positions
        let mut reconstructed = original.clone();
        for (i, shift) in [(5usize, 0.9), (77, -3.3), (78, 0.26), (299, 17.1)] {
            reconstructed[i] += shift;
        }

        let outliers = find_outliers(&original, &reconstructed, tolerance);
        assert_eq!(outliers.len(), 4);
        let section = OutlierCoder::new(tolerance).encode(original.len(), &outliers).unwrap();
        let (coder, corrections) = OutlierCoder::decode(&section, original.len()).unwrap();
        assert_eq!(coder.tolerance(), tolerance);
        assert_eq!(corrections.len(), 4);

        for (index, correction) in corrections {
            reconstructed[index] += correction;
        }
        for (x, y) in original.iter().zip(&reconstructed) {
            assert!((x - y).abs() <= tolerance / 2.0 + 1e-9, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_empty_section() {
        let section = OutlierCoder::new(1.5).encode(64, &[]).unwrap();
        assert_eq!(section.len(), 12);
        let (coder, corrections) = OutlierCoder::decode(&section, 64).unwrap();
        assert_eq!(coder.tolerance(), 1.5);
        assert!(corrections.is_empty());
    }

    #[test]
    fn test_truncated_section_is_an_error() {
        let outliers: Vec<Outlier> = (0..40).map(|i| Outlier { index: i * 3, error: 5.0 + i as f64 }).collect();
        let section = OutlierCoder::new(0.5).encode(200, &outliers).unwrap();
        assert!(OutlierCoder::decode(&section[..14], 200).is_err());
        assert!(OutlierCoder::decode(&section[..6], 200).is_err());
    }
}
