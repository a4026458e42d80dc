// src/pyramid/subband_pyramid.rs

//! A 2D coefficient matrix together with the geometry of its dyadic
//! decomposition.
//!
//! Subband 0 is the baseband. Subbands `3(L-l)+1 ..= 3(L-l)+3` are the
//! horizontal, vertical and diagonal detail bands produced at level `l`, so
//! lower subband indices are coarser.

use std::ops::Range;

use crate::transform::dwt::{self, AxisAlignment};
use crate::transform::{Alignment, LiftingSample, TransformError, Wavelet};
use crate::utils::buffer::Dims;
use crate::utils::error::{CodecError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct SubbandPyramid<T> {
    num_levels: u32,
    rows: usize,
    cols: usize,
    row_alignment: Alignment,
    col_alignment: Alignment,
    coefficients: Vec<T>,
}

impl<T: LiftingSample> SubbandPyramid<T> {
    /// Wraps untransformed samples (zero levels).
    pub fn new(rows: usize, cols: usize, coefficients: Vec<T>) -> Result<Self> {
        Dims::plane(rows, cols).validate()?;
        if coefficients.len() != rows * cols {
            return Err(TransformError::LengthMismatch {
                expected: rows * cols,
                actual: coefficients.len(),
            }
            .into());
        }
        Ok(Self {
            num_levels: 0,
            rows,
            cols,
            row_alignment: Alignment::default(),
            col_alignment: Alignment::default(),
            coefficients,
        })
    }

    /// Wraps coefficients that are already decomposed `num_levels` times.
    pub fn from_coefficients(rows: usize, cols: usize, num_levels: u32, coefficients: Vec<T>) -> Result<Self> {
        let mut pyramid = Self::new(rows, cols, coefficients)?;
        pyramid.num_levels = num_levels;
        Ok(pyramid)
    }

    pub fn with_alignment(mut self, row_alignment: Alignment, col_alignment: Alignment) -> Self {
        self.row_alignment = row_alignment;
        self.col_alignment = col_alignment;
        self
    }

    pub fn num_levels(&self) -> u32 {
        self.num_levels
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn num_subbands(&self) -> usize {
        3 * self.num_levels as usize + 1
    }

    /// Decomposition level a subband belongs to; the baseband is at `num_levels`.
    pub fn subband_to_level(&self, subband: usize) -> u32 {
        if subband == 0 {
            self.num_levels
        } else {
            self.num_levels - ((subband as u32 - 1) / 3)
        }
    }

    /// The three detail subbands produced at `level` (1 = finest).
    pub fn level_to_subbands(&self, level: u32) -> Range<usize> {
        let first = 3 * (self.num_levels - level) as usize + 1;
        first..first + 3
    }

    /// Size of the lowpass region left after `level` decompositions.
    pub fn baseband_size(&self, level: u32) -> (usize, usize) {
        (
            self.row_alignment.subband_length(self.rows, level, false),
            self.col_alignment.subband_length(self.cols, level, false),
        )
    }

    pub fn subband_size(&self, subband: usize) -> (usize, usize) {
        if subband == 0 {
            return self.baseband_size(self.num_levels);
        }
        let level = self.subband_to_level(subband);
        let (row_high, col_high) = orientation(subband);
        (
            self.row_alignment.subband_length(self.rows, level, row_high),
            self.col_alignment.subband_length(self.cols, level, col_high),
        )
    }

    /// Top-left corner of a subband inside the coefficient matrix.
    pub fn subband_offsets(&self, subband: usize) -> (usize, usize) {
        if subband == 0 {
            return (0, 0);
        }
        let (bb_rows, bb_cols) = self.baseband_size(self.subband_to_level(subband));
        match (subband - 1) % 3 {
            0 => (bb_rows, 0),
            1 => (0, bb_cols),
            _ => (bb_rows, bb_cols),
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.coefficients[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.coefficients[row * self.cols + col] = value;
    }

    /// Coefficient at `(row, col)` relative to the subband's corner.
    pub fn subband_coefficient(&self, subband: usize, row: usize, col: usize) -> T {
        let (r0, c0) = self.subband_offsets(subband);
        self.get(r0 + row, c0 + col)
    }

    pub fn coefficients(&self) -> &[T] {
        &self.coefficients
    }

    pub fn coefficients_mut(&mut self) -> &mut [T] {
        &mut self.coefficients
    }

    pub fn into_coefficients(self) -> Vec<T> {
        self.coefficients
    }

    fn axis_alignment(&self) -> AxisAlignment {
        AxisAlignment {
            rows: self.row_alignment,
            cols: self.col_alignment,
            ..Default::default()
        }
    }

    /// Decomposes the (untransformed) pyramid `levels` times.
    pub fn dwt(&mut self, levels: u32, wavelet: &Wavelet) -> Result<()> {
        if self.num_levels != 0 {
            return Err(CodecError::config(format!(
                "pyramid is already decomposed {} levels",
                self.num_levels
            )));
        }
        let alignment = self.axis_alignment();
        dwt::dwt_2d(
            &mut self.coefficients,
            Dims::plane(self.rows, self.cols),
            levels,
            &alignment,
            wavelet,
        )?;
        self.num_levels = levels;
        Ok(())
    }

    /// Fully reconstructs the samples; afterwards the pyramid has zero levels.
    pub fn inverse_dwt(&mut self, wavelet: &Wavelet) -> Result<()> {
        let alignment = self.axis_alignment();
        dwt::inverse_dwt_2d(
            &mut self.coefficients,
            Dims::plane(self.rows, self.cols),
            self.num_levels,
            &alignment,
            wavelet,
        )?;
        self.num_levels = 0;
        Ok(())
    }
}

/// `(rows highpass, cols highpass)` of a detail subband.
fn orientation(subband: usize) -> (bool, bool) {
    match (subband - 1) % 3 {
        0 => (true, false),
        1 => (false, true),
        _ => (true, true),
    }
}

impl SubbandPyramid<f64> {
    /// Removes the sample mean and returns it.
    pub fn subtract_mean(&mut self) -> f64 {
        let mean = self.coefficients.iter().sum::<f64>() / self.coefficients.len() as f64;
        self.coefficients.iter_mut().for_each(|v| *v -= mean);
        mean
    }

    pub fn add_mean(&mut self, mean: f64) {
        self.coefficients.iter_mut().for_each(|v| *v += mean);
    }
}

impl SubbandPyramid<i64> {
    /// Integer flavour: the removed mean is rounded so the samples stay exact.
    pub fn subtract_mean(&mut self) -> i64 {
        let sum: i128 = self.coefficients.iter().map(|&v| v as i128).sum();
        let mean = (sum as f64 / self.coefficients.len() as f64).round() as i64;
        self.coefficients.iter_mut().for_each(|v| *v -= mean);
        mean
    }

    pub fn add_mean(&mut self, mean: i64) {
        self.coefficients.iter_mut().for_each(|v| *v += mean);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pyramid(rows: usize, cols: usize, levels: u32) -> SubbandPyramid<f64> {
        SubbandPyramid::from_coefficients(rows, cols, levels, vec![0.0; rows * cols]).unwrap()
    }

    #[test]
    fn test_levels_and_subbands() {
        let p = pyramid(16, 16, 3);
        assert_eq!(p.num_subbands(), 10);
        assert_eq!(p.subband_to_level(0), 3);
        assert_eq!(p.subband_to_level(1), 3);
        assert_eq!(p.subband_to_level(3), 3);
        assert_eq!(p.subband_to_level(4), 2);
        assert_eq!(p.subband_to_level(9), 1);
        assert_eq!(p.level_to_subbands(3), 1..4);
        assert_eq!(p.level_to_subbands(1), 7..10);
    }

    #[test]
    fn test_geometry_power_of_two() {
        let p = pyramid(16, 16, 2);
        assert_eq!(p.subband_size(0), (4, 4));
        assert_eq!(p.subband_offsets(1), (4, 0));
        assert_eq!(p.subband_offsets(2), (0, 4));
        assert_eq!(p.subband_offsets(3), (4, 4));
        assert_eq!(p.subband_size(4), (8, 8));
        assert_eq!(p.subband_offsets(4), (8, 0));
        assert_eq!(p.subband_offsets(6), (8, 8));
    }

    #[test]
    fn test_subbands_tile_the_matrix() {
        let p = pyramid(13, 9, 3);
        let mut covered = vec![0u8; 13 * 9];
        for s in 0..p.num_subbands() {
            let (r0, c0) = p.subband_offsets(s);
            let (nr, nc) = p.subband_size(s);
            for r in r0..r0 + nr {
                for c in c0..c0 + nc {
                    covered[r * 9 + c] += 1;
                }
            }
        }
        assert!(covered.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_mean_handling() {
        let mut p = SubbandPyramid::new(2, 2, vec![1.0, 2.0, 3.0, 6.0]).unwrap();
        let mean = p.subtract_mean();
        assert_eq!(mean, 3.0);
        assert_eq!(p.coefficients(), &[-2.0, -1.0, 0.0, 3.0]);
        p.add_mean(mean);
        assert_eq!(p.coefficients(), &[1.0, 2.0, 3.0, 6.0]);

        let mut q = SubbandPyramid::new(1, 3, vec![1i64, 2, 4]).unwrap();
        assert_eq!(q.subtract_mean(), 2);
        assert_eq!(q.coefficients(), &[-1, 0, 2]);
    }

    #[test]
    fn test_dwt_round_trip() {
        let data: Vec<i64> = (0..120).map(|i| (i * 31 % 17) - 8).collect();
        let mut p = SubbandPyramid::new(10, 12, data.clone()).unwrap();
        p.dwt(2, &Wavelet::cdf53()).unwrap();
        assert_eq!(p.num_levels(), 2);
        assert!(p.dwt(1, &Wavelet::cdf53()).is_err());
        p.inverse_dwt(&Wavelet::cdf53()).unwrap();
        assert_eq!(p.coefficients(), data.as_slice());
    }
}
