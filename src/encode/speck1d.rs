// src/encode/speck1d.rs

//! Set-partitioning coder for 1D arrays.
//!
//! A set is a run of consecutive positions; a significant run splits into two
//! halves, the first taking the extra element. Single positions live in the
//! LIP. Used on its own for signals and by the outlier corrections.

use bitvec::prelude::*;
use log::trace;

use super::bitplane::{context, BitplaneCoder, CoderIo};
use crate::entropy::EntropyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Set1d {
    pub start: usize,
    pub len: usize,
    /// Halvings that produced this run.
    pub part_level: usize,
}

impl Set1d {
    pub fn is_pixel(&self) -> bool {
        self.len == 1
    }

    fn halves(&self) -> [Set1d; 2] {
        let first = self.len - self.len / 2;
        let part_level = self.part_level + 1;
        [
            Set1d {
                start: self.start,
                len: first,
                part_level,
            },
            Set1d {
                start: self.start + first,
                len: self.len / 2,
                part_level,
            },
        ]
    }
}

#[derive(Debug)]
struct Halves {
    children: [Set1d; 2],
    next: usize,
    significant: usize,
}

pub struct Speck1d {
    /// Residual magnitudes when encoding, reconstructed magnitudes when decoding.
    magnitudes: Vec<f64>,
    negative: BitVec,
    significance: BitVec,
    lis: Vec<Vec<Set1d>>,
    lip: Vec<usize>,
    lsp: Vec<usize>,
    lsp_new: Vec<usize>,
    stack: Vec<Halves>,
}

impl Speck1d {
    pub fn for_encoding(coefficients: &[f64]) -> Self {
        let negative = coefficients.iter().map(|&c| c < 0.0).collect();
        let magnitudes = coefficients.iter().map(|c| c.abs()).collect();
        Self::with_magnitudes(magnitudes, negative)
    }

    pub fn for_decoding(len: usize) -> Self {
        Self::with_magnitudes(vec![0.0; len], bitvec![0; len])
    }

    fn with_magnitudes(magnitudes: Vec<f64>, negative: BitVec) -> Self {
        let len = magnitudes.len();
        let mut coder = Self {
            magnitudes,
            negative,
            significance: bitvec![0; len],
            lis: Vec::new(),
            lip: Vec::new(),
            lsp: Vec::new(),
            lsp_new: Vec::new(),
            stack: Vec::new(),
        };
        let whole = Set1d {
            start: 0,
            len,
            part_level: 0,
        };
        if whole.is_pixel() {
            coder.lip.push(0);
        } else if len > 1 {
            for half in whole.halves() {
                coder.file(half);
            }
        }
        coder
    }

    fn file(&mut self, set: Set1d) {
        match set.len {
            0 => {}
            1 => self.lip.push(set.start),
            _ => {
                if self.lis.len() <= set.part_level {
                    self.lis.resize_with(set.part_level + 1, Vec::new);
                }
                self.lis[set.part_level].push(set);
            }
        }
    }

    fn visit_pixel(&mut self, io: &mut CoderIo<'_>, threshold: f64, index: usize, read: bool) -> Result<bool, EntropyError> {
        let significant = if read {
            io.code_with(context::SIGNIFICANCE, || self.significance[index])?
        } else {
            true
        };
        if !significant {
            return Ok(false);
        }
        let positive = io.code(context::SIGN, !self.negative[index])?;
        if io.is_encoder() {
            self.magnitudes[index] -= threshold;
        } else {
            self.negative.set(index, !positive);
            self.magnitudes[index] = 1.5 * threshold;
        }
        self.lsp_new.push(index);
        Ok(true)
    }

    fn visit_set(&mut self, io: &mut CoderIo<'_>, set: &Set1d, read: bool) -> Result<bool, EntropyError> {
        if !read {
            return Ok(true);
        }
        io.code_with(context::SIGNIFICANCE, || {
            self.significance[set.start..set.start + set.len].any()
        })
    }

    /// Codes the halves of a significant run, depth first.
    fn code_set(&mut self, io: &mut CoderIo<'_>, threshold: f64, set: &Set1d) -> Result<(), EntropyError> {
        self.stack.clear();
        self.stack.push(Halves {
            children: set.halves(),
            next: 0,
            significant: 0,
        });

        while let Some(frame) = self.stack.last_mut() {
            if frame.next == 2 {
                self.stack.pop();
                continue;
            }
            let child = frame.children[frame.next];
            let read = !(frame.next == 1 && frame.significant == 0);
            frame.next += 1;
            if child.len == 0 {
                continue;
            }

            let significant = if child.is_pixel() {
                self.visit_pixel(io, threshold, child.start, read)?
            } else {
                self.visit_set(io, &child, read)?
            };
            if !significant {
                self.file(child);
                continue;
            }
            if let Some(frame) = self.stack.last_mut() {
                frame.significant += 1;
            }
            if !child.is_pixel() {
                trace!("split {:?}", child);
                self.stack.push(Halves {
                    children: child.halves(),
                    next: 0,
                    significant: 0,
                });
            }
        }
        Ok(())
    }

    /// Signed coefficients in array order.
    pub fn into_coefficients(self) -> Vec<f64> {
        let mut values = self.magnitudes;
        for (value, negative) in values.iter_mut().zip(self.negative.iter()) {
            if *negative {
                *value = -*value;
            }
        }
        values
    }
}

impl BitplaneCoder for Speck1d {
    fn sorting_pass(&mut self, io: &mut CoderIo<'_>, threshold: f64) -> Result<(), EntropyError> {
        if io.is_encoder() {
            let significance = &mut self.significance;
            for (i, &m) in self.magnitudes.iter().enumerate() {
                significance.set(i, m >= threshold);
            }
        }

        let pending = std::mem::take(&mut self.lip);
        let mut kept = Vec::with_capacity(pending.len());
        let mut pixels = pending.into_iter();
        while let Some(index) = pixels.next() {
            match self.visit_pixel(io, threshold, index, true) {
                Ok(true) => {}
                Ok(false) => kept.push(index),
                Err(e) => {
                    kept.extend(pixels);
                    self.lip = kept;
                    return Err(e);
                }
            }
        }
        self.lip = kept;

        for level in (0..self.lis.len()).rev() {
            let pending = std::mem::take(&mut self.lis[level]);
            let mut kept = Vec::with_capacity(pending.len());
            let mut sets = pending.into_iter();
            while let Some(set) = sets.next() {
                let step = self
                    .visit_set(io, &set, true)
                    .and_then(|significant| if significant { self.code_set(io, threshold, &set).map(|_| true) } else { Ok(false) });
                match step {
                    Ok(true) => {}
                    Ok(false) => kept.push(set),
                    Err(e) => {
                        kept.extend(sets);
                        self.lis[level] = kept;
                        return Err(e);
                    }
                }
            }
            self.lis[level] = kept;
        }
        Ok(())
    }

    fn refinement_pass(&mut self, io: &mut CoderIo<'_>, threshold: f64) -> Result<(), EntropyError> {
        let encoding = io.is_encoder();
        for &index in &self.lsp {
            let value = &mut self.magnitudes[index];
            if encoding {
                if io.code(context::REFINEMENT, *value >= threshold)? {
                    *value -= threshold;
                }
            } else if io.code(context::REFINEMENT, false)? {
                *value += threshold / 2.0;
            } else {
                *value -= threshold / 2.0;
            }
        }
        self.lsp.append(&mut self.lsp_new);
        Ok(())
    }

    fn significant_count(&self) -> usize {
        self.lsp.len() + self.lsp_new.len()
    }

    fn describe_plane(&self, _threshold: f64) -> Option<String> {
        let pending: usize = self.lis.iter().map(Vec::len).sum();
        Some(format!("{} runs and {} positions pending", pending, self.lip.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::bitplane::run_bitplanes;
    use crate::entropy::{BitReader, BitWriter};

    fn round_trip(values: &[f64], floor: i32) -> (Vec<f64>, usize) {
        let max = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let top = max.log2().floor() as i32;

        let mut enc = Speck1d::for_encoding(values);
        let mut io = CoderIo::encoder(BitWriter::new(), None);
        run_bitplanes(&mut enc, &mut io, top, floor).unwrap();
        let bytes = io.into_output().unwrap().into_bytes();

        let mut dec = Speck1d::for_decoding(values.len());
        let mut io = CoderIo::decoder(BitReader::new(&bytes), None).unwrap();
        let outcome = run_bitplanes(&mut dec, &mut io, top, floor).unwrap();
        assert!(outcome.reached(floor));
        (dec.into_coefficients(), bytes.len())
    }

    #[test]
    fn test_halves() {
        let set = Set1d {
            start: 4,
            len: 7,
            part_level: 1,
        };
        let [a, b] = set.halves();
        assert_eq!((a.start, a.len, a.part_level), (4, 4, 2));
        assert_eq!((b.start, b.len, b.part_level), (8, 3, 2));
    }

    #[test]
    fn test_initial_lists() {
        let coder = Speck1d::for_decoding(9);
        assert_eq!(coder.lis[1].len(), 2);
        assert!(coder.lip.is_empty());

        let single = Speck1d::for_decoding(1);
        assert_eq!(single.lip, vec![0]);
        let pair = Speck1d::for_decoding(2);
        assert_eq!(pair.lip, vec![0, 1]);
    }

    #[test]
    fn test_sparse_integers_are_exact() {
        let mut values = vec![0.0; 1000];
        for (i, v) in [(3usize, 5.0), (17, -1.0), (400, 130.0), (401, -2.0), (999, 7.0)] {
            values[i] = v;
        }
        let (decoded, bytes) = round_trip(&values, 0);
        let truncated: Vec<f64> = decoded.iter().map(|v| v.trunc()).collect();
        assert_eq!(truncated, values);
        // five values among a thousand zeros stay small
        assert!(bytes < 100, "{} bytes", bytes);
    }

    #[test]
    fn test_dense_signal_error_bound() {
        let values: Vec<f64> = (0..257).map(|i| (i as f64 * 0.13).sin() * 40.0).collect();
        let (decoded, _) = round_trip(&values, -4);
        for (d, v) in decoded.iter().zip(&values) {
            assert!((d - v).abs() <= 1.0 / 16.0, "{} vs {}", d, v);
        }
    }
}
