// src/encode/speck.rs

//! Set-partitioning embedded block coder for a 2D subband pyramid.
//!
//! Sets of type S are rectangles inside one subband and are quad-split when
//! they become significant. The single set of type I is "everything outside
//! the baseband of its level"; when significant it sheds the three detail
//! subbands of that level as new S sets and moves one level up.
//!
//! The same code drives encoding and decoding; see [`CoderIo`].

use bitvec::prelude::*;
use log::{log_enabled, trace, Level};

use super::bitplane::{context, BitplaneCoder, CoderIo};
use crate::entropy::EntropyError;
use crate::pyramid::{SubbandPyramid, Zerotree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    S,
    I,
}

/// A coding unit: a single coefficient or a rectangular set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeckSet {
    Pixel {
        row: usize,
        col: usize,
    },
    Set {
        kind: SetKind,
        level: u32,
        origin: (usize, usize),
        extent: (usize, usize),
    },
}

impl SpeckSet {
    /// An S set, collapsed to a pixel when it covers exactly one coefficient.
    pub fn region(level: u32, origin: (usize, usize), extent: (usize, usize)) -> Self {
        if extent == (1, 1) {
            SpeckSet::Pixel {
                row: origin.0,
                col: origin.1,
            }
        } else {
            SpeckSet::Set {
                kind: SetKind::S,
                level,
                origin,
                extent,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match *self {
            SpeckSet::Pixel { .. } => false,
            SpeckSet::Set { extent, .. } => extent.0 == 0 || extent.1 == 0,
        }
    }

    /// The four quadrants, lower-right first. The top/left halves get the
    /// extra row/column of an odd extent.
    fn quadrants(&self) -> Option<[SpeckSet; 4]> {
        let SpeckSet::Set {
            kind: SetKind::S,
            level,
            origin: (r, c),
            extent: (rows, cols),
        } = *self
        else {
            return None;
        };
        let nr = rows - rows / 2;
        let nc = cols - cols / 2;
        let level = level + 1;
        Some([
            SpeckSet::region(level, (r + nr, c + nc), (rows - nr, cols - nc)),
            SpeckSet::region(level, (r + nr, c), (rows - nr, nc)),
            SpeckSet::region(level, (r, c + nc), (nr, cols - nc)),
            SpeckSet::region(level, (r, c), (nr, nc)),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Significance {
    Insignificant,
    Significant,
    NewlySignificant,
    Empty,
}

impl Significance {
    fn is_significant(self) -> bool {
        matches!(self, Significance::Significant | Significance::NewlySignificant)
    }

    /// Context offset contributed by the previously coded sibling.
    fn offset(self) -> usize {
        match self {
            Significance::Insignificant => 0,
            Significance::Empty => 1,
            _ => 2,
        }
    }
}

/// Sibling cursor over the quadrants of a split set.
#[derive(Debug)]
struct Partition {
    children: [SpeckSet; 4],
    level: u32,
    next: usize,
    prior: Significance,
    significant: usize,
}

impl Partition {
    fn context(&self) -> Option<usize> {
        let offset = self.prior.offset();
        match self.next {
            0 => Some(context::S3),
            1 => Some(context::S2 + offset),
            2 => Some(context::S1 + offset),
            _ if self.significant == 0 => None,
            _ => Some(context::S0 + offset),
        }
    }
}

/// Coefficient in the significant list.
#[derive(Debug, Clone, Copy)]
struct Significant {
    index: usize,
    newly: bool,
}

pub struct Speck2d {
    /// Residual magnitudes when encoding, reconstructed magnitudes when decoding.
    magnitudes: SubbandPyramid<f64>,
    negative: BitVec,
    significance: BitVec,
    lis: Vec<Vec<SpeckSet>>,
    lsp: Vec<Significant>,
    i_set: SpeckSet,
    stack: Vec<Partition>,
}

impl Speck2d {
    /// Encoder state over signed coefficients.
    pub fn for_encoding(coefficients: &SubbandPyramid<f64>) -> Self {
        let negative = coefficients.coefficients().iter().map(|&c| c < 0.0).collect();
        let mut magnitudes = coefficients.clone();
        magnitudes.coefficients_mut().iter_mut().for_each(|c| *c = c.abs());
        Self::with_magnitudes(magnitudes, negative)
    }

    /// Decoder state: a zeroed pyramid of the coded geometry.
    pub fn for_decoding(geometry: SubbandPyramid<f64>) -> Self {
        let len = geometry.coefficients().len();
        let mut magnitudes = geometry;
        magnitudes.coefficients_mut().fill(0.0);
        Self::with_magnitudes(magnitudes, bitvec![0; len])
    }

    fn with_magnitudes(magnitudes: SubbandPyramid<f64>, negative: BitVec) -> Self {
        let len = magnitudes.coefficients().len();
        let levels = magnitudes.num_levels();

        // one list per halving of (2 rows, 2 cols)
        let (mut rows, mut cols) = (2 * magnitudes.rows(), 2 * magnitudes.cols());
        let mut lis = Vec::new();
        while rows > 1 || cols > 1 {
            lis.push(Vec::new());
            rows -= rows >> 1;
            cols -= cols >> 1;
        }

        let baseband = magnitudes.baseband_size(levels);
        let root = SpeckSet::region(levels, (0, 0), baseband);
        let mut coder = Self {
            i_set: SpeckSet::Set {
                kind: SetKind::I,
                level: levels,
                origin: baseband,
                extent: (magnitudes.rows(), magnitudes.cols()),
            },
            magnitudes,
            negative,
            significance: bitvec![0; len],
            lis,
            lsp: Vec::new(),
            stack: Vec::new(),
        };
        coder.list(levels).push(root);
        coder
    }

    fn list(&mut self, level: u32) -> &mut Vec<SpeckSet> {
        let level = level as usize;
        if self.lis.len() <= level {
            self.lis.resize_with(level + 1, Vec::new);
        }
        &mut self.lis[level]
    }

    fn index(&self, row: usize, col: usize) -> usize {
        row * self.magnitudes.cols() + col
    }

    fn refresh_significance(&mut self, threshold: f64) {
        let significance = &mut self.significance;
        for (i, &m) in self.magnitudes.coefficients().iter().enumerate() {
            significance.set(i, m >= threshold);
        }
    }

    fn set_is_significant(&self, set: &SpeckSet) -> bool {
        let cols = self.magnitudes.cols();
        match *set {
            SpeckSet::Pixel { row, col } => self.significance[row * cols + col],
            SpeckSet::Set {
                kind: SetKind::S,
                origin: (r0, c0),
                extent: (rows, cols_in_set),
                ..
            } => (r0..r0 + rows).any(|r| self.significance[r * cols + c0..r * cols + c0 + cols_in_set].any()),
            SpeckSet::Set {
                kind: SetKind::I,
                origin: (or, oc),
                extent: (rows, _),
                ..
            } => {
                let below = self.significance[(or * cols).min(rows * cols)..].any();
                below || (0..or.min(rows)).any(|r| self.significance[r * cols + oc.min(cols)..(r + 1) * cols].any())
            }
        }
    }

    /// Codes the significance of one set and, for a significant pixel, its sign.
    fn visit(
        &mut self,
        io: &mut CoderIo<'_>,
        threshold: f64,
        set: &SpeckSet,
        context: Option<usize>,
    ) -> Result<Significance, EntropyError> {
        if set.is_empty() {
            return Ok(Significance::Empty);
        }
        let significant = match context {
            Some(ctx) => io.code_with(ctx, || self.set_is_significant(set))?,
            None => true,
        };
        if !significant {
            return Ok(Significance::Insignificant);
        }

        let SpeckSet::Pixel { row, col } = *set else {
            return Ok(Significance::Significant);
        };
        let index = self.index(row, col);
        let positive = io.code(context::SIGN, !self.negative[index])?;
        if io.is_encoder() {
            self.magnitudes.coefficients_mut()[index] -= threshold;
        } else {
            self.negative.set(index, !positive);
            self.magnitudes.coefficients_mut()[index] = 1.5 * threshold;
        }
        self.lsp.push(Significant { index, newly: true });
        Ok(Significance::NewlySignificant)
    }

    /// ProcessS on a set that already sits in (or was just dropped from) the
    /// LIS. A significant set is split depth-first; insignificant quadrants
    /// are filed in the LIS one level down.
    fn process_set(
        &mut self,
        io: &mut CoderIo<'_>,
        threshold: f64,
        set: SpeckSet,
        context: Option<usize>,
    ) -> Result<Significance, EntropyError> {
        self.stack.clear();
        let state = self.visit(io, threshold, &set, context)?;
        if state == Significance::Significant {
            self.push_partition(&set);
        }

        while let Some(frame) = self.stack.last_mut() {
            if frame.next == frame.children.len() {
                self.stack.pop();
                continue;
            }
            let child = frame.children[frame.next];
            let level = frame.level;
            let ctx = frame.context();
            frame.next += 1;

            let child_state = self.visit(io, threshold, &child, ctx)?;
            if let Some(frame) = self.stack.last_mut() {
                frame.prior = child_state;
                if child_state.is_significant() {
                    frame.significant += 1;
                }
            }
            match child_state {
                Significance::Insignificant => self.list(level).push(child),
                Significance::Significant => self.push_partition(&child),
                _ => {}
            }
        }
        Ok(state)
    }

    fn push_partition(&mut self, set: &SpeckSet) {
        let (Some(children), SpeckSet::Set { level, .. }) = (set.quadrants(), *set) else {
            return;
        };
        trace!("split {:?}", set);
        self.stack.push(Partition {
            children,
            level: level + 1,
            next: 0,
            prior: Significance::Insignificant,
            significant: 0,
        });
    }

    /// ProcessI/CodeI, iterated until I is insignificant or exhausted.
    fn process_i(&mut self, io: &mut CoderIo<'_>, threshold: f64) -> Result<(), EntropyError> {
        let total_levels = self.magnitudes.num_levels();
        loop {
            let SpeckSet::Set { level, .. } = self.i_set else {
                return Ok(());
            };
            if level == 0 {
                return Ok(());
            }
            let i_set = self.i_set;
            if !io.code_with(context::I, || self.set_is_significant(&i_set))? {
                return Ok(());
            }

            let first = 3 * (total_levels - level) as usize + 1;
            let mut prior = Significance::Insignificant;
            for (orientation, base_context) in [(2, context::S3), (1, context::S2), (0, context::S1)] {
                let subband = first + orientation;
                let extent = self.magnitudes.subband_size(subband);
                if extent.0 == 0 || extent.1 == 0 {
                    continue;
                }
                let origin = self.magnitudes.subband_offsets(subband);
                let set = SpeckSet::region(level, origin, extent);
                let ctx = if base_context == context::S3 {
                    base_context
                } else {
                    base_context + (prior != Significance::Insignificant) as usize
                };
                prior = self.process_set(io, threshold, set, Some(ctx))?;
                if prior == Significance::Insignificant {
                    self.list(level).push(set);
                }
            }

            let level = level - 1;
            self.i_set = SpeckSet::Set {
                kind: SetKind::I,
                level,
                origin: self.magnitudes.baseband_size(level),
                extent: (self.magnitudes.rows(), self.magnitudes.cols()),
            };
        }
    }

    /// Signed coefficients: reconstruction when decoding, the remaining
    /// residual when encoding.
    pub fn into_coefficients(self) -> SubbandPyramid<f64> {
        let mut pyramid = self.magnitudes;
        for (value, negative) in pyramid.coefficients_mut().iter_mut().zip(self.negative.iter()) {
            if *negative {
                *value = -*value;
            }
        }
        pyramid
    }
}

impl BitplaneCoder for Speck2d {
    fn sorting_pass(&mut self, io: &mut CoderIo<'_>, threshold: f64) -> Result<(), EntropyError> {
        if io.is_encoder() {
            self.refresh_significance(threshold);
        }

        for level in (0..self.lis.len()).rev() {
            let pending = std::mem::take(&mut self.lis[level]);
            let mut kept = Vec::with_capacity(pending.len());
            let mut sets = pending.into_iter();
            while let Some(set) = sets.next() {
                match self.process_set(io, threshold, set, Some(context::SIGNIFICANCE)) {
                    Ok(Significance::Insignificant) => kept.push(set),
                    Ok(_) => {}
                    Err(e) => {
                        kept.extend(sets);
                        self.lis[level] = kept;
                        return Err(e);
                    }
                }
            }
            debug_assert!(self.lis[level].is_empty());
            self.lis[level] = kept;
        }

        self.process_i(io, threshold)
    }

    fn refinement_pass(&mut self, io: &mut CoderIo<'_>, threshold: f64) -> Result<(), EntropyError> {
        let encoding = io.is_encoder();
        for i in 0..self.lsp.len() {
            let Significant { index, newly } = self.lsp[i];
            if newly {
                self.lsp[i].newly = false;
                continue;
            }
            let value = &mut self.magnitudes.coefficients_mut()[index];
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
        Ok(())
    }

    fn significant_count(&self) -> usize {
        self.lsp.len()
    }

    fn describe_plane(&self, threshold: f64) -> Option<String> {
        if !log_enabled!(Level::Debug) {
            return None;
        }
        let pending: usize = self.lis.iter().map(Vec::len).sum();
        let roots = Zerotree::from_significance(&self.magnitudes, threshold).count_roots();
        Some(format!("{} sets pending, {} zerotree roots in the residual", pending, roots))
    }
}
