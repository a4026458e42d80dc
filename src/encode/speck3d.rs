// src/encode/speck3d.rs

//! Set-partitioning coder for 3D volumes.
//!
//! Sets are boxes that split into up to eight octants. Single voxels live in a
//! separate list (LIP) that is visited before the set lists on every pass.
//! When a split produces children whose earlier siblings were all
//! insignificant, the last non-empty child is known to be significant and
//! costs no bit.

use bitvec::prelude::*;
use log::{log_enabled, trace, Level};

use super::bitplane::{context, BitplaneCoder, CoderIo};
use crate::entropy::EntropyError;
use crate::pyramid::VolumeTree;
use crate::utils::buffer::Dims;

/// A box of voxels. Axis order is `[col, row, frame]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Set3d {
    pub origin: [usize; 3],
    pub extent: [usize; 3],
    /// Number of non-trivial axis halvings that produced this set.
    pub part_level: usize,
}

impl Set3d {
    pub fn len(&self) -> usize {
        self.extent.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_pixel(&self) -> bool {
        self.extent == [1, 1, 1]
    }

    /// Halves the axes selected by `mask`; the first half of each split axis
    /// gets the extra element. Children are ordered with col varying fastest.
    fn split(&self, mask: [bool; 3]) -> Vec<Set3d> {
        let mut halves = [[0usize; 2]; 3];
        let mut part_level = self.part_level;
        for axis in 0..3 {
            let len = self.extent[axis];
            halves[axis] = if mask[axis] { [len - len / 2, len / 2] } else { [len, 0] };
            if halves[axis][1] != 0 {
                part_level += 1;
            }
        }

        let span = |axis: usize| if mask[axis] { 2 } else { 1 };
        let mut children = Vec::with_capacity(8);
        for z in 0..span(2) {
            for y in 0..span(1) {
                for x in 0..span(0) {
                    let pick = [x, y, z];
                    let mut child = Set3d {
                        part_level,
                        ..Default::default()
                    };
                    for axis in 0..3 {
                        child.origin[axis] = self.origin[axis] + if pick[axis] == 1 { halves[axis][0] } else { 0 };
                        child.extent[axis] = halves[axis][pick[axis]];
                    }
                    children.push(child);
                }
            }
        }
        children
    }

    fn octants(&self) -> Vec<Set3d> {
        self.split([true, true, true])
    }
}

/// Sibling cursor over the non-empty octants of a split set.
#[derive(Debug)]
struct Octants {
    children: Vec<Set3d>,
    next: usize,
    significant: usize,
}

pub struct Speck3d {
    dims: Dims,
    levels: (u32, u32),
    /// Residual magnitudes when encoding, reconstructed magnitudes when decoding.
    magnitudes: Vec<f64>,
    negative: BitVec,
    significance: BitVec,
    lis: Vec<Vec<Set3d>>,
    lip: Vec<usize>,
    lsp: Vec<usize>,
    lsp_new: Vec<usize>,
    stack: Vec<Octants>,
}

/// Number of halvings `len - len / 2` until one element is left.
fn num_partitions(mut len: usize) -> usize {
    let mut parts = 0;
    while len > 1 {
        parts += 1;
        len -= len / 2;
    }
    parts
}

impl Speck3d {
    /// Encoder state. `levels` is `(spatial, temporal)` decomposition depth.
    pub fn for_encoding(dims: Dims, coefficients: &[f64], levels: (u32, u32)) -> Self {
        let negative = coefficients.iter().map(|&c| c < 0.0).collect();
        let magnitudes = coefficients.iter().map(|c| c.abs()).collect();
        Self::with_magnitudes(dims, magnitudes, negative, levels)
    }

    pub fn for_decoding(dims: Dims, levels: (u32, u32)) -> Self {
        let len = dims.len();
        Self::with_magnitudes(dims, vec![0.0; len], bitvec![0; len], levels)
    }

    fn with_magnitudes(dims: Dims, magnitudes: Vec<f64>, negative: BitVec, levels: (u32, u32)) -> Self {
        let len = magnitudes.len();
        let num_lists = 1 + num_partitions(dims.cols) + num_partitions(dims.rows) + num_partitions(dims.frames);
        let mut coder = Self {
            dims,
            levels,
            magnitudes,
            negative,
            significance: bitvec![0; len],
            lis: vec![Vec::new(); num_lists],
            lip: Vec::new(),
            lsp: Vec::new(),
            lsp_new: Vec::new(),
            stack: Vec::new(),
        };
        coder.initial_partition();
        coder
    }

    /// Mirrors the transform: octree splits while both spatial and temporal
    /// levels remain, then plane-only or frame-only splits.
    fn initial_partition(&mut self) {
        let (spatial, temporal) = (self.levels.0 as usize, self.levels.1 as usize);
        let mut big = Set3d {
            origin: [0; 3],
            extent: [self.dims.cols, self.dims.rows, self.dims.frames],
            part_level: 0,
        };

        let mut done = 0;
        while done < spatial.max(temporal) {
            let mask = if done < spatial && done < temporal {
                [true, true, true]
            } else if done < spatial {
                [true, true, false]
            } else {
                [false, false, true]
            };
            let mut children = big.split(mask).into_iter();
            if let Some(first) = children.next() {
                big = first;
            }
            for child in children {
                self.file(child);
            }
            done += 1;
        }

        if big.is_pixel() {
            let index = self.index(&big);
            self.lip.insert(0, index);
        } else if !big.is_empty() {
            let level = big.part_level;
            self.list(level).insert(0, big);
        }
    }

    /// Files an insignificant child in the LIP or the LIS.
    fn file(&mut self, set: Set3d) {
        if set.is_empty() {
            return;
        }
        if set.is_pixel() {
            let index = self.index(&set);
            self.lip.push(index);
        } else {
            self.list(set.part_level).push(set);
        }
    }

    fn list(&mut self, level: usize) -> &mut Vec<Set3d> {
        if self.lis.len() <= level {
            self.lis.resize_with(level + 1, Vec::new);
        }
        &mut self.lis[level]
    }

    fn index(&self, set: &Set3d) -> usize {
        self.dims.index(set.origin[2], set.origin[1], set.origin[0])
    }

    fn set_is_significant(&self, set: &Set3d) -> bool {
        let [x0, y0, z0] = set.origin;
        let [nx, ny, nz] = set.extent;
        (z0..z0 + nz).any(|z| {
            (y0..y0 + ny).any(|y| {
                let start = self.dims.index(z, y, x0);
                self.significance[start..start + nx].any()
            })
        })
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

    fn visit_set(&mut self, io: &mut CoderIo<'_>, set: &Set3d, read: bool) -> Result<bool, EntropyError> {
        if !read {
            return Ok(true);
        }
        io.code_with(context::SIGNIFICANCE, || self.set_is_significant(set))
    }

    fn push_octants(&mut self, set: &Set3d) {
        trace!("split {:?}", set);
        let children: Vec<Set3d> = set.octants().into_iter().filter(|s| !s.is_empty()).collect();
        self.stack.push(Octants {
            children,
            next: 0,
            significant: 0,
        });
    }

    /// Codes the octants of a significant set, depth first.
    fn code_set(&mut self, io: &mut CoderIo<'_>, threshold: f64, set: &Set3d) -> Result<(), EntropyError> {
        self.stack.clear();
        self.push_octants(set);

        while let Some(frame) = self.stack.last_mut() {
            if frame.next == frame.children.len() {
                self.stack.pop();
                continue;
            }
            let child = frame.children[frame.next];
            let read = !(frame.next + 1 == frame.children.len() && frame.significant == 0);
            frame.next += 1;

            let significant = if child.is_pixel() {
                let index = self.index(&child);
                self.visit_pixel(io, threshold, index, read)?
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
                self.push_octants(&child);
            }
        }
        Ok(())
    }

    /// Baseband voxels whose whole tree is below `threshold`, for the debug log.
    fn zero_trees(&self, threshold: f64) -> usize {
        let (spatial, temporal) = self.levels;
        let tree = VolumeTree::new(self.dims, spatial.min(temporal));
        voxels(tree.baseband()).filter(|&(f, r, c)| {
            let below = |(f, r, c): (usize, usize, usize)| self.magnitudes[self.dims.index(f, r, c)] < threshold;
            below((f, r, c)) && tree.descendants((f, r, c)).into_iter().all(below)
        })
        .count()
    }

    /// Signed coefficients in volume order.
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

fn voxels(dims: Dims) -> impl Iterator<Item = (usize, usize, usize)> {
    let Dims { frames, rows, cols } = dims;
    (0..frames).flat_map(move |f| (0..rows).flat_map(move |r| (0..cols).map(move |c| (f, r, c))))
}

impl BitplaneCoder for Speck3d {
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

    fn describe_plane(&self, threshold: f64) -> Option<String> {
        if !log_enabled!(Level::Debug) {
            return None;
        }
        let pending: usize = self.lis.iter().map(Vec::len).sum();
        Some(format!(
            "{} sets and {} voxels pending, {} zero trees in the residual",
            pending,
            self.lip.len(),
            self.zero_trees(threshold)
        ))
    }
}
