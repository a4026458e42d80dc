// src/transform/dwt.rs

//! Multiresolution driver: repeated single-level lifting along each axis.
//!
//! Buffers are frame-major, row-major (see [`Dims`]). Every pass gathers the
//! lines of one axis into a contiguous work buffer, lifts each line, and writes
//! them back. Work buffers live for one call only. With the `rayon` feature the
//! lines of a pass are lifted in parallel; lines are independent so the result
//! is identical.

use log::debug;

use super::TransformError;
use super::lifting::{LiftingSample, analysis_with_phase, synthesis_with_phase};
use super::subband::{Alignment, Phase, split};
use super::wavelet::Wavelet;
use crate::utils::buffer::Dims;

/// Deepest decomposition the driver accepts.
pub const MAX_LEVELS: u32 = 32;

/// Per-axis alignment of a multidimensional buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisAlignment {
    pub frames: Alignment,
    pub rows: Alignment,
    pub cols: Alignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Inverse,
}

/// A rectangle inside one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    row: usize,
    col: usize,
    rows: usize,
    cols: usize,
}

impl Region {
    fn top_left(rows: usize, cols: usize) -> Self {
        Self { row: 0, col: 0, rows, cols }
    }

    fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

fn check_len(actual: usize, dims: Dims) -> Result<(), TransformError> {
    if actual != dims.len() {
        return Err(TransformError::LengthMismatch {
            expected: dims.len(),
            actual,
        });
    }
    Ok(())
}

fn check_levels(levels: u32) -> Result<(), TransformError> {
    if levels > MAX_LEVELS {
        return Err(TransformError::TooManyLevels(levels));
    }
    Ok(())
}

#[inline]
fn lift_line<T: LiftingSample>(
    line: &mut [T],
    phase: Phase,
    wavelet: &Wavelet,
    direction: Direction,
    scratch: &mut Vec<T>,
) -> Result<(), TransformError> {
    match direction {
        Direction::Forward => analysis_with_phase(line, phase, wavelet, scratch),
        Direction::Inverse => synthesis_with_phase(line, phase, wavelet, scratch),
    }
}

/// Lifts `count` lines of `len` samples, each starting `stride` after the last.
fn lift_lines<T: LiftingSample>(
    buf: &mut [T],
    stride: usize,
    count: usize,
    len: usize,
    phase: Phase,
    wavelet: &Wavelet,
    direction: Direction,
) -> Result<(), TransformError> {
    if count == 0 || len == 0 {
        return Ok(());
    }
    let end = (count - 1) * stride + len;
    let lines = &mut buf[..end];

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        lines
            .par_chunks_mut(stride)
            .try_for_each_init(Vec::new, |scratch, line| {
                lift_line(&mut line[..len], phase, wavelet, direction, scratch)
            })
    }

    #[cfg(not(feature = "rayon"))]
    {
        let mut scratch = Vec::with_capacity(len);
        lines
            .chunks_mut(stride)
            .try_for_each(|line| lift_line(&mut line[..len], phase, wavelet, direction, &mut scratch))
    }
}

/// Lifts every row of `region`. `plane` is one frame with `stride` columns.
fn rows_pass<T: LiftingSample>(
    plane: &mut [T],
    stride: usize,
    region: Region,
    phase: Phase,
    wavelet: &Wavelet,
    direction: Direction,
) -> Result<(), TransformError> {
    if region.is_empty() {
        return Ok(());
    }
    let start = region.row * stride + region.col;
    lift_lines(&mut plane[start..], stride, region.rows, region.cols, phase, wavelet, direction)
}

/// Lifts every column of `region` through a column-major copy.
fn cols_pass<T: LiftingSample>(
    plane: &mut [T],
    stride: usize,
    region: Region,
    phase: Phase,
    wavelet: &Wavelet,
    direction: Direction,
) -> Result<(), TransformError> {
    if region.is_empty() {
        return Ok(());
    }
    let (rows, cols) = (region.rows, region.cols);
    let mut columns = vec![T::default(); rows * cols];
    for r in 0..rows {
        let src = (region.row + r) * stride + region.col;
        for (c, &v) in plane[src..src + cols].iter().enumerate() {
            columns[c * rows + r] = v;
        }
    }

    lift_lines(&mut columns, rows, cols, rows, phase, wavelet, direction)?;

    for r in 0..rows {
        let dst = (region.row + r) * stride + region.col;
        for (c, v) in plane[dst..dst + cols].iter_mut().enumerate() {
            *v = columns[c * rows + r];
        }
    }
    Ok(())
}

/// Lifts along the frame axis every sample position of `region` in the first `frames` frames.
fn frames_pass<T: LiftingSample>(
    data: &mut [T],
    dims: Dims,
    frames: usize,
    region: Region,
    phase: Phase,
    wavelet: &Wavelet,
    direction: Direction,
) -> Result<(), TransformError> {
    if region.is_empty() || frames == 0 {
        return Ok(());
    }
    let plane_len = dims.rows * dims.cols;
    let positions = region.rows * region.cols;
    let mut tubes = vec![T::default(); positions * frames];
    for f in 0..frames {
        for r in 0..region.rows {
            let src = f * plane_len + (region.row + r) * dims.cols + region.col;
            for c in 0..region.cols {
                tubes[(r * region.cols + c) * frames + f] = data[src + c];
            }
        }
    }

    lift_lines(&mut tubes, frames, positions, frames, phase, wavelet, direction)?;

    for f in 0..frames {
        for r in 0..region.rows {
            let dst = f * plane_len + (region.row + r) * dims.cols + region.col;
            for c in 0..region.cols {
                data[dst + c] = tubes[(r * region.cols + c) * frames + f];
            }
        }
    }
    Ok(())
}

/// Lowpass lengths before each level: `sizes[k]` is the length entering level `k + 1`.
fn lowpass_chain(length: usize, levels: u32, alignment: Alignment) -> Vec<usize> {
    let mut sizes = Vec::with_capacity(levels as usize);
    let mut len = length;
    for scale in 0..levels {
        sizes.push(len);
        len = split(len, alignment.phase(scale + 1)).0;
    }
    sizes
}

/// Multi-level 1D dyadic analysis.
pub fn dwt_1d<T: LiftingSample>(
    signal: &mut [T],
    levels: u32,
    alignment: Alignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_levels(levels)?;
    let mut scratch = Vec::with_capacity(signal.len());
    for (scale, &len) in lowpass_chain(signal.len(), levels, alignment).iter().enumerate() {
        analysis_with_phase(&mut signal[..len], alignment.phase(scale as u32 + 1), wavelet, &mut scratch)?;
    }
    Ok(())
}

/// Inverse of [`dwt_1d`], scales in reverse order.
pub fn inverse_dwt_1d<T: LiftingSample>(
    signal: &mut [T],
    levels: u32,
    alignment: Alignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_levels(levels)?;
    let mut scratch = Vec::with_capacity(signal.len());
    let chain = lowpass_chain(signal.len(), levels, alignment);
    for (scale, &len) in chain.iter().enumerate().rev() {
        synthesis_with_phase(&mut signal[..len], alignment.phase(scale as u32 + 1), wavelet, &mut scratch)?;
    }
    Ok(())
}

fn plane_levels<T: LiftingSample>(
    plane: &mut [T],
    rows: usize,
    cols: usize,
    levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
    direction: Direction,
) -> Result<(), TransformError> {
    let row_chain = lowpass_chain(rows, levels, alignment.rows);
    let col_chain = lowpass_chain(cols, levels, alignment.cols);
    let mut order: Vec<usize> = (0..levels as usize).collect();
    if direction == Direction::Inverse {
        order.reverse();
    }

    for k in order {
        let region = Region::top_left(row_chain[k], col_chain[k]);
        let row_phase = alignment.rows.phase(k as u32 + 1);
        let col_phase = alignment.cols.phase(k as u32 + 1);
        match direction {
            Direction::Forward => {
                rows_pass(plane, cols, region, col_phase, wavelet, direction)?;
                cols_pass(plane, cols, region, row_phase, wavelet, direction)?;
            }
            Direction::Inverse => {
                cols_pass(plane, cols, region, row_phase, wavelet, direction)?;
                rows_pass(plane, cols, region, col_phase, wavelet, direction)?;
            }
        }
    }
    Ok(())
}

/// Multi-level 2D dyadic analysis of a `dims.rows x dims.cols` plane.
pub fn dwt_2d<T: LiftingSample>(
    data: &mut [T],
    dims: Dims,
    levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_len(data.len(), Dims::plane(dims.rows, dims.cols))?;
    check_levels(levels)?;
    debug!("dwt_2d: {}x{}, {} levels, {}", dims.rows, dims.cols, levels, wavelet);
    plane_levels(data, dims.rows, dims.cols, levels, alignment, wavelet, Direction::Forward)
}

pub fn inverse_dwt_2d<T: LiftingSample>(
    data: &mut [T],
    dims: Dims,
    levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_len(data.len(), Dims::plane(dims.rows, dims.cols))?;
    check_levels(levels)?;
    debug!("inverse_dwt_2d: {}x{}, {} levels, {}", dims.rows, dims.cols, levels, wavelet);
    plane_levels(data, dims.rows, dims.cols, levels, alignment, wavelet, Direction::Inverse)
}

/// `(offset, length)` segments along one axis after each packet level.
/// `segments[k]` holds the segments that level `k + 1` splits.
fn packet_segments(length: usize, levels: u32, alignment: Alignment) -> Vec<Vec<(usize, usize)>> {
    let mut all = Vec::with_capacity(levels as usize);
    let mut current = vec![(0, length)];
    for k in 0..levels {
        let phase = alignment.phase(k + 1);
        let next = current
            .iter()
            .flat_map(|&(offset, len)| {
                let (low, high) = split(len, phase);
                [(offset, low), (offset + low, high)]
            })
            .collect();
        all.push(std::mem::replace(&mut current, next));
    }
    all
}

fn packet_levels<T: LiftingSample>(
    plane: &mut [T],
    rows: usize,
    cols: usize,
    levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
    direction: Direction,
) -> Result<(), TransformError> {
    let row_segments = packet_segments(rows, levels, alignment.rows);
    let col_segments = packet_segments(cols, levels, alignment.cols);
    let mut order: Vec<usize> = (0..levels as usize).collect();
    if direction == Direction::Inverse {
        order.reverse();
    }

    for k in order {
        let row_phase = alignment.rows.phase(k as u32 + 1);
        let col_phase = alignment.cols.phase(k as u32 + 1);
        for &(row, nrows) in &row_segments[k] {
            for &(col, ncols) in &col_segments[k] {
                let region = Region {
                    row,
                    col,
                    rows: nrows,
                    cols: ncols,
                };
                match direction {
                    Direction::Forward => {
                        rows_pass(plane, cols, region, col_phase, wavelet, direction)?;
                        cols_pass(plane, cols, region, row_phase, wavelet, direction)?;
                    }
                    Direction::Inverse => {
                        cols_pass(plane, cols, region, row_phase, wavelet, direction)?;
                        rows_pass(plane, cols, region, col_phase, wavelet, direction)?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Full wavelet-packet analysis: every subband is split again at each level.
pub fn packet_dwt_2d<T: LiftingSample>(
    data: &mut [T],
    dims: Dims,
    levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_len(data.len(), Dims::plane(dims.rows, dims.cols))?;
    check_levels(levels)?;
    debug!("packet_dwt_2d: {}x{}, {} levels", dims.rows, dims.cols, levels);
    packet_levels(data, dims.rows, dims.cols, levels, alignment, wavelet, Direction::Forward)
}

pub fn inverse_packet_dwt_2d<T: LiftingSample>(
    data: &mut [T],
    dims: Dims,
    levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_len(data.len(), Dims::plane(dims.rows, dims.cols))?;
    check_levels(levels)?;
    packet_levels(data, dims.rows, dims.cols, levels, alignment, wavelet, Direction::Inverse)
}

/// 3D dyadic analysis: per level, a single-level 2D pass on each frame of the
/// current low cube followed by a pass along frames.
pub fn dwt_3d<T: LiftingSample>(
    data: &mut [T],
    dims: Dims,
    levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_len(data.len(), dims)?;
    check_levels(levels)?;
    debug!(
        "dwt_3d: {}x{}x{}, {} levels, {}",
        dims.frames, dims.rows, dims.cols, levels, wavelet
    );
    let frame_chain = lowpass_chain(dims.frames, levels, alignment.frames);
    let row_chain = lowpass_chain(dims.rows, levels, alignment.rows);
    let col_chain = lowpass_chain(dims.cols, levels, alignment.cols);
    let plane_len = dims.rows * dims.cols;

    for k in 0..levels as usize {
        let scale = k as u32 + 1;
        let region = Region::top_left(row_chain[k], col_chain[k]);
        for plane in data.chunks_mut(plane_len).take(frame_chain[k]) {
            rows_pass(plane, dims.cols, region, alignment.cols.phase(scale), wavelet, Direction::Forward)?;
            cols_pass(plane, dims.cols, region, alignment.rows.phase(scale), wavelet, Direction::Forward)?;
        }
        frames_pass(
            data,
            dims,
            frame_chain[k],
            region,
            alignment.frames.phase(scale),
            wavelet,
            Direction::Forward,
        )?;
    }
    Ok(())
}

/// Inverse of [`dwt_3d`]: per level, frames first, then columns, then rows.
pub fn inverse_dwt_3d<T: LiftingSample>(
    data: &mut [T],
    dims: Dims,
    levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_len(data.len(), dims)?;
    check_levels(levels)?;
    let frame_chain = lowpass_chain(dims.frames, levels, alignment.frames);
    let row_chain = lowpass_chain(dims.rows, levels, alignment.rows);
    let col_chain = lowpass_chain(dims.cols, levels, alignment.cols);
    let plane_len = dims.rows * dims.cols;

    for k in (0..levels as usize).rev() {
        let scale = k as u32 + 1;
        let region = Region::top_left(row_chain[k], col_chain[k]);
        frames_pass(
            data,
            dims,
            frame_chain[k],
            region,
            alignment.frames.phase(scale),
            wavelet,
            Direction::Inverse,
        )?;
        for plane in data.chunks_mut(plane_len).take(frame_chain[k]) {
            cols_pass(plane, dims.cols, region, alignment.rows.phase(scale), wavelet, Direction::Inverse)?;
            rows_pass(plane, dims.cols, region, alignment.cols.phase(scale), wavelet, Direction::Inverse)?;
        }
    }
    Ok(())
}

/// 3D packet analysis: full 2D dyadic on every frame, then a full 1D dyadic
/// transform along frames at every spatial position.
pub fn packet_dwt_3d<T: LiftingSample>(
    data: &mut [T],
    dims: Dims,
    spatial_levels: u32,
    temporal_levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_len(data.len(), dims)?;
    check_levels(spatial_levels)?;
    check_levels(temporal_levels)?;
    debug!(
        "packet_dwt_3d: {}x{}x{}, {} spatial / {} temporal levels",
        dims.frames, dims.rows, dims.cols, spatial_levels, temporal_levels
    );
    let plane_len = dims.rows * dims.cols;
    for plane in data.chunks_mut(plane_len) {
        plane_levels(plane, dims.rows, dims.cols, spatial_levels, alignment, wavelet, Direction::Forward)?;
    }

    let region = Region::top_left(dims.rows, dims.cols);
    let chain = lowpass_chain(dims.frames, temporal_levels, alignment.frames);
    for (k, &frames) in chain.iter().enumerate() {
        let phase = alignment.frames.phase(k as u32 + 1);
        frames_pass(data, dims, frames, region, phase, wavelet, Direction::Forward)?;
    }
    Ok(())
}

pub fn inverse_packet_dwt_3d<T: LiftingSample>(
    data: &mut [T],
    dims: Dims,
    spatial_levels: u32,
    temporal_levels: u32,
    alignment: &AxisAlignment,
    wavelet: &Wavelet,
) -> Result<(), TransformError> {
    check_len(data.len(), dims)?;
    check_levels(spatial_levels)?;
    check_levels(temporal_levels)?;
    let region = Region::top_left(dims.rows, dims.cols);
    let chain = lowpass_chain(dims.frames, temporal_levels, alignment.frames);
    for (k, &frames) in chain.iter().enumerate().rev() {
        let phase = alignment.frames.phase(k as u32 + 1);
        frames_pass(data, dims, frames, region, phase, wavelet, Direction::Inverse)?;
    }

    let plane_len = dims.rows * dims.cols;
    for plane in data.chunks_mut(plane_len) {
        plane_levels(plane, dims.rows, dims.cols, spatial_levels, alignment, wavelet, Direction::Inverse)?;
    }
    Ok(())
}
