// src/utils/buffer.rs

//! Dense sample buffers for 1, 2 and 3 dimensional data.
//!
//! Samples are stored frame-major, then row-major: element `(f, r, c)` lives at
//! `f * rows * cols + r * cols + c`. A 1D signal is a single row, a 2D image a
//! single frame.

use crate::utils::error::{CodecError, Result};

/// Largest sample count whose `f64` buffer fits in an allocation.
pub const MAX_SAMPLES: usize = isize::MAX as usize / std::mem::size_of::<f64>();

/// Extent of a sample buffer. Every field is at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims {
    pub frames: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Dims {
    pub fn line(len: usize) -> Self {
        Self { frames: 1, rows: 1, cols: len }
    }

    pub fn plane(rows: usize, cols: usize) -> Self {
        Self { frames: 1, rows, cols }
    }

    pub fn volume(frames: usize, rows: usize, cols: usize) -> Self {
        Self { frames, rows, cols }
    }

    pub fn len(&self) -> usize {
        self.frames * self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of meaningful axes: 1 for a line, 2 for a plane, 3 otherwise.
    pub fn rank(&self) -> usize {
        if self.frames > 1 {
            3
        } else if self.rows > 1 {
            2
        } else {
            1
        }
    }

    /// Sample count, or `None` when a buffer of `f64` this large cannot be allocated.
    pub fn checked_len(&self) -> Option<usize> {
        let len = self.frames.checked_mul(self.rows)?.checked_mul(self.cols)?;
        (len <= MAX_SAMPLES).then_some(len)
    }

    /// Rejects zero-sized and unallocatable extents.
    pub fn validate(&self) -> Result<()> {
        if self.frames == 0 || self.rows == 0 || self.cols == 0 {
            return Err(CodecError::config(format!(
                "dimensions must be positive, got {}x{}x{}",
                self.frames, self.rows, self.cols
            )));
        }
        if self.checked_len().is_none() {
            return Err(CodecError::config(format!(
                "dimensions {}x{}x{} are too large",
                self.frames, self.rows, self.cols
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn index(&self, frame: usize, row: usize, col: usize) -> usize {
        (frame * self.rows + row) * self.cols + col
    }
}

/// A fixed-size N-dimensional array of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleArray<T> {
    dims: Dims,
    data: Vec<T>,
}

impl<T: Copy + Default> SampleArray<T> {
    /// Allocates a zero-filled buffer.
    pub fn zeros(dims: Dims) -> Result<Self> {
        dims.validate()?;
        Ok(Self {
            dims,
            data: vec![T::default(); dims.len()],
        })
    }

    /// Wraps an existing vector, checking that its length matches `dims`.
    pub fn from_vec(dims: Dims, data: Vec<T>) -> Result<Self> {
        dims.validate()?;
        if data.len() != dims.len() {
            return Err(CodecError::config(format!(
                "buffer holds {} samples but {}x{}x{} requires {}",
                data.len(),
                dims.frames,
                dims.rows,
                dims.cols,
                dims.len()
            )));
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, frame: usize, row: usize, col: usize) -> T {
        self.data[self.dims.index(frame, row, col)]
    }

    #[inline]
    pub fn set(&mut self, frame: usize, row: usize, col: usize, value: T) {
        let idx = self.dims.index(frame, row, col);
        self.data[idx] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Element-wise conversion into another sample type.
    pub fn map<U: Copy + Default>(&self, f: impl Fn(T) -> U) -> SampleArray<U> {
        SampleArray {
            dims: self.dims,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }
}
