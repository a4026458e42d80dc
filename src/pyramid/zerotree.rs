// src/pyramid/zerotree.rs

//! Spatial-orientation trees over a subband pyramid.
//!
//! Every coefficient carries a symbol that can be nulled without being lost:
//! carving out a zerotree nulls all descendants of a root, undoing it restores
//! them. Traversals use an explicit stack.

use std::ops::Range;

use log::trace;

use super::subband_pyramid::SubbandPyramid;
use crate::transform::LiftingSample;
use crate::utils::buffer::Dims;

/// Coefficient position as `(subband, row, col)`, row/col relative to the subband.
pub type Node = (usize, usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Significant,
    Insignificant,
    /// Insignificant together with every descendant.
    ZerotreeRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cell {
    symbol: Symbol,
    null: bool,
}

#[derive(Debug, Clone)]
pub struct Zerotree {
    num_levels: u32,
    sizes: Vec<(usize, usize)>,
    cells: Vec<Vec<Cell>>,
}

impl Zerotree {
    /// A full tree (every symbol significant, nothing nulled) shaped like `pyramid`.
    pub fn for_pyramid<T: LiftingSample>(pyramid: &SubbandPyramid<T>) -> Self {
        let sizes: Vec<(usize, usize)> = (0..pyramid.num_subbands()).map(|s| pyramid.subband_size(s)).collect();
        let cells = sizes
            .iter()
            .map(|&(r, c)| {
                vec![
                    Cell {
                        symbol: Symbol::Significant,
                        null: false,
                    };
                    r * c
                ]
            })
            .collect();
        Self {
            num_levels: pyramid.num_levels(),
            sizes,
            cells,
        }
    }

    /// Symbol map of `pyramid` at `threshold`: maximal zerotrees become roots
    /// and their descendants are nulled.
    pub fn from_significance(pyramid: &SubbandPyramid<f64>, threshold: f64) -> Self {
        let mut tree = Self::for_pyramid(pyramid);
        let num_subbands = tree.num_subbands();

        // finest subbands first so children are settled before parents
        let mut zero_subtree: Vec<Vec<bool>> = tree.sizes.iter().map(|&(r, c)| vec![false; r * c]).collect();
        for s in (0..num_subbands).rev() {
            let (rows, cols) = tree.sizes[s];
            for r in 0..rows {
                for c in 0..cols {
                    let insignificant = pyramid.subband_coefficient(s, r, c).abs() < threshold;
                    let idx = r * cols + c;
                    tree.cells[s][idx].symbol = if insignificant {
                        Symbol::Insignificant
                    } else {
                        Symbol::Significant
                    };
                    let all_zero = insignificant
                        && tree
                            .children(s, r, c)
                            .iter()
                            .all(|&(cs, cr, cc)| zero_subtree[cs][cr * tree.sizes[cs].1 + cc]);
                    zero_subtree[s][idx] = all_zero;
                }
            }
        }

        for s in 0..num_subbands {
            let (rows, cols) = tree.sizes[s];
            for r in 0..rows {
                for c in 0..cols {
                    let idx = r * cols + c;
                    if tree.cells[s][idx].null || !zero_subtree[s][idx] || tree.is_leaf(s) {
                        continue;
                    }
                    tree.cells[s][idx].symbol = Symbol::ZerotreeRoot;
                    tree.carve_out(s, r, c);
                }
            }
        }
        trace!("zerotree at threshold {}: {} roots", threshold, tree.count_roots());
        tree
    }

    pub fn num_subbands(&self) -> usize {
        self.sizes.len()
    }

    pub fn num_levels(&self) -> u32 {
        self.num_levels
    }

    /// A subband is a leaf when nothing finer hangs below it.
    pub fn is_leaf(&self, subband: usize) -> bool {
        if subband == 0 {
            self.num_levels == 0
        } else {
            subband + 3 >= self.num_subbands()
        }
    }

    /// Odd-sized subbands have one extra row or column of children; they hang
    /// from the last parent row or column.
    pub fn parent(&self, subband: usize, row: usize, col: usize) -> Option<Node> {
        let (parent, scale) = match subband {
            0 => return None,
            1..=3 => (0, 1),
            s => (s - 3, 2),
        };
        let (rows, cols) = self.sizes[parent];
        Some((parent, (row / scale).min(rows - 1), (col / scale).min(cols - 1)))
    }

    pub fn children(&self, subband: usize, row: usize, col: usize) -> Vec<Node> {
        let (parent_rows, parent_cols) = self.sizes[subband];
        let (first, last, scale) = if subband == 0 {
            (1, self.num_subbands().min(4), 1)
        } else {
            (subband + 3, (subband + 4).min(self.num_subbands()), 2)
        };

        let mut out = Vec::with_capacity(4);
        for child in first..last {
            let (rows, cols) = self.sizes[child];
            for r in child_span(row, parent_rows, rows, scale) {
                for c in child_span(col, parent_cols, cols, scale) {
                    out.push((child, r, c));
                }
            }
        }
        out
    }

    pub fn descendants(&self, subband: usize, row: usize, col: usize) -> Vec<Node> {
        let mut out = Vec::new();
        let mut stack = self.children(subband, row, col);
        while let Some(node) = stack.pop() {
            stack.extend(self.children(node.0, node.1, node.2));
            out.push(node);
        }
        out
    }

    /// Symbol at a node, `None` when nulled.
    pub fn symbol(&self, subband: usize, row: usize, col: usize) -> Option<Symbol> {
        let cell = self.cells[subband][row * self.sizes[subband].1 + col];
        (!cell.null).then_some(cell.symbol)
    }

    pub fn set_symbol(&mut self, subband: usize, row: usize, col: usize, symbol: Symbol) {
        let cols = self.sizes[subband].1;
        self.cells[subband][row * cols + col].symbol = symbol;
    }

    fn set_null(&mut self, nodes: &[Node], null: bool) {
        for &(s, r, c) in nodes {
            let cols = self.sizes[s].1;
            self.cells[s][r * cols + c].null = null;
        }
    }

    /// Nulls every descendant of `(subband, row, col)`.
    pub fn carve_out(&mut self, subband: usize, row: usize, col: usize) {
        let nodes = self.descendants(subband, row, col);
        self.set_null(&nodes, true);
    }

    /// Restores every descendant nulled by [`carve_out`](Self::carve_out).
    pub fn undo(&mut self, subband: usize, row: usize, col: usize) {
        let nodes = self.descendants(subband, row, col);
        self.set_null(&nodes, false);
    }

    pub fn count_roots(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| !cell.null && cell.symbol == Symbol::ZerotreeRoot)
            .count()
    }
}

/// Child positions along one axis of the node at `parent` in a band of
/// `parent_len`. The last parent also takes whatever the band below has left.
fn child_span(parent: usize, parent_len: usize, child_len: usize, scale: usize) -> Range<usize> {
    let start = parent * scale;
    let end = if parent + 1 == parent_len {
        child_len
    } else {
        (start + scale).min(child_len)
    };
    start.min(end)..end
}

/// Position-based 3D tree over a dyadically decomposed volume.
///
/// Baseband positions have up to seven children, one in each detail band of the
/// coarsest level. Every other position has the co-located 2x2x2 block one
/// level finer, widened at the far edge of odd-sized bands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeTree {
    dims: Dims,
    levels: usize,
    /// Lowpass extent per axis `[frame, row, col]` after each level, finest first.
    lowpass: [Vec<usize>; 3],
}

/// Volume position as `(frame, row, col)`.
pub type Voxel = (usize, usize, usize);

impl VolumeTree {
    /// `levels` is clamped to what the shortest axis allows.
    pub fn new(dims: Dims, levels: u32) -> Self {
        let extents = [dims.frames, dims.rows, dims.cols];
        let limit = extents.iter().map(|&n| max_halvings(n)).min().unwrap_or(0);
        let levels = (levels as usize).min(limit);
        let lowpass = extents.map(|mut len| {
            let mut chain = vec![len];
            for _ in 0..levels {
                len -= len / 2;
                chain.push(len);
            }
            chain
        });
        Self { dims, levels, lowpass }
    }

    pub fn baseband(&self) -> Dims {
        let [f, r, c] = self.lowpass.each_ref().map(|chain| chain[self.levels]);
        Dims::volume(f, r, c)
    }

    fn inside(&self, voxel: [usize; 3], level: usize) -> bool {
        (0..3).all(|a| voxel[a] < self.lowpass[a][level])
    }

    /// 0 for the baseband, otherwise the decomposition level, 1 being finest.
    fn level_of(&self, voxel: [usize; 3]) -> usize {
        if self.inside(voxel, self.levels) {
            return 0;
        }
        (1..=self.levels).rev().find(|&j| self.inside(voxel, j - 1)).unwrap_or(1)
    }

    pub fn parent(&self, (f, r, c): Voxel) -> Option<Voxel> {
        let voxel = [f, r, c];
        let level = self.level_of(voxel);
        if level == 0 {
            return None;
        }
        let mut parent = [0; 3];
        for a in 0..3 {
            let chain = &self.lowpass[a];
            let p = voxel[a];
            parent[a] = if level == self.levels {
                let q = if p < chain[level] { p } else { p - chain[level] };
                q.min(chain[level] - 1)
            } else if p < chain[level] {
                (p / 2).min(chain[level + 1] - 1)
            } else {
                let high = chain[level] - chain[level + 1];
                chain[level + 1] + ((p - chain[level]) / 2).min(high - 1)
            };
        }
        Some((parent[0], parent[1], parent[2]))
    }

    pub fn children(&self, (f, r, c): Voxel) -> Vec<Voxel> {
        let voxel = [f, r, c];
        let level = self.level_of(voxel);
        if self.levels == 0 || level == 1 {
            return Vec::new();
        }

        let spans: [Vec<Range<usize>>; 3] = std::array::from_fn(|a| {
            let chain = &self.lowpass[a];
            let p = voxel[a];
            if level == 0 {
                let coarsest = self.levels;
                let base = chain[coarsest];
                let high = chain[coarsest - 1] - base;
                let shift = |span: Range<usize>| span.start + base..span.end + base;
                vec![child_span(p, base, base, 1), shift(child_span(p, base, high, 1))]
            } else if p < chain[level] {
                vec![child_span(p, chain[level], chain[level - 1], 2)]
            } else {
                let q = p - chain[level];
                let parent_high = chain[level - 1] - chain[level];
                let child_high = chain[level - 2] - chain[level - 1];
                let span = child_span(q, parent_high, child_high, 2);
                vec![span.start + chain[level - 1]..span.end + chain[level - 1]]
            }
        });

        let mut out = Vec::with_capacity(8);
        for (df, frames) in spans[0].iter().enumerate() {
            for (dr, rows) in spans[1].iter().enumerate() {
                for (dc, cols) in spans[2].iter().enumerate() {
                    // baseband to baseband is not an edge
                    if level == 0 && df + dr + dc == 0 {
                        continue;
                    }
                    for cf in frames.clone() {
                        for cr in rows.clone() {
                            for cc in cols.clone() {
                                out.push((cf, cr, cc));
                            }
                        }
                    }
                }
            }
        }
        debug_assert!(out.iter().all(|&(f, r, c)| f < self.dims.frames && r < self.dims.rows && c < self.dims.cols));
        out
    }

    pub fn descendants(&self, voxel: Voxel) -> Vec<Voxel> {
        let mut out = Vec::new();
        let mut stack = self.children(voxel);
        while let Some(v) = stack.pop() {
            stack.extend(self.children(v));
            out.push(v);
        }
        out
    }
}

fn max_halvings(mut len: usize) -> usize {
    let mut levels = 0;
    while len > 1 {
        len -= len / 2;
        levels += 1;
    }
    levels
}
