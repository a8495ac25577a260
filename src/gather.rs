//! Sparse gather descriptor and the extract/fold primitives of the exchange.
//!
//! [`GatherMap`] is an owned CSR structure whose rows are extended-halo slots
//! and whose columns are positions in a level's receive layout. Rows are
//! dense: every row is written on [`GatherMap::gather`], so a row with no
//! columns produces the operator identity rather than leaving stale data in
//! the rotated buffer.

use crate::reduce::{HaloScalar, ReduceOp};

/// Immutable CSR gather descriptor owned by a level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatherMap {
    nrows: usize,
    ncols: usize,
    row_starts: Vec<usize>,
    col_ids: Vec<usize>,
}

impl GatherMap {
    /// Build from per-row column lists.
    ///
    /// Debug builds assert that every column id lies in `[0, ncols)`.
    pub fn from_rows(rows: &[Vec<usize>], ncols: usize) -> Self {
        let nrows = rows.len();
        let mut row_starts = Vec::with_capacity(nrows + 1);
        row_starts.push(0usize);
        let mut col_ids = Vec::new();
        for cols in rows {
            for &c in cols {
                debug_assert!(c < ncols, "column {c} out of range {ncols}");
                col_ids.push(c);
            }
            row_starts.push(col_ids.len());
        }
        Self {
            nrows,
            ncols,
            row_starts,
            col_ids,
        }
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.col_ids.len()
    }

    /// Column ids of one row.
    #[inline]
    pub fn row(&self, r: usize) -> &[usize] {
        &self.col_ids[self.row_starts[r]..self.row_starts[r + 1]]
    }

    /// Reduce `k`-wide column blocks of `src` into the row blocks of `dst`.
    ///
    /// `dst` must hold at least `nrows * k` elements and `src` at least
    /// `ncols * k`.
    pub fn gather<T: HaloScalar>(&self, dst: &mut [T], src: &[T], k: usize, op: ReduceOp) {
        debug_assert!(dst.len() >= self.nrows * k);
        debug_assert!(src.len() >= self.ncols * k);
        for r in 0..self.nrows {
            let cols = &self.col_ids[self.row_starts[r]..self.row_starts[r + 1]];
            for m in 0..k {
                let mut acc = op.identity::<T>();
                for &c in cols {
                    acc = op.apply(acc, src[c * k + m]);
                }
                dst[r * k + m] = acc;
            }
        }
    }
}

/// Pack `k`-wide blocks at `ids` positions of `src` into a dense `dst`.
pub fn extract<T: HaloScalar>(ids: &[usize], src: &[T], dst: &mut [T], k: usize) {
    debug_assert!(dst.len() >= ids.len() * k);
    for (n, &id) in ids.iter().enumerate() {
        dst[n * k..(n + 1) * k].copy_from_slice(&src[id * k..(id + 1) * k]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_reduces_rows() {
        // row 0 <- cols {0, 2}; row 1 <- col 1; row 2 <- nothing
        let g = GatherMap::from_rows(&[vec![0, 2], vec![1], vec![]], 3);
        let src = [1.0f64, 10.0, 5.0];
        let mut dst = [0.0f64; 3];
        g.gather(&mut dst, &src, 1, ReduceOp::Add);
        assert_eq!(dst, [6.0, 10.0, 0.0]);
        g.gather(&mut dst, &src, 1, ReduceOp::Min);
        assert_eq!(dst, [1.0, 10.0, f64::INFINITY]);
    }

    #[test]
    fn gather_handles_blocks() {
        let g = GatherMap::from_rows(&[vec![0, 1]], 2);
        let src = [1i64, 2, 10, 20];
        let mut dst = [0i64; 2];
        g.gather(&mut dst, &src, 2, ReduceOp::Add);
        assert_eq!(dst, [11, 22]);
    }

    #[test]
    fn extract_packs_blocks() {
        let src = [0i32, 0, 7, 8, 0, 0, 9, 10];
        let mut dst = [0i32; 4];
        extract(&[3, 1], &src, &mut dst, 2);
        assert_eq!(dst, [9, 10, 7, 8]);
    }
}
