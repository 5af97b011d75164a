//! Matrices over GF(2^8)
//!
//! Dense row-major matrices used to build coding matrices and to invert the
//! decode sub-matrix during recovery.

use super::galois;

/// Row-major matrix of field elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<u8>,
}

impl Matrix {
    /// All-zero matrix
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0u8; rows * cols],
        }
    }

    /// Square identity matrix
    pub fn identity(size: usize) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m.set(i, i, 1);
        }
        m
    }

    /// Vandermonde matrix with row `r` equal to `[r^0, r^1, ..., r^(cols-1)]`.
    ///
    /// Any `cols` rows are linearly independent as long as `rows <= 256`.
    pub fn vandermonde(rows: usize, cols: usize) -> Self {
        let mut m = Self::zeros(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                m.set(r, c, galois::exp(r as u8, c));
            }
        }
        m
    }

    /// Build from explicit rows; all rows must share one length
    pub fn from_rows(rows: &[Vec<u8>]) -> Option<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        Some(Self {
            rows: rows.len(),
            cols,
            data: rows.iter().flatten().copied().collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> u8 {
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, value: u8) {
        self.data[r * self.cols + c] = value;
    }

    /// Borrow one row
    pub fn row(&self, r: usize) -> &[u8] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Matrix product `self * rhs`, `None` on dimension mismatch
    pub fn multiply(&self, rhs: &Matrix) -> Option<Matrix> {
        if self.cols != rhs.rows {
            return None;
        }
        let mut out = Matrix::zeros(self.rows, rhs.cols);
        for r in 0..self.rows {
            for c in 0..rhs.cols {
                let mut acc = 0u8;
                for k in 0..self.cols {
                    acc = galois::add(acc, galois::mul(self.get(r, k), rhs.get(k, c)));
                }
                out.set(r, c, acc);
            }
        }
        Some(out)
    }

    /// New matrix made of the selected rows, in the given order
    pub fn select_rows(&self, indexes: &[usize]) -> Matrix {
        let mut out = Matrix::zeros(indexes.len(), self.cols);
        for (dst, &src) in indexes.iter().enumerate() {
            out.data[dst * self.cols..(dst + 1) * self.cols].copy_from_slice(self.row(src));
        }
        out
    }

    /// Rank via forward elimination on a scratch copy
    pub fn rank(&self) -> usize {
        let mut work = self.clone();
        let mut rank = 0;

        for col in 0..work.cols {
            if rank == work.rows {
                break;
            }
            let Some(pivot) = (rank..work.rows).find(|&r| work.get(r, col) != 0) else {
                continue;
            };
            work.swap_rows(rank, pivot);

            let pivot_inv = match galois::inverse(work.get(rank, col)) {
                Some(v) => v,
                None => continue,
            };
            for r in rank + 1..work.rows {
                let factor = galois::mul(work.get(r, col), pivot_inv);
                if factor != 0 {
                    work.add_scaled_row(rank, r, factor);
                }
            }
            rank += 1;
        }

        rank
    }

    /// Gauss-Jordan inversion, `None` if the matrix is not square or singular
    pub fn invert(&self) -> Option<Matrix> {
        if self.rows != self.cols {
            return None;
        }
        let n = self.rows;
        let mut work = self.clone();
        let mut inv = Matrix::identity(n);

        for col in 0..n {
            let pivot = (col..n).find(|&r| work.get(r, col) != 0)?;
            if pivot != col {
                work.swap_rows(col, pivot);
                inv.swap_rows(col, pivot);
            }

            let scale = galois::inverse(work.get(col, col))?;
            work.scale_row(col, scale);
            inv.scale_row(col, scale);

            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = work.get(r, col);
                if factor != 0 {
                    work.add_scaled_row(col, r, factor);
                    inv.add_scaled_row(col, r, factor);
                }
            }
        }

        Some(inv)
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for c in 0..self.cols {
            self.data.swap(a * self.cols + c, b * self.cols + c);
        }
    }

    fn scale_row(&mut self, r: usize, factor: u8) {
        for c in 0..self.cols {
            let v = self.get(r, c);
            self.set(r, c, galois::mul(v, factor));
        }
    }

    /// `row[dst] += factor * row[src]`
    fn add_scaled_row(&mut self, src: usize, dst: usize, factor: u8) {
        for c in 0..self.cols {
            let v = galois::add(self.get(dst, c), galois::mul(factor, self.get(src, c)));
            self.set(dst, c, v);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
