//! Host-resident integer matrices and the dimensions of a multiplication.
//!
//! [`HostMatrix`] is a flat row-major `Vec<i32>` with its row and column count.
//! [`MatMulDims`] describes `A (rows x inner) * B (inner x cols) = C (rows x cols)`
//! and is validated once at the start of every trial.

use std::fmt;

use rand::Rng;
use serde::Serialize;
use tracing::trace;

use crate::error::HarnessError;

/// Exclusive upper bound of randomly generated elements (`rand() % 10`).
pub const DEFAULT_VALUE_BOUND: i32 = 10;

/// Dense row-major `i32` matrix living in host memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostMatrix {
    rows: usize,
    cols: usize,
    data: Vec<i32>,
}

impl HostMatrix {
    /// Create a matrix from row-major data.
    ///
    /// Returns [`HarnessError::ShapeMismatch`] if `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<i32>) -> Result<Self, HarnessError> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(HarnessError::ShapeMismatch {
                expected: vec![rows, cols],
                actual: vec![data.len()],
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Create a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0; rows * cols],
        }
    }

    /// Build a matrix from nested rows. All rows must have the same length.
    pub fn from_rows(rows: &[&[i32]]) -> Result<Self, HarnessError> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            if row.len() != n_cols {
                return Err(HarnessError::ShapeMismatch {
                    expected: vec![n_cols],
                    actual: vec![row.len()],
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(n_rows, n_cols, data)
    }

    /// Square identity matrix.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1;
        }
        m
    }

    /// Matrix with every element drawn uniformly from `[0, bound)`.
    pub fn random<R: Rng + ?Sized>(rows: usize, cols: usize, bound: i32, rng: &mut R) -> Self {
        let mut m = Self::zeros(rows, cols);
        m.randomize(bound, rng);
        m
    }

    /// Overwrite every element with a uniform sample from `[0, bound)`.
    pub fn randomize<R: Rng + ?Sized>(&mut self, bound: i32, rng: &mut R) {
        for v in self.data.iter_mut() {
            *v = rng.gen_range(0..bound);
        }
        trace!(rows = self.rows, cols = self.cols, bound, "Randomized matrix");
    }

    /// Zero every element in place.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of elements (`rows * cols`).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at `(row, col)`.
    ///
    /// # Panics
    /// Panics if the coordinate is out of bounds.
    pub fn get(&self, row: usize, col: usize) -> i32 {
        assert!(
            row < self.rows && col < self.cols,
            "index ({}, {}) out of bounds for {}x{} matrix",
            row,
            col,
            self.rows,
            self.cols
        );
        self.data[row * self.cols + col]
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [i32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<i32> {
        self.data
    }
}

/// Console dump: every row on its own line as `[a, b, c]`, each preceded by a newline.
impl fmt::Display for HostMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.data.chunks(self.cols.max(1)).take(self.rows) {
            write!(f, "\n[")?;
            for (j, v) in row.iter().enumerate() {
                if j == 0 {
                    write!(f, "{}", v)?;
                } else {
                    write!(f, ", {}", v)?;
                }
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Dimensions of `A (rows x inner) * B (inner x cols)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MatMulDims {
    pub rows: usize,
    pub inner: usize,
    pub cols: usize,
}

impl MatMulDims {
    pub fn new(rows: usize, inner: usize, cols: usize) -> Self {
        Self { rows, inner, cols }
    }

    /// Square `n x n` multiplication.
    pub fn square(n: usize) -> Self {
        Self::new(n, n, n)
    }

    /// Reject zero dimensions, element counts that overflow `usize`, and
    /// dimensions wider than the 32-bit kernel parameters.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let Self { rows, inner, cols } = *self;
        if rows == 0 || inner == 0 || cols == 0 {
            return Err(HarnessError::Config(format!(
                "matrix dimensions must be non-zero, got {}x{} * {}x{}",
                rows, inner, inner, cols
            )));
        }
        for (name, dim) in [("rows", rows), ("inner", inner), ("cols", cols)] {
            if u32::try_from(dim).is_err() {
                return Err(HarnessError::Config(format!(
                    "dimension {} = {} exceeds the kernel's 32-bit index range",
                    name, dim
                )));
            }
        }
        for (a, b) in [(rows, inner), (inner, cols), (rows, cols)] {
            if a.checked_mul(b).and_then(|n| n.checked_mul(4)).is_none() {
                return Err(HarnessError::Config(format!(
                    "matrix of {}x{} elements overflows the address space",
                    a, b
                )));
            }
        }
        Ok(())
    }

    /// Element count of A.
    pub fn a_len(&self) -> usize {
        self.rows * self.inner
    }

    /// Element count of B.
    pub fn b_len(&self) -> usize {
        self.inner * self.cols
    }

    /// Element count of C.
    pub fn c_len(&self) -> usize {
        self.rows * self.cols
    }

    /// Check that `a` and `b` have the shapes these dims describe.
    pub fn check_operands(&self, a: &HostMatrix, b: &HostMatrix) -> Result<(), HarnessError> {
        if (a.rows(), a.cols()) != (self.rows, self.inner) {
            return Err(HarnessError::ShapeMismatch {
                expected: vec![self.rows, self.inner],
                actual: vec![a.rows(), a.cols()],
            });
        }
        if (b.rows(), b.cols()) != (self.inner, self.cols) {
            return Err(HarnessError::ShapeMismatch {
                expected: vec![self.inner, self.cols],
                actual: vec![b.rows(), b.cols()],
            });
        }
        Ok(())
    }

    /// Check that `c` is shaped like the product.
    pub fn check_output(&self, c: &HostMatrix) -> Result<(), HarnessError> {
        if (c.rows(), c.cols()) != (self.rows, self.cols) {
            return Err(HarnessError::ShapeMismatch {
                expected: vec![self.rows, self.cols],
                actual: vec![c.rows(), c.cols()],
            });
        }
        Ok(())
    }
}

impl fmt::Display for MatMulDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} * {}x{}",
            self.rows, self.inner, self.inner, self.cols
        )
    }
}
