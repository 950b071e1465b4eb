//! Element-wise comparison of a device result against the reference.

use serde::Serialize;
use tracing::debug;

use crate::console::Console;
use crate::error::HarnessError;
use crate::matrix::{HostMatrix, MatMulDims};
use crate::reference;

/// One output element that differs from the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub row: usize,
    pub col: usize,
    pub expected: i32,
    pub actual: i32,
}

impl Mismatch {
    /// Signed difference `actual - expected`.
    pub fn delta(&self) -> i64 {
        self.actual as i64 - self.expected as i64
    }
}

/// List every element where `candidate` differs from `reference`.
///
/// Walks column-outer, row-inner. Each mismatch is printed as
/// `Error: Matrices miscompare devC[row,col]-hostC: delta`.
pub fn compare(
    reference: &HostMatrix,
    candidate: &HostMatrix,
    console: &Console,
) -> Result<Vec<Mismatch>, HarnessError> {
    if (reference.rows(), reference.cols()) != (candidate.rows(), candidate.cols()) {
        return Err(HarnessError::ShapeMismatch {
            expected: vec![reference.rows(), reference.cols()],
            actual: vec![candidate.rows(), candidate.cols()],
        });
    }

    let mut mismatches = Vec::new();
    for col in 0..reference.cols() {
        for row in 0..reference.rows() {
            let expected = reference.get(row, col);
            let actual = candidate.get(row, col);
            if expected != actual {
                let m = Mismatch {
                    row,
                    col,
                    expected,
                    actual,
                };
                debug!(row, col, expected, actual, "Matrix element mismatch");
                console.line(format!(
                    "\tError: Matrices miscompare devC[{},{}]-hostC: {}",
                    row,
                    col,
                    m.delta()
                ));
                mismatches.push(m);
            }
        }
    }
    Ok(mismatches)
}

/// Recompute `A * B` on the host and compare `candidate` against it.
pub fn check(
    a: &HostMatrix,
    b: &HostMatrix,
    candidate: &HostMatrix,
    dims: &MatMulDims,
    console: &Console,
) -> Result<Vec<Mismatch>, HarnessError> {
    let expected = reference::multiply(a, b, dims)?;
    compare(&expected, candidate, console)
}
