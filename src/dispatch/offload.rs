//! Strategy B: directive-style offloaded loop nest.
//!
//! Models `target data map(to: A, B) map(tofrom: C)` around a
//! `teams distribute parallel for collapse(2)` over `(row, col)`. Entering a
//! [`TargetRegion`] copies the mapped host data to the target; leaving it
//! copies `C` back. The collapsed iteration space of `rows * cols` points is
//! distributed over a rayon pool and every point accumulates into its output
//! element, so callers zero `C` first.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, trace};

use super::MatMulDispatch;
use crate::error::{HarnessError, TrialError};
use crate::matrix::{HostMatrix, MatMulDims};

/// Target-resident copies of the mapped regions.
struct TargetRegion {
    a: Vec<i32>,
    b: Vec<i32>,
    c: Vec<i32>,
}

impl TargetRegion {
    /// Map `a` and `b` to the target and `c` tofrom.
    fn enter(a: &HostMatrix, b: &HostMatrix, c: &HostMatrix) -> Self {
        trace!(a = a.len(), b = b.len(), c = c.len(), "Entering target data region");
        Self {
            a: a.as_slice().to_vec(),
            b: b.as_slice().to_vec(),
            c: c.as_slice().to_vec(),
        }
    }

    /// Run the collapsed `(row, col)` loop nest on the target.
    fn run(&mut self, dims: &MatMulDims) {
        let MatMulDims { inner, cols, .. } = *dims;
        let (a, b) = (&self.a, &self.b);
        self.c.par_iter_mut().enumerate().for_each(|(idx, out)| {
            let (i, j) = (idx / cols, idx % cols);
            for k in 0..inner {
                *out = out.wrapping_add(a[i * inner + k].wrapping_mul(b[k * cols + j]));
            }
        });
    }

    /// Leave the region, copying `C` back to the host.
    fn exit(self, c: &mut HostMatrix) {
        c.as_mut_slice().copy_from_slice(&self.c);
        trace!(c = self.c.len(), "Exited target data region");
    }
}

/// Offload `C += A * B` as a collapsed loop nest.
///
/// `C` is accumulated into, not overwritten.
pub fn compute_offloaded(
    a: &HostMatrix,
    b: &HostMatrix,
    c: &mut HostMatrix,
    dims: &MatMulDims,
) -> Result<(), HarnessError> {
    dims.check_operands(a, b)?;
    dims.check_output(c)?;

    let mut region = TargetRegion::enter(a, b, c);
    region.run(dims);
    region.exit(c);
    Ok(())
}

/// Directive-offload strategy, optionally pinned to a specific rayon pool.
#[derive(Default)]
pub struct DirectiveOffload {
    pool: Option<Arc<ThreadPool>>,
}

impl DirectiveOffload {
    /// Run on rayon's global pool.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Run inside `pool`.
    pub fn with_pool(pool: Arc<ThreadPool>) -> Self {
        Self { pool: Some(pool) }
    }
}

impl MatMulDispatch for DirectiveOffload {
    fn name(&self) -> &'static str {
        "offload"
    }

    fn dispatch(
        &self,
        a: &HostMatrix,
        b: &HostMatrix,
        dims: &MatMulDims,
    ) -> Result<HostMatrix, TrialError> {
        dims.validate()?;
        let mut c = HostMatrix::zeros(dims.rows, dims.cols);
        debug!(%dims, "Offloading matrix multiply loop nest");
        match &self.pool {
            Some(pool) => pool.install(|| compute_offloaded(a, b, &mut c, dims))?,
            None => compute_offloaded(a, b, &mut c, dims)?,
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_offloaded_identity() {
        let a = HostMatrix::from_rows(&[&[1, 2, 3], &[4, 5, 6], &[7, 8, 9]]).unwrap();
        let mut c = HostMatrix::zeros(3, 3);
        compute_offloaded(&a, &HostMatrix::identity(3), &mut c, &MatMulDims::square(3)).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_compute_offloaded_accumulates() {
        let a = HostMatrix::from_rows(&[&[2]]).unwrap();
        let b = HostMatrix::from_rows(&[&[3]]).unwrap();
        let mut c = HostMatrix::from_rows(&[&[10]]).unwrap();
        compute_offloaded(&a, &b, &mut c, &MatMulDims::new(1, 1, 1)).unwrap();
        assert_eq!(c.as_slice(), &[16]);
    }

    #[test]
    fn test_compute_offloaded_rectangular() {
        let a = HostMatrix::from_rows(&[&[1, 2, 3], &[4, 5, 6]]).unwrap();
        let b = HostMatrix::from_rows(&[&[7, 8], &[9, 10], &[11, 12]]).unwrap();
        let mut c = HostMatrix::zeros(2, 2);
        compute_offloaded(&a, &b, &mut c, &MatMulDims::new(2, 3, 2)).unwrap();
        assert_eq!(c.as_slice(), &[58, 64, 139, 154]);
    }

    #[test]
    fn test_compute_offloaded_rejects_wrong_output_shape() {
        let a = HostMatrix::zeros(2, 3);
        let b = HostMatrix::zeros(3, 2);
        let mut c = HostMatrix::zeros(3, 3);
        assert!(compute_offloaded(&a, &b, &mut c, &MatMulDims::new(2, 3, 2)).is_err());
    }

    #[test]
    fn test_dispatch_zeroes_output_first() {
        let strategy = DirectiveOffload::new();
        let a = HostMatrix::from_rows(&[&[1, 1], &[1, 1]]).unwrap();
        let dims = MatMulDims::square(2);
        let first = strategy.dispatch(&a, &a, &dims).unwrap();
        let second = strategy.dispatch(&a, &a, &dims).unwrap();
        assert_eq!(first.as_slice(), &[2, 2, 2, 2]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_dispatch_on_dedicated_pool() {
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap());
        let strategy = DirectiveOffload::with_pool(pool);
        let a = HostMatrix::from_rows(&[&[1, 2], &[3, 4]]).unwrap();
        let c = strategy
            .dispatch(&a, &HostMatrix::identity(2), &MatMulDims::square(2))
            .unwrap();
        assert_eq!(c, a);
    }
}
