//! Kernel dispatch strategies.
//!
//! Both strategies compute `C = A * B` over `i32` with identical results:
//!
//! - [`explicit::ExplicitDispatch`]: device buffers, explicit copies and a
//!   kernel launched over an [`ExecutionGrid`] of one unit per output element.
//! - [`offload::DirectiveOffload`]: a collapsed `(row, col)` loop nest run on an
//!   offload target, with inputs mapped to it and the output mapped back
//!   implicitly.

pub mod explicit;
pub mod offload;

pub use crate::device::ExecutionGrid;
pub use explicit::ExplicitDispatch;
pub use offload::DirectiveOffload;

use crate::error::TrialError;
use crate::matrix::{HostMatrix, MatMulDims};

/// A way of computing `A (rows x inner) * B (inner x cols)`.
pub trait MatMulDispatch: Send + Sync {
    /// Short strategy name for logs.
    fn name(&self) -> &'static str;

    /// Compute the product of two host matrices.
    fn dispatch(
        &self,
        a: &HostMatrix,
        b: &HostMatrix,
        dims: &MatMulDims,
    ) -> Result<HostMatrix, TrialError>;
}
