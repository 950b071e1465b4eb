//! Host-side ground truth for validating device results.

use crate::error::HarnessError;
use crate::matrix::{HostMatrix, MatMulDims};

/// Compute `A * B` on the host.
///
/// Iterates column-outer, row-inner, `k` innermost, with wrapping `i32`
/// arithmetic so results agree bit-for-bit with device integer math.
pub fn multiply(a: &HostMatrix, b: &HostMatrix, dims: &MatMulDims) -> Result<HostMatrix, HarnessError> {
    dims.check_operands(a, b)?;
    let MatMulDims { rows, inner, cols } = *dims;
    let (a, b) = (a.as_slice(), b.as_slice());

    let mut out = vec![0i32; rows * cols];
    for j in 0..cols {
        for i in 0..rows {
            let mut value = 0i32;
            for k in 0..inner {
                value = value.wrapping_add(a[i * inner + k].wrapping_mul(b[k * cols + j]));
            }
            out[i * cols + j] = value;
        }
    }
    HostMatrix::new(rows, cols, out)
}
