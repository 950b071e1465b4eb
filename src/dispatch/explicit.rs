//! Strategy A: explicit accelerator kernel dispatch.

use std::sync::Arc;

use tracing::{debug, warn};

use super::MatMulDispatch;
use crate::buffers::{DeviceBuffer, DeviceBufferManager, TrialBuffers};
use crate::device::{Accelerator, ExecutionGrid, KernelArgs};
use crate::error::TrialError;
use crate::matrix::{HostMatrix, MatMulDims};
use crate::transfer::TransferCoordinator;

/// Launch the matrix-multiply kernel on buffers already resident on the device.
///
/// The grid has `rows x cols` units, each owning one output coordinate. The
/// buffers must hold at least `rows*inner`, `inner*cols` and `rows*cols`
/// elements. Waits for the kernel, so asynchronous faults surface as
/// [`TrialError::Launch`].
pub fn launch(
    accel: &dyn Accelerator,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    c: &DeviceBuffer,
    dims: &MatMulDims,
) -> Result<(), TrialError> {
    if a.len() < dims.a_len() || b.len() < dims.b_len() || c.len() < dims.c_len() {
        return Err(TrialError::Shape(format!(
            "device buffers ({}, {}, {}) too small for {}",
            a.len(),
            b.len(),
            c.len(),
            dims
        )));
    }
    let grid = ExecutionGrid::for_output(dims.rows, dims.cols);
    let args = KernelArgs {
        a: a.ptr(),
        b: b.ptr(),
        c: c.ptr(),
        rows: dims.rows as u32,
        inner: dims.inner as u32,
        cols: dims.cols as u32,
    };
    debug!(backend = accel.name(), ?grid, %dims, "Launching matrix_mul");
    accel
        .launch_matmul(grid, args)
        .and_then(|()| accel.synchronize())
        .map_err(|e| {
            warn!(backend = accel.name(), error = %e, "Kernel launch failed");
            TrialError::Launch(e)
        })
}

/// Explicit-dispatch pipeline: allocate, copy in, launch, copy back, release.
pub struct ExplicitDispatch {
    accel: Arc<dyn Accelerator>,
    buffers: Arc<DeviceBufferManager>,
    transfer: TransferCoordinator,
}

impl ExplicitDispatch {
    pub fn new(accel: Arc<dyn Accelerator>, buffers: Arc<DeviceBufferManager>) -> Self {
        let transfer = TransferCoordinator::new(Arc::clone(&accel));
        Self {
            accel,
            buffers,
            transfer,
        }
    }

    pub fn buffers(&self) -> &DeviceBufferManager {
        &self.buffers
    }

    /// Copy inputs, launch and read back using an already allocated buffer set.
    ///
    /// Stops at the first failing step. Does not release anything.
    pub fn run_on(
        &self,
        buffers: &TrialBuffers,
        a: &HostMatrix,
        b: &HostMatrix,
        dims: &MatMulDims,
    ) -> Result<HostMatrix, TrialError> {
        let (dev_a, dev_b, dev_c) = buffers.require().map_err(TrialError::Allocation)?;

        self.transfer.copy_to_device(a, dev_a)?;
        self.transfer.copy_to_device(b, dev_b)?;

        launch(self.accel.as_ref(), dev_a, dev_b, dev_c, dims)?;

        let mut c = HostMatrix::zeros(dims.rows, dims.cols);
        self.transfer.copy_to_host(dev_c, &mut c)?;
        Ok(c)
    }
}

impl MatMulDispatch for ExplicitDispatch {
    fn name(&self) -> &'static str {
        "explicit"
    }

    fn dispatch(
        &self,
        a: &HostMatrix,
        b: &HostMatrix,
        dims: &MatMulDims,
    ) -> Result<HostMatrix, TrialError> {
        dims.validate()?;
        dims.check_operands(a, b)?;

        let buffers = self.buffers.allocate_trial(dims);
        let result = self.run_on(&buffers, a, b, dims);
        self.buffers.release_trial(buffers);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{FaultPlan, SimulatedDevice, UNINIT_PATTERN};

    fn setup(faults: FaultPlan, release: bool) -> (Arc<SimulatedDevice>, ExplicitDispatch) {
        let dev = Arc::new(SimulatedDevice::with_faults(faults));
        let accel: Arc<dyn Accelerator> = dev.clone();
        let buffers = Arc::new(DeviceBufferManager::new(accel.clone(), release));
        (dev, ExplicitDispatch::new(accel, buffers))
    }

    fn sample() -> (HostMatrix, HostMatrix, MatMulDims) {
        let a = HostMatrix::from_rows(&[&[1, 2, 3], &[4, 5, 6]]).unwrap();
        let b = HostMatrix::from_rows(&[&[7, 8], &[9, 10], &[11, 12]]).unwrap();
        (a, b, MatMulDims::new(2, 3, 2))
    }

    #[test]
    fn test_dispatch_rectangular() {
        let (dev, strategy) = setup(FaultPlan::default(), true);
        let (a, b, dims) = sample();
        let c = strategy.dispatch(&a, &b, &dims).unwrap();
        assert_eq!(c.as_slice(), &[58, 64, 139, 154]);
        assert_eq!(dev.live_allocations(), 0);
        assert_eq!(dev.launches(), 1);
    }

    #[test]
    fn test_dispatch_single_element() {
        let (_dev, strategy) = setup(FaultPlan::default(), true);
        let a = HostMatrix::from_rows(&[&[3]]).unwrap();
        let b = HostMatrix::from_rows(&[&[-5]]).unwrap();
        let c = strategy.dispatch(&a, &b, &MatMulDims::new(1, 1, 1)).unwrap();
        assert_eq!(c.as_slice(), &[-15]);
    }

    #[test]
    fn test_allocation_failure_skips_launch_and_releases_rest() {
        let (dev, strategy) = setup(FaultPlan::default().fail_allocation(2), true);
        let (a, b, dims) = sample();
        let err = strategy.dispatch(&a, &b, &dims).unwrap_err();
        assert!(matches!(err, TrialError::Allocation(_)));
        assert_eq!(dev.launches(), 0);
        assert_eq!(dev.live_allocations(), 0);
        assert_eq!(dev.frees(), 2);
    }

    #[test]
    fn test_initial_copy_failure_skips_launch() {
        let (dev, strategy) = setup(FaultPlan::default().fail_copy_to_device(2), true);
        let (a, b, dims) = sample();
        let err = strategy.dispatch(&a, &b, &dims).unwrap_err();
        assert!(matches!(err, TrialError::InitialCopy(_)));
        assert_eq!(dev.launches(), 0);
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn test_launch_failure_skips_copy_back() {
        let (_dev, strategy) = setup(FaultPlan::default().fail_launch(1), true);
        let (a, b, dims) = sample();
        let err = strategy.dispatch(&a, &b, &dims).unwrap_err();
        assert!(matches!(err, TrialError::Launch(_)));
    }

    #[test]
    fn test_asynchronous_kernel_fault_is_a_launch_error() {
        let (dev, strategy) = setup(FaultPlan::default().fail_synchronize(1), true);
        let (a, b, dims) = sample();
        let err = strategy.dispatch(&a, &b, &dims).unwrap_err();
        assert!(matches!(err, TrialError::Launch(_)));
        assert_eq!(dev.launches(), 1);
        assert_eq!(dev.synchronizations(), 1);
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn test_copy_back_failure() {
        let (dev, strategy) = setup(FaultPlan::default().fail_copy_to_host(1), true);
        let (a, b, dims) = sample();
        let err = strategy.dispatch(&a, &b, &dims).unwrap_err();
        assert!(matches!(err, TrialError::CopyBack(_)));
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn test_release_disabled_leaks_three_buffers() {
        let (dev, strategy) = setup(FaultPlan::default(), false);
        let (a, b, dims) = sample();
        strategy.dispatch(&a, &b, &dims).unwrap();
        assert_eq!(dev.live_allocations(), 3);
        assert_eq!(strategy.buffers().leaked(), 3);
    }

    #[test]
    fn test_invalid_dims_rejected_before_allocation() {
        let (dev, strategy) = setup(FaultPlan::default(), true);
        let a = HostMatrix::zeros(0, 0);
        let err = strategy
            .dispatch(&a, &a, &MatMulDims::new(0, 0, 0))
            .unwrap_err();
        assert!(matches!(err, TrialError::Shape(_)));
        assert_eq!(dev.allocation_calls(), 0);
    }

    #[test]
    fn test_launch_writes_only_output_elements() {
        let (dev, strategy) = setup(FaultPlan::default(), true);
        let mgr = strategy.buffers();
        let dims = MatMulDims::square(2);
        let a = mgr.allocate(4).unwrap();
        let b = mgr.allocate(4).unwrap();
        let c = mgr.allocate(8).unwrap();
        dev.copy_to_device(a.ptr(), &[1, 2, 3, 4]).unwrap();
        dev.copy_to_device(b.ptr(), &[1, 0, 0, 1]).unwrap();

        launch(dev.as_ref(), &a, &b, &c, &dims).unwrap();
        let region = dev.read_region(c.ptr()).unwrap();
        assert_eq!(&region[..4], &[1, 2, 3, 4]);
        assert!(region[4..].iter().all(|&v| v == UNINIT_PATTERN));
        for buf in [a, b, c] {
            mgr.release(Some(buf));
        }
    }

    #[test]
    fn test_launch_rejects_short_buffers() {
        let (_dev, strategy) = setup(FaultPlan::default(), true);
        let mgr = strategy.buffers();
        let small = mgr.allocate(1).unwrap();
        let err = launch(strategy.accel.as_ref(), &small, &small, &small, &MatMulDims::square(2))
            .unwrap_err();
        assert!(matches!(err, TrialError::Shape(_)));
        mgr.release(Some(small));
    }
}
