//! Accelerator boundary.
//!
//! The harness consumes a small set of opaque accelerator primitives through
//! the [`Accelerator`] trait: device query, allocate/free, host<->device copy,
//! kernel launch and error-code-to-string. It never assumes anything about the
//! runtime behind them.
//!
//! Implementations exist for a host-memory simulated device (always available)
//! and for the CUDA driver API (feature `cuda`).

pub mod availability;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod sim;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

pub use availability::{check_compute_device, has_compute_device, Availability};

/// Raw device address. Zero is never a valid allocation.
pub type DevicePtr = u64;

/// Index of a device as reported by the runtime.
pub type DeviceOrdinal = i32;

/// The device the harness always runs on.
pub const DEFAULT_DEVICE: DeviceOrdinal = 0;

/// Error returned by an accelerator primitive.
///
/// `code` is the runtime's numeric status and `message` the text produced by
/// its error-code-to-string call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Device error {code}: {message}")]
pub struct DeviceError {
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Administrative compute mode of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComputeMode {
    Default,
    ExclusiveThread,
    Prohibited,
    ExclusiveProcess,
}

impl ComputeMode {
    /// Decode the runtime's integer compute-mode attribute.
    ///
    /// Unknown values are treated as `Default`: only an explicit prohibition
    /// blocks the harness.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => ComputeMode::ExclusiveThread,
            2 => ComputeMode::Prohibited,
            3 => ComputeMode::ExclusiveProcess,
            _ => ComputeMode::Default,
        }
    }
}

/// Launch geometry: one kernel instance per `(x, y)` unit, block size 1.
///
/// `x` indexes output rows and `y` output columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionGrid {
    pub x: u32,
    pub y: u32,
}

impl ExecutionGrid {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Grid with exactly one unit per element of a `rows x cols` output.
    ///
    /// Dimensions are validated to fit `u32` before any launch; larger values
    /// saturate.
    pub fn for_output(rows: usize, cols: usize) -> Self {
        Self {
            x: u32::try_from(rows).unwrap_or(u32::MAX),
            y: u32::try_from(cols).unwrap_or(u32::MAX),
        }
    }

    /// Total number of kernel instances.
    pub fn len(&self) -> u64 {
        self.x as u64 * self.y as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate every unit coordinate `(x, y)`.
    pub fn units(&self) -> impl Iterator<Item = (u32, u32)> {
        let y = self.y;
        (0..self.x).flat_map(move |i| (0..y).map(move |j| (i, j)))
    }
}

/// Arguments of the matrix-multiply kernel: three device buffers and the
/// dimensions `A (rows x inner) * B (inner x cols)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelArgs {
    pub a: DevicePtr,
    pub b: DevicePtr,
    pub c: DevicePtr,
    pub rows: u32,
    pub inner: u32,
    pub cols: u32,
}

/// Body of one kernel instance: the dot product for output `(row, col)`.
///
/// Returns `None` when the unit lies outside the output, in which case the
/// instance must not write. Uses wrapping `i32` arithmetic, matching device
/// integer semantics.
pub fn matrix_mul_unit(
    a: &[i32],
    b: &[i32],
    row: u32,
    col: u32,
    args: &KernelArgs,
) -> Option<i32> {
    if row >= args.rows || col >= args.cols {
        return None;
    }
    let (row, col) = (row as usize, col as usize);
    let (inner, cols) = (args.inner as usize, args.cols as usize);
    let mut value = 0i32;
    for k in 0..inner {
        value = value.wrapping_add(a[row * inner + k].wrapping_mul(b[k * cols + col]));
    }
    Some(value)
}

/// Opaque accelerator runtime primitives.
///
/// All calls are blocking. Implementations must be callable concurrently from
/// multiple worker threads.
pub trait Accelerator: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Resolve the current (default) device.
    fn current_device(&self) -> Result<DeviceOrdinal, DeviceError>;

    /// Query the administrative compute mode of `device`.
    fn compute_mode(&self, device: DeviceOrdinal) -> Result<ComputeMode, DeviceError>;

    /// Allocate `bytes` of device memory.
    fn mem_alloc(&self, bytes: usize) -> Result<DevicePtr, DeviceError>;

    /// Free a region returned by [`Accelerator::mem_alloc`].
    fn mem_free(&self, ptr: DevicePtr) -> Result<(), DeviceError>;

    /// Copy `src` into the device region starting at `dst`.
    fn copy_to_device(&self, dst: DevicePtr, src: &[i32]) -> Result<(), DeviceError>;

    /// Copy `dst.len()` elements from the device region at `src` into `dst`.
    fn copy_to_host(&self, dst: &mut [i32], src: DevicePtr) -> Result<(), DeviceError>;

    /// Launch the matrix-multiply kernel over `grid`.
    fn launch_matmul(&self, grid: ExecutionGrid, args: KernelArgs) -> Result<(), DeviceError>;

    /// Wait for all outstanding work on the device.
    fn synchronize(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Auto-detect the best available accelerator.
///
/// Priority: CUDA > simulated device.
pub fn select_accelerator() -> Arc<dyn Accelerator> {
    #[cfg(feature = "cuda")]
    {
        match cuda::CudaDevice::try_new() {
            Ok(device) => {
                info!("Selected CUDA accelerator");
                return Arc::new(device);
            }
            Err(e) => {
                info!(error = %e, "CUDA not available, falling back to simulated device");
            }
        }
    }

    info!("Selected simulated accelerator");
    Arc::new(sim::SimulatedDevice::new())
}
