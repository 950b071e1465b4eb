//! Device buffer acquisition and release.
//!
//! A [`DeviceBuffer`] is exclusively owned by the trial that allocated it and
//! is released by value. Release can be switched off at runtime: some
//! accelerator runtimes do not tolerate their free primitive being called
//! concurrently from independent tasks, and in that mode every trial leaks its
//! buffers on purpose. The manager counts what it leaked.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::device::{Accelerator, DeviceError, DevicePtr};
use crate::matrix::MatMulDims;

/// Status of an allocation whose byte size does not fit `usize`. It never
/// reaches the accelerator.
pub const ALLOCATION_OVERFLOW: i32 = -2;

/// Accelerator-resident region sized for `len` `i32` elements.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    ptr: DevicePtr,
    len: usize,
}

impl DeviceBuffer {
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Capacity in elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity in bytes.
    pub fn byte_len(&self) -> usize {
        self.len * std::mem::size_of::<i32>()
    }
}

/// The three per-trial allocations. `None` marks an allocation that failed.
#[derive(Debug, Default)]
pub struct TrialBuffers {
    pub a: Option<DeviceBuffer>,
    pub b: Option<DeviceBuffer>,
    pub c: Option<DeviceBuffer>,
    /// Error of the first allocation that failed.
    pub first_error: Option<DeviceError>,
}

impl TrialBuffers {
    /// All three buffers, if every allocation succeeded.
    pub fn all(&self) -> Option<(&DeviceBuffer, &DeviceBuffer, &DeviceBuffer)> {
        match (&self.a, &self.b, &self.c) {
            (Some(a), Some(b), Some(c)) => Some((a, b, c)),
            _ => None,
        }
    }

    /// All three buffers, or the error of the first failed allocation.
    pub fn require(&self) -> Result<(&DeviceBuffer, &DeviceBuffer, &DeviceBuffer), DeviceError> {
        self.all().ok_or_else(|| {
            self.first_error
                .clone()
                .unwrap_or_else(|| DeviceError::new(-1, "device buffer missing"))
        })
    }

    /// Number of successful allocations held.
    pub fn held(&self) -> usize {
        [&self.a, &self.b, &self.c]
            .iter()
            .filter(|b| b.is_some())
            .count()
    }
}

/// Acquires and releases device memory on one accelerator.
pub struct DeviceBufferManager {
    accel: Arc<dyn Accelerator>,
    release_device_memory: bool,
    leaked: AtomicUsize,
}

impl DeviceBufferManager {
    pub fn new(accel: Arc<dyn Accelerator>, release_device_memory: bool) -> Self {
        debug!(
            backend = accel.name(),
            release_device_memory, "Initialized DeviceBufferManager"
        );
        Self {
            accel,
            release_device_memory,
            leaked: AtomicUsize::new(0),
        }
    }

    pub fn releases_memory(&self) -> bool {
        self.release_device_memory
    }

    /// Buffers deliberately leaked so far because release is disabled.
    pub fn leaked(&self) -> usize {
        self.leaked.load(Ordering::SeqCst)
    }

    /// Allocate room for `element_count` `i32` values.
    ///
    /// Failure is logged with the runtime's error string and returned; it is
    /// never fatal.
    pub fn allocate(&self, element_count: usize) -> Result<DeviceBuffer, DeviceError> {
        let bytes = element_count
            .checked_mul(std::mem::size_of::<i32>())
            .ok_or_else(|| {
                warn!(element_count, "Device allocation size overflows usize");
                DeviceError::new(ALLOCATION_OVERFLOW, "allocation size overflows usize")
            })?;
        match self.accel.mem_alloc(bytes) {
            Ok(ptr) => {
                trace!(ptr = format_args!("{:#x}", ptr), element_count, "Allocated device buffer");
                Ok(DeviceBuffer {
                    ptr,
                    len: element_count,
                })
            }
            Err(e) => {
                warn!(backend = self.accel.name(), error = %e, element_count, "Device allocation failed");
                Err(e)
            }
        }
    }

    /// Release a buffer. `None` (a failed allocation) is a no-op.
    ///
    /// With release disabled the buffer is leaked and counted. A failing free
    /// is logged, not propagated.
    pub fn release(&self, buffer: Option<DeviceBuffer>) {
        let Some(buffer) = buffer else {
            return;
        };
        if !self.release_device_memory {
            self.leaked.fetch_add(1, Ordering::SeqCst);
            trace!(ptr = format_args!("{:#x}", buffer.ptr), "Leaking device buffer (release disabled)");
            return;
        }
        if let Err(e) = self.accel.mem_free(buffer.ptr) {
            warn!(backend = self.accel.name(), error = %e, "Failed to free device buffer");
        }
    }

    /// Allocate A, B and C for one trial.
    ///
    /// All three allocations are attempted even after a failure so that the
    /// trial can release exactly what it obtained.
    pub fn allocate_trial(&self, dims: &MatMulDims) -> TrialBuffers {
        let mut first_error = None;
        let mut attempt = |element_count| match self.allocate(element_count) {
            Ok(buf) => Some(buf),
            Err(e) => {
                first_error.get_or_insert(e);
                None
            }
        };
        let a = attempt(dims.a_len());
        let b = attempt(dims.b_len());
        let c = attempt(dims.c_len());
        TrialBuffers {
            a,
            b,
            c,
            first_error,
        }
    }

    /// Release whatever a trial managed to allocate.
    pub fn release_trial(&self, buffers: TrialBuffers) {
        let TrialBuffers { a, b, c, .. } = buffers;
        self.release(a);
        self.release(b);
        self.release(c);
    }
}
