//! Simulated accelerator backed by host memory.
//!
//! Behaves like a discrete device for the harness: allocations are separate
//! regions addressed by opaque pointers, data only moves through explicit
//! copies, and kernel launches execute one unit per grid coordinate. Fresh
//! allocations are filled with [`UNINIT_PATTERN`] so unwritten output is
//! visible to verification.
//!
//! A [`FaultPlan`] injects the runtime failures the harness must survive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{debug, trace};

use super::{
    matrix_mul_unit, Accelerator, ComputeMode, DeviceError, DeviceOrdinal, DevicePtr,
    ExecutionGrid, KernelArgs, DEFAULT_DEVICE,
};

/// Value written into freshly allocated device memory.
pub const UNINIT_PATTERN: i32 = 0x7f7f_7f7f;

const BASE_ADDRESS: DevicePtr = 0x7f00_0000_0000;
const ALLOC_ALIGN: u64 = 256;

/// Runtime status codes reported by the simulated device.
///
/// Numeric values follow the HIP runtime so logs read the same as on hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SimStatus {
    InvalidValue = 1,
    OutOfMemory = 2,
    InvalidDevicePointer = 17,
    NoDevice = 100,
    LaunchFailure = 719,
}

impl SimStatus {
    /// Error-code-to-string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SimStatus::InvalidValue => "invalid argument",
            SimStatus::OutOfMemory => "out of memory",
            SimStatus::InvalidDevicePointer => "invalid device pointer",
            SimStatus::NoDevice => "no ROCm-capable device is detected",
            SimStatus::LaunchFailure => "unspecified launch failure",
        }
    }

    fn error(self) -> DeviceError {
        DeviceError::new(self as i32, self.as_str())
    }
}

/// Failures to inject into a [`SimulatedDevice`].
///
/// Ordinals are 1-based and count calls of that primitive across the whole
/// device, in the order they arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultPlan {
    device_present: bool,
    compute_mode: ComputeMode,
    fail_allocation: Option<usize>,
    fail_copy_to_device: Option<usize>,
    fail_copy_to_host: Option<usize>,
    fail_launch: Option<usize>,
    fail_synchronize: Option<usize>,
    corrupt_output: bool,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            device_present: true,
            compute_mode: ComputeMode::Default,
            fail_allocation: None,
            fail_copy_to_device: None,
            fail_copy_to_host: None,
            fail_launch: None,
            fail_synchronize: None,
            corrupt_output: false,
        }
    }
}

impl FaultPlan {
    /// No device is present: every query and primitive fails.
    pub fn no_device(mut self) -> Self {
        self.device_present = false;
        self
    }

    /// Report `mode` as the device's compute mode.
    pub fn compute_mode(mut self, mode: ComputeMode) -> Self {
        self.compute_mode = mode;
        self
    }

    /// Fail the `nth` allocation with out-of-memory.
    pub fn fail_allocation(mut self, nth: usize) -> Self {
        self.fail_allocation = Some(nth);
        self
    }

    /// Fail the `nth` host-to-device copy.
    pub fn fail_copy_to_device(mut self, nth: usize) -> Self {
        self.fail_copy_to_device = Some(nth);
        self
    }

    /// Fail the `nth` device-to-host copy.
    pub fn fail_copy_to_host(mut self, nth: usize) -> Self {
        self.fail_copy_to_host = Some(nth);
        self
    }

    /// Fail the `nth` kernel launch.
    pub fn fail_launch(mut self, nth: usize) -> Self {
        self.fail_launch = Some(nth);
        self
    }

    /// Fail the `nth` synchronize, as an asynchronous kernel fault would.
    pub fn fail_synchronize(mut self, nth: usize) -> Self {
        self.fail_synchronize = Some(nth);
        self
    }

    /// Every launch writes a wrong value into output element `(0, 0)`.
    pub fn corrupt_output(mut self) -> Self {
        self.corrupt_output = true;
        self
    }
}

/// Host-memory accelerator with fault injection and allocation accounting.
pub struct SimulatedDevice {
    faults: FaultPlan,
    memory: Mutex<HashMap<DevicePtr, Vec<i32>>>,
    next_ptr: AtomicU64,
    allocations: AtomicUsize,
    frees: AtomicUsize,
    copies_to_device: AtomicUsize,
    copies_to_host: AtomicUsize,
    launches: AtomicUsize,
    synchronizations: AtomicUsize,
}

impl SimulatedDevice {
    /// A healthy device with no injected faults.
    pub fn new() -> Self {
        Self::with_faults(FaultPlan::default())
    }

    pub fn with_faults(faults: FaultPlan) -> Self {
        debug!(?faults, "Initialized SimulatedDevice");
        Self {
            faults,
            memory: Mutex::new(HashMap::new()),
            next_ptr: AtomicU64::new(BASE_ADDRESS),
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            copies_to_device: AtomicUsize::new(0),
            copies_to_host: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
            synchronizations: AtomicUsize::new(0),
        }
    }

    /// Number of regions currently allocated.
    pub fn live_allocations(&self) -> usize {
        self.lock_memory().len()
    }

    /// Allocation calls made so far, including failed ones.
    pub fn allocation_calls(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Successful frees so far.
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    /// Kernel launch calls so far, including failed ones.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Synchronize calls so far, including failed ones.
    pub fn synchronizations(&self) -> usize {
        self.synchronizations.load(Ordering::SeqCst)
    }

    /// Snapshot of a region's contents (test inspection).
    pub fn read_region(&self, ptr: DevicePtr) -> Option<Vec<i32>> {
        self.lock_memory().get(&ptr).cloned()
    }

    fn lock_memory(&self) -> std::sync::MutexGuard<'_, HashMap<DevicePtr, Vec<i32>>> {
        // Poisoning is ignored; every primitive writes whole regions.
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_present(&self) -> Result<(), DeviceError> {
        if self.faults.device_present {
            Ok(())
        } else {
            Err(SimStatus::NoDevice.error())
        }
    }

    /// Bump `counter` and report whether this call is the one to fail.
    fn tick(counter: &AtomicUsize, fail_at: Option<usize>) -> bool {
        let ordinal = counter.fetch_add(1, Ordering::SeqCst) + 1;
        fail_at == Some(ordinal)
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerator for SimulatedDevice {
    fn name(&self) -> &str {
        "simulated"
    }

    fn current_device(&self) -> Result<DeviceOrdinal, DeviceError> {
        self.ensure_present()?;
        Ok(DEFAULT_DEVICE)
    }

    fn compute_mode(&self, device: DeviceOrdinal) -> Result<ComputeMode, DeviceError> {
        self.ensure_present()?;
        if device != DEFAULT_DEVICE {
            return Err(SimStatus::InvalidValue.error());
        }
        Ok(self.faults.compute_mode)
    }

    fn mem_alloc(&self, bytes: usize) -> Result<DevicePtr, DeviceError> {
        self.ensure_present()?;
        if Self::tick(&self.allocations, self.faults.fail_allocation) {
            return Err(SimStatus::OutOfMemory.error());
        }
        if bytes == 0 {
            return Err(SimStatus::InvalidValue.error());
        }
        let elements = bytes.div_ceil(std::mem::size_of::<i32>());
        let span = (bytes as u64).div_ceil(ALLOC_ALIGN) * ALLOC_ALIGN;
        let ptr = self.next_ptr.fetch_add(span, Ordering::SeqCst);
        self.lock_memory().insert(ptr, vec![UNINIT_PATTERN; elements]);
        trace!(ptr = format_args!("{:#x}", ptr), bytes, "sim alloc");
        Ok(ptr)
    }

    fn mem_free(&self, ptr: DevicePtr) -> Result<(), DeviceError> {
        self.ensure_present()?;
        match self.lock_memory().remove(&ptr) {
            Some(_) => {
                self.frees.fetch_add(1, Ordering::SeqCst);
                trace!(ptr = format_args!("{:#x}", ptr), "sim free");
                Ok(())
            }
            None => Err(SimStatus::InvalidDevicePointer.error()),
        }
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[i32]) -> Result<(), DeviceError> {
        self.ensure_present()?;
        if Self::tick(&self.copies_to_device, self.faults.fail_copy_to_device) {
            return Err(SimStatus::InvalidValue.error());
        }
        let mut memory = self.lock_memory();
        let region = memory
            .get_mut(&dst)
            .ok_or_else(|| SimStatus::InvalidDevicePointer.error())?;
        if src.len() > region.len() {
            return Err(SimStatus::InvalidValue.error());
        }
        region[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_to_host(&self, dst: &mut [i32], src: DevicePtr) -> Result<(), DeviceError> {
        self.ensure_present()?;
        if Self::tick(&self.copies_to_host, self.faults.fail_copy_to_host) {
            return Err(SimStatus::InvalidValue.error());
        }
        let memory = self.lock_memory();
        let region = memory
            .get(&src)
            .ok_or_else(|| SimStatus::InvalidDevicePointer.error())?;
        if dst.len() > region.len() {
            return Err(SimStatus::InvalidValue.error());
        }
        dst.copy_from_slice(&region[..dst.len()]);
        Ok(())
    }

    fn launch_matmul(&self, grid: ExecutionGrid, args: KernelArgs) -> Result<(), DeviceError> {
        self.ensure_present()?;
        if Self::tick(&self.launches, self.faults.fail_launch) {
            return Err(SimStatus::LaunchFailure.error());
        }

        let (rows, inner, cols) = (args.rows as usize, args.inner as usize, args.cols as usize);
        let mut memory = self.lock_memory();
        let a = memory
            .get(&args.a)
            .ok_or_else(|| SimStatus::InvalidDevicePointer.error())?
            .clone();
        let b = memory
            .get(&args.b)
            .ok_or_else(|| SimStatus::InvalidDevicePointer.error())?
            .clone();
        let c = memory
            .get_mut(&args.c)
            .ok_or_else(|| SimStatus::InvalidDevicePointer.error())?;
        if a.len() < rows * inner || b.len() < inner * cols || c.len() < rows * cols {
            return Err(SimStatus::InvalidValue.error());
        }

        for (row, col) in grid.units() {
            if let Some(value) = matrix_mul_unit(&a, &b, row, col, &args) {
                c[row as usize * cols + col as usize] = value;
            }
        }
        if self.faults.corrupt_output && !c.is_empty() {
            c[0] = c[0].wrapping_add(1);
        }
        trace!(?grid, rows, inner, cols, "sim launch matrix_mul");
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        self.ensure_present()?;
        if Self::tick(&self.synchronizations, self.faults.fail_synchronize) {
            return Err(SimStatus::LaunchFailure.error());
        }
        Ok(())
    }
}
