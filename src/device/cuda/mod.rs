//! CUDA accelerator.
//!
//! Loads the CUDA driver at runtime (no link-time dependency), retains the
//! primary context of device 0 and loads the PTX `matrix_mul` kernel.
//! `CudaDevice::try_new()` returns `Err` when no driver or GPU is present and
//! the accelerator selector falls back to the simulated device.
//!
//! The primary context is made current on the calling thread before every
//! primitive, since trials run on arbitrary pool threads.

use std::ffi::CStr;
use std::os::raw::c_void;

use tracing::{debug, trace, warn};

use crate::error::HarnessError;

use super::{
    Accelerator, ComputeMode, DeviceError, DeviceOrdinal, DevicePtr, ExecutionGrid, KernelArgs,
    DEFAULT_DEVICE,
};
use ffi::{CUcontext, CUdevice, CUfunction, CUmodule, CudaApi, CU_DEVICE_ATTRIBUTE_COMPUTE_MODE};

pub mod ffi;
pub mod kernels;

/// CUDA driver accelerator bound to device 0.
pub struct CudaDevice {
    api: CudaApi,
    device: CUdevice,
    ctx: CUcontext,
    module: CUmodule,
    fn_matrix_mul: CUfunction,
}

// SAFETY: the context, module and function handles are process-global
// driver objects; the Driver API is documented as thread-safe.
unsafe impl Send for CudaDevice {}
unsafe impl Sync for CudaDevice {}

impl CudaDevice {
    /// Attempt to bring up the CUDA accelerator.
    ///
    /// 1. Load the driver library and call `cuInit`.
    /// 2. Resolve device 0 and retain its primary context.
    /// 3. Load the PTX module and resolve `matrix_mul`.
    pub fn try_new() -> Result<Self, HarnessError> {
        let api = CudaApi::load()
            .map_err(|e| HarnessError::Backend(format!("CUDA load: {}", e)))?;

        if api.device_count()? == 0 {
            return Err(HarnessError::Backend("CUDA: no devices found".to_string()));
        }
        let device = api.device_get(DEFAULT_DEVICE)?;
        let ctx = api.primary_ctx_retain(device)?;
        api.ctx_set_current(ctx)?;

        let module = match api.module_load_data(kernels::PTX_MODULE.as_ptr() as *const c_void) {
            Ok(m) => m,
            Err(e) => {
                let _ = api.primary_ctx_release(device);
                return Err(HarnessError::Backend(format!("CUDA PTX load: {}", e)));
            }
        };
        let name = CStr::from_bytes_with_nul(b"matrix_mul\0")
            .map_err(|e| HarnessError::Backend(e.to_string()))?;
        let fn_matrix_mul = match api.module_get_function(module, name) {
            Ok(f) => f,
            Err(e) => {
                let _ = api.module_unload(module);
                let _ = api.primary_ctx_release(device);
                return Err(HarnessError::Backend(format!(
                    "CUDA kernel 'matrix_mul': {}",
                    e
                )));
            }
        };

        debug!(device, "CudaDevice initialized");
        Ok(Self {
            api,
            device,
            ctx,
            module,
            fn_matrix_mul,
        })
    }

    fn make_current(&self) -> Result<(), DeviceError> {
        self.api.ctx_set_current(self.ctx)
    }
}

impl Accelerator for CudaDevice {
    fn name(&self) -> &str {
        "cuda"
    }

    fn current_device(&self) -> Result<DeviceOrdinal, DeviceError> {
        if self.api.device_count()? == 0 {
            return Err(DeviceError::new(100, "no CUDA-capable device is detected"));
        }
        self.api.device_get(DEFAULT_DEVICE)
    }

    fn compute_mode(&self, device: DeviceOrdinal) -> Result<ComputeMode, DeviceError> {
        let handle = self.api.device_get(device)?;
        let raw = self
            .api
            .device_attribute(CU_DEVICE_ATTRIBUTE_COMPUTE_MODE, handle)?;
        Ok(ComputeMode::from_raw(raw))
    }

    fn mem_alloc(&self, bytes: usize) -> Result<DevicePtr, DeviceError> {
        self.make_current()?;
        let ptr = self.api.mem_alloc(bytes)?;
        trace!(ptr = format_args!("{:#x}", ptr), bytes, "CUDA alloc");
        Ok(ptr)
    }

    fn mem_free(&self, ptr: DevicePtr) -> Result<(), DeviceError> {
        self.make_current()?;
        self.api.mem_free(ptr)
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[i32]) -> Result<(), DeviceError> {
        self.make_current()?;
        let bytes = std::mem::size_of_val(src);
        self.api
            .memcpy_h_to_d(dst, src.as_ptr() as *const c_void, bytes)
    }

    fn copy_to_host(&self, dst: &mut [i32], src: DevicePtr) -> Result<(), DeviceError> {
        self.make_current()?;
        let bytes = std::mem::size_of_val(dst);
        self.api
            .memcpy_d_to_h(dst.as_mut_ptr() as *mut c_void, src, bytes)
    }

    fn launch_matmul(&self, grid: ExecutionGrid, args: KernelArgs) -> Result<(), DeviceError> {
        self.make_current()?;

        let mut p_a = args.a;
        let mut p_b = args.b;
        let mut p_c = args.c;
        let mut p_rows = args.rows;
        let mut p_inner = args.inner;
        let mut p_cols = args.cols;

        let mut params: [*mut c_void; 6] = [
            &mut p_a as *mut _ as *mut c_void,
            &mut p_b as *mut _ as *mut c_void,
            &mut p_c as *mut _ as *mut c_void,
            &mut p_rows as *mut _ as *mut c_void,
            &mut p_inner as *mut _ as *mut c_void,
            &mut p_cols as *mut _ as *mut c_void,
        ];

        trace!(?grid, "CUDA launch matrix_mul");
        // SAFETY: params match the matrix_mul signature and outlive the call.
        unsafe {
            self.api.launch_kernel(
                self.fn_matrix_mul,
                (grid.x, grid.y, 1),
                (1, 1, 1),
                0,
                params.as_mut_ptr(),
            )
        }
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        self.make_current()?;
        self.api.ctx_synchronize()
    }
}

impl Drop for CudaDevice {
    fn drop(&mut self) {
        if self.make_current().is_ok() {
            let _ = self.api.ctx_synchronize();
            if let Err(e) = self.api.module_unload(self.module) {
                warn!(error = %e, "CUDA: failed to unload module");
            }
        }
        if let Err(e) = self.api.primary_ctx_release(self.device) {
            warn!(error = %e, "CUDA: failed to release primary context");
        }
    }
}

#[cfg(all(test, feature = "cuda"))]
mod tests {
    use super::*;
    use crate::device::has_compute_device;

    fn try_cuda() -> Option<CudaDevice> {
        CudaDevice::try_new().ok()
    }

    #[test]
    fn test_cuda_init() {
        match CudaDevice::try_new() {
            Ok(_) => eprintln!("CUDA accelerator initialized successfully"),
            Err(e) => eprintln!("CUDA not available: {}", e),
        }
    }

    #[test]
    fn test_matrix_mul_kernel() {
        let cuda = match try_cuda() {
            Some(d) => d,
            None => {
                eprintln!("CUDA not available, skipping");
                return;
            }
        };
        assert!(has_compute_device(&cuda));

        let a = cuda.mem_alloc(16).unwrap();
        let b = cuda.mem_alloc(16).unwrap();
        let c = cuda.mem_alloc(16).unwrap();
        cuda.copy_to_device(a, &[1, 2, 3, 4]).unwrap();
        cuda.copy_to_device(b, &[5, 6, 7, 8]).unwrap();
        let args = KernelArgs { a, b, c, rows: 2, inner: 2, cols: 2 };
        cuda.launch_matmul(ExecutionGrid::for_output(2, 2), args).unwrap();
        let mut out = [0; 4];
        cuda.copy_to_host(&mut out, c).unwrap();
        assert_eq!(out, [19, 22, 43, 50]);

        for p in [a, b, c] {
            cuda.mem_free(p).unwrap();
        }
    }
}
