//! Minimal CUDA Driver API bindings, resolved at runtime with `libloading`.
//!
//! Only the entry points the harness consumes are loaded. Every wrapper
//! converts a non-zero `CUresult` into a [`DeviceError`] carrying the
//! driver's own error string.

#![allow(non_camel_case_types)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint, c_void};

use libloading::Library;

use crate::device::DeviceError;

pub type CUresult = c_int;
pub type CUdevice = c_int;
pub type CUdeviceptr = u64;
pub type CUcontext = *mut c_void;
pub type CUmodule = *mut c_void;
pub type CUfunction = *mut c_void;
pub type CUstream = *mut c_void;

pub const CUDA_SUCCESS: CUresult = 0;
pub const CU_DEVICE_ATTRIBUTE_COMPUTE_MODE: c_int = 20;

type CuInitFn = unsafe extern "C" fn(c_uint) -> CUresult;
type CuDeviceGetCountFn = unsafe extern "C" fn(*mut c_int) -> CUresult;
type CuDeviceGetFn = unsafe extern "C" fn(*mut CUdevice, c_int) -> CUresult;
type CuDeviceGetAttributeFn = unsafe extern "C" fn(*mut c_int, c_int, CUdevice) -> CUresult;
type CuDevicePrimaryCtxRetainFn = unsafe extern "C" fn(*mut CUcontext, CUdevice) -> CUresult;
type CuDevicePrimaryCtxReleaseFn = unsafe extern "C" fn(CUdevice) -> CUresult;
type CuCtxSetCurrentFn = unsafe extern "C" fn(CUcontext) -> CUresult;
type CuCtxSynchronizeFn = unsafe extern "C" fn() -> CUresult;
type CuMemAllocFn = unsafe extern "C" fn(*mut CUdeviceptr, usize) -> CUresult;
type CuMemFreeFn = unsafe extern "C" fn(CUdeviceptr) -> CUresult;
type CuMemcpyHtoDFn = unsafe extern "C" fn(CUdeviceptr, *const c_void, usize) -> CUresult;
type CuMemcpyDtoHFn = unsafe extern "C" fn(*mut c_void, CUdeviceptr, usize) -> CUresult;
type CuModuleLoadDataFn = unsafe extern "C" fn(*mut CUmodule, *const c_void) -> CUresult;
type CuModuleGetFunctionFn =
    unsafe extern "C" fn(*mut CUfunction, CUmodule, *const c_char) -> CUresult;
type CuModuleUnloadFn = unsafe extern "C" fn(CUmodule) -> CUresult;
type CuLaunchKernelFn = unsafe extern "C" fn(
    CUfunction,
    c_uint,
    c_uint,
    c_uint,
    c_uint,
    c_uint,
    c_uint,
    c_uint,
    CUstream,
    *mut *mut c_void,
    *mut *mut c_void,
) -> CUresult;
type CuGetErrorStringFn = unsafe extern "C" fn(CUresult, *mut *const c_char) -> CUresult;

struct DriverFns {
    init: CuInitFn,
    device_get_count: CuDeviceGetCountFn,
    device_get: CuDeviceGetFn,
    device_get_attribute: CuDeviceGetAttributeFn,
    primary_ctx_retain: CuDevicePrimaryCtxRetainFn,
    primary_ctx_release: CuDevicePrimaryCtxReleaseFn,
    ctx_set_current: CuCtxSetCurrentFn,
    ctx_synchronize: CuCtxSynchronizeFn,
    mem_alloc: CuMemAllocFn,
    mem_free: CuMemFreeFn,
    memcpy_h_to_d: CuMemcpyHtoDFn,
    memcpy_d_to_h: CuMemcpyDtoHFn,
    module_load_data: CuModuleLoadDataFn,
    module_get_function: CuModuleGetFunctionFn,
    module_unload: CuModuleUnloadFn,
    launch_kernel: CuLaunchKernelFn,
    get_error_string: CuGetErrorStringFn,
}

/// Loaded CUDA driver library and resolved entry points.
pub struct CudaApi {
    _lib: Library,
    fns: DriverFns,
}

// SAFETY: the struct only holds plain function pointers and the library
// handle; the Driver API is documented as thread-safe.
unsafe impl Send for CudaApi {}
unsafe impl Sync for CudaApi {}

fn load_driver_library() -> Result<Library, DeviceError> {
    let candidates = ["libcuda.so.1", "libcuda.so", "nvcuda.dll"];
    for candidate in candidates {
        // SAFETY: dynamic library probing only.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            return Ok(lib);
        }
    }
    Err(DeviceError::new(
        -1,
        "failed to load CUDA driver (tried libcuda.so.1, libcuda.so, nvcuda.dll)",
    ))
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, DeviceError> {
    // SAFETY: every requested type matches the Driver API prototype.
    let symbol = unsafe { lib.get::<T>(name) }.map_err(|e| {
        DeviceError::new(
            -1,
            format!(
                "failed to resolve CUDA symbol {}: {}",
                String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name)),
                e
            ),
        )
    })?;
    Ok(*symbol)
}

impl CudaApi {
    /// Load the driver, resolve all symbols and call `cuInit(0)`.
    pub fn load() -> Result<Self, DeviceError> {
        let lib = load_driver_library()?;
        let primary_ctx_release: CuDevicePrimaryCtxReleaseFn = load_symbol(&lib, b"cuDevicePrimaryCtxRelease_v2\0")
            .or_else(|_| load_symbol(&lib, b"cuDevicePrimaryCtxRelease\0"))?;
        let fns = DriverFns {
            init: load_symbol(&lib, b"cuInit\0")?,
            device_get_count: load_symbol(&lib, b"cuDeviceGetCount\0")?,
            device_get: load_symbol(&lib, b"cuDeviceGet\0")?,
            device_get_attribute: load_symbol(&lib, b"cuDeviceGetAttribute\0")?,
            primary_ctx_retain: load_symbol(&lib, b"cuDevicePrimaryCtxRetain\0")?,
            primary_ctx_release,
            ctx_set_current: load_symbol(&lib, b"cuCtxSetCurrent\0")?,
            ctx_synchronize: load_symbol(&lib, b"cuCtxSynchronize\0")?,
            mem_alloc: load_symbol(&lib, b"cuMemAlloc_v2\0")?,
            mem_free: load_symbol(&lib, b"cuMemFree_v2\0")?,
            memcpy_h_to_d: load_symbol(&lib, b"cuMemcpyHtoD_v2\0")?,
            memcpy_d_to_h: load_symbol(&lib, b"cuMemcpyDtoH_v2\0")?,
            module_load_data: load_symbol(&lib, b"cuModuleLoadData\0")?,
            module_get_function: load_symbol(&lib, b"cuModuleGetFunction\0")?,
            module_unload: load_symbol(&lib, b"cuModuleUnload\0")?,
            launch_kernel: load_symbol(&lib, b"cuLaunchKernel\0")?,
            get_error_string: load_symbol(&lib, b"cuGetErrorString\0")?,
        };
        let api = Self { _lib: lib, fns };
        // SAFETY: cuInit takes no pointers; flags must be 0.
        api.check(unsafe { (api.fns.init)(0) })?;
        Ok(api)
    }

    /// Error-code-to-string.
    pub fn error_string(&self, code: CUresult) -> String {
        let mut ptr: *const c_char = std::ptr::null();
        // SAFETY: cuGetErrorString writes a pointer to a static string.
        let status = unsafe { (self.fns.get_error_string)(code, &mut ptr) };
        if status != CUDA_SUCCESS || ptr.is_null() {
            return format!("unknown CUDA error {}", code);
        }
        // SAFETY: the driver returns a NUL-terminated static string.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    fn check(&self, code: CUresult) -> Result<(), DeviceError> {
        if code == CUDA_SUCCESS {
            Ok(())
        } else {
            Err(DeviceError::new(code, self.error_string(code)))
        }
    }

    pub fn device_count(&self) -> Result<c_int, DeviceError> {
        let mut count = 0;
        // SAFETY: out-pointer to a local.
        self.check(unsafe { (self.fns.device_get_count)(&mut count) })?;
        Ok(count)
    }

    pub fn device_get(&self, ordinal: c_int) -> Result<CUdevice, DeviceError> {
        let mut device: CUdevice = 0;
        // SAFETY: out-pointer to a local.
        self.check(unsafe { (self.fns.device_get)(&mut device, ordinal) })?;
        Ok(device)
    }

    pub fn device_attribute(&self, attribute: c_int, device: CUdevice) -> Result<c_int, DeviceError> {
        let mut value = 0;
        // SAFETY: out-pointer to a local.
        self.check(unsafe { (self.fns.device_get_attribute)(&mut value, attribute, device) })?;
        Ok(value)
    }

    pub fn primary_ctx_retain(&self, device: CUdevice) -> Result<CUcontext, DeviceError> {
        let mut ctx: CUcontext = std::ptr::null_mut();
        // SAFETY: out-pointer to a local.
        self.check(unsafe { (self.fns.primary_ctx_retain)(&mut ctx, device) })?;
        Ok(ctx)
    }

    pub fn primary_ctx_release(&self, device: CUdevice) -> Result<(), DeviceError> {
        // SAFETY: releases a reference taken by primary_ctx_retain.
        self.check(unsafe { (self.fns.primary_ctx_release)(device) })
    }

    pub fn ctx_set_current(&self, ctx: CUcontext) -> Result<(), DeviceError> {
        // SAFETY: ctx was returned by primary_ctx_retain.
        self.check(unsafe { (self.fns.ctx_set_current)(ctx) })
    }

    pub fn ctx_synchronize(&self) -> Result<(), DeviceError> {
        // SAFETY: no arguments.
        self.check(unsafe { (self.fns.ctx_synchronize)() })
    }

    pub fn mem_alloc(&self, bytes: usize) -> Result<CUdeviceptr, DeviceError> {
        let mut ptr: CUdeviceptr = 0;
        // SAFETY: out-pointer to a local.
        self.check(unsafe { (self.fns.mem_alloc)(&mut ptr, bytes) })?;
        Ok(ptr)
    }

    pub fn mem_free(&self, ptr: CUdeviceptr) -> Result<(), DeviceError> {
        // SAFETY: ptr was returned by mem_alloc; the driver validates it.
        self.check(unsafe { (self.fns.mem_free)(ptr) })
    }

    pub fn memcpy_h_to_d(&self, dst: CUdeviceptr, src: *const c_void, bytes: usize) -> Result<(), DeviceError> {
        // SAFETY: caller guarantees `src` is valid for `bytes` reads.
        self.check(unsafe { (self.fns.memcpy_h_to_d)(dst, src, bytes) })
    }

    pub fn memcpy_d_to_h(&self, dst: *mut c_void, src: CUdeviceptr, bytes: usize) -> Result<(), DeviceError> {
        // SAFETY: caller guarantees `dst` is valid for `bytes` writes.
        self.check(unsafe { (self.fns.memcpy_d_to_h)(dst, src, bytes) })
    }

    pub fn module_load_data(&self, image: *const c_void) -> Result<CUmodule, DeviceError> {
        let mut module: CUmodule = std::ptr::null_mut();
        // SAFETY: caller passes a NUL-terminated PTX image.
        self.check(unsafe { (self.fns.module_load_data)(&mut module, image) })?;
        Ok(module)
    }

    pub fn module_get_function(&self, module: CUmodule, name: &CStr) -> Result<CUfunction, DeviceError> {
        let mut func: CUfunction = std::ptr::null_mut();
        // SAFETY: module is loaded and name is NUL-terminated.
        self.check(unsafe { (self.fns.module_get_function)(&mut func, module, name.as_ptr()) })?;
        Ok(func)
    }

    pub fn module_unload(&self, module: CUmodule) -> Result<(), DeviceError> {
        // SAFETY: module was returned by module_load_data.
        self.check(unsafe { (self.fns.module_unload)(module) })
    }

    /// Launch `func` on the legacy default stream.
    ///
    /// # Safety
    ///
    /// `params` must match the kernel signature and point at live values.
    pub unsafe fn launch_kernel(
        &self,
        func: CUfunction,
        grid: (u32, u32, u32),
        block: (u32, u32, u32),
        shared_mem: u32,
        params: *mut *mut c_void,
    ) -> Result<(), DeviceError> {
        self.check((self.fns.launch_kernel)(
            func,
            grid.0,
            grid.1,
            grid.2,
            block.0,
            block.1,
            block.2,
            shared_mem,
            std::ptr::null_mut(),
            params,
            std::ptr::null_mut(),
        ))
    }
}
