//! Accelerator selection from CLI --backend flag.

use std::sync::Arc;

use crate::device::Accelerator;
use crate::error::HarnessError;

/// Resolve an accelerator from the --backend CLI flag.
///
/// Accepted values: "auto" (default), "sim", "cuda".
pub fn resolve_backend(name: Option<&str>) -> Result<Arc<dyn Accelerator>, HarnessError> {
    match name.unwrap_or("auto") {
        "auto" => Ok(crate::device::select_accelerator()),

        "sim" => Ok(Arc::new(crate::device::sim::SimulatedDevice::new())),

        "cuda" => {
            #[cfg(feature = "cuda")]
            {
                Ok(Arc::new(crate::device::cuda::CudaDevice::try_new()?))
            }
            #[cfg(not(feature = "cuda"))]
            {
                Err(HarnessError::Backend(
                    "CUDA backend not available (compile with --features cuda)".to_string(),
                ))
            }
        }

        other => Err(HarnessError::Backend(format!(
            "Unknown backend '{}'. Options: auto, sim, cuda",
            other
        ))),
    }
}
