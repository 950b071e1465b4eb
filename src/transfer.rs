//! Host <-> device transfers.
//!
//! Each copy is one blocking primitive call. A failed copy maps to a
//! step-specific [`TrialError`] so the trial can stop before dispatching the
//! kernel or reading back.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::buffers::DeviceBuffer;
use crate::device::Accelerator;
use crate::error::TrialError;
use crate::matrix::HostMatrix;

pub struct TransferCoordinator {
    accel: Arc<dyn Accelerator>,
}

impl TransferCoordinator {
    pub fn new(accel: Arc<dyn Accelerator>) -> Self {
        Self { accel }
    }

    /// Copy an input matrix into its device buffer.
    pub fn copy_to_device(&self, host: &HostMatrix, device: &DeviceBuffer) -> Result<(), TrialError> {
        if host.len() > device.len() {
            return Err(TrialError::Shape(format!(
                "host matrix of {} elements does not fit device buffer of {}",
                host.len(),
                device.len()
            )));
        }
        self.accel
            .copy_to_device(device.ptr(), host.as_slice())
            .map_err(|e| {
                warn!(backend = self.accel.name(), error = %e, "Host-to-device copy failed");
                TrialError::InitialCopy(e)
            })?;
        trace!(elements = host.len(), "Copied host -> device");
        Ok(())
    }

    /// Copy a device result back into `host`, overwriting it.
    pub fn copy_to_host(&self, device: &DeviceBuffer, host: &mut HostMatrix) -> Result<(), TrialError> {
        if host.len() > device.len() {
            return Err(TrialError::Shape(format!(
                "device buffer of {} elements is smaller than host matrix of {}",
                device.len(),
                host.len()
            )));
        }
        self.accel
            .copy_to_host(host.as_mut_slice(), device.ptr())
            .map_err(|e| {
                warn!(backend = self.accel.name(), error = %e, "Device-to-host copy failed");
                TrialError::CopyBack(e)
            })?;
        trace!(elements = host.len(), "Copied device -> host");
        Ok(())
    }
}
