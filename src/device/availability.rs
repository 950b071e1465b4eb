//! Precondition gate: is there a usable compute device?

use tracing::{debug, warn};

use super::{Accelerator, ComputeMode, DeviceError, DeviceOrdinal, DEFAULT_DEVICE};

/// Result of probing the default device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Device resolved and accepts compute work.
    Available(DeviceOrdinal),
    /// The device handle or its properties could not be resolved.
    Unresolved(DeviceError),
    /// The device exists but its compute mode is administratively prohibited.
    Prohibited(DeviceOrdinal),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available(_))
    }
}

/// Probe the default device (always device 0).
///
/// Confirms the device handle resolves and that its compute mode is not
/// prohibited. Only queries; no other side effects.
pub fn check_compute_device(accel: &dyn Accelerator) -> Availability {
    let device = match accel.current_device() {
        Ok(d) => d,
        Err(e) => {
            warn!(backend = accel.name(), error = %e, "Unable to resolve current device");
            return Availability::Unresolved(e);
        }
    };
    if device != DEFAULT_DEVICE {
        debug!(device, "Runtime reports non-default current device; probing device 0");
    }
    match accel.compute_mode(DEFAULT_DEVICE) {
        Ok(ComputeMode::Prohibited) => {
            warn!(backend = accel.name(), device = DEFAULT_DEVICE, "Compute mode is prohibited");
            Availability::Prohibited(DEFAULT_DEVICE)
        }
        Ok(mode) => {
            debug!(backend = accel.name(), device = DEFAULT_DEVICE, ?mode, "Compute device available");
            Availability::Available(DEFAULT_DEVICE)
        }
        Err(e) => {
            warn!(backend = accel.name(), error = %e, "Unable to query device properties");
            Availability::Unresolved(e)
        }
    }
}

/// `true` if the default device exists and may run compute work.
pub fn has_compute_device(accel: &dyn Accelerator) -> bool {
    check_compute_device(accel).is_available()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{FaultPlan, SimulatedDevice};

    #[test]
    fn test_default_sim_is_available() {
        let dev = SimulatedDevice::new();
        assert_eq!(check_compute_device(&dev), Availability::Available(0));
        assert!(has_compute_device(&dev));
    }

    #[test]
    fn test_missing_device_is_unresolved() {
        let dev = SimulatedDevice::with_faults(FaultPlan::default().no_device());
        match check_compute_device(&dev) {
            Availability::Unresolved(e) => assert_eq!(e.code, 100),
            other => panic!("expected Unresolved, got {:?}", other),
        }
        assert!(!has_compute_device(&dev));
    }

    #[test]
    fn test_prohibited_compute_mode() {
        let dev = SimulatedDevice::with_faults(
            FaultPlan::default().compute_mode(ComputeMode::Prohibited),
        );
        assert_eq!(check_compute_device(&dev), Availability::Prohibited(0));
        assert!(!has_compute_device(&dev));
    }

    #[test]
    fn test_exclusive_modes_are_allowed() {
        for mode in [ComputeMode::ExclusiveThread, ComputeMode::ExclusiveProcess] {
            let dev = SimulatedDevice::with_faults(FaultPlan::default().compute_mode(mode));
            assert!(has_compute_device(&dev), "mode {:?} should be usable", mode);
        }
    }
}
