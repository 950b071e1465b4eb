use thiserror::Error;

use crate::device::DeviceError;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Worker pool error: {0}")]
    Pool(String),
}

/// Terminal failure of a single trial.
///
/// Every variant skips the remaining steps of its trial and contributes zero
/// mismatches to the tally. The display text is the step message printed to
/// the console.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrialError {
    #[error("Unable to allocate")]
    Allocation(DeviceError),

    #[error("Unable to make initial copy")]
    InitialCopy(DeviceError),

    #[error("Unable to launch kernel")]
    Launch(DeviceError),

    #[error("Unable to copy memory from device to host")]
    CopyBack(DeviceError),

    #[error("Invalid trial shape: {0}")]
    Shape(String),
}

impl TrialError {
    /// The underlying device error, if this failure came from the accelerator.
    pub fn device_error(&self) -> Option<&DeviceError> {
        match self {
            TrialError::Allocation(e)
            | TrialError::InitialCopy(e)
            | TrialError::Launch(e)
            | TrialError::CopyBack(e) => Some(e),
            TrialError::Shape(_) => None,
        }
    }

    /// Short machine-readable step name, used in JSON summaries.
    pub fn step(&self) -> &'static str {
        match self {
            TrialError::Allocation(_) => "allocate",
            TrialError::InitialCopy(_) => "copy_to_device",
            TrialError::Launch(_) => "launch",
            TrialError::CopyBack(_) => "copy_to_host",
            TrialError::Shape(_) => "shape",
        }
    }
}

impl From<HarnessError> for TrialError {
    fn from(e: HarnessError) -> Self {
        TrialError::Shape(e.to_string())
    }
}
