pub mod error;
pub mod matrix;
pub mod reference;
pub mod verify;
pub mod device;
pub mod buffers;
pub mod transfer;
pub mod dispatch;
pub mod console;
pub mod trial;
pub mod config;
pub mod orchestrator;
pub mod cli;

pub use error::{HarnessError, TrialError};
pub use matrix::{HostMatrix, MatMulDims};
pub use device::{select_accelerator, Accelerator};
pub use dispatch::MatMulDispatch;
pub use console::Console;
pub use config::HarnessConfig;
pub use orchestrator::{Harness, HarnessSummary};
