//! Lifecycle error types.

use thiserror::Error;

/// Errors raised while building lifecycle inputs
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    /// Device identity is not six colon-separated hex bytes
    #[error("invalid device id: {0}")]
    DeviceId(String),

    /// A timing value that must be non-zero was zero
    #[error("invalid timing: {0} must be non-zero")]
    Timing(&'static str),
}
