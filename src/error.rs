//! Error types.

use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures reported by an item backend. Passed through to callers
/// unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("write failed: {0}")]
    WriteFailed(String),
}

#[derive(Error, Debug)]
pub enum Error {
    /// The key's slot stayed held for longer than the allowed wait. The
    /// caller's registration on the slot has already been rolled back.
    #[error("timed out after {0:?} waiting for exclusive access")]
    Timeout(Duration),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
