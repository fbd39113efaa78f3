//! Error types for patchbridge

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open process {pid}: {message}")]
    ProcessOpen { pid: i32, message: String },

    #[error("Memory access error at {address:#x}: {message}")]
    MemoryAccess { address: usize, message: String },

    #[error("Short transfer at {address:#x}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        address: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Protection change failed at {address:#x}: {message}")]
    Protection { address: usize, message: String },

    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("No restore entry for {0}")]
    RestoreStateMissing(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
