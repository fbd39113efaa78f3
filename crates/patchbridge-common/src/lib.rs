//! Patchbridge Common Types
//!
//! Shared types, reason codes, and logging configuration used by all
//! patchbridge components.

pub mod error;
pub mod logging;
pub mod reason;
pub mod types;

pub use error::{Error, Result};
pub use logging::{init_host_logging, init_logging, LogConfig};
pub use types::*;

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
