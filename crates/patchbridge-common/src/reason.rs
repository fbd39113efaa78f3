//! Machine-readable reason codes carried in bridge results and registries.
//!
//! Every result envelope includes exactly one of these, success included.
//! The `CAPABILITY_` prefix is load-bearing: controllers match on it to
//! distinguish gating rejections from validation or OS failures.

/// A capability probe verified the feature against the attached process.
pub const CAPABILITY_PROBE_PASS: &str = "CAPABILITY_PROBE_PASS";

/// Default state for a feature that was never probed.
pub const CAPABILITY_UNKNOWN: &str = "CAPABILITY_UNKNOWN";

/// A mutation was requested for a feature that was never marked available.
pub const CAPABILITY_REQUIRED_MISSING: &str = "CAPABILITY_REQUIRED_MISSING";

/// No handler configured, or the engine could not service the command at all.
pub const CAPABILITY_BACKEND_UNAVAILABLE: &str = "CAPABILITY_BACKEND_UNAVAILABLE";

/// Hook installed and healthy.
pub const HOOK_OK: &str = "HOOK_OK";

/// Default state for a hook that was never installed.
pub const HOOK_NOT_INSTALLED: &str = "HOOK_NOT_INSTALLED";

/// Original bytes written back and the restore entry consumed.
pub const ROLLBACK_SUCCESS: &str = "ROLLBACK_SUCCESS";

/// Required payload field missing or malformed.
pub const PAYLOAD_FIELD_INVALID: &str = "PAYLOAD_FIELD_INVALID";

/// Numeric payload value outside the feature's safe bounds.
pub const VALUE_OUT_OF_RANGE: &str = "VALUE_OUT_OF_RANGE";

/// No resolved anchor address supplied for the feature.
pub const ANCHOR_UNRESOLVED: &str = "ANCHOR_UNRESOLVED";

/// Disable requested but no restore entry exists; fail closed, no write.
pub const PATCH_RESTORE_STATE_MISSING: &str = "PATCH_RESTORE_STATE_MISSING";

/// OS-level read/write/protect failure during install or rollback.
pub const PATCH_WRITE_FAILED: &str = "PATCH_WRITE_FAILED";

/// Target process handle could not be opened.
pub const PROCESS_OPEN_FAILED: &str = "PROCESS_OPEN_FAILED";
