//! Bridge command/result envelopes exchanged with the external controller.
//!
//! Both are transient: one command is constructed per inbound request and
//! one result is produced per command. The wire encoding lives in the host
//! crate; these structs are the decoded form.

use crate::reason;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Constant identifying this engine in result envelopes.
pub const BACKEND_ID: &str = "patchbridge";

/// Decoded inbound command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeCommand {
    /// Caller-generated correlation id, echoed back in the result.
    pub command_id: String,
    pub feature_id: String,
    pub profile_id: String,
    pub mode: String,
    pub requested_by: String,
    pub timestamp_utc: String,
    /// Feature-specific payload, kept as the raw object text and parsed
    /// by the owning plugin.
    pub payload_json: String,
    pub process_id: i32,
    pub process_name: String,
    /// Anchor name -> hex address string, with or without a `0x` prefix.
    pub resolved_anchors: BTreeMap<String, String>,
}

/// Outbound result. Always carries a reason code, success included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResult {
    pub command_id: String,
    pub succeeded: bool,
    pub reason_code: String,
    pub backend: String,
    pub hook_state: String,
    pub message: String,
    pub diagnostics: BTreeMap<String, String>,
}

impl Default for BridgeResult {
    fn default() -> Self {
        Self {
            command_id: String::new(),
            succeeded: false,
            reason_code: reason::CAPABILITY_BACKEND_UNAVAILABLE.to_string(),
            backend: BACKEND_ID.to_string(),
            hook_state: "uninitialized".to_string(),
            message: "Bridge not started.".to_string(),
            diagnostics: BTreeMap::new(),
        }
    }
}

impl BridgeResult {
    /// Successful result with the given reason code.
    pub fn ok(command_id: &str, reason_code: &str, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.to_string(),
            succeeded: true,
            reason_code: reason_code.to_string(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Rejected result with the given reason code.
    pub fn rejected(command_id: &str, reason_code: &str, message: impl Into<String>) -> Self {
        Self {
            command_id: command_id.to_string(),
            succeeded: false,
            reason_code: reason_code.to_string(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_hook_state(mut self, hook_state: impl Into<String>) -> Self {
        self.hook_state = hook_state.into();
        self
    }

    pub fn with_diagnostic(mut self, key: &str, value: impl Into<String>) -> Self {
        self.diagnostics.insert(key.to_string(), value.into());
        self
    }
}
