//! Economy family: `set_credits`.
//!
//! Writes the requested credit balance at the resolved anchor. Credits
//! are live game state that the engine rewrites every tick, so there is
//! no restore entry to keep; the interesting distinction is whether the
//! value is applied once or pinned by the caller's lock flag.

use crate::{find_anchor, MutationPlugin, PluginContext, PluginRequest, PluginResult};
use patchbridge_common::{debug, reason, warn};
use patchbridge_core::parse_address;
use std::sync::Mutex;

const FEATURES: &[&str] = &["set_credits"];
const CREDITS_ANCHORS: &[&str] = &["credits", "set_credits"];

const MIN_CREDITS: i32 = 0;

#[derive(Debug, Clone, Copy, Default)]
struct CreditsState {
    applied: bool,
    locked: bool,
    last_value: Option<i32>,
}

/// Validated request: everything needed before the first engine call.
struct CreditsTarget {
    value: i32,
    lock: bool,
    anchor_key: String,
    address: usize,
}

#[derive(Debug, Default)]
pub struct EconomyPlugin {
    state: Mutex<CreditsState>,
}

impl EconomyPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> CreditsState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: CreditsState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Strict order: payload shape, then range, then anchor resolution.
    fn screen(&self, request: &PluginRequest) -> Result<CreditsTarget, PluginResult> {
        let value = match request.int_value {
            Some(value) => value,
            None => {
                return Err(PluginResult::rejected(
                    reason::PAYLOAD_FIELD_INVALID,
                    "Payload is missing required intValue.",
                )
                .with_diagnostic("requiredField", "intValue"));
            }
        };

        if value < MIN_CREDITS {
            return Err(PluginResult::rejected(
                reason::VALUE_OUT_OF_RANGE,
                "set_credits requires a non-negative intValue.",
            )
            .with_diagnostic("intValue", value.to_string())
            .with_diagnostic("minIntValue", MIN_CREDITS.to_string()));
        }

        let (anchor_key, anchor_value) = match find_anchor(&request.anchors, CREDITS_ANCHORS) {
            Some(anchor) => anchor,
            None => {
                return Err(PluginResult::rejected(
                    reason::ANCHOR_UNRESOLVED,
                    "No resolved anchor supplied for set_credits.",
                )
                .with_diagnostic("anchorCandidates", CREDITS_ANCHORS.join(",")));
            }
        };

        let address = match parse_address(&anchor_value) {
            Ok(address) => address,
            Err(_) => {
                return Err(PluginResult::rejected(
                    reason::ANCHOR_UNRESOLVED,
                    "Anchor address did not parse as hex.",
                )
                .with_diagnostic("anchorKey", anchor_key)
                .with_diagnostic("anchorValue", anchor_value));
            }
        };

        Ok(CreditsTarget {
            value,
            lock: request.lock.unwrap_or(false),
            anchor_key,
            address,
        })
    }
}

impl MutationPlugin for EconomyPlugin {
    fn id(&self) -> &'static str {
        "economy"
    }

    fn features(&self) -> &'static [&'static str] {
        FEATURES
    }

    fn validate(&self, request: &PluginRequest) -> Option<PluginResult> {
        self.screen(request).err()
    }

    fn execute(&self, ctx: &PluginContext<'_>, request: &PluginRequest) -> PluginResult {
        let target = match self.screen(request) {
            Ok(target) => target,
            Err(rejection) => return rejection,
        };
        let prior = self.state();

        match ctx.accessor.write_i32(target.address, target.value) {
            Ok(write_diag) => {
                ctx.hooks.mark_installed(&request.feature_id);
                self.set_state(CreditsState {
                    applied: true,
                    locked: target.lock,
                    last_value: Some(target.value),
                });
                let hook_state = if target.lock { "Locked" } else { "OneShot" };
                debug!(
                    target: "patchbridge::plugins::economy",
                    feature = %request.feature_id,
                    address = format_args!("{:#x}", target.address),
                    value = target.value,
                    locked = target.lock,
                    reapply = prior.applied,
                    "credit balance written"
                );

                let mut result = PluginResult::ok(
                    reason::HOOK_OK,
                    hook_state,
                    "Credit balance written.",
                )
                .with_diagnostic("anchorKey", target.anchor_key.as_str())
                .with_diagnostic("address", format!("{:#x}", target.address))
                .with_diagnostic("intValue", target.value.to_string())
                .with_diagnostic("lockCredits", target.lock.to_string())
                .with_diagnostic(
                    "previousValue",
                    prior
                        .last_value
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                );
                write_diag.export(&mut result.diagnostics);
                result
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    target: "patchbridge::plugins::economy",
                    feature = %request.feature_id,
                    error = %message,
                    "credit write failed"
                );
                ctx.hooks.mark_failed(&request.feature_id, &message);
                PluginResult::rejected(reason::PATCH_WRITE_FAILED, message)
                    .with_hook_state("Failed")
                    .with_diagnostic("anchorKey", target.anchor_key.as_str())
            }
        }
    }
}
