//! Boolean toggle family: timer freeze, fog reveal, AI enable, and the
//! instant-build patch.
//!
//! Every toggle is a one-byte executable patch: enabling writes `0x01`
//! over the resolved anchor after saving the original byte, disabling
//! writes the saved byte back. Because the anchors sit in code pages
//! the writes go through the protection-relaxing patch path.

use crate::{find_anchor, MutationPlugin, PluginContext, PluginRequest, PluginResult};
use patchbridge_common::{debug, reason, warn};
use patchbridge_core::{parse_address, RestoreKey};
use std::collections::HashMap;
use std::sync::Mutex;

const FEATURES: &[&str] = &[
    "freeze_timer",
    "toggle_fog_reveal",
    "toggle_ai",
    "toggle_instant_build_patch",
];

const PATCH_BYTE: u8 = 0x01;

/// Accepted anchor spellings per feature, preferred spelling first.
fn anchor_candidates(feature_id: &str) -> &'static [&'static str] {
    match feature_id {
        "freeze_timer" => &["game_timer_freeze", "freeze_timer"],
        "toggle_fog_reveal" => &["fog_reveal", "toggle_fog_reveal"],
        "toggle_ai" => &["ai_enabled", "toggle_ai"],
        "toggle_instant_build_patch" => &["instant_build_patch", "toggle_instant_build_patch"],
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ToggleState {
    enabled: bool,
    apply_count: u32,
}

struct ToggleTarget {
    enable: bool,
    anchor_key: String,
    address: usize,
}

#[derive(Debug, Default)]
pub struct GlobalTogglePlugin {
    /// Per-feature state behind one lock.
    states: Mutex<HashMap<String, ToggleState>>,
}

impl GlobalTogglePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, feature_id: &str) -> ToggleState {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(feature_id)
            .copied()
            .unwrap_or_default()
    }

    fn set_state(&self, feature_id: &str, update: impl FnOnce(&mut ToggleState)) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        update(states.entry(feature_id.to_string()).or_default());
    }

    fn screen(&self, request: &PluginRequest) -> Result<ToggleTarget, PluginResult> {
        let enable = match request.enable {
            Some(enable) => enable,
            None => {
                return Err(PluginResult::rejected(
                    reason::PAYLOAD_FIELD_INVALID,
                    "Payload is missing required enable flag.",
                )
                .with_diagnostic("requiredField", "enable"));
            }
        };

        let candidates = anchor_candidates(&request.feature_id);
        let (anchor_key, anchor_value) = match find_anchor(&request.anchors, candidates) {
            Some(anchor) => anchor,
            None => {
                return Err(PluginResult::rejected(
                    reason::ANCHOR_UNRESOLVED,
                    format!("No resolved anchor supplied for {}.", request.feature_id),
                )
                .with_diagnostic("anchorCandidates", candidates.join(",")));
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

        Ok(ToggleTarget {
            enable,
            anchor_key,
            address,
        })
    }

    fn enable(
        &self,
        ctx: &PluginContext<'_>,
        request: &PluginRequest,
        anchor_key: &str,
        address: usize,
    ) -> PluginResult {
        let key = RestoreKey::new(request.process_id, anchor_key, address);
        let prior = self.state(&request.feature_id);

        if !ctx.restore.contains(&key) {
            match ctx.accessor.read_bytes(address, 1) {
                Ok(original) => {
                    ctx.restore.store_bytes(&key, original);
                }
                Err(e) => {
                    let message = e.to_string();
                    ctx.hooks.mark_failed(&request.feature_id, &message);
                    return PluginResult::rejected(reason::PATCH_WRITE_FAILED, message)
                        .with_hook_state("Failed")
                        .with_diagnostic("restoreKey", key.tag());
                }
            }
        }

        match ctx.accessor.write_bytes(address, &[PATCH_BYTE], true) {
            Ok(write_diag) => {
                ctx.hooks.mark_installed(&request.feature_id);
                self.set_state(&request.feature_id, |state| {
                    state.enabled = true;
                    state.apply_count += 1;
                });
                debug!(
                    target: "patchbridge::plugins::toggle",
                    feature = %request.feature_id,
                    address = format_args!("{:#x}", address),
                    reapply = prior.enabled,
                    "toggle enabled"
                );

                let mut result =
                    PluginResult::ok(reason::HOOK_OK, "Installed", "Toggle patch enabled.")
                        .with_diagnostic("anchorKey", anchor_key)
                        .with_diagnostic("address", format!("{:#x}", address))
                        .with_diagnostic(
                            "applyCount",
                            self.state(&request.feature_id).apply_count.to_string(),
                        )
                        .with_diagnostic("restoreKey", key.tag());
                write_diag.export(&mut result.diagnostics);
                result
            }
            Err(e) => {
                // Restore entry stays cached for a later disable retry.
                let message = e.to_string();
                warn!(
                    target: "patchbridge::plugins::toggle",
                    feature = %request.feature_id,
                    error = %message,
                    "toggle patch write failed"
                );
                ctx.hooks.mark_failed(&request.feature_id, &message);
                PluginResult::rejected(reason::PATCH_WRITE_FAILED, message)
                    .with_hook_state("Failed")
                    .with_diagnostic("restoreKey", key.tag())
            }
        }
    }

    fn disable(
        &self,
        ctx: &PluginContext<'_>,
        request: &PluginRequest,
        anchor_key: &str,
        address: usize,
    ) -> PluginResult {
        let key = RestoreKey::new(request.process_id, anchor_key, address);

        let original = match ctx.restore.try_read_bytes(&key) {
            Some(bytes) => bytes,
            None => {
                // Fail closed: never synthesize the pre-patch byte.
                return PluginResult::rejected(
                    reason::PATCH_RESTORE_STATE_MISSING,
                    "No restore entry for this anchor; refusing to guess original bytes.",
                )
                .with_hook_state(ctx.hooks.get(&request.feature_id).state.to_string())
                .with_diagnostic("restoreKey", key.tag());
            }
        };

        match ctx.accessor.write_bytes(address, &original, true) {
            Ok(write_diag) => {
                ctx.restore.remove_bytes(&key);
                ctx.hooks.mark_rolled_back(&request.feature_id);
                self.set_state(&request.feature_id, |state| state.enabled = false);
                debug!(
                    target: "patchbridge::plugins::toggle",
                    feature = %request.feature_id,
                    address = format_args!("{:#x}", address),
                    "toggle disabled"
                );

                let mut result = PluginResult::ok(
                    reason::ROLLBACK_SUCCESS,
                    "RolledBack",
                    "Original byte restored.",
                )
                .with_diagnostic("anchorKey", anchor_key)
                .with_diagnostic("address", format!("{:#x}", address))
                .with_diagnostic("restoreKey", key.tag());
                write_diag.export(&mut result.diagnostics);
                result
            }
            Err(e) => {
                let message = e.to_string();
                ctx.hooks.mark_failed(&request.feature_id, &message);
                PluginResult::rejected(reason::PATCH_WRITE_FAILED, message)
                    .with_hook_state("Failed")
                    .with_diagnostic("restoreKey", key.tag())
            }
        }
    }
}

impl MutationPlugin for GlobalTogglePlugin {
    fn id(&self) -> &'static str {
        "global_toggle"
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

        if target.enable {
            self.enable(ctx, request, &target.anchor_key, target.address)
        } else {
            self.disable(ctx, request, &target.anchor_key, target.address)
        }
    }
}
