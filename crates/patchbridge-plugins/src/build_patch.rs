//! Numeric build-patch family: `set_unit_cap`.
//!
//! Installs a 4-byte little-endian integer at the resolved anchor,
//! capturing the pre-patch bytes first so the write can be undone
//! exactly. Validation order is strict: payload shape, then range, then
//! anchor resolution, and only then any accessor call.

use crate::{find_anchor, MutationPlugin, PluginContext, PluginRequest, PluginResult};
use patchbridge_common::{debug, reason, warn};
use patchbridge_core::{parse_address, RestoreKey};
use std::sync::Mutex;

const FEATURES: &[&str] = &["set_unit_cap"];
const UNIT_CAP_ANCHORS: &[&str] = &["unit_cap", "set_unit_cap"];

const MIN_UNIT_CAP: i32 = 1;
const MAX_UNIT_CAP: i32 = 100_000;

/// All mutable plugin state behind one lock, so diagnostics reads never
/// observe the fields mid-update.
#[derive(Debug, Clone, Copy, Default)]
struct UnitCapState {
    installed: bool,
    enabled: bool,
    last_value: Option<i32>,
}

/// Validated request: everything needed before the first engine call.
struct UnitCapTarget {
    enable: bool,
    value: i32,
    anchor_key: String,
    address: usize,
}

#[derive(Debug, Default)]
pub struct BuildPatchPlugin {
    state: Mutex<UnitCapState>,
}

impl BuildPatchPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> UnitCapState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: UnitCapState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Strict order: payload shape, then range, then anchor resolution.
    fn screen(&self, request: &PluginRequest) -> Result<UnitCapTarget, PluginResult> {
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

        let value = if enable {
            match request.int_value {
                Some(value) => {
                    if !(MIN_UNIT_CAP..=MAX_UNIT_CAP).contains(&value) {
                        return Err(PluginResult::rejected(
                            reason::VALUE_OUT_OF_RANGE,
                            "set_unit_cap requires intValue within safe bounds.",
                        )
                        .with_diagnostic("intValue", value.to_string())
                        .with_diagnostic("minIntValue", MIN_UNIT_CAP.to_string())
                        .with_diagnostic("maxIntValue", MAX_UNIT_CAP.to_string()));
                    }
                    value
                }
                None => {
                    return Err(PluginResult::rejected(
                        reason::PAYLOAD_FIELD_INVALID,
                        "Payload is missing required intValue.",
                    )
                    .with_diagnostic("requiredField", "intValue"));
                }
            }
        } else {
            0
        };

        let (anchor_key, anchor_value) = match find_anchor(&request.anchors, UNIT_CAP_ANCHORS) {
            Some(anchor) => anchor,
            None => {
                return Err(PluginResult::rejected(
                    reason::ANCHOR_UNRESOLVED,
                    "No resolved anchor supplied for set_unit_cap.",
                )
                .with_diagnostic("anchorCandidates", UNIT_CAP_ANCHORS.join(",")));
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

        Ok(UnitCapTarget {
            enable,
            value,
            anchor_key,
            address,
        })
    }

    fn install(
        &self,
        ctx: &PluginContext<'_>,
        request: &PluginRequest,
        anchor_key: &str,
        address: usize,
        value: i32,
    ) -> PluginResult {
        let key = RestoreKey::new(request.process_id, anchor_key, address);
        let prior = self.state();

        // Capture pre-patch bytes before the first mutating write. A
        // re-apply keeps the original entry; first-seen bytes win.
        if !ctx.restore.contains(&key) {
            match ctx.accessor.read_bytes(address, 4) {
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

        match ctx.accessor.write_i32(address, value) {
            Ok(write_diag) => {
                ctx.hooks.mark_installed(&request.feature_id);
                self.set_state(UnitCapState {
                    installed: true,
                    enabled: true,
                    last_value: Some(value),
                });
                debug!(
                    target: "patchbridge::plugins::build_patch",
                    feature = %request.feature_id,
                    address = format_args!("{:#x}", address),
                    value,
                    reapply = prior.installed && prior.enabled,
                    "unit cap patch installed"
                );

                let mut result = PluginResult::ok(
                    reason::HOOK_OK,
                    "Installed",
                    "Unit cap patch installed.",
                )
                .with_diagnostic("anchorKey", anchor_key)
                .with_diagnostic("address", format!("{:#x}", address))
                .with_diagnostic("intValue", value.to_string())
                .with_diagnostic(
                    "previousValue",
                    prior
                        .last_value
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                )
                .with_diagnostic("restoreKey", key.tag());
                write_diag.export(&mut result.diagnostics);
                result
            }
            Err(e) => {
                // The restore entry stays in the cache so a later disable
                // can still retry the rollback.
                let message = e.to_string();
                warn!(
                    target: "patchbridge::plugins::build_patch",
                    feature = %request.feature_id,
                    error = %message,
                    "unit cap patch write failed"
                );
                ctx.hooks.mark_failed(&request.feature_id, &message);
                PluginResult::rejected(reason::PATCH_WRITE_FAILED, message)
                    .with_hook_state("Failed")
                    .with_diagnostic("restoreKey", key.tag())
            }
        }
    }

    fn uninstall(
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
                // Fail closed: nothing saved for this key, so there is
                // nothing safe to write back.
                return PluginResult::rejected(
                    reason::PATCH_RESTORE_STATE_MISSING,
                    "No restore entry for this anchor; refusing to guess original bytes.",
                )
                .with_hook_state(ctx.hooks.get(&request.feature_id).state.to_string())
                .with_diagnostic("restoreKey", key.tag());
            }
        };

        match ctx.accessor.write_bytes(address, &original, false) {
            Ok(write_diag) => {
                ctx.restore.remove_bytes(&key);
                ctx.hooks.mark_rolled_back(&request.feature_id);
                self.set_state(UnitCapState {
                    installed: false,
                    enabled: false,
                    last_value: None,
                });
                debug!(
                    target: "patchbridge::plugins::build_patch",
                    feature = %request.feature_id,
                    address = format_args!("{:#x}", address),
                    "unit cap patch rolled back"
                );

                let mut result = PluginResult::ok(
                    reason::ROLLBACK_SUCCESS,
                    "RolledBack",
                    "Original bytes restored.",
                )
                .with_diagnostic("anchorKey", anchor_key)
                .with_diagnostic("address", format!("{:#x}", address))
                .with_diagnostic("restoreKey", key.tag());
                write_diag.export(&mut result.diagnostics);
                result
            }
            Err(e) => {
                // Entry stays cached so the restore can be retried.
                let message = e.to_string();
                ctx.hooks.mark_failed(&request.feature_id, &message);
                PluginResult::rejected(reason::PATCH_WRITE_FAILED, message)
                    .with_hook_state("Failed")
                    .with_diagnostic("restoreKey", key.tag())
            }
        }
    }
}

impl MutationPlugin for BuildPatchPlugin {
    fn id(&self) -> &'static str {
        "build_patch"
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
            self.install(ctx, request, &target.anchor_key, target.address, target.value)
        } else {
            self.uninstall(ctx, request, &target.anchor_key, target.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeVm;
    use patchbridge_common::HookState;
    use patchbridge_core::{HookLifecycleRegistry, RestoreCache};
    use std::collections::BTreeMap;

    const ANCHOR: usize = 0x00AB_CD12;

    fn request(enable: Option<bool>, int_value: Option<i32>) -> PluginRequest {
        let mut anchors = BTreeMap::new();
        anchors.insert("unit_cap".to_string(), "0x00ABCD12".to_string());
        PluginRequest {
            feature_id: "set_unit_cap".to_string(),
            profile_id: "default".to_string(),
            process_id: 4242,
            int_value,
            enable,
            lock: None,
            anchors,
        }
    }

    struct Fixture {
        vm: FakeVm,
        restore: RestoreCache,
        hooks: HookLifecycleRegistry,
        plugin: BuildPatchPlugin,
    }

    impl Fixture {
        fn new() -> Self {
            let vm = FakeVm::new();
            vm.seed(ANCHOR, &[0xDE, 0xAD, 0xBE, 0xEF]);
            Self {
                vm,
                restore: RestoreCache::new(),
                hooks: HookLifecycleRegistry::new(),
                plugin: BuildPatchPlugin::new(),
            }
        }

        fn execute(&self, request: &PluginRequest) -> PluginResult {
            let accessor = self.vm.accessor();
            let ctx = PluginContext {
                accessor: &accessor,
                restore: &self.restore,
                hooks: &self.hooks,
            };
            self.plugin.execute(&ctx, request)
        }
    }

    #[test]
    fn test_install_stores_original_and_writes_le_value() {
        let fixture = Fixture::new();
        let result = fixture.execute(&request(Some(true), Some(250)));

        assert!(result.succeeded, "{}", result.message);
        assert_eq!(result.reason_code, reason::HOOK_OK);
        assert_eq!(result.hook_state, "Installed");
        assert_eq!(fixture.vm.bytes_at(ANCHOR, 4), vec![250, 0, 0, 0]);

        let key = RestoreKey::new(4242, "unit_cap", ANCHOR);
        assert_eq!(
            fixture.restore.try_read_bytes(&key).unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert_eq!(
            fixture.hooks.get("set_unit_cap").state,
            HookState::Installed
        );
    }

    #[test]
    fn test_round_trip_restores_original_bytes_exactly() {
        let fixture = Fixture::new();
        fixture.execute(&request(Some(true), Some(250)));
        let result = fixture.execute(&request(Some(false), None));

        assert!(result.succeeded, "{}", result.message);
        assert_eq!(result.reason_code, reason::ROLLBACK_SUCCESS);
        assert_eq!(result.hook_state, "RolledBack");
        assert_eq!(fixture.vm.bytes_at(ANCHOR, 4), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(fixture.restore.is_empty());
        assert_eq!(
            fixture.hooks.get("set_unit_cap").state,
            HookState::RolledBack
        );
    }

    #[test]
    fn test_disable_without_install_fails_closed() {
        let fixture = Fixture::new();
        let result = fixture.execute(&request(Some(false), None));

        assert!(!result.succeeded);
        assert_eq!(result.reason_code, reason::PATCH_RESTORE_STATE_MISSING);
        assert_eq!(fixture.vm.write_calls(), 0);
        assert_eq!(fixture.vm.bytes_at(ANCHOR, 4), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_out_of_range_value_rejected_before_io() {
        let fixture = Fixture::new();
        for bad in [0, 200_000, -5] {
            let result = fixture.execute(&request(Some(true), Some(bad)));
            assert!(!result.succeeded);
            assert_eq!(result.reason_code, reason::VALUE_OUT_OF_RANGE);
        }
        assert_eq!(fixture.vm.read_calls(), 0);
        assert_eq!(fixture.vm.write_calls(), 0);
    }

    #[test]
    fn test_missing_enable_flag_is_payload_error() {
        let fixture = Fixture::new();
        let result = fixture.execute(&request(None, Some(100)));
        assert!(!result.succeeded);
        assert_eq!(result.reason_code, reason::PAYLOAD_FIELD_INVALID);
        assert_eq!(fixture.vm.write_calls(), 0);
    }

    #[test]
    fn test_missing_int_value_is_payload_error() {
        let fixture = Fixture::new();
        let result = fixture.execute(&request(Some(true), None));
        assert!(!result.succeeded);
        assert_eq!(result.reason_code, reason::PAYLOAD_FIELD_INVALID);
    }

    #[test]
    fn test_missing_anchor_is_unresolved() {
        let fixture = Fixture::new();
        let mut req = request(Some(true), Some(100));
        req.anchors.clear();
        let result = fixture.execute(&req);
        assert!(!result.succeeded);
        assert_eq!(result.reason_code, reason::ANCHOR_UNRESOLVED);
        assert_eq!(fixture.vm.write_calls(), 0);
    }

    #[test]
    fn test_unparsable_anchor_is_unresolved() {
        let fixture = Fixture::new();
        let mut req = request(Some(true), Some(100));
        req.anchors
            .insert("unit_cap".to_string(), "not-hex".to_string());
        let result = fixture.execute(&req);
        assert_eq!(result.reason_code, reason::ANCHOR_UNRESOLVED);
    }

    #[test]
    fn test_reapply_preserves_first_seen_restore_bytes() {
        let fixture = Fixture::new();
        fixture.execute(&request(Some(true), Some(250)));
        fixture.execute(&request(Some(true), Some(500)));

        let key = RestoreKey::new(4242, "unit_cap", ANCHOR);
        assert_eq!(
            fixture.restore.try_read_bytes(&key).unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert_eq!(fixture.vm.bytes_at(ANCHOR, 4), vec![0xF4, 0x01, 0, 0]);

        let result = fixture.execute(&request(Some(false), None));
        assert!(result.succeeded);
        assert_eq!(fixture.vm.bytes_at(ANCHOR, 4), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_write_failure_marks_hook_failed_and_keeps_restore_entry() {
        let fixture = Fixture::new();
        fixture.vm.fail_writes(true);
        let result = fixture.execute(&request(Some(true), Some(250)));

        assert!(!result.succeeded);
        assert_eq!(result.reason_code, reason::PATCH_WRITE_FAILED);
        assert!(result.message.contains("WriteProcessMemory failed"));
        assert_eq!(fixture.hooks.get("set_unit_cap").state, HookState::Failed);

        // Restore entry kept so a later disable can retry the rollback.
        let key = RestoreKey::new(4242, "unit_cap", ANCHOR);
        assert!(fixture.restore.contains(&key));

        fixture.vm.fail_writes(false);
        let result = fixture.execute(&request(Some(false), None));
        assert!(result.succeeded);
        assert_eq!(fixture.vm.bytes_at(ANCHOR, 4), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_anchor_fallback_spelling_accepted() {
        let fixture = Fixture::new();
        let mut req = request(Some(true), Some(77));
        req.anchors.clear();
        req.anchors
            .insert("set_unit_cap".to_string(), "0x00ABCD12".to_string());
        let result = fixture.execute(&req);
        assert!(result.succeeded, "{}", result.message);
        assert_eq!(fixture.vm.bytes_at(ANCHOR, 4), vec![77, 0, 0, 0]);
    }
}
