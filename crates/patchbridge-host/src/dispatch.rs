//! Command dispatcher: capability gate, built-ins, and plugin routing.
//!
//! Owns the per-session engine state (capability registry, hook
//! registry, restore cache) and routes decoded commands. The ordering
//! contract for mutations is strict: the capability gate runs before
//! any payload parsing, and payload validation runs before any process
//! access, so a rejected command never costs an `OpenProcess`.

use crate::wire;
use patchbridge_common::{debug, info, reason, BridgeCommand, BridgeResult, Result};
use patchbridge_core::{CapabilityRegistry, HookLifecycleRegistry, MemoryAccessor, RestoreCache};
use patchbridge_plugins::{
    BuildPatchPlugin, EconomyPlugin, GlobalTogglePlugin, MutationPlugin, PluginContext,
    PluginRequest,
};

/// Opens an accessor for a target process id.
pub type AccessorFactory = Box<dyn Fn(i32) -> Result<MemoryAccessor> + Send + Sync>;

pub struct Dispatcher {
    capabilities: CapabilityRegistry,
    hooks: HookLifecycleRegistry,
    restore: RestoreCache,
    plugins: Vec<Box<dyn MutationPlugin>>,
    accessor_factory: AccessorFactory,
}

impl Dispatcher {
    /// Dispatcher with the standard plugin set.
    pub fn new(accessor_factory: AccessorFactory) -> Self {
        Self::with_plugins(
            accessor_factory,
            vec![
                Box::new(BuildPatchPlugin::new()),
                Box::new(EconomyPlugin::new()),
                Box::new(GlobalTogglePlugin::new()),
            ],
        )
    }

    pub fn with_plugins(
        accessor_factory: AccessorFactory,
        plugins: Vec<Box<dyn MutationPlugin>>,
    ) -> Self {
        Self {
            capabilities: CapabilityRegistry::new(),
            hooks: HookLifecycleRegistry::new(),
            restore: RestoreCache::new(),
            plugins,
            accessor_factory,
        }
    }

    /// Every feature id the loaded plugins service.
    pub fn known_features(&self) -> Vec<&'static str> {
        self.plugins
            .iter()
            .flat_map(|plugin| plugin.features().iter().copied())
            .collect()
    }

    /// Route one decoded command to a built-in or a plugin.
    pub fn handle(&self, command: &BridgeCommand) -> BridgeResult {
        debug!(
            target: "patchbridge::host::dispatch",
            command_id = %command.command_id,
            feature = %command.feature_id,
            "dispatching command"
        );
        match command.feature_id.as_str() {
            "health" => self.handle_health(command),
            "probe_capabilities" => self.handle_probe(command),
            _ => self.handle_mutation(command),
        }
    }

    fn handle_health(&self, command: &BridgeCommand) -> BridgeResult {
        BridgeResult::ok(
            &command.command_id,
            reason::CAPABILITY_PROBE_PASS,
            "Bridge host is healthy.",
        )
        .with_hook_state("RUNNING")
        .with_diagnostic("bridge", "active")
    }

    /// Probe the attached process and publish every known feature as
    /// available. A supplied pid is verified by actually opening it.
    fn handle_probe(&self, command: &BridgeCommand) -> BridgeResult {
        if command.process_id > 0 {
            if let Err(e) = (self.accessor_factory)(command.process_id) {
                return BridgeResult::rejected(
                    &command.command_id,
                    reason::PROCESS_OPEN_FAILED,
                    e.to_string(),
                )
                .with_hook_state("DENIED")
                .with_diagnostic("processId", command.process_id.to_string());
            }
        }

        for feature_id in self.known_features() {
            self.capabilities.mark_available(feature_id);
        }
        info!(
            target: "patchbridge::host::dispatch",
            process_id = command.process_id,
            features = self.known_features().len(),
            "capability probe passed"
        );

        let mut result = BridgeResult::ok(
            &command.command_id,
            reason::CAPABILITY_PROBE_PASS,
            "Capability probe completed.",
        )
        .with_hook_state("HOOK_READY")
        .with_diagnostic("bridge", "active");
        for (feature_id, entry) in self.capabilities.snapshot() {
            result.diagnostics.insert(
                format!("capability.{}", feature_id),
                format!("{}/{}", entry.state, entry.reason_code),
            );
        }
        for (hook_id, record) in self.hooks.snapshot() {
            result.diagnostics.insert(
                format!("hook.{}", hook_id),
                format!("{}/{}", record.state, record.reason_code),
            );
        }
        result
    }

    fn handle_mutation(&self, command: &BridgeCommand) -> BridgeResult {
        let plugin = match self
            .plugins
            .iter()
            .find(|plugin| plugin.handles(&command.feature_id))
        {
            Some(plugin) => plugin,
            None => {
                return BridgeResult::rejected(
                    &command.command_id,
                    reason::CAPABILITY_BACKEND_UNAVAILABLE,
                    "Feature not supported by this bridge host.",
                )
                .with_hook_state("DENIED")
                .with_diagnostic("featureId", command.feature_id.as_str());
            }
        };

        // Gate before payload parsing and before any process access.
        if !self.capabilities.is_available(&command.feature_id) {
            return BridgeResult::rejected(
                &command.command_id,
                reason::CAPABILITY_REQUIRED_MISSING,
                "Feature has not passed a capability probe.",
            )
            .with_hook_state("DENIED")
            .with_diagnostic("featureId", command.feature_id.as_str());
        }

        if command.process_id <= 0 {
            return BridgeResult::rejected(
                &command.command_id,
                reason::PAYLOAD_FIELD_INVALID,
                "Command is missing a positive processId.",
            )
            .with_hook_state("DENIED")
            .with_diagnostic("requiredField", "processId");
        }

        let request = parse_request(command);

        // Payload and anchor problems are decided here, before the
        // process handle is opened.
        if let Some(rejection) = plugin.validate(&request) {
            let mut result = BridgeResult {
                command_id: command.command_id.clone(),
                succeeded: rejection.succeeded,
                reason_code: rejection.reason_code,
                hook_state: rejection.hook_state,
                message: rejection.message,
                ..Default::default()
            };
            result.diagnostics.extend(rejection.diagnostics);
            return result;
        }

        let accessor = match (self.accessor_factory)(command.process_id) {
            Ok(accessor) => accessor,
            Err(e) => {
                return BridgeResult::rejected(
                    &command.command_id,
                    reason::PROCESS_OPEN_FAILED,
                    e.to_string(),
                )
                .with_hook_state("DENIED")
                .with_diagnostic("processId", command.process_id.to_string());
            }
        };

        let ctx = PluginContext {
            accessor: &accessor,
            restore: &self.restore,
            hooks: &self.hooks,
        };
        let outcome = plugin.execute(&ctx, &request);

        let mut result = BridgeResult {
            command_id: command.command_id.clone(),
            succeeded: outcome.succeeded,
            reason_code: outcome.reason_code,
            hook_state: outcome.hook_state,
            message: outcome.message,
            ..Default::default()
        };
        result.diagnostics.extend(outcome.diagnostics);
        result
    }
}

/// Decode the feature payload into the plugin request. `boolValue` is
/// the accepted legacy spelling of `enable`, and `forcePatchHook` the
/// legacy spelling of `lockCredits`; the legacy flag only ever promotes
/// to a lock, an explicit `lockCredits:false` is never overridden.
fn parse_request(command: &BridgeCommand) -> PluginRequest {
    let payload = command.payload_json.as_str();
    let enable =
        wire::read_bool(payload, "enable").or_else(|| wire::read_bool(payload, "boolValue"));
    let lock = wire::read_bool(payload, "lockCredits")
        .or_else(|| wire::read_bool(payload, "forcePatchHook").filter(|&v| v));
    PluginRequest {
        feature_id: command.feature_id.clone(),
        profile_id: command.profile_id.clone(),
        process_id: command.process_id,
        int_value: wire::read_int(payload, "intValue"),
        enable,
        lock,
        anchors: command.resolved_anchors.clone(),
    }
}
