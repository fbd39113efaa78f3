//! Host configuration: TOML file with environment overrides.
//!
//! The `PATCHBRIDGE_PORT` variable wins over the config file so a
//! controller can redirect the bridge without touching disk.

use patchbridge_common::{warn, Error, LogConfig, Result};
use serde::{Deserialize, Serialize};

/// Default loopback port for the bridge endpoint.
pub const DEFAULT_PORT: u16 = 13339;

/// Environment variable overriding the configured port.
pub const PORT_ENV_VAR: &str = "PATCHBRIDGE_PORT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Loopback TCP port the bridge listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            log: LogConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Serialization(format!("Failed to read {}: {}", path, e)))?;
        toml::from_str(&text)
            .map_err(|e| Error::Serialization(format!("Failed to parse {}: {}", path, e)))
    }

    /// Load from a TOML file, falling back to defaults when the file is
    /// missing. A present-but-broken file still falls back, with a
    /// warning, so the host always comes up.
    pub fn load_or_default(path: &str) -> Self {
        if !std::path::Path::new(path).exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(target: "patchbridge::host", error = %e, "config load failed, using defaults");
                Self::default()
            }
        }
    }

    /// Configured port, unless `PATCHBRIDGE_PORT` overrides it.
    pub fn effective_port(&self) -> u16 {
        match std::env::var(PORT_ENV_VAR) {
            Ok(raw) if !raw.is_empty() => match raw.parse() {
                Ok(port) => port,
                Err(_) => {
                    warn!(
                        target: "patchbridge::host",
                        value = %raw,
                        "ignoring unparsable port override"
                    );
                    self.port
                }
            },
            _ => self.port,
        }
    }

    /// Loopback endpoint string for the bridge server.
    pub fn endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.effective_port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.log.console_enabled);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: HostConfig = toml::from_str("port = 4000\n\n[log]\nlevel = \"debug\"").unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.log.level, "debug");
        assert!(config.log.console_enabled);
    }

    #[test]
    fn test_parse_empty_toml_uses_defaults() {
        let config: HostConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_env_override_wins_over_configured_port() {
        // Sole test touching the variable, so no cross-test races.
        std::env::set_var(PORT_ENV_VAR, "24000");
        let config = HostConfig::default();
        assert_eq!(config.effective_port(), 24000);
        assert_eq!(config.endpoint(), "127.0.0.1:24000");

        std::env::set_var(PORT_ENV_VAR, "not-a-port");
        assert_eq!(config.effective_port(), DEFAULT_PORT);

        std::env::remove_var(PORT_ENV_VAR);
        assert_eq!(config.effective_port(), DEFAULT_PORT);
    }

    #[test]
    fn test_load_or_default_with_missing_file() {
        let config = HostConfig::load_or_default("definitely-not-here.toml");
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
