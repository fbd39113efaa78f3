//! Logging configuration for patchbridge components.
//!
//! Console logging goes to stderr so the wire transport on stdout-adjacent
//! tooling stays clean; file logging is append-only for post-mortems after
//! a failed patch session.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static FILE_LOGGER: Mutex<Option<File>> = Mutex::new(None);

/// Logging configuration matching the host config file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable console logging (stderr)
    #[serde(default = "default_true")]
    pub console_enabled: bool,

    /// Enable file logging
    #[serde(default)]
    pub file_enabled: bool,

    /// Log file path
    #[serde(default = "default_log_path")]
    pub file_path: String,

    /// Include module target
    #[serde(default = "default_true")]
    pub show_target: bool,

    /// Use ANSI colors on the console
    #[serde(default = "default_true")]
    pub ansi_colors: bool,

    /// Log level as string
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "patchbridge.log".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: default_log_path(),
            show_target: true,
            ansi_colors: true,
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// Config with file logging enabled in addition to the console.
    pub fn with_file(mut self, path: &str) -> Self {
        self.file_enabled = true;
        self.file_path = path.to_string();
        self
    }

    /// Set log level.
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }
}

fn file_writer() -> Box<dyn Write + Send> {
    if let Ok(guard) = FILE_LOGGER.lock() {
        if let Some(ref file) = *guard {
            if let Ok(f) = file.try_clone() {
                return Box::new(f);
            }
        }
    }
    Box::new(std::io::sink())
}

/// Initialize logging with the given configuration.
///
/// Can be called multiple times but only the first call installs the
/// global subscriber.
pub fn init_logging(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.file_enabled && !config.file_path.is_empty() {
        if let Ok(file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file_path)
        {
            if let Ok(mut guard) = FILE_LOGGER.lock() {
                *guard = Some(file);
            }
        }
    }

    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_ansi(config.ansi_colors)
            .with_target(config.show_target)
            .with_writer(std::io::stderr)
    });

    let file_layer = config.file_enabled.then(|| {
        fmt::layer()
            .with_ansi(false)
            .with_target(config.show_target)
            .with_writer(file_writer)
    });

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize logging for the bridge host with default settings.
pub fn init_host_logging() {
    init_logging(&LogConfig::default());
}
