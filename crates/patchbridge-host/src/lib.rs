//! Patchbridge Host
//!
//! The bridge host: decodes line-oriented commands from a loopback TCP
//! endpoint, routes them through the capability-gated dispatcher, and
//! writes result envelopes back. One worker thread, strictly one
//! command at a time; serialization is the concurrency model.

pub mod config;
pub mod dispatch;
pub mod server;
pub mod wire;

pub use config::HostConfig;
pub use dispatch::Dispatcher;
pub use server::BridgeServer;
