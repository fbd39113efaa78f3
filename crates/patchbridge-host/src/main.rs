//! Bridge host entry point.
//!
//! Loads config, wires the dispatcher into the TCP bridge server, then
//! blocks on stdin until EOF or an explicit `quit`, so the host can be
//! driven both interactively and as a supervised child process.

use patchbridge_common::{error, info, init_logging};
use patchbridge_host::dispatch::{AccessorFactory, Dispatcher};
use patchbridge_host::{BridgeServer, HostConfig};
use std::io::BufRead;
use std::sync::Arc;

const CONFIG_PATH: &str = "patchbridge.toml";

#[cfg(windows)]
fn accessor_factory() -> AccessorFactory {
    use patchbridge_core::MemoryAccessor;
    Box::new(MemoryAccessor::open)
}

#[cfg(not(windows))]
fn accessor_factory() -> AccessorFactory {
    use patchbridge_common::Error;
    Box::new(|process_id| {
        Err(Error::ProcessOpen {
            pid: process_id,
            message: "process mutation is only supported on Windows hosts".to_string(),
        })
    })
}

fn main() {
    let config = HostConfig::load_or_default(CONFIG_PATH);
    init_logging(&config.log);

    let dispatcher = Arc::new(Dispatcher::new(accessor_factory()));
    let mut server = BridgeServer::new(config.endpoint());
    let handler_dispatcher = Arc::clone(&dispatcher);
    server.set_handler(Arc::new(move |command| handler_dispatcher.handle(command)));

    if let Err(e) = server.start() {
        error!(target: "patchbridge::host", error = %e, "failed to start bridge host");
        std::process::exit(1);
    }
    info!(
        target: "patchbridge::host",
        endpoint = %config.endpoint(),
        "patchbridge host started"
    );

    // Block until the controller closes stdin or asks us to quit.
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(text) if matches!(text.trim(), "quit" | "exit") => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    server.stop();
    info!(target: "patchbridge::host", "patchbridge host stopped");
}
