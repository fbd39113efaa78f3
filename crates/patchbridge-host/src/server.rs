//! Single-worker bridge server over loopback TCP.
//!
//! One worker thread serializes every command: accept one connection,
//! read one newline-terminated line, handle, answer, close, loop. Two
//! mutations can therefore never interleave their restore-cache or
//! protection effects. Transport errors log and continue the loop; only
//! `stop()` ends it.

use crate::wire;
use patchbridge_common::{debug, error, info, reason, warn, BridgeCommand, BridgeResult};
use patchbridge_common::{Error, Result, BACKEND_ID};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on one command line.
pub const MAX_COMMAND_SIZE: usize = 16 * 1024;

const READ_TIMEOUT: Duration = Duration::from_millis(1000);
const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Command handler installed before `start()`.
pub type Handler = Arc<dyn Fn(&BridgeCommand) -> BridgeResult + Send + Sync>;

pub struct BridgeServer {
    endpoint: String,
    handler: Option<Handler>,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl BridgeServer {
    /// Server for a loopback endpoint such as `127.0.0.1:13339`. Port 0
    /// binds an ephemeral port, reported by [`BridgeServer::local_addr`].
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            handler: None,
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            worker: None,
        }
    }

    /// Install the command handler. Without one, every command answers
    /// `CAPABILITY_BACKEND_UNAVAILABLE`.
    pub fn set_handler(&mut self, handler: Handler) {
        self.handler = Some(handler);
    }

    /// Bind the listener and spawn the worker. Idempotent while running.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listener = match TcpListener::bind(&self.endpoint) {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                error!(
                    target: "patchbridge::host::server",
                    endpoint = %self.endpoint,
                    error = %e,
                    "failed to bind bridge endpoint"
                );
                return Err(Error::Ipc(format!(
                    "Failed to bind {}: {}",
                    self.endpoint, e
                )));
            }
        };
        self.local_addr = listener.local_addr().ok();
        info!(
            target: "patchbridge::host::server",
            endpoint = %self.endpoint,
            "bridge server listening"
        );

        let running = Arc::clone(&self.running);
        let handler = self.handler.clone();
        self.worker = Some(std::thread::spawn(move || run_loop(listener, running, handler)));
        Ok(())
    }

    /// Stop the worker: flip the flag, nudge the listener out of its
    /// blocking accept with a throwaway connection, then join.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(addr) = self.local_addr {
            let _ = TcpStream::connect_timeout(&addr, WAKE_CONNECT_TIMEOUT);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        info!(target: "patchbridge::host::server", "bridge server stopped");
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound address once started; useful with an ephemeral port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decode one raw line, enforce the protocol envelope, and delegate to
/// the handler. Protocol rejections never reach the handler.
pub fn handle_raw_command(handler: Option<&Handler>, json_line: &str) -> BridgeResult {
    let command = wire::decode_command(json_line);

    if command.command_id.is_empty() {
        return BridgeResult::rejected(
            "",
            reason::CAPABILITY_BACKEND_UNAVAILABLE,
            "Command payload missing commandId.",
        )
        .with_hook_state("invalid_command")
        .with_diagnostic("parseError", "missing_commandId");
    }

    let handler = match handler {
        Some(handler) => handler,
        None => {
            return BridgeResult::rejected(
                &command.command_id,
                reason::CAPABILITY_BACKEND_UNAVAILABLE,
                "Bridge handler is not configured.",
            )
            .with_hook_state("handler_missing")
            .with_diagnostic("handler", "missing");
        }
    };

    let mut result = handler(&command);
    if result.command_id.is_empty() {
        result.command_id = command.command_id;
    }
    if result.backend.is_empty() {
        result.backend = BACKEND_ID.to_string();
    }
    result
}

fn run_loop(listener: TcpListener, running: Arc<AtomicBool>, handler: Option<Handler>) {
    while running.load(Ordering::SeqCst) {
        let (mut stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) => {
                warn!(target: "patchbridge::host::server", error = %e, "accept failed");
                // A persistent accept error must not spin the worker.
                std::thread::sleep(ACCEPT_RETRY_DELAY);
                continue;
            }
        };
        // A wake connection from stop() lands here.
        if !running.load(Ordering::SeqCst) {
            break;
        }
        debug!(target: "patchbridge::host::server", peer = %peer, "client connected");

        let line = match read_command_line(&mut stream) {
            Ok(line) => line,
            Err(e) => {
                debug!(target: "patchbridge::host::server", error = %e, "dropping connection");
                continue;
            }
        };

        let result = handle_raw_command(handler.as_ref(), &line);
        let mut response = wire::encode_result(&result);
        response.push('\n');
        if let Err(e) = stream
            .write_all(response.as_bytes())
            .and_then(|_| stream.flush())
        {
            debug!(target: "patchbridge::host::server", error = %e, "response write failed");
        }
        // Connection closes on drop; one command per connection.
    }
}

/// Read up to the first newline, bounded by [`MAX_COMMAND_SIZE`].
fn read_command_line(stream: &mut TcpStream) -> Result<String> {
    let _ = stream.set_read_timeout(Some(READ_TIMEOUT));

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let read = stream
            .read(&mut chunk)
            .map_err(|e| Error::Ipc(format!("Read failed: {}", e)))?;
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
        if buf.contains(&b'\n') {
            break;
        }
        if buf.len() > MAX_COMMAND_SIZE {
            return Err(Error::Ipc(format!(
                "Command exceeds {} bytes",
                MAX_COMMAND_SIZE
            )));
        }
    }

    let line_end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());
    let line = String::from_utf8_lossy(&buf[..line_end]);
    Ok(line.trim_end_matches('\r').to_string())
}
