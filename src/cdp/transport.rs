//! CDP transport
//!
//! Owns the Chrome child process and the DevTools WebSocket. Commands are
//! multiplexed over one socket; a reader thread dispatches responses to
//! pending callers and forwards events to the instance's event pump.
//! Includes built-in filtering of CDP commands that anti-bot scripts are
//! known to probe for.

use std::collections::HashMap;
use std::net::TcpStream;
use std::process::Child;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};

use super::ws;
use crate::error::{Error, Result};

/// Default bound on any single outbound command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Commands that are never sent (highly detectable by anti-bot scripts)
const BLOCKED_COMMANDS: &[&str] = &[
    "Runtime.enable",
    "Runtime.disable",
    "HeapProfiler.enable",
    "HeapProfiler.disable",
    "Profiler.enable",
    "Profiler.disable",
    "Debugger.enable",
    "Debugger.disable",
    "Console.enable",
    "Console.disable",
];

fn is_blocked(method: &str) -> bool {
    BLOCKED_COMMANDS.contains(&method)
}

/// A pending request waiting for a response
type PendingRequest = oneshot::Sender<Result<Value>>;

/// A parsed CDP message (response or event)
#[derive(Debug)]
pub enum CdpMessage {
    Response {
        id: u64,
        result: Result<Value>,
    },
    Event {
        method: String,
        params: Value,
        session_id: Option<String>,
    },
}

/// CDP transport: command send/receive plus process ownership
pub struct Transport {
    /// The Chrome child process
    child: Mutex<Child>,
    /// WebSocket stream for writing
    writer: Mutex<TcpStream>,
    /// Next message ID
    next_id: AtomicU64,
    /// Pending requests waiting for responses
    pending: Arc<Mutex<HashMap<u64, PendingRequest>>>,
    /// Channel carrying events from the reader thread
    event_rx: Mutex<mpsc::Receiver<CdpMessage>>,
    /// Per-command deadline
    command_timeout: Duration,
}

impl Transport {
    /// Connect to a launched Chrome's DevTools WebSocket.
    ///
    /// Takes ownership of the child process; if the handshake fails the
    /// process is killed before the error is returned so a failed connect
    /// never leaks a browser.
    pub fn connect(mut child: Child, ws_url: &str) -> Result<Self> {
        match Self::open_socket(ws_url) {
            Ok(stream) => Self::build(child, stream, ws_url),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    fn open_socket(ws_url: &str) -> Result<TcpStream> {
        let url = ws_url.trim_start_matches("ws://");
        let (host_port, _) = url.split_once('/').unwrap_or((url, ""));
        let path = format!("/{}", url.split_once('/').map(|(_, p)| p).unwrap_or(""));

        let mut stream = TcpStream::connect(host_port)
            .map_err(|e| Error::transport_io("Failed to connect to DevTools socket", e))?;
        ws::handshake(&mut stream, host_port, &path)?;
        tracing::debug!("WebSocket connected to {}", ws_url);
        Ok(stream)
    }

    fn build(child: Child, stream: TcpStream, ws_url: &str) -> Result<Self> {
        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                let mut child = child;
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::transport_io("Failed to clone stream", e));
            }
        };

        let pending: Arc<Mutex<HashMap<u64, PendingRequest>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(256);

        let pending_clone = Arc::clone(&pending);
        let url = ws_url.to_string();
        std::thread::spawn(move || {
            Self::reader_loop(reader_stream, pending_clone, event_tx);
            tracing::debug!("CDP reader loop ended for {}", url);
        });

        Ok(Self {
            child: Mutex::new(child),
            writer: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            pending,
            event_rx: Mutex::new(event_rx),
            command_timeout: COMMAND_TIMEOUT,
        })
    }

    /// Reader loop, runs on a dedicated thread for the life of the socket
    fn reader_loop(
        mut stream: TcpStream,
        pending: Arc<Mutex<HashMap<u64, PendingRequest>>>,
        event_tx: mpsc::Sender<CdpMessage>,
    ) {
        loop {
            let (opcode, payload) = match ws::read_frame(&mut stream) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    break;
                }
            };

            match opcode {
                ws::OPCODE_TEXT => {
                    let text = match String::from_utf8(payload) {
                        Ok(s) => s,
                        Err(_) => continue,
                    };

                    let msg: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!("Failed to parse CDP message: {} - {}", e, text);
                            continue;
                        }
                    };

                    if let Some(id) = msg.get("id").and_then(|v| v.as_u64()) {
                        let result = if let Some(error) = msg.get("error") {
                            Err(Error::cdp(
                                msg.get("method")
                                    .and_then(|m| m.as_str())
                                    .unwrap_or("unknown"),
                                error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1),
                                error
                                    .get("message")
                                    .and_then(|m| m.as_str())
                                    .unwrap_or("unknown"),
                            ))
                        } else {
                            Ok(msg.get("result").cloned().unwrap_or(json!({})))
                        };

                        let mut pending_guard = pending.blocking_lock();
                        if let Some(sender) = pending_guard.remove(&id) {
                            let _ = sender.send(result);
                        } else {
                            tracing::trace!("Response for unknown id: {}", id);
                        }
                    } else if let Some(method) = msg.get("method").and_then(|m| m.as_str()) {
                        let params = msg.get("params").cloned().unwrap_or(json!({}));
                        let session_id = msg
                            .get("sessionId")
                            .and_then(|s| s.as_str())
                            .map(String::from);

                        let _ = event_tx.blocking_send(CdpMessage::Event {
                            method: method.to_string(),
                            params,
                            session_id,
                        });
                    }
                }
                ws::OPCODE_PING => {
                    let _ = ws::write_pong_frame(&mut stream);
                }
                ws::OPCODE_CLOSE => {
                    tracing::debug!("WebSocket closed by browser");
                    break;
                }
                _ => {}
            }
        }
    }

    /// Send a browser-scope CDP command and wait for its response
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.send_impl(None, method, params).await
    }

    /// Send a CDP command to a specific attached session
    pub async fn send_to_session<C, R>(
        &self,
        session_id: &str,
        method: &str,
        params: &C,
    ) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.send_impl(Some(session_id), method, params).await
    }

    async fn send_impl<C, R>(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: &C,
    ) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        // Blocked commands resolve to an empty object; result types use
        // #[serde(default)] so this deserializes cleanly.
        if is_blocked(method) {
            tracing::debug!("Blocked CDP command: {}", method);
            return serde_json::from_value(json!({})).map_err(Into::into);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": serde_json::to_value(params)?
        });
        if let Some(session_id) = session_id {
            msg["sessionId"] = json!(session_id);
        }

        let data = serde_json::to_string(&msg)?;

        {
            let mut writer = self.writer.lock().await;
            ws::write_text_frame(&mut writer, data.as_bytes())
                .map_err(|e| Error::transport_io("WebSocket write failed", e))?;
        }

        tracing::trace!(
            "Sent CDP command: {} (id={}, session={:?})",
            method,
            id,
            session_id
        );

        // Bound the wait: a hung browser must not wedge the caller. On
        // timeout the pending slot is dropped so a late reply is discarded.
        let result = match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(reply) => reply.map_err(|_| Error::transport("Response channel closed"))??,
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                return Err(Error::Timeout(format!(
                    "{} did not complete within {:?}",
                    method, self.command_timeout
                )));
            }
        };

        let response: R = serde_json::from_value(result)?;
        Ok(response)
    }

    /// Receive the next event from the browser; `None` means the socket
    /// closed (browser exited or was killed).
    pub async fn recv_event(&self) -> Option<CdpMessage> {
        let mut rx = self.event_rx.lock().await;
        rx.recv().await
    }

    /// True while the child process has not exited
    pub async fn process_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    /// Close the socket and kill the browser process
    pub async fn close(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            let _ = ws::write_close_frame(&mut writer);
        }

        let mut child = self.child.lock().await;
        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Last-resort kill if close() was never called
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_domain_is_blocked() {
        assert!(is_blocked("Runtime.enable"));
        assert!(is_blocked("Debugger.enable"));
        assert!(!is_blocked("Page.enable"));
        assert!(!is_blocked("Network.getCookies"));
    }
}
