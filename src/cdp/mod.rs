//! Chrome DevTools Protocol plumbing
//!
//! A deliberately small, hand-rolled CDP client: WebSocket framing,
//! command/response multiplexing with per-command timeouts, and typed
//! wrappers for the commands the lifecycle engine uses.

pub mod connection;
pub mod transport;
pub mod types;
mod ws;

pub use connection::{Connection, Session};
pub use transport::{CdpMessage, Transport};
pub use types::{Cookie, CookieParam, TargetInfo};
