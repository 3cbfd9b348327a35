//! # Rookery
//!
//! A pool of independent, isolated browser instances, each carrying a
//! distinct synthetic identity and persisted session state.
//!
//! Every instance is a real Chrome process with its own user-data
//! directory, launched over a custom minimal CDP client. Before the first
//! navigation, a fingerprint profile is injected into every document the
//! page will ever create: navigator identity, screen geometry, WebGL
//! vendor/renderer, audio characteristics, timezone, plus always-on
//! masking of automation signals. Cookies and web storage are persisted
//! per instance and restored on the next launch.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rookery::{BrowserManager, FingerprintProfile, LaunchOptions};
//!
//! #[tokio::main]
//! async fn main() -> rookery::Result<()> {
//!     let manager = BrowserManager::new("./profiles");
//!
//!     let fingerprint = FingerprintProfile::random();
//!     manager
//!         .launch("acct-1", LaunchOptions::default(), Some(fingerprint))
//!         .await?;
//!
//!     assert!(manager.is_running("acct-1").await);
//!
//!     // Session state is saved automatically on page loads and once more
//!     // here, before the process goes away
//!     manager.stop("acct-1").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle events
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() {
//! # use rookery::BrowserManager;
//! # let manager = BrowserManager::new("./profiles");
//! let mut events = manager.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{}: {:?}", event.name, event.kind);
//!     }
//! });
//! # }
//! ```

pub mod cdp;
pub mod config;
pub mod error;
pub mod evasion;
pub mod events;
pub mod launcher;
pub mod manager;
pub mod page;
pub mod profile;
pub mod registry;
pub mod state;

// Re-exports
pub use config::{BrowserConfig, ProfileStore};
pub use error::{Error, Result};
pub use events::{EventBus, StatusEvent, StatusEventKind};
pub use manager::BrowserManager;
pub use page::Page;
pub use profile::{
    AudioProfile, FingerprintProfile, GeoOverride, LaunchOptions, NavigatorProfile,
    ScreenProfile, TimezoneProfile, Viewport, WebglProfile,
};
pub use registry::{InstanceInfo, InstanceStatus};
pub use state::StateStore;
