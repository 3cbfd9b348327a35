//! Browser lifecycle manager
//!
//! Owns the instance registry and drives the per-instance state machine:
//!
//! ```text
//! starting -> running -> stopping -> stopped
//!        \        \                /
//!         \        +--> stopped  (disconnect / last page closed)
//!          +--> error
//! ```
//!
//! `stopped` and `error` are terminal for a registry entry; the entry is
//! purged on the transition and a later `launch` under the same name starts
//! fresh. Callers serialize operations per name; operations across names
//! are fully independent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::cdp::types::{LogEntryAddedEvent, NetworkLoadingFailedEvent};
use crate::cdp::{CdpMessage, Connection, Transport};
use crate::error::{Error, Result};
use crate::evasion;
use crate::events::EventBus;
use crate::launcher;
use crate::page::Page;
use crate::profile::{FingerprintProfile, LaunchOptions};
use crate::registry::{InstanceInfo, InstanceStatus, LiveInstance, Registry};
use crate::state::{Debouncer, StateStore};

/// Window in which repeated document-load events collapse into one save
pub const SAVE_DEBOUNCE: Duration = Duration::from_secs(1);

/// Deadline for the liveness probe; a healthy browser answers in
/// milliseconds
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(3);

struct ManagerInner {
    profiles_root: PathBuf,
    registry: Registry,
    events: EventBus,
    state: StateStore,
    save_debounce: Debouncer,
}

/// Manages a pool of named, fingerprinted browser instances
pub struct BrowserManager {
    inner: Arc<ManagerInner>,
}

impl BrowserManager {
    /// Create a manager whose instances live under `profiles_root`
    pub fn new(profiles_root: impl Into<PathBuf>) -> Self {
        let profiles_root = profiles_root.into();
        Self {
            inner: Arc::new(ManagerInner {
                state: StateStore::new(profiles_root.clone()),
                profiles_root,
                registry: Registry::new(),
                events: EventBus::new(),
                save_debounce: Debouncer::new(SAVE_DEBOUNCE),
            }),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::events::StatusEvent> {
        self.inner.events.subscribe()
    }

    /// Launch a named instance.
    ///
    /// Fails with [`Error::AlreadyRunning`] if the name maps to a starting
    /// or running instance. The fingerprint, when given, is applied before
    /// the page is allowed to navigate anywhere. Previously saved session
    /// state is restored best-effort. If anything fails after the process
    /// was created, the process is torn down before the error propagates.
    pub async fn launch(
        &self,
        name: &str,
        options: LaunchOptions,
        fingerprint: Option<FingerprintProfile>,
    ) -> Result<InstanceInfo> {
        self.inner.registry.reserve(name)?;
        self.inner
            .events
            .status_changed(name, InstanceStatus::Starting);
        tracing::info!("Launching instance '{}'", name);

        match self.launch_inner(name, &options, fingerprint).await {
            Ok(info) => {
                self.inner
                    .events
                    .status_changed(name, InstanceStatus::Running);
                tracing::info!("Instance '{}' running", name);
                Ok(info)
            }
            Err(e) => {
                self.inner.registry.remove(name);
                self.inner
                    .events
                    .status_changed(name, InstanceStatus::Error);
                self.inner.events.error(name, e.to_string());
                tracing::error!("Launch of '{}' failed: {}", name, e);
                Err(e)
            }
        }
    }

    /// Launch from a stored named configuration
    pub async fn launch_config(
        &self,
        name: &str,
        config: crate::config::BrowserConfig,
    ) -> Result<InstanceInfo> {
        self.launch(name, config.launch, config.fingerprint).await
    }

    async fn launch_inner(
        &self,
        name: &str,
        options: &LaunchOptions,
        fingerprint: Option<FingerprintProfile>,
    ) -> Result<InstanceInfo> {
        let user_data_dir = options
            .user_data_dir
            .clone()
            .unwrap_or_else(|| self.inner.profiles_root.join(name).join("user-data"));
        tokio::fs::create_dir_all(&user_data_dir)
            .await
            .map_err(|e| Error::Launch(format!("Failed to create user data dir: {}", e)))?;

        let chrome_path = match &options.chrome_path {
            Some(p) => p.clone(),
            None => launcher::find_chrome()?,
        };
        let args = launcher::build_args(options, &user_data_dir);

        let (child, ws_url) = launcher::spawn(&chrome_path, &args, &options.env)?;

        // connect() kills the child itself if the socket cannot be
        // established, so a failure here leaks nothing
        let transport = Transport::connect(child, &ws_url)
            .map_err(|e| Error::Launch(format!("DevTools connect failed: {}", e)))?;
        let connection = Arc::new(Connection::new(transport));

        let page = match self.setup_instance(name, &connection, options, &fingerprint).await {
            Ok(page) => Arc::new(page),
            Err(e) => {
                // The process exists; tear it down before propagating
                let _ = connection.close().await;
                return Err(Error::setup("page initialization", e));
            }
        };

        let target_id = page.target_id().to_string();

        // Best-effort: a never-saved or unreadable state never blocks launch
        self.inner.state.restore(name, &page).await;

        let live = LiveInstance {
            connection: Arc::clone(&connection),
            page: Arc::clone(&page),
            status: InstanceStatus::Running,
            fingerprint,
            user_data_dir,
            target_id,
            pump: None,
        };
        let info = live.info(name);
        self.inner.registry.activate(name, live);

        let pump = tokio::spawn(run_pump(
            Arc::clone(&self.inner),
            name.to_string(),
            Arc::clone(&connection),
            Arc::clone(&page),
        ));
        self.inner.registry.set_pump(name, pump);

        Ok(info)
    }

    /// Confirm the connection, set up the primary page and apply the
    /// fingerprint. Runs after the process exists, so every error from here
    /// is a setup failure, not a launch failure.
    async fn setup_instance(
        &self,
        name: &str,
        connection: &Connection,
        options: &LaunchOptions,
        fingerprint: &Option<FingerprintProfile>,
    ) -> Result<Page> {
        let version = connection.version().await?;
        tracing::debug!("Instance '{}' connected to {}", name, version.product);

        connection.set_discover_targets(true).await?;

        // Chrome opens an initial blank page; adopt it rather than leaving
        // an unmanaged window around
        let targets = connection.targets().await?;
        let target_id = match targets.iter().find(|t| t.r#type == "page") {
            Some(target) => target.target_id.clone(),
            None => connection.create_target("about:blank").await?,
        };

        let session = connection.attach_to_target(&target_id).await?;
        session.page_enable().await?;
        session.network_enable().await?;
        if let Err(e) = session.log_enable().await {
            tracing::debug!("Log domain unavailable for '{}': {}", name, e);
        }

        let page = Page::new(session);

        if let Some(profile) = fingerprint {
            // Must happen before any navigation: the injected script only
            // covers documents created after registration
            if let Err(e) = evasion::apply_profile(&page, profile, options.viewport).await {
                // Partial protection is better than none; surface it and
                // keep the launch going
                tracing::warn!("Fingerprint injection incomplete for '{}': {}", name, e);
                self.inner.events.error(name, e.to_string());
            }
        }

        Ok(page)
    }

    /// Stop a named instance.
    ///
    /// Saves session state, closes the browser, removes the registry entry
    /// and emits `Closed` regardless of whether the close call itself
    /// succeeded. Calling it for a name that is not running, including a
    /// second time in a row, is a no-op.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let Some((_, page, _)) = self.inner.registry.handles(name) else {
            tracing::debug!("Stop for '{}' ignored: not running", name);
            return Ok(());
        };

        self.inner.registry.set_status(name, InstanceStatus::Stopping);
        self.inner
            .events
            .status_changed(name, InstanceStatus::Stopping);
        self.inner.save_debounce.cancel(name);

        // Final save, unconditional and best-effort
        self.inner.state.save(name, &page).await;

        // The entry may have been torn down by the pump while we saved
        let Some(live) = self.inner.registry.remove(name) else {
            return Ok(());
        };
        if let Some(pump) = live.pump {
            pump.abort();
        }
        if let Err(e) = live.connection.close().await {
            tracing::warn!("Close failed for '{}': {}", name, e);
        }

        self.inner
            .events
            .status_changed(name, InstanceStatus::Stopped);
        self.inner.events.closed(name);
        tracing::info!("Instance '{}' stopped", name);
        Ok(())
    }

    /// Whether the named instance is currently live.
    ///
    /// Actively probes the browser; a registry entry whose process died
    /// without firing a disconnect event is purged here as a side effect
    /// (lazy reconciliation).
    pub async fn is_running(&self, name: &str) -> bool {
        let Some((connection, _, _)) = self.inner.registry.handles(name) else {
            // A reserved slot is a launch in progress
            return self.inner.registry.contains(name);
        };

        // Cheap check first: a reaped process needs no protocol round-trip
        let alive = connection.transport().process_alive().await
            && matches!(
                tokio::time::timeout(LIVENESS_TIMEOUT, connection.version()).await,
                Ok(Ok(_))
            );

        if !alive {
            tracing::warn!("Instance '{}' found dead on liveness check", name);
            self.purge_dead(name).await;
        }
        alive
    }

    /// Stop every instance: one final save each, then parallel close. The
    /// registry ends empty no matter how many individual closes fail.
    pub async fn close_all(&self) {
        let instances = self.inner.registry.drain();
        if instances.is_empty() {
            return;
        }
        self.inner.save_debounce.cancel_all();

        for (name, live) in &instances {
            self.inner.state.save(name, &live.page).await;
        }

        let closes = instances.into_iter().map(|(name, live)| {
            let inner = Arc::clone(&self.inner);
            async move {
                if let Some(pump) = live.pump {
                    pump.abort();
                }
                if let Err(e) = live.connection.close().await {
                    tracing::warn!("Close failed for '{}': {}", name, e);
                }
                inner.events.status_changed(&name, InstanceStatus::Stopped);
                inner.events.closed(&name);
            }
        });
        join_all(closes).await;
        tracing::info!("All instances closed");
    }

    /// Current lifecycle status; unknown names report `Stopped`
    pub fn status(&self, name: &str) -> InstanceStatus {
        self.inner
            .registry
            .status(name)
            .unwrap_or(InstanceStatus::Stopped)
    }

    /// Status snapshot of every tracked instance
    pub fn statuses(&self) -> std::collections::BTreeMap<String, InstanceStatus> {
        self.inner.registry.statuses()
    }

    /// Snapshot of a live instance
    pub fn info(&self, name: &str) -> Result<InstanceInfo> {
        self.inner
            .registry
            .info(name)
            .ok_or_else(|| Error::NotRunning(name.to_string()))
    }

    /// Borrow the primary page of a live instance.
    ///
    /// The registry keeps ownership; callers use the handle for the
    /// duration of one operation and drop it.
    pub fn page(&self, name: &str) -> Result<Arc<Page>> {
        self.inner
            .registry
            .handles(name)
            .map(|(_, page, _)| page)
            .ok_or_else(|| Error::NotRunning(name.to_string()))
    }

    /// Persist a live instance's session state immediately, outside the
    /// debounced schedule
    pub async fn save_now(&self, name: &str) -> Result<()> {
        let Some((_, page, _)) = self.inner.registry.handles(name) else {
            return Err(Error::NotRunning(name.to_string()));
        };
        self.inner.state.save(name, &page).await;
        Ok(())
    }

    /// Remove a dead instance's entry and reap whatever is left of it
    async fn purge_dead(&self, name: &str) {
        self.inner.save_debounce.cancel(name);
        if let Some(live) = self.inner.registry.remove(name) {
            if let Some(pump) = live.pump {
                pump.abort();
            }
            let _ = live.connection.close().await;
            self.inner
                .events
                .status_changed(name, InstanceStatus::Stopped);
            self.inner.events.closed(name);
        }
    }
}

/// Per-instance event pump: feeds status transitions and the debounced
/// save schedule from the browser's event stream
async fn run_pump(
    inner: Arc<ManagerInner>,
    name: String,
    connection: Arc<Connection>,
    page: Arc<Page>,
) {
    loop {
        let Some(message) = connection.transport().recv_event().await else {
            // Socket gone: the process exited or was killed
            tracing::info!("Instance '{}' disconnected", name);
            teardown_disconnected(&inner, &name).await;
            break;
        };

        let CdpMessage::Event { method, params, .. } = message else {
            continue;
        };

        match method.as_str() {
            "Page.loadEventFired" => {
                // Debounced: a page doing several rapid internal
                // navigations produces a single write
                let inner_save = Arc::clone(&inner);
                let page = Arc::clone(&page);
                let save_name = name.clone();
                inner.save_debounce.trigger(&name, async move {
                    inner_save.state.save(&save_name, &page).await;
                });
            }
            "Target.targetDestroyed" => {
                // A single destroy event is not conclusive; the page list
                // is. The user closing the last window is a valid
                // termination path that fires no disconnect.
                match connection.open_page_count().await {
                    Ok(0) => {
                        tracing::info!("Instance '{}' has no pages left, shutting down", name);
                        let _ = connection.close().await;
                        teardown_disconnected(&inner, &name).await;
                        break;
                    }
                    Ok(remaining) => {
                        tracing::debug!("Instance '{}' has {} page(s) left", name, remaining);
                    }
                    Err(e) => {
                        tracing::debug!("Page list check failed for '{}': {}", name, e);
                    }
                }
            }
            "Network.loadingFailed" => {
                if let Ok(event) = serde_json::from_value::<NetworkLoadingFailedEvent>(params) {
                    if !event.canceled.unwrap_or(false) {
                        tracing::warn!(
                            "Request failed in '{}': {} ({})",
                            name,
                            event.error_text,
                            event.request_id
                        );
                    }
                }
            }
            "Log.entryAdded" => {
                if let Ok(event) = serde_json::from_value::<LogEntryAddedEvent>(params) {
                    if event.entry.level == "error" {
                        tracing::warn!("Page error in '{}': {}", name, event.entry.text);
                        inner.events.error(&name, event.entry.text);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Registry cleanup after a detected disconnect. Runs on the pump task, so
/// it must not abort the pump handle it finds in the entry.
async fn teardown_disconnected(inner: &Arc<ManagerInner>, name: &str) {
    inner.save_debounce.cancel(name);
    if let Some(live) = inner.registry.remove(name) {
        drop(live.pump);
        let _ = live.connection.close().await;
        inner
            .events
            .status_changed(name, InstanceStatus::Stopped);
        inner.events.closed(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StatusEventKind;

    #[tokio::test]
    async fn stop_on_absent_name_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BrowserManager::new(dir.path());

        manager.stop("ghost").await.unwrap();
        manager.stop("ghost").await.unwrap();
        assert_eq!(manager.status("ghost"), InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn is_running_false_for_unknown_name() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BrowserManager::new(dir.path());
        assert!(!manager.is_running("ghost").await);
    }

    #[tokio::test]
    async fn info_on_absent_name_is_not_running_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BrowserManager::new(dir.path());
        let err = manager.info("ghost").unwrap_err();
        assert!(matches!(err, Error::NotRunning(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn save_now_requires_a_live_instance() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BrowserManager::new(dir.path());
        let err = manager.save_now("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotRunning(_)));
    }

    #[tokio::test]
    async fn close_all_with_empty_registry_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BrowserManager::new(dir.path());
        manager.close_all().await;
        assert!(manager.statuses().is_empty());
    }

    #[tokio::test]
    async fn failed_launch_emits_error_and_frees_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BrowserManager::new(dir.path());
        let mut events = manager.subscribe();

        // A nonexistent binary fails at spawn, before any process exists
        let options = LaunchOptions {
            chrome_path: Some(PathBuf::from("/nonexistent/chrome-binary")),
            ..Default::default()
        };
        let err = manager.launch("acct-1", options.clone(), None).await;
        assert!(matches!(err, Err(Error::Launch(_))));

        // starting -> error, and the error event carries the cause
        let mut saw_error_status = false;
        let mut saw_error_event = false;
        while let Ok(event) = events.try_recv() {
            match event.kind {
                StatusEventKind::StatusChanged(InstanceStatus::Error) => saw_error_status = true,
                StatusEventKind::Error(_) => saw_error_event = true,
                _ => {}
            }
        }
        assert!(saw_error_status);
        assert!(saw_error_event);

        // The name is free again: a retry is admitted (and fails the same
        // way, not with AlreadyRunning)
        let retry = manager.launch("acct-1", options, None).await;
        assert!(matches!(retry, Err(Error::Launch(_))));
    }
}
