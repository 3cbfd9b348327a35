//! Session state persistence
//!
//! Writes an instance's cookies and storage areas to per-instance files and
//! restores them on relaunch. Everything here is best-effort: a failed save
//! or restore is a warning, never an error, and one area failing does not
//! stop the others.
//!
//! Layout, one directory per instance name under the profiles root:
//!
//! ```text
//! <profiles_root>/<name>/state/cookies.json
//! <profiles_root>/<name>/state/localStorage.json
//! <profiles_root>/<name>/state/sessionStorage.json
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;

use crate::cdp::{Cookie, CookieParam};
use crate::page::Page;

const COOKIES_FILE: &str = "cookies.json";
const LOCAL_STORAGE_FILE: &str = "localStorage.json";
const SESSION_STORAGE_FILE: &str = "sessionStorage.json";

/// Per-instance state files under a common profiles root
pub struct StateStore {
    profiles_root: PathBuf,
}

impl StateStore {
    pub fn new(profiles_root: impl Into<PathBuf>) -> Self {
        Self {
            profiles_root: profiles_root.into(),
        }
    }

    /// State directory for one instance
    pub fn state_dir(&self, name: &str) -> PathBuf {
        self.profiles_root.join(name).join("state")
    }

    /// Persist the page's cookies and storage areas.
    ///
    /// Skipped entirely (with a warning) when the page cannot run script,
    /// e.g. mid-navigation or already torn down. Each of the three areas is
    /// written independently; a failure in one is logged and the rest are
    /// still attempted. Files are overwritten wholesale.
    pub async fn save(&self, name: &str, page: &Page) {
        if !page.is_evaluable().await {
            tracing::warn!("Page for '{}' not evaluable, skipping state save", name);
            return;
        }

        let dir = self.state_dir(name);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!("Failed to create state dir for '{}': {}", name, e);
            return;
        }

        // Cookies come from the network layer, independent of in-page script
        match page.cookies().await {
            Ok(cookies) => write_json(&dir.join(COOKIES_FILE), &cookies).await,
            Err(e) => tracing::warn!("Failed to read cookies for '{}': {}", name, e),
        }

        match page.local_storage().await {
            Ok(entries) => write_json(&dir.join(LOCAL_STORAGE_FILE), &entries).await,
            Err(e) => tracing::warn!("Failed to read localStorage for '{}': {}", name, e),
        }

        match page.session_storage().await {
            Ok(entries) => write_json(&dir.join(SESSION_STORAGE_FILE), &entries).await,
            Err(e) => tracing::warn!("Failed to read sessionStorage for '{}': {}", name, e),
        }

        tracing::debug!("Saved state for '{}'", name);
    }

    /// Restore previously saved state into a fresh page.
    ///
    /// Missing files mean a never-saved instance and are not errors;
    /// malformed files are logged and skipped.
    pub async fn restore(&self, name: &str, page: &Page) {
        let dir = self.state_dir(name);

        if let Some(cookies) = read_json::<Vec<Cookie>>(&dir.join(COOKIES_FILE)).await {
            let params: Vec<CookieParam> = cookies.iter().map(CookieParam::from).collect();
            if !params.is_empty() {
                if let Err(e) = page.set_cookies(params).await {
                    tracing::warn!("Failed to restore cookies for '{}': {}", name, e);
                }
            }
        }

        if let Some(entries) = read_json(&dir.join(LOCAL_STORAGE_FILE)).await {
            if let Err(e) = page.restore_local_storage(&entries).await {
                tracing::warn!("Failed to restore localStorage for '{}': {}", name, e);
            }
        }

        if let Some(entries) = read_json(&dir.join(SESSION_STORAGE_FILE)).await {
            if let Err(e) = page.restore_session_storage(&entries).await {
                tracing::warn!("Failed to restore sessionStorage for '{}': {}", name, e);
            }
        }

        tracing::debug!("Restored state for '{}'", name);
    }
}

/// Write a value as pretty JSON, logging instead of failing
async fn write_json<T: Serialize>(path: &Path, value: &T) {
    let json = match serde_json::to_string_pretty(value) {
        Ok(j) => j,
        Err(e) => {
            tracing::warn!("Failed to serialize {}: {}", path.display(), e);
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, json).await {
        tracing::warn!("Failed to write {}: {}", path.display(), e);
    }
}

/// Read a JSON file; `None` for missing or malformed content
async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No saved state at {}", path.display());
            return None;
        }
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&data) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Malformed state file {}: {}", path.display(), e);
            None
        }
    }
}

/// Per-key trailing-edge debouncer.
///
/// Each trigger cancels the key's armed task and schedules a new one, so a
/// burst of triggers runs the action exactly once, one delay after the last
/// trigger.
pub(crate) struct Debouncer {
    delay: Duration,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Arm (or re-arm) the delayed action for a key
    pub fn trigger<F>(&self, key: &str, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });

        let mut handles = self.handles.lock().expect("debouncer lock poisoned");
        if let Some(previous) = handles.insert(key.to_string(), handle) {
            previous.abort();
        }
    }

    /// Drop a key's armed task, if any
    pub fn cancel(&self, key: &str) {
        let mut handles = self.handles.lock().expect("debouncer lock poisoned");
        if let Some(handle) = handles.remove(key) {
            handle.abort();
        }
    }

    /// Drop every armed task
    pub fn cancel_all(&self) {
        let mut handles = self.handles.lock().expect("debouncer lock poisoned");
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn read_json_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result: Option<Vec<Cookie>> = read_json(&dir.path().join("cookies.json")).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn read_json_malformed_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let result: Option<Vec<Cookie>> = read_json(&path).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("localStorage.json");

        let mut entries = std::collections::BTreeMap::new();
        entries.insert("token".to_string(), "abc123".to_string());
        entries.insert("theme".to_string(), "dark".to_string());

        write_json(&path, &entries).await;
        let back: Option<std::collections::BTreeMap<String, String>> = read_json(&path).await;
        assert_eq!(back.unwrap(), entries);
    }

    #[tokio::test]
    async fn state_dir_layout_is_per_name() {
        let store = StateStore::new("/data/profiles");
        assert_eq!(
            store.state_dir("acct-1"),
            PathBuf::from("/data/profiles/acct-1/state")
        );
    }

    #[tokio::test]
    async fn debouncer_collapses_a_burst_into_one_run() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let count = Arc::clone(&count);
            debouncer.trigger("alpha", async move {
                count.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Nothing fires until the delay after the last trigger has elapsed
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn debouncer_keys_are_independent() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));

        for key in ["alpha", "beta"] {
            let count = Arc::clone(&count);
            debouncer.trigger(key, async move {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_prevents_the_armed_run() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let count = Arc::new(AtomicUsize::new(0));

        {
            let count = Arc::clone(&count);
            debouncer.trigger("alpha", async move {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        debouncer.cancel("alpha");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
