//! Instance registry
//!
//! The only shared mutable state in the engine: a name-keyed map of live
//! instances behind a mutex that is only ever held across synchronous
//! sections, never across an await. Owns the "one live instance per name"
//! invariant; handles live here and nowhere else.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::cdp::Connection;
use crate::error::{Error, Result};
use crate::page::Page;
use crate::profile::FingerprintProfile;

/// Lifecycle status of a managed instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Public snapshot of one instance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub name: String,
    pub status: InstanceStatus,
    pub user_data_dir: PathBuf,
    pub target_id: String,
    /// The profile applied at launch (copied, not referenced)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<FingerprintProfile>,
}

/// A live instance's handles. The registry exclusively owns these; other
/// components get `Arc` clones scoped to one call.
pub(crate) struct LiveInstance {
    pub connection: Arc<Connection>,
    pub page: Arc<Page>,
    pub status: InstanceStatus,
    pub fingerprint: Option<FingerprintProfile>,
    pub user_data_dir: PathBuf,
    pub target_id: String,
    pub pump: Option<JoinHandle<()>>,
}

impl LiveInstance {
    pub fn info(&self, name: &str) -> InstanceInfo {
        InstanceInfo {
            name: name.to_string(),
            status: self.status,
            user_data_dir: self.user_data_dir.clone(),
            target_id: self.target_id.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Registry slot: a name is reserved from the moment a launch is admitted
/// so a concurrent launch for the same name fails fast
pub(crate) enum Slot {
    Pending,
    Live(LiveInstance),
}

#[derive(Default)]
pub(crate) struct Registry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a name for a launch in progress. Fails if the name maps to
    /// a pending or live instance.
    pub fn reserve(&self, name: &str) -> Result<()> {
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        if slots.contains_key(name) {
            return Err(Error::AlreadyRunning(name.to_string()));
        }
        slots.insert(name.to_string(), Slot::Pending);
        Ok(())
    }

    /// Promote a reserved name to a live instance
    pub fn activate(&self, name: &str, instance: LiveInstance) {
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        slots.insert(name.to_string(), Slot::Live(instance));
    }

    /// Attach the event pump handle to a live entry
    pub fn set_pump(&self, name: &str, pump: JoinHandle<()>) {
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        if let Some(Slot::Live(live)) = slots.get_mut(name) {
            live.pump = Some(pump);
        }
    }

    /// Update a live entry's status; returns false if the name is absent
    pub fn set_status(&self, name: &str, status: InstanceStatus) -> bool {
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        match slots.get_mut(name) {
            Some(Slot::Live(live)) => {
                live.status = status;
                true
            }
            _ => false,
        }
    }

    /// Clone the shared handles of a live entry
    pub fn handles(&self, name: &str) -> Option<(Arc<Connection>, Arc<Page>, InstanceStatus)> {
        let slots = self.slots.lock().expect("registry lock poisoned");
        match slots.get(name) {
            Some(Slot::Live(live)) => Some((
                Arc::clone(&live.connection),
                Arc::clone(&live.page),
                live.status,
            )),
            _ => None,
        }
    }

    /// Public snapshot of a live entry
    pub fn info(&self, name: &str) -> Option<InstanceInfo> {
        let slots = self.slots.lock().expect("registry lock poisoned");
        match slots.get(name) {
            Some(Slot::Live(live)) => Some(live.info(name)),
            _ => None,
        }
    }

    /// Current status of a name; pending slots report `Starting`
    pub fn status(&self, name: &str) -> Option<InstanceStatus> {
        let slots = self.slots.lock().expect("registry lock poisoned");
        match slots.get(name) {
            Some(Slot::Live(live)) => Some(live.status),
            Some(Slot::Pending) => Some(InstanceStatus::Starting),
            None => None,
        }
    }

    /// Snapshot of all tracked statuses
    pub fn statuses(&self) -> BTreeMap<String, InstanceStatus> {
        let slots = self.slots.lock().expect("registry lock poisoned");
        slots
            .iter()
            .map(|(name, slot)| {
                let status = match slot {
                    Slot::Live(live) => live.status,
                    Slot::Pending => InstanceStatus::Starting,
                };
                (name.clone(), status)
            })
            .collect()
    }

    /// Remove an entry (reserved or live), returning the live handles if
    /// there were any
    pub fn remove(&self, name: &str) -> Option<LiveInstance> {
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        match slots.remove(name) {
            Some(Slot::Live(live)) => Some(live),
            _ => None,
        }
    }

    /// Drain every entry, returning the live ones. Used by `close_all`:
    /// draining up front guarantees the registry ends empty no matter what
    /// the individual teardowns do.
    pub fn drain(&self) -> Vec<(String, LiveInstance)> {
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        slots
            .drain()
            .filter_map(|(name, slot)| match slot {
                Slot::Live(live) => Some((name, live)),
                Slot::Pending => None,
            })
            .collect()
    }

    /// True if the name maps to a pending or live entry
    pub fn contains(&self, name: &str) -> bool {
        let slots = self.slots.lock().expect("registry lock poisoned");
        slots.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_is_exclusive() {
        let registry = Registry::new();
        registry.reserve("alpha").unwrap();
        let second = registry.reserve("alpha");
        assert!(matches!(second, Err(Error::AlreadyRunning(name)) if name == "alpha"));

        // A different name is unaffected
        registry.reserve("beta").unwrap();
    }

    #[test]
    fn remove_frees_the_name() {
        let registry = Registry::new();
        registry.reserve("alpha").unwrap();
        assert!(registry.remove("alpha").is_none()); // pending: no handles
        registry.reserve("alpha").unwrap();
    }

    #[test]
    fn pending_slots_report_starting() {
        let registry = Registry::new();
        registry.reserve("alpha").unwrap();
        assert_eq!(registry.status("alpha"), Some(InstanceStatus::Starting));
        assert_eq!(registry.status("missing"), None);
    }

    #[test]
    fn statuses_snapshot_lists_pending_entries() {
        let registry = Registry::new();
        registry.reserve("a").unwrap();
        registry.reserve("b").unwrap();
        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .values()
            .all(|s| *s == InstanceStatus::Starting));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(InstanceStatus::Stopped.to_string(), "stopped");
    }
}
