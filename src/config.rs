//! Named configuration store
//!
//! One JSON document on disk maps instance names to their launch options
//! and optional fingerprint. The HTTP layer drives CRUD here; the manager
//! only reads. Deleting a record also clears the instance's profile
//! directory, so a recreated name starts clean.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::profile::{FingerprintProfile, LaunchOptions};

/// One named launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    pub launch: LaunchOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<FingerprintProfile>,
}

/// JSON-backed store of named configurations
pub struct ProfileStore {
    config_file: PathBuf,
    profiles_root: PathBuf,
}

impl ProfileStore {
    pub fn new(config_file: impl Into<PathBuf>, profiles_root: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            profiles_root: profiles_root.into(),
        }
    }

    pub fn profiles_root(&self) -> &Path {
        &self.profiles_root
    }

    /// Directory owned by one named instance
    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.profiles_root.join(name)
    }

    /// Default browser user-data directory for a name
    pub fn user_data_dir(&self, name: &str) -> PathBuf {
        self.profile_dir(name).join("user-data")
    }

    /// Load all named configurations; a missing document is an empty map
    pub async fn load(&self) -> Result<BTreeMap<String, BrowserConfig>> {
        let data = match tokio::fs::read_to_string(&self.config_file).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    /// Write the whole document back
    pub async fn save(&self, configs: &BTreeMap<String, BrowserConfig>) -> Result<()> {
        if let Some(parent) = self.config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(configs)?;
        tokio::fs::write(&self.config_file, json).await?;
        Ok(())
    }

    /// Get one named configuration
    pub async fn get(&self, name: &str) -> Result<Option<BrowserConfig>> {
        Ok(self.load().await?.remove(name))
    }

    /// Create or replace a named configuration
    pub async fn upsert(&self, name: &str, config: BrowserConfig) -> Result<()> {
        let mut configs = self.load().await?;
        configs.insert(name.to_string(), config);
        self.save(&configs).await
    }

    /// Delete a named configuration and its profile directory
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut configs = self.load().await?;
        configs.remove(name);
        self.save(&configs).await?;

        let dir = self.profile_dir(name);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to clean profile dir {}: {}", dir.display(), e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> ProfileStore {
        ProfileStore::new(dir.join("browsers.json"), dir.join("profiles"))
    }

    fn sample_config() -> BrowserConfig {
        BrowserConfig {
            launch: LaunchOptions {
                headless: true,
                args: vec!["--lang=en-US".to_string()],
                ..Default::default()
            },
            fingerprint: Some(FingerprintProfile::random()),
        }
    }

    #[tokio::test]
    async fn missing_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.upsert("acct-1", sample_config()).await.unwrap();
        let loaded = store.get("acct-1").await.unwrap().unwrap();
        assert!(loaded.launch.headless);
        assert!(loaded.fingerprint.is_some());
        assert!(store.get("other").await.unwrap().is_none());

        store.delete("acct-1").await.unwrap();
        assert!(store.get("acct-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_the_profile_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        store.upsert("acct-1", sample_config()).await.unwrap();
        let profile_dir = store.profile_dir("acct-1");
        tokio::fs::create_dir_all(profile_dir.join("state"))
            .await
            .unwrap();

        store.delete("acct-1").await.unwrap();
        assert!(!profile_dir.exists());
    }

    #[tokio::test]
    async fn document_shape_is_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let mut config = sample_config();
        config.launch.user_data_dir = Some(PathBuf::from("/tmp/p"));
        store.upsert("acct-1", config).await.unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("browsers.json"))
            .await
            .unwrap();
        assert!(raw.contains("\"userDataDir\""));
        assert!(raw.contains("\"fingerprint\""));
        assert!(raw.contains("\"userAgent\""));
    }
}
