use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use locklist_core::storage::StoreConfig;
use locklist_core::types::{default_lists, DefaultList};
use locklist_core::SyncConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocklistConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub security: SecuritySection,
    #[serde(default)]
    pub lists: ListsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreSection {
    /// SQLite file; `None` uses the XDG data directory.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemoteSection {
    /// Directory shared between devices.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            debounce_ms: 750,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecuritySection {
    #[serde(default)]
    pub key_cache: KeyCacheBackend,
}

/// Where the derived key is kept between runs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyCacheBackend {
    /// Alongside the lists in the device store.
    #[default]
    Device,
    /// In the OS keychain.
    Keychain,
    /// Never persisted; every run prompts.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListsSection {
    pub defaults: Vec<DefaultListEntry>,
}

impl Default for ListsSection {
    fn default() -> Self {
        Self {
            defaults: default_lists()
                .into_iter()
                .map(|list| DefaultListEntry {
                    title: list.title,
                    storage_key: list.storage_key,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultListEntry {
    pub title: String,
    pub storage_key: String,
}

impl LocklistConfig {
    pub fn store_path(&self) -> anyhow::Result<PathBuf> {
        match self.store.path.as_deref() {
            Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
            _ => Ok(xdg_data_dir()?.join("locklist.db")),
        }
    }

    pub fn remote_path(&self) -> anyhow::Result<PathBuf> {
        match self.remote.path.as_deref() {
            Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
            _ => Ok(xdg_data_dir()?.join("remote")),
        }
    }

    pub fn store_config(&self) -> anyhow::Result<StoreConfig> {
        Ok(StoreConfig {
            path: Some(self.store_path()?),
            watch_interval: self.poll_interval(),
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            debounce: Duration::from_millis(self.sync.debounce_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms.max(50))
    }

    pub fn default_lists(&self) -> Vec<DefaultList> {
        self.lists
            .defaults
            .iter()
            .map(|entry| DefaultList::new(entry.title.clone(), entry.storage_key.clone()))
            .collect()
    }
}

/// Resolve the config file path, checking LOCKLIST_CONFIG first.
pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("LOCKLIST_CONFIG") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    default_config_path()
}

/// Load the config file, or the defaults when none exists yet.
pub fn load_config() -> anyhow::Result<LocklistConfig> {
    let path = resolve_config_path()?;
    if !path.exists() {
        return Ok(LocklistConfig::default());
    }
    read_config(&path)
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_dir()?.join("config.toml"))
}

pub fn read_config(path: &Path) -> anyhow::Result<LocklistConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
    toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
}

pub fn write_config(path: &Path, config: &LocklistConfig) -> anyhow::Result<()> {
    let contents =
        toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {}", e))?;
    locklist_core::fs::write_atomic(path, contents.as_bytes())
        .map_err(|e| anyhow::anyhow!("Failed to write config {}: {}", path.display(), e))
}

pub fn xdg_config_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_CONFIG_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("locklist"));
        }
    }
    Ok(home_dir()?.join(".config").join("locklist"))
}

pub fn xdg_data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(value) = std::env::var("XDG_DATA_HOME") {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value).join("locklist"));
        }
    }
    Ok(home_dir()?.join(".local").join("share").join("locklist"))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| anyhow::anyhow!("HOME is not set; cannot resolve default paths"))?;
    Ok(PathBuf::from(home))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: LocklistConfig = toml::from_str(
            "[remote]\npath = \"/srv/locklist\"\n\n[security]\nkey_cache = \"keychain\"\n",
        )
        .expect("parse should succeed");

        assert_eq!(config.remote_path().unwrap(), PathBuf::from("/srv/locklist"));
        assert_eq!(config.security.key_cache, KeyCacheBackend::Keychain);
        assert_eq!(config.sync.debounce_ms, 750);
        assert_eq!(config.default_lists().len(), 3);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().expect("tempdir should succeed");
        let path = dir.path().join("nested").join("config.toml");
        let mut config = LocklistConfig::default();
        config.sync.debounce_ms = 20;
        config.lists.defaults = vec![DefaultListEntry {
            title: "Errands".to_string(),
            storage_key: "list-storage-errands".to_string(),
        }];

        write_config(&path, &config).expect("write should succeed");
        let read = read_config(&path).expect("read should succeed");

        assert_eq!(read.sync_config().debounce, Duration::from_millis(20));
        assert_eq!(read.default_lists()[0].storage_key, "list-storage-errands");
    }
}
