use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persist::{read_json, write_json_atomic};

/// Persisted user settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub total_blocked_requests: u64,
    #[serde(default)]
    pub blocked_requests_this_session: u64,
    #[serde(default)]
    pub whitelisted_domains: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            is_enabled: default_enabled(),
            total_blocked_requests: 0,
            blocked_requests_this_session: 0,
            whitelisted_domains: Vec::new(),
        }
    }
}

/// Settings file owner. Reads once at startup, writes on every mutation.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// Load settings, writing defaults when the file is absent. An unreadable
    /// file is replaced by defaults for the session.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match read_json::<Settings>(&path) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                info!("no settings at '{}', writing defaults", path.display());
                let settings = Settings::default();
                if let Err(e) = write_json_atomic(&path, &settings) {
                    warn!("{e}");
                }
                settings
            }
            Err(e) => {
                warn!("{e}; using defaults");
                Settings::default()
            }
        };
        Self { path, settings }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Apply a mutation and persist. The in-memory value stays authoritative
    /// when the write fails.
    pub fn update(&mut self, mutate: impl FnOnce(&mut Settings)) -> Result<()> {
        mutate(&mut self.settings);
        write_json_atomic(&self.path, &self.settings)
    }

    /// Like `update`, but write failures are only logged.
    pub fn update_logged(&mut self, mutate: impl FnOnce(&mut Settings)) {
        if let Err(e) = self.update(mutate) {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::open(&path);
        assert_eq!(store.get(), &Settings::default());
        assert!(path.exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"isEnabled\": true"));
        assert!(raw.contains("\"whitelistedDomains\": []"));
    }

    #[test]
    fn persists_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut store = SettingsStore::open(&path);
        store
            .update(|s| {
                s.is_enabled = false;
                s.whitelisted_domains.push("example.com".to_string());
            })
            .unwrap();

        let reopened = SettingsStore::open(&path);
        assert!(!reopened.get().is_enabled);
        assert_eq!(reopened.get().whitelisted_domains, vec!["example.com".to_string()]);
    }

    #[test]
    fn reads_camel_case_with_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"isEnabled": false, "totalBlockedRequests": 7}"#).unwrap();
        let store = SettingsStore::open(&path);
        assert!(!store.get().is_enabled);
        assert_eq!(store.get().total_blocked_requests, 7);
        assert!(store.get().whitelisted_domains.is_empty());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(SettingsStore::open(&path).get(), &Settings::default());
    }
}
