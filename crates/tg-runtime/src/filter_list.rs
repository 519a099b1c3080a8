use std::hash::Hasher;
use std::path::PathBuf;

use log::{info, warn};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::error::{Error, Result};
use crate::persist::{read_json, write_json_atomic};

/// A named source of third-party rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterList {
    pub id: String,
    pub name: String,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    pub is_built_in: bool,
    pub is_enabled: bool,
    /// Epoch seconds of the last successful download
    #[serde(default)]
    pub last_updated: Option<u64>,
}

struct BuiltInList {
    id: &'static str,
    name: &'static str,
    url: &'static str,
    enabled: bool,
}

const BUILT_IN_LISTS: &[BuiltInList] = &[
    BuiltInList {
        id: "easylist",
        name: "EasyList",
        url: "https://easylist.to/easylist/easylist.txt",
        enabled: true,
    },
    BuiltInList {
        id: "easyprivacy",
        name: "EasyPrivacy",
        url: "https://easylist.to/easylist/easyprivacy.txt",
        enabled: true,
    },
    BuiltInList {
        id: "peter-lowe",
        name: "Peter Lowe's Ad and tracking server list",
        url: "https://pgl.yoyo.org/adservers/serverlist.php?hostformat=adblockplus&showintro=0&mimetype=plaintext",
        enabled: false,
    },
    BuiltInList {
        id: "fanboy-annoyance",
        name: "Fanboy's Annoyance List",
        url: "https://secure.fanboy.co.nz/fanboy-annoyance.txt",
        enabled: false,
    },
];

fn built_in_lists() -> Vec<FilterList> {
    BUILT_IN_LISTS
        .iter()
        .map(|b| FilterList {
            id: b.id.to_string(),
            name: b.name.to_string(),
            source_url: b.url.to_string(),
            is_built_in: true,
            is_enabled: b.enabled,
            last_updated: None,
        })
        .collect()
}

/// Validate a list URL: http(s) with a host.
pub fn validate_list_url(input: &str) -> Result<Url> {
    let url = Url::parse(input.trim()).map_err(|_| Error::InvalidFilterListUrl(input.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(url),
        _ => Err(Error::InvalidFilterListUrl(input.to_string())),
    }
}

/// Id of a custom list, derived from its URL.
pub fn custom_list_id(url: &str) -> String {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(url.as_bytes());
    format!("custom-{:016x}", hasher.finish())
}

/// Ordered registry of filter lists, persisted as JSON.
#[derive(Debug)]
pub struct FilterListRegistry {
    path: PathBuf,
    lists: Vec<FilterList>,
}

impl FilterListRegistry {
    /// Load the registry, re-seeding built-in lists missing from the file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stored = match read_json::<Vec<FilterList>>(&path) {
            Ok(stored) => stored.unwrap_or_default(),
            Err(e) => {
                warn!("{e}; re-seeding filter lists");
                Vec::new()
            }
        };

        let mut lists = Vec::with_capacity(stored.len() + BUILT_IN_LISTS.len());
        for builtin in built_in_lists() {
            match stored.iter().find(|l| l.id == builtin.id) {
                Some(saved) => lists.push(FilterList {
                    is_enabled: saved.is_enabled,
                    last_updated: saved.last_updated,
                    ..builtin
                }),
                None => lists.push(builtin),
            }
        }
        lists.extend(stored.into_iter().filter(|l| !l.is_built_in));

        let registry = Self { path, lists };
        registry.persist();
        registry
    }

    /// Registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            lists: built_in_lists(),
        }
    }

    pub fn lists(&self) -> &[FilterList] {
        &self.lists
    }

    pub fn get(&self, id: &str) -> Option<&FilterList> {
        self.lists.iter().find(|l| l.id == id)
    }

    /// Enabled lists in registry order.
    pub fn enabled(&self) -> Vec<FilterList> {
        self.lists.iter().filter(|l| l.is_enabled).cloned().collect()
    }

    pub fn add_custom(&mut self, name: &str, url: &str) -> Result<FilterList> {
        let url = validate_list_url(url)?;
        let id = custom_list_id(url.as_str());
        if self.lists.iter().any(|l| l.id == id || l.source_url == url.as_str()) {
            return Err(Error::DuplicateFilterList(url.to_string()));
        }

        let name = name.trim();
        let list = FilterList {
            id,
            name: if name.is_empty() { url.to_string() } else { name.to_string() },
            source_url: url.to_string(),
            is_built_in: false,
            is_enabled: true,
            last_updated: None,
        };
        info!("added filter list '{}' ({})", list.name, list.source_url);
        self.lists.push(list.clone());
        self.persist();
        Ok(list)
    }

    pub fn remove_custom(&mut self, id: &str) -> Result<FilterList> {
        let index = self
            .lists
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| Error::UnknownFilterList(id.to_string()))?;
        if self.lists[index].is_built_in {
            return Err(Error::BuiltInListRemoval(id.to_string()));
        }
        let removed = self.lists.remove(index);
        self.persist();
        Ok(removed)
    }

    /// Returns whether the flag changed.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<bool> {
        let list = self
            .lists
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| Error::UnknownFilterList(id.to_string()))?;
        if list.is_enabled == enabled {
            return Ok(false);
        }
        list.is_enabled = enabled;
        self.persist();
        Ok(true)
    }

    pub fn mark_updated(&mut self, id: &str, timestamp: u64) {
        if let Some(list) = self.lists.iter_mut().find(|l| l.id == id) {
            if list.last_updated == Some(timestamp) {
                return;
            }
            list.last_updated = Some(timestamp);
            self.persist();
        }
    }

    fn persist(&self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = write_json_atomic(&self.path, &self.lists) {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_built_in_lists() {
        let registry = FilterListRegistry::in_memory();
        assert_eq!(registry.lists().len(), BUILT_IN_LISTS.len());
        let enabled: Vec<String> = registry.enabled().into_iter().map(|l| l.id).collect();
        assert_eq!(enabled, vec!["easylist".to_string(), "easyprivacy".to_string()]);
    }

    #[test]
    fn validates_urls() {
        assert!(validate_list_url("https://example.com/list.txt").is_ok());
        assert!(validate_list_url("http://example.com/list.txt").is_ok());
        for bad in ["", "ftp://example.com/list.txt", "not a url", "file:///etc/hosts"] {
            assert!(matches!(validate_list_url(bad), Err(Error::InvalidFilterListUrl(_))), "{bad}");
        }
    }

    #[test]
    fn custom_lists_can_be_added_and_removed() {
        let mut registry = FilterListRegistry::in_memory();
        let list = registry.add_custom("Mine", "https://example.com/mine.txt").unwrap();
        assert!(list.id.starts_with("custom-"));
        assert!(list.is_enabled);
        assert!(matches!(
            registry.add_custom("Again", "https://example.com/mine.txt"),
            Err(Error::DuplicateFilterList(_))
        ));

        assert_eq!(registry.enabled().last().unwrap().id, list.id);
        registry.remove_custom(&list.id).unwrap();
        assert!(registry.get(&list.id).is_none());
    }

    #[test]
    fn built_in_lists_cannot_be_removed() {
        let mut registry = FilterListRegistry::in_memory();
        assert!(matches!(registry.remove_custom("easylist"), Err(Error::BuiltInListRemoval(_))));
        assert!(matches!(registry.remove_custom("nope"), Err(Error::UnknownFilterList(_))));
        assert!(registry.set_enabled("easylist", false).unwrap());
        assert!(!registry.set_enabled("easylist", false).unwrap());
    }

    #[test]
    fn persists_flags_and_custom_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter_lists.json");
        let custom_id = {
            let mut registry = FilterListRegistry::open(&path);
            registry.set_enabled("easylist", false).unwrap();
            registry.mark_updated("easyprivacy", 1_700_000_000);
            registry.add_custom("", "https://lists.example.org/a.txt").unwrap().id
        };

        let registry = FilterListRegistry::open(&path);
        assert!(!registry.get("easylist").unwrap().is_enabled);
        assert_eq!(registry.get("easyprivacy").unwrap().last_updated, Some(1_700_000_000));
        let custom = registry.get(&custom_id).unwrap();
        assert_eq!(custom.name, "https://lists.example.org/a.txt");
        assert_eq!(registry.lists().len(), BUILT_IN_LISTS.len() + 1);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"sourceURL\""));
        assert!(raw.contains("\"isBuiltIn\""));
    }
}
