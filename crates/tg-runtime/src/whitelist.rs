use std::collections::BTreeSet;

use tg_core::url::{extract_host, host_matches_domain, normalize_domain};

use crate::error::{Error, Result};

/// Normalize user input into a whitelist domain. Accepts a bare domain or a
/// URL; `www.` is stripped, case folded.
pub fn normalize_whitelist_input(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let host = if trimmed.contains("://") {
        extract_host(trimmed).ok_or_else(|| Error::InvalidWhitelistInput(input.to_string()))?
    } else {
        // "example.com/path" and "example.com:8080" are accepted as domains
        trimmed
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .split(':')
            .next()
            .unwrap_or_default()
    };

    let domain = normalize_domain(host).ok_or_else(|| Error::InvalidWhitelistInput(input.to_string()))?;
    if !domain.contains('.') {
        return Err(Error::InvalidWhitelistInput(input.to_string()));
    }
    Ok(domain)
}

/// Domains for which blocking is permanently disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhitelistSet {
    domains: BTreeSet<String>,
}

impl WhitelistSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted entries; invalid ones are dropped.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = entries
            .into_iter()
            .filter_map(|e| normalize_whitelist_input(e.as_ref()).ok())
            .collect();
        Self { domains }
    }

    /// Returns the normalized domain and whether it was newly added.
    pub fn add(&mut self, input: &str) -> Result<(String, bool)> {
        let domain = normalize_whitelist_input(input)?;
        let inserted = self.domains.insert(domain.clone());
        Ok((domain, inserted))
    }

    pub fn remove(&mut self, input: &str) -> Result<bool> {
        let domain = normalize_whitelist_input(input)?;
        Ok(self.domains.remove(&domain))
    }

    /// Whether `host` is a whitelisted domain or a subdomain of one.
    pub fn contains_host(&self, host: &str) -> bool {
        self.domains.iter().any(|d| host_matches_domain(host, d))
    }

    pub fn contains_url(&self, url: &str) -> bool {
        extract_host(url).is_some_and(|host| self.contains_host(host))
    }

    pub fn domains(&self) -> &BTreeSet<String> {
        &self.domains
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.domains.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_inputs() {
        assert_eq!(normalize_whitelist_input("WWW.Example.com").unwrap(), "example.com");
        assert_eq!(normalize_whitelist_input("https://www.example.com/a?b").unwrap(), "example.com");
        assert_eq!(normalize_whitelist_input("example.com/path").unwrap(), "example.com");
        assert_eq!(normalize_whitelist_input(" shop.example.com:8443 ").unwrap(), "shop.example.com");
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "localhost", "exa mple.com", "https://", "ünïcode.com"] {
            assert!(
                matches!(normalize_whitelist_input(input), Err(Error::InvalidWhitelistInput(_))),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn add_remove_and_lookup() {
        let mut set = WhitelistSet::new();
        assert_eq!(set.add("www.example.com").unwrap(), ("example.com".to_string(), true));
        assert_eq!(set.add("example.com").unwrap(), ("example.com".to_string(), false));

        assert!(set.contains_host("example.com"));
        assert!(set.contains_host("cdn.example.com"));
        assert!(!set.contains_host("notexample.com"));
        assert!(set.contains_url("https://www.example.com/page"));

        assert!(set.remove("https://example.com").unwrap());
        assert!(set.is_empty());
    }

    #[test]
    fn from_entries_skips_invalid() {
        let set = WhitelistSet::from_entries(["a.com", "bad entry", "WWW.B.ORG"]);
        assert_eq!(set.to_vec(), vec!["a.com".to_string(), "b.org".to_string()]);
    }
}
