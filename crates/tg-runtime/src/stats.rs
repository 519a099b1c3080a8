use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tg_core::url::domain_of_url;

use crate::persist::{read_json, write_json_atomic};

/// Counters for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageStats {
    pub url: String,
    pub blocked: u64,
    pub bytes_saved: u64,
}

// =============================================================================
// Page table
// =============================================================================

/// Fixed-size page table. Uses a basic LRU strategy with a hashmap + deque:
/// the least recently touched page is evicted first.
#[derive(Debug, Clone)]
pub struct PageTable {
    capacity: usize,
    entries: HashMap<String, PageStats>,
    order: VecDeque<String>,
}

impl PageTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, url: &str) -> Option<&PageStats> {
        self.entries.get(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark `url` most recently used, creating its record if needed.
    fn touch(&mut self, url: &str) -> &mut PageStats {
        if self.entries.contains_key(url) {
            self.order.retain(|k| k != url);
        } else if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(url.to_string());
        self.entries
            .entry(url.to_string())
            .or_insert_with(|| PageStats { url: url.to_string(), ..PageStats::default() })
    }

    /// Pages from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = &PageStats> {
        self.order.iter().filter_map(|url| self.entries.get(url))
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    #[serde(default)]
    pub total_blocked: u64,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub bandwidth_saved_bytes: u64,
    #[serde(default)]
    pub session_blocked: u64,
    #[serde(default)]
    pub domains: BTreeMap<String, u64>,
    /// Least recently used first
    #[serde(default)]
    pub pages: Vec<PageStats>,
}

/// Persisted blocking counters. Every mutation is written synchronously.
#[derive(Debug)]
pub struct StatisticsTracker {
    path: PathBuf,
    total_blocked: u64,
    total_requests: u64,
    bandwidth_saved_bytes: u64,
    session_blocked: u64,
    domains: BTreeMap<String, u64>,
    pages: PageTable,
    default_blocked_bytes: u64,
}

impl StatisticsTracker {
    /// Load persisted counters. The session counter always starts at zero.
    pub fn open(path: impl Into<PathBuf>, max_tracked_pages: usize, default_blocked_bytes: u64) -> Self {
        let path = path.into();
        let stored = match read_json::<Statistics>(&path) {
            Ok(stored) => stored.unwrap_or_default(),
            Err(e) => {
                warn!("{e}; starting with empty statistics");
                Statistics::default()
            }
        };

        let mut pages = PageTable::new(max_tracked_pages);
        for page in stored.pages {
            let url = page.url.clone();
            *pages.touch(&url) = page;
        }

        Self {
            path,
            total_blocked: stored.total_blocked,
            total_requests: stored.total_requests,
            bandwidth_saved_bytes: stored.bandwidth_saved_bytes,
            session_blocked: 0,
            domains: stored.domains,
            pages,
            default_blocked_bytes,
        }
    }

    pub fn record_request(&mut self, url: &str) {
        self.total_requests += 1;
        debug!("request {url}");
        self.persist();
    }

    /// Count a blocked request. `estimated_size` falls back to the
    /// configured per-request estimate.
    pub fn record_blocked(&mut self, url: &str, on_page: Option<&str>, estimated_size: Option<u64>) {
        let size = estimated_size.unwrap_or(self.default_blocked_bytes);

        self.total_blocked += 1;
        self.session_blocked += 1;
        self.bandwidth_saved_bytes = self.bandwidth_saved_bytes.saturating_add(size);

        if let Some(domain) = domain_of_url(url) {
            *self.domains.entry(domain).or_insert(0) += 1;
        }

        if let Some(page) = on_page {
            let record = self.pages.touch(page);
            record.blocked += 1;
            record.bytes_saved = record.bytes_saved.saturating_add(size);
        }

        self.persist();
    }

    /// A new page load starts a fresh record for that page.
    pub fn record_page_load(&mut self, url: &str) {
        let record = self.pages.touch(url);
        record.blocked = 0;
        record.bytes_saved = 0;
        self.persist();
    }

    pub fn reset_session(&mut self) {
        self.session_blocked = 0;
        self.persist();
    }

    pub fn page(&self, url: &str) -> Option<&PageStats> {
        self.pages.get(url)
    }

    /// The `n` domains with the most blocked requests.
    pub fn top_domains(&self, n: usize) -> Vec<(String, u64)> {
        let mut domains: Vec<(String, u64)> =
            self.domains.iter().map(|(d, c)| (d.clone(), *c)).collect();
        domains.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        domains.truncate(n);
        domains
    }

    pub fn snapshot(&self) -> Statistics {
        Statistics {
            total_blocked: self.total_blocked,
            total_requests: self.total_requests,
            bandwidth_saved_bytes: self.bandwidth_saved_bytes,
            session_blocked: self.session_blocked,
            domains: self.domains.clone(),
            pages: self.pages.iter().cloned().collect(),
        }
    }

    fn persist(&self) {
        if let Err(e) = write_json_atomic(&self.path, &self.snapshot()) {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(dir: &tempfile::TempDir, pages: usize) -> StatisticsTracker {
        StatisticsTracker::open(dir.path().join("statistics.json"), pages, 1000)
    }

    #[test]
    fn counts_blocked_requests() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = tracker(&dir, 10);
        stats.record_request("https://news.com/");
        stats.record_blocked("https://ads.tracker.net/x.js", Some("https://news.com/"), Some(500));
        stats.record_blocked("https://www.tracker.net/y.js", None, None);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.total_blocked, 2);
        assert_eq!(snap.session_blocked, 2);
        assert_eq!(snap.bandwidth_saved_bytes, 1500);
        assert_eq!(snap.domains.get("ads.tracker.net"), Some(&1));
        assert_eq!(snap.domains.get("tracker.net"), Some(&1));
        assert_eq!(stats.page("https://news.com/").unwrap().blocked, 1);
    }

    #[test]
    fn evicts_least_recently_used_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = tracker(&dir, 2);
        stats.record_page_load("a");
        stats.record_page_load("b");
        stats.record_blocked("https://x.com/", Some("a"), None);
        stats.record_page_load("c");

        assert!(stats.page("a").is_some());
        assert!(stats.page("b").is_none());
        assert!(stats.page("c").is_some());
        let order: Vec<String> = stats.snapshot().pages.into_iter().map(|p| p.url).collect();
        assert_eq!(order, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn page_load_resets_page_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = tracker(&dir, 5);
        stats.record_blocked("https://x.com/", Some("p"), Some(10));
        stats.record_page_load("p");
        assert_eq!(stats.page("p").unwrap().blocked, 0);
        assert_eq!(stats.snapshot().total_blocked, 1);
    }

    #[test]
    fn persists_across_sessions_except_session_counter() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut stats = tracker(&dir, 5);
            stats.record_blocked("https://x.com/", Some("p"), Some(10));
            stats.record_blocked("https://x.com/", Some("p"), Some(10));
        }
        let stats = tracker(&dir, 5);
        let snap = stats.snapshot();
        assert_eq!(snap.total_blocked, 2);
        assert_eq!(snap.session_blocked, 0);
        assert_eq!(snap.bandwidth_saved_bytes, 20);
        assert_eq!(stats.page("p").unwrap().blocked, 2);
    }

    #[test]
    fn reloaded_pages_keep_recency_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut stats = tracker(&dir, 3);
            for page in ["a", "b", "c"] {
                stats.record_blocked("https://x.com/", Some(page), None);
            }
        }
        let mut stats = tracker(&dir, 3);
        let snap = stats.snapshot();
        let order: Vec<&str> = snap.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        stats.record_blocked("https://x.com/", Some("d"), None);
        assert!(stats.page("a").is_none());
        assert_eq!(stats.page("b").unwrap().blocked, 1);
    }

    #[test]
    fn top_domains_sorted_by_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = tracker(&dir, 5);
        for url in ["https://b.com/", "https://a.com/", "https://b.com/", "https://c.com/"] {
            stats.record_blocked(url, None, None);
        }
        assert_eq!(
            stats.top_domains(2),
            vec![("b.com".to_string(), 2), ("a.com".to_string(), 1)]
        );
    }
}
