//! Relayer candidates and their failure scores.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::relayer_client::RelayClient;

#[derive(Debug)]
struct Entry {
    client: Arc<RelayClient>,
    failures: u32,
}

/// Ordered set of relayers.
///
/// Candidates are tried in registration order, except that relayers with
/// more recorded failures sink behind healthier ones.
#[derive(Debug, Default)]
pub struct RelayerRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl RelayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from relayer base URLs, keeping their order.
    pub fn from_urls<S: AsRef<str>>(urls: impl IntoIterator<Item = S>, timeout_ms: Option<u64>) -> Self {
        let registry = Self::new();
        for url in urls {
            registry.add(Arc::new(RelayClient::new(url.as_ref(), timeout_ms)));
        }
        registry
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, client: Arc<RelayClient>) {
        self.entries().push(Entry { client, failures: 0 });
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Snapshot of the relayers in attempt order.
    pub fn candidates(&self) -> Vec<Arc<RelayClient>> {
        let entries = self.entries();
        let mut ranked: Vec<&Entry> = entries.iter().collect();
        // Stable sort keeps registration order among equal scores.
        ranked.sort_by_key(|entry| entry.failures);
        ranked.into_iter().map(|entry| Arc::clone(&entry.client)).collect()
    }

    /// Look up a registered relayer by base URL.
    pub fn get(&self, base_url: &str) -> Option<Arc<RelayClient>> {
        let base_url = base_url.trim_end_matches('/');
        self.entries()
            .iter()
            .find(|entry| entry.client.base_url() == base_url)
            .map(|entry| Arc::clone(&entry.client))
    }

    pub fn record_failure(&self, base_url: &str) {
        if let Some(entry) = self.entries().iter_mut().find(|e| e.client.base_url() == base_url) {
            entry.failures = entry.failures.saturating_add(1);
            tracing::debug!(relayer = base_url, failures = entry.failures, "relayer downscored");
        }
    }

    pub fn record_success(&self, base_url: &str) {
        if let Some(entry) = self.entries().iter_mut().find(|e| e.client.base_url() == base_url) {
            entry.failures = 0;
        }
    }

    pub fn failures(&self, base_url: &str) -> u32 {
        self.entries()
            .iter()
            .find(|entry| entry.client.base_url() == base_url)
            .map(|entry| entry.failures)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(registry: &RelayerRegistry) -> Vec<String> {
        registry.candidates().iter().map(|c| c.base_url().to_string()).collect()
    }

    #[test]
    fn test_failures_reorder_candidates() {
        let registry = RelayerRegistry::from_urls(["http://a", "http://b/", "http://c"], None);
        assert_eq!(registry.len(), 3);
        assert_eq!(urls(&registry), ["http://a", "http://b", "http://c"]);

        registry.record_failure("http://a");
        assert_eq!(urls(&registry), ["http://b", "http://c", "http://a"]);

        registry.record_failure("http://b");
        registry.record_failure("http://b");
        assert_eq!(urls(&registry), ["http://c", "http://a", "http://b"]);
        assert_eq!(registry.failures("http://b"), 2);

        registry.record_success("http://b");
        assert_eq!(urls(&registry), ["http://b", "http://c", "http://a"]);
    }

    #[test]
    fn test_lookup_by_url() {
        let registry = RelayerRegistry::from_urls(["http://a"], None);
        assert!(registry.get("http://a/").is_some());
        assert!(registry.get("http://z").is_none());
        assert!(!registry.is_empty());
    }
}
