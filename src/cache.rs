//! ETag-validated document cache
//!
//! Keeps the most recently fetched documents of one database together with
//! the ETag the server reported for them, so a repeated fetch of an unchanged
//! document hands back the very same instance. The cache itself is not
//! synchronized; `Database` keeps it behind a mutex.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::debug;

use crate::protocol::{Document, DEFAULT_CACHE_CAPACITY};

/// A cached document and the ETag it was served with
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub etag: String,
    pub document: Arc<Document>,
}

/// Fixed-capacity LRU of documents keyed by document id
pub struct DocumentCache {
    entries: LruCache<String, CacheEntry>,
}

impl DocumentCache {
    /// Create a cache holding at most `capacity` documents (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Look up an entry, marking it most recently used
    pub fn get(&mut self, id: &str) -> Option<CacheEntry> {
        self.entries.get(id).cloned()
    }

    /// Look up an entry without touching its recency
    pub fn peek(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.peek(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains(id)
    }

    /// Insert or replace the entry for `id`, evicting the least recently
    /// used entry when full. Returns the id of an evicted entry.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        etag: impl Into<String>,
        document: Arc<Document>,
    ) -> Option<String> {
        let id = id.into();
        let entry = CacheEntry {
            etag: etag.into(),
            document,
        };

        match self.entries.push(id.clone(), entry) {
            Some((old_id, _)) if old_id != id => {
                debug!(evicted = %old_id, "document cache full");
                Some(old_id)
            }
            _ => None,
        }
    }

    /// Drop the entry for `id`, returns true if there was one
    pub fn invalidate(&mut self, id: &str) -> bool {
        self.entries.pop(id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, rev: &str) -> Arc<Document> {
        let doc = Document::try_from(json!({"_id": id, "_rev": rev})).unwrap();
        Arc::new(doc)
    }

    #[test]
    fn test_default_capacity() {
        let cache = DocumentCache::default();
        assert_eq!(cache.capacity(), 100);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut cache = DocumentCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert("a", "\"1-a\"", doc("a", "1-a"));
        assert_eq!(cache.insert("b", "\"1-b\"", doc("b", "1-b")), Some("a".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = DocumentCache::new(3);
        cache.insert("a", "ea", doc("a", "1"));
        cache.insert("b", "eb", doc("b", "1"));
        cache.insert("c", "ec", doc("c", "1"));

        assert_eq!(cache.insert("d", "ed", doc("d", "1")), Some("a".to_string()));
        assert!(!cache.contains("a"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut cache = DocumentCache::new(2);
        cache.insert("a", "ea", doc("a", "1"));
        cache.insert("b", "eb", doc("b", "1"));

        assert!(cache.get("a").is_some());
        assert_eq!(cache.insert("c", "ec", doc("c", "1")), Some("b".to_string()));
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_peek_keeps_recency() {
        let mut cache = DocumentCache::new(2);
        cache.insert("a", "ea", doc("a", "1"));
        cache.insert("b", "eb", doc("b", "1"));

        assert_eq!(cache.peek("a").map(|e| e.etag.as_str()), Some("ea"));
        assert_eq!(cache.insert("c", "ec", doc("c", "1")), Some("a".to_string()));
    }

    #[test]
    fn test_replace_same_id_is_not_eviction() {
        let mut cache = DocumentCache::new(2);
        cache.insert("a", "e1", doc("a", "1"));
        assert_eq!(cache.insert("a", "e2", doc("a", "2")), None);

        let entry = cache.get("a").unwrap();
        assert_eq!(entry.etag, "e2");
        assert_eq!(entry.document.rev(), Some("2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache = DocumentCache::new(4);
        cache.insert("a", "ea", doc("a", "1"));
        cache.insert("b", "eb", doc("b", "1"));

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
