//! In-process content cache keyed by document URI.
//!
//! An entry is either the cached content or a cached "absent" marker, so repeated reads of
//! a missing document can also skip the backend. Entries are evicted oldest-write first once
//! `max_entries` is reached, and optionally expire a fixed time after they were written.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::config::StorageSettings;
use crate::uri::DocUri;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Not in the cache; ask the backend.
    Miss,
    /// Known not to exist.
    Absent,
    Present(String),
}

struct Entry {
    content: Option<String>,
    written: Instant,
    /// Write generation, matched against the eviction queue.
    generation: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<DocUri, Entry>,
    order: VecDeque<(DocUri, u64)>,
    generation: u64,
}

pub struct ContentCache {
    inner: RwLock<Inner>,
    max_entries: usize,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl ContentCache {
    pub fn new(max_entries: usize, ttl: Option<Duration>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_entries: max_entries.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.cache_max_entries, settings.cache_ttl_ms.map(Duration::from_millis))
    }

    fn expired(&self, e: &Entry) -> bool {
        self.ttl.map(|ttl| e.written.elapsed() >= ttl).unwrap_or(false)
    }

    pub fn get(&self, uri: &DocUri) -> CacheLookup {
        let found = {
            let inner = self.inner.read();
            inner.entries.get(uri).filter(|e| !self.expired(e)).map(|e| e.content.clone())
        };
        match found {
            Some(content) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                content.map(CacheLookup::Present).unwrap_or(CacheLookup::Absent)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Miss
            }
        }
    }

    /// Store content, or `None` to remember that the document does not exist.
    pub fn put(&self, uri: &DocUri, content: Option<String>) {
        let mut inner = self.inner.write();
        inner.generation += 1;
        let generation = inner.generation;
        inner.entries.insert(uri.clone(), Entry { content, written: Instant::now(), generation });
        inner.order.push_back((uri.clone(), generation));
        while inner.entries.len() > self.max_entries {
            let Some((old, gen)) = inner.order.pop_front() else { break };
            // stale queue slots belong to entries rewritten or removed since
            if inner.entries.get(&old).map(|e| e.generation) == Some(gen) {
                inner.entries.remove(&old);
            }
        }
        // keep the queue from growing without bound under rewrites
        if inner.order.len() > self.max_entries * 2 {
            let Inner { entries, order, .. } = &mut *inner;
            order.retain(|(u, g)| entries.get(u).map(|e| e.generation) == Some(*g));
        }
    }

    /// Drop every cached version of the document `uri` points at.
    pub fn invalidate(&self, uri: &DocUri) {
        let latest = uri.latest();
        let mut inner = self.inner.write();
        inner.entries.retain(|k, _| k.latest() != latest);
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.inner.write();
        debug!(target: "docrepo::cache", "invalidating {} cache entries", inner.entries.len());
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.inner.read().entries.len(),
        }
    }
}

impl Default for ContentCache {
    fn default() -> Self { Self::from_settings(&StorageSettings::default()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> DocUri { DocUri::parse(s).unwrap() }

    #[test]
    fn present_absent_and_miss() {
        let c = ContentCache::new(10, None);
        assert_eq!(c.get(&uri("//r/a")), CacheLookup::Miss);
        c.put(&uri("//r/a"), Some("x".into()));
        c.put(&uri("//r/b"), None);
        assert_eq!(c.get(&uri("//r/a")), CacheLookup::Present("x".into()));
        assert_eq!(c.get(&uri("//r/b")), CacheLookup::Absent);
        let s = c.stats();
        assert_eq!((s.hits, s.misses, s.entries), (2, 1, 2));
    }

    #[test]
    fn oldest_write_is_evicted() {
        let c = ContentCache::new(2, None);
        c.put(&uri("//r/1"), Some("1".into()));
        c.put(&uri("//r/2"), Some("2".into()));
        c.put(&uri("//r/1"), Some("1b".into()));
        c.put(&uri("//r/3"), Some("3".into()));
        assert_eq!(c.get(&uri("//r/2")), CacheLookup::Miss);
        assert_eq!(c.get(&uri("//r/1")), CacheLookup::Present("1b".into()));
        assert_eq!(c.get(&uri("//r/3")), CacheLookup::Present("3".into()));
    }

    #[test]
    fn invalidate_removes_all_versions() {
        let c = ContentCache::new(10, None);
        c.put(&uri("//r/d"), Some("v2".into()));
        c.put(&uri("//r/d@1"), Some("v1".into()));
        c.put(&uri("//r/other"), Some("o".into()));
        c.invalidate(&uri("//r/d@1"));
        assert_eq!(c.get(&uri("//r/d")), CacheLookup::Miss);
        assert_eq!(c.get(&uri("//r/d@1")), CacheLookup::Miss);
        assert_eq!(c.get(&uri("//r/other")), CacheLookup::Present("o".into()));
        c.invalidate_all();
        assert_eq!(c.stats().entries, 0);
    }

    #[test]
    fn entries_expire_after_write() {
        let c = ContentCache::new(10, Some(Duration::from_millis(20)));
        c.put(&uri("//r/t"), Some("t".into()));
        assert_eq!(c.get(&uri("//r/t")), CacheLookup::Present("t".into()));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(c.get(&uri("//r/t")), CacheLookup::Miss);
    }
}
