use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{Driver, KeyScan};
use crate::error::AppResult;
use crate::uri;

/// Shared key space behind one or more `MemoryDriver` handles.
struct MemorySpace {
    name: String,
    map: RwLock<BTreeMap<String, String>>,
    /// When set, the whole space is written here after every mutation.
    snapshot: Option<PathBuf>,
    /// Related stores of a private space live here so asking twice yields the same store.
    related: Mutex<HashMap<String, Arc<MemorySpace>>>,
    /// Serializes snapshot writes.
    saving: Mutex<()>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    created_ms: i64,
    entries: Vec<(String, String)>,
}

impl MemorySpace {
    fn new(name: &str, snapshot: Option<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            map: RwLock::new(BTreeMap::new()),
            snapshot,
            related: Mutex::new(HashMap::new()),
            saving: Mutex::new(()),
        }
    }

    fn save_snapshot(&self) -> AppResult<()> {
        let Some(path) = self.snapshot.as_ref() else { return Ok(()) };
        let _saving = self.saving.lock();
        let entries: Vec<(String, String)> = self.map.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let snap = Snapshot { version: 1, created_ms: chrono::Utc::now().timestamp_millis(), entries };
        let bytes = bincode::serialize(&snap)?;
        if let Some(dir) = path.parent() { std::fs::create_dir_all(dir)?; }
        let tmp = path.with_file_name(format!(".{}.tmp", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn load_snapshot(&self) -> AppResult<()> {
        let Some(path) = self.snapshot.as_ref() else { return Ok(()) };
        if !path.exists() { return Ok(()); }
        let bytes = std::fs::read(path)?;
        let snap: Snapshot = bincode::deserialize(&bytes)?;
        let mut w = self.map.write();
        w.clear();
        w.extend(snap.entries);
        tracing::debug!(target: "docrepo::driver", "memory store '{}' loaded {} keys from snapshot", self.name, w.len());
        Ok(())
    }
}

static SPACES: Lazy<RwLock<HashMap<String, Arc<MemorySpace>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

fn spaces() -> &'static RwLock<HashMap<String, Arc<MemorySpace>>> { &SPACES }

/// Ordered in-memory store. Flat keyspace; folders come from the shared prefix emulation.
#[derive(Clone)]
pub struct MemoryDriver {
    space: Arc<MemorySpace>,
    /// Registered in the process-wide space registry (and removed from it on drop_key_store).
    shared: bool,
}

impl MemoryDriver {
    /// A private store that nothing else can reach.
    pub fn new(name: &str) -> Self {
        Self { space: Arc::new(MemorySpace::new(name, None)), shared: false }
    }

    /// The process-wide store called `name`, created on first use.
    /// Opening it again (or deriving the same related store) returns the same data.
    pub fn shared(name: &str, snapshot: Option<PathBuf>) -> AppResult<Self> {
        // fast path read
        if let Some(space) = spaces().read().get(name).cloned() {
            return Ok(Self { space, shared: true });
        }
        let mut w = spaces().write();
        if let Some(space) = w.get(name).cloned() {
            return Ok(Self { space, shared: true });
        }
        let space = Arc::new(MemorySpace::new(name, snapshot));
        space.load_snapshot()?;
        w.insert(name.to_string(), space.clone());
        Ok(Self { space, shared: true })
    }

    pub fn snapshot_path(&self) -> Option<&Path> { self.space.snapshot.as_deref() }

    pub fn len(&self) -> usize { self.space.map.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn related_snapshot(&self, relation: &str) -> Option<PathBuf> {
        let base = self.space.snapshot.as_ref()?;
        let stem = base.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        Some(base.with_file_name(format!("{}{}.bin", stem, relation)))
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &str { &self.space.name }

    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.space.map.read().get(key).cloned())
    }

    fn put(&self, key: &str, content: &str) -> AppResult<()> {
        self.space.map.write().insert(key.to_string(), content.to_string());
        self.space.save_snapshot()
    }

    fn put_if_absent(&self, key: &str, content: &str) -> AppResult<bool> {
        {
            let mut w = self.space.map.write();
            if w.contains_key(key) { return Ok(false); }
            w.insert(key.to_string(), content.to_string());
        }
        self.space.save_snapshot()?;
        Ok(true)
    }

    fn delete(&self, key: &str) -> AppResult<bool> {
        let removed = self.space.map.write().remove(key).is_some();
        if removed { self.space.save_snapshot()?; }
        Ok(removed)
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> AppResult<bool> {
        {
            let mut w = self.space.map.write();
            if w.get(key).map(String::as_str) != Some(expected) { return Ok(false); }
            w.remove(key);
        }
        self.space.save_snapshot()?;
        Ok(true)
    }

    fn delete_keys(&self, keys: &[String]) -> AppResult<bool> {
        let mut any = false;
        {
            let mut w = self.space.map.write();
            for k in keys {
                if w.remove(k).is_some() { any = true; }
            }
        }
        if any { self.space.save_snapshot()?; }
        Ok(any)
    }

    fn contains_key(&self, key: &str) -> AppResult<bool> { Ok(self.space.map.read().contains_key(key)) }

    fn get_all_sub_keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        let r = self.space.map.read();
        let out = r
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .filter(|k| uri::is_under(k, prefix))
            .cloned()
            .collect();
        Ok(out)
    }

    fn scan_keys<'a>(&'a self, prefix: &str) -> AppResult<KeyScan<'a>> {
        // Snapshot the matching keys up front; values are fetched one by one so writers are never blocked for the whole scan.
        let keys: Vec<String> = {
            let r = self.space.map.read();
            r.range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
                .map(|(k, _)| k)
                .take_while(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        };
        let space = self.space.clone();
        Ok(Box::new(keys.into_iter().filter_map(move |k| {
            let v = space.map.read().get(&k).cloned();
            v.map(|v| Ok((k, v)))
        })))
    }

    fn drop_key_store(&self) -> AppResult<()> {
        self.space.map.write().clear();
        self.space.related.lock().clear();
        if self.shared {
            spaces().write().remove(&self.space.name);
        }
        if let Some(p) = self.space.snapshot.as_ref() {
            if p.exists() { std::fs::remove_file(p)?; }
        }
        tracing::debug!(target: "docrepo::driver", "dropped memory store '{}'", self.space.name);
        Ok(())
    }

    fn create_related_key_store(&self, relation: &str) -> AppResult<Arc<dyn Driver>> {
        let name = format!("{}{}", self.space.name, relation);
        if self.shared {
            Ok(Arc::new(MemoryDriver::shared(&name, self.related_snapshot(relation))?))
        } else {
            let space = self.space.related.lock()
                .entry(name.clone())
                .or_insert_with(|| Arc::new(MemorySpace::new(&name, None)))
                .clone();
            Ok(Arc::new(MemoryDriver { space, shared: false }))
        }
    }

    fn count_keys(&self) -> AppResult<u64> { Ok(self.space.map.read().len() as u64) }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
