//! Backend drivers: flat string-keyed stores behind one object-safe trait.
//!
//! Most backends only know a flat namespace. Folder semantics are emulated on
//! top of it with segment-aware prefix scans: a folder exists iff at least one
//! key lies below it. Drivers with a native hierarchy override the listing
//! methods but must produce the same answers as the emulation.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{BackendKind, BackendSpec, StorageSettings};
use crate::error::{AppError, AppResult};
use crate::uri;

pub mod memory;
pub mod file;

pub use file::FileDriver;
pub use memory::MemoryDriver;

/// One entry of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FolderInfo {
    pub name: String,
    pub is_folder: bool,
}

impl FolderInfo {
    pub fn leaf(name: impl Into<String>) -> Self { Self { name: name.into(), is_folder: false } }
    pub fn folder(name: impl Into<String>) -> Self { Self { name: name.into(), is_folder: true } }
}

/// Lazy scan over `(key, content)` pairs. Finite, not restartable; drop it to stop early.
pub type KeyScan<'a> = Box<dyn Iterator<Item = AppResult<(String, String)>> + 'a>;

pub trait Driver: Send + Sync {
    /// Store name, used in logs and to derive related stores.
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> AppResult<Option<String>>;

    fn put(&self, key: &str, content: &str) -> AppResult<()>;

    /// Store only when the key does not exist yet. Atomic with respect to other callers of the same store.
    fn put_if_absent(&self, key: &str, content: &str) -> AppResult<bool>;

    /// Returns true when the key existed.
    fn delete(&self, key: &str) -> AppResult<bool>;

    /// Compare-and-delete: remove the key only while it still holds `expected`.
    /// Atomic with respect to `put_if_absent` and other callers of the same store.
    fn delete_if_equals(&self, key: &str, expected: &str) -> AppResult<bool>;

    /// Returns true when at least one of the keys existed.
    fn delete_keys(&self, keys: &[String]) -> AppResult<bool> {
        let mut any = false;
        for k in keys {
            if self.delete(k)? { any = true; }
        }
        Ok(any)
    }

    fn contains_key(&self, key: &str) -> AppResult<bool> { Ok(self.get(key)?.is_some()) }

    /// Direct children of `prefix` (segment-aware), sorted by name.
    fn get_sub_keys(&self, prefix: &str) -> AppResult<Vec<FolderInfo>> {
        let keys = self.get_all_sub_keys(prefix)?;
        Ok(sub_keys_from_flat(prefix, keys.iter().map(|k| k.as_str())))
    }

    /// Every key strictly below `prefix` (segment-aware), sorted. `""` lists the whole store.
    fn get_all_sub_keys(&self, prefix: &str) -> AppResult<Vec<String>>;

    /// Raw `starts_with` scan. Keys that vanish while the scan runs are skipped.
    fn scan_keys<'a>(&'a self, prefix: &str) -> AppResult<KeyScan<'a>>;

    /// Drive a visitor over `scan_keys(prefix)` until it breaks or the scan ends.
    fn visit_keys(&self, prefix: &str, visitor: &mut dyn FnMut(&str, &str) -> ControlFlow<()>) -> AppResult<()> {
        for item in self.scan_keys(prefix)? {
            let (k, v) = item?;
            if visitor(&k, &v).is_break() { break; }
        }
        Ok(())
    }

    /// Remove every key and the store itself.
    fn drop_key_store(&self) -> AppResult<()>;

    /// A sibling store named `<name><relation>` on the same backend (e.g. `_meta`, `_version`).
    fn create_related_key_store(&self, relation: &str) -> AppResult<Arc<dyn Driver>>;

    fn count_keys(&self) -> AppResult<u64> {
        Err(AppError::not_supported("count_not_supported".to_string(), format!("Store {} cannot count keys", self.name())))
    }
}

/// One listing level computed from a flat key set: a folder per distinct first
/// segment that continues further, a leaf per key that ends there.
pub fn sub_keys_from_flat<'k, I>(prefix: &str, keys: I) -> Vec<FolderInfo>
where
    I: IntoIterator<Item = &'k str>,
{
    let mut seen: BTreeSet<FolderInfo> = BTreeSet::new();
    for key in keys {
        let Some(rest) = uri::relative_to(key, prefix) else { continue };
        match rest.find('/') {
            Some(i) => { seen.insert(FolderInfo::folder(&rest[..i])); }
            None => { seen.insert(FolderInfo::leaf(rest)); }
        }
    }
    seen.into_iter().collect()
}

/// Resolves backend specs to drivers. Resolution happens once, when a repository is opened.
#[derive(Debug, Clone, Default)]
pub struct DriverFactory {
    settings: StorageSettings,
}

impl DriverFactory {
    pub fn new(settings: StorageSettings) -> Self { Self { settings } }

    pub fn settings(&self) -> &StorageSettings { &self.settings }

    pub fn open(&self, spec: &BackendSpec) -> AppResult<Arc<dyn Driver>> {
        tracing::debug!(target: "docrepo::driver", "opening {} store '{}'", spec.kind, spec.instance);
        match spec.kind {
            BackendKind::Memory => {
                let snapshot = spec.option("snapshot").map(|p| self.settings.root.join(p));
                Ok(Arc::new(MemoryDriver::shared(&spec.instance, snapshot)?))
            }
            BackendKind::File => {
                let root = spec.option("root").map(std::path::PathBuf::from).unwrap_or_else(|| self.settings.root.clone());
                Ok(Arc::new(FileDriver::open(root, &spec.instance)?))
            }
            other => Err(AppError::not_supported(
                "backend_not_supported".to_string(),
                format!("Backend {} is not available in this build", other),
            )),
        }
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod driver_tests;
