//! Folder emulation over a driver: listing, existence, recursive removal and scans.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::debug;

use crate::driver::{Driver, FolderInfo, KeyScan};
use crate::error::{AppError, AppResult};
use crate::uri;

#[derive(Clone)]
pub struct FolderStore {
    driver: Arc<dyn Driver>,
}

/// `a/b/` and `a/b` name the same folder.
fn folder_name(prefix: &str) -> &str { prefix.trim_end_matches('/') }

fn scan_prefix(prefix: &str) -> String {
    match folder_name(prefix) {
        "" => String::new(),
        p => format!("{}/", p),
    }
}

impl FolderStore {
    pub fn new(driver: Arc<dyn Driver>) -> Self { Self { driver } }

    pub fn driver(&self) -> &Arc<dyn Driver> { &self.driver }

    pub fn get_children(&self, prefix: &str) -> AppResult<Vec<FolderInfo>> {
        self.driver.get_sub_keys(folder_name(prefix))
    }

    /// A folder exists iff at least one key lies strictly below it.
    pub fn folder_exists(&self, prefix: &str) -> AppResult<bool> {
        match self.scan(prefix)?.next() {
            Some(item) => item.map(|_| true),
            None => Ok(false),
        }
    }

    /// Lazy scan of every `(key, content)` strictly below `prefix`.
    pub fn scan<'a>(&'a self, prefix: &str) -> AppResult<KeyScan<'a>> {
        self.driver.scan_keys(&scan_prefix(prefix))
    }

    pub fn visit_all(&self, prefix: &str, visitor: &mut dyn FnMut(&str, &str) -> ControlFlow<()>) -> AppResult<()> {
        self.driver.visit_keys(&scan_prefix(prefix), visitor)
    }

    /// Remove the documents below `prefix`: only the direct ones unless `force`, the whole subtree with `force`.
    /// Returns the removed documents (full keys) followed by the folders that no longer exist, deepest first.
    pub fn remove_children(&self, prefix: &str, force: bool) -> AppResult<Vec<FolderInfo>> {
        let prefix = folder_name(prefix);
        if !self.folder_exists(prefix)? {
            return Err(AppError::folder_missing(prefix));
        }
        let keys: Vec<String> = if force {
            self.driver.get_all_sub_keys(prefix)?
        } else {
            self.driver
                .get_sub_keys(prefix)?
                .into_iter()
                .filter(|fi| !fi.is_folder)
                .map(|fi| uri::join_path(prefix, &fi.name))
                .collect()
        };
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for k in &keys {
            let mut parent = uri::parent_path(k);
            loop {
                if parent.len() < prefix.len() { break; }
                candidates.insert(parent.to_string());
                if parent.len() == prefix.len() || parent.is_empty() { break; }
                parent = uri::parent_path(parent);
            }
        }

        self.driver.delete_keys(&keys)?;
        debug!(target: "docrepo::driver", "removed {} keys below '{}' (force={})", keys.len(), prefix, force);

        let mut out: Vec<FolderInfo> = keys.into_iter().map(FolderInfo::leaf).collect();
        let mut gone: Vec<String> = Vec::new();
        for folder in candidates {
            if folder.is_empty() { continue; }
            if !self.folder_exists(&folder)? { gone.push(folder); }
        }
        gone.sort_by(|a, b| b.matches('/').count().cmp(&a.matches('/').count()).then_with(|| a.cmp(b)));
        out.extend(gone.into_iter().map(FolderInfo::folder));
        Ok(out)
    }

    /// Documents and folders (with a trailing `/`) up to `depth` levels below `prefix`; `0` means unlimited.
    pub fn list_docs_by_prefix(&self, prefix: &str, depth: usize) -> AppResult<Vec<String>> {
        let prefix = folder_name(prefix);
        let mut out: BTreeSet<String> = BTreeSet::new();
        for key in self.driver.get_all_sub_keys(prefix)? {
            let Some(rest) = uri::relative_to(&key, prefix) else { continue };
            let segs: Vec<&str> = rest.split('/').collect();
            let mut path = prefix.to_string();
            for (i, seg) in segs.iter().enumerate() {
                if depth != 0 && i >= depth { break; }
                path = uri::join_path(&path, seg);
                if i + 1 == segs.len() {
                    out.insert(path.clone());
                } else {
                    out.insert(format!("{}/", path));
                }
            }
        }
        Ok(out.into_iter().collect())
    }
}
