//! Filesystem driver with a native hierarchy.
//!
//! Layout: `<root>/<instance>/<seg>/.../<leaf>.doc`. Key segments are
//! percent-encoded so every key maps to exactly one file. Folders are
//! directories; empty directories are pruned on delete so that "a folder
//! exists iff a key lies below it" holds exactly as in the flat drivers.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use path_absolutize::Absolutize;
use walkdir::WalkDir;

use super::{Driver, FolderInfo, KeyScan};
use crate::error::{AppError, AppResult};
use crate::uri;

const LEAF_EXT: &str = ".doc";

fn encode_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for (i, c) in seg.chars().enumerate() {
        let keep = c.is_alphanumeric() || matches!(c, '-' | '_' | '@' | ' ' | '+' | ',' | '=')
            || (c == '.' && i > 0);
        if keep {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", b));
            }
        }
    }
    out
}

fn decode_segment(seg: &str) -> String {
    let bytes = seg.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok().and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(b) = hex {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

pub struct FileDriver {
    name: String,
    base: PathBuf,
    dir: PathBuf,
}

impl FileDriver {
    /// Open (creating if needed) the store `instance` under `root`.
    pub fn open(root: impl AsRef<Path>, instance: &str) -> AppResult<Self> {
        if instance.is_empty() || instance.contains(['/', '\\']) {
            return Err(AppError::user("invalid_instance".to_string(), format!("Invalid store name '{}'", instance)));
        }
        let base = root.as_ref().absolutize()?.to_path_buf();
        let dir = base.join(encode_segment(instance));
        std::fs::create_dir_all(&dir)?;
        tracing::debug!(target: "docrepo::driver", "file store '{}' at {}", instance, dir.display());
        Ok(Self { name: instance.to_string(), base, dir })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    fn folder_path(&self, prefix: &str) -> PathBuf {
        let mut p = self.dir.clone();
        for seg in prefix.split('/').filter(|s| !s.is_empty()) {
            p.push(encode_segment(seg));
        }
        p
    }

    fn leaf_path(&self, key: &str) -> AppResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.ends_with('/') || key.contains("//") {
            return Err(AppError::user("invalid_key".to_string(), format!("Invalid key '{}'", key)));
        }
        let parent = uri::parent_path(key);
        let leaf = &key[if parent.is_empty() { 0 } else { parent.len() + 1 }..];
        Ok(self.folder_path(parent).join(format!("{}{}", encode_segment(leaf), LEAF_EXT)))
    }

    /// Map a file below the store directory back to its key.
    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.dir).ok()?;
        let mut segs: Vec<String> = Vec::new();
        let comps: Vec<_> = rel.components().collect();
        for (i, c) in comps.iter().enumerate() {
            let s = c.as_os_str().to_string_lossy();
            if i + 1 == comps.len() {
                let stem = s.strip_suffix(LEAF_EXT)?;
                segs.push(decode_segment(stem));
            } else {
                segs.push(decode_segment(&s));
            }
        }
        Some(segs.join("/"))
    }

    fn is_leaf_file(path: &Path) -> bool {
        path.file_name()
            .map(|n| {
                let n = n.to_string_lossy();
                n.ends_with(LEAF_EXT) && !n.starts_with('.')
            })
            .unwrap_or(false)
    }

    /// All keys in the directory subtree rooted at `folder`, sorted.
    fn walk_keys(&self, folder: &Path) -> AppResult<Vec<String>> {
        if !folder.is_dir() { return Ok(Vec::new()); }
        let mut out = Vec::new();
        for ent in WalkDir::new(folder).min_depth(1) {
            let ent = match ent {
                Ok(e) => e,
                // entries removed by a concurrent delete
                Err(e) if e.io_error().map(|io| io.kind() == std::io::ErrorKind::NotFound).unwrap_or(false) => continue,
                Err(e) => return Err(AppError::backend("walk_error".to_string(), e.to_string())),
            };
            if ent.file_type().is_file() && Self::is_leaf_file(ent.path()) {
                if let Some(k) = self.key_for(ent.path()) { out.push(k); }
            }
        }
        out.sort();
        Ok(out)
    }

    fn prune_empty_parents(&self, start: &Path) {
        let mut cur = start.to_path_buf();
        while cur != self.dir && cur.starts_with(&self.dir) {
            // remove_dir only succeeds on empty directories
            if std::fs::remove_dir(&cur).is_err() { break; }
            match cur.parent() {
                Some(p) => cur = p.to_path_buf(),
                None => break,
            }
        }
    }

    /// Hidden scratch path in the target's directory. Never listed as a key.
    fn temp_beside(&self, target: &Path) -> PathBuf {
        let parent = target.parent().unwrap_or(&self.dir);
        parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()))
    }

    fn write_atomic(&self, target: &Path, content: &str) -> AppResult<()> {
        let parent = target.parent().unwrap_or(&self.dir);
        std::fs::create_dir_all(parent)?;
        let tmp = self.temp_beside(target);
        std::fs::write(&tmp, content.as_bytes())?;
        if let Err(e) = std::fs::rename(&tmp, target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl Driver for FileDriver {
    fn name(&self) -> &str { &self.name }

    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let p = self.leaf_path(key)?;
        match std::fs::read_to_string(&p) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            // a folder of the same name is not a document
            Err(_) if p.is_dir() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, content: &str) -> AppResult<()> {
        let p = self.leaf_path(key)?;
        self.write_atomic(&p, content)
    }

    fn put_if_absent(&self, key: &str, content: &str) -> AppResult<bool> {
        let p = self.leaf_path(key)?;
        if let Some(parent) = p.parent() { std::fs::create_dir_all(parent)?; }
        let tmp = self.temp_beside(&p);
        {
            let mut f = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            f.write_all(content.as_bytes())?;
            f.sync_all()?;
        }
        // hard_link fails when the target exists, so the document appears complete or not at all
        let linked = std::fs::hard_link(&tmp, &p);
        let _ = std::fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> AppResult<bool> {
        let p = self.leaf_path(key)?;
        match std::fs::remove_file(&p) {
            Ok(()) => {
                if let Some(parent) = p.parent() { self.prune_empty_parents(parent); }
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_if_equals(&self, key: &str, expected: &str) -> AppResult<bool> {
        let p = self.leaf_path(key)?;
        if self.get(key)?.as_deref() != Some(expected) { return Ok(false); }
        // Move the document aside first; only the caller that wins the rename owns what it moved.
        let tmp = self.temp_beside(&p);
        match std::fs::rename(&p, &tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        let moved = std::fs::read_to_string(&tmp)?;
        if moved != expected {
            // replaced between the read and the rename: put it back unless a newer document took the slot
            match std::fs::hard_link(&tmp, &p) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    let _ = std::fs::remove_file(&tmp);
                    return Err(e.into());
                }
            }
            std::fs::remove_file(&tmp)?;
            return Ok(false);
        }
        std::fs::remove_file(&tmp)?;
        if let Some(parent) = p.parent() { self.prune_empty_parents(parent); }
        Ok(true)
    }

    fn contains_key(&self, key: &str) -> AppResult<bool> { Ok(self.leaf_path(key)?.is_file()) }

    fn get_sub_keys(&self, prefix: &str) -> AppResult<Vec<FolderInfo>> {
        let folder = self.folder_path(prefix);
        let rd = match std::fs::read_dir(&folder) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out: Vec<FolderInfo> = Vec::new();
        for ent in rd.flatten() {
            let path = ent.path();
            let fname = ent.file_name().to_string_lossy().to_string();
            if fname.starts_with('.') { continue; }
            let Ok(ft) = ent.file_type() else { continue };
            if ft.is_dir() {
                // a directory only counts when some key lies below it
                if !self.walk_keys(&path)?.is_empty() {
                    out.push(FolderInfo::folder(decode_segment(&fname)));
                }
            } else if ft.is_file() && Self::is_leaf_file(&path) {
                if let Some(stem) = fname.strip_suffix(LEAF_EXT) {
                    out.push(FolderInfo::leaf(decode_segment(stem)));
                }
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn get_all_sub_keys(&self, prefix: &str) -> AppResult<Vec<String>> {
        self.walk_keys(&self.folder_path(prefix))
    }

    fn scan_keys<'a>(&'a self, prefix: &str) -> AppResult<KeyScan<'a>> {
        // Walk the deepest complete folder of the raw prefix, then filter.
        let folder_part = match prefix.rfind('/') {
            Some(i) => &prefix[..i],
            None => "",
        };
        let prefix_owned = prefix.to_string();
        let keys: Vec<String> = self
            .walk_keys(&self.folder_path(folder_part))?
            .into_iter()
            .filter(|k| k.starts_with(&prefix_owned))
            .collect();
        Ok(Box::new(keys.into_iter().filter_map(move |k| match self.get(&k) {
            Ok(Some(v)) => Some(Ok((k, v))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        })))
    }

    fn drop_key_store(&self) -> AppResult<()> {
        if self.dir.exists() { std::fs::remove_dir_all(&self.dir)?; }
        tracing::debug!(target: "docrepo::driver", "dropped file store '{}'", self.name);
        Ok(())
    }

    fn create_related_key_store(&self, relation: &str) -> AppResult<Arc<dyn Driver>> {
        Ok(Arc::new(FileDriver::open(&self.base, &format!("{}{}", self.name, relation))?))
    }

    fn count_keys(&self) -> AppResult<u64> { Ok(self.walk_keys(&self.dir)?.len() as u64) }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod file_tests;
