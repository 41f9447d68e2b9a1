//! Versioned document repository.
//!
//! Content lives in the primary driver under the document path. Metadata
//! (version, author, comment, timestamp, tags) lives in the related `_meta`
//! store under the same path. Versioned repositories also keep an immutable
//! snapshot of each write as `path@N`, either in the related `_version` store
//! or in a separately configured backend, and a `path@N` metadata record.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{RepoConfig, RepoKind};
use crate::driver::{Driver, DriverFactory, FolderInfo};
use crate::error::{AppError, AppResult};
use crate::folders::FolderStore;
use crate::index::{IndexDefinition, IndexHandler, MemoryIndex};
use crate::query::TableQueryResult;
use crate::uri;

pub const META_RELATION: &str = "_meta";
pub const VERSION_RELATION: &str = "_version";
/// Author recorded for deletions made by folder-level removal.
pub const SYSTEM_USER: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub version: u64,
    pub user: String,
    pub comment: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentWithMeta {
    pub path: String,
    pub content: Option<String>,
    pub metadata: DocumentMetadata,
}

fn version_key(path: &str, version: u64) -> String { format!("{}@{}", path, version) }

pub struct Repository {
    name: String,
    kind: RepoKind,
    folders: FolderStore,
    meta: Arc<dyn Driver>,
    versions: Option<Arc<dyn Driver>>,
    index: Option<(IndexDefinition, Arc<dyn IndexHandler>)>,
    /// Serializes read-modify-write of version counters.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Resolve the configured backends and open the repository called `name`.
    pub fn open(name: &str, config: &RepoConfig, factory: &DriverFactory) -> AppResult<Self> {
        let content = factory.open(&config.content)?;
        let versions = match (&config.kind, &config.versions) {
            (RepoKind::Nrep, Some(spec)) => Some(factory.open(spec)?),
            _ => None,
        };
        let index = match config.index.as_deref() {
            Some(def) => Some(IndexDefinition::parse(def)?),
            None => None,
        };
        Self::with_drivers(name, config.kind, content, versions, index)
    }

    /// Build a repository over already-open drivers. Without an explicit version
    /// driver a versioned repository keeps snapshots in `<content>_version`.
    pub fn with_drivers(
        name: &str,
        kind: RepoKind,
        content: Arc<dyn Driver>,
        versions: Option<Arc<dyn Driver>>,
        index: Option<IndexDefinition>,
    ) -> AppResult<Self> {
        let meta = content.create_related_key_store(META_RELATION)?;
        let versions = match (kind, versions) {
            (RepoKind::Nrep, Some(v)) => Some(v),
            (RepoKind::Nrep, None) => Some(content.create_related_key_store(VERSION_RELATION)?),
            (RepoKind::Rep, _) => None,
        };
        let repo = Self {
            name: name.to_string(),
            kind,
            folders: FolderStore::new(content),
            meta,
            versions,
            index: index.map(|d| (d, Arc::new(MemoryIndex::new()) as Arc<dyn IndexHandler>)),
            write_lock: Mutex::new(()),
        };
        repo.rebuild_index()?;
        debug!(target: "docrepo::repo", "opened repository '{}' ({:?})", repo.name, repo.kind);
        Ok(repo)
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn kind(&self) -> RepoKind { self.kind }

    pub fn is_versioned(&self) -> bool { self.kind.is_versioned() }

    /// Every repository here keeps metadata records.
    pub fn has_meta_content(&self) -> bool { true }

    pub fn index_definition(&self) -> Option<&IndexDefinition> { self.index.as_ref().map(|(d, _)| d) }

    fn rebuild_index(&self) -> AppResult<()> {
        let Some((def, handler)) = self.index.as_ref() else { return Ok(()) };
        handler.drop_index()?;
        let mut rows = 0usize;
        for item in self.folders.scan("")? {
            let (k, v) = item?;
            handler.update_row(&k, def.extract_row(&k, &v))?;
            rows += 1;
        }
        crate::tprintln!("[repo] {}: index rebuilt from {} documents", self.name, rows);
        Ok(())
    }

    fn check_doc_path(path: &str) -> AppResult<()> {
        uri::validate_doc_path(path)?;
        if path.is_empty() {
            return Err(AppError::user("invalid_path".to_string(), "A document path cannot be empty".to_string()));
        }
        if uri::split_version(path).1.is_some() {
            return Err(AppError::user("invalid_path".to_string(), format!("Cannot write to a versioned path '{}'", path)));
        }
        Ok(())
    }

    fn read_meta(&self, key: &str) -> AppResult<Option<DocumentMetadata>> {
        match self.meta.get(key)? {
            Some(s) => Ok(Some(serde_json::from_str(&s).map_err(|e| AppError::decode_failed("DocumentMetadata", &s, e))?)),
            None => Ok(None),
        }
    }

    fn write_meta(&self, path: &str, meta: &DocumentMetadata) -> AppResult<()> {
        let json = serde_json::to_string(meta)?;
        if self.is_versioned() {
            self.meta.put(&version_key(path, meta.version), &json)?;
        }
        self.meta.put(path, &json)
    }

    /// Write (or, with `is_delete`, remove) the document at `path` and record a new version.
    pub fn add_document(&self, path: &str, content: &str, user: &str, comment: &str, is_delete: bool) -> AppResult<DocumentWithMeta> {
        Self::check_doc_path(path)?;
        let _guard = self.write_lock.lock();
        self.write_version(path, content, user, comment, is_delete)
    }

    /// Next version of `path`. Callers hold `write_lock`.
    fn write_version(&self, path: &str, content: &str, user: &str, comment: &str, is_delete: bool) -> AppResult<DocumentWithMeta> {
        let previous = self.read_meta(path)?;
        let version = previous.as_ref().map(|m| m.version + 1).unwrap_or(1);
        let meta = DocumentMetadata {
            version,
            user: user.to_string(),
            comment: comment.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            deleted: is_delete,
            tags: previous.map(|m| m.tags).unwrap_or_default(),
        };

        if is_delete {
            self.folders.driver().delete(path)?;
            if let Some((_, handler)) = self.index.as_ref() { handler.delete_row(path)?; }
        } else {
            self.folders.driver().put(path, content)?;
            if let Some(versions) = self.versions.as_ref() {
                versions.put(&version_key(path, version), content)?;
            }
            if let Some((def, handler)) = self.index.as_ref() {
                handler.update_row(path, def.extract_row(path, content))?;
            }
        }
        self.write_meta(path, &meta)?;
        debug!(target: "docrepo::repo", "{}: {} '{}' version {}", self.name, if is_delete { "deleted" } else { "wrote" }, path, version);

        Ok(DocumentWithMeta {
            path: path.to_string(),
            content: if is_delete { None } else { Some(content.to_string()) },
            metadata: meta,
        })
    }

    /// Latest content, or the content of version N for `path@N`.
    pub fn get_document(&self, path: &str) -> AppResult<Option<String>> {
        let (base, version) = uri::split_version(path);
        match version {
            None => self.folders.driver().get(base),
            Some(n) => match self.versions.as_ref() {
                Some(versions) => versions.get(&version_key(base, n)),
                None => {
                    // unversioned: only the latest version is addressable
                    match self.read_meta(base)? {
                        Some(m) if m.version == n && !m.deleted => self.folders.driver().get(base),
                        _ => Ok(None),
                    }
                }
            },
        }
    }

    pub fn get_meta(&self, path: &str) -> AppResult<Option<DocumentMetadata>> {
        let (base, version) = uri::split_version(path);
        match version {
            None => self.read_meta(base),
            Some(n) if self.is_versioned() => self.read_meta(&version_key(base, n)),
            Some(n) => Ok(self.read_meta(base)?.filter(|m| m.version == n)),
        }
    }

    pub fn get_doc_and_meta(&self, path: &str) -> AppResult<Option<DocumentWithMeta>> {
        let Some(metadata) = self.get_meta(path)? else { return Ok(None) };
        let content = self.get_document(path)?;
        let (base, _) = uri::split_version(path);
        Ok(Some(DocumentWithMeta { path: base.to_string(), content, metadata }))
    }

    pub fn document_exists(&self, path: &str) -> AppResult<bool> {
        self.folders.driver().contains_key(path)
    }

    /// False when there is no live document at `path`.
    pub fn remove_document(&self, path: &str, user: &str, comment: &str) -> AppResult<bool> {
        let _guard = self.write_lock.lock();
        if !self.document_exists(path)? {
            return Ok(false);
        }
        if self.is_versioned() {
            self.write_version(path, "", user, comment, true)?;
        } else {
            self.folders.driver().delete(path)?;
            self.meta.delete(path)?;
            if let Some((_, handler)) = self.index.as_ref() { handler.delete_row(path)?; }
            debug!(target: "docrepo::repo", "{}: removed '{}'", self.name, path);
        }
        Ok(true)
    }

    pub fn get_children(&self, prefix: &str) -> AppResult<Vec<FolderInfo>> {
        self.folders.get_children(prefix)
    }

    /// Remove documents below `prefix` (all of them with `force`). Raises NotFound for an empty prefix.
    pub fn remove_children(&self, prefix: &str, force: bool) -> AppResult<Vec<FolderInfo>> {
        let removed = self.folders.remove_children(prefix, force)?;
        for fi in removed.iter().filter(|fi| !fi.is_folder) {
            if let Some((_, handler)) = self.index.as_ref() { handler.delete_row(&fi.name)?; }
            if self.is_versioned() {
                let _guard = self.write_lock.lock();
                if let Some(prev) = self.read_meta(&fi.name)? {
                    let meta = DocumentMetadata {
                        version: prev.version + 1,
                        user: SYSTEM_USER.to_string(),
                        comment: format!("Removed with folder {}", prefix),
                        timestamp: chrono::Utc::now().timestamp_millis(),
                        deleted: true,
                        tags: prev.tags,
                    };
                    self.write_meta(&fi.name, &meta)?;
                }
            } else {
                self.meta.delete(&fi.name)?;
            }
        }
        Ok(removed)
    }

    pub fn visit_all(&self, prefix: &str, visitor: &mut dyn FnMut(&str, &str) -> ControlFlow<()>) -> AppResult<()> {
        self.folders.visit_all(prefix, visitor)
    }

    pub fn list_docs_by_prefix(&self, prefix: &str, depth: usize) -> AppResult<Vec<String>> {
        self.folders.list_docs_by_prefix(prefix, depth)
    }

    fn update_tags<F>(&self, path: &str, f: F) -> AppResult<DocumentMetadata>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self.write_lock.lock();
        let mut meta = self.read_meta(path)?.ok_or_else(|| {
            AppError::not_found("document_not_found".to_string(), format!("Document {} does not exist in {}", path, self.name))
        })?;
        f(&mut meta.tags);
        self.write_meta(path, &meta)?;
        Ok(meta)
    }

    pub fn add_tag_to_document(&self, path: &str, tag: &str, value: &str) -> AppResult<DocumentMetadata> {
        self.update_tags(path, |tags| { tags.insert(tag.to_string(), value.to_string()); })
    }

    pub fn add_tags_to_document(&self, path: &str, new_tags: &BTreeMap<String, String>) -> AppResult<DocumentMetadata> {
        self.update_tags(path, |tags| tags.extend(new_tags.iter().map(|(k, v)| (k.clone(), v.clone()))))
    }

    pub fn remove_tag_from_document(&self, path: &str, tag: &str) -> AppResult<DocumentMetadata> {
        self.update_tags(path, |tags| { tags.remove(tag); })
    }

    pub fn remove_tags_from_document(&self, path: &str, names: &[String]) -> AppResult<DocumentMetadata> {
        self.update_tags(path, |tags| {
            for n in names { tags.remove(n); }
        })
    }

    pub fn find_index(&self, query: &str) -> AppResult<TableQueryResult> {
        match self.index.as_ref() {
            Some((_, handler)) => handler.query(query),
            None => Err(AppError::not_supported(
                "no_index".to_string(),
                format!("Repository {} has no index", self.name),
            )),
        }
    }

    /// Drop content, metadata, version snapshots and the index.
    pub fn drop_repo(&self) -> AppResult<()> {
        let _guard = self.write_lock.lock();
        self.folders.driver().drop_key_store()?;
        self.meta.drop_key_store()?;
        if let Some(v) = self.versions.as_ref() {
            if let Err(e) = v.drop_key_store() {
                warn!(target: "docrepo::repo", "{}: dropping version store failed: {}", self.name, e);
                return Err(e);
            }
        }
        if let Some((_, handler)) = self.index.as_ref() { handler.drop_index()?; }
        debug!(target: "docrepo::repo", "dropped repository '{}'", self.name);
        Ok(())
    }
}

#[cfg(test)]
#[path = "repo_tests.rs"]
mod repo_tests;
