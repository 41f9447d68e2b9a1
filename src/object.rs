//! Typed object storage over repositories.
//!
//! Objects serialize to JSON documents at the URI they report through [`Storable`]. Reads go
//! through an injected [`ContentCache`]; writes put the new content in the cache and deletes
//! invalidate it before touching the repository.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, trace};

use crate::cache::{CacheLookup, ContentCache};
use crate::catalog::RepoCatalog;
use crate::driver::FolderInfo;
use crate::error::{AppError, AppResult};
use crate::query::TableQueryResult;
use crate::repo::{DocumentMetadata, DocumentWithMeta, Repository};
use crate::uri::DocUri;

/// Caching behaviour of a storable type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorableInfo {
    pub cacheable: bool,
    /// Also remember that a document does not exist.
    pub cache_nulls: bool,
}

impl Default for StorableInfo {
    fn default() -> Self { Self { cacheable: true, cache_nulls: false } }
}

pub trait Storable: Serialize + DeserializeOwned {
    const TYPE_NAME: &'static str;

    fn storage_info() -> StorableInfo { StorableInfo::default() }

    /// Where this object lives.
    fn storage_uri(&self) -> AppResult<DocUri>;
}

pub const DROP_DOC_COMMENT: &str = "Drop Doc";

pub struct ObjectStorage {
    catalog: Arc<RepoCatalog>,
    cache: Arc<ContentCache>,
}

fn decode<T: Storable>(content: &str) -> AppResult<T> {
    serde_json::from_str(content).map_err(|e| AppError::decode_failed(T::TYPE_NAME, content, e))
}

/// `class_prefix + parent`, with leading slashes of `parent` and trailing slashes of the result removed.
fn folder_prefix(class_prefix: &str, parent: &str) -> String {
    let parent = parent.trim_start_matches('/');
    format!("{}{}", class_prefix, parent).trim_end_matches('/').to_string()
}

impl ObjectStorage {
    pub fn new(catalog: Arc<RepoCatalog>, cache: Arc<ContentCache>) -> Self {
        Self { catalog, cache }
    }

    pub fn cache(&self) -> &Arc<ContentCache> { &self.cache }

    pub fn catalog(&self) -> &Arc<RepoCatalog> { &self.catalog }

    fn repo(&self, authority: &str) -> AppResult<Arc<Repository>> {
        self.catalog.require_repo(authority).map_err(|e| {
            error!(target: "docrepo::object", "could not find repo name [{}]", authority);
            e
        })
    }

    fn content(&self, uri: &DocUri, info: StorableInfo) -> AppResult<Option<String>> {
        if !info.cacheable {
            return self.repo(&uri.authority)?.get_document(&uri.doc_path());
        }
        match self.cache.get(uri) {
            CacheLookup::Present(c) => Ok(Some(c)),
            CacheLookup::Absent => Ok(None),
            CacheLookup::Miss => {
                let content = self.repo(&uri.authority)?.get_document(&uri.doc_path())?;
                if content.is_some() || info.cache_nulls {
                    trace!(target: "docrepo::cache", "putting {} in local cache", uri);
                    self.cache.put(uri, content.clone());
                }
                Ok(content)
            }
        }
    }

    pub fn read<T: Storable>(&self, uri: &DocUri) -> AppResult<Option<T>> {
        match self.content(uri, T::storage_info())? {
            Some(c) => Ok(Some(decode::<T>(&c)?)),
            None => Ok(None),
        }
    }

    pub fn write<T: Storable>(&self, object: &T, user: &str, comment: &str) -> AppResult<DocumentWithMeta> {
        let uri = object.storage_uri()?;
        trace!(target: "docrepo::object", "write {} by {} ({})", uri, user, comment);
        let json = serde_json::to_string(object)?;
        let repo = self.repo(&uri.authority)?;
        let dm = repo.add_document(&uri.path, &json, user, comment, false)?;
        // older cached versions may no longer be addressable
        self.cache.invalidate(&uri);
        if T::storage_info().cacheable {
            self.cache.put(&uri.latest(), Some(json));
        }
        Ok(dm)
    }

    pub fn delete(&self, user: &str, uri: &DocUri) -> AppResult<bool> {
        self.delete_with_comment(user, uri, DROP_DOC_COMMENT)
    }

    pub fn delete_with_comment(&self, user: &str, uri: &DocUri, comment: &str) -> AppResult<bool> {
        self.cache.invalidate(uri);
        self.repo(&uri.authority)?.remove_document(&uri.path, user, comment)
    }

    /// Visit `(path, content)` for every document under `class_prefix + filter_prefix`.
    pub fn visit_all(
        &self,
        authority: &str,
        class_prefix: &str,
        filter_prefix: &str,
        visitor: &mut dyn FnMut(&str, &str) -> ControlFlow<()>,
    ) -> AppResult<()> {
        let filter = if class_prefix.ends_with('/') { filter_prefix.strip_prefix('/').unwrap_or(filter_prefix) } else { filter_prefix };
        let prefix = format!("{}{}", class_prefix, filter);
        self.repo(authority)?.visit_all(&prefix, visitor)
    }

    /// Every object under the prefix that decodes and passes `keep`. Undecodable documents are logged and skipped.
    pub fn filter_all<T: Storable>(
        &self,
        authority: &str,
        class_prefix: &str,
        filter_prefix: &str,
        keep: impl Fn(&T) -> bool,
    ) -> AppResult<Vec<T>> {
        let mut out = Vec::new();
        self.visit_all(authority, class_prefix, filter_prefix, &mut |path, content| {
            match decode::<T>(content) {
                Ok(obj) => { if keep(&obj) { out.push(obj); } }
                Err(e) => error!(target: "docrepo::object", "Got error reading {} at {}: {}", T::TYPE_NAME, path, e),
            }
            ControlFlow::Continue(())
        })?;
        Ok(out)
    }

    pub fn read_all<T: Storable>(&self, authority: &str, class_prefix: &str, filter_prefix: &str) -> AppResult<Vec<T>> {
        self.filter_all(authority, class_prefix, filter_prefix, |_: &T| true)
    }

    pub fn get_children(&self, authority: &str, class_prefix: &str, parent: &str) -> AppResult<Vec<FolderInfo>> {
        self.repo(authority)?.get_children(&folder_prefix(class_prefix, parent))
    }

    /// Remove everything below the folder and clear the cache. Names come back as `//<path below the class prefix>`.
    pub fn remove_folder(&self, authority: &str, class_prefix: &str, parent: &str) -> AppResult<Vec<FolderInfo>> {
        let repo = self.repo(authority)?;
        let removed = repo.remove_children(&folder_prefix(class_prefix, parent), true)?;
        self.cache.invalidate_all();
        Ok(removed
            .into_iter()
            .map(|fi| FolderInfo {
                name: format!("//{}", fi.name.get(class_prefix.len()..).unwrap_or("")),
                is_folder: fi.is_folder,
            })
            .collect())
    }

    pub fn query_index(&self, authority: &str, query: &str) -> AppResult<TableQueryResult> {
        self.repo(authority)?.find_index(query)
    }

    pub fn get_latest_meta(&self, uri: &DocUri) -> AppResult<Option<DocumentMetadata>> {
        let repo = self.repo(&uri.authority)?;
        if !repo.has_meta_content() { return Ok(None); }
        repo.get_meta(&uri.path)
    }

    pub fn get_document_with_meta(&self, uri: &DocUri) -> AppResult<Option<DocumentWithMeta>> {
        self.repo(&uri.authority)?.get_doc_and_meta(&uri.doc_path())
    }

    pub fn apply_tag(&self, uri: &DocUri, tag: &str, value: &str) -> AppResult<DocumentMetadata> {
        self.repo(&uri.authority)?.add_tag_to_document(&uri.path, tag, value)
    }

    pub fn apply_tags(&self, uri: &DocUri, tags: &BTreeMap<String, String>) -> AppResult<DocumentMetadata> {
        self.repo(&uri.authority)?.add_tags_to_document(&uri.path, tags)
    }

    pub fn remove_tag(&self, uri: &DocUri, tag: &str) -> AppResult<DocumentMetadata> {
        self.repo(&uri.authority)?.remove_tag_from_document(&uri.path, tag)
    }

    pub fn remove_tags(&self, uri: &DocUri, tags: &[String]) -> AppResult<DocumentMetadata> {
        self.repo(&uri.authority)?.remove_tags_from_document(&uri.path, tags)
    }
}

#[cfg(test)]
#[path = "object_tests.rs"]
mod object_tests;
