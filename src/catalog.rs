//! Authority -> repository map.
//!
//! Repository configs are persisted on a catalog driver under `repos/<authority>` so a
//! FILE-backed catalog reopens the same repositories in a later process. Opened
//! repositories are kept until dropped.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::RepoConfig;
use crate::driver::{Driver, DriverFactory, MemoryDriver};
use crate::error::{AppError, AppResult};
use crate::lock::LockService;
use crate::repo::Repository;

const CONFIG_PREFIX: &str = "repos";

pub struct RepoCatalog {
    factory: DriverFactory,
    locks: Arc<LockService>,
    configs: Arc<dyn Driver>,
    open: RwLock<HashMap<String, Arc<Repository>>>,
}

impl RepoCatalog {
    pub fn new(factory: DriverFactory, locks: Arc<LockService>, configs: Arc<dyn Driver>) -> Self {
        Self { factory, locks, configs, open: RwLock::new(HashMap::new()) }
    }

    /// Catalog whose configs live only as long as the process.
    pub fn in_memory(factory: DriverFactory) -> Self {
        let locks = Arc::new(LockService::new(factory.clone()));
        Self::new(factory, locks, Arc::new(MemoryDriver::new("catalog")))
    }

    pub fn locks(&self) -> &Arc<LockService> { &self.locks }

    pub fn factory(&self) -> &DriverFactory { &self.factory }

    fn config_key(authority: &str) -> String { format!("{}/{}", CONFIG_PREFIX, authority) }

    fn check_authority(authority: &str) -> AppResult<()> {
        if authority.is_empty() || authority.contains('/') || authority.contains('@') {
            return Err(AppError::user("invalid_authority".to_string(), format!("Invalid repository authority '{}'", authority)));
        }
        Ok(())
    }

    pub fn repo_exists(&self, authority: &str) -> AppResult<bool> {
        if self.open.read().contains_key(authority) { return Ok(true); }
        self.configs.contains_key(&Self::config_key(authority))
    }

    pub fn get_config(&self, authority: &str) -> AppResult<Option<RepoConfig>> {
        let key = Self::config_key(authority);
        match self.configs.get(&key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(|e| AppError::decode_failed("RepoConfig", &raw, e))?)),
            None => Ok(None),
        }
    }

    /// Create and open a repository. Creation runs under the structural creation lock and
    /// returns `Ok(None)` when that lock could not be taken in time.
    pub fn create_repo(&self, authority: &str, config: &RepoConfig) -> AppResult<Option<Arc<Repository>>> {
        Self::check_authority(authority)?;
        if self.repo_exists(authority)? {
            return Err(AppError::conflict("repo_exists".to_string(), format!("Repository {} already exists", authority)));
        }
        self.locks.with_creation_lock(|| {
            // another creator may have won while we waited for the lock
            if self.repo_exists(authority)? {
                return Err(AppError::conflict("repo_exists".to_string(), format!("Repository {} already exists", authority)));
            }
            let repo = Arc::new(Repository::open(authority, config, &self.factory)?);
            self.configs.put(&Self::config_key(authority), &serde_json::to_string(config)?)?;
            self.open.write().insert(authority.to_string(), repo.clone());
            info!(target: "docrepo::repo", "created repository '{}' ({:?})", authority, config.kind);
            Ok(repo)
        })
    }

    /// Register an already-built repository. Its config is not persisted.
    pub fn attach_repo(&self, authority: &str, repo: Arc<Repository>) -> AppResult<()> {
        Self::check_authority(authority)?;
        if self.repo_exists(authority)? {
            return Err(AppError::conflict("repo_exists".to_string(), format!("Repository {} already exists", authority)));
        }
        self.open.write().insert(authority.to_string(), repo);
        Ok(())
    }

    /// The repository for `authority`, opening it from its stored config on first use.
    pub fn get_repo(&self, authority: &str) -> AppResult<Option<Arc<Repository>>> {
        if let Some(r) = self.open.read().get(authority) { return Ok(Some(r.clone())); }
        let Some(config) = self.get_config(authority)? else { return Ok(None) };
        let mut open = self.open.write();
        if let Some(r) = open.get(authority) { return Ok(Some(r.clone())); }
        debug!(target: "docrepo::repo", "opening repository '{}' from stored config", authority);
        let repo = Arc::new(Repository::open(authority, &config, &self.factory)?);
        open.insert(authority.to_string(), repo.clone());
        Ok(Some(repo))
    }

    /// Like [`get_repo`](Self::get_repo) but a missing repository is `NotFound`.
    pub fn require_repo(&self, authority: &str) -> AppResult<Arc<Repository>> {
        self.get_repo(authority)?.ok_or_else(|| {
            AppError::not_found("repo_not_found".to_string(), format!("Repository {} does not exist", authority))
        })
    }

    /// Drop the repository's stores and forget it. Returns false when there was nothing to drop.
    pub fn drop_repo(&self, authority: &str) -> AppResult<bool> {
        let Some(repo) = self.get_repo(authority)? else { return Ok(false) };
        repo.drop_repo()?;
        self.configs.delete(&Self::config_key(authority))?;
        self.open.write().remove(authority);
        info!(target: "docrepo::repo", "dropped repository '{}'", authority);
        Ok(true)
    }

    /// Every known authority, sorted.
    pub fn authorities(&self) -> AppResult<Vec<String>> {
        let mut all: BTreeSet<String> = self.open.read().keys().cloned().collect();
        let prefix = format!("{}/", CONFIG_PREFIX);
        for item in self.configs.scan_keys(&prefix)? {
            let (k, _) = item?;
            all.insert(k[prefix.len()..].to_string());
        }
        Ok(all.into_iter().collect())
    }
}
