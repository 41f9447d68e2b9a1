//! Named, time-bounded locks.
//!
//! A [`LockService`] owns one [`LockManager`] per resource URI. Two adapters exist:
//! an in-process manager built on a condition variable, and a document manager that
//! keeps one lock document per name on a driver and relies on `put_if_absent` as the
//! compare-and-swap. Failing to get a lock inside the wait window is not an error;
//! `acquire` simply returns `None`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BackendSpec;
use crate::driver::{Driver, DriverFactory};
use crate::error::{AppError, AppResult};

/// URI of the manager every service starts with. Structural creation locks live here.
pub const KERNEL_MANAGER_URI: &str = "lock://kernel";
pub const CREATION_LOCK_NAME: &str = "index/ensureCreated";
pub const CREATION_WAIT_SECS: u64 = 5;
pub const CREATION_HOLD_SECS: u64 = 3600 * 24;

fn now_ms() -> i64 { chrono::Utc::now().timestamp_millis() }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHandle {
    pub lock_name: String,
    /// Unique per acquisition; release only succeeds for the matching holder.
    pub holder: String,
    pub acquired_at: i64,
    pub expires_at: i64,
}

impl LockHandle {
    fn fresh(name: &str, hold_secs: u64) -> Self {
        let now = now_ms();
        Self {
            lock_name: name.to_string(),
            holder: uuid::Uuid::new_v4().to_string(),
            acquired_at: now,
            expires_at: now.saturating_add((hold_secs as i64).saturating_mul(1000)),
        }
    }

    pub fn is_expired(&self) -> bool { now_ms() >= self.expires_at }
}

pub trait LockManager: Send + Sync {
    /// Wait up to `wait_secs` for `name`; on success the lock is held for at most `hold_secs`.
    fn acquire(&self, name: &str, wait_secs: u64, hold_secs: u64) -> AppResult<Option<LockHandle>>;

    /// Returns false when the handle no longer owns the lock (released, expired and re-taken).
    fn release(&self, name: &str, handle: &LockHandle) -> AppResult<bool>;
}

/// In-process locks.
#[derive(Default)]
pub struct MemoryLockManager {
    held: Mutex<HashMap<String, LockHandle>>,
    freed: Condvar,
}

impl MemoryLockManager {
    pub fn new() -> Self { Self::default() }
}

impl LockManager for MemoryLockManager {
    fn acquire(&self, name: &str, wait_secs: u64, hold_secs: u64) -> AppResult<Option<LockHandle>> {
        let deadline = Instant::now() + Duration::from_secs(wait_secs);
        let mut held = self.held.lock();
        loop {
            let remaining = held
                .get(name)
                .filter(|current| !current.is_expired())
                .map(|current| Duration::from_millis((current.expires_at - now_ms()).max(1) as u64));
            let Some(wake) = remaining else {
                let handle = LockHandle::fresh(name, hold_secs);
                held.insert(name.to_string(), handle.clone());
                return Ok(Some(handle));
            };
            let now = Instant::now();
            if now >= deadline { return Ok(None); }
            // wake on release, on expiry of the current holder, or at the deadline
            let _ = self.freed.wait_for(&mut held, wake.min(deadline - now));
        }
    }

    fn release(&self, name: &str, handle: &LockHandle) -> AppResult<bool> {
        let mut held = self.held.lock();
        match held.get(name) {
            Some(current) if current.holder == handle.holder => {
                held.remove(name);
                self.freed.notify_all();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Locks stored as documents on a driver (`locks/<name>`).
pub struct DocumentLockManager {
    driver: Arc<dyn Driver>,
    poll: Duration,
}

impl DocumentLockManager {
    pub fn new(driver: Arc<dyn Driver>, poll_ms: u64) -> Self {
        Self { driver, poll: Duration::from_millis(poll_ms.max(1)) }
    }

    fn key(name: &str) -> String { format!("locks/{}", name) }

    /// Remove the lock document if it still holds `seen`. A newer holder's document is left alone.
    fn reclaim(&self, key: &str, seen: &str) -> AppResult<bool> {
        self.driver.delete_if_equals(key, seen)
    }
}

impl LockManager for DocumentLockManager {
    fn acquire(&self, name: &str, wait_secs: u64, hold_secs: u64) -> AppResult<Option<LockHandle>> {
        let key = Self::key(name);
        let deadline = Instant::now() + Duration::from_secs(wait_secs);
        loop {
            let handle = LockHandle::fresh(name, hold_secs);
            if self.driver.put_if_absent(&key, &serde_json::to_string(&handle)?)? {
                return Ok(Some(handle));
            }
            if let Some(raw) = self.driver.get(&key)? {
                match serde_json::from_str::<LockHandle>(&raw) {
                    Ok(current) if current.is_expired() => {
                        debug!(target: "docrepo::lock", "reclaiming expired lock '{}' held by {}", name, current.holder);
                        self.reclaim(&key, &raw)?;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(target: "docrepo::lock", "discarding unreadable lock document '{}': {}", key, e);
                        self.reclaim(&key, &raw)?;
                        continue;
                    }
                }
            }
            let now = Instant::now();
            if now >= deadline { return Ok(None); }
            std::thread::sleep(self.poll.min(deadline - now));
        }
    }

    fn release(&self, name: &str, handle: &LockHandle) -> AppResult<bool> {
        let key = Self::key(name);
        let Some(raw) = self.driver.get(&key)? else { return Ok(false) };
        match serde_json::from_str::<LockHandle>(&raw) {
            Ok(current) if current.holder == handle.holder => self.reclaim(&key, &raw),
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockKind {
    Memory,
    Document { backend: BackendSpec },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockManagerConfig {
    pub uri: String,
    pub kind: LockKind,
}

struct Registered {
    config: LockManagerConfig,
    manager: Arc<dyn LockManager>,
}

/// Lock managers keyed by resource URI.
pub struct LockService {
    factory: DriverFactory,
    managers: RwLock<HashMap<String, Registered>>,
}

impl LockService {
    /// Service whose kernel manager keeps its locks in this process.
    pub fn new(factory: DriverFactory) -> Self {
        let svc = Self { factory, managers: RwLock::new(HashMap::new()) };
        svc.register(KERNEL_MANAGER_URI, LockKind::Memory, Arc::new(MemoryLockManager::new()));
        svc
    }

    /// Service whose kernel manager is built from `kernel`. A `Document` kernel shared by several
    /// processes serializes their structural creation.
    pub fn with_kernel(factory: DriverFactory, kernel: LockKind) -> AppResult<Self> {
        let svc = Self { factory, managers: RwLock::new(HashMap::new()) };
        let manager = svc.build_manager(&kernel)?;
        svc.register(KERNEL_MANAGER_URI, kernel, manager);
        Ok(svc)
    }

    /// Kernel from `StorageSettings::kernel_lock`: a document manager on that backend when set.
    pub fn from_settings(factory: DriverFactory) -> AppResult<Self> {
        match factory.settings().kernel_lock.clone() {
            Some(backend) => Self::with_kernel(factory, LockKind::Document { backend }),
            None => Ok(Self::new(factory)),
        }
    }

    fn build_manager(&self, kind: &LockKind) -> AppResult<Arc<dyn LockManager>> {
        Ok(match kind {
            LockKind::Memory => Arc::new(MemoryLockManager::new()),
            LockKind::Document { backend } => Arc::new(DocumentLockManager::new(
                self.factory.open(backend)?,
                self.factory.settings().lock_poll_ms,
            )),
        })
    }

    fn register(&self, uri: &str, kind: LockKind, manager: Arc<dyn LockManager>) -> LockManagerConfig {
        let mut managers = self.managers.write();
        let entry = managers.entry(uri.to_string()).or_insert_with(|| {
            debug!(target: "docrepo::lock", "created lock manager '{}' ({:?})", uri, kind);
            Registered { config: LockManagerConfig { uri: uri.to_string(), kind }, manager }
        });
        entry.config.clone()
    }

    /// Registers a manager. An existing URI is left untouched and its config returned.
    pub fn create_lock_manager(&self, uri: &str, kind: LockKind) -> AppResult<LockManagerConfig> {
        if let Some(r) = self.managers.read().get(uri) {
            return Ok(r.config.clone());
        }
        let manager = self.build_manager(&kind)?;
        Ok(self.register(uri, kind, manager))
    }

    pub fn get_lock_manager_config(&self, uri: &str) -> Option<LockManagerConfig> {
        self.managers.read().get(uri).map(|r| r.config.clone())
    }

    pub fn lock_manager_exists(&self, uri: &str) -> bool { self.managers.read().contains_key(uri) }

    pub fn delete_lock_manager(&self, uri: &str) -> bool { self.managers.write().remove(uri).is_some() }

    fn manager(&self, uri: &str) -> AppResult<Arc<dyn LockManager>> {
        self.managers.read().get(uri).map(|r| r.manager.clone()).ok_or_else(|| {
            AppError::not_found("lock_manager_not_found".to_string(), format!("No lock manager at {}", uri))
        })
    }

    pub fn acquire_lock(&self, uri: &str, name: &str, wait_secs: u64, hold_secs: u64) -> AppResult<Option<LockHandle>> {
        let handle = self.manager(uri)?.acquire(name, wait_secs, hold_secs)?;
        if handle.is_none() {
            debug!(target: "docrepo::lock", "lock '{}' on {} not acquired within {}s", name, uri, wait_secs);
        }
        Ok(handle)
    }

    pub fn release_lock(&self, uri: &str, name: &str, handle: &LockHandle) -> AppResult<bool> {
        self.manager(uri)?.release(name, handle)
    }

    /// Run `f` while holding the structural creation lock. `Ok(None)` when the lock was not obtained.
    pub fn with_creation_lock<T>(&self, f: impl FnOnce() -> AppResult<T>) -> AppResult<Option<T>> {
        let Some(handle) = self.acquire_lock(KERNEL_MANAGER_URI, CREATION_LOCK_NAME, CREATION_WAIT_SECS, CREATION_HOLD_SECS)? else {
            warn!(target: "docrepo::lock", "could not take the creation lock");
            return Ok(None);
        };
        let out = f();
        if !self.release_lock(KERNEL_MANAGER_URI, CREATION_LOCK_NAME, &handle)? {
            warn!(target: "docrepo::lock", "creation lock was lost before release");
        }
        out.map(Some)
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod lock_tests;
