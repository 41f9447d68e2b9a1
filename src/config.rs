//! Backend and repository configuration.
//!
//! A repository is described by a `RepoConfig`: whether it keeps history, which
//! backend holds its content, an optional separate backend for version snapshots
//! and an optional index definition. Backends are a tagged `BackendKind` plus a
//! flat options map, resolved to a driver once when the repository is opened.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendKind {
    Memory,
    File,
    Cassandra,
    Mongodb,
    GcpDatastore,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "MEMORY",
            BackendKind::File => "FILE",
            BackendKind::Cassandra => "CASSANDRA",
            BackendKind::Mongodb => "MONGODB",
            BackendKind::GcpDatastore => "GCP_DATASTORE",
        }
    }

    /// Kinds this build can actually open a driver for.
    pub fn is_available(&self) -> bool { matches!(self, BackendKind::Memory | BackendKind::File) }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for BackendKind {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MEMORY" => Ok(BackendKind::Memory),
            "FILE" => Ok(BackendKind::File),
            "CASSANDRA" => Ok(BackendKind::Cassandra),
            "MONGODB" => Ok(BackendKind::Mongodb),
            "GCP_DATASTORE" => Ok(BackendKind::GcpDatastore),
            other => Err(AppError::user("unknown_backend".to_string(), format!("Unknown backend kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RepoKind {
    /// Unversioned: only the latest content is kept.
    Rep,
    /// Versioned: every write keeps an immutable `path@N` snapshot.
    Nrep,
}

impl RepoKind {
    pub fn is_versioned(&self) -> bool { matches!(self, RepoKind::Nrep) }
}

impl FromStr for RepoKind {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REP" => Ok(RepoKind::Rep),
            "NREP" => Ok(RepoKind::Nrep),
            other => Err(AppError::user("unknown_repo_kind".to_string(), format!("Unknown repository kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    pub kind: BackendKind,
    /// Instance name; drivers use it as the namespace of their key store.
    pub instance: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl BackendSpec {
    pub fn new(kind: BackendKind, instance: impl Into<String>) -> Self {
        Self { kind, instance: instance.into(), options: BTreeMap::new() }
    }

    pub fn memory(instance: impl Into<String>) -> Self { Self::new(BackendKind::Memory, instance) }
    pub fn file(instance: impl Into<String>) -> Self { Self::new(BackendKind::File, instance) }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> { self.options.get(key).map(|s| s.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub kind: RepoKind,
    pub content: BackendSpec,
    /// When set, version snapshots live in this backend instead of a related store of `content`.
    #[serde(default)]
    pub versions: Option<BackendSpec>,
    /// Index definition text, e.g. `name($1) as string, size(stats.size) as integer`.
    #[serde(default)]
    pub index: Option<String>,
}

impl RepoConfig {
    pub fn unversioned(content: BackendSpec) -> Self { Self { kind: RepoKind::Rep, content, versions: None, index: None } }
    pub fn versioned(content: BackendSpec) -> Self { Self { kind: RepoKind::Nrep, content, versions: None, index: None } }

    pub fn with_separate_versions(mut self, versions: BackendSpec) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn with_index(mut self, definition: impl Into<String>) -> Self {
        self.index = Some(definition.into());
        self
    }
}

/// Process-wide storage settings. Loaded from `docrepo.json` when present, then overridden from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root folder for FILE backends and memory snapshots.
    #[serde(default = "StorageSettings::default_root")]
    pub root: PathBuf,
    #[serde(default = "StorageSettings::default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Expire cache entries this long after they were written; `None` keeps them until evicted.
    #[serde(default)]
    pub cache_ttl_ms: Option<u64>,
    #[serde(default = "StorageSettings::default_lock_poll_ms")]
    pub lock_poll_ms: u64,
    /// Backend for the kernel lock manager. Processes that share it are serialized on
    /// structural creation; `None` keeps the kernel locks in-process.
    #[serde(default)]
    pub kernel_lock: Option<BackendSpec>,
}

impl StorageSettings {
    pub const FILE_NAME: &'static str = "docrepo.json";

    fn default_root() -> PathBuf { PathBuf::from("docrepo_data") }
    fn default_cache_max_entries() -> usize { 10_000 }
    fn default_lock_poll_ms() -> u64 { 50 }

    /// Read settings from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice::<StorageSettings>(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// `docrepo.json` in the working directory plus environment overrides.
    pub fn from_env() -> AppResult<Self> {
        let mut s = Self::load(Path::new(Self::FILE_NAME))?;
        s.apply_env_overrides(|k| std::env::var(k).ok());
        Ok(s)
    }

    /// Apply `DOCREPO_*` overrides through a lookup function so callers (and tests) control the source.
    pub fn apply_env_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(root) = lookup("DOCREPO_ROOT") {
            if !root.trim().is_empty() { self.root = PathBuf::from(root); }
        }
        if let Some(n) = lookup("DOCREPO_CACHE_MAX_ENTRIES").and_then(|v| v.trim().parse::<usize>().ok()) {
            self.cache_max_entries = n;
        }
        if let Some(v) = lookup("DOCREPO_CACHE_TTL_MS") {
            // 0 or an empty value turns expiry off
            self.cache_ttl_ms = v.trim().parse::<u64>().ok().filter(|ms| *ms > 0);
        }
        if let Some(ms) = lookup("DOCREPO_LOCK_POLL_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
            self.lock_poll_ms = ms.max(1);
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            cache_max_entries: Self::default_cache_max_entries(),
            cache_ttl_ms: None,
            lock_poll_ms: Self::default_lock_poll_ms(),
            kernel_lock: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn backend_kind_parsing() {
        assert_eq!("memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("GCP_DATASTORE".parse::<BackendKind>().unwrap(), BackendKind::GcpDatastore);
        assert!("redis".parse::<BackendKind>().is_err());
        assert!(BackendKind::File.is_available());
        assert!(!BackendKind::Cassandra.is_available());
    }

    #[test]
    fn repo_config_json_shape() {
        let cfg = RepoConfig::versioned(BackendSpec::memory("docs").with_option("snapshot", "docs.bin"))
            .with_index("name($1) as string");
        let s = serde_json::to_string(&cfg).unwrap();
        assert!(s.contains("\"NREP\""));
        assert!(s.contains("\"MEMORY\""));
        let back: RepoConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back, cfg);
        assert_eq!(back.content.option("snapshot"), Some("docs.bin"));
    }

    #[test]
    fn settings_defaults_and_env_overrides() {
        let mut s: StorageSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.cache_max_entries, 10_000);
        assert_eq!(s.lock_poll_ms, 50);
        let env: HashMap<&str, &str> = [
            ("DOCREPO_ROOT", "/tmp/dr"),
            ("DOCREPO_CACHE_MAX_ENTRIES", "12"),
            ("DOCREPO_CACHE_TTL_MS", "0"),
            ("DOCREPO_LOCK_POLL_MS", "5"),
        ].into_iter().collect();
        s.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.root, PathBuf::from("/tmp/dr"));
        assert_eq!(s.cache_max_entries, 12);
        assert_eq!(s.cache_ttl_ms, None);
        assert_eq!(s.lock_poll_ms, 5);
    }

    #[test]
    fn settings_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let s = StorageSettings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.cache_ttl_ms, None);
        assert_eq!(s.kernel_lock, None);
        std::fs::write(
            dir.path().join("docrepo.json"),
            br#"{"cache_ttl_ms": 250, "kernel_lock": {"kind": "FILE", "instance": "_catalog"}}"#,
        ).unwrap();
        let s = StorageSettings::load(&dir.path().join("docrepo.json")).unwrap();
        assert_eq!(s.cache_ttl_ms, Some(250));
        assert_eq!(s.kernel_lock, Some(BackendSpec::file("_catalog")));
    }
}
