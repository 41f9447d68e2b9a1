//! Document URIs and logical path helpers.
//!
//! A URI is `scheme://authority/path/to/doc[@N]` or the short form
//! `//authority/path/to/doc[@N]`. The authority names the repository, the
//! path is a list of `/`-separated segments (NFC-normalised), and the optional
//! `@N` selects a stored version.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::{AppError, AppResult};

pub const DEFAULT_SCHEME: &str = "document";

/// Normalize a UTF-8 string to NFC.
pub fn normalize_nfc(input: &str) -> String {
    input.nfc().collect::<String>()
}

fn path_error(msg: impl Into<String>) -> AppError {
    AppError::user("invalid_path".to_string(), msg.into())
}

/// Validate a document path:
/// - segments separated by '/', none of them empty
/// - no NUL characters
/// - no '.' or '..' segments
///
/// The empty path is the repository root and is valid.
pub fn validate_doc_path(path: &str) -> AppResult<()> {
    if path.is_empty() { return Ok(()); }
    if path.chars().any(|c| c == '\u{0000}') {
        return Err(path_error("document path cannot contain NUL characters"));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(path_error(format!("leading or trailing '/' is not allowed in document path '{}'", path)));
    }
    for seg in path.split('/') {
        if seg.is_empty() {
            return Err(path_error(format!("empty segment in document path '{}'", path)));
        }
        if seg == "." || seg == ".." {
            return Err(path_error("segments '.' and '..' are not allowed"));
        }
    }
    Ok(())
}

/// Split a document path into NFC-normalized segments. Validation is performed first.
pub fn split_segments(path: &str) -> AppResult<Vec<String>> {
    validate_doc_path(path)?;
    if path.is_empty() { return Ok(Vec::new()); }
    Ok(normalize_nfc(path).split('/').map(|s| s.to_string()).collect())
}

/// True when `key` lies strictly below `prefix` on a segment boundary.
/// `is_under("folder10/x", "folder1")` is false; every non-empty key is under `""`.
pub fn is_under(key: &str, prefix: &str) -> bool {
    relative_to(key, prefix).is_some()
}

/// The part of `key` below `prefix`, without the separating '/'. A trailing '/' on `prefix` is ignored.
pub fn relative_to<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return if key.is_empty() { None } else { Some(key) };
    }
    let rest = key.strip_prefix(prefix)?;
    let rest = rest.strip_prefix('/')?;
    if rest.is_empty() { None } else { Some(rest) }
}

/// Parent folder of a path; the root for single-segment paths.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Join a folder and a child name.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() { name.to_string() } else { format!("{}/{}", prefix, name) }
}

/// Split `path@N` into `(path, Some(N))`. A trailing `@` suffix that is not a number is part of the path.
pub fn split_version(path: &str) -> (&str, Option<u64>) {
    if let Some(i) = path.rfind('@') {
        if let Ok(v) = path[i + 1..].parse::<u64>() {
            return (&path[..i], Some(v));
        }
    }
    (path, None)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocUri {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub version: Option<u64>,
}

impl DocUri {
    pub fn new(authority: impl Into<String>, path: impl AsRef<str>) -> AppResult<Self> {
        let path = normalize_nfc(path.as_ref().trim_matches('/'));
        validate_doc_path(&path)?;
        let (base, version) = split_version(&path);
        Ok(Self { scheme: DEFAULT_SCHEME.to_string(), authority: authority.into(), path: base.to_string(), version })
    }

    pub fn parse(text: &str) -> AppResult<Self> {
        let text = text.trim();
        let (scheme, rest) = match text.find("://") {
            Some(i) => (&text[..i], &text[i + 3..]),
            None => match text.strip_prefix("//") {
                Some(rest) => (DEFAULT_SCHEME, rest),
                None => return Err(path_error(format!("'{}' is not a document URI", text))),
            },
        };
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_') {
            return Err(path_error(format!("invalid scheme in '{}'", text)));
        }
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(path_error(format!("missing authority in '{}'", text)));
        }
        let mut uri = DocUri::new(authority, path)?;
        uri.scheme = scheme.to_ascii_lowercase();
        Ok(uri)
    }

    pub fn with_version(&self, version: Option<u64>) -> Self {
        Self { version, ..self.clone() }
    }

    /// Same document, any version.
    pub fn latest(&self) -> Self { self.with_version(None) }

    /// Path including the `@N` suffix when a version is selected; this is what the repository is asked for.
    pub fn doc_path(&self) -> String {
        match self.version {
            Some(v) => format!("{}@{}", self.path, v),
            None => self.path.clone(),
        }
    }

    pub fn segments(&self) -> Vec<&str> {
        if self.path.is_empty() { Vec::new() } else { self.path.split('/').collect() }
    }

    pub fn is_root(&self) -> bool { self.path.is_empty() }
}

impl fmt::Display for DocUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)?;
        if !self.path.is_empty() { write!(f, "/{}", self.path)?; }
        if let Some(v) = self.version { write!(f, "@{}", v)?; }
        Ok(())
    }
}

impl FromStr for DocUri {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { DocUri::parse(s) }
}

#[cfg(test)]
#[path = "uri_tests.rs"]
mod uri_tests;
