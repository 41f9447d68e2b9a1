//! Unified error model for every docrepo layer.
//! Drivers, the folder layer, the repository, the query engine and object storage
//! all report failures through `AppError` so callers can branch on the variant
//! (or the stable `code`) without caring which backend produced it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },
    #[error("{code}: {message}")]
    Conflict { code: String, message: String },
    #[error("{code}: {message}")]
    InvalidQuery { code: String, message: String },
    #[error("{code}: {message}")]
    BackendUnavailable { code: String, message: String },
    #[error("{code}: {message}")]
    Serialization { code: String, message: String },
    #[error("{code}: {message}")]
    NotSupported { code: String, message: String },
    #[error("{code}: {message}")]
    UserInput { code: String, message: String },
    #[error("{code}: {message}")]
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::InvalidQuery { code, .. }
            | AppError::BackendUnavailable { code, .. }
            | AppError::Serialization { code, .. }
            | AppError::NotSupported { code, .. }
            | AppError::UserInput { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::InvalidQuery { message, .. }
            | AppError::BackendUnavailable { message, .. }
            | AppError::Serialization { message, .. }
            | AppError::NotSupported { message, .. }
            | AppError::UserInput { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn invalid_query<S: Into<String>>(code: S, msg: S) -> Self { AppError::InvalidQuery { code: code.into(), message: msg.into() } }
    pub fn backend<S: Into<String>>(code: S, msg: S) -> Self { AppError::BackendUnavailable { code: code.into(), message: msg.into() } }
    pub fn serialization<S: Into<String>>(code: S, msg: S) -> Self { AppError::Serialization { code: code.into(), message: msg.into() } }
    pub fn not_supported<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotSupported { code: code.into(), message: msg.into() } }
    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Folder-level destructive operations report a missing prefix with this exact message.
    pub fn folder_missing(prefix: &str) -> Self {
        AppError::not_found("folder_not_found".to_string(), format!("Folder {} does not exist", prefix))
    }

    /// Content that could not be mapped onto `type_name`. The offending content is kept in the message.
    pub fn decode_failed(type_name: &str, content: &str, cause: impl std::fmt::Display) -> Self {
        AppError::serialization(
            "decode_error".to_string(),
            format!("Error making {} object from json {}: {}", type_name, content, cause),
        )
    }

    pub fn is_not_found(&self) -> bool { matches!(self, AppError::NotFound { .. }) }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::BackendUnavailable { code: "io_error".into(), message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization { code: "json_error".into(), message: err.to_string() }
    }
}

impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Serialization { code: "snapshot_error".into(), message: err.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: anything not classified elsewhere is internal
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
