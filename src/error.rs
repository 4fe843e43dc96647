//! Centralized error types for the content lifecycle pipeline.
//!
//! Replaces ad-hoc `anyhow::Error` usage at the core with a typed taxonomy; `anyhow`
//! stays in use at the edges (provider glue, CLI commands) and converts in via `From`.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum KbError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("invalid path: {path} - {message}")]
    InvalidPath { path: String, message: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("provider {provider} requires re-authorization")]
    ProviderAuthRequired { provider: String },

    #[error("provider {provider} transient failure: {message}")]
    ProviderTransient {
        provider: String,
        message: String,
        source: Option<anyhow::Error>,
    },

    #[error("provider {provider} fatal failure: {message}")]
    ProviderFatal {
        provider: String,
        message: String,
        source: Option<anyhow::Error>,
    },

    #[error("extraction failed: {path} - {message}")]
    ExtractFailed {
        path: String,
        message: String,
        source: Option<anyhow::Error>,
    },

    #[error("embedding failed: {message}")]
    EmbedFailed {
        message: String,
        source: Option<anyhow::Error>,
    },

    #[error("store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        source: Option<anyhow::Error>,
    },

    #[error("cancelled")]
    Cancelled,
}

impl KbError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied { path: path.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn provider_auth_required(provider: impl Into<String>) -> Self {
        Self::ProviderAuthRequired {
            provider: provider.into(),
        }
    }

    pub fn provider_transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderTransient {
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn provider_fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderFatal {
            provider: provider.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn extract_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtractFailed {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn embed_failed(message: impl Into<String>) -> Self {
        Self::EmbedFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Whether the HTTP surface should treat this as a caller error vs. transient server state.
    ///
    /// Mirrors the kind→status mapping in the spec: NotFound→404, InvalidPath/Conflict→400,
    /// PermissionDenied→403, StoreUnavailable→503, anything else→500.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::InvalidPath { .. } | Self::Conflict { .. } => 400,
            Self::PermissionDenied { .. } => 403,
            Self::StoreUnavailable { .. } => 503,
            _ => 500,
        }
    }

    /// `Cancelled` is never an error from the caller's perspective — it's a no-op.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, KbError>;

impl From<std::io::Error> for KbError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                path: String::new(),
            },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: String::new(),
            },
            _ => Self::StoreUnavailable {
                message: err.to_string(),
                source: None,
            },
        }
    }
}

impl From<anyhow::Error> for KbError {
    fn from(err: anyhow::Error) -> Self {
        Self::StoreUnavailable {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for KbError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StoreUnavailable {
            message: err.to_string(),
            source: Some(anyhow::Error::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = KbError::not_found("docs/hello.txt");
        assert!(err.to_string().contains("not found"));

        let err = KbError::conflict("sync source already bound");
        assert!(err.to_string().contains("conflict"));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(KbError::not_found("x").http_status(), 404);
        assert_eq!(KbError::invalid_path("x", "bad").http_status(), 400);
        assert_eq!(KbError::conflict("x").http_status(), 400);
        assert_eq!(KbError::permission_denied("x").http_status(), 403);
        assert_eq!(KbError::store_unavailable("x").http_status(), 503);
        assert_eq!(KbError::embed_failed("x").http_status(), 500);
    }

    #[test]
    fn test_cancelled_is_not_an_error_to_callers() {
        assert!(KbError::Cancelled.is_cancelled());
        assert!(!KbError::not_found("x").is_cancelled());
    }
}
