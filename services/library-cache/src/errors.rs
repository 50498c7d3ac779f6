//!
//! src/errors.rs  Oct 2nd, 2026 
//!
//! Defines enums and methods of error conversion 
//! for errors the fetcher, cache and resolver use 
//!
//!

use std::{path::PathBuf, time::Duration};

use thiserror::Error; 

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("config error: {0}")]
    Config(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("no album cache at {}", .0.display())]
    CacheMissing(PathBuf),
    #[error("album cache at {} is corrupt: {reason}", path.display())]
    CacheCorrupt { path: PathBuf, reason: String },
    #[error("no matching albums")]
    EmptySelection,
    #[error("invalid year filter: {0}")]
    InvalidYearFilter(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl LibraryError {
    /// Rate limits and transport failures are worth another attempt 
    pub fn is_retryable(&self) -> bool {
        matches!(self, LibraryError::RateLimited { .. } | LibraryError::Transport(_))
    }

    /// Errors that must stop a whole batch rather than a single item 
    pub fn is_fatal(&self) -> bool {
        matches!(self, LibraryError::Auth(_) | LibraryError::Cancelled)
    }
}

impl From<reqwest::Error> for LibraryError {
    fn from(e: reqwest::Error) -> Self { 
        if e.is_decode() {
            LibraryError::Parse(e.to_string())
        } else {
            LibraryError::Transport(e.to_string()) 
        }
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(e: serde_json::Error) -> Self { LibraryError::Parse(e.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(LibraryError::RateLimited { retry_after: None }.is_retryable());
        assert!(LibraryError::Transport("reset".into()).is_retryable());
        assert!(!LibraryError::Auth("revoked".into()).is_retryable());
        assert!(!LibraryError::Http { status: 400, message: "bad".into() }.is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(LibraryError::Auth("revoked".into()).is_fatal());
        assert!(LibraryError::Cancelled.is_fatal());
        assert!(!LibraryError::NotFound("spotify:track:x".into()).is_fatal());
    }
}
