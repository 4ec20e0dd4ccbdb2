//! Shared-secret check for the legacy HTTP API
//!
//! The secret lives in a plain text file that is read once at startup.
//! A missing or empty file leaves the API locked: every request is refused
//! with a server error rather than being let through.

use axum::http::StatusCode;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("No API token configured on the server")]
    Unconfigured,
    #[error("Token mismatch")]
    Mismatch,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Unconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::Mismatch => StatusCode::FORBIDDEN,
        }
    }
}

/// Expected API token
#[derive(Debug, Clone, Default)]
pub struct TokenGuard {
    token: Option<String>,
}

impl TokenGuard {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Load the token file, trimming surrounding whitespace
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let guard = Self::new(Some(content.trim().to_string()));
                if guard.is_configured() {
                    info!(path = %path.display(), "Loaded API token");
                } else {
                    warn!(
                        path = %path.display(),
                        "API token file is empty, HTTP commands are refused"
                    );
                }
                guard
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "No API token, HTTP commands are refused"
                );
                Self::default()
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    pub fn check(&self, presented: &str) -> Result<(), AuthError> {
        match &self.token {
            None => Err(AuthError::Unconfigured),
            Some(expected) if expected == presented => Ok(()),
            Some(_) => Err(AuthError::Mismatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validation() {
        let guard = TokenGuard::new(Some("abc123".to_string()));
        assert_eq!(guard.check("abc123"), Ok(()));
        assert_eq!(guard.check("invalid"), Err(AuthError::Mismatch));
        assert_eq!(guard.check(""), Err(AuthError::Mismatch));
        assert_eq!(AuthError::Mismatch.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_unconfigured_token() {
        let guard = TokenGuard::new(Some(String::new()));
        assert!(!guard.is_configured());
        assert_eq!(guard.check(""), Err(AuthError::Unconfigured));
        assert_eq!(AuthError::Unconfigured.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_load_trims_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my_token.tok");
        std::fs::write(&path, "  s3cret\n").unwrap();

        let guard = TokenGuard::load(&path);
        assert_eq!(guard.check("s3cret"), Ok(()));

        let missing = TokenGuard::load(dir.path().join("nope.tok"));
        assert_eq!(missing.check("s3cret"), Err(AuthError::Unconfigured));
    }
}
