//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A lock on a gateway or phone is held by another check.
    #[error("Resource busy: {kind} {id}")]
    ResourceBusy { kind: String, id: String },

    /// Nothing eligible to work with: no clean number, no gateway, no API service.
    #[error("No candidates available: {0}")]
    NoCandidatesAvailable(String),

    /// Every probe of a fan-out failed.
    #[error("All {attempted} checks failed: {message}")]
    TotalFailure { attempted: usize, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn busy(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ResourceBusy {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn no_candidates(msg: impl Into<String>) -> Self {
        Self::NoCandidatesAvailable(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_no_candidates(&self) -> bool {
        matches!(self, Self::NoCandidatesAvailable(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::ResourceBusy { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(Error::not_found("Phone", "1").is_not_found());
        assert!(Error::no_candidates("no clean numbers").is_no_candidates());
        assert!(Error::busy("gateway", "g1").is_busy());
        assert!(!Error::validation("bad").is_no_candidates());
    }

    #[test]
    fn test_error_display() {
        let err = Error::TotalFailure {
            attempted: 3,
            message: "gateway offline".to_string(),
        };
        assert_eq!(err.to_string(), "All 3 checks failed: gateway offline");
        assert_eq!(
            Error::busy("gateway", "g1").to_string(),
            "Resource busy: gateway g1"
        );
    }
}
