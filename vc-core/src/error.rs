//! Error taxonomy shared by every VideoCatalog component.
//!
//! [`CatalogError`] is the in-process error type produced by the database
//! and query layers; it carries no HTTP knowledge. The HTTP boundary (in
//! `vc-server`) converts it to the `{error, details?}` envelope from the
//! service spec.

use thiserror::Error;

/// Coarse error kind, independent of transport. Mirrors spec §7's
/// taxonomy (ValidationError, Unauthorized, Forbidden, NotFound,
/// Conflict/GatedUnavailable, InternalError).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    Validation(String),

    #[error("unknown drive label")]
    UnknownDrive,

    #[error("shard database missing for drive")]
    ShardMissing,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error")]
    Db(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Validation(_) => ErrorKind::Validation,
            CatalogError::UnknownDrive | CatalogError::ShardMissing | CatalogError::NotFound(_) => {
                ErrorKind::NotFound
            }
            CatalogError::Conflict(_) => ErrorKind::Conflict,
            CatalogError::Db(_) | CatalogError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// User-facing message with any filesystem paths redacted, per spec §4.2.
    pub fn redacted_message(&self) -> String {
        match self {
            CatalogError::Db(_) => "database operation failed".to_string(),
            other => other.to_string(),
        }
    }
}
