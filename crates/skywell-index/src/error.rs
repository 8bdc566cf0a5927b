//! Error types for the indexing pipeline and view layer.

use skywell_types::ParseError;

use crate::identity::IdentityError;

/// Errors produced while applying events or materializing views.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The event or request carried a malformed identifier or record.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The record payload did not match the expected schema.
    #[error("malformed record: {0}")]
    Record(#[from] serde_json::Error),

    /// The queried entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A request parameter is out of range or unparseable.
    #[error("invalid parameter: {0}")]
    Validation(String),

    /// A SQLite statement or transaction failed.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// No pooled connection was available.
    #[error("failed to get database connection: {0}")]
    Pool(#[from] r2d2::Error),

    /// Identity or profile resolution failed for the given DID.
    #[error("identity lookup failed for {did}: {source}")]
    Upstream {
        /// The DID being resolved.
        did: String,
        /// The resolver failure.
        source: IdentityError,
    },

    /// Every slug candidate for the digest is taken.
    #[error("no free slug for {0}")]
    SlugExhausted(String),

    /// A blocking database task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IndexError {
    /// Wraps a resolver failure with the DID it was resolving.
    pub fn upstream(did: &skywell_types::Did, source: IdentityError) -> Self {
        Self::Upstream {
            did: did.to_string(),
            source,
        }
    }
}
