//! Core domain error taxonomy.
//!
//! Every component (C1–C9) returns [`CoreError`]. The HTTP layer
//! (`vaultify-server::error::AppError`) maps each variant to a status
//! code; this crate stays free of HTTP types so it can be tested and
//! reused without pulling in Axum.

/// Domain-level error returned by core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Payload failed validation (missing field, bad email, bad version, …).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing/expired/malformed bearer, or HMAC verification failed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Principal lacks the read/write grant it needs.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Path, version, user, or HMAC key not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique violation — duplicate path, duplicate sharing rule.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Token bucket had no tokens left for this principal.
    #[error("rate limited")]
    RateLimited,

    /// AEAD tag mismatch, invalid key/nonce size — distinct from a
    /// generic internal error because it may signal corruption or
    /// tampering rather than an infrastructure fault.
    #[error("cryptographic failure: {0}")]
    CryptographicFailure(String),

    /// Cipher failure, database error, cache error. Never surfaced to
    /// the client beyond "internal error".
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("resource not found".to_owned()),
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some("23505") {
                    Self::Conflict("resource already exists".to_owned())
                } else {
                    Self::Internal(format!("database error: {db_err}"))
                }
            }
            _ => Self::Internal(format!("database error: {err}")),
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Internal(format!("cache error: {err}"))
    }
}
