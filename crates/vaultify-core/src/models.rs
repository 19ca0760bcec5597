//! Domain types shared by every core component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered principal. Immutable once created — profile editing is
/// out of scope for this crate.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// One generation of HMAC signing key material. At most one row is
/// active at any committed transaction boundary.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HmacKey {
    pub id: Uuid,
    pub key_bytes: Vec<u8>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// The identity and lifetime record for a secret path. Holds no payload —
/// the ciphertext lives on [`SecretVersion`] rows.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Secret {
    pub id: Uuid,
    pub path: String,
    pub owner_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One immutable, encrypted, signed payload for a [`Secret`]. Rows are
/// never mutated after insertion; a rollback inserts a new version.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SecretVersion {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub version: i32,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub signature: Vec<u8>,
    pub hmac_key_id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A [`SecretVersion`] joined with its parent [`Secret`]'s path and owner —
/// the shape every read path actually needs, so the store returns this
/// directly instead of making callers join client-side.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SecretVersionRow {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub path: String,
    pub owner_id: Uuid,
    pub version: i32,
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub signature: Vec<u8>,
    pub hmac_key_id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A grant to act on a path, either `read` or `write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    /// Whether this permission satisfies a request for `mode`.
    #[must_use]
    pub fn satisfies(self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Read => true,
            AccessMode::Write => self == Self::Write,
        }
    }
}

/// The access an [`crate::access::AccessMediator`] was asked to authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// An owner-granted, time-bounded delegation from `owner_email` to
/// `target_email` on `path`. Rules reference paths, not secret ids — they
/// survive secret recreation only if the path is reused.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SharingRule {
    pub id: Uuid,
    pub owner_email: String,
    pub target_email: String,
    pub path: String,
    pub permission: Permission,
    pub shared_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SharingRule {
    /// A rule with `shared_until <= now` grants nothing, even before the
    /// reaper has physically removed the row.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.shared_until.is_none_or(|until| until > now)
    }
}

/// An append-only record of a mutation or access attempt.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_email: String,
    pub action: String,
    pub resource_path: String,
    pub resource_version: Option<i32>,
    pub success: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Action vocabulary recorded in [`AuditLogEntry::action`]. The schema
/// keeps this free-form text; these are just the values this crate emits.
pub mod action {
    pub const CREATE_SECRET: &str = "create_secret";
    pub const READ_SECRET: &str = "read_secret";
    pub const UPDATE_SECRET: &str = "update_secret";
    pub const ROLLBACK_SECRET: &str = "rollback_secret";
    pub const SHARE_SECRET: &str = "share_secret";
}
