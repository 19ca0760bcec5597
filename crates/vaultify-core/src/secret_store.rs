//! Secret store (C3): the two-level `Secret` / `SecretVersion` entity
//! model, with per-path monotonic version numbering and transactional
//! creation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog};
use crate::error::CoreError;
use crate::models::{SecretVersion, SecretVersionRow};

/// Owns the `secrets` / `secret_versions` tables.
pub struct SecretStore {
    pool: PgPool,
}

impl SecretStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a `Secret` row, its first `SecretVersion` (`version = 1`),
    /// and `audit` in one transaction. Fails with [`CoreError::Conflict`]
    /// if `path` already exists; the audit row never survives a failed
    /// attempt, since it shares the transaction with the effect.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_secret_with_version(
        &self,
        owner: Uuid,
        path: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        signature: &[u8],
        hmac_key_id: Uuid,
        expires_at: Option<DateTime<Utc>>,
        audit: AuditEvent<'_>,
    ) -> Result<SecretVersion, CoreError> {
        let mut tx = self.pool.begin().await?;

        let secret_id: Uuid = sqlx::query_scalar(
            "INSERT INTO secrets (path, owner_id, expires_at) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(path)
        .bind(owner)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        let version: SecretVersion = sqlx::query_as(
            "INSERT INTO secret_versions \
             (secret_id, version, ciphertext, nonce, signature, hmac_key_id, created_by) \
             VALUES ($1, 1, $2, $3, $4, $5, $6) \
             RETURNING id, secret_id, version, ciphertext, nonce, signature, hmac_key_id, created_by, created_at",
        )
        .bind(secret_id)
        .bind(ciphertext)
        .bind(nonce)
        .bind(signature)
        .bind(hmac_key_id)
        .bind(owner)
        .fetch_one(&mut *tx)
        .await?;

        AuditLog::log_in_tx(&mut tx, audit).await?;

        tx.commit().await?;
        Ok(version)
    }

    /// Inserts the next version for an existing path: `next = max + 1`
    /// computed under a row lock on the parent `Secret` so concurrent
    /// writers never produce a gap or a duplicate version number. Writes
    /// `audit` in the same transaction. Fails with [`CoreError::NotFound`]
    /// if `path` does not exist. Used for both plain updates and rollback —
    /// the caller picks the audit action (`update_secret` vs
    /// `rollback_secret`) and `created_by` (the caller for updates, the
    /// rolled-from version's creator for rollbacks).
    pub async fn create_new_version(
        &self,
        path: &str,
        ciphertext: &[u8],
        nonce: &[u8],
        signature: &[u8],
        hmac_key_id: Uuid,
        created_by: Uuid,
        audit: AuditEvent<'_>,
    ) -> Result<SecretVersion, CoreError> {
        let mut tx = self.pool.begin().await?;

        let secret_id: Uuid = sqlx::query_scalar("SELECT id FROM secrets WHERE path = $1 FOR UPDATE")
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("secret not found at path '{path}'")))?;

        let next_version: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM secret_versions WHERE secret_id = $1",
        )
        .bind(secret_id)
        .fetch_one(&mut *tx)
        .await?;

        let version: SecretVersion = sqlx::query_as(
            "INSERT INTO secret_versions \
             (secret_id, version, ciphertext, nonce, signature, hmac_key_id, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, secret_id, version, ciphertext, nonce, signature, hmac_key_id, created_by, created_at",
        )
        .bind(secret_id)
        .bind(next_version)
        .bind(ciphertext)
        .bind(nonce)
        .bind(signature)
        .bind(hmac_key_id)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        AuditLog::log_in_tx(&mut tx, audit).await?;

        tx.commit().await?;
        Ok(version)
    }

    /// Returns the version with the greatest version number for `path`,
    /// joined with the parent secret's owner.
    pub async fn get_latest(&self, path: &str) -> Result<SecretVersionRow, CoreError> {
        sqlx::query_as(
            "SELECT sv.id, sv.secret_id, s.path, s.owner_id, sv.version, sv.ciphertext, \
             sv.nonce, sv.signature, sv.hmac_key_id, sv.created_by, sv.created_at \
             FROM secret_versions sv \
             JOIN secrets s ON s.id = sv.secret_id \
             WHERE s.path = $1 \
             ORDER BY sv.version DESC LIMIT 1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("secret not found at path '{path}'")))
    }

    /// Returns the exact `(path, version)` match.
    pub async fn get_version(&self, path: &str, version: i32) -> Result<SecretVersionRow, CoreError> {
        sqlx::query_as(
            "SELECT sv.id, sv.secret_id, s.path, s.owner_id, sv.version, sv.ciphertext, \
             sv.nonce, sv.signature, sv.hmac_key_id, sv.created_by, sv.created_at \
             FROM secret_versions sv \
             JOIN secrets s ON s.id = sv.secret_id \
             WHERE s.path = $1 AND sv.version = $2",
        )
        .bind(path)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            CoreError::NotFound(format!("version {version} not found at path '{path}'"))
        })
    }

    /// Returns every version for `path`, newest first.
    pub async fn get_all_versions(&self, path: &str) -> Result<Vec<SecretVersionRow>, CoreError> {
        let rows = sqlx::query_as(
            "SELECT sv.id, sv.secret_id, s.path, s.owner_id, sv.version, sv.ciphertext, \
             sv.nonce, sv.signature, sv.hmac_key_id, sv.created_by, sv.created_at \
             FROM secret_versions sv \
             JOIN secrets s ON s.id = sv.secret_id \
             WHERE s.path = $1 \
             ORDER BY sv.version DESC",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Deletes `path` and cascades its versions.
    pub async fn delete_by_path(&self, path: &str) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM secrets WHERE path = $1")
            .bind(path)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "secret not found at path '{path}'"
            )));
        }
        Ok(())
    }

    /// Deletes every secret whose `expires_at` is in the past. Versions
    /// cascade with their parent.
    pub async fn delete_expired(&self) -> Result<u64, CoreError> {
        let result = sqlx::query("DELETE FROM secrets WHERE expires_at IS NOT NULL AND expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
