//! Sharing rules (C5): owner-granted, time-bounded read/write delegation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::audit::{AuditEvent, AuditLog};
use crate::error::CoreError;
use crate::models::{Permission, SharingRule};

/// Owns the `sharing_rules` table.
///
/// Ownership, self-share rejection, and target-user-existence checks are
/// the caller's responsibility (C4/the request pipeline) — this store
/// only enforces the `(path, target_email)` uniqueness invariant, which
/// surfaces as [`CoreError::Conflict`] on violation.
pub struct SharingRuleStore {
    pool: PgPool,
}

impl SharingRuleStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new rule granting `permission` on `path` from
    /// `owner_email` to `target_email`, optionally expiring at
    /// `shared_until`, and writes `audit` in the same transaction.
    pub async fn share(
        &self,
        owner_email: &str,
        target_email: &str,
        path: &str,
        permission: Permission,
        shared_until: Option<DateTime<Utc>>,
        audit: AuditEvent<'_>,
    ) -> Result<SharingRule, CoreError> {
        let mut tx = self.pool.begin().await?;

        let rule: SharingRule = sqlx::query_as(
            "INSERT INTO sharing_rules (owner_email, target_email, path, permission, shared_until) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, owner_email, target_email, path, permission, shared_until, created_at",
        )
        .bind(owner_email)
        .bind(target_email)
        .bind(path)
        .bind(permission)
        .bind(shared_until)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some("23505") => {
                CoreError::Conflict("the secret is already shared with the target user".to_owned())
            }
            other => other.into(),
        })?;

        AuditLog::log_in_tx(&mut tx, audit).await?;

        tx.commit().await?;
        Ok(rule)
    }

    /// True iff a non-expired rule exists for `(path, target_email)`.
    pub async fn check_shared(&self, path: &str, target_email: &str) -> Result<bool, CoreError> {
        let rule: Option<SharingRule> = self.find_live(path, target_email).await?;
        Ok(rule.is_some())
    }

    /// The permission a non-expired rule grants, or [`CoreError::NotFound`].
    pub async fn get_permission(
        &self,
        path: &str,
        target_email: &str,
    ) -> Result<Permission, CoreError> {
        self.find_live(path, target_email)
            .await?
            .map(|rule| rule.permission)
            .ok_or_else(|| CoreError::NotFound("no sharing rule found".to_owned()))
    }

    async fn find_live(
        &self,
        path: &str,
        target_email: &str,
    ) -> Result<Option<SharingRule>, CoreError> {
        let rule: Option<SharingRule> = sqlx::query_as(
            "SELECT id, owner_email, target_email, path, permission, shared_until, created_at \
             FROM sharing_rules \
             WHERE path = $1 AND target_email = $2 \
             AND (shared_until IS NULL OR shared_until > now())",
        )
        .bind(path)
        .bind(target_email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rule)
    }

    /// Removes rules whose `shared_until` is in the past.
    pub async fn delete_expired(&self) -> Result<u64, CoreError> {
        let result = sqlx::query(
            "DELETE FROM sharing_rules WHERE shared_until IS NOT NULL AND shared_until < now()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
