//! Audit log (C6): an append-only record of every mutation or access
//! attempt.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::AuditLogEntry;

/// A single audit entry to be written, independent of whether the write
/// happens in or out of a transaction.
pub struct AuditEvent<'a> {
    pub user_id: Uuid,
    pub user_email: &'a str,
    pub action: &'a str,
    pub resource_path: &'a str,
    pub resource_version: Option<i32>,
    pub success: bool,
    pub reason: Option<&'a str>,
}

/// Writes [`AuditEvent`]s either standalone or bound to an existing
/// transaction.
///
/// Every mutating handler (create, update, rollback, share) must log
/// through [`Self::log_in_tx`] so the audit row and the effect it
/// describes commit or roll back together. Read paths and most failure
/// paths have no effect to bind to, so [`Self::log`] is sufficient there.
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Logs outside of any caller-managed transaction.
    pub async fn log(&self, event: AuditEvent<'_>) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO audit_logs \
             (user_id, user_email, action, resource_path, resource_version, success, reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.user_id)
        .bind(event.user_email)
        .bind(event.action)
        .bind(event.resource_path)
        .bind(event.resource_version)
        .bind(event.success)
        .bind(event.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Logs within `tx`. The caller commits or rolls back `tx` together
    /// with the mutation this entry describes.
    pub async fn log_in_tx(
        tx: &mut sqlx::PgConnection,
        event: AuditEvent<'_>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO audit_logs \
             (user_id, user_email, action, resource_path, resource_version, success, reason) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.user_id)
        .bind(event.user_email)
        .bind(event.action)
        .bind(event.resource_path)
        .bind(event.resource_version)
        .bind(event.success)
        .bind(event.reason)
        .execute(tx)
        .await?;
        Ok(())
    }

    /// Lists audit entries for `user_email`, most recent first, applying
    /// [`AuditFilter`]. Always scoped to the caller's own email — there is
    /// no cross-principal audit query.
    pub async fn list_for_user(
        &self,
        user_email: &str,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditLogEntry>, CoreError> {
        let rows = sqlx::query_as::<_, AuditLogEntry>(
            "SELECT id, user_id, user_email, action, resource_path, resource_version, \
             success, reason, created_at \
             FROM audit_logs \
             WHERE user_email = $1 \
             AND ($2::text IS NULL OR action = $2) \
             AND ($3::text IS NULL OR resource_path = $3) \
             AND ($4::boolean IS NULL OR success = $4) \
             AND created_at >= $5 \
             AND created_at <= $6 \
             ORDER BY created_at DESC \
             LIMIT $7 OFFSET $8",
        )
        .bind(user_email)
        .bind(&filter.action)
        .bind(&filter.resource_path)
        .bind(filter.success)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Query parameters for [`AuditLog::list_for_user`]. Supplements spec.md's
/// "filtered audit logs" with the exact filter set and defaults observed
/// in `original_source/internal/api/audit.go` (`limit=50`, `offset=0`,
/// open-ended time range when `from`/`to` are absent).
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub resource_path: Option<String>,
    pub success: Option<bool>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            action: None,
            resource_path: None,
            success: None,
            from: DateTime::from_timestamp(0, 0).unwrap_or_else(Utc::now),
            to: Utc::now(),
            limit: 50,
            offset: 0,
        }
    }
}
