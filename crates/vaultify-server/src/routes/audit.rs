//! `GET /audit`: the caller's own filtered audit trail.
//!
//! Grounded on `original_source/internal/api/audit.go`'s query-parameter
//! set and defaults (`limit=50`, `offset=0`, open-ended time range).

use std::sync::Arc;

use axum::extract::{Extension, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use vaultify_core::audit::AuditFilter;
use vaultify_core::models::AuditLogEntry;

use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub resource_path: Option<String>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /audit`: always scoped to the caller's own `user_email` — there
/// is no cross-principal audit query.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    let defaults = AuditFilter::default();
    let filter = AuditFilter {
        action: q.action,
        resource_path: q.resource_path,
        success: q.success,
        from: q.from.unwrap_or(defaults.from),
        to: q.to.unwrap_or(defaults.to),
        limit: q.limit.unwrap_or(defaults.limit).clamp(1, 500),
        offset: q.offset.unwrap_or(defaults.offset).max(0),
    };

    let entries = state.audit.list_for_user(&caller.email, &filter).await?;
    Ok(Json(entries))
}
