//! Secret CRUD, rollback, and sharing (spec.md §6, C3–C6 glued together).
//!
//! Every write handler verifies the prior version's HMAC signature before
//! doing any further work (spec.md §4.9) and writes its audit row in the
//! same transaction as the effect (§4.6) — both via
//! [`vaultify_core::secret_store::SecretStore`]'s transactional methods,
//! which take the [`AuditEvent`] to write alongside the mutation. A failed
//! HMAC check is the one case audited out-of-band, independent of any
//! transaction, since no effect follows it (§7).

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaultify_core::access::{AccessMediator, Principal};
use vaultify_core::audit::AuditEvent;
use vaultify_core::hmac_keys;
use vaultify_core::models::{action, AccessMode, SecretVersionRow};

use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Verifies `version`'s HMAC signature against the key it was signed
/// under. On mismatch, audits the attempt out-of-band (no effect to bind
/// the audit row to) and returns `Unauthenticated` — a potential
/// tampering signal per spec.md §7.
async fn verify_integrity(
    state: &AppState,
    version: &SecretVersionRow,
    caller: &AuthenticatedUser,
    action: &str,
) -> Result<(), AppError> {
    let key = state.hmac_keys.get_by_id(version.hmac_key_id).await?;
    let mut payload = version.ciphertext.clone();
    payload.extend_from_slice(&version.nonce);

    if hmac_keys::verify(&payload, &version.signature, &key.key_bytes) {
        return Ok(());
    }

    let _ = state
        .audit
        .log(AuditEvent {
            user_id: caller.user_id,
            user_email: &caller.email,
            action,
            resource_path: &version.path,
            resource_version: Some(version.version),
            success: false,
            reason: Some("invalid HMAC signature"),
        })
        .await;

    Err(AppError::Unauthenticated(
        "secret integrity check failed".to_owned(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateSecretRequest {
    pub path: String,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SecretResponse {
    pub path: String,
    pub version: i32,
    pub encrypted_value: String,
    pub nonce: String,
}

/// `POST /secrets/`: creates a path under `<owner email>/<requested path>`
/// and its first version.
pub async fn create_secret(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(req): Json<CreateSecretRequest>,
) -> Result<Json<SecretResponse>, AppError> {
    if req.path.trim().is_empty() || req.value.is_empty() {
        return Err(AppError::InvalidInput(
            "path and value are required".to_owned(),
        ));
    }

    let full_path = format!("{}/{}", caller.email, req.path);

    let (ciphertext, nonce) = state.cipher.encrypt(req.value.as_bytes())?;
    let active_key = state.hmac_keys.get_active().await?;
    let mut payload = ciphertext.clone();
    payload.extend_from_slice(&nonce);
    let signature = hmac_keys::sign(&payload, &active_key.key_bytes);

    let version = state
        .secrets
        .create_secret_with_version(
            caller.user_id,
            &full_path,
            &ciphertext,
            &nonce,
            &signature,
            active_key.id,
            req.expires_at,
            AuditEvent {
                user_id: caller.user_id,
                user_email: &caller.email,
                action: action::CREATE_SECRET,
                resource_path: &full_path,
                resource_version: Some(1),
                success: true,
                reason: None,
            },
        )
        .await?;

    Ok(Json(SecretResponse {
        path: full_path,
        version: version.version,
        encrypted_value: b64(&version.ciphertext),
        nonce: b64(&version.nonce),
    }))
}

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    pub version: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ReadSecretResponse {
    pub path: String,
    pub version: i32,
    pub decrypted_value: String,
}

/// `GET /secrets/*path`: reads the latest version, or the one named by
/// `?version=`.
pub async fn get_secret(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(path): Path<String>,
    Query(q): Query<VersionQuery>,
) -> Result<Json<ReadSecretResponse>, AppError> {
    let mediator = AccessMediator::new(&state.secrets, &state.sharing);
    let principal = Principal {
        user_id: caller.user_id,
        email: &caller.email,
    };

    let grant = mediator
        .authorize(principal, &path, q.version, AccessMode::Read)
        .await?;

    verify_integrity(&state, &grant.version, &caller, action::READ_SECRET).await?;

    let plaintext = state
        .cipher
        .decrypt(&grant.version.ciphertext, &grant.version.nonce)?;
    let decrypted_value = String::from_utf8(plaintext)
        .map_err(|e| AppError::Internal(format!("stored plaintext is not valid UTF-8: {e}")))?;

    state
        .audit
        .log(AuditEvent {
            user_id: caller.user_id,
            user_email: &caller.email,
            action: action::READ_SECRET,
            resource_path: &path,
            resource_version: Some(grant.version.version),
            success: true,
            reason: None,
        })
        .await?;

    Ok(Json(ReadSecretResponse {
        path,
        version: grant.version.version,
        decrypted_value,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSecretRequest {
    pub value: String,
}

/// `PUT /secrets/*path`: creates the next version. The prior latest
/// version's HMAC is verified before the new ciphertext is ever computed.
pub async fn update_secret(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(path): Path<String>,
    Json(req): Json<UpdateSecretRequest>,
) -> Result<Json<SecretResponse>, AppError> {
    if req.value.is_empty() {
        return Err(AppError::InvalidInput("value is required".to_owned()));
    }

    let mediator = AccessMediator::new(&state.secrets, &state.sharing);
    let principal = Principal {
        user_id: caller.user_id,
        email: &caller.email,
    };

    let grant = mediator
        .authorize(principal, &path, None, AccessMode::Write)
        .await?;

    verify_integrity(&state, &grant.version, &caller, action::UPDATE_SECRET).await?;

    let (ciphertext, nonce) = state.cipher.encrypt(req.value.as_bytes())?;
    let active_key = state.hmac_keys.get_active().await?;
    let mut payload = ciphertext.clone();
    payload.extend_from_slice(&nonce);
    let signature = hmac_keys::sign(&payload, &active_key.key_bytes);

    let version = state
        .secrets
        .create_new_version(
            &path,
            &ciphertext,
            &nonce,
            &signature,
            active_key.id,
            caller.user_id,
            AuditEvent {
                user_id: caller.user_id,
                user_email: &caller.email,
                action: action::UPDATE_SECRET,
                resource_path: &path,
                resource_version: None,
                success: true,
                reason: None,
            },
        )
        .await?;

    Ok(Json(SecretResponse {
        path,
        version: version.version,
        encrypted_value: b64(&version.ciphertext),
        nonce: b64(&version.nonce),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version: i32,
}

/// `POST /secrets/rollback/*path`: rolls back to `version` by decrypting
/// it (after verifying its HMAC) and inserting a freshly encrypted,
/// freshly signed copy as the next version. The new version's
/// `created_by` is inherited from the rolled-from row — the observed
/// source behavior (spec.md §4.3, §9) — while the audit entry records the
/// calling principal, not the inherited value.
pub async fn rollback_secret(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Path(path): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> Result<Json<SecretResponse>, AppError> {
    let mediator = AccessMediator::new(&state.secrets, &state.sharing);
    let principal = Principal {
        user_id: caller.user_id,
        email: &caller.email,
    };

    let latest = mediator
        .authorize(principal, &path, None, AccessMode::Write)
        .await?;

    if req.version <= 0 || req.version > latest.version.version {
        return Err(AppError::InvalidInput("invalid version".to_owned()));
    }

    let rollback_to = state.secrets.get_version(&path, req.version).await?;
    verify_integrity(&state, &rollback_to, &caller, action::ROLLBACK_SECRET).await?;

    let plaintext = state
        .cipher
        .decrypt(&rollback_to.ciphertext, &rollback_to.nonce)?;

    let (ciphertext, nonce) = state.cipher.encrypt(&plaintext)?;
    let active_key = state.hmac_keys.get_active().await?;
    let mut payload = ciphertext.clone();
    payload.extend_from_slice(&nonce);
    let signature = hmac_keys::sign(&payload, &active_key.key_bytes);

    let version = state
        .secrets
        .create_new_version(
            &path,
            &ciphertext,
            &nonce,
            &signature,
            active_key.id,
            rollback_to.created_by,
            AuditEvent {
                user_id: caller.user_id,
                user_email: &caller.email,
                action: action::ROLLBACK_SECRET,
                resource_path: &path,
                resource_version: None,
                success: true,
                reason: None,
            },
        )
        .await?;

    Ok(Json(SecretResponse {
        path,
        version: version.version,
        encrypted_value: b64(&version.ciphertext),
        nonce: b64(&version.nonce),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ShareSecretRequest {
    pub path: String,
    pub target_email: String,
    pub permission: String,
    pub share_ttl_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ShareSecretResponse {
    pub path: String,
    pub permission: String,
    pub owner_email: String,
    pub target_email: String,
}

/// `POST /secrets/share`: owner-only, time-bounded read/write delegation.
/// Check order (kept matching `original_source/internal/api/share.go`):
/// secret exists → caller is owner → not self-share → target user exists
/// → not already shared.
pub async fn share_secret(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthenticatedUser>,
    Json(req): Json<ShareSecretRequest>,
) -> Result<Json<ShareSecretResponse>, AppError> {
    let permission = match req.permission.as_str() {
        "read" => vaultify_core::models::Permission::Read,
        "write" => vaultify_core::models::Permission::Write,
        _ => {
            return Err(AppError::InvalidInput(
                "permission must be 'read' or 'write'".to_owned(),
            ));
        }
    };

    let latest = state.secrets.get_latest(&req.path).await?;
    if latest.owner_id != caller.user_id {
        return Err(AppError::Forbidden(
            "you do not have permission to share this secret".to_owned(),
        ));
    }

    if caller.email == req.target_email {
        return Err(AppError::InvalidInput(
            "you cannot share a secret with yourself".to_owned(),
        ));
    }

    if !state.users.exists(&req.target_email).await? {
        return Err(AppError::NotFound(
            "the target user does not exist".to_owned(),
        ));
    }

    let shared_until = req
        .share_ttl_secs
        .filter(|secs| *secs > 0)
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

    let rule = state
        .sharing
        .share(
            &caller.email,
            &req.target_email,
            &req.path,
            permission,
            shared_until,
            AuditEvent {
                user_id: caller.user_id,
                user_email: &caller.email,
                action: action::SHARE_SECRET,
                resource_path: &req.path,
                resource_version: None,
                success: true,
                reason: None,
            },
        )
        .await?;

    Ok(Json(ShareSecretResponse {
        path: rule.path,
        permission: rule.permission.as_str().to_owned(),
        owner_email: rule.owner_email,
        target_email: rule.target_email,
    }))
}
