//! Shared application state for the Vaultify server.
//!
//! A single [`AppState`] is constructed once at startup and shared across
//! all Axum handlers behind an `Arc`. It owns the core components (C1–C6,
//! C9) and the token maker; handlers never re-construct any of these per
//! request.

use std::sync::Arc;

use chrono::Duration;
use vaultify_core::audit::AuditLog;
use vaultify_core::cipher::SecretCipher;
use vaultify_core::hmac_keys::HmacKeyRegistry;
use vaultify_core::rate_limiter::RateLimiter;
use vaultify_core::secret_store::SecretStore;
use vaultify_core::sharing::SharingRuleStore;
use vaultify_core::user::UserStore;

use crate::auth::PasetoMaker;

/// Shared application state passed to every HTTP handler.
pub struct AppState {
    pub cipher: SecretCipher,
    pub hmac_keys: HmacKeyRegistry,
    pub secrets: SecretStore,
    pub sharing: SharingRuleStore,
    pub audit: AuditLog,
    pub users: UserStore,
    pub rate_limiter: RateLimiter,
    pub token_maker: PasetoMaker,
    pub access_token_duration: Duration,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

/// Convenience alias used throughout `routes` and `middleware`.
pub type SharedState = Arc<AppState>;
