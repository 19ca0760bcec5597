//! Request pipeline (C10): authentication and rate-limit admission.
//!
//! Permission mediation itself (ownership vs. sharing-rule lookup) lives
//! in [`vaultify_core::access::AccessMediator`] and is invoked directly by
//! the `secrets` handlers — unlike the original Go source, there is no
//! per-request mutable "context bag" a separate permission middleware
//! stashes a secret handle into under a string key. `authorize` returns
//! the resolved [`vaultify_core::access::AccessGrant`] as a typed value
//! instead (REDESIGN FLAG, see spec.md §9).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::TokenMaker;
use crate::error::AppError;
use crate::state::AppState;

/// The authenticated caller, injected into request extensions by
/// [`auth_middleware`]. Handlers extract this with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub email: String,
}

/// Decodes the bearer token, rejects expired tokens, and admits the
/// request against the per-principal token bucket — the first two steps
/// of spec.md §4.9's pipeline. Downstream handlers see
/// `Extension<AuthenticatedUser>`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let Some(header) = header else {
        return Err(AppError::Unauthenticated(
            "missing authorization header".to_owned(),
        ));
    };

    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        AppError::Unauthenticated("authorization header must use Bearer scheme".to_owned())
    })?;

    let payload = state.token_maker.verify_token(token)?;

    state
        .rate_limiter
        .admit(&payload.user_id.to_string())
        .await?;

    req.extensions_mut().insert(AuthenticatedUser {
        user_id: payload.user_id,
        email: payload.email,
    });

    Ok(next.run(req).await)
}
