//! `POST /sign-up` and `POST /login` — account creation and PASETO token
//! issuance. Grounded on `original_source/internal/api/user.go`, with
//! Argon2id password hashing (SPEC_FULL.md §3.5) in place of the
//! original's unspecified hashing.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vaultify_core::user;

use crate::auth::TokenMaker;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

fn validate_email(email: &str) -> Result<(), AppError> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(AppError::InvalidInput("invalid email address".to_owned()));
    }
    Ok(())
}

/// `POST /sign-up`: creates a user with an Argon2id-hashed password.
pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignUpRequest>,
) -> Result<Json<UserResponse>, AppError> {
    validate_email(&req.email)?;
    if req.password.len() < 8 {
        return Err(AppError::InvalidInput(
            "password must be at least 8 characters".to_owned(),
        ));
    }

    let display_name = req.display_name.unwrap_or_else(|| req.email.clone());
    let password_hash = user::hash_password(&req.password)?;

    let created = state
        .users
        .create(&req.email, &display_name, &password_hash)
        .await?;

    Ok(Json(UserResponse {
        id: created.id,
        email: created.email,
        display_name: created.display_name,
        created_at: created.created_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user_id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// `POST /login`: verifies the password and issues a bearer token. A
/// missing user and a wrong password both report as `Unauthenticated` —
/// the HTTP layer never reveals which check failed.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let found = state.users.get_by_email(&req.email).await;
    let user = match found {
        Ok(user) => user,
        Err(_) => return Err(AppError::Unauthenticated("invalid credentials".to_owned())),
    };

    if !user::verify_password(&req.password, &user.password_hash)? {
        return Err(AppError::Unauthenticated("invalid credentials".to_owned()));
    }

    let access_token =
        state
            .token_maker
            .create_token(user.id, &user.email, state.access_token_duration)?;
    let expires_at = Utc::now() + state.access_token_duration;

    Ok(Json(LoginResponse {
        access_token,
        user_id: user.id,
        email: user.email,
        expires_at,
    }))
}
