//! User accounts: signup and login identities.
//!
//! Users are immutable once created — profile editing is out of scope.
//! Passwords are hashed with Argon2id; this module never stores or
//! compares plaintext passwords.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use password_hash::rand_core::OsRng;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::User;

/// Hashes `password` with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, CoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Internal(format!("password hashing failed: {e}")))
}

/// Verifies `password` against a previously stored Argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, CoreError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| CoreError::Internal(format!("invalid stored password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Owns the `users` table.
pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a new user with an Argon2id-hashed password. Fails with
    /// [`CoreError::Conflict`] if `email` is already registered.
    pub async fn create(
        &self,
        email: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User, CoreError> {
        sqlx::query_as::<_, User>(
            "INSERT INTO users (email, display_name, password_hash) \
             VALUES ($1, $2, $3) \
             RETURNING id, email, display_name, password_hash, created_at",
        )
        .bind(email)
        .bind(display_name)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.code().as_deref() == Some("23505") => {
                CoreError::Conflict(format!("email '{email}' is already registered"))
            }
            other => other.into(),
        })
    }

    /// Looks up a user by email. Fails with [`CoreError::NotFound`].
    pub async fn get_by_email(&self, email: &str) -> Result<User, CoreError> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, display_name, password_hash, created_at \
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("no user registered with email '{email}'")))
    }

    /// Looks up a user by id. Fails with [`CoreError::NotFound`].
    pub async fn get_by_id(&self, id: Uuid) -> Result<User, CoreError> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, display_name, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound("user not found".to_owned()))
    }

    /// True iff a user with `email` exists — used by the sharing flow to
    /// reject grants to unregistered targets before the unique-index
    /// check on the sharing rule itself.
    pub async fn exists(&self, email: &str) -> Result<bool, CoreError> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_succeeds() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(!verify_password("wrong password", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }
}
