//! HMAC key registry (C2): a rotatable set of signing keys, exactly one
//! of which is active at any committed transaction boundary.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::HmacKey;

type HmacSha256 = Hmac<Sha256>;

/// Signs `payload` (the exact bytes `ciphertext ‖ nonce`) under `key`.
#[must_use]
#[allow(clippy::missing_panics_doc)]
pub fn sign(payload: &[u8], key: &[u8]) -> Vec<u8> {
    // HMAC-SHA256 accepts any key length per RFC 2104, so new_from_slice
    // will never fail here.
    #[allow(clippy::unwrap_used)]
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        // SAFETY: HMAC-SHA256 accepts any key length — this never fails.
        .unwrap();
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Verifies `signature` against `payload` under `key` in constant time.
#[must_use]
#[allow(clippy::missing_panics_doc)]
pub fn verify(payload: &[u8], signature: &[u8], key: &[u8]) -> bool {
    // HMAC-SHA256 accepts any key length per RFC 2104, so new_from_slice
    // will never fail here.
    #[allow(clippy::unwrap_used)]
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        // SAFETY: HMAC-SHA256 accepts any key length — this never fails.
        .unwrap();
    mac.update(payload);
    mac.verify_slice(signature).is_ok()
}

/// Draws 32 random bytes from the OS CSPRNG for a new key generation.
#[must_use]
pub fn generate_key_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Stores HMAC key generations and mediates rotation.
pub struct HmacKeyRegistry {
    pool: PgPool,
}

impl HmacKeyRegistry {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the single active row. The active row may transiently be
    /// absent during rotation.
    pub async fn get_active(&self) -> Result<HmacKey, CoreError> {
        sqlx::query_as::<_, HmacKey>(
            "SELECT id, key_bytes, is_active, created_at FROM hmac_keys WHERE is_active = true",
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound("no active hmac key".to_owned()))
    }

    /// Returns a key by id, active or not — callers verifying an older
    /// signature must look the key up this way, never via `get_active`.
    pub async fn get_by_id(&self, id: Uuid) -> Result<HmacKey, CoreError> {
        sqlx::query_as::<_, HmacKey>(
            "SELECT id, key_bytes, is_active, created_at FROM hmac_keys WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NotFound("hmac key not found".to_owned()))
    }

    /// Inserts a new active row. Callers are responsible for deactivating
    /// any existing active row first within the same transaction.
    async fn insert(
        executor: &mut sqlx::PgConnection,
        key_bytes: &[u8],
    ) -> Result<Uuid, CoreError> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO hmac_keys (key_bytes, is_active) VALUES ($1, true) RETURNING id",
        )
        .bind(key_bytes)
        .fetch_one(executor)
        .await?;
        Ok(id)
    }

    /// Sets every row to inactive.
    pub async fn deactivate_all(&self) -> Result<(), CoreError> {
        sqlx::query("UPDATE hmac_keys SET is_active = false")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Installs a fresh active key if none exists. Called once at startup
    /// so the first request never races the rotator's first tick for an
    /// active key to sign against.
    pub async fn ensure_active_key(&self) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        let active: Option<HmacKey> = sqlx::query_as(
            "SELECT id, key_bytes, is_active, created_at FROM hmac_keys \
             WHERE is_active = true FOR UPDATE",
        )
        .fetch_optional(&mut *tx)
        .await?;

        if active.is_some() {
            tx.rollback().await?;
            return Ok(());
        }

        let new_key = generate_key_bytes();
        Self::insert(&mut tx, &new_key).await?;
        tx.commit().await?;
        Ok(())
    }

    /// If the current active key's age is at least `staleness`, atomically
    /// deactivates it and installs a fresh 32-byte random key as the new
    /// active key. Otherwise a no-op. Safe under concurrent invocation: the
    /// active row is locked for the duration of the check-and-swap.
    ///
    /// Returns `true` if a rotation occurred.
    pub async fn rotate_if_stale(
        &self,
        staleness: chrono::Duration,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;

        let active: Option<HmacKey> = sqlx::query_as(
            "SELECT id, key_bytes, is_active, created_at FROM hmac_keys \
             WHERE is_active = true FOR UPDATE",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let should_rotate = match &active {
            Some(key) => Utc::now() - key.created_at >= staleness,
            None => true,
        };

        if !should_rotate {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE hmac_keys SET is_active = false WHERE is_active = true")
            .execute(&mut *tx)
            .await?;

        let new_key = generate_key_bytes();
        Self::insert(&mut tx, &new_key).await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_succeeds() {
        let key = b"0123456789abcdef0123456789abcdef";
        let payload = b"ciphertext-and-nonce";
        let sig = sign(payload, key);
        assert!(verify(payload, &sig, key));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let key = b"0123456789abcdef0123456789abcdef";
        let sig = sign(b"original", key);
        assert!(!verify(b"tampered!", &sig, key));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let sig = sign(b"payload", b"key-one-aaaaaaaaaaaaaaaaaaaaaaaa");
        assert!(!verify(b"payload", &sig, b"key-two-bbbbbbbbbbbbbbbbbbbbbbbb"));
    }

    #[test]
    fn generated_keys_are_32_bytes() {
        assert_eq!(generate_key_bytes().len(), 32);
    }
}
