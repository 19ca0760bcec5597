//! Bearer token issuance and verification (spec.md §6): PASETO v2 local,
//! symmetric-keyed with a 32-byte key from configuration.
//!
//! Mirrors `original_source/internal/auth/token_maker.go`'s `TokenMaker`
//! interface (`CreateToken`/`VerifyToken`) as a Rust trait, with
//! [`PasetoMaker`] as the sole implementation.

use chrono::{DateTime, Duration, Utc};
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::version2::V2;
use pasetors::{local, Local};
use uuid::Uuid;

/// Claims carried by a Vaultify bearer token.
#[derive(Debug, Clone)]
pub struct Payload {
    pub user_id: Uuid,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl Payload {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expired_at
    }
}

/// Error creating or verifying a bearer token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token expired")]
    Expired,
    #[error("token signing key must be 32 bytes, got {0}")]
    InvalidKeySize(usize),
}

/// Issues and verifies bearer tokens. A trait (rather than a concrete
/// type threaded everywhere) so handler tests can substitute a fake
/// maker without a real key.
pub trait TokenMaker: Send + Sync {
    fn create_token(
        &self,
        user_id: Uuid,
        email: &str,
        duration: Duration,
    ) -> Result<String, TokenError>;

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError>;
}

/// `TokenMaker` backed by PASETO v2 local (symmetric, authenticated
/// encryption) tokens.
pub struct PasetoMaker {
    key: SymmetricKey<V2>,
}

impl PasetoMaker {
    /// Builds a maker from a 32-byte symmetric key.
    pub fn new(key_bytes: &[u8]) -> Result<Self, TokenError> {
        if key_bytes.len() != 32 {
            return Err(TokenError::InvalidKeySize(key_bytes.len()));
        }
        let key = SymmetricKey::<V2>::from(key_bytes)
            .map_err(|e| TokenError::Invalid(format!("invalid symmetric key: {e}")))?;
        Ok(Self { key })
    }
}

impl TokenMaker for PasetoMaker {
    fn create_token(
        &self,
        user_id: Uuid,
        email: &str,
        duration: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let expires = now + duration;

        // `Claims::new_expires_in` sets the registered `exp` from the real
        // `duration` instead of `Claims::new()`'s default one-hour window,
        // so pasetors' own validation (if it runs) agrees with the caller's
        // requested lifetime rather than capping every token at an hour
        // regardless of `ACCESS_TOKEN_DURATION`. `chrono::Duration` can be
        // negative (tests mint already-expired tokens this way) but
        // `std::time::Duration` cannot, so a non-positive duration floors to
        // zero here — the real, possibly-negative `duration` still drives
        // `expires` below, which is what the `expired_at` claim and
        // `Payload::is_expired` actually check. spec.md §6 names the claims
        // `issued_at`/`expired_at`, not the registered `iat`/`exp`, so those
        // exact values are carried as additional claims too, and
        // `verify_token` disables pasetors' own current-time validation so
        // this crate's own check stays the one place that decides expiry
        // (§4.9's "decode token" and "reject if expired" are separate
        // pipeline steps).
        let std_duration = duration.to_std().unwrap_or(std::time::Duration::ZERO);
        let mut claims = Claims::new_expires_in(&std_duration)
            .map_err(|e| TokenError::Invalid(format!("failed to build claims: {e}")))?;
        claims
            .add_additional("user_id", serde_json::Value::String(user_id.to_string()))
            .map_err(|e| TokenError::Invalid(format!("failed to set user_id claim: {e}")))?;
        claims
            .add_additional("email", serde_json::Value::String(email.to_owned()))
            .map_err(|e| TokenError::Invalid(format!("failed to set email claim: {e}")))?;
        claims
            .add_additional(
                "issued_at",
                serde_json::Value::String(now.to_rfc3339()),
            )
            .map_err(|e| TokenError::Invalid(format!("failed to set issued_at claim: {e}")))?;
        claims
            .add_additional(
                "expired_at",
                serde_json::Value::String(expires.to_rfc3339()),
            )
            .map_err(|e| TokenError::Invalid(format!("failed to set expired_at claim: {e}")))?;

        local::encrypt(&self.key, &claims, None, None)
            .map_err(|e| TokenError::Invalid(format!("failed to encrypt token: {e}")))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError> {
        let untrusted = UntrustedToken::<Local, V2>::try_from(token)
            .map_err(|e| TokenError::Invalid(format!("malformed token: {e}")))?;

        // Pasetors' default `ClaimsValidationRules` rejects a token whose
        // registered `exp` has passed on its own, independent of
        // `Payload::is_expired`. Disabled here so this crate's own check on
        // the `expired_at` claim is the sole authority over expiry.
        let mut validation_rules = ClaimsValidationRules::new();
        validation_rules.validate_currently_valid(false);
        let trusted = local::decrypt(&self.key, &untrusted, &validation_rules, None, None)
            .map_err(|e| TokenError::Invalid(format!("token verification failed: {e}")))?;

        let claims = trusted
            .payload_claims()
            .ok_or_else(|| TokenError::Invalid("token carries no claims".to_owned()))?;

        let user_id = claims
            .get_claim("user_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| TokenError::Invalid("missing or invalid user_id claim".to_owned()))?;

        let email = claims
            .get_claim("email")
            .and_then(|v| v.as_str())
            .map(ToOwned::to_owned)
            .ok_or_else(|| TokenError::Invalid("missing email claim".to_owned()))?;

        let issued_at = claims
            .get_claim("issued_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| TokenError::Invalid("missing or invalid issued_at claim".to_owned()))?;

        let expired_at = claims
            .get_claim("expired_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| TokenError::Invalid("missing or invalid expired_at claim".to_owned()))?;

        let payload = Payload {
            user_id,
            email,
            issued_at,
            expired_at,
        };

        if payload.is_expired() {
            return Err(TokenError::Expired);
        }

        Ok(payload)
    }
}
