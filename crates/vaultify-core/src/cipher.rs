//! Envelope encryption of secret bodies (C1).

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use crate::error::CoreError;

/// Nonce length for `XChaCha20-Poly1305`, per the extended-nonce construction.
pub const NONCE_LEN: usize = 24;

/// Authenticated encryption of secret values under a single master key.
///
/// Safe to share across tasks once constructed — encryption and
/// decryption are pure functions of the key and the call's arguments.
pub struct SecretCipher {
    aead: XChaCha20Poly1305,
}

impl SecretCipher {
    /// Builds a cipher from a 32-byte master key. The same key signs
    /// arbitrarily many versions: random 24-byte nonces make collision
    /// negligible without a counter.
    pub fn new(master_key: &[u8]) -> Result<Self, CoreError> {
        if master_key.len() != 32 {
            return Err(CoreError::CryptographicFailure(format!(
                "invalid master key size: expected 32 bytes, got {}",
                master_key.len()
            )));
        }
        Ok(Self {
            aead: XChaCha20Poly1305::new(master_key.into()),
        })
    }

    /// Seals `plaintext` under a freshly drawn nonce. Returns
    /// `(ciphertext, nonce)`; ciphertext length is `plaintext.len() + 16`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CoreError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .aead
            .encrypt(&nonce, plaintext)
            .map_err(|e| CoreError::CryptographicFailure(format!("encryption failed: {e}")))?;
        Ok((ciphertext, nonce.to_vec()))
    }

    /// Opens `ciphertext` under `nonce`. Fails on a nonce of the wrong
    /// length or a Poly1305 tag mismatch — either a corrupted payload or
    /// a tampering attempt.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, CoreError> {
        if nonce.len() != NONCE_LEN {
            return Err(CoreError::CryptographicFailure(format!(
                "invalid nonce size: expected {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }
        let nonce = XNonce::from_slice(nonce);
        self.aead
            .decrypt(nonce, ciphertext)
            .map_err(|e| CoreError::CryptographicFailure(format!("decryption failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn round_trip() {
        let c = cipher();
        let (ct, nonce) = c.encrypt(b"hello").unwrap();
        assert_eq!(c.decrypt(&ct, &nonce).unwrap(), b"hello");
    }

    #[test]
    fn round_trip_empty_plaintext() {
        let c = cipher();
        let (ct, nonce) = c.encrypt(b"").unwrap();
        assert_eq!(c.decrypt(&ct, &nonce).unwrap(), b"");
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let c = cipher();
        let (mut ct, nonce) = c.encrypt(b"hello").unwrap();
        ct[0] ^= 0x01;
        assert!(c.decrypt(&ct, &nonce).is_err());
    }

    #[test]
    fn tampered_nonce_rejected() {
        let c = cipher();
        let (ct, mut nonce) = c.encrypt(b"hello").unwrap();
        nonce[0] ^= 0x01;
        assert!(c.decrypt(&ct, &nonce).is_err());
    }

    #[test]
    fn wrong_nonce_size_rejected() {
        let c = cipher();
        let (ct, _) = c.encrypt(b"hello").unwrap();
        let err = c.decrypt(&ct, &[0u8; 12]).unwrap_err();
        assert!(matches!(err, CoreError::CryptographicFailure(_)));
    }

    #[test]
    fn invalid_master_key_size_rejected() {
        assert!(SecretCipher::new(&[0u8; 16]).is_err());
    }
}
