//! Secret cipher
//!
//! Stateless AES-256-GCM transform. Each encryption draws a fresh random
//! nonce from the OS and packs it in front of the ciphertext, so a blob can be
//! opened with nothing but the blob and the derived key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use tenancy_common::{Settings, TenancyError};

/// AES-256-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// AES-256-GCM tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Cipher errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    /// No master secret was configured
    #[error("master key is not configured")]
    MasterKeyMissing,
    /// Tag verification failed: tampered blob or wrong key
    #[error("authentication failed")]
    Authentication,
    /// Not base64, too short, or plaintext is not UTF-8
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
    /// The AEAD refused to seal
    #[error("encryption failed")]
    Encryption,
}

impl From<CipherError> for TenancyError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::MasterKeyMissing => TenancyError::ConfigurationMissing(err.to_string()),
            other => TenancyError::InvalidConfig(other.to_string()),
        }
    }
}

/// Symmetric cipher for individual secret values
#[derive(Clone)]
pub struct SecretCipher {
    aead: Option<Aes256Gcm>,
}

impl SecretCipher {
    /// Derive the working key from a master secret.
    ///
    /// A missing or blank secret still builds a cipher; every encrypt/decrypt
    /// then fails with [`CipherError::MasterKeyMissing`].
    pub fn new(master_secret: Option<&str>) -> Self {
        let aead = master_secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|secret| {
                let digest = Sha256::digest(secret.as_bytes());
                Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(digest.as_slice()))
            });
        if aead.is_none() {
            tracing::warn!("secret cipher built without a master key; secret access will fail");
        }
        Self { aead }
    }

    /// Build from process settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.master_key.as_deref())
    }

    /// Whether a master secret is present
    pub fn is_configured(&self) -> bool {
        self.aead.is_some()
    }

    /// Startup check: key present and a probe value round-trips.
    pub fn ensure_configured(&self) -> Result<(), CipherError> {
        const PROBE: &str = "tenancy-vault-probe";
        let blob = self.encrypt(PROBE)?;
        if self.decrypt(&blob)? != PROBE {
            return Err(CipherError::Authentication);
        }
        Ok(())
    }

    /// Encrypt a secret. Empty input yields empty output.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let aead = self.aead()?;
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let sealed = aead
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encryption)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a blob produced by [`encrypt`](Self::encrypt). Empty input
    /// yields empty output.
    pub fn decrypt(&self, blob: &str) -> Result<String, CipherError> {
        let aead = self.aead()?;
        if blob.is_empty() {
            return Ok(String::new());
        }

        let raw = STANDARD
            .decode(blob.trim())
            .map_err(|e| CipherError::Malformed(format!("invalid base64: {e}")))?;
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::Malformed(format!(
                "blob is {} bytes, need at least {}",
                raw.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }

        let (nonce, sealed) = raw.split_at(NONCE_SIZE);
        let opened = aead
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Authentication)?;

        String::from_utf8(opened).map_err(|_| CipherError::Malformed("plaintext is not UTF-8".into()))
    }

    /// Encrypt an optional secret, mapping `None` and empty to `None`.
    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<Option<String>, CipherError> {
        match plaintext {
            Some(p) if !p.is_empty() => self.encrypt(p).map(Some),
            _ => {
                self.aead()?;
                Ok(None)
            }
        }
    }

    /// Decrypt an optional blob, mapping `None` and empty to `None`.
    pub fn decrypt_optional(&self, blob: Option<&str>) -> Result<Option<String>, CipherError> {
        match blob {
            Some(b) if !b.is_empty() => self.decrypt(b).map(Some),
            _ => {
                self.aead()?;
                Ok(None)
            }
        }
    }

    fn aead(&self) -> Result<&Aes256Gcm, CipherError> {
        self.aead.as_ref().ok_or(CipherError::MasterKeyMissing)
    }
}

impl fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCipher")
            .field("configured", &self.is_configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new(Some("correct horse battery staple"))
    }

    fn flip_bit(blob: &str, bit: usize) -> String {
        let mut raw = STANDARD.decode(blob).unwrap();
        let bit = bit % (raw.len() * 8);
        raw[bit / 8] ^= 1 << (bit % 8);
        STANDARD.encode(raw)
    }

    #[test]
    fn test_round_trip() {
        let c = cipher();
        let blob = c.encrypt("db-password").unwrap();
        assert_ne!(blob, "db-password");
        assert_eq!(c.decrypt(&blob).unwrap(), "db-password");
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let c = cipher();
        assert_ne!(c.encrypt("same").unwrap(), c.encrypt("same").unwrap());
    }

    #[test]
    fn test_empty_is_noop() {
        let c = cipher();
        assert_eq!(c.encrypt("").unwrap(), "");
        assert_eq!(c.decrypt("").unwrap(), "");
        assert_eq!(c.decrypt_optional(None).unwrap(), None);
        assert_eq!(c.encrypt_optional(Some("")).unwrap(), None);
    }

    #[test]
    fn test_missing_master_key_fails_loudly() {
        let c = SecretCipher::new(None);
        assert!(!c.is_configured());
        assert_eq!(c.encrypt("x"), Err(CipherError::MasterKeyMissing));
        assert_eq!(c.decrypt(""), Err(CipherError::MasterKeyMissing));
        assert_eq!(c.ensure_configured(), Err(CipherError::MasterKeyMissing));
        assert_eq!(SecretCipher::new(Some("   ")).encrypt("x"), Err(CipherError::MasterKeyMissing));

        let err: TenancyError = CipherError::MasterKeyMissing.into();
        assert!(matches!(err, TenancyError::ConfigurationMissing(_)));
    }

    #[test]
    fn test_wrong_key_is_authentication_error() {
        let blob = cipher().encrypt("secret").unwrap();
        let other = SecretCipher::new(Some("another master"));
        assert_eq!(other.decrypt(&blob), Err(CipherError::Authentication));
    }

    #[test]
    fn test_same_secret_same_key_across_instances() {
        let blob = cipher().encrypt("shared").unwrap();
        assert_eq!(cipher().decrypt(&blob).unwrap(), "shared");
    }

    #[test]
    fn test_truncated_and_garbage_blobs() {
        let c = cipher();
        let blob = c.encrypt("secret").unwrap();
        let raw = STANDARD.decode(&blob).unwrap();
        let truncated = STANDARD.encode(&raw[..NONCE_SIZE + TAG_SIZE - 1]);
        assert!(matches!(c.decrypt(&truncated), Err(CipherError::Malformed(_))));

        let chopped_tag = STANDARD.encode(&raw[..raw.len() - 1]);
        assert_eq!(c.decrypt(&chopped_tag), Err(CipherError::Authentication));

        assert!(matches!(c.decrypt("not base64!!"), Err(CipherError::Malformed(_))));
    }

    #[test]
    fn test_ensure_configured() {
        assert!(cipher().ensure_configured().is_ok());
    }

    proptest! {
        #[test]
        fn prop_round_trip(secret in "\\PC{0,64}") {
            let c = cipher();
            let blob = c.encrypt(&secret).unwrap();
            prop_assert_eq!(c.decrypt(&blob).unwrap(), secret);
        }

        #[test]
        fn prop_bit_flip_is_rejected(secret in "\\PC{1,64}", bit in any::<usize>()) {
            let c = cipher();
            let tampered = flip_bit(&c.encrypt(&secret).unwrap(), bit);
            prop_assert_eq!(c.decrypt(&tampered), Err(CipherError::Authentication));
        }
    }
}
