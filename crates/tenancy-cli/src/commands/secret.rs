//! Master key commands

use crate::output::OutputFormat;
use anyhow::{bail, Context};
use serde::Serialize;
use std::fmt;
use std::io::Read;
use tenancy_common::{Settings, TenancyError};
use tenancy_vault::SecretCipher;

#[derive(Serialize)]
struct Ciphertext {
    ciphertext: String,
}

impl fmt::Display for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ciphertext)
    }
}

#[derive(Serialize)]
struct KeyStatus {
    configured: bool,
    round_trip: bool,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "master key configured, round-trip ok")
    }
}

pub fn encrypt(settings: &Settings, value: Option<String>, format: OutputFormat) -> anyhow::Result<()> {
    let plaintext = match value {
        Some(value) => value,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading secret from stdin")?;
            buf.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    let ciphertext = seal(settings, &plaintext)?;
    format.print(&Ciphertext { ciphertext })
}

fn seal(settings: &Settings, plaintext: &str) -> anyhow::Result<String> {
    if plaintext.is_empty() {
        bail!("nothing to encrypt");
    }
    let cipher = SecretCipher::from_settings(settings);
    cipher
        .encrypt(plaintext)
        .map_err(|e| anyhow::Error::from(TenancyError::from(e)))
}

pub fn verify_key(settings: &Settings, format: OutputFormat) -> anyhow::Result<()> {
    SecretCipher::from_settings(settings)
        .ensure_configured()
        .map_err(TenancyError::from)?;
    format.print(&KeyStatus {
        configured: true,
        round_trip: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(key: Option<&str>) -> Settings {
        Settings {
            master_key: key.map(String::from),
            ..Settings::default()
        }
    }

    #[test]
    fn test_seal_opens_with_same_key() {
        let settings = settings(Some("cli-test-key"));
        let blob = seal(&settings, "hunter2").unwrap();
        assert_eq!(SecretCipher::from_settings(&settings).decrypt(&blob).unwrap(), "hunter2");
    }

    #[test]
    fn test_seal_without_key_fails() {
        let err = seal(&settings(None), "hunter2").unwrap_err();
        assert!(err.to_string().contains("configuration missing"));
    }

    #[test]
    fn test_seal_rejects_empty() {
        assert!(seal(&settings(Some("k")), "").is_err());
    }

    #[test]
    fn test_verify_key() {
        assert!(verify_key(&settings(Some("k")), OutputFormat::Json).is_ok());
        assert!(verify_key(&settings(None), OutputFormat::Text).is_err());
    }
}
