//! Credential decryption seam.
//!
//! Real deployments plug in their own vault; decryption keys and algorithms
//! are owned outside this crate. The engine only ever sees the decrypted
//! [`Credential`] for the duration of one run.

use anyhow::{anyhow, Context, Result};
use base64::Engine;

use crate::types::Credential;

pub trait CredentialVault: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<Credential>;
}

/// Development vault: credentials stored as `base64("username:password")`.
pub struct Base64Vault;

impl CredentialVault for Base64Vault {
    fn decrypt(&self, ciphertext: &str) -> Result<Credential> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(ciphertext.trim())
            .context("credential is not valid base64")?;
        let text = String::from_utf8(raw).context("credential is not valid utf-8")?;
        let (username, password) = text
            .split_once(':')
            .ok_or_else(|| anyhow!("credential must be username:password"))?;
        if username.is_empty() || password.is_empty() {
            return Err(anyhow!("credential has an empty username or password"));
        }
        Ok(Credential {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_username_and_password() {
        let ciphertext = base64::engine::general_purpose::STANDARD
            .encode("student@example.edu:hunter2");
        let credential = Base64Vault.decrypt(&ciphertext).unwrap();
        assert_eq!(credential.username, "student@example.edu");
        assert_eq!(credential.password, "hunter2");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Base64Vault.decrypt("not base64 at all!!!").is_err());
    }

    #[test]
    fn rejects_missing_separator() {
        let ciphertext = base64::engine::general_purpose::STANDARD.encode("no-separator");
        assert!(Base64Vault.decrypt(&ciphertext).is_err());
    }
}
