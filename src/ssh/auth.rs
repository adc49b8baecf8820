use std::path::Path;
use std::sync::Arc;

use russh::keys::{HashAlg, PrivateKeyWithHashAlg};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{AuthType, ConnectConfig, paths};
use crate::error::SshError;

/// Credentials checked and loaded, ready for the handshake
pub enum ResolvedAuth {
    /// Password authentication with zeroized secret string
    Password(SecretString),
    /// Public key authentication with loaded key
    PublicKey(PrivateKeyWithHashAlg),
}

impl std::fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedAuth::Password(_) => f.debug_tuple("Password").field(&"[REDACTED]").finish(),
            ResolvedAuth::PublicKey(_) => f.debug_tuple("PublicKey").field(&"[KEY]").finish(),
        }
    }
}

impl ResolvedAuth {
    /// Resolve the credential described by `config.auth_type`.
    ///
    /// Fails before any network activity when the password is empty or the
    /// key file cannot be read.
    pub async fn resolve(config: &ConnectConfig) -> Result<Self, SshError> {
        match config.auth_type {
            AuthType::Password => match &config.password {
                Some(pwd) if !pwd.expose_secret().is_empty() => {
                    Ok(ResolvedAuth::Password(pwd.clone()))
                }
                _ => Err(SshError::MissingCredential(
                    "password is required for password authentication".to_string(),
                )),
            },
            AuthType::PrivateKey => {
                let path = config.private_key_path.as_ref().ok_or_else(|| {
                    SshError::MissingCredential(
                        "private key path is required for key authentication".to_string(),
                    )
                })?;

                let expanded_path = paths::expand_tilde(&path.to_string_lossy());
                let passphrase = config
                    .passphrase
                    .as_ref()
                    .map(|p| p.expose_secret())
                    .filter(|p| !p.is_empty());
                load_key_file(&expanded_path, passphrase).await
            }
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            ResolvedAuth::Password(_) => "password",
            ResolvedAuth::PublicKey(_) => "publickey",
        }
    }
}

fn key_read_error(path: &Path, reason: impl Into<String>) -> SshError {
    SshError::KeyRead {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Load an SSH private key from file
async fn load_key_file(path: &Path, passphrase: Option<&str>) -> Result<ResolvedAuth, SshError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| key_read_error(path, e.to_string()))?;

    // Check if this is actually a public key (common mistake)
    let first_line = content.lines().next().unwrap_or("");
    if first_line.starts_with("ssh-") || first_line.starts_with("ecdsa-") {
        return Err(key_read_error(
            path,
            "file contains a PUBLIC key, not a private key",
        ));
    }

    if !first_line.starts_with("-----BEGIN") {
        return Err(key_read_error(
            path,
            "file does not look like an SSH private key",
        ));
    }

    let key = russh::keys::decode_secret_key(&content, passphrase).map_err(|e| {
        let msg = e.to_string();
        let normalized = msg.to_lowercase();
        // Detect passphrase-related errors from various russh error messages
        let is_passphrase_error = normalized.contains("encrypted")
            || normalized.contains("passphrase")
            || normalized.contains("cryptographic");
        if is_passphrase_error {
            if passphrase.is_some() {
                key_read_error(path, "invalid passphrase")
            } else {
                key_read_error(path, "key is encrypted and needs a passphrase")
            }
        } else {
            key_read_error(path, msg)
        }
    })?;

    // Only use SHA-512 hash algorithm for RSA keys
    let hash_alg = if key.algorithm().is_rsa() {
        Some(HashAlg::Sha512)
    } else {
        None
    };
    let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

    Ok(ResolvedAuth::PublicKey(key_with_hash))
}
