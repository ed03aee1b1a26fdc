//! # Configuration
//!
//! Deployment-wide settings consumed by the trust core. The hosting process
//! is responsible for sourcing values (environment, file, flags) and hands
//! the core a validated [`TrustConfig`].

use std::fmt;

use crate::error::Error;

/// Number of bytes in the key-encryption key.
const KEK_LEN: usize = 32;

/// The deployment-wide 32-byte key-encryption key, decoded from hex.
///
/// Wraps the raw bytes so the secret never appears in `Debug` output.
#[derive(Clone)]
pub struct KeyEncryptionKey([u8; KEK_LEN]);

impl KeyEncryptionKey {
    /// Decode from 64 hex characters.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the value is missing, not valid hex, or
    /// not exactly 32 bytes.
    pub fn from_hex(secret: &str) -> Result<Self, Error> {
        if secret.is_empty() {
            return Err(Error::Config("key encryption secret is required".into()));
        }
        let bytes = hex::decode(secret)
            .map_err(|_| Error::Config("key encryption secret is not valid hex".into()))?;
        let bytes: [u8; KEK_LEN] = bytes.try_into().map_err(|_| {
            Error::Config("key encryption secret must be 32 bytes (64 hex characters)".into())
        })?;
        Ok(Self(bytes))
    }

    /// The raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEK_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyEncryptionKey(..)")
    }
}

/// Settings for the trust core.
#[derive(Clone, Debug)]
pub struct TrustConfig {
    /// Key used to wrap private keys at rest.
    pub key_encryption_key: KeyEncryptionKey,

    /// DID of the platform itself; issuers matching it are classified
    /// `platform-verified`.
    pub platform_did: String,

    /// Ceiling on `exp - iat` for issued CPOEs, in days.
    pub max_expiry_days: i64,

    /// Ceiling on accepted CPOE input, in bytes.
    pub max_cpoe_bytes: usize,

    /// Timeout for a single DID document fetch, in milliseconds.
    pub did_resolve_timeout_ms: u64,

    /// Timeout for pushing a statement to a remote transparency log, in
    /// milliseconds.
    pub log_push_timeout_ms: u64,

    /// When set, the policy preset restricts acceptable issuers to this DID.
    pub allowed_issuer: Option<String>,
}

impl TrustConfig {
    /// Build a configuration from the hex-encoded key encryption secret and
    /// the platform DID, with defaults for everything else.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when the secret is absent or malformed.
    pub fn new(key_encryption_secret: &str, platform_did: impl Into<String>) -> Result<Self, Error> {
        Ok(Self {
            key_encryption_key: KeyEncryptionKey::from_hex(key_encryption_secret)?,
            platform_did: platform_did.into(),
            max_expiry_days: 365,
            max_cpoe_bytes: 102_400,
            did_resolve_timeout_ms: 5000,
            log_push_timeout_ms: 10_000,
            allowed_issuer: None,
        })
    }

    /// Maximum permitted `exp - iat` in seconds.
    #[must_use]
    pub const fn max_expiry_secs(&self) -> i64 {
        self.max_expiry_days * 86_400
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secret_round_trip() {
        let hex64 = "ab".repeat(32);
        let kek = KeyEncryptionKey::from_hex(&hex64).expect("should decode");
        assert_eq!(kek.as_bytes()[0], 0xab);
        assert_eq!(format!("{kek:?}"), "KeyEncryptionKey(..)");
    }

    #[test]
    fn secret_rejected() {
        assert!(matches!(KeyEncryptionKey::from_hex(""), Err(Error::Config(_))));
        assert!(matches!(KeyEncryptionKey::from_hex("abcd"), Err(Error::Config(_))));
        assert!(matches!(
            KeyEncryptionKey::from_hex("zz".repeat(32).as_str()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn defaults() {
        let config = TrustConfig::new(&"00".repeat(32), "did:web:corsair.example").expect("config");
        assert_eq!(config.max_expiry_days, 365);
        assert_eq!(config.max_cpoe_bytes, 102_400);
        assert_eq!(config.did_resolve_timeout_ms, 5000);
        assert_eq!(config.log_push_timeout_ms, 10_000);
        assert_eq!(config.max_expiry_secs(), 365 * 86_400);
    }
}
