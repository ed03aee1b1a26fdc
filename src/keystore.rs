//! # Key Store
//!
//! Lifecycle of the platform's Ed25519 keypairs: one active signing key plus
//! every retired predecessor. Retired keys never sign again but remain
//! available to the verifier so legacy CPOEs keep verifying.
//!
//! Private keys are wrapped with AES-256-GCM under the deployment-wide key
//! encryption key before they reach the vault; plaintext key material lives
//! only in memory. Reads take cheap snapshots; mutations (generate, rotate)
//! serialize on a single gate so concurrent signers observe either the old
//! or the new active key, never a torn state.

use std::fmt;
use std::sync::RwLock;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use ed25519_dalek::pkcs8::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use pkcs8::LineEnding;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{KeyEncryptionKey, TrustConfig};
use crate::did::{DID_CONTEXT, DidDocument, Jwks, METHOD_TYPE, PublicKeyJwk, VerificationMethod};
use crate::error::Error;

/// Lifecycle state of a keypair.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// The single keypair currently used for signing.
    #[default]
    Active,

    /// A prior keypair, kept for verification only.
    Retired,
}

/// An Ed25519 keypair with its lifecycle metadata. The secret half never
/// appears in `Debug` output.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,

    /// Key identifier fragment, `key-<n>`.
    pub kid: String,

    /// When the keypair was generated.
    pub created_at: DateTime<Utc>,

    /// Lifecycle state.
    pub status: KeyStatus,

    /// When the keypair was retired, if it has been.
    pub retired_at: Option<DateTime<Utc>>,
}

impl Keypair {
    fn generate(kid: String) -> Self {
        let secret: [u8; 32] = rng().random();
        Self {
            signing: SigningKey::from_bytes(&secret),
            kid,
            created_at: Utc::now(),
            status: KeyStatus::Active,
            retired_at: None,
        }
    }

    /// The verification half.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// The signing half, confined to the crate.
    pub(crate) const fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// The public key as PEM-encoded SPKI.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyFormatInvalid` if DER encoding fails.
    pub fn public_pem(&self) -> Result<String, Error> {
        self.verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::KeyFormatInvalid(format!("SPKI encode: {e}")))
    }

    /// The public key as an OKP JWK.
    #[must_use]
    pub fn to_jwk(&self) -> PublicKeyJwk {
        PublicKeyJwk::from_verifying_key(&self.verifying_key(), &self.kid)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("kid", &self.kid)
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// A keypair as persisted: public key in the clear, private key wrapped with
/// AES-256-GCM (12-byte nonce prepended to the ciphertext, base64url).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKey {
    /// Key identifier fragment.
    pub kid: String,

    /// PEM/SPKI public key.
    pub public_pem: String,

    /// Encrypted private key, `base64url(nonce || ciphertext)`.
    pub secret_enc: String,

    /// Generation time.
    pub created_at: DateTime<Utc>,

    /// Lifecycle state.
    pub status: KeyStatus,

    /// Retirement time, if retired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<DateTime<Utc>>,
}

/// Persistent backing for encrypted key records.
///
/// Implementations store ciphertext only; the key encryption key never
/// crosses this boundary.
pub trait KeyVault: Send + Sync {
    /// Load every stored key record.
    fn load(&self) -> impl Future<Output = anyhow::Result<Vec<StoredKey>>> + Send;

    /// Replace the stored key records.
    fn save(&self, keys: &[StoredKey]) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// In-memory vault for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryVault {
    records: RwLock<Vec<StoredKey>>,
}

impl MemoryVault {
    /// Create an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyVault for MemoryVault {
    async fn load(&self) -> anyhow::Result<Vec<StoredKey>> {
        Ok(self.records.read().map_or_else(|_| vec![], |r| r.clone()))
    }

    async fn save(&self, keys: &[StoredKey]) -> anyhow::Result<()> {
        if let Ok(mut records) = self.records.write() {
            *records = keys.to_vec();
        }
        Ok(())
    }
}

#[derive(Default)]
struct Ring {
    active: Option<Keypair>,
    retired: Vec<Keypair>,
}

impl Ring {
    fn next_kid(&self) -> String {
        let max = self
            .active
            .iter()
            .chain(self.retired.iter())
            .filter_map(|k| k.kid.strip_prefix("key-").and_then(|n| n.parse::<u32>().ok()))
            .max()
            .unwrap_or(0);
        format!("key-{}", max + 1)
    }
}

/// Holds the active and retired keypairs, wrapping private keys before they
/// reach the vault.
pub struct KeyStore<V: KeyVault> {
    kek: KeyEncryptionKey,
    vault: V,
    ring: RwLock<Ring>,
    // serializes generate/rotate, including persistence
    gate: tokio::sync::Mutex<()>,
}

impl<V: KeyVault> KeyStore<V> {
    /// Open the store, decrypting any persisted keypairs.
    ///
    /// # Errors
    ///
    /// `Error::KeyDecryptFailed` on a GCM tag mismatch,
    /// `Error::KeyFormatInvalid` on malformed records (including more than
    /// one active key), `Error::Config` when the vault cannot be read.
    pub async fn open(config: &TrustConfig, vault: V) -> Result<Self, Error> {
        let records =
            vault.load().await.map_err(|e| Error::Config(format!("key vault load: {e}")))?;

        let kek = config.key_encryption_key.clone();
        let mut ring = Ring::default();
        for record in records {
            let keypair = decrypt_record(&kek, &record)?;
            match keypair.status {
                KeyStatus::Active => {
                    if ring.active.is_some() {
                        return Err(Error::KeyFormatInvalid("more than one active key".into()));
                    }
                    ring.active = Some(keypair);
                }
                KeyStatus::Retired => ring.retired.push(keypair),
            }
        }

        Ok(Self { kek, vault, ring: RwLock::new(ring), gate: tokio::sync::Mutex::new(()) })
    }

    /// Generate and persist the first active keypair.
    ///
    /// # Errors
    ///
    /// `Error::Config` when an active key already exists (use [`Self::rotate`])
    /// or when persistence fails.
    pub async fn generate(&self) -> Result<Keypair, Error> {
        let _gate = self.gate.lock().await;

        let keypair = {
            let ring = self.read_ring()?;
            if ring.active.is_some() {
                return Err(Error::Config("an active key already exists; rotate instead".into()));
            }
            Keypair::generate(ring.next_kid())
        };

        self.persist(Some(&keypair), &self.retired()).await?;
        self.write_ring(|ring| ring.active = Some(keypair.clone()))?;

        info!(kid = %keypair.kid, "generated active keypair");
        Ok(keypair)
    }

    /// Snapshot of the single active keypair, if one exists.
    #[must_use]
    pub fn load_active(&self) -> Option<Keypair> {
        self.ring.read().ok().and_then(|ring| ring.active.clone())
    }

    /// The active keypair, required for signing.
    ///
    /// # Errors
    ///
    /// `Error::KeyMissing` when no active key exists.
    pub fn active(&self) -> Result<Keypair, Error> {
        self.load_active().ok_or(Error::KeyMissing)
    }

    /// Snapshot of every retired keypair.
    #[must_use]
    pub fn retired(&self) -> Vec<Keypair> {
        self.ring.read().map_or_else(|_| vec![], |ring| ring.retired.clone())
    }

    /// Active and retired verifying keys, active first. The verifier treats
    /// this as its trusted set.
    #[must_use]
    pub fn trusted_keys(&self) -> Vec<VerifyingKey> {
        self.ring.read().map_or_else(
            |_| vec![],
            |ring| {
                ring.active
                    .iter()
                    .chain(ring.retired.iter())
                    .map(Keypair::verifying_key)
                    .collect()
            },
        )
    }

    /// Retire the active keypair and generate a fresh one. Returns
    /// `(new, retired)`.
    ///
    /// At most one rotation is in flight at a time; signers observe the old
    /// or the new key atomically.
    ///
    /// # Errors
    ///
    /// `Error::KeyMissing` when there is no active key, `Error::Config` when
    /// persistence fails.
    pub async fn rotate(&self) -> Result<(Keypair, Keypair), Error> {
        let _gate = self.gate.lock().await;

        let (fresh, mut outgoing, retired) = {
            let ring = self.read_ring()?;
            let outgoing = ring.active.clone().ok_or(Error::KeyMissing)?;
            (Keypair::generate(ring.next_kid()), outgoing, ring.retired.clone())
        };
        outgoing.status = KeyStatus::Retired;
        outgoing.retired_at = Some(Utc::now());

        let mut all_retired = retired;
        all_retired.push(outgoing.clone());
        self.persist(Some(&fresh), &all_retired).await?;

        self.write_ring(|ring| {
            ring.active = Some(fresh.clone());
            ring.retired = all_retired.clone();
        })?;

        info!(new = %fresh.kid, retired = %outgoing.kid, "rotated signing key");
        Ok((fresh, outgoing))
    }

    /// Export a keypair's public half as an OKP JWK.
    #[must_use]
    pub fn export_jwk(keypair: &Keypair) -> PublicKeyJwk {
        keypair.to_jwk()
    }

    /// Import a verifying key from an OKP JWK.
    ///
    /// # Errors
    ///
    /// `Error::KeyFormatInvalid` when the JWK is not a valid Ed25519 key.
    pub fn import_jwk(jwk: &PublicKeyJwk) -> Result<VerifyingKey, Error> {
        jwk.verifying_key()
    }

    /// The issuer's JWK Set: active key first, then every retired key.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.ring.read().map_or_else(
            |_| Jwks::default(),
            |ring| Jwks {
                keys: ring
                    .active
                    .iter()
                    .chain(ring.retired.iter())
                    .map(Keypair::to_jwk)
                    .collect(),
            },
        )
    }

    /// The issuer's DID document, listing active and retired keys so legacy
    /// CPOEs remain verifiable.
    #[must_use]
    pub fn did_document(&self, did: &str) -> DidDocument {
        let methods: Vec<VerificationMethod> = self.ring.read().map_or_else(
            |_| vec![],
            |ring| {
                ring.active
                    .iter()
                    .chain(ring.retired.iter())
                    .map(|keypair| VerificationMethod {
                        id: format!("{did}#{}", keypair.kid),
                        type_: METHOD_TYPE.to_string(),
                        controller: did.to_string(),
                        public_key_jwk: Some(keypair.to_jwk()),
                    })
                    .collect()
            },
        );
        let ids: Vec<String> = methods.iter().map(|m| m.id.clone()).collect();

        DidDocument {
            context: vec![DID_CONTEXT.to_string()],
            id: did.to_string(),
            verification_method: methods,
            authentication: ids.clone(),
            assertion_method: ids,
        }
    }

    async fn persist(&self, active: Option<&Keypair>, retired: &[Keypair]) -> Result<(), Error> {
        let mut records = Vec::with_capacity(retired.len() + 1);
        if let Some(keypair) = active {
            records.push(encrypt_record(&self.kek, keypair)?);
        }
        for keypair in retired {
            records.push(encrypt_record(&self.kek, keypair)?);
        }
        self.vault
            .save(&records)
            .await
            .map_err(|e| Error::Config(format!("key vault save: {e}")))
    }

    fn read_ring(&self) -> Result<std::sync::RwLockReadGuard<'_, Ring>, Error> {
        self.ring.read().map_err(|_| Error::Config("key ring lock poisoned".into()))
    }

    fn write_ring(&self, mutate: impl FnOnce(&mut Ring)) -> Result<(), Error> {
        let mut ring =
            self.ring.write().map_err(|_| Error::Config("key ring lock poisoned".into()))?;
        mutate(&mut ring);
        Ok(())
    }
}

/// Import a verifying key from PEM/SPKI, as callers supply extra trusted
/// keys.
///
/// # Errors
///
/// `Error::KeyFormatInvalid` on malformed PEM.
pub fn import_public_pem(pem: &str) -> Result<VerifyingKey, Error> {
    VerifyingKey::from_public_key_pem(pem)
        .map_err(|e| Error::KeyFormatInvalid(format!("SPKI decode: {e}")))
}

fn encrypt_record(kek: &KeyEncryptionKey, keypair: &Keypair) -> Result<StoredKey, Error> {
    let cipher = Aes256Gcm::new_from_slice(kek.as_bytes())
        .map_err(|_| Error::Config("key encryption key must be 32 bytes".into()))?;
    let nonce_bytes: [u8; 12] = rng().random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, keypair.signing.to_bytes().as_slice())
        .map_err(|_| Error::Config("private key wrap failed".into()))?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);

    Ok(StoredKey {
        kid: keypair.kid.clone(),
        public_pem: keypair.public_pem()?,
        secret_enc: Base64UrlUnpadded::encode_string(&combined),
        created_at: keypair.created_at,
        status: keypair.status,
        retired_at: keypair.retired_at,
    })
}

fn decrypt_record(kek: &KeyEncryptionKey, record: &StoredKey) -> Result<Keypair, Error> {
    let combined = Base64UrlUnpadded::decode_vec(&record.secret_enc)
        .map_err(|_| Error::KeyFormatInvalid("encrypted key is not base64url".into()))?;
    if combined.len() < 12 {
        return Err(Error::KeyFormatInvalid("encrypted key too short".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(kek.as_bytes())
        .map_err(|_| Error::Config("key encryption key must be 32 bytes".into()))?;
    let nonce = Nonce::from_slice(&combined[..12]);
    let plaintext =
        cipher.decrypt(nonce, &combined[12..]).map_err(|_| Error::KeyDecryptFailed)?;
    let secret: [u8; 32] =
        plaintext.try_into().map_err(|_| Error::KeyFormatInvalid("secret is not 32 bytes".into()))?;

    let signing = SigningKey::from_bytes(&secret);

    // the stored public half must match the decrypted secret
    let expected = import_public_pem(&record.public_pem)?;
    if signing.verifying_key() != expected {
        return Err(Error::KeyFormatInvalid("public key does not match secret".into()));
    }

    Ok(Keypair {
        signing,
        kid: record.kid.clone(),
        created_at: record.created_at,
        status: record.status,
        retired_at: record.retired_at,
    })
}
