//! # DID Support
//!
//! `did:web` identifiers, the DID document and JWKS trust-anchor shapes, and
//! resolution of an issuer DID to its Ed25519 verification key.
//!
//! A `did:web:<domain>[:<path>…]` identifier maps to
//! `https://<domain>/.well-known/did.json` (or `https://<domain>/<path>/did.json`
//! when path segments are present). The hosted document carries the issuer's
//! public keys; anyone can verify a CPOE against it without contacting the
//! issuing platform.

pub mod resolver;

use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use self::resolver::{DidResolver, WebResolver};

/// JSON-LD context of a DID document.
pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";

/// Verification method type used for Ed25519 JWKs.
pub const METHOD_TYPE: &str = "JsonWebKey2020";

/// A public key in JWK form. Only OKP/Ed25519 keys are meaningful to this
/// crate; other key types are carried opaquely and skipped during selection.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PublicKeyJwk {
    /// Key type, `OKP` for Ed25519.
    pub kty: String,

    /// Curve, `Ed25519`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// Base64url-encoded public key bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// Key identifier, e.g. `key-1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Intended use, `sig` for signing keys.
    #[serde(rename = "use")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    /// Algorithm, `EdDSA`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

impl PublicKeyJwk {
    /// `true` when the JWK is an Ed25519 signing key.
    #[must_use]
    pub fn is_ed25519(&self) -> bool {
        self.kty == "OKP" && self.crv.as_deref() == Some("Ed25519")
    }

    /// Decode the JWK into a verifying key.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyFormatInvalid` when the key is not OKP/Ed25519 or
    /// the `x` coordinate does not decode to 32 bytes.
    pub fn verifying_key(&self) -> Result<VerifyingKey, Error> {
        if !self.is_ed25519() {
            return Err(Error::KeyFormatInvalid("JWK is not an Ed25519 key".into()));
        }
        let x = self.x.as_deref().ok_or_else(|| {
            Error::KeyFormatInvalid("JWK has no `x` coordinate".into())
        })?;
        let bytes = Base64UrlUnpadded::decode_vec(x)
            .map_err(|_| Error::KeyFormatInvalid("JWK `x` is not base64url".into()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::KeyFormatInvalid("JWK `x` is not 32 bytes".into()))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|_| Error::KeyFormatInvalid("JWK `x` is not a valid curve point".into()))
    }

    /// Encode a verifying key as an OKP JWK.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: Some("Ed25519".to_string()),
            x: Some(Base64UrlUnpadded::encode_string(key.as_bytes())),
            kid: Some(kid.into()),
            use_: Some("sig".to_string()),
            alg: Some("EdDSA".to_string()),
        }
    }
}

/// A JWK Set, served at the issuer's JWKS endpoint. The active key is listed
/// first, followed by every retired key.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Jwks {
    /// The keys.
    pub keys: Vec<PublicKeyJwk>,
}

/// A single verification method of a DID document.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationMethod {
    /// Method id, `<did>#<kid>`.
    pub id: String,

    /// Method type, `JsonWebKey2020` for keys this crate produces.
    #[serde(rename = "type")]
    pub type_: String,

    /// The DID that controls the key.
    pub controller: String,

    /// The public key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_jwk: Option<PublicKeyJwk>,
}

/// A DID document, fetched from `https://<domain>/.well-known/did.json` or
/// produced as the platform's own trust anchor.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DidDocument {
    /// JSON-LD contexts.
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// The DID itself.
    pub id: String,

    /// Public keys bound to the DID.
    pub verification_method: Vec<VerificationMethod>,

    /// Verification-method ids usable for authentication.
    pub authentication: Vec<String>,

    /// Verification-method ids usable for assertions (CPOE signatures).
    pub assertion_method: Vec<String>,
}

impl DidDocument {
    /// The first verification method carrying an Ed25519 JWK.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoSuitableKey` when the document has no Ed25519
    /// method, or `Error::InvalidDidDocument` when it has none at all.
    pub fn ed25519_method(&self) -> Result<&VerificationMethod, Error> {
        if self.verification_method.is_empty() {
            return Err(Error::InvalidDidDocument("no verification methods".into()));
        }
        self.verification_method
            .iter()
            .find(|vm| vm.public_key_jwk.as_ref().is_some_and(PublicKeyJwk::is_ed25519))
            .ok_or(Error::NoSuitableKey)
    }

    /// The verification method matching a JWT `kid` of form `<did>#<fragment>`.
    /// Falls back to matching the bare fragment against method id suffixes.
    #[must_use]
    pub fn method_for_kid(&self, kid: &str) -> Option<&VerificationMethod> {
        let fragment = kid.rsplit_once('#').map_or(kid, |(_, f)| f);
        self.verification_method
            .iter()
            .find(|vm| vm.id == kid || vm.id.rsplit_once('#').is_some_and(|(_, f)| f == fragment))
    }
}

/// Translate a `did:web` identifier into the HTTPS URL of its DID document.
///
/// # Errors
///
/// Returns `Error::DidResolution` when the identifier is not `did:web` or
/// contains characters that cannot appear in a host or path segment.
pub fn url_for(did: &str) -> Result<String, Error> {
    let Some(rest) = did.strip_prefix("did:web:") else {
        return Err(Error::DidResolution(format!("unsupported DID method: {did}")));
    };

    let mut parts = rest.split(':');
    let domain = parts.next().unwrap_or_default();
    if domain.is_empty()
        || !domain.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(Error::DidResolution(format!("invalid did:web domain: {domain}")));
    }

    let path: Vec<&str> = parts.collect();
    for segment in &path {
        if segment.is_empty()
            || !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::DidResolution(format!("invalid did:web path segment: {segment}")));
        }
    }

    if path.is_empty() {
        Ok(format!("https://{domain}/.well-known/did.json"))
    } else {
        Ok(format!("https://{domain}/{}/did.json", path.join("/")))
    }
}
