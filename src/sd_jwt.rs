//! # Selective Disclosure
//!
//! SD-JWT wrapping of a CPOE: chosen credential-subject fields are replaced
//! by sha-256 digests in `_sd` and carried alongside the JWT as base64url
//! disclosures, `<jwt>~<disclosure₁>~…~<disclosureₙ>~`. The holder presents
//! any subset; the verifier recomputes each digest and restores the
//! disclosed fields.
//!
//! The `type` discriminator is protected and never leaves the signed body.

mod issue;
mod present;
mod verify;

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{Rng, rng};
use serde_json::{Value, json};

use crate::core::canonical;
use crate::error::Error;

pub use self::issue::SdJwtBuilder;
pub use self::present::present;
pub use self::verify::{SdVerification, verify, verify_disclosures};

/// The `_sd_alg` this crate emits and accepts.
pub const SD_ALG: &str = "sha-256";

/// Subject fields that may never be selectively disclosed.
pub const PROTECTED_FIELDS: &[&str] = &["type", "_sd", "_sd_alg"];

/// A claim disclosure.
pub struct Disclosure {
    /// The claim name.
    pub name: String,

    /// The disclosed value.
    pub value: Value,

    salt: String,
}

impl Disclosure {
    /// Create a disclosure with a fresh 128-bit salt.
    #[must_use]
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            salt: Base64UrlUnpadded::encode_string(&rng().random::<[u8; 16]>()),
        }
    }

    /// Decode a wire disclosure, `base64url(json([salt, name, value]))`.
    ///
    /// # Errors
    ///
    /// `Error::DisclosureMismatch` when the segment is not base64url JSON of
    /// a `[salt, name, value]` triple.
    pub fn parse(encoded: &str) -> Result<Self, Error> {
        let bytes = Base64UrlUnpadded::decode_vec(encoded)
            .map_err(|_| Error::DisclosureMismatch("disclosure is not base64url".into()))?;
        let triple: Vec<Value> = serde_json::from_slice(&bytes)
            .map_err(|_| Error::DisclosureMismatch("disclosure is not a JSON array".into()))?;
        let [salt, name, value] = triple.as_slice() else {
            return Err(Error::DisclosureMismatch("disclosure is not a 3-element array".into()));
        };
        let (Some(salt), Some(name)) = (salt.as_str(), name.as_str()) else {
            return Err(Error::DisclosureMismatch("salt and name must be strings".into()));
        };
        Ok(Self { name: name.to_string(), value: value.clone(), salt: salt.to_string() })
    }

    /// `Base64Url` encode the disclosure as a JSON array of the form
    /// `["<b64 salt>","<claim name>",<claim value>]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoding fails.
    pub fn encoded(&self) -> Result<String, Error> {
        let triple = serde_json::to_vec(&json!([self.salt, self.name, self.value]))?;
        Ok(Base64UrlUnpadded::encode_string(&triple))
    }

    /// The disclosure digest: base64url sha-256 over the encoded form.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoding fails.
    pub fn hashed(&self) -> Result<String, Error> {
        Ok(canonical::sha256_b64u(self.encoded()?.as_bytes()))
    }
}

/// Split an SD-JWT into the JWT and its disclosure segments. A trailing `~`
/// is tolerated; empty interior segments are not.
///
/// # Errors
///
/// `Error::InvalidJwt` when the input is empty or has an empty disclosure
/// segment.
pub fn split(input: &str) -> Result<(&str, Vec<&str>), Error> {
    let trimmed = input.strip_suffix('~').unwrap_or(input);
    let mut parts = trimmed.split('~');
    let jwt = parts.next().unwrap_or_default();
    if jwt.is_empty() {
        return Err(Error::InvalidJwt("empty JWT segment".into()));
    }

    let disclosures: Vec<&str> = parts.collect();
    if disclosures.iter().any(|d| d.is_empty()) {
        return Err(Error::InvalidJwt("empty disclosure segment".into()));
    }
    Ok((jwt, disclosures))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn disclosure_round_trip() {
        let disclosure = Disclosure::new("scope", json!("annual audit"));
        let encoded = disclosure.encoded().expect("should encode");

        let parsed = Disclosure::parse(&encoded).expect("should parse");
        assert_eq!(parsed.name, "scope");
        assert_eq!(parsed.value, json!("annual audit"));
        // re-encoding reproduces the same bytes, so digests agree
        assert_eq!(parsed.encoded().expect("encode"), encoded);
        assert_eq!(parsed.hashed().expect("hash"), disclosure.hashed().expect("hash"));
    }

    #[test]
    fn salts_are_fresh() {
        let a = Disclosure::new("scope", json!("x"));
        let b = Disclosure::new("scope", json!("x"));
        assert_ne!(a.hashed().expect("hash"), b.hashed().expect("hash"));
    }

    #[test]
    fn split_forms() {
        let (jwt, ds) = split("a.b.c~d1~d2~").expect("should split");
        assert_eq!(jwt, "a.b.c");
        assert_eq!(ds, vec!["d1", "d2"]);

        // trailing tilde optional on the wire
        let (jwt, ds) = split("a.b.c~d1").expect("should split");
        assert_eq!(jwt, "a.b.c");
        assert_eq!(ds, vec!["d1"]);

        let (jwt, ds) = split("a.b.c").expect("should split");
        assert_eq!(jwt, "a.b.c");
        assert!(ds.is_empty());

        assert!(split("a.b.c~~d").is_err());
        assert!(split("~d").is_err());
    }
}
