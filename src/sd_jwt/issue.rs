//! SD-JWT issuance: replace chosen subject fields with `_sd` digests and
//! sign the reduced credential.

use serde_json::Value;

use super::{Disclosure, PROTECTED_FIELDS, SD_ALG};
use crate::config::TrustConfig;
use crate::cpoe::CpoeClaims;
use crate::error::Error;
use crate::keystore::Keypair;
use crate::signer;

/// Builds the SD-JWT form of a CPOE.
#[derive(Debug, Default)]
pub struct SdJwtBuilder {
    claims: Option<CpoeClaims>,
    disclosable: Vec<String>,
}

impl SdJwtBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The claims payload to wrap.
    #[must_use]
    pub fn claims(mut self, claims: CpoeClaims) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Mark a subject field as disclosable. The `type` discriminator is
    /// protected and ignored here; fields absent from the subject are
    /// skipped.
    #[must_use]
    pub fn disclosable(mut self, field: impl Into<String>) -> Self {
        self.disclosable.push(field.into());
        self
    }

    /// Sign the reduced credential and emit `jwt~d₁~…~dₙ~`.
    ///
    /// # Errors
    ///
    /// `Error::SchemaInvalid` when no claims were supplied,
    /// `Error::InvalidExpiry` when the claims' lifetime breaches the
    /// configured ceiling.
    pub fn build(self, keypair: &Keypair, config: &TrustConfig) -> Result<String, Error> {
        let claims = self.claims.ok_or_else(|| Error::SchemaInvalid("claims are required".into()))?;

        let lifetime = (claims.exp - claims.iat).num_seconds();
        if lifetime <= 0 {
            return Err(Error::InvalidExpiry("expiry precedes issuance".into()));
        }
        if lifetime > config.max_expiry_secs() {
            return Err(Error::InvalidExpiry(format!(
                "lifetime of {lifetime}s exceeds {} days",
                config.max_expiry_days
            )));
        }

        let kid = format!("{}#{}", claims.iss, keypair.kid);
        let mut payload = serde_json::to_value(&claims)?;
        let Some(subject) =
            payload.pointer_mut("/vc/credentialSubject").and_then(Value::as_object_mut)
        else {
            return Err(Error::SchemaInvalid("credentialSubject missing".into()));
        };

        let mut digests = vec![];
        let mut encoded_disclosures = vec![];
        for field in &self.disclosable {
            if PROTECTED_FIELDS.contains(&field.as_str()) {
                continue;
            }
            let Some(value) = subject.remove(field) else {
                continue;
            };
            let disclosure = Disclosure::new(field, value);
            digests.push(disclosure.hashed()?);
            encoded_disclosures.push(disclosure.encoded()?);
        }

        if !digests.is_empty() {
            subject.insert("_sd".to_string(), Value::from(digests));
            subject.insert("_sd_alg".to_string(), Value::from(SD_ALG));
        }

        let jwt = signer::sign_payload(&payload, keypair, &kid)?;
        let mut out = jwt;
        for disclosure in &encoded_disclosures {
            out.push('~');
            out.push_str(disclosure);
        }
        out.push('~');
        Ok(out)
    }
}
