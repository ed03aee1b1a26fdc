//! Verifier-side reconstruction: check every presented disclosure against
//! the `_sd` digests and restore the disclosed fields into the subject.

use ed25519_dalek::VerifyingKey;
use serde_json::{Map, Value};

use super::{Disclosure, split};
use crate::config::TrustConfig;
use crate::core::canonical;
use crate::error::Error;
use crate::signer::{self, SchemaMode, VerificationResult};

/// Result of reconstructing an SD-JWT.
#[derive(Clone, Debug, Default)]
pub struct SdVerification {
    /// The full claims payload with disclosed fields restored and the `_sd`
    /// bookkeeping removed.
    pub claims: Value,

    /// The fields the holder disclosed, by name.
    pub disclosed: Map<String, Value>,

    /// Digests the holder chose not to disclose. Surfaced so callers can
    /// report "N hidden claims".
    pub undisclosed_digests: Vec<String>,
}

/// Check presented disclosures against a decoded JWT payload and restore
/// them into the credential subject.
///
/// The payload's signature must already be verified; this only establishes
/// that each disclosure belongs to the signed `_sd` set.
///
/// # Errors
///
/// `Error::DisclosureMismatch` when a disclosure does not decode or its
/// digest is not in `_sd`.
pub fn verify_disclosures(payload: &Value, disclosures: &[&str]) -> Result<SdVerification, Error> {
    let mut claims = payload.clone();
    let Some(subject) = claims.pointer_mut("/vc/credentialSubject").and_then(Value::as_object_mut)
    else {
        return Err(Error::SchemaInvalid("credentialSubject missing".into()));
    };

    let sd: Vec<String> = subject
        .get("_sd")
        .and_then(Value::as_array)
        .map(|digests| {
            digests.iter().filter_map(Value::as_str).map(ToString::to_string).collect()
        })
        .unwrap_or_default();

    if !disclosures.is_empty() && sd.is_empty() {
        return Err(Error::DisclosureMismatch("credential has no `_sd` digests".into()));
    }

    let mut disclosed = Map::new();
    let mut matched = vec![false; sd.len()];
    for encoded in disclosures {
        let digest = canonical::sha256_b64u(encoded.as_bytes());
        let Some(position) = sd.iter().position(|candidate| candidate == &digest) else {
            return Err(Error::DisclosureMismatch("digest not present in `_sd`".into()));
        };
        matched[position] = true;

        let disclosure = Disclosure::parse(encoded)?;
        subject.insert(disclosure.name.clone(), disclosure.value.clone());
        disclosed.insert(disclosure.name, disclosure.value);
    }

    let undisclosed_digests: Vec<String> = sd
        .iter()
        .zip(&matched)
        .filter(|(_, was_matched)| !**was_matched)
        .map(|(digest, _)| digest.clone())
        .collect();

    subject.remove("_sd");
    subject.remove("_sd_alg");

    Ok(SdVerification { claims, disclosed, undisclosed_digests })
}

/// Verify an SD-JWT end to end against known keys: JWT signature and expiry
/// first, then disclosure digests.
///
/// # Errors
///
/// `Error::InvalidJwt` on malformed input, `Error::DisclosureMismatch` on a
/// tampered or foreign disclosure.
pub fn verify(
    input: &str, keys: &[VerifyingKey], config: &TrustConfig,
) -> Result<(VerificationResult, SdVerification), Error> {
    let (jwt, disclosures) = split(input)?;
    let decoded = signer::decode(jwt)?;
    let result =
        signer::verify_decoded(&decoded, keys, config, SchemaMode::SelectiveDisclosure)?;
    let reconstruction = verify_disclosures(&decoded.payload, &disclosures)?;
    Ok((result, reconstruction))
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn reduced_payload(disclosure: &Disclosure) -> Value {
        json!({
            "iss": "did:web:corsair.example",
            "vc": {"credentialSubject": {
                "type": "CorsairCPOE",
                "_sd": [disclosure.hashed().expect("hash")],
                "_sd_alg": "sha-256"
            }}
        })
    }

    #[test]
    fn restores_disclosed_field() {
        let disclosure = Disclosure::new("scope", json!("annual audit"));
        let payload = reduced_payload(&disclosure);
        let encoded = disclosure.encoded().expect("encode");

        let reconstruction =
            verify_disclosures(&payload, &[encoded.as_str()]).expect("should verify");
        assert_eq!(
            reconstruction.claims["vc"]["credentialSubject"]["scope"],
            json!("annual audit")
        );
        assert_eq!(reconstruction.disclosed.len(), 1);
        assert!(reconstruction.undisclosed_digests.is_empty());
        assert!(reconstruction.claims["vc"]["credentialSubject"].get("_sd").is_none());
    }

    #[test]
    fn counts_hidden_claims() {
        let disclosure = Disclosure::new("scope", json!("annual audit"));
        let payload = reduced_payload(&disclosure);

        let reconstruction = verify_disclosures(&payload, &[]).expect("should verify");
        assert!(reconstruction.disclosed.is_empty());
        assert_eq!(reconstruction.undisclosed_digests.len(), 1);
    }

    #[test]
    fn tampered_disclosure_rejected() {
        let disclosure = Disclosure::new("scope", json!("annual audit"));
        let payload = reduced_payload(&disclosure);

        let tampered = Disclosure::new("scope", json!("everything passed"))
            .encoded()
            .expect("encode");
        let err = verify_disclosures(&payload, &[tampered.as_str()])
            .expect_err("tamper must be detected");
        assert!(matches!(err, Error::DisclosureMismatch(_)));
    }

    #[test]
    fn foreign_disclosure_rejected() {
        let payload = json!({
            "vc": {"credentialSubject": {"type": "CorsairCPOE"}}
        });
        let stray = Disclosure::new("scope", json!("x")).encoded().expect("encode");
        assert!(matches!(
            verify_disclosures(&payload, &[stray.as_str()]),
            Err(Error::DisclosureMismatch(_))
        ));
    }
}
