//! # Signer
//!
//! Produces and checks the JWT-VC form of a CPOE: `EdDSA` over the
//! base64url signing input `header.payload`, header `typ` of `vc+jwt`, and
//! `kid` of `<issuerDID>#<key>`. Verification also enforces expiry and the
//! fixed credential-subject schema so a structurally hollow CPOE can never
//! report as valid.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer as _, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::TrustConfig;
use crate::core::canonical;
use crate::cpoe::{CpoeClaims, Provenance, SUBJECT_TYPE, Summary};
use crate::error::Error;
use crate::keystore::Keypair;

/// JWT `typ` for CPOE credentials.
pub const JWT_TYP: &str = "vc+jwt";

/// The only signature algorithm the core accepts.
pub const JWT_ALG: &str = "EdDSA";

/// JOSE header of a signed CPOE.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JwsHeader {
    /// Always `EdDSA`.
    pub alg: String,

    /// Always `vc+jwt`.
    pub typ: String,

    /// `<issuerDID>#<kid>`.
    pub kid: String,
}

/// Trust classification of the signature.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum IssuerTier {
    /// Signed by the configured platform DID.
    #[serde(rename = "platform-verified")]
    PlatformVerified,

    /// Signature verified, but the issuer is not the platform.
    #[serde(rename = "self-signed")]
    SelfSigned,

    /// The signature could not be tied to any key.
    #[default]
    #[serde(rename = "unverifiable")]
    Unverifiable,
}

/// How strictly to apply the credential-subject schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaMode {
    /// Every required field must be present.
    Strict,

    /// Required fields may be absent when `_sd` digests remain: the holder
    /// chose not to disclose them.
    SelectiveDisclosure,
}

/// Outcome of verifying a CPOE.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerificationResult {
    /// `true` only when signature, expiry, and schema all hold.
    pub valid: bool,

    /// Why `valid` is `false`: `signature_invalid`, `expired`,
    /// `schema_invalid`, or `evidence_mismatch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// The issuer DID the signature verified under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_by: Option<String>,

    /// Trust classification of the signer.
    pub issuer_tier: IssuerTier,

    /// `iat` of the credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,

    /// `exp` of the credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Evidence provenance, when decodable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,

    /// Control summary, when decodable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,

    /// Credential scope, when decodable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// A JWT decomposed for verification.
#[derive(Clone, Debug)]
pub struct DecodedJwt {
    /// Decoded JOSE header.
    pub header: JwsHeader,

    /// Decoded payload.
    pub payload: Value,

    /// `b64u(header).b64u(payload)`, the bytes the signature covers.
    pub signing_input: String,

    /// The Ed25519 signature.
    pub signature: Signature,
}

/// Sign a CPOE claims payload with the active keypair.
///
/// # Errors
///
/// `Error::InvalidExpiry` when `exp - iat` exceeds the configured ceiling or
/// is not positive; canonicalization errors when the payload contains a
/// float.
pub fn sign(claims: &CpoeClaims, keypair: &Keypair, config: &TrustConfig) -> Result<String, Error> {
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
    sign_payload(&serde_json::to_value(claims)?, keypair, &kid)
}

/// Sign an arbitrary claims payload. Expiry enforcement happens in [`sign`];
/// this is the raw layer used for reduced SD-JWT payloads.
///
/// # Errors
///
/// Canonicalization errors when the payload contains a float.
pub fn sign_payload(payload: &Value, keypair: &Keypair, kid: &str) -> Result<String, Error> {
    let header = JwsHeader {
        alg: JWT_ALG.to_string(),
        typ: JWT_TYP.to_string(),
        kid: kid.to_string(),
    };

    let header_b64 = Base64UrlUnpadded::encode_string(canonical::canonicalize_to(&header)?.as_bytes());
    let payload_b64 = Base64UrlUnpadded::encode_string(canonical::canonicalize(payload)?.as_bytes());
    let signing_input = format!("{header_b64}.{payload_b64}");

    let signature = keypair.signing_key().sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_bytes());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Split and decode a compact JWT.
///
/// # Errors
///
/// `Error::InvalidJwt` on anything other than three base64url segments with
/// a JSON header (alg `EdDSA`), JSON payload, and 64-byte signature.
pub fn decode(jwt: &str) -> Result<DecodedJwt, Error> {
    let segments: Vec<&str> = jwt.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::InvalidJwt(format!("{} segments, expected 3", segments.len())));
    }

    let header_bytes = Base64UrlUnpadded::decode_vec(segments[0])
        .map_err(|_| Error::InvalidJwt("header is not base64url".into()))?;
    let header: JwsHeader = serde_json::from_slice(&header_bytes)
        .map_err(|_| Error::InvalidJwt("header is not a JOSE header".into()))?;
    if header.alg != JWT_ALG {
        return Err(Error::InvalidJwt(format!("unsupported alg {}", header.alg)));
    }

    let payload_bytes = Base64UrlUnpadded::decode_vec(segments[1])
        .map_err(|_| Error::InvalidJwt("payload is not base64url".into()))?;
    let payload: Value = serde_json::from_slice(&payload_bytes)
        .map_err(|_| Error::InvalidJwt("payload is not JSON".into()))?;

    let signature_bytes = Base64UrlUnpadded::decode_vec(segments[2])
        .map_err(|_| Error::InvalidJwt("signature is not base64url".into()))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| Error::InvalidJwt("signature is not 64 bytes".into()))?;

    Ok(DecodedJwt {
        header,
        payload,
        signing_input: format!("{}.{}", segments[0], segments[1]),
        signature,
    })
}

/// Verify a CPOE JWT against a set of candidate keys, first match wins.
///
/// Signature, expiry, and schema failures come back as a populated result
/// with `valid = false`; only malformed input is an `Err`.
///
/// # Errors
///
/// `Error::InvalidJwt` when the input cannot be decoded at all.
pub fn verify(
    jwt: &str, keys: &[VerifyingKey], config: &TrustConfig, mode: SchemaMode,
) -> Result<VerificationResult, Error> {
    let decoded = decode(jwt)?;
    verify_decoded(&decoded, keys, config, mode)
}

/// [`verify`] over an already-decoded JWT.
///
/// # Errors
///
/// `Error::InvalidJwt` when the payload claims are structurally unusable.
pub fn verify_decoded(
    decoded: &DecodedJwt, keys: &[VerifyingKey], config: &TrustConfig, mode: SchemaMode,
) -> Result<VerificationResult, Error> {
    let payload = &decoded.payload;
    let iss = payload.get("iss").and_then(Value::as_str).map(ToString::to_string);
    let generated_at =
        payload.get("iat").and_then(Value::as_i64).and_then(|s| DateTime::from_timestamp(s, 0));
    let expires_at =
        payload.get("exp").and_then(Value::as_i64).and_then(|s| DateTime::from_timestamp(s, 0));

    let subject = payload.pointer("/vc/credentialSubject").cloned().unwrap_or(Value::Null);
    let mut result = VerificationResult {
        valid: false,
        reason: None,
        signed_by: None,
        issuer_tier: IssuerTier::Unverifiable,
        generated_at,
        expires_at,
        provenance: subject
            .get("provenance")
            .and_then(|p| serde_json::from_value(p.clone()).ok()),
        summary: subject.get("summary").and_then(|s| serde_json::from_value(s.clone()).ok()),
        scope: subject.get("scope").and_then(Value::as_str).map(ToString::to_string),
    };

    let signed = keys
        .iter()
        .any(|key| key.verify(decoded.signing_input.as_bytes(), &decoded.signature).is_ok());
    if !signed {
        debug!("no candidate key verified the signature");
        result.reason = Some("signature_invalid".to_string());
        return Ok(result);
    }

    result.signed_by.clone_from(&iss);
    result.issuer_tier = if iss.as_deref() == Some(config.platform_did.as_str()) {
        IssuerTier::PlatformVerified
    } else {
        IssuerTier::SelfSigned
    };

    match expires_at {
        Some(exp) if exp > Utc::now() => {}
        _ => {
            result.reason = Some("expired".to_string());
            return Ok(result);
        }
    }

    if let Err(problem) = check_subject_schema(&subject, mode) {
        debug!("schema check failed: {problem}");
        result.reason = Some("schema_invalid".to_string());
        return Ok(result);
    }

    result.valid = true;
    Ok(result)
}

/// Enforce the fixed credential-subject schema.
fn check_subject_schema(subject: &Value, mode: SchemaMode) -> Result<(), String> {
    if !subject.is_object() {
        return Err("credentialSubject missing".to_string());
    }
    if subject.get("type").and_then(Value::as_str) != Some(SUBJECT_TYPE) {
        return Err(format!("type is not {SUBJECT_TYPE}"));
    }

    // under selective disclosure, an absent field may be hidden behind a
    // remaining digest rather than missing
    let hidden = mode == SchemaMode::SelectiveDisclosure
        && subject.get("_sd").and_then(Value::as_array).is_some_and(|sd| !sd.is_empty());

    match subject.get("scope") {
        Some(scope) if scope.is_string() => {}
        Some(_) => return Err("scope is not a string".to_string()),
        None if hidden => {}
        None => return Err("scope missing".to_string()),
    }

    match subject.get("provenance") {
        Some(provenance) => {
            let source = provenance.get("source").and_then(Value::as_str);
            if !matches!(source, Some("self" | "tool" | "auditor")) {
                return Err("provenance.source missing or unknown".to_string());
            }
        }
        None if hidden => {}
        None => return Err("provenance missing".to_string()),
    }

    match subject.get("summary") {
        Some(summary) => {
            let parsed: Summary = serde_json::from_value(summary.clone())
                .map_err(|_| "summary fields missing or not integers".to_string())?;
            for field in ["controlsTested", "controlsPassed", "controlsFailed", "overallScore"] {
                if summary.get(field).and_then(Value::as_u64).is_none() {
                    return Err(format!("summary.{field} missing"));
                }
            }
            if !parsed.is_consistent() {
                return Err("summary arithmetic does not hold".to_string());
            }
        }
        None if hidden => {}
        None => return Err("summary missing".to_string()),
    }

    Ok(())
}
