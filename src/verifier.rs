//! # Verifier
//!
//! Orchestrates full CPOE verification: input splitting, key selection via
//! DID resolution with a trusted-set fallback, signature/expiry/schema
//! checks, selective-disclosure reconstruction, and the optional policy,
//! receipt-chain, and input-binding checks.
//!
//! The verifier is assembled at construction from concrete collaborators —
//! a resolver and a trusted-key source — so a single verify call reads one
//! consistent snapshot of the trusted set.

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::VerifyingKey;
use ed25519_dalek::Verifier as _;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::TrustConfig;
use crate::cpoe::Summary;
use crate::did::DidResolver;
use crate::error::Error;
use crate::keystore::{KeyStore, KeyVault};
use crate::policy::{self, PolicyInput, PolicyOutcome, PolicySet};
use crate::receipt::{self, ChainVerification, ProcessReceipt};
use crate::sd_jwt;
use crate::signer::{self, DecodedJwt, IssuerTier, SchemaMode, VerificationResult};

/// A snapshot source of trusted verifying keys: the platform's active and
/// retired keys, in trust order.
pub trait KeySource: Send + Sync {
    /// A consistent snapshot of the trusted keys.
    fn trusted_keys(&self) -> Vec<VerifyingKey>;
}

impl<V: KeyVault> KeySource for KeyStore<V> {
    fn trusted_keys(&self) -> Vec<VerifyingKey> {
        Self::trusted_keys(self)
    }
}

impl KeySource for Vec<VerifyingKey> {
    fn trusted_keys(&self) -> Vec<VerifyingKey> {
        self.clone()
    }
}

impl<T: KeySource + ?Sized> KeySource for Arc<T> {
    fn trusted_keys(&self) -> Vec<VerifyingKey> {
        (**self).trusted_keys()
    }
}

/// Optional checks and context for a verify call.
#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    /// Policy predicates to evaluate after cryptographic verification.
    pub policy: Option<PolicySet>,

    /// Process receipts to verify against the CPOE's claimed chain digest.
    pub receipts: Option<Vec<ProcessReceipt>>,

    /// Hex sha-256 of the evidence document the caller holds; must equal
    /// `provenance.sourceDocument`.
    pub source_document_hash: Option<String>,

    /// Extra caller-supplied trusted keys, tried after the platform set.
    pub extra_keys: Vec<VerifyingKey>,

    /// Cancellation for the DID resolution leg.
    pub cancel: CancellationToken,
}

/// The full verification report.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// Signature, expiry, schema, and tier outcome.
    #[serde(flatten)]
    pub result: VerificationResult,

    /// Digests the holder chose not to disclose.
    pub hidden_claim_count: usize,

    /// Fields the holder disclosed, by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disclosed: Option<Map<String, Value>>,

    /// Policy outcome, when a policy was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyOutcome>,

    /// Receipt-chain outcome, when receipts were supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_chain: Option<ChainVerification>,
}

/// CPOE verification pipeline.
pub struct Verifier<R: DidResolver, K: KeySource> {
    config: TrustConfig,
    resolver: R,
    keys: K,
}

impl<R: DidResolver, K: KeySource> Verifier<R, K> {
    /// Assemble a verifier from its collaborators.
    pub const fn new(config: TrustConfig, resolver: R, keys: K) -> Self {
        Self { config, resolver, keys }
    }

    /// Verify a CPOE in JWT or SD-JWT form.
    ///
    /// Signature, expiry, schema, and binding failures come back as a
    /// populated report with `valid = false`.
    ///
    /// # Errors
    ///
    /// `Error::OversizeInput` past the configured ceiling,
    /// `Error::InvalidJwt` on malformed input, `Error::DisclosureMismatch`
    /// on a tampered or foreign disclosure.
    pub async fn verify(
        &self, input: &str, options: &VerifyOptions,
    ) -> Result<VerificationReport, Error> {
        if input.len() > self.config.max_cpoe_bytes {
            return Err(Error::OversizeInput {
                size: input.len(),
                limit: self.config.max_cpoe_bytes,
            });
        }

        let (jwt, disclosures) = sd_jwt::split(input)?;
        let decoded = signer::decode(jwt)?;

        let has_sd = decoded
            .payload
            .pointer("/vc/credentialSubject/_sd")
            .and_then(Value::as_array)
            .is_some_and(|sd| !sd.is_empty());
        let mode = if has_sd || !disclosures.is_empty() {
            SchemaMode::SelectiveDisclosure
        } else {
            SchemaMode::Strict
        };

        // DID-based verification first, trusted set as fallback
        let (did_outcome, did_key) = match self.did_path(&decoded, mode, &options.cancel).await {
            Ok((outcome, key)) => (Some(outcome), Some(key)),
            Err(e) => {
                warn!("DID verification path unavailable: {e}");
                (None, None)
            }
        };

        let mut trusted_keys = self.keys.trusted_keys();
        trusted_keys.extend(options.extra_keys.iter().copied());
        let trusted_outcome =
            signer::verify_decoded(&decoded, &trusted_keys, &self.config, mode)?;

        // prefer the trusted-key outcome when it validates or when the DID
        // path could not tie the signature to a key
        let mut result = if trusted_outcome.valid {
            trusted_outcome
        } else {
            match did_outcome {
                Some(outcome) if outcome.valid || outcome.issuer_tier != IssuerTier::Unverifiable => {
                    outcome
                }
                _ => trusted_outcome,
            }
        };

        // reconstruct disclosed fields, then surface them in the result
        let reconstruction = if has_sd || !disclosures.is_empty() {
            sd_jwt::verify_disclosures(&decoded.payload, &disclosures)?
        } else {
            sd_jwt::SdVerification {
                claims: decoded.payload.clone(),
                ..sd_jwt::SdVerification::default()
            }
        };
        let subject = reconstruction
            .claims
            .pointer("/vc/credentialSubject")
            .cloned()
            .unwrap_or(Value::Null);
        enrich_result(&mut result, &subject);

        // input binding: the caller's document hash must match provenance
        if let Some(expected) = &options.source_document_hash {
            let bound = result
                .provenance
                .as_ref()
                .and_then(|p| p.source_document.as_ref())
                .is_some_and(|actual| actual == expected);
            if !bound {
                debug!("source document binding failed");
                result.valid = false;
                result.reason = Some("evidence_mismatch".to_string());
            }
        }

        // the chain key is selected by the same policy as the signature:
        // trusted set first, then the DID-resolved key
        let mut chain_keys = trusted_keys;
        chain_keys.extend(did_key);
        let receipt_chain = match &options.receipts {
            Some(receipts) => Some(check_chain(receipts, &subject, &decoded, &chain_keys)?),
            None => None,
        };

        let policy = options.policy.as_ref().map(|policy_set| {
            let frameworks: Vec<String> = subject
                .get("frameworks")
                .and_then(Value::as_object)
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default();
            let has_receipts = subject.get("processProvenance").is_some();
            let input = PolicyInput::from_result(&result, frameworks, has_receipts);
            policy::evaluate(policy_set, &input)
        });

        Ok(VerificationReport {
            result,
            hidden_claim_count: reconstruction.undisclosed_digests.len(),
            disclosed: (!reconstruction.disclosed.is_empty()).then_some(reconstruction.disclosed),
            policy,
            receipt_chain,
        })
    }

    /// Resolve the header `kid` through the DID document and verify with
    /// that single key.
    async fn did_path(
        &self, decoded: &DecodedJwt, mode: SchemaMode, cancel: &CancellationToken,
    ) -> Result<(VerificationResult, VerifyingKey), Error> {
        let kid = &decoded.header.kid;
        let did = kid.split('#').next().unwrap_or_default();
        if !did.starts_with("did:") {
            return Err(Error::DidResolution(format!("kid {kid} carries no DID")));
        }

        let timeout = Duration::from_millis(self.config.did_resolve_timeout_ms);
        let document = tokio::select! {
            () = cancel.cancelled() => {
                return Err(Error::DidResolution("resolution cancelled".into()));
            }
            resolved = tokio::time::timeout(timeout, self.resolver.resolve(did)) => resolved
                .map_err(|_| Error::DidResolution(format!("resolving {did} timed out")))?
                .map_err(|e| Error::DidResolution(e.to_string()))?,
        };

        let method = document.method_for_kid(kid).ok_or(Error::NoSuitableKey)?;
        let jwk = method.public_key_jwk.as_ref().ok_or(Error::NoSuitableKey)?;
        let key = jwk.verifying_key()?;

        Ok((signer::verify_decoded(decoded, &[key], &self.config, mode)?, key))
    }
}

/// Verify supplied receipts against the CPOE's claimed chain digest, using
/// the key that satisfied the signature.
fn check_chain(
    receipts: &[ProcessReceipt], subject: &Value, decoded: &DecodedJwt,
    candidate_keys: &[VerifyingKey],
) -> Result<ChainVerification, Error> {
    let claimed = subject
        .pointer("/processProvenance/chainDigest")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let signer_key = candidate_keys
        .iter()
        .find(|key| key.verify(decoded.signing_input.as_bytes(), &decoded.signature).is_ok());
    match signer_key {
        Some(key) => receipt::verify_chain(receipts, claimed, key),
        None => {
            #[allow(clippy::cast_possible_truncation)]
            let receipts_total = receipts.len() as u32;
            Ok(ChainVerification {
                chain_valid: false,
                receipts_total,
                ..ChainVerification::default()
            })
        }
    }
}

/// Fill result fields that only became available after disclosure
/// reconstruction, and re-check the summary invariants over disclosed data.
fn enrich_result(result: &mut VerificationResult, subject: &Value) {
    if result.scope.is_none() {
        result.scope = subject.get("scope").and_then(Value::as_str).map(ToString::to_string);
    }
    if result.provenance.is_none() {
        result.provenance =
            subject.get("provenance").and_then(|p| serde_json::from_value(p.clone()).ok());
    }
    if result.summary.is_none() {
        if let Some(value) = subject.get("summary") {
            match serde_json::from_value::<Summary>(value.clone()) {
                Ok(summary) if summary.is_consistent() => result.summary = Some(summary),
                _ if result.valid => {
                    result.valid = false;
                    result.reason = Some("schema_invalid".to_string());
                }
                _ => {}
            }
        }
    }
}
