//! # Process Receipts
//!
//! Hash-linked, signed records of the pipeline that produced a CPOE. Each
//! receipt binds the canonical hash of its step's input and output and the
//! hash of the previous receipt; the digest over the whole chain is stamped
//! into the CPOE's `processProvenance` so a verifier can prove the
//! generating pipeline was not rewritten after the fact.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer as _, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use base64ct::{Base64UrlUnpadded, Encoding};

use crate::core::canonical;
use crate::cpoe::ProcessProvenance;
use crate::error::Error;
use crate::keystore::Keypair;

/// `prevHash` of the first receipt: 32 zero bytes, hex.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// A single signed step record.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReceipt {
    /// Step name, e.g. `normalize-evidence`.
    pub step: String,

    /// Hex sha-256 of the step's canonical input.
    pub input_hash: String,

    /// Hex sha-256 of the step's canonical output.
    pub output_hash: String,

    /// When the step completed.
    pub timestamp: DateTime<Utc>,

    /// Hex sha-256 of the previous receipt's canonical form, or
    /// [`GENESIS_HASH`] for the first receipt.
    pub prev_hash: String,

    /// Whether re-running the step reproduces the output byte for byte.
    pub reproducible: bool,

    /// Optional environment attestation for the step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<String>,

    /// Base64url Ed25519 signature over the canonical receipt without this
    /// field.
    pub signature: String,
}

impl ProcessReceipt {
    /// The canonical form the signature covers: every field except
    /// `signature`.
    fn canonical_unsigned(&self) -> Result<String, Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("signature");
        }
        canonical::canonicalize(&value)
    }

    /// Hex sha-256 over the full canonical receipt, signature included.
    /// This is what the next receipt links to.
    pub fn record_hash(&self) -> Result<String, Error> {
        Ok(canonical::sha256_hex(canonical::canonicalize_to(self)?.as_bytes()))
    }

    fn verify_signature(&self, key: &VerifyingKey) -> bool {
        let Ok(canonical_form) = self.canonical_unsigned() else {
            return false;
        };
        let Ok(bytes) = Base64UrlUnpadded::decode_vec(&self.signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        key.verify(canonical_form.as_bytes(), &signature).is_ok()
    }
}

/// Outcome of verifying a receipt chain against a CPOE's claimed digest.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainVerification {
    /// Links, signatures, and digest all hold.
    pub chain_valid: bool,

    /// Receipts whose signature verified.
    pub receipts_verified: u32,

    /// Receipts supplied.
    pub receipts_total: u32,

    /// Receipts flagged reproducible.
    pub reproducible_steps: u32,

    /// Receipts carrying an attestation.
    pub attested_steps: u32,

    /// The recomputed chain digest.
    pub chain_digest: String,
}

/// An append-only chain of process receipts. Single writer per chain; the
/// exclusive borrow on [`Self::append`] enforces ordering.
#[derive(Clone, Debug, Default)]
pub struct ReceiptChain {
    receipts: Vec<ProcessReceipt>,
}

impl ReceiptChain {
    /// Start an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The receipts appended so far.
    #[must_use]
    pub fn receipts(&self) -> &[ProcessReceipt] {
        &self.receipts
    }

    /// Record a completed step, linking and signing it.
    ///
    /// # Errors
    ///
    /// Canonicalization errors when the step input or output contains a
    /// float.
    pub fn append(
        &mut self, step: impl Into<String>, input: &Value, output: &Value, reproducible: bool,
        attestation: Option<String>, keypair: &Keypair,
    ) -> Result<&ProcessReceipt, Error> {
        let prev_hash = match self.receipts.last() {
            Some(prev) => prev.record_hash()?,
            None => GENESIS_HASH.to_string(),
        };

        let mut receipt = ProcessReceipt {
            step: step.into(),
            input_hash: canonical::sha256_hex(canonical::canonicalize(input)?.as_bytes()),
            output_hash: canonical::sha256_hex(canonical::canonicalize(output)?.as_bytes()),
            timestamp: Utc::now(),
            prev_hash,
            reproducible,
            attestation,
            signature: String::new(),
        };

        let signature = keypair.signing_key().sign(receipt.canonical_unsigned()?.as_bytes());
        receipt.signature = Base64UrlUnpadded::encode_string(&signature.to_bytes());

        self.receipts.push(receipt);
        Ok(self.receipts.last().unwrap_or_else(|| unreachable!("just pushed")))
    }

    /// Digest over the whole chain: sha-256 of the concatenated receipt
    /// hashes, hex.
    ///
    /// # Errors
    ///
    /// Propagates canonicalization failures.
    pub fn chain_digest(&self) -> Result<String, Error> {
        chain_digest(&self.receipts)
    }

    /// The `processProvenance` block to stamp into a CPOE.
    ///
    /// # Errors
    ///
    /// Propagates canonicalization failures.
    #[allow(clippy::cast_possible_truncation)]
    pub fn process_provenance(&self) -> Result<ProcessProvenance, Error> {
        Ok(ProcessProvenance {
            chain_digest: self.chain_digest()?,
            receipt_count: self.receipts.len() as u32,
            chain_verified: true,
            reproducible_steps: self.receipts.iter().filter(|r| r.reproducible).count() as u32,
            attested_steps: self.receipts.iter().filter(|r| r.attestation.is_some()).count()
                as u32,
        })
    }
}

/// Digest over an arbitrary receipt slice.
///
/// # Errors
///
/// Propagates canonicalization failures.
pub fn chain_digest(receipts: &[ProcessReceipt]) -> Result<String, Error> {
    let mut concatenated = Vec::with_capacity(receipts.len() * 32);
    for receipt in receipts {
        let record_hex = receipt.record_hash()?;
        let record = hex::decode(&record_hex)
            .map_err(|_| Error::ChainBroken("receipt hash is not hex".into()))?;
        concatenated.extend_from_slice(&record);
    }
    Ok(canonical::sha256_hex(&concatenated))
}

/// Verify a receipt chain end to end: every `prevHash` link, every
/// signature, and the recomputed digest against the CPOE's claim.
///
/// A digest mismatch marks the chain invalid on its own; signature counts
/// are still reported so callers can see which checks failed.
///
/// # Errors
///
/// Propagates canonicalization failures; all verification outcomes are
/// reported in the result.
#[allow(clippy::cast_possible_truncation)]
pub fn verify_chain(
    receipts: &[ProcessReceipt], claimed_digest: &str, key: &VerifyingKey,
) -> Result<ChainVerification, Error> {
    let mut links_ok = true;
    let mut expected_prev = GENESIS_HASH.to_string();
    for receipt in receipts {
        if receipt.prev_hash != expected_prev {
            links_ok = false;
        }
        expected_prev = receipt.record_hash()?;
    }

    let recomputed = chain_digest(receipts)?;
    let digest_ok = recomputed == claimed_digest;

    let receipts_verified =
        receipts.iter().filter(|receipt| receipt.verify_signature(key)).count() as u32;
    let receipts_total = receipts.len() as u32;

    Ok(ChainVerification {
        chain_valid: links_ok && digest_ok && receipts_verified == receipts_total,
        receipts_verified,
        receipts_total,
        reproducible_steps: receipts.iter().filter(|r| r.reproducible).count() as u32,
        attested_steps: receipts.iter().filter(|r| r.attestation.is_some()).count() as u32,
        chain_digest: recomputed,
    })
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::config::TrustConfig;
    use crate::keystore::{KeyStore, MemoryVault};

    async fn keypair() -> Keypair {
        let config = TrustConfig::new(&"55".repeat(32), "did:web:corsair.example").expect("config");
        let store = KeyStore::open(&config, MemoryVault::new()).await.expect("open");
        store.generate().await.expect("generate")
    }

    async fn chain_of(steps: usize) -> (ReceiptChain, Keypair) {
        let keypair = keypair().await;
        let mut chain = ReceiptChain::new();
        for i in 0..steps {
            chain
                .append(
                    format!("step-{i}"),
                    &json!({"seq": i}),
                    &json!({"seq": i, "done": true}),
                    i % 2 == 0,
                    (i == 0).then(|| "runner-attest-v1".to_string()),
                    &keypair,
                )
                .expect("should append");
        }
        (chain, keypair)
    }

    #[tokio::test]
    async fn linkage() {
        let (chain, _) = chain_of(3).await;
        let receipts = chain.receipts();
        assert_eq!(receipts[0].prev_hash, GENESIS_HASH);
        assert_eq!(receipts[1].prev_hash, receipts[0].record_hash().expect("hash"));
        assert_eq!(receipts[2].prev_hash, receipts[1].record_hash().expect("hash"));
    }

    #[tokio::test]
    async fn verifies_intact_chain() {
        let (chain, keypair) = chain_of(3).await;
        let digest = chain.chain_digest().expect("digest");

        let outcome = verify_chain(chain.receipts(), &digest, &keypair.verifying_key())
            .expect("should verify");
        assert!(outcome.chain_valid);
        assert_eq!(outcome.receipts_verified, 3);
        assert_eq!(outcome.receipts_total, 3);
        assert_eq!(outcome.reproducible_steps, 2);
        assert_eq!(outcome.attested_steps, 1);
        assert_eq!(outcome.chain_digest, digest);
    }

    #[tokio::test]
    async fn reorder_breaks_chain() {
        let (chain, keypair) = chain_of(3).await;
        let digest = chain.chain_digest().expect("digest");

        let mut swapped = chain.receipts().to_vec();
        swapped.swap(1, 2);
        let outcome =
            verify_chain(&swapped, &digest, &keypair.verifying_key()).expect("should verify");
        assert!(!outcome.chain_valid);
        // signatures are individually intact
        assert_eq!(outcome.receipts_verified, 3);
        assert_ne!(outcome.chain_digest, digest);
    }

    #[tokio::test]
    async fn delete_breaks_chain() {
        let (chain, keypair) = chain_of(3).await;
        let digest = chain.chain_digest().expect("digest");

        let mut truncated = chain.receipts().to_vec();
        truncated.remove(1);
        let outcome =
            verify_chain(&truncated, &digest, &keypair.verifying_key()).expect("should verify");
        assert!(!outcome.chain_valid);
    }

    #[tokio::test]
    async fn tampered_step_fails_signature() {
        let (chain, keypair) = chain_of(2).await;
        let digest = chain.chain_digest().expect("digest");

        let mut doctored = chain.receipts().to_vec();
        doctored[1].step = "renamed".to_string();
        let outcome =
            verify_chain(&doctored, &digest, &keypair.verifying_key()).expect("should verify");
        assert!(!outcome.chain_valid);
        assert_eq!(outcome.receipts_verified, 1);
    }

    #[tokio::test]
    async fn provenance_projection() {
        let (chain, _) = chain_of(3).await;
        let provenance = chain.process_provenance().expect("provenance");
        assert_eq!(provenance.receipt_count, 3);
        assert!(provenance.chain_verified);
        assert_eq!(provenance.chain_digest, chain.chain_digest().expect("digest"));
    }
}
