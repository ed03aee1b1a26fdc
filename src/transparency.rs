//! # Transparency Log
//!
//! Append-only registration of signed CPOE statements with Merkle inclusion
//! receipts, shaped after SCITT: anyone holding a receipt can prove a
//! statement was registered at a given tree size without trusting the log's
//! current operator.
//!
//! Entries are immutable once appended and ids are strictly monotonic; a
//! superseding registration is a new entry. Receipts are deterministic for
//! a fixed tree snapshot and can be regenerated at any time.

use std::sync::RwLock;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TrustConfig;
use crate::core::canonical;
use crate::cpoe::{Provenance, Summary};
use crate::error::Error;
use crate::signer;

/// Ceiling on a registered statement, in bytes.
pub const MAX_STATEMENT_BYTES: usize = 50 * 1024;

/// Ceiling on a single listing page.
pub const MAX_PAGE_SIZE: usize = 100;

const DEFAULT_PAGE_SIZE: usize = 20;

/// Options for [`TransparencyLog::register`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterOptions {
    /// Discard the statement bytes and detailed summary, retaining only the
    /// digest and registration metadata.
    pub proof_only: bool,
}

/// A registered entry, as listed and returned from registration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogEntry {
    /// Strictly monotonic id, starting at 1.
    pub entry_id: u64,

    /// When the statement was appended.
    pub registration_time: DateTime<Utc>,

    /// Hex sha-256 of the statement bytes.
    pub statement_digest: String,

    /// Issuer DID captured from the statement at registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Credential scope captured at registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Evidence provenance captured at registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,

    /// Control summary captured at registration. Absent for proof-only
    /// entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,

    /// Whether the statement bytes were discarded.
    pub proof_only: bool,
}

/// A Merkle inclusion receipt for a registered entry.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionReceipt {
    /// The entry the proof covers.
    pub entry_id: u64,

    /// Identifier of the issuing log.
    pub log_id: String,

    /// Sibling hashes from leaf to root, base64url, `.`-separated.
    pub proof: String,

    /// Leaf count of the tree the proof was computed against.
    pub tree_size: u64,

    /// Registration time of the entry.
    pub registration_time: DateTime<Utc>,
}

/// Listing query. Filters are exact equality over fields captured at
/// registration time.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    /// Page size, clamped to [`MAX_PAGE_SIZE`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Entries to skip.
    pub offset: usize,

    /// Keep only entries from this issuer DID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Keep only entries covering this framework.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
}

/// One page of listed entries.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Page {
    /// The entries in this page.
    pub entries: Vec<LogEntry>,

    /// Total entries matching the filters.
    pub total: usize,

    /// The offset this page starts at.
    pub offset: usize,
}

/// Aggregate view of one issuer's registrations.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IssuerProfile {
    /// The issuer DID.
    pub issuer: String,

    /// Number of entries registered by the issuer.
    pub entry_count: usize,

    /// The most recent entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<LogEntry>,
}

struct Record {
    entry: LogEntry,
    frameworks: Vec<String>,
    // retained unless proof_only; not exposed through listings
    #[allow(dead_code)]
    statement: Option<String>,
}

/// Append-only transparency log. Appends serialize under a write lock and
/// are linearizable: an entry visible to one reader is visible to all
/// subsequent readers. Reads take snapshots.
pub struct TransparencyLog {
    log_id: String,
    records: RwLock<Vec<Record>>,
}

impl TransparencyLog {
    /// Create an empty log.
    #[must_use]
    pub fn new(log_id: impl Into<String>) -> Self {
        Self { log_id: log_id.into(), records: RwLock::new(vec![]) }
    }

    /// The log's identifier, stamped into every receipt.
    #[must_use]
    pub fn log_id(&self) -> &str {
        &self.log_id
    }

    /// Append a signed statement under a fresh monotonic `entryId`.
    ///
    /// # Errors
    ///
    /// `Error::OversizeInput` past [`MAX_STATEMENT_BYTES`],
    /// `Error::InvalidJwt` when the statement is not a decodable
    /// three-segment JWT, `Error::LogAppendFailed` when the log state is
    /// unavailable.
    pub async fn register(
        &self, statement: &str, options: RegisterOptions,
    ) -> Result<LogEntry, Error> {
        if statement.len() > MAX_STATEMENT_BYTES {
            return Err(Error::OversizeInput {
                size: statement.len(),
                limit: MAX_STATEMENT_BYTES,
            });
        }
        let decoded = signer::decode(statement)?;

        let statement_digest = canonical::sha256_hex(statement.as_bytes());
        let subject =
            decoded.payload.pointer("/vc/credentialSubject").cloned().unwrap_or(Value::Null);

        let issuer =
            decoded.payload.get("iss").and_then(Value::as_str).map(ToString::to_string);
        let scope = subject.get("scope").and_then(Value::as_str).map(ToString::to_string);
        let provenance =
            subject.get("provenance").and_then(|p| serde_json::from_value(p.clone()).ok());
        let summary = if options.proof_only {
            None
        } else {
            subject.get("summary").and_then(|s| serde_json::from_value(s.clone()).ok())
        };
        let frameworks: Vec<String> = subject
            .get("frameworks")
            .and_then(Value::as_object)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();

        let mut records = self
            .records
            .write()
            .map_err(|_| Error::LogAppendFailed("log state unavailable".into()))?;

        let entry = LogEntry {
            entry_id: records.len() as u64 + 1,
            registration_time: Utc::now(),
            statement_digest,
            issuer,
            scope,
            provenance,
            summary,
            proof_only: options.proof_only,
        };
        records.push(Record {
            entry: entry.clone(),
            frameworks,
            statement: (!options.proof_only).then(|| statement.to_string()),
        });

        info!(entry_id = entry.entry_id, proof_only = options.proof_only, "registered statement");
        Ok(entry)
    }

    /// Compute the inclusion receipt for an entry against the current tree.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for an unknown id, `Error::TreeProofFailed` when
    /// the tree cannot be built.
    pub async fn receipt(&self, entry_id: u64) -> Result<InclusionReceipt, Error> {
        let (leaves, registration_time) = {
            let records = self
                .records
                .read()
                .map_err(|_| Error::TreeProofFailed("log state unavailable".into()))?;
            let index = usize::try_from(entry_id)
                .ok()
                .and_then(|id| id.checked_sub(1))
                .filter(|i| *i < records.len())
                .ok_or_else(|| Error::NotFound(format!("entry {entry_id}")))?;

            (leaf_hashes(&records)?, records[index].entry.registration_time)
        };

        #[allow(clippy::cast_possible_truncation)]
        let index = (entry_id - 1) as usize;
        let path = inclusion_path(&leaves, index);
        let proof = path
            .iter()
            .map(|sibling| Base64UrlUnpadded::encode_string(sibling))
            .collect::<Vec<_>>()
            .join(".");

        debug!(entry_id, tree_size = leaves.len(), "computed inclusion receipt");
        Ok(InclusionReceipt {
            entry_id,
            log_id: self.log_id.clone(),
            proof,
            tree_size: leaves.len() as u64,
            registration_time,
        })
    }

    /// The current tree root, base64url. `None` while the log is empty.
    ///
    /// # Errors
    ///
    /// `Error::TreeProofFailed` when the log state is unavailable.
    pub async fn tree_root(&self) -> Result<Option<String>, Error> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::TreeProofFailed("log state unavailable".into()))?;
        let leaves = leaf_hashes(&records)?;
        Ok(compute_root(&leaves).map(|root| Base64UrlUnpadded::encode_string(&root)))
    }

    /// List entries, newest last, honoring exact-equality filters.
    ///
    /// # Errors
    ///
    /// `Error::TreeProofFailed` when the log state is unavailable.
    pub async fn list_entries(&self, query: &ListQuery) -> Result<Page, Error> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::TreeProofFailed("log state unavailable".into()))?;

        let matching: Vec<&Record> = records
            .iter()
            .filter(|record| {
                query
                    .issuer
                    .as_ref()
                    .is_none_or(|issuer| record.entry.issuer.as_ref() == Some(issuer))
            })
            .filter(|record| {
                query
                    .framework
                    .as_ref()
                    .is_none_or(|framework| record.frameworks.contains(framework))
            })
            .collect();

        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        let entries = matching
            .iter()
            .skip(query.offset)
            .take(limit)
            .map(|record| record.entry.clone())
            .collect();

        Ok(Page { entries, total: matching.len(), offset: query.offset })
    }

    /// Aggregate count and latest entry for one issuer.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when the issuer has no entries.
    pub async fn issuer_profile(&self, did: &str) -> Result<IssuerProfile, Error> {
        let records = self
            .records
            .read()
            .map_err(|_| Error::TreeProofFailed("log state unavailable".into()))?;

        let entries: Vec<&Record> =
            records.iter().filter(|r| r.entry.issuer.as_deref() == Some(did)).collect();
        if entries.is_empty() {
            return Err(Error::NotFound(format!("issuer {did}")));
        }

        Ok(IssuerProfile {
            issuer: did.to_string(),
            entry_count: entries.len(),
            latest: entries.last().map(|record| record.entry.clone()),
        })
    }
}

/// Client for a remote transparency log exposing the standard HTTP surface
/// (`POST /entries`, `GET /entries/:id/receipt`).
///
/// Used when registration is delegated to a log operated outside this
/// process; the local [`TransparencyLog`] serves the same shapes.
#[derive(Clone, Debug)]
pub struct RemoteLog {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteLog {
    /// Build a client for the log at `base_url`.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the TLS backend cannot be initialized.
    pub fn new(base_url: impl Into<String>, config: &TrustConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.log_push_timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self { base_url: base_url.into().trim_end_matches('/').to_string(), client })
    }

    /// Push a statement to the remote log.
    ///
    /// In-flight network is aborted on cancellation; an entry the log
    /// already appended is never rolled back.
    ///
    /// # Errors
    ///
    /// `Error::LogAppendFailed` on network or status failure.
    pub async fn register(
        &self, statement: &str, options: RegisterOptions, cancel: &CancellationToken,
    ) -> Result<LogEntry, Error> {
        let body = serde_json::json!({
            "statement": statement,
            "proofOnly": options.proof_only,
        });
        let request = self.client.post(format!("{}/entries", self.base_url)).json(&body).send();

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return Err(Error::LogAppendFailed("registration cancelled".into()));
            }
            sent = request => {
                sent.map_err(|e| Error::LogAppendFailed(format!("push: {e}")))?
            }
        };
        let status = response.status();
        if !status.is_success() {
            return Err(Error::LogAppendFailed(format!("log returned {status}")));
        }
        response.json().await.map_err(|e| Error::LogAppendFailed(format!("decode: {e}")))
    }

    /// Fetch the inclusion receipt for an entry.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` on 404, `Error::TreeProofFailed` on any other
    /// failure.
    pub async fn receipt(&self, entry_id: u64) -> Result<InclusionReceipt, Error> {
        let url = format!("{}/entries/{entry_id}/receipt", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::TreeProofFailed(format!("fetch receipt: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("entry {entry_id}")));
        }
        let status = response.status();
        if !status.is_success() {
            return Err(Error::TreeProofFailed(format!("log returned {status}")));
        }
        response.json().await.map_err(|e| Error::TreeProofFailed(format!("decode: {e}")))
    }
}

/// Replay an inclusion receipt: recompute the path from the statement
/// digest and compare the resulting root.
///
/// # Errors
///
/// `Error::TreeProofFailed` when the digest or proof cannot be decoded.
pub fn verify_inclusion(
    statement_digest: &str, receipt: &InclusionReceipt, expected_root: &str,
) -> Result<bool, Error> {
    let mut node = leaf_hash(statement_digest, receipt.entry_id)?;

    let siblings: Vec<[u8; 32]> = if receipt.proof.is_empty() {
        vec![]
    } else {
        receipt
            .proof
            .split('.')
            .map(|segment| {
                let bytes = Base64UrlUnpadded::decode_vec(segment)
                    .map_err(|_| Error::TreeProofFailed("proof segment not base64url".into()))?;
                bytes
                    .try_into()
                    .map_err(|_| Error::TreeProofFailed("proof segment not 32 bytes".into()))
            })
            .collect::<Result<_, _>>()?
    };

    let mut index = usize::try_from(receipt.entry_id)
        .ok()
        .and_then(|id| id.checked_sub(1))
        .ok_or_else(|| Error::TreeProofFailed("entry id out of range".into()))?;
    let mut level_len = usize::try_from(receipt.tree_size)
        .map_err(|_| Error::TreeProofFailed("tree size out of range".into()))?;
    if index >= level_len {
        return Err(Error::TreeProofFailed("entry beyond tree size".into()));
    }

    let mut siblings = siblings.into_iter();
    while level_len > 1 {
        let Some(sibling) = siblings.next() else {
            return Ok(false);
        };
        node = if index % 2 == 0 { branch_hash(&node, &sibling) } else { branch_hash(&sibling, &node) };
        index /= 2;
        level_len = level_len.div_ceil(2);
    }
    if siblings.next().is_some() {
        return Ok(false);
    }

    Ok(Base64UrlUnpadded::encode_string(&node) == expected_root)
}

fn leaf_hashes(records: &[Record]) -> Result<Vec<[u8; 32]>, Error> {
    records
        .iter()
        .map(|record| leaf_hash(&record.entry.statement_digest, record.entry.entry_id))
        .collect()
}

/// Leaf pre-image: raw digest bytes followed by the entry id, big-endian.
fn leaf_hash(statement_digest: &str, entry_id: u64) -> Result<[u8; 32], Error> {
    let mut preimage = hex::decode(statement_digest)
        .map_err(|_| Error::TreeProofFailed("statement digest is not hex".into()))?;
    preimage.extend_from_slice(&entry_id.to_be_bytes());
    Ok(canonical::sha256(&preimage))
}

fn branch_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut preimage = [0_u8; 64];
    preimage[..32].copy_from_slice(left);
    preimage[32..].copy_from_slice(right);
    canonical::sha256(&preimage)
}

/// Fold a level upward, duplicating an odd rightmost node.
fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => branch_hash(left, right),
            [odd] => branch_hash(odd, odd),
            _ => unreachable!("chunks(2) yields 1 or 2 items"),
        })
        .collect()
}

fn compute_root(leaves: &[[u8; 32]]) -> Option<[u8; 32]> {
    if leaves.is_empty() {
        return None;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.first().copied()
}

fn inclusion_path(leaves: &[[u8; 32]], index: usize) -> Vec<[u8; 32]> {
    let mut path = vec![];
    let mut level = leaves.to_vec();
    let mut index = index;
    while level.len() > 1 {
        let sibling_index = index ^ 1;
        // odd rightmost node pairs with itself
        let sibling = level.get(sibling_index).copied().unwrap_or(level[index]);
        path.push(sibling);
        index /= 2;
        level = next_level(&level);
    }
    path
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::canonical::sha256_hex;

    fn digest(tag: &str) -> String {
        sha256_hex(tag.as_bytes())
    }

    #[test]
    fn root_of_single_leaf() {
        let leaves = vec![leaf_hash(&digest("a"), 1).expect("leaf")];
        assert_eq!(compute_root(&leaves), Some(leaves[0]));
        assert!(inclusion_path(&leaves, 0).is_empty());
    }

    #[test]
    fn odd_tree_duplicates_rightmost() {
        let leaves: Vec<[u8; 32]> = (1..=3)
            .map(|i| leaf_hash(&digest(&format!("s{i}")), i).expect("leaf"))
            .collect();
        let root = compute_root(&leaves).expect("root");

        // manual reconstruction: ((l0,l1),(l2,l2))
        let left = branch_hash(&leaves[0], &leaves[1]);
        let right = branch_hash(&leaves[2], &leaves[2]);
        assert_eq!(root, branch_hash(&left, &right));
    }

    #[test]
    fn every_leaf_proves_inclusion() {
        for total in 1_u64..=8 {
            let leaves: Vec<[u8; 32]> = (1..=total)
                .map(|i| leaf_hash(&digest(&format!("s{i}")), i).expect("leaf"))
                .collect();
            let root =
                Base64UrlUnpadded::encode_string(&compute_root(&leaves).expect("root"));

            for entry_id in 1..=total {
                #[allow(clippy::cast_possible_truncation)]
                let path = inclusion_path(&leaves, (entry_id - 1) as usize);
                let receipt = InclusionReceipt {
                    entry_id,
                    log_id: "test-log".to_string(),
                    proof: path
                        .iter()
                        .map(|s| Base64UrlUnpadded::encode_string(s))
                        .collect::<Vec<_>>()
                        .join("."),
                    tree_size: total,
                    registration_time: Utc::now(),
                };
                let ok = verify_inclusion(&digest(&format!("s{entry_id}")), &receipt, &root)
                    .expect("should replay");
                assert!(ok, "entry {entry_id} of {total} should prove inclusion");
            }
        }
    }

    #[test]
    fn wrong_digest_fails_replay() {
        let leaves: Vec<[u8; 32]> =
            (1..=4).map(|i| leaf_hash(&digest(&format!("s{i}")), i).expect("leaf")).collect();
        let root = Base64UrlUnpadded::encode_string(&compute_root(&leaves).expect("root"));
        let receipt = InclusionReceipt {
            entry_id: 2,
            log_id: "test-log".to_string(),
            proof: inclusion_path(&leaves, 1)
                .iter()
                .map(|s| Base64UrlUnpadded::encode_string(s))
                .collect::<Vec<_>>()
                .join("."),
            tree_size: 4,
            registration_time: Utc::now(),
        };
        let ok = verify_inclusion(&digest("tampered"), &receipt, &root).expect("should replay");
        assert!(!ok);
    }
}
