//! # Compliance Proof of Evidence
//!
//! The CPOE data model and the builder that normalizes raw evidence into it.
//!
//! A CPOE is a W3C Verifiable Credential with a fixed credential-subject
//! schema: a scope, provenance for the underlying evidence document, a
//! summary of control outcomes, and per-framework control listings. The
//! builder never signs; it hands a complete claims payload to the signer.

use std::collections::BTreeMap;

use chrono::serde::ts_seconds;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::canonical;
use crate::core::{Kind, OneMany};
use crate::error::Error;

/// Credential-subject discriminator. Never hidden by selective disclosure.
pub const SUBJECT_TYPE: &str = "CorsairCPOE";

/// Value of the `parley` protocol-version claim.
pub const PARLEY_VERSION: &str = "2.0";

/// JSON-LD context of the VC envelope.
pub const VC_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";

/// Who produced the underlying evidence.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProvenanceSource {
    /// The subject organization attests to its own evidence.
    #[default]
    #[serde(rename = "self")]
    SelfAsserted,

    /// A scanner or automated tool produced the evidence.
    Tool,

    /// An independent auditor produced the evidence (e.g. a SOC 2 report).
    Auditor,
}

/// Provenance of the evidence a CPOE attests over.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Provenance {
    /// Evidence origin class.
    pub source: ProvenanceSource,

    /// The auditor, tool, or organization that produced the evidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_identity: Option<String>,

    /// Date the evidence was produced, as given in the evidence itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_date: Option<String>,

    /// Hex sha-256 of the input document, binding the CPOE to its evidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_document: Option<String>,
}

/// Aggregated control outcomes.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Summary {
    /// Total controls tested.
    pub controls_tested: u32,

    /// Controls that passed.
    pub controls_passed: u32,

    /// Controls that failed.
    pub controls_failed: u32,

    /// `round(100 * passed / max(tested, 1))`.
    pub overall_score: u32,
}

impl Summary {
    /// Compute a summary from pass/fail counts.
    #[must_use]
    pub fn from_counts(passed: u32, failed: u32) -> Self {
        let tested = passed + failed;
        Self {
            controls_tested: tested,
            controls_passed: passed,
            controls_failed: failed,
            overall_score: score(passed, tested),
        }
    }

    /// `true` when the arithmetic invariants hold.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.controls_tested == self.controls_passed + self.controls_failed
            && self.overall_score == score(self.controls_passed, self.controls_tested)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn score(passed: u32, tested: u32) -> u32 {
    (f64::from(passed) * 100.0 / f64::from(tested.max(1))).round() as u32
}

/// Outcome of a single control test.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    /// The control is operating effectively.
    Pass,

    /// The control failed or could not be evaluated.
    #[default]
    Fail,
}

/// A tested control within a framework.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlResult {
    /// Control identifier, e.g. `CC6.1`.
    pub control_id: String,

    /// Normalized outcome.
    pub status: ControlStatus,
}

/// The controls tested under one framework.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FrameworkControls {
    /// Control outcomes.
    pub controls: Vec<ControlResult>,
}

/// Provenance of the pipeline that generated the CPOE, bound to a receipt
/// chain digest.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessProvenance {
    /// Hex digest over the full receipt chain.
    pub chain_digest: String,

    /// Number of receipts in the chain.
    pub receipt_count: u32,

    /// Whether the chain verified at issuance time.
    pub chain_verified: bool,

    /// Receipts flagged as reproducible.
    pub reproducible_steps: u32,

    /// Receipts carrying an attestation.
    pub attested_steps: u32,
}

/// The fixed CPOE credential subject.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CpoeSubject {
    /// Discriminator, always `CorsairCPOE`. Protected from selective
    /// disclosure.
    #[serde(rename = "type")]
    pub type_: String,

    /// Human-readable description of what was assessed.
    pub scope: String,

    /// Evidence provenance.
    pub provenance: Provenance,

    /// Aggregated control outcomes.
    pub summary: Summary,

    /// Framework name to tested controls. Sorted map so the canonical form
    /// is stable.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub frameworks: BTreeMap<String, FrameworkControls>,

    /// Pipeline provenance, present when a receipt chain backs the CPOE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_provenance: Option<ProcessProvenance>,

    /// Opaque pass-through for issuer-specific fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,

    /// Digests of selectively disclosed claims, present only in SD-JWT form.
    #[serde(rename = "_sd")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sd: Option<Vec<String>>,

    /// Digest algorithm for `_sd`, `sha-256` when set.
    #[serde(rename = "_sd_alg")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sd_alg: Option<String>,
}

/// Issuer of the VC envelope.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Issuer {
    /// The issuer DID.
    pub id: String,
}

/// The W3C Verifiable Credential envelope around a CPOE subject.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifiableCredential {
    /// JSON-LD contexts.
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// Credential id, `urn:uuid:<marqueId>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Credential types.
    #[serde(rename = "type")]
    pub type_: OneMany<String>,

    /// The issuer DID, as a string or an object.
    pub issuer: Kind<Issuer>,

    /// When the credential becomes valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,

    /// When the credential ceases to be valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,

    /// The CPOE subject.
    pub credential_subject: CpoeSubject,
}

/// Registered and custom JWT claims of a signed CPOE.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CpoeClaims {
    /// The issuer DID.
    pub iss: String,

    /// The `marqueId`.
    pub sub: String,

    /// The `marqueId`.
    pub jti: String,

    /// Issuance time.
    #[serde(with = "ts_seconds")]
    pub iat: DateTime<Utc>,

    /// Expiry, at most `maxExpiryDays` after `iat`.
    #[serde(with = "ts_seconds")]
    pub exp: DateTime<Utc>,

    /// Protocol version.
    pub parley: String,

    /// The credential.
    pub vc: VerifiableCredential,
}

/// A hint (or detected classification) of the evidence format.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceFormat {
    /// SOC 2 (or similar) audit report.
    Soc2,

    /// Scanner or automated tool output.
    Scanner,

    /// Free-form evidence.
    Generic,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct EvidenceMetadata {
    title: Option<String>,
    issuer: Option<String>,
    date: Option<String>,
    scope: Option<String>,
    report_type: Option<String>,
    tool: Option<String>,
    framework: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct EvidenceControl {
    id: Option<String>,
    status: Option<String>,
    framework: Option<String>,
}

/// Builds an unsigned CPOE claims payload from raw evidence.
#[derive(Clone, Debug, Default)]
pub struct CpoeBuilder {
    evidence: Value,
    format: Option<EvidenceFormat>,
    scope: Option<String>,
    did: String,
    expiry_days: Option<i64>,
    process_provenance: Option<ProcessProvenance>,
    extensions: Option<Map<String, Value>>,
    source_document: Option<String>,
}

impl CpoeBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw evidence document.
    #[must_use]
    pub fn evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }

    /// Hint the evidence format instead of relying on detection.
    #[must_use]
    pub const fn format(mut self, format: EvidenceFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Override the credential scope.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the issuer DID.
    #[must_use]
    pub fn did(mut self, did: impl Into<String>) -> Self {
        self.did = did.into();
        self
    }

    /// Days until expiry. Defaults to 365; the signer enforces the
    /// configured ceiling.
    #[must_use]
    pub const fn expiry_days(mut self, days: i64) -> Self {
        self.expiry_days = Some(days);
        self
    }

    /// Bind a verified receipt chain into the credential.
    #[must_use]
    pub fn process_provenance(mut self, provenance: ProcessProvenance) -> Self {
        self.process_provenance = Some(provenance);
        self
    }

    /// Attach opaque issuer-specific fields.
    #[must_use]
    pub fn extensions(mut self, extensions: Map<String, Value>) -> Self {
        self.extensions = Some(extensions);
        self
    }

    /// Bind the CPOE to a specific input document hash (hex sha-256).
    /// Defaults to the hash of the canonical evidence JSON.
    #[must_use]
    pub fn source_document(mut self, hash: impl Into<String>) -> Self {
        self.source_document = Some(hash.into());
        self
    }

    /// Normalize the evidence and produce the unsigned claims payload.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaInvalid` when no issuer DID was supplied, or a
    /// canonicalization error when the evidence cannot be hashed.
    pub fn build(self) -> Result<CpoeClaims, Error> {
        if self.did.is_empty() {
            return Err(Error::SchemaInvalid("issuer DID is required".into()));
        }

        let metadata = self.evidence.get("metadata").map_or_else(EvidenceMetadata::default, |m| {
            serde_json::from_value(m.clone()).unwrap_or_default()
        });

        let format = self.format.unwrap_or_else(|| detect_format(&self.evidence, &metadata));
        let controls = parse_controls(&self.evidence);

        let mut frameworks: BTreeMap<String, FrameworkControls> = BTreeMap::new();
        let mut passed = 0_u32;
        for control in &controls {
            let status = normalize_status(control.status.as_deref().unwrap_or_default());
            if status == ControlStatus::Pass {
                passed += 1;
            }
            let framework = control
                .framework
                .clone()
                .or_else(|| metadata.framework.clone())
                .unwrap_or_else(|| default_framework(format));
            frameworks.entry(framework).or_default().controls.push(ControlResult {
                control_id: control.id.clone().unwrap_or_default(),
                status,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let failed = controls.len() as u32 - passed;
        let summary = Summary::from_counts(passed, failed);

        let source_document = match self.source_document {
            Some(hash) => hash,
            None => canonical::sha256_hex(canonical::canonicalize(&self.evidence)?.as_bytes()),
        };
        let provenance = Provenance {
            source: classify_source(format),
            source_identity: source_identity(format, &metadata),
            source_date: metadata.date,
            source_document: Some(source_document),
        };

        let scope = self
            .scope
            .or(metadata.scope)
            .or(metadata.title)
            .unwrap_or_else(|| "compliance evidence".to_string());

        let marque_id = Uuid::new_v4().to_string();
        let iat = Utc::now();
        let exp = iat + Duration::days(self.expiry_days.unwrap_or(365));

        let vc = VerifiableCredential {
            context: vec![VC_CONTEXT.to_string()],
            id: Some(format!("urn:uuid:{marque_id}")),
            type_: OneMany::Many(vec![
                "VerifiableCredential".to_string(),
                SUBJECT_TYPE.to_string(),
            ]),
            issuer: Kind::String(self.did.clone()),
            valid_from: Some(iat),
            valid_until: Some(exp),
            credential_subject: CpoeSubject {
                type_: SUBJECT_TYPE.to_string(),
                scope,
                provenance,
                summary,
                frameworks,
                process_provenance: self.process_provenance,
                extensions: self.extensions,
                sd: None,
                sd_alg: None,
            },
        };

        Ok(CpoeClaims {
            iss: self.did,
            sub: marque_id.clone(),
            jti: marque_id,
            iat,
            exp,
            parley: PARLEY_VERSION.to_string(),
            vc,
        })
    }
}

fn parse_controls(evidence: &Value) -> Vec<EvidenceControl> {
    evidence
        .get("controls")
        .and_then(Value::as_array)
        .map(|controls| {
            controls
                .iter()
                .map(|c| serde_json::from_value(c.clone()).unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

fn detect_format(evidence: &Value, metadata: &EvidenceMetadata) -> EvidenceFormat {
    let report_type = metadata.report_type.as_deref().unwrap_or_default().to_lowercase();
    let title = metadata.title.as_deref().unwrap_or_default().to_lowercase();
    if report_type.contains("soc") || title.contains("soc 2") || title.contains("soc2") {
        return EvidenceFormat::Soc2;
    }
    if metadata.tool.is_some() || evidence.get("scanner").is_some() || evidence.get("tool").is_some()
    {
        return EvidenceFormat::Scanner;
    }
    EvidenceFormat::Generic
}

const fn classify_source(format: EvidenceFormat) -> ProvenanceSource {
    match format {
        EvidenceFormat::Soc2 => ProvenanceSource::Auditor,
        EvidenceFormat::Scanner => ProvenanceSource::Tool,
        EvidenceFormat::Generic => ProvenanceSource::SelfAsserted,
    }
}

fn source_identity(format: EvidenceFormat, metadata: &EvidenceMetadata) -> Option<String> {
    match format {
        EvidenceFormat::Scanner => metadata.tool.clone().or_else(|| metadata.issuer.clone()),
        EvidenceFormat::Soc2 | EvidenceFormat::Generic => metadata.issuer.clone(),
    }
}

fn default_framework(format: EvidenceFormat) -> String {
    match format {
        EvidenceFormat::Soc2 => "SOC2".to_string(),
        EvidenceFormat::Scanner | EvidenceFormat::Generic => "general".to_string(),
    }
}

fn normalize_status(status: &str) -> ControlStatus {
    match status.to_lowercase().as_str() {
        "pass" | "passed" | "ok" | "effective" | "compliant" | "implemented" => {
            ControlStatus::Pass
        }
        _ => ControlStatus::Fail,
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn sample_evidence() -> Value {
        json!({
            "metadata": {"title": "T", "issuer": "I", "date": "2026-01-01", "scope": "S"},
            "controls": [
                {"id": "C1", "status": "pass", "description": "d", "evidence": "e"},
                {"id": "C2", "status": "fail", "description": "d", "evidence": "e"},
                {"id": "C3", "status": "effective", "description": "d", "evidence": "e"}
            ]
        })
    }

    #[test]
    fn summary_arithmetic() {
        let claims = CpoeBuilder::new()
            .evidence(sample_evidence())
            .did("did:web:proofs.example.com")
            .build()
            .expect("should build");

        let summary = claims.vc.credential_subject.summary;
        assert_eq!(summary.controls_tested, 3);
        assert_eq!(summary.controls_passed, 2);
        assert_eq!(summary.controls_failed, 1);
        assert_eq!(summary.overall_score, 67);
        assert!(summary.is_consistent());
    }

    #[test]
    fn empty_controls_scores_zero() {
        let summary = Summary::from_counts(0, 0);
        assert_eq!(summary.overall_score, 0);
        assert!(summary.is_consistent());
    }

    #[test]
    fn classifies_soc2_as_auditor() {
        let claims = CpoeBuilder::new()
            .evidence(json!({
                "metadata": {"title": "SOC 2 Type II Report", "issuer": "Anchor Audit LLP"},
                "controls": [{"id": "CC6.1", "status": "pass"}]
            }))
            .did("did:web:proofs.example.com")
            .build()
            .expect("should build");

        let subject = &claims.vc.credential_subject;
        assert_eq!(subject.provenance.source, ProvenanceSource::Auditor);
        assert_eq!(subject.provenance.source_identity.as_deref(), Some("Anchor Audit LLP"));
        assert!(subject.frameworks.contains_key("SOC2"));
    }

    #[test]
    fn classifies_scanner_as_tool() {
        let claims = CpoeBuilder::new()
            .evidence(json!({
                "metadata": {"tool": "prowler"},
                "controls": [{"id": "iam_1", "status": "FAIL"}]
            }))
            .did("did:web:proofs.example.com")
            .build()
            .expect("should build");

        let subject = &claims.vc.credential_subject;
        assert_eq!(subject.provenance.source, ProvenanceSource::Tool);
        assert_eq!(subject.provenance.source_identity.as_deref(), Some("prowler"));
    }

    #[test]
    fn free_form_is_self_asserted() {
        let claims = CpoeBuilder::new()
            .evidence(sample_evidence())
            .did("did:web:proofs.example.com")
            .build()
            .expect("should build");
        assert_eq!(claims.vc.credential_subject.provenance.source, ProvenanceSource::SelfAsserted);
        assert!(claims.vc.credential_subject.provenance.source_document.is_some());
    }

    #[test]
    fn envelope_serialization() {
        let claims = CpoeBuilder::new()
            .evidence(sample_evidence())
            .did("did:web:proofs.example.com")
            .scope("annual review")
            .build()
            .expect("should build");

        let payload = serde_json::to_value(&claims).expect("should serialize");
        assert_eq!(payload["parley"], json!("2.0"));
        assert_eq!(payload["iss"], json!("did:web:proofs.example.com"));
        assert_eq!(payload["sub"], payload["jti"]);
        assert_eq!(payload["vc"]["type"], json!(["VerifiableCredential", "CorsairCPOE"]));
        assert_eq!(payload["vc"]["credentialSubject"]["type"], json!("CorsairCPOE"));
        assert_eq!(payload["vc"]["credentialSubject"]["scope"], json!("annual review"));
        assert_eq!(
            payload["vc"]["credentialSubject"]["summary"]["controlsTested"],
            json!(3)
        );
        assert_eq!(payload["vc"]["credentialSubject"]["provenance"]["source"], json!("self"));
        // timestamps serialize as integer seconds
        assert!(payload["iat"].is_i64());
        assert!(payload["exp"].is_i64());
    }

    #[test]
    fn status_normalization() {
        assert_eq!(normalize_status("Passed"), ControlStatus::Pass);
        assert_eq!(normalize_status("COMPLIANT"), ControlStatus::Pass);
        assert_eq!(normalize_status("ineffective"), ControlStatus::Fail);
        assert_eq!(normalize_status(""), ControlStatus::Fail);
    }
}
