//! # Policy Evaluation
//!
//! Caller-supplied acceptance predicates checked over a decoded CPOE after
//! its cryptographic verification. Policy failures are reported with stable
//! failure strings; whether they reject the credential outright is the
//! caller's call.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TrustConfig;
use crate::cpoe::{ProvenanceSource, Summary};
use crate::signer::VerificationResult;

/// Acceptance predicates for a verified CPOE.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySet {
    /// Issuer DIDs that are acceptable. `None` accepts any issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_issuers: Option<Vec<String>>,

    /// Framework names the CPOE must cover.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_frameworks: Option<Vec<String>>,

    /// Minimum acceptable `overallScore`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<u32>,

    /// Maximum age of the credential in days, measured from `iat`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<i64>,

    /// Acceptable provenance sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_sources: Option<Vec<ProvenanceSource>>,

    /// Require a `processProvenance` receipt chain.
    pub require_receipts: bool,
}

impl PolicySet {
    /// The deployment preset: restricts issuers to `allowedIssuer` when the
    /// configuration names one.
    #[must_use]
    pub fn preset(config: &TrustConfig) -> Self {
        Self {
            allowed_issuers: config.allowed_issuer.clone().map(|issuer| vec![issuer]),
            ..Self::default()
        }
    }
}

/// The decoded CPOE facts a policy is evaluated over.
#[derive(Clone, Debug, Default)]
pub struct PolicyInput {
    /// Issuer DID.
    pub issuer: Option<String>,

    /// `iat` of the credential.
    pub issued_at: Option<chrono::DateTime<Utc>>,

    /// Control summary, when disclosed.
    pub summary: Option<Summary>,

    /// Framework names covered, when disclosed.
    pub frameworks: Vec<String>,

    /// Provenance source, when disclosed.
    pub source: Option<ProvenanceSource>,

    /// Whether the credential carries `processProvenance`.
    pub has_receipts: bool,
}

impl PolicyInput {
    /// Assemble the input from a verification result plus fields the
    /// orchestrator extracts from the reconstructed subject.
    #[must_use]
    pub fn from_result(
        result: &VerificationResult, frameworks: Vec<String>, has_receipts: bool,
    ) -> Self {
        Self {
            issuer: result.signed_by.clone(),
            issued_at: result.generated_at,
            summary: result.summary,
            frameworks,
            source: result.provenance.as_ref().map(|p| p.source),
            has_receipts,
        }
    }
}

/// Outcome of a policy evaluation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyOutcome {
    /// `true` when every predicate held.
    pub passed: bool,

    /// One stable string per unmet predicate.
    pub failures: Vec<String>,
}

/// Evaluate a policy set over decoded CPOE facts.
#[must_use]
pub fn evaluate(policy: &PolicySet, input: &PolicyInput) -> PolicyOutcome {
    let mut failures = vec![];

    if let Some(allowed) = &policy.allowed_issuers {
        let ok = input.issuer.as_ref().is_some_and(|issuer| allowed.contains(issuer));
        if !ok {
            failures.push("issuer_not_allowed".to_string());
        }
    }

    if let Some(required) = &policy.required_frameworks {
        for framework in required {
            if !input.frameworks.iter().any(|f| f.eq_ignore_ascii_case(framework)) {
                failures.push(format!("framework_missing:{framework}"));
            }
        }
    }

    if let Some(minimum) = policy.min_score {
        let ok = input.summary.is_some_and(|summary| summary.overall_score >= minimum);
        if !ok {
            failures.push("score_below_minimum".to_string());
        }
    }

    if let Some(max_age) = policy.max_age_days {
        let ok = input
            .issued_at
            .is_some_and(|issued| Utc::now() - issued <= Duration::days(max_age));
        if !ok {
            failures.push("credential_too_old".to_string());
        }
    }

    if let Some(allowed) = &policy.allowed_sources {
        let ok = input.source.is_some_and(|source| allowed.contains(&source));
        if !ok {
            failures.push("source_not_allowed".to_string());
        }
    }

    if policy.require_receipts && !input.has_receipts {
        failures.push("receipts_required".to_string());
    }

    PolicyOutcome { passed: failures.is_empty(), failures }
}

#[cfg(test)]
mod test {
    use super::*;

    fn input() -> PolicyInput {
        PolicyInput {
            issuer: Some("did:web:corsair.example".to_string()),
            issued_at: Some(Utc::now() - Duration::days(10)),
            summary: Some(Summary::from_counts(9, 1)),
            frameworks: vec!["SOC2".to_string()],
            source: Some(ProvenanceSource::Auditor),
            has_receipts: true,
        }
    }

    #[test]
    fn empty_policy_passes() {
        let outcome = evaluate(&PolicySet::default(), &input());
        assert!(outcome.passed);
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn all_predicates_hold() {
        let policy = PolicySet {
            allowed_issuers: Some(vec!["did:web:corsair.example".to_string()]),
            required_frameworks: Some(vec!["soc2".to_string()]),
            min_score: Some(80),
            max_age_days: Some(30),
            allowed_sources: Some(vec![ProvenanceSource::Auditor, ProvenanceSource::Tool]),
            require_receipts: true,
        };
        assert!(evaluate(&policy, &input()).passed);
    }

    #[test]
    fn each_failure_reported() {
        let policy = PolicySet {
            allowed_issuers: Some(vec!["did:web:other.example".to_string()]),
            required_frameworks: Some(vec!["ISO27001".to_string()]),
            min_score: Some(95),
            max_age_days: Some(5),
            allowed_sources: Some(vec![ProvenanceSource::Tool]),
            require_receipts: false,
        };
        let outcome = evaluate(&policy, &input());
        assert!(!outcome.passed);
        assert_eq!(
            outcome.failures,
            vec![
                "issuer_not_allowed",
                "framework_missing:ISO27001",
                "score_below_minimum",
                "credential_too_old",
                "source_not_allowed",
            ]
        );
    }

    #[test]
    fn hidden_summary_fails_min_score() {
        let mut hidden = input();
        hidden.summary = None;
        let policy = PolicySet { min_score: Some(10), ..PolicySet::default() };
        let outcome = evaluate(&policy, &hidden);
        assert_eq!(outcome.failures, vec!["score_below_minimum"]);
    }
}
