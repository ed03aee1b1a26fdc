//! # Errors
//!
//! Failure kinds for the trust core. Cryptographic and schema failures are
//! returned as values wherever a caller can act on them; the verifier
//! surfaces them as fields of its result rather than bubbling an error.
//! Boundary layers translate each kind to an HTTP status and a wire
//! envelope code via [`Error::code`] — messages never carry key material
//! or internal paths.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Internal failure kinds raised by the trust core.
#[derive(Error, Debug)]
pub enum Error {
    /// Deployment configuration is missing or malformed (for example, a key
    /// encryption secret that is not 64 hex characters).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No active keypair is available for signing.
    #[error("no active signing key")]
    KeyMissing,

    /// The encrypted private key failed to decrypt (GCM tag mismatch or
    /// corrupted ciphertext).
    #[error("private key decryption failed")]
    KeyDecryptFailed,

    /// Key material could not be parsed (malformed PEM, JWK, or length).
    #[error("invalid key format: {0}")]
    KeyFormatInvalid(String),

    /// The requested expiry falls outside the permitted window.
    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),

    /// No supplied key verified the JWT signature.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// The credential subject does not satisfy the CPOE schema.
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    /// The credential has expired.
    #[error("credential expired")]
    Expired,

    /// The supplied evidence document hash does not match the credential's
    /// provenance binding.
    #[error("evidence document hash mismatch")]
    EvidenceMismatch,

    /// A presented disclosure does not hash to any digest in `_sd`.
    #[error("disclosure mismatch: {0}")]
    DisclosureMismatch(String),

    /// A receipt chain link, signature, or digest failed verification.
    #[error("receipt chain broken: {0}")]
    ChainBroken(String),

    /// DID resolution failed (network, status, or decode).
    #[error("DID resolution failed: {0}")]
    DidResolution(String),

    /// The DID's host resolves to a private or reserved address range.
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// The resolved DID document is structurally invalid.
    #[error("invalid DID document: {0}")]
    InvalidDidDocument(String),

    /// The DID document has no Ed25519 verification method.
    #[error("no suitable verification key in DID document")]
    NoSuitableKey,

    /// The input is not a well-formed JWT (or SD-JWT).
    #[error("invalid JWT: {0}")]
    InvalidJwt(String),

    /// The input exceeds the configured size ceiling.
    #[error("input of {size} bytes exceeds limit of {limit}")]
    OversizeInput {
        /// Size of the rejected input.
        size: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// The value cannot be canonicalized (non-integer number in a signed
    /// payload).
    #[error("canonicalization rejected: {0}")]
    Canonical(String),

    /// The transparency log rejected or failed an append.
    #[error("transparency log append failed: {0}")]
    LogAppendFailed(String),

    /// An inclusion proof could not be computed or replayed.
    #[error("inclusion proof failed: {0}")]
    TreeProofFailed(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// JSON serialization failure. Indicates a programming error in a type
    /// derive rather than bad caller input.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The wire envelope code this kind maps to at the HTTP boundary.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidExpiry(_) | Self::BlockedHost(_) | Self::InvalidJwt(_)
            | Self::Canonical(_) => "bad_request",
            Self::SignatureInvalid
            | Self::SchemaInvalid(_)
            | Self::Expired
            | Self::EvidenceMismatch
            | Self::DisclosureMismatch(_)
            | Self::ChainBroken(_)
            | Self::DidResolution(_)
            | Self::InvalidDidDocument(_)
            | Self::NoSuitableKey => "validation_error",
            Self::OversizeInput { .. } => "payload_too_large",
            Self::NotFound(_) => "not_found",
            Self::Config(_)
            | Self::KeyMissing
            | Self::KeyDecryptFailed
            | Self::KeyFormatInvalid(_)
            | Self::LogAppendFailed(_)
            | Self::TreeProofFailed(_)
            | Self::Serialization(_) => "internal_error",
        }
    }

    /// Wire envelope representation: `{ok: false, error: {code, message}}`.
    #[must_use]
    pub fn to_envelope(&self) -> ErrorBody {
        ErrorBody {
            ok: false,
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        }
    }
}

/// Structured error envelope returned at the HTTP boundary.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    /// Always `false` for errors.
    pub ok: bool,

    /// Code and human-readable message.
    pub error: ErrorDetail,
}

/// Code and message of an [`ErrorBody`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorDetail {
    /// One of the fixed boundary codes (`bad_request`, `validation_error`,
    /// `payload_too_large`, `not_found`, `unauthorized`,
    /// `method_not_allowed`, `rate_limited`, `internal_error`).
    pub code: String,

    /// Human-readable description. Never includes key material.
    pub message: String,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_shape() {
        let err = Error::OversizeInput { size: 200_000, limit: 102_400 };
        let body = serde_json::to_value(err.to_envelope()).expect("should serialize");
        assert_eq!(
            body,
            json!({
                "ok": false,
                "error": {
                    "code": "payload_too_large",
                    "message": "input of 200000 bytes exceeds limit of 102400"
                }
            })
        );
    }

    #[test]
    fn code_mapping() {
        assert_eq!(Error::SignatureInvalid.code(), "validation_error");
        assert_eq!(Error::KeyMissing.code(), "internal_error");
        assert_eq!(Error::NotFound("entry 9".into()).code(), "not_found");
        assert_eq!(Error::InvalidJwt("2 segments".into()).code(), "bad_request");
    }
}
