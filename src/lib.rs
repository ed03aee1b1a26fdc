//! An API for the issuance, verification, and transparency registration of
//! Compliance Proofs of Evidence (CPOEs).
//!
//! A CPOE is a signed, expiring attestation bundling a set of control test
//! results with provenance, issued as a W3C Verifiable Credential in JWT
//! form and verifiable by anyone against a `did:web` identifier rooted in
//! the issuer's domain.
//!
//! # Design
//!
//! The crate is the trust pipeline of the platform:
//!
//! * [`keystore`] — Ed25519 key lifecycle, private keys AES-256-GCM wrapped
//!   at rest, plus the DID document and JWKS trust anchors.
//! * [`cpoe`] — evidence normalization into the fixed credential-subject
//!   schema.
//! * [`signer`] — JWT-VC signing (`EdDSA`, `typ` of `vc+jwt`) and
//!   signature/expiry/schema verification.
//! * [`sd_jwt`] — selective disclosure over chosen subject fields.
//! * [`receipt`] — hash-chained, signed process receipts with a chain
//!   digest bound into the CPOE.
//! * [`verifier`] — the orchestrator: DID-based key selection with a
//!   trusted-set fallback, plus policy, receipt-chain, and input-binding
//!   checks.
//! * [`transparency`] — append-only statement log issuing Merkle inclusion
//!   receipts.
//!
//! HTTP routing, persistence, and authentication live in external
//! collaborators that consume these modules; nothing here binds a socket.

pub mod config;
pub mod core;
pub mod cpoe;
pub mod did;
pub mod error;
pub mod keystore;
pub mod policy;
pub mod receipt;
pub mod sd_jwt;
pub mod signer;
pub mod transparency;
pub mod verifier;

/// Re-export basic types
pub use crate::core::{Kind, OneMany};
pub use crate::error::Error;

/// Re-export signature primitives so callers can name key types without a
/// separate dependency.
pub use ed25519_dalek;
