//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::Once;

use corsair_trust::config::TrustConfig;
use corsair_trust::cpoe::{CpoeBuilder, CpoeClaims};
use corsair_trust::did::{DidDocument, DidResolver};
use corsair_trust::keystore::{KeyStore, Keypair, MemoryVault};
use serde_json::{Value, json};

/// DID of the platform in every fixture.
pub const PLATFORM_DID: &str = "did:web:proofs.corsair.example";

/// Initialize the tracing subscriber once for the whole test binary.
pub fn init_tracer() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// A resolver serving one pinned DID document, or refusing every lookup.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    pub document: Option<DidDocument>,
}

impl StaticResolver {
    pub fn serving(document: DidDocument) -> Self {
        Self { document: Some(document) }
    }

    pub fn unavailable() -> Self {
        Self { document: None }
    }
}

impl DidResolver for StaticResolver {
    async fn resolve(&self, did: &str) -> anyhow::Result<DidDocument> {
        self.document
            .clone()
            .filter(|document| document.id == did)
            .ok_or_else(|| anyhow::anyhow!("no DID document for {did}"))
    }
}

pub fn config() -> TrustConfig {
    TrustConfig::new(&"a1".repeat(32), PLATFORM_DID).expect("config should validate")
}

pub async fn keystore() -> KeyStore<MemoryVault> {
    KeyStore::open(&config(), MemoryVault::new()).await.expect("keystore should open")
}

pub async fn keystore_with_active() -> (KeyStore<MemoryVault>, Keypair) {
    let store = keystore().await;
    let keypair = store.generate().await.expect("should generate");
    (store, keypair)
}

/// The literal happy-path evidence document.
pub fn evidence() -> Value {
    json!({
        "metadata": {"title": "T", "issuer": "I", "date": "2026-01-01", "scope": "S"},
        "controls": [
            {"id": "C1", "status": "pass", "description": "d", "evidence": "e"}
        ]
    })
}

pub fn claims_for(did: &str) -> CpoeClaims {
    CpoeBuilder::new().evidence(evidence()).did(did).build().expect("claims should build")
}
