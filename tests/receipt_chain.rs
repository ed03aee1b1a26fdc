//! Receipt chains bound into CPOEs: issuance with process provenance, full
//! chain verification through the verifier, and tamper scenarios.

mod utils;

use corsair_trust::cpoe::CpoeBuilder;
use corsair_trust::receipt::{GENESIS_HASH, ReceiptChain, verify_chain};
use corsair_trust::signer;
use corsair_trust::verifier::{VerifyOptions, Verifier};
use serde_json::json;
use utils::{PLATFORM_DID, StaticResolver, config, evidence, keystore_with_active};

fn pipeline_chain(keypair: &corsair_trust::keystore::Keypair) -> ReceiptChain {
    let mut chain = ReceiptChain::new();
    let normalized = json!({"controls": 1});
    chain
        .append("ingest-evidence", &evidence(), &normalized, true, None, keypair)
        .expect("append");
    chain
        .append("score-summary", &normalized, &json!({"score": 100}), true, None, keypair)
        .expect("append");
    chain
        .append(
            "assemble-credential",
            &json!({"score": 100}),
            &json!({"assembled": true}),
            false,
            Some("builder-env-v1".to_string()),
            keypair,
        )
        .expect("append");
    chain
}

#[tokio::test]
async fn chain_digest_stamped_and_verified() {
    utils::init_tracer();
    let (store, keypair) = keystore_with_active().await;
    let chain = pipeline_chain(&keypair);

    let claims = CpoeBuilder::new()
        .evidence(evidence())
        .did(PLATFORM_DID)
        .process_provenance(chain.process_provenance().expect("provenance"))
        .build()
        .expect("build");
    let jwt = signer::sign(&claims, &keypair, &config()).expect("sign");

    let verifier = Verifier::new(config(), StaticResolver::unavailable(), store);
    let options = VerifyOptions {
        receipts: Some(chain.receipts().to_vec()),
        ..VerifyOptions::default()
    };
    let report = verifier.verify(&jwt, &options).await.expect("should verify");

    assert!(report.result.valid, "reason: {:?}", report.result.reason);
    let outcome = report.receipt_chain.expect("chain was checked");
    assert!(outcome.chain_valid);
    assert_eq!(outcome.receipts_verified, 3);
    assert_eq!(outcome.receipts_total, 3);
    assert_eq!(outcome.reproducible_steps, 2);
    assert_eq!(outcome.attested_steps, 1);
    assert_eq!(
        outcome.chain_digest,
        chain.chain_digest().expect("digest"),
        "recomputed digest matches the stamped one"
    );
}

#[tokio::test]
async fn swapped_receipts_flip_chain_valid() {
    let (store, keypair) = keystore_with_active().await;
    let chain = pipeline_chain(&keypair);
    let digest = chain.chain_digest().expect("digest");

    let claims = CpoeBuilder::new()
        .evidence(evidence())
        .did(PLATFORM_DID)
        .process_provenance(chain.process_provenance().expect("provenance"))
        .build()
        .expect("build");
    let jwt = signer::sign(&claims, &keypair, &config()).expect("sign");

    let mut swapped = chain.receipts().to_vec();
    swapped.swap(1, 2);

    let verifier = Verifier::new(config(), StaticResolver::unavailable(), store);
    let options = VerifyOptions { receipts: Some(swapped), ..VerifyOptions::default() };
    let report = verifier.verify(&jwt, &options).await.expect("should verify");

    let outcome = report.receipt_chain.expect("chain was checked");
    assert!(!outcome.chain_valid);
    // signatures are individually intact
    assert_eq!(outcome.receipts_verified, outcome.receipts_total);
    assert_ne!(outcome.chain_digest, digest);
    // a broken chain does not flip the signature verdict
    assert!(report.result.valid);
}

#[tokio::test]
async fn genesis_and_links() {
    let (_store, keypair) = keystore_with_active().await;
    let chain = pipeline_chain(&keypair);
    let receipts = chain.receipts();

    assert_eq!(receipts[0].prev_hash, GENESIS_HASH);
    for window in receipts.windows(2) {
        assert_eq!(window[1].prev_hash, window[0].record_hash().expect("hash"));
    }
}

#[tokio::test]
async fn inserted_receipt_detected() {
    let (_store, keypair) = keystore_with_active().await;
    let chain = pipeline_chain(&keypair);
    let digest = chain.chain_digest().expect("digest");

    // splice in a receipt from a different chain
    let mut other = ReceiptChain::new();
    other.append("rogue-step", &json!({}), &json!({}), false, None, &keypair).expect("append");
    let mut spliced = chain.receipts().to_vec();
    spliced.insert(1, other.receipts()[0].clone());

    let outcome =
        verify_chain(&spliced, &digest, &keypair.verifying_key()).expect("should verify");
    assert!(!outcome.chain_valid);
}

#[tokio::test]
async fn wrong_claimed_digest_detected() {
    let (_store, keypair) = keystore_with_active().await;
    let chain = pipeline_chain(&keypair);

    let outcome = verify_chain(chain.receipts(), &"0".repeat(64), &keypair.verifying_key())
        .expect("should verify");
    assert!(!outcome.chain_valid);
    assert_eq!(outcome.receipts_verified, outcome.receipts_total);
}
