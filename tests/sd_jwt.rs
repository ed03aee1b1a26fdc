//! Selective disclosure end to end: issue with disclosable fields, present
//! a subset, verify, and detect tampering.

mod utils;

use corsair_trust::Error;
use corsair_trust::sd_jwt::{SdJwtBuilder, present, split, verify};
use corsair_trust::verifier::{VerifyOptions, Verifier};
use utils::{PLATFORM_DID, StaticResolver, claims_for, config, keystore_with_active};

fn issued_sd_jwt(keypair: &corsair_trust::keystore::Keypair) -> String {
    SdJwtBuilder::new()
        .claims(claims_for(PLATFORM_DID))
        .disclosable("summary")
        .disclosable("frameworks")
        .build(keypair, &config())
        .expect("should issue")
}

#[tokio::test]
async fn partial_disclosure_verifies() {
    utils::init_tracer();
    let (store, keypair) = keystore_with_active().await;
    let sd_jwt = issued_sd_jwt(&keypair);

    let original_summary = claims_for(PLATFORM_DID).vc.credential_subject.summary;

    // the holder reveals only the summary
    let presented = present(&sd_jwt, &["summary"]).expect("should present");
    let verifier = Verifier::new(config(), StaticResolver::unavailable(), store);
    let report =
        verifier.verify(&presented, &VerifyOptions::default()).await.expect("should verify");

    assert!(report.result.valid, "reason: {:?}", report.result.reason);
    assert_eq!(report.hidden_claim_count, 1);

    let disclosed = report.disclosed.expect("summary was disclosed");
    assert_eq!(disclosed.len(), 1);
    let summary: corsair_trust::cpoe::Summary =
        serde_json::from_value(disclosed["summary"].clone()).expect("summary decodes");
    assert_eq!(summary, original_summary);
}

#[tokio::test]
async fn full_disclosure_round_trip() {
    let (store, keypair) = keystore_with_active().await;
    let sd_jwt = issued_sd_jwt(&keypair);

    let verifier = Verifier::new(config(), StaticResolver::unavailable(), store);
    let report =
        verifier.verify(&sd_jwt, &VerifyOptions::default()).await.expect("should verify");
    assert!(report.result.valid);
    assert_eq!(report.hidden_claim_count, 0);
    assert_eq!(report.disclosed.expect("disclosed").len(), 2);
}

#[tokio::test]
async fn reveal_nothing_still_verifies() {
    let (store, keypair) = keystore_with_active().await;
    let sd_jwt = issued_sd_jwt(&keypair);

    let presented = present(&sd_jwt, &[]).expect("should present");
    let verifier = Verifier::new(config(), StaticResolver::unavailable(), store);
    let report =
        verifier.verify(&presented, &VerifyOptions::default()).await.expect("should verify");

    assert!(report.result.valid);
    assert_eq!(report.hidden_claim_count, 2);
    assert!(report.disclosed.is_none());
    // hidden fields are not reported as values
    assert!(report.result.summary.is_none());
}

#[tokio::test]
async fn tampered_disclosure_detected() {
    let (store, keypair) = keystore_with_active().await;
    let sd_jwt = issued_sd_jwt(&keypair);

    // flip one byte in the first disclosure
    let (jwt, disclosures) = split(&sd_jwt).expect("split");
    let mut doctored = disclosures[0].to_string();
    let replacement = if doctored.starts_with('W') { "X" } else { "W" };
    doctored.replace_range(0..1, replacement);
    let tampered = format!("{jwt}~{doctored}~{}~", disclosures[1]);

    let verifier = Verifier::new(config(), StaticResolver::unavailable(), store);
    let err = verifier
        .verify(&tampered, &VerifyOptions::default())
        .await
        .expect_err("tamper must be detected");
    assert!(matches!(err, Error::DisclosureMismatch(_)));
}

#[tokio::test]
async fn codec_verify_reports_undisclosed_digests() {
    let (store, keypair) = keystore_with_active().await;
    let sd_jwt = issued_sd_jwt(&keypair);
    let presented = present(&sd_jwt, &["frameworks"]).expect("should present");

    let (result, reconstruction) =
        verify(&presented, &store.trusted_keys(), &config()).expect("should verify");
    assert!(result.valid, "reason: {:?}", result.reason);
    assert_eq!(reconstruction.disclosed.keys().collect::<Vec<_>>(), vec!["frameworks"]);
    assert_eq!(reconstruction.undisclosed_digests.len(), 1);

    // JWT bytes never change across presentation
    let (jwt_a, _) = split(&sd_jwt).expect("split");
    let (jwt_b, _) = split(&presented).expect("split");
    assert_eq!(jwt_a, jwt_b);
}
