//! End-to-end RFC 9421 signing scenarios over the transport-agnostic
//! request view: one per supported long-term algorithm, plus the replay,
//! freshness, and body-integrity rejections.

use chrono::Utc;

use sage_core::{
    digest, sign_message, verify_message, CoveredComponent, KeyPair, KeyType, NonceStore,
    SignableMessage, SignatureInputParams, VerifyOptions,
};

fn covered(ids: &[&str]) -> Vec<CoveredComponent> {
    ids.iter().map(|s| s.parse().unwrap()).collect()
}

/// S1: Ed25519 over a GET with derived components only.
#[test]
fn ed25519_get_sign_verify() {
    let pair = KeyPair::generate(KeyType::Ed25519);
    let mut req =
        SignableMessage::request("GET", "https://sage.dev/resource/123?user=alice").unwrap();
    req.set_header("Host", "sage.dev");
    req.set_header("Date", "Mon, 24 Jun 2024 12:00:00 GMT");

    let params = SignatureInputParams {
        covered_components: covered(&["@method", "@authority", "@path", "@query"]),
        created: Some(1_719_234_000),
        key_id: Some("agent-key-1".into()),
        ..Default::default()
    };
    sign_message(&mut req, "sig1", params, pair.private_key()).unwrap();

    assert!(req.header_joined("signature").is_some());
    assert!(req
        .header_joined("signature-input")
        .unwrap()
        .contains("created=1719234000"));

    // The fixed creation instant is long past; age checking is switched off
    // to exercise the signature itself.
    let opts = VerifyOptions { max_age: None, ..Default::default() };
    let verified = verify_message(&req, pair.public_key(), &opts).unwrap();
    assert_eq!(verified.len(), 1);
}

/// S2: ECDSA-P256 over a POST with Content-Digest covered.
#[test]
fn p256_post_with_content_digest() {
    let pair = KeyPair::generate(KeyType::EcdsaP256);
    let mut req = SignableMessage::request("POST", "https://sage.dev/submit").unwrap();
    req.set_header("Host", "sage.dev");
    req.set_header("Date", "Mon, 24 Jun 2024 12:00:00 GMT");
    req.set_body(b"{\"a\":1}".to_vec());
    digest::attach(&mut req);

    let params = SignatureInputParams {
        covered_components: covered(&["date", "content-digest"]),
        created: Some(Utc::now().timestamp()),
        ..Default::default()
    };
    sign_message(&mut req, "sig1", params, pair.private_key()).unwrap();
    verify_message(&req, pair.public_key(), &VerifyOptions::default()).unwrap();
}

/// S3: secp256k1 in the Ethereum convention, address bound into the
/// covered set.
#[test]
fn secp256k1_ethereum_binding() {
    let pair = KeyPair::generate(KeyType::EcdsaSecp256k1);
    let address = pair.public_key().eth_address().unwrap();

    let mut req = SignableMessage::request("POST", "https://sage.dev/tx").unwrap();
    req.set_header("Host", "sage.dev");
    req.set_header("x-ethereum-address", &address);
    req.set_body(br#"{"action":"transfer","amount":100,"to":"0x742d35Cc"}"#.to_vec());
    digest::attach(&mut req);

    let params = SignatureInputParams {
        covered_components: covered(&["@method", "x-ethereum-address", "content-digest"]),
        created: Some(Utc::now().timestamp()),
        key_id: Some(address.clone()),
        ..Default::default()
    };
    sign_message(&mut req, "eth", params, pair.private_key()).unwrap();

    // Raw 64-byte r ‖ s, never DER.
    let sig_value = req.header_joined("signature").unwrap();
    let b64 = sig_value
        .strip_prefix("eth=:")
        .and_then(|s| s.strip_suffix(':'))
        .unwrap();
    use base64::Engine as _;
    let raw = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
    assert_eq!(raw.len(), 64);

    assert!(req
        .header_joined("signature-input")
        .unwrap()
        .contains(";alg=\"ecdsa-secp256k1-sha256\""));

    verify_message(&req, pair.public_key(), &VerifyOptions::default()).unwrap();

    // The declared address is derived from the very key that signed.
    assert_eq!(
        req.header_joined("x-ethereum-address").as_deref(),
        Some(address.as_str())
    );
}

/// S4: an identical resubmission is a replay.
#[test]
fn replayed_request_rejected() {
    let pair = KeyPair::generate(KeyType::Ed25519);
    let mut req =
        SignableMessage::request("GET", "https://sage.dev/resource/123?user=alice").unwrap();
    req.set_header("Host", "sage.dev");

    let params = SignatureInputParams {
        covered_components: covered(&["@method", "@authority", "@path", "@query"]),
        created: Some(Utc::now().timestamp()),
        nonce: Some("b64-unique-nonce-0001".into()),
        ..Default::default()
    };
    sign_message(&mut req, "sig1", params, pair.private_key()).unwrap();

    let store = NonceStore::default();
    let opts = VerifyOptions { nonce_store: Some(&store), ..Default::default() };
    verify_message(&req, pair.public_key(), &opts).unwrap();

    let err = verify_message(&req, pair.public_key(), &opts).unwrap_err();
    assert_eq!(err.kind(), sage_core::ErrorKind::Replay);
}

/// S5: creation timestamps beyond the skew window are stale.
#[test]
fn future_timestamp_rejected() {
    let pair = KeyPair::generate(KeyType::Ed25519);
    let mut req = SignableMessage::request("GET", "https://sage.dev/r").unwrap();
    req.set_header("Host", "sage.dev");

    let params = SignatureInputParams {
        covered_components: covered(&["@method"]),
        created: Some(Utc::now().timestamp() + 600),
        ..Default::default()
    };
    sign_message(&mut req, "sig1", params, pair.private_key()).unwrap();

    let opts = VerifyOptions { max_clock_skew: Some(300), ..Default::default() };
    let err = verify_message(&req, pair.public_key(), &opts).unwrap_err();
    assert_eq!(err.kind(), sage_core::ErrorKind::Stale);
}

/// S6: body mutation under a covered Content-Digest.
#[test]
fn tampered_body_rejected() {
    let pair = KeyPair::generate(KeyType::EcdsaP256);
    let mut req = SignableMessage::request("POST", "https://sage.dev/submit").unwrap();
    req.set_header("Host", "sage.dev");
    req.set_header("Date", "Mon, 24 Jun 2024 12:00:00 GMT");
    req.set_body(b"{\"a\":1}".to_vec());
    digest::attach(&mut req);

    let params = SignatureInputParams {
        covered_components: covered(&["date", "content-digest"]),
        created: Some(Utc::now().timestamp()),
        ..Default::default()
    };
    sign_message(&mut req, "sig1", params, pair.private_key()).unwrap();

    req.set_body(b"{\"a\":2}".to_vec());
    let err = verify_message(&req, pair.public_key(), &VerifyOptions::default()).unwrap_err();
    assert_eq!(err.kind(), sage_core::ErrorKind::DigestMismatch);
}

/// Tampering any covered component flips verification.
#[test]
fn tampered_covered_query_param_rejected() {
    let pair = KeyPair::generate(KeyType::Ed25519);
    let mut req = SignableMessage::request("GET", "https://sage.dev/r?user=alice&v=1").unwrap();
    req.set_header("Host", "sage.dev");

    let params = SignatureInputParams {
        covered_components: vec![
            "@method".parse().unwrap(),
            CoveredComponent::query_param("user"),
        ],
        created: Some(Utc::now().timestamp()),
        ..Default::default()
    };
    sign_message(&mut req, "sig1", params, pair.private_key()).unwrap();
    verify_message(&req, pair.public_key(), &VerifyOptions::default()).unwrap();

    let mut tampered = SignableMessage::request("GET", "https://sage.dev/r?user=mallory&v=1").unwrap();
    tampered.set_header("Host", "sage.dev");
    for name in ["signature-input", "signature"] {
        for value in req.header_values(name) {
            let value = value.to_owned();
            tampered.append_header(name, &value);
        }
    }
    let err = verify_message(&tampered, pair.public_key(), &VerifyOptions::default()).unwrap_err();
    assert_eq!(err.kind(), sage_core::ErrorKind::InvalidSignature);
}

/// An uncovered header may drift without affecting the signature.
#[test]
fn uncovered_components_are_free_to_change() {
    let pair = KeyPair::generate(KeyType::Ed25519);
    let mut req = SignableMessage::request("GET", "https://sage.dev/r").unwrap();
    req.set_header("Host", "sage.dev");
    req.set_header("X-Trace", "abc");

    let params = SignatureInputParams {
        covered_components: covered(&["@method", "@authority"]),
        created: Some(Utc::now().timestamp()),
        ..Default::default()
    };
    sign_message(&mut req, "sig1", params, pair.private_key()).unwrap();

    req.set_header("X-Trace", "changed");
    verify_message(&req, pair.public_key(), &VerifyOptions::default()).unwrap();
}
