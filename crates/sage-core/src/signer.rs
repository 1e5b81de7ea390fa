//! Sign side of RFC 9421 message signatures.
//!
//! Builds the signature base, signs it with a long-term key or a session
//! MAC, and writes the `Signature-Input` / `Signature` header pair. The
//! message is otherwise left untouched.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::canonical::{signature_base, SignatureInputParams};
use crate::error::SageError;
use crate::keys::{PrivateKey, SignatureAlgorithm};
use crate::request::SignableMessage;
use crate::session::Session;

pub const SIGNATURE_INPUT_HEADER: &str = "Signature-Input";
pub const SIGNATURE_HEADER: &str = "Signature";

fn validate_signature_name(name: &str) -> Result<(), SageError> {
    let head_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '*');
    let tail_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.' | '*'));
    if name.is_empty() || !head_ok || !tail_ok {
        return Err(SageError::InvalidArgument(format!(
            "signature name {name:?} is not a valid dictionary key"
        )));
    }
    Ok(())
}

fn attach_signature(
    msg: &mut SignableMessage,
    sig_name: &str,
    params: &SignatureInputParams,
    signature: &[u8],
) -> Result<(), SageError> {
    msg.append_header(
        SIGNATURE_INPUT_HEADER,
        &format!("{sig_name}={}", params.serialize()?),
    );
    msg.append_header(
        SIGNATURE_HEADER,
        &format!("{sig_name}=:{}:", BASE64.encode(signature)),
    );
    Ok(())
}

/// Sign `msg` with a long-term key under the label `sig_name`.
///
/// The algorithm in `params` must agree with the key type; when absent it is
/// inferred from the key. On success the two signature headers are appended
/// and nothing else on the message changes.
pub fn sign_message(
    msg: &mut SignableMessage,
    sig_name: &str,
    mut params: SignatureInputParams,
    key: &PrivateKey,
) -> Result<SignatureInputParams, SageError> {
    validate_signature_name(sig_name)?;

    let natural = SignatureAlgorithm::for_key_type(key.key_type())?;
    match params.algorithm {
        None => params.algorithm = Some(natural),
        Some(declared) if declared == natural => {}
        Some(declared) => {
            return Err(SageError::UnsupportedAlgorithm(format!(
                "algorithm {declared} incompatible with {} key",
                key.key_type()
            )))
        }
    }

    let base = signature_base(msg, &params)?;
    let signature = key.sign(base.as_bytes())?;
    attach_signature(msg, sig_name, &params, &signature)?;
    Ok(params)
}

/// Sign `msg` with a session MAC instead of a long-term key.
///
/// Forces algorithm `hmac-sha256` and `keyid` = session id, so the receiver
/// resolves the key through its session registry.
pub fn sign_message_with_session(
    msg: &mut SignableMessage,
    sig_name: &str,
    mut params: SignatureInputParams,
    session: &Session,
) -> Result<SignatureInputParams, SageError> {
    validate_signature_name(sig_name)?;
    params.algorithm = Some(SignatureAlgorithm::HmacSha256);
    params.key_id = Some(session.id().to_owned());

    let base = signature_base(msg, &params)?;
    let tag = session.sign_covered(base.as_bytes())?;
    attach_signature(msg, sig_name, &params, &tag)?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyPair, KeyType};

    fn request() -> SignableMessage {
        let mut req = SignableMessage::request("GET", "https://sage.dev/resource").unwrap();
        req.set_header("Host", "sage.dev");
        req
    }

    #[test]
    fn writes_both_headers() {
        let mut msg = request();
        let pair = KeyPair::generate(KeyType::Ed25519);
        let params = SignatureInputParams {
            covered_components: vec!["@method".parse().unwrap(), "@authority".parse().unwrap()],
            created: Some(1_719_234_000),
            key_id: Some("key-1".into()),
            ..Default::default()
        };
        sign_message(&mut msg, "sig1", params, pair.private_key()).unwrap();

        let input = msg.header_joined("signature-input").unwrap();
        assert!(input.starts_with("sig1=(\"@method\" \"@authority\")"));
        assert!(input.contains(";alg=\"ed25519\""));
        let sig = msg.header_joined("signature").unwrap();
        assert!(sig.starts_with("sig1=:") && sig.ends_with(':'));
    }

    #[test]
    fn algorithm_must_match_key() {
        let mut msg = request();
        let pair = KeyPair::generate(KeyType::EcdsaP256);
        let params = SignatureInputParams {
            covered_components: vec!["@method".parse().unwrap()],
            algorithm: Some(SignatureAlgorithm::Ed25519),
            ..Default::default()
        };
        let err = sign_message(&mut msg, "sig1", params, pair.private_key()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn rejects_bad_signature_names() {
        let mut msg = request();
        let pair = KeyPair::generate(KeyType::Ed25519);
        for name in ["", "Sig1", "1sig", "sig one"] {
            let params = SignatureInputParams {
                covered_components: vec!["@method".parse().unwrap()],
                ..Default::default()
            };
            assert!(sign_message(&mut msg, name, params, pair.private_key()).is_err());
        }
    }
}
