//! Verify side of RFC 9421 message signatures.
//!
//! Per signature label the pipeline is: parse → base-build → freshness →
//! crypto-verify → digest-check. Any stage short-circuits to failure and no
//! later stage runs; the first failure is what the caller sees. With
//! multiple signatures present the default policy requires every selected
//! signature to verify; `AnyValidSignature` relaxes that to at least one.
//! Nonces are burned last, and only for signatures the policy accepted —
//! a rejected call must leave the store untouched, or an attacker could
//! kill a genuine message by replaying it with a junk signature appended.

use chrono::Utc;

use crate::canonical::{signature_base, SignatureInputParams};
use crate::digest;
use crate::error::SageError;
use crate::keys::{PublicKey, SignatureAlgorithm};
use crate::replay::{NonceStore, Scope};
use crate::request::SignableMessage;
use crate::session::Session;
use crate::sfv::{BareItem, Dictionary, Member};

/// Multi-signature acceptance policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    /// Every selected signature must verify.
    #[default]
    AllSignatures,
    /// At least one selected signature must verify.
    AnyValidSignature,
}

/// Verification options.
///
/// `max_age` and `max_clock_skew` are `None` to disable the respective
/// check; the defaults are 10 minutes and 5 minutes.
#[derive(Clone)]
pub struct VerifyOptions<'a> {
    /// Verify only this label; `None` selects every signature present.
    pub signature_name: Option<String>,
    /// Maximum accepted age of `created`, in seconds.
    pub max_age: Option<i64>,
    /// Clock-skew tolerance applied at both ends of the window, in seconds.
    pub max_clock_skew: Option<i64>,
    pub policy: VerifyPolicy,
    /// Nonce store for replay protection; nonces are only consumed when set.
    pub nonce_store: Option<&'a NonceStore>,
    /// Binding scope for consumed nonces.
    pub nonce_scope: Scope,
}

impl Default for VerifyOptions<'_> {
    fn default() -> Self {
        Self {
            signature_name: None,
            max_age: Some(600),
            max_clock_skew: Some(300),
            policy: VerifyPolicy::default(),
            nonce_store: None,
            nonce_scope: Scope::Global,
        }
    }
}

/// The key material to verify against.
#[derive(Clone, Copy)]
pub enum VerifierKey<'a> {
    /// A resolved long-term public key.
    LongTerm(&'a PublicKey),
    /// An established session; signatures carry `hmac-sha256` tags.
    Session(&'a Session),
}

/// One successfully verified signature.
#[derive(Debug, Clone)]
pub struct VerifiedSignature {
    pub name: String,
    pub params: SignatureInputParams,
}

/// Verify the signatures on `msg` against a long-term public key.
pub fn verify_message(
    msg: &SignableMessage,
    key: &PublicKey,
    opts: &VerifyOptions<'_>,
) -> Result<Vec<VerifiedSignature>, SageError> {
    verify_with(msg, VerifierKey::LongTerm(key), opts)
}

/// Verify the signatures on `msg` against an established session's MAC key.
pub fn verify_message_with_session(
    msg: &SignableMessage,
    session: &Session,
    opts: &VerifyOptions<'_>,
) -> Result<Vec<VerifiedSignature>, SageError> {
    verify_with(msg, VerifierKey::Session(session), opts)
}

/// Shared verification driver.
pub fn verify_with(
    msg: &SignableMessage,
    key: VerifierKey<'_>,
    opts: &VerifyOptions<'_>,
) -> Result<Vec<VerifiedSignature>, SageError> {
    let input_value = msg
        .header_joined("signature-input")
        .ok_or_else(|| SageError::InvalidArgument("Signature-Input header missing".into()))?;
    let signature_value = msg
        .header_joined("signature")
        .ok_or_else(|| SageError::InvalidArgument("Signature header missing".into()))?;

    let inputs = Dictionary::parse(&input_value)?;
    let signatures = Dictionary::parse(&signature_value)?;

    let selected: Vec<&str> = match &opts.signature_name {
        Some(name) => {
            if inputs.get(name).is_none() {
                return Err(SageError::InvalidArgument(format!(
                    "no signature labeled {name:?}"
                )));
            }
            vec![name.as_str()]
        }
        None => inputs.0.iter().map(|(k, _)| k.as_str()).collect(),
    };
    if selected.is_empty() {
        return Err(SageError::InvalidArgument(
            "Signature-Input carries no signatures".into(),
        ));
    }

    let mut verified = Vec::with_capacity(selected.len());
    let mut first_failure: Option<SageError> = None;
    for name in selected {
        match verify_one(msg, name, &inputs, &signatures, key, opts) {
            Ok(v) => verified.push(v),
            Err(e) => {
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }
    }

    let verified = match opts.policy {
        VerifyPolicy::AllSignatures => match first_failure {
            Some(e) => return Err(e),
            None => verified,
        },
        VerifyPolicy::AnyValidSignature => {
            if verified.is_empty() {
                // Selection was non-empty, so a failure was recorded.
                return Err(first_failure
                    .unwrap_or_else(|| SageError::InvalidSignature("no valid signature".into())));
            }
            verified
        }
    };

    // Nonce-burn only after the policy accepted, and only for the accepted
    // set: a failed verification must not consume replay state.
    if let Some(store) = opts.nonce_store {
        for signature in &verified {
            if let Some(nonce) = &signature.params.nonce {
                store.consume(opts.nonce_scope.clone(), nonce)?;
            }
        }
    }
    Ok(verified)
}

fn verify_one(
    msg: &SignableMessage,
    name: &str,
    inputs: &Dictionary,
    signatures: &Dictionary,
    key: VerifierKey<'_>,
    opts: &VerifyOptions<'_>,
) -> Result<VerifiedSignature, SageError> {
    // Parse.
    let params = match inputs.get(name) {
        Some(Member::InnerList(list)) => SignatureInputParams::from_inner_list(list)?,
        Some(Member::Item(_)) => {
            return Err(SageError::InvalidArgument(format!(
                "Signature-Input member {name:?} is not an inner list"
            )))
        }
        None => {
            return Err(SageError::InvalidArgument(format!(
                "no signature labeled {name:?}"
            )))
        }
    };
    let signature = match signatures.get(name) {
        Some(Member::Item(item)) => match &item.value {
            BareItem::Bytes(b) => b.clone(),
            _ => {
                return Err(SageError::InvalidSignature(format!(
                    "Signature member {name:?} is not a byte sequence"
                )))
            }
        },
        _ => {
            return Err(SageError::InvalidSignature(format!(
                "no Signature entry for label {name:?}"
            )))
        }
    };

    // Base-build.
    let base = signature_base(msg, &params)?;

    // Freshness.
    check_freshness(&params, opts)?;

    // Crypto-verify.
    match key {
        VerifierKey::LongTerm(public) => {
            if params.algorithm == Some(SignatureAlgorithm::HmacSha256) {
                return Err(SageError::UnsupportedAlgorithm(
                    "hmac-sha256 requires a session key".into(),
                ));
            }
            public.verify(params.algorithm, base.as_bytes(), &signature)?;
        }
        VerifierKey::Session(session) => {
            match params.algorithm {
                None | Some(SignatureAlgorithm::HmacSha256) => {}
                Some(other) => {
                    return Err(SageError::UnsupportedAlgorithm(format!(
                        "session signature declared {other}"
                    )))
                }
            }
            if let Some(keyid) = &params.key_id {
                if keyid != session.id() {
                    return Err(SageError::InvalidSignature(format!(
                        "keyid {keyid:?} does not name this session"
                    )));
                }
            }
            session.verify_covered(base.as_bytes(), &signature)?;
        }
    }

    // Digest-check.
    let digest_covered = params
        .covered_components
        .iter()
        .any(|c| c.identifier() == digest::HEADER);
    if digest_covered {
        digest::verify(msg)?;
    }

    Ok(VerifiedSignature { name: name.to_owned(), params })
}

fn check_freshness(
    params: &SignatureInputParams,
    opts: &VerifyOptions<'_>,
) -> Result<(), SageError> {
    let now = Utc::now().timestamp();
    let skew = opts.max_clock_skew.unwrap_or(0).max(0);

    if let Some(created) = params.created {
        if created - now > skew {
            return Err(SageError::Stale(format!(
                "created {created} is {}s in the future",
                created - now
            )));
        }
        if let Some(max_age) = opts.max_age {
            if max_age > 0 && now - created > max_age + skew {
                return Err(SageError::Stale(format!(
                    "created {created} exceeds max age {max_age}s"
                )));
            }
        }
    } else if opts.max_age.is_some_and(|a| a > 0) {
        return Err(SageError::Stale("created parameter absent".into()));
    }

    if let Some(expires) = params.expires {
        if now - expires > skew {
            return Err(SageError::Expired(format!("signature expired at {expires}")));
        }
    }
    Ok(())
}
