//! `Content-Digest` construction and body-integrity checking (RFC 9530
//! rendering, as RFC 9421 covers it).
//!
//! `sha-256` is mandatory; a `sha-512` entry is verified when present.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256, Sha512};

use crate::error::SageError;
use crate::request::SignableMessage;
use crate::sfv::{BareItem, Dictionary, Member};

pub const HEADER: &str = "content-digest";

/// Render a `Content-Digest` value for a body: `sha-256=:<base64>:`.
pub fn content_digest(body: &[u8]) -> String {
    format!("sha-256=:{}:", BASE64.encode(Sha256::digest(body)))
}

/// Stamp the header onto a message from its current body.
pub fn attach(msg: &mut SignableMessage) {
    let value = content_digest(msg.body());
    msg.set_header(HEADER, &value);
}

/// Recompute the body digest and compare against the `Content-Digest` header.
///
/// A missing header fails `missing-digest`; a header without the mandatory
/// `sha-256` entry fails the same way. Any present entry that does not match
/// the body fails `digest-mismatch`.
pub fn verify(msg: &SignableMessage) -> Result<(), SageError> {
    let value = msg.header_joined(HEADER).ok_or(SageError::MissingDigest)?;
    let dict = Dictionary::parse(&value)
        .map_err(|_| SageError::InvalidArgument("malformed Content-Digest header".into()))?;

    let mut saw_sha256 = false;
    for (algorithm, member) in &dict.0 {
        let declared = match member {
            Member::Item(item) => match &item.value {
                BareItem::Bytes(b) => b.as_slice(),
                _ => {
                    return Err(SageError::InvalidArgument(
                        "Content-Digest entry is not a byte sequence".into(),
                    ))
                }
            },
            Member::InnerList(_) => {
                return Err(SageError::InvalidArgument(
                    "Content-Digest entry is not a byte sequence".into(),
                ))
            }
        };
        match algorithm.as_str() {
            "sha-256" => {
                saw_sha256 = true;
                if declared != Sha256::digest(msg.body()).as_slice() {
                    return Err(SageError::DigestMismatch);
                }
            }
            "sha-512" => {
                if declared != Sha512::digest(msg.body()).as_slice() {
                    return Err(SageError::DigestMismatch);
                }
            }
            // Unknown algorithms are ignored so peers may add stronger ones.
            _ => {}
        }
    }
    if !saw_sha256 {
        return Err(SageError::MissingDigest);
    }
    Ok(())
}
