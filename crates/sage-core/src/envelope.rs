//! Header-envelope mapping for [`Message`].
//!
//! Serializes a message into `X-Agent-DID`-family headers for
//! transport-agnostic carriage and parses it back. Parsing is deliberately
//! tolerant: unknown headers are ignored, optional fields default, and a
//! malformed `X-Timestamp` silently becomes `now` — freshness is
//! authoritative from the RFC 9421 `created` parameter, not the envelope.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::did::AgentDid;
use crate::error::SageError;
use crate::keys::SignatureAlgorithm;
use crate::message::{render_scalar, Message};
use crate::request::SignableMessage;

pub const AGENT_DID: &str = "X-Agent-DID";
pub const MESSAGE_ID: &str = "X-Message-ID";
pub const TIMESTAMP: &str = "X-Timestamp";
pub const NONCE: &str = "X-Nonce";
pub const ALGORITHM: &str = "X-Signature-Algorithm";
pub const KEY_ID: &str = "X-Key-ID";
pub const SIGNED_FIELDS: &str = "X-Signed-Fields";
pub const METADATA_PREFIX: &str = "X-Metadata-";

/// Render a message into its envelope headers.
///
/// Only scalar metadata values travel; arrays and objects stay behind (the
/// structured representation is authoritative for them). Signature bytes are
/// not part of the envelope — RFC 9421 headers carry them when a request is
/// signed.
pub fn envelope_headers(message: &Message) -> Vec<(String, String)> {
    let mut headers = vec![
        (AGENT_DID.to_owned(), message.agent_did().to_string()),
        (MESSAGE_ID.to_owned(), message.message_id().to_owned()),
        (
            TIMESTAMP.to_owned(),
            message
                .timestamp()
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        ),
        (NONCE.to_owned(), message.nonce().to_owned()),
    ];
    if let Some(alg) = message.algorithm() {
        headers.push((ALGORITHM.to_owned(), alg.as_str().to_owned()));
    }
    if let Some(key_id) = message.key_id() {
        headers.push((KEY_ID.to_owned(), key_id.to_owned()));
    }
    headers.push((
        SIGNED_FIELDS.to_owned(),
        message
            .signed_fields()
            .iter()
            .map(|f| f.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(","),
    ));
    for (key, value) in message.metadata() {
        if let Some(rendered) = render_scalar(value) {
            headers.push((format!("{METADATA_PREFIX}{key}"), rendered));
        }
    }
    headers
}

/// Stamp the envelope headers and body onto a transport request.
pub fn attach_to_request(message: &Message, request: &mut SignableMessage) {
    for (name, value) in envelope_headers(message) {
        request.set_header(&name, &value);
    }
    request.set_body(message.body().to_vec());
}

/// Parse a message out of envelope headers plus a body.
///
/// `X-Agent-DID` is the only required field. Missing id/nonce default to
/// fresh values; an unparseable `X-Timestamp` degrades to `now` without
/// error.
pub fn parse_from_headers<'a, I>(headers: I, body: &[u8]) -> Result<Message, SageError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut did = None;
    let mut message_id = None;
    let mut timestamp = None;
    let mut nonce = None;
    let mut algorithm = None;
    let mut key_id = None;
    let mut signed_fields: Option<Vec<String>> = None;
    let mut metadata: Vec<(String, Value)> = Vec::new();

    for (name, value) in headers {
        if name.eq_ignore_ascii_case(AGENT_DID) {
            did = Some(AgentDid::parse(value)?);
        } else if name.eq_ignore_ascii_case(MESSAGE_ID) {
            message_id = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case(TIMESTAMP) {
            timestamp = Some(parse_timestamp(value));
        } else if name.eq_ignore_ascii_case(NONCE) {
            nonce = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case(ALGORITHM) {
            algorithm = Some(SignatureAlgorithm::parse(value)?);
        } else if name.eq_ignore_ascii_case(KEY_ID) {
            key_id = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case(SIGNED_FIELDS) {
            signed_fields = Some(
                value
                    .split(',')
                    .map(|f| f.trim().to_ascii_lowercase())
                    .filter(|f| !f.is_empty())
                    .collect(),
            );
        } else if let Some(key) = metadata_key(name) {
            metadata.push((key.to_owned(), parse_scalar(value)));
        }
        // Unknown headers are transport noise; skip them.
    }

    let did = did
        .ok_or_else(|| SageError::InvalidArgument(format!("{AGENT_DID} header missing")))?;

    let mut builder = Message::builder(did)
        .body(body.to_vec())
        .raw_signature_fields(algorithm, key_id);
    if let Some(id) = message_id {
        builder = builder.message_id(id);
    }
    if let Some(ts) = timestamp {
        builder = builder.timestamp(ts);
    }
    if let Some(n) = nonce {
        builder = builder.nonce(n);
    }
    if let Some(fields) = signed_fields {
        builder = builder.signed_fields(fields);
    }
    for (key, value) in metadata {
        builder = builder.metadata_entry(key, value);
    }
    builder.build()
}

/// Case-insensitive `X-Metadata-` prefix strip, preserving key case.
fn metadata_key(name: &str) -> Option<&str> {
    let prefix = name.get(..METADATA_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(METADATA_PREFIX) {
        return None;
    }
    name.get(METADATA_PREFIX.len()..).filter(|k| !k.is_empty())
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    // Graceful degradation: the envelope timestamp is advisory, so a
    // malformed value becomes `now` and freshness is judged downstream.
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_scalar(value: &str) -> Value {
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => match other.parse::<serde_json::Number>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::String(other.to_owned()),
        },
    }
}
