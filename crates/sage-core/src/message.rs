//! The application-level message unit.
//!
//! A [`Message`] is built once, signed exactly once, and never mutated
//! afterwards; every field is reached through getters. The signing payload is
//! a deterministic line-based rendering of the declared signed fields, so two
//! independently constructed but equal messages sign identically.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use serde_json::Value;

use crate::did::AgentDid;
use crate::error::SageError;
use crate::keys::{PrivateKey, PublicKey, SignatureAlgorithm};

/// Minimum decoded nonce length: 128 bits.
pub const MIN_NONCE_LEN: usize = 16;

/// Default signed fields, in signing order.
pub const DEFAULT_SIGNED_FIELDS: [&str; 5] =
    ["agent_did", "message_id", "timestamp", "nonce", "body"];

/// A signed (or signable) agent message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    agent_did: AgentDid,
    message_id: String,
    timestamp: DateTime<Utc>,
    nonce: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    algorithm: Option<SignatureAlgorithm>,
    key_id: Option<String>,
    signature: Vec<u8>,
    signed_fields: Vec<String>,
    metadata: serde_json::Map<String, Value>,
}

impl Message {
    pub fn builder(agent_did: AgentDid) -> MessageBuilder {
        MessageBuilder::new(agent_did)
    }

    pub fn agent_did(&self) -> &AgentDid {
        &self.agent_did
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn algorithm(&self) -> Option<SignatureAlgorithm> {
        self.algorithm
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn signed_fields(&self) -> &[String] {
        &self.signed_fields
    }

    pub fn metadata(&self) -> &serde_json::Map<String, Value> {
        &self.metadata
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Structural validation before any registry round-trip: id and nonce
    /// present, nonce carrying at least 128 bits.
    pub fn verify_basic(&self) -> Result<(), SageError> {
        if self.message_id.is_empty() {
            return Err(SageError::InvalidArgument("message id is empty".into()));
        }
        let nonce = BASE64
            .decode(&self.nonce)
            .map_err(|_| SageError::InvalidArgument("nonce is not base64".into()))?;
        if nonce.len() < MIN_NONCE_LEN {
            return Err(SageError::InvalidArgument(format!(
                "nonce must carry at least {MIN_NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }
        Ok(())
    }

    /// Deterministic byte payload the signature covers.
    ///
    /// One `<field>: <value>` line per declared signed field, in declared
    /// order. Unknown field names resolve against headers first, then
    /// metadata; absence is a hard error so a signer cannot silently cover
    /// nothing.
    pub fn signing_payload(&self) -> Result<Vec<u8>, SageError> {
        let mut payload = Vec::new();
        for field in &self.signed_fields {
            let value = self.field_value(field)?;
            payload.extend_from_slice(field.as_bytes());
            payload.extend_from_slice(b": ");
            payload.extend_from_slice(value.as_bytes());
            payload.push(b'\n');
        }
        Ok(payload)
    }

    fn field_value(&self, field: &str) -> Result<String, SageError> {
        match field {
            "agent_did" => Ok(self.agent_did.to_string()),
            "message_id" => Ok(self.message_id.clone()),
            "timestamp" => Ok(self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            "nonce" => Ok(self.nonce.clone()),
            "body" => Ok(BASE64.encode(&self.body)),
            other => {
                if let Some((_, v)) = self
                    .headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(other))
                {
                    return Ok(v.clone());
                }
                if let Some(v) = self.metadata.get(other) {
                    return Ok(render_scalar(v).unwrap_or_else(|| v.to_string()));
                }
                Err(SageError::ComponentNotFound(other.to_owned()))
            }
        }
    }

    /// Sign the message once with a long-term key.
    ///
    /// Fails `invalid-argument` when already signed; build a new message to
    /// re-sign, since any mutation invalidates the signature.
    pub fn sign(mut self, key: &PrivateKey, key_id: &str) -> Result<Message, SageError> {
        if self.is_signed() {
            return Err(SageError::InvalidArgument(
                "message is already signed".into(),
            ));
        }
        self.algorithm = Some(SignatureAlgorithm::for_key_type(key.key_type())?);
        self.key_id = Some(key_id.to_owned());
        let payload = self.signing_payload()?;
        self.signature = key.sign(&payload)?;
        Ok(self)
    }

    /// Verify the message signature against a resolved public key.
    pub fn verify(&self, key: &PublicKey) -> Result<(), SageError> {
        if !self.is_signed() {
            return Err(SageError::InvalidSignature("message is unsigned".into()));
        }
        let payload = self.signing_payload()?;
        key.verify(self.algorithm, &payload, &self.signature)
    }
}

/// Renders JSON scalars the way the envelope does.
pub(crate) fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Builder applying the documented defaults.
pub struct MessageBuilder {
    agent_did: AgentDid,
    message_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    nonce: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    signed_fields: Option<Vec<String>>,
    metadata: serde_json::Map<String, Value>,
    key_id: Option<String>,
    algorithm: Option<SignatureAlgorithm>,
    signature: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(agent_did: AgentDid) -> Self {
        Self {
            agent_did,
            message_id: None,
            timestamp: None,
            nonce: None,
            headers: Vec::new(),
            body: Vec::new(),
            signed_fields: None,
            metadata: serde_json::Map::new(),
            key_id: None,
            algorithm: None,
            signature: Vec::new(),
        }
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn signed_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signed_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Used by the envelope parser to restore declared signing fields.
    pub(crate) fn raw_signature_fields(
        mut self,
        algorithm: Option<SignatureAlgorithm>,
        key_id: Option<String>,
    ) -> Self {
        self.algorithm = algorithm;
        self.key_id = key_id;
        self
    }

    /// Finalize, filling defaults: random 128-bit hex id, `now`, a fresh
    /// 128-bit base64 nonce, and the standard signed-field list.
    pub fn build(self) -> Result<Message, SageError> {
        let message_id = match self.message_id {
            Some(id) if !id.is_empty() => id,
            Some(_) => return Err(SageError::InvalidArgument("message id is empty".into())),
            None => {
                let mut raw = [0u8; 16];
                rand::rngs::OsRng.fill_bytes(&mut raw);
                hex::encode(raw)
            }
        };
        let nonce = match self.nonce {
            Some(n) => n,
            None => {
                let mut raw = [0u8; MIN_NONCE_LEN];
                rand::rngs::OsRng.fill_bytes(&mut raw);
                BASE64.encode(raw)
            }
        };
        let message = Message {
            agent_did: self.agent_did,
            message_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            nonce,
            headers: self.headers,
            body: self.body,
            algorithm: self.algorithm,
            key_id: self.key_id,
            signature: self.signature,
            signed_fields: self
                .signed_fields
                .unwrap_or_else(|| DEFAULT_SIGNED_FIELDS.map(String::from).to_vec()),
            metadata: self.metadata,
        };
        message.verify_basic()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyPair, KeyType};

    fn did() -> AgentDid {
        AgentDid::parse("did:sage:test:alice").unwrap()
    }

    #[test]
    fn builder_defaults() {
        let msg = Message::builder(did()).body(b"hi".to_vec()).build().unwrap();
        assert_eq!(msg.message_id().len(), 32);
        assert!(BASE64.decode(msg.nonce()).unwrap().len() >= MIN_NONCE_LEN);
        assert_eq!(
            msg.signed_fields(),
            &["agent_did", "message_id", "timestamp", "nonce", "body"]
        );
        assert!(!msg.is_signed());
        msg.verify_basic().unwrap();
    }

    #[test]
    fn short_nonce_rejected() {
        let err = Message::builder(did())
            .nonce(BASE64.encode([0u8; 8]))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn sign_verify_and_single_signing() {
        let pair = KeyPair::generate(KeyType::Ed25519);
        let msg = Message::builder(did())
            .body(b"payload".to_vec())
            .build()
            .unwrap()
            .sign(pair.private_key(), "key-1")
            .unwrap();
        assert!(msg.is_signed());
        assert_eq!(msg.key_id(), Some("key-1"));
        msg.verify(pair.public_key()).unwrap();

        // Second signing is refused.
        let err = msg.clone().sign(pair.private_key(), "key-2").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn tampered_body_fails_verification() {
        let pair = KeyPair::generate(KeyType::Ed25519);
        let msg = Message::builder(did())
            .body(b"original".to_vec())
            .build()
            .unwrap()
            .sign(pair.private_key(), "key-1")
            .unwrap();

        let tampered = Message {
            body: b"tampered".to_vec(),
            ..msg.clone()
        };
        assert!(tampered.verify(pair.public_key()).is_err());
    }

    #[test]
    fn signed_fields_may_cover_headers_and_metadata() {
        let pair = KeyPair::generate(KeyType::EcdsaSecp256k1);
        let msg = Message::builder(did())
            .header("x-ethereum-address", "0x742d35cc")
            .metadata_entry("model", Value::String("demo".into()))
            .signed_fields(["agent_did", "nonce", "x-ethereum-address", "model"])
            .build()
            .unwrap()
            .sign(pair.private_key(), "eth-key")
            .unwrap();
        msg.verify(pair.public_key()).unwrap();

        // Covering an absent field is a hard error.
        let err = Message::builder(did())
            .signed_fields(["agent_did", "missing-field"])
            .build()
            .unwrap()
            .sign(pair.private_key(), "k")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ComponentNotFound);
    }

    #[test]
    fn payload_is_deterministic() {
        let msg = Message::builder(did())
            .message_id("m-1")
            .timestamp(Utc::now())
            .nonce(BASE64.encode([7u8; 16]))
            .body(b"abc".to_vec())
            .build()
            .unwrap();
        assert_eq!(msg.signing_payload().unwrap(), msg.signing_payload().unwrap());
    }
}
