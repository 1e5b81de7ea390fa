//! The resolver's view of a registered agent.
//!
//! Metadata records are produced by registry reads, cached with a TTL, and
//! never mutated locally. Capability and metadata values carry arbitrary JSON
//! and compare structurally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::did::AgentDid;
use crate::error::SageError;
use crate::keys::{KeyType, PublicKey, SignatureAlgorithm};

/// Upper bound on registered keys per agent.
pub const MAX_KEYS_PER_AGENT: usize = 10;

/// One registered key of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentKey {
    pub key_type: KeyType,
    #[serde(with = "serde_bytes_hex")]
    pub public_key: Vec<u8>,
    /// Set once ownership of the key was proven to the registry.
    pub verified: bool,
    pub registered_at: DateTime<Utc>,
}

impl AgentKey {
    /// Parse the raw key material into a usable public key.
    pub fn parse(&self) -> Result<PublicKey, SageError> {
        PublicKey::from_bytes(self.key_type, &self.public_key)
    }
}

/// Registry metadata for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub did: AgentDid,
    pub name: String,
    /// Owner account address on the agent's chain.
    pub owner: String,
    /// Service endpoint URL the agent answers on.
    pub endpoint: String,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
    /// Ordered as registered; at most [`MAX_KEYS_PER_AGENT`] entries.
    pub keys: Vec<AgentKey>,
    /// Arbitrary JSON capability map. Compared structurally.
    #[serde(default)]
    pub capabilities: serde_json::Map<String, Value>,
}

impl AgentMetadata {
    /// First registered key compatible with `hint`, parsed.
    ///
    /// Fails `no-compatible-key` when the agent holds no key of the hinted
    /// type.
    pub fn key_for_algorithm(&self, hint: SignatureAlgorithm) -> Result<PublicKey, SageError> {
        let wanted = hint
            .key_type()
            .ok_or_else(|| SageError::NoCompatibleKey(hint.as_str().into()))?;
        self.keys
            .iter()
            .find(|k| k.key_type == wanted)
            .ok_or_else(|| SageError::NoCompatibleKey(hint.as_str().into()))?
            .parse()
    }

    /// First registered key of the given type, parsed.
    pub fn key_of_type(&self, kt: KeyType) -> Result<PublicKey, SageError> {
        self.keys
            .iter()
            .find(|k| k.key_type == kt)
            .ok_or_else(|| SageError::NoCompatibleKey(kt.as_str().into()))?
            .parse()
    }

    /// Whether a capability is present and truthy.
    ///
    /// Truthiness follows JSON semantics: `true`, nonzero numbers, non-empty
    /// strings, non-empty arrays and objects.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.get(name).is_some_and(value_is_truthy)
    }
}

fn value_is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

mod serde_bytes_hex {
    //! Hex form for key material in JSON, so records stay diffable in logs
    //! and registry dumps.

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
