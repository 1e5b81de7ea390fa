//! Decentralized identifiers for agents.
//!
//! A SAGE DID has the shape `did:<method>:<chain>:<local-id>`. Method and
//! chain are lowercase lookup keys into the configured registry client; the
//! local id is chain-specific and opaque to this library. DIDs are
//! case-sensitive and immutable once issued.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SageError;

/// A parsed agent DID.
///
/// The inner string is kept verbatim; accessors slice into it rather than
/// re-allocating the segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentDid(String);

impl AgentDid {
    /// Parse and validate a DID string.
    pub fn parse(s: &str) -> Result<Self, SageError> {
        let mut parts = s.splitn(4, ':');
        let scheme = parts.next().unwrap_or_default();
        if scheme != "did" {
            return Err(SageError::InvalidArgument(format!(
                "DID must start with \"did:\", got {s:?}"
            )));
        }
        let method = parts
            .next()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| SageError::InvalidArgument("DID missing method".into()))?;
        let chain = parts
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SageError::InvalidArgument("DID missing chain".into()))?;
        let local = parts
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| SageError::InvalidArgument("DID missing local id".into()))?;

        for (name, seg) in [("method", method), ("chain", chain)] {
            if !seg
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            {
                return Err(SageError::InvalidArgument(format!(
                    "DID {name} must be lowercase alphanumeric, got {seg:?}"
                )));
            }
        }
        if local.contains(|c: char| c.is_ascii_whitespace()) {
            return Err(SageError::InvalidArgument(
                "DID local id must not contain whitespace".into(),
            ));
        }

        Ok(AgentDid(s.to_owned()))
    }

    /// The DID method segment.
    pub fn method(&self) -> &str {
        self.segment(1)
    }

    /// The chain segment.
    pub fn chain(&self) -> &str {
        self.segment(2)
    }

    /// The chain-specific local identifier.
    pub fn local_id(&self) -> &str {
        self.segment(3)
    }

    /// The full DID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segment(&self, idx: usize) -> &str {
        // Validated at construction; a missing segment cannot occur.
        self.0.splitn(4, ':').nth(idx).unwrap_or_default()
    }
}

impl fmt::Display for AgentDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentDid {
    type Err = SageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentDid {
    type Error = SageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AgentDid> for String {
    fn from(did: AgentDid) -> String {
        did.0
    }
}

impl AsRef<str> for AgentDid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
