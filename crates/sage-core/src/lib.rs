//! # SAGE Core
//!
//! Secure Agent Messaging Core: mutual authentication of autonomous agents
//! over untrusted transports. Three concerns live here:
//!
//! 1. **Identity resolution** — DID lookup against an injected registry
//!    client, with caching ([`resolver`]).
//! 2. **HTTP message signatures** — RFC 9421 canonicalization, signing, and
//!    verification with freshness, nonce, and body-integrity checks
//!    ([`canonical`], [`signer`], [`verifier`]).
//! 3. **Key establishment and secure sessions** — HPKE (RFC 9180) exporter
//!    derivation feeding an AEAD channel with a session-bound MAC
//!    ([`hpke`], [`session`]).
//!
//! Panics are disallowed in non-test code; every fallible path returns a
//! structured [`SageError`].
#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod agent;
pub mod canonical;
pub mod core;
pub mod did;
pub mod digest;
pub mod envelope;
pub mod error;
pub mod hpke;
pub mod keys;
pub mod message;
pub mod registry;
pub mod replay;
pub mod request;
pub mod resolver;
pub mod session;
pub mod sfv;
pub mod signer;
pub mod verification;
pub mod verifier;

pub use agent::{AgentKey, AgentMetadata};
pub use canonical::{signature_base, CoveredComponent, SignatureInputParams};
pub use crate::core::{SageCore, SageCoreBuilder};
pub use did::AgentDid;
pub use error::{ErrorKind, Result, SageError};
pub use keys::{KeyPair, KeyType, PrivateKey, PublicKey, SignatureAlgorithm};
pub use message::{Message, MessageBuilder};
pub use registry::RegistryClient;
pub use replay::{NonceStore, NonceStoreConfig, Scope, SequenceTracker};
pub use request::SignableMessage;
pub use resolver::{Resolver, ResolverConfig};
pub use session::{Role, Session, SessionConfig, SessionManager};
pub use signer::{sign_message, sign_message_with_session};
pub use verification::{VerificationOptions, VerificationResult, VerificationService};
pub use verifier::{
    verify_message, verify_message_with_session, VerifiedSignature, VerifierKey, VerifyOptions,
    VerifyPolicy,
};

// Key-agreement types appear in the public API; re-export the crate so
// callers do not have to pin a matching dalek version themselves.
pub use x25519_dalek;

#[cfg(test)]
mod tests {
    // Canary test so workspace-level test discovery is visibly working.
    #[test]
    fn test_core_canary() {}
}
