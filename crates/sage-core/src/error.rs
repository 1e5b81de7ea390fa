//! Error taxonomy for the SAGE core.
//!
//! Every fallible operation in this crate returns [`SageError`]. Callers that
//! need to branch on the failure class (metrics, retry policy, protocol
//! responses) use [`SageError::kind`], which yields a stable [`ErrorKind`]
//! whose string form matches the wire-level error identifiers.

use thiserror::Error;

/// Stable error classification, one entry per protocol error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    ComponentNotFound,
    UnsupportedAlgorithm,
    NoCompatibleKey,
    InvalidSignature,
    MissingDigest,
    DigestMismatch,
    Stale,
    Expired,
    Replay,
    ReplayWindowOverflow,
    OutOfOrder,
    Deactivated,
    NotFound,
    MetadataMismatch,
    MissingCapabilities,
    InvalidKemOutput,
    DecryptFailed,
    Cancelled,
    DeadlineExceeded,
    ChainError,
}

impl ErrorKind {
    /// Wire identifier for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid-argument",
            Self::ComponentNotFound => "component-not-found",
            Self::UnsupportedAlgorithm => "unsupported-algorithm",
            Self::NoCompatibleKey => "no-compatible-key",
            Self::InvalidSignature => "invalid-signature",
            Self::MissingDigest => "missing-digest",
            Self::DigestMismatch => "digest-mismatch",
            Self::Stale => "stale",
            Self::Expired => "expired",
            Self::Replay => "replay",
            Self::ReplayWindowOverflow => "replay-window-overflow",
            Self::OutOfOrder => "out-of-order",
            Self::Deactivated => "deactivated",
            Self::NotFound => "not-found",
            Self::MetadataMismatch => "metadata-mismatch",
            Self::MissingCapabilities => "missing-capabilities",
            Self::InvalidKemOutput => "invalid-kem-output",
            Self::DecryptFailed => "decrypt-failed",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::ChainError => "chain-error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the SAGE core.
///
/// Messages never carry secret key material or a full signature base; at most
/// they name the component or field that failed.
#[derive(Error, Debug)]
pub enum SageError {
    /// Malformed input: missing DID, bad URL, out-of-range parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A covered component is absent from the request being canonicalized.
    #[error("covered component not found: {0}")]
    ComponentNotFound(String),

    /// Declared or inferred algorithm is not implemented here.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The resolved agent holds no key compatible with the requested algorithm.
    #[error("no key compatible with {0}")]
    NoCompatibleKey(String),

    /// Cryptographic signature verification failed.
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),

    /// Content-Digest is covered but the header is absent.
    #[error("content-digest covered but header missing")]
    MissingDigest,

    /// Recomputed body digest does not match the Content-Digest header.
    #[error("content-digest mismatch")]
    DigestMismatch,

    /// Creation time lies outside the accepted freshness window.
    #[error("message is stale: {0}")]
    Stale(String),

    /// The signature or session has passed its expiry.
    #[error("expired: {0}")]
    Expired(String),

    /// Nonce already consumed within its TTL and binding scope.
    #[error("replayed nonce in scope {scope}")]
    Replay { scope: String },

    /// The seen-nonce set hit its size bound and evicted live entries.
    #[error("replay window overflow: {evicted} entries evicted")]
    ReplayWindowOverflow { evicted: usize },

    /// Per-session sequence number or timestamp regressed.
    #[error("out of order: {0}")]
    OutOfOrder(String),

    /// The agent is registered but marked inactive.
    #[error("agent {0} is deactivated")]
    Deactivated(String),

    /// The DID is unknown to the registry.
    #[error("agent {0} not found")]
    NotFound(String),

    /// Declared message metadata contradicts the resolved registry view.
    #[error("metadata mismatch: {0}")]
    MetadataMismatch(String),

    /// A required capability is absent or not truthy.
    #[error("missing capabilities: {0}")]
    MissingCapabilities(String),

    /// KEM output failed validation (wrong length, low-order point, all-zero secret).
    #[error("invalid KEM output: {0}")]
    InvalidKemOutput(String),

    /// AEAD open failed; the receive counter was not advanced.
    #[error("decryption failed")]
    DecryptFailed,

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Registry client failure. `transient` marks retryable conditions.
    #[error("chain error: {message}")]
    ChainError { message: String, transient: bool },
}

impl SageError {
    /// Stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ComponentNotFound(_) => ErrorKind::ComponentNotFound,
            Self::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Self::NoCompatibleKey(_) => ErrorKind::NoCompatibleKey,
            Self::InvalidSignature(_) => ErrorKind::InvalidSignature,
            Self::MissingDigest => ErrorKind::MissingDigest,
            Self::DigestMismatch => ErrorKind::DigestMismatch,
            Self::Stale(_) => ErrorKind::Stale,
            Self::Expired(_) => ErrorKind::Expired,
            Self::Replay { .. } => ErrorKind::Replay,
            Self::ReplayWindowOverflow { .. } => ErrorKind::ReplayWindowOverflow,
            Self::OutOfOrder(_) => ErrorKind::OutOfOrder,
            Self::Deactivated(_) => ErrorKind::Deactivated,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::MetadataMismatch(_) => ErrorKind::MetadataMismatch,
            Self::MissingCapabilities(_) => ErrorKind::MissingCapabilities,
            Self::InvalidKemOutput(_) => ErrorKind::InvalidKemOutput,
            Self::DecryptFailed => ErrorKind::DecryptFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::ChainError { .. } => ErrorKind::ChainError,
        }
    }

    /// Whether a retry may succeed without caller intervention.
    ///
    /// Only transient registry failures qualify; crypto and canonicalization
    /// errors are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChainError { transient: true, .. })
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_wire_identifiers() {
        assert_eq!(
            SageError::Replay { scope: "global".into() }.kind().as_str(),
            "replay"
        );
        assert_eq!(SageError::MissingDigest.kind().as_str(), "missing-digest");
        assert_eq!(
            SageError::ChainError { message: "rpc".into(), transient: true }
                .kind()
                .as_str(),
            "chain-error"
        );
    }

    #[test]
    fn only_transient_chain_errors_retry() {
        assert!(SageError::ChainError { message: "timeout".into(), transient: true }
            .is_transient());
        assert!(!SageError::ChainError { message: "abi".into(), transient: false }
            .is_transient());
        assert!(!SageError::DecryptFailed.is_transient());
    }
}
