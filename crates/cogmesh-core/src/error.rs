//! Error types for cogmesh
//!
//! No error in the synchronization core is fatal to the process. The only
//! unrecoverable condition is failing to bring the transport up at startup,
//! reported as [`CognitiveError::Init`].

use thiserror::Error;

use crate::identity::{AgentId, Capabilities};

/// Top-level error type for cogmesh
#[derive(Debug, Error)]
pub enum CognitiveError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] MalformedMessage),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Agent {agent} did not respond within {waited_ms}ms")]
    Timeout { agent: AgentId, waited_ms: u64 },

    #[error("Initialization failed: {0}")]
    Init(String),
}

impl CognitiveError {
    /// Whether this error should bring the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CognitiveError::Init(_))
    }
}

/// Decode failures. The offending message is dropped and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    #[error("Buffer too short: need {needed} bytes, have {available}")]
    TooShort { needed: usize, available: usize },

    #[error("Declared payload length {declared} does not match remaining {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// Errors related to transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("No route to agent {0}")]
    PeerUnknown(AgentId),

    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    #[error("Transport closed")]
    Closed,
}

/// Errors raised by the membrane store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Membrane {0} not found")]
    NotFound(u32),

    #[error("Membrane {0} already exists")]
    AlreadyExists(u32),

    #[error("Stale version for membrane {membrane_id}: local {local}, remote {remote}")]
    StaleVersion {
        membrane_id: u32,
        local: u64,
        remote: u64,
    },

    #[error("Checksum mismatch for membrane {membrane_id}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        membrane_id: u32,
        expected: u32,
        actual: u32,
    },

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Payload length {actual} does not match shape element count {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Index {index} out of bounds for membrane with {len} elements")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Errors from agent selection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("No agent available with capabilities {0}")]
    NoAgentAvailable(Capabilities),
}

/// Errors from external collaborators (evaluator, pattern engine, tensor kernel)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("Capability {0} is disabled")]
    Unsupported(&'static str),

    #[error("No collaborator registered as {0}")]
    Missing(String),

    #[error("Collaborator failed: {0}")]
    Failed(String),
}

/// Result type alias for cogmesh operations
pub type CognitiveResult<T> = Result<T, CognitiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = MalformedMessage::TooShort {
            needed: 17,
            available: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("17"));
        assert!(msg.contains("3"));

        let err = MalformedMessage::UnknownKind(42);
        assert!(format!("{}", err).contains("42"));
    }

    #[test]
    fn test_sync_error_display() {
        let err = SyncError::ChecksumMismatch {
            membrane_id: 7,
            expected: 0xdeadbeef,
            actual: 0x1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("deadbeef"));
        assert!(msg.contains("00000001"));

        let err = SyncError::StaleVersion {
            membrane_id: 1,
            local: 5,
            remote: 5,
        };
        assert!(format!("{}", err).contains("Stale"));
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::NoAgentAvailable(Capabilities::new(0x1));
        assert!(format!("{}", err).contains("0x00000001"));
    }

    #[test]
    fn test_error_conversions() {
        let err: CognitiveError = MalformedMessage::UnknownKind(9).into();
        assert!(matches!(err, CognitiveError::Malformed(_)));

        let err: CognitiveError = TransportError::Closed.into();
        assert!(matches!(err, CognitiveError::Transport(_)));

        let err: CognitiveError = SyncError::NotFound(3).into();
        assert!(matches!(err, CognitiveError::Sync(_)));

        let err: CognitiveError = CollaboratorError::Unsupported("scheme").into();
        assert!(matches!(err, CognitiveError::Collaborator(_)));
    }

    #[test]
    fn test_only_init_is_fatal() {
        assert!(CognitiveError::Init("bind".into()).is_fatal());
        assert!(!CognitiveError::Timeout {
            agent: AgentId::new(2),
            waited_ms: 100
        }
        .is_fatal());
        assert!(!CognitiveError::from(SyncError::NotFound(1)).is_fatal());
        assert!(!CognitiveError::from(DispatchError::NoAgentAvailable(Capabilities::ALL)).is_fatal());
    }
}
