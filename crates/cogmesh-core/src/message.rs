//! The cognitive message envelope
//!
//! Every exchange between agents is a [`CognitiveMessage`]: a message kind,
//! source and destination ids, a sender timestamp, and an opaque payload.
//! The payload length is never stored separately; it is always the length of
//! the owned buffer, so a declared length cannot drift from the bytes carried.

use std::fmt::{self, Display};

use bytes::Bytes;

use crate::error::MalformedMessage;
use crate::identity::AgentId;

/// Maximum payload carried by one message (1 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Kinds of message understood by the protocol
///
/// The discriminants are the on-wire codes. Codes outside this set are
/// rejected so senders can detect a protocol mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageKind {
    Discovery = 0,
    Heartbeat = 1,
    AttentionSync = 2,
    PatternShare = 3,
    CognitiveState = 4,
    CommandRequest = 5,
    MemorySync = 6,
    InferenceQuery = 7,
    MembraneSync = 8,
}

impl MessageKind {
    pub const ALL: [MessageKind; 9] = [
        MessageKind::Discovery,
        MessageKind::Heartbeat,
        MessageKind::AttentionSync,
        MessageKind::PatternShare,
        MessageKind::CognitiveState,
        MessageKind::CommandRequest,
        MessageKind::MemorySync,
        MessageKind::InferenceQuery,
        MessageKind::MembraneSync,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Discovery => "discovery",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::AttentionSync => "attention-sync",
            MessageKind::PatternShare => "pattern-share",
            MessageKind::CognitiveState => "cognitive-state",
            MessageKind::CommandRequest => "command-request",
            MessageKind::MemorySync => "memory-sync",
            MessageKind::InferenceQuery => "inference-query",
            MessageKind::MembraneSync => "membrane-sync",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = MalformedMessage;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        MessageKind::ALL
            .get(code as usize)
            .copied()
            .ok_or(MalformedMessage::UnknownKind(code))
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wire envelope exchanged between agents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CognitiveMessage {
    kind: MessageKind,
    source: AgentId,
    dest: AgentId,
    timestamp: u32,
    payload: Bytes,
}

impl CognitiveMessage {
    /// Create a message, rejecting payloads over [`MAX_PAYLOAD_SIZE`]
    pub fn new(
        kind: MessageKind,
        source: AgentId,
        dest: AgentId,
        timestamp: u32,
        payload: impl Into<Bytes>,
    ) -> Result<Self, MalformedMessage> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MalformedMessage::TooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            kind,
            source,
            dest,
            timestamp,
            payload,
        })
    }

    /// Create a broadcast message (destination 0)
    pub fn broadcast(
        kind: MessageKind,
        source: AgentId,
        timestamp: u32,
        payload: impl Into<Bytes>,
    ) -> Result<Self, MalformedMessage> {
        Self::new(kind, source, AgentId::BROADCAST, timestamp, payload)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn source(&self) -> AgentId {
        self.source
    }

    pub fn dest(&self) -> AgentId {
        self.dest
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length as carried on the wire
    pub fn payload_len(&self) -> u32 {
        // Bounded by MAX_PAYLOAD_SIZE at construction.
        self.payload.len() as u32
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Whether this message is addressed to `agent` (directly or by broadcast)
    pub fn is_for(&self, agent: AgentId) -> bool {
        self.dest.is_broadcast() || self.dest == agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_roundtrip() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::try_from(kind.code()).unwrap(), kind);
        }
        assert_eq!(MessageKind::MembraneSync.code(), 8);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(
            MessageKind::try_from(9),
            Err(MalformedMessage::UnknownKind(9))
        );
        assert!(MessageKind::try_from(255).is_err());
    }

    #[test]
    fn test_payload_limit() {
        let big = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let result = CognitiveMessage::new(
            MessageKind::MemorySync,
            AgentId::new(1),
            AgentId::new(2),
            0,
            big,
        );
        assert!(matches!(result, Err(MalformedMessage::TooLarge { .. })));
    }

    #[test]
    fn test_addressing() {
        let msg =
            CognitiveMessage::broadcast(MessageKind::Discovery, AgentId::new(1), 10, vec![]).unwrap();
        assert!(msg.is_for(AgentId::new(5)));
        assert_eq!(msg.payload_len(), 0);

        let msg = CognitiveMessage::new(
            MessageKind::Heartbeat,
            AgentId::new(1),
            AgentId::new(2),
            10,
            vec![1, 2, 3],
        )
        .unwrap();
        assert!(msg.is_for(AgentId::new(2)));
        assert!(!msg.is_for(AgentId::new(3)));
        assert_eq!(msg.payload_len(), 3);
    }
}
