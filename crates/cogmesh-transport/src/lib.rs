//! # Cogmesh Transport
//!
//! Wire format and UDP transport for cogmesh.
//!
//! ## Features
//!
//! - Fixed-order, big-endian message envelope ([`encode`] / [`decode`])
//! - Typed payload codecs for every message kind ([`payload`])
//! - Connectionless UDP transport with a per-agent address book ([`UdpTransport`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use cogmesh_core::{AgentId, CognitiveMessage, MessageKind};
//! use cogmesh_transport::{decode, encode};
//!
//! let msg = CognitiveMessage::broadcast(MessageKind::Discovery, AgentId::new(1), 0, vec![])?;
//! let bytes = encode(&msg);
//! assert_eq!(decode(&bytes)?, msg);
//! ```

pub mod codec;
pub mod payload;
pub mod udp;
mod wire;

pub use codec::{HEADER_LEN, decode, encode};
pub use payload::{
    AnnouncePayload, AttentionPayload, CognitiveStatePayload, MembraneSyncPayload,
    PatternSharePayload, RequestPayload,
};
pub use udp::{MAX_DATAGRAM_SIZE, UdpTransport};
