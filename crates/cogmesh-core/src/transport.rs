//! Transport abstraction for message passing
//!
//! The [`Transport`] trait moves encoded [`CognitiveMessage`](crate::CognitiveMessage)
//! bytes between agents. The sender's identity travels inside the envelope,
//! so a transport only needs to deliver opaque datagrams.
//!
//! ## Implementations
//!
//! - [`MockTransport`](crate::MockTransport): In-memory transport for testing (in this crate)
//! - `UdpTransport`: Real UDP transport (in cogmesh-transport crate)

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;
use crate::identity::{AgentAddress, AgentId};

/// Transport trait for datagram delivery between agents
///
/// Delivery is best effort: a successful `send` means the datagram left this
/// agent, not that it arrived. Liveness is tracked above the transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send data to a specific agent
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PeerUnknown`] if no address is known for `peer`.
    async fn send(&self, peer: AgentId, data: Bytes) -> Result<(), TransportError>;

    /// Send data to every reachable agent
    ///
    /// Returns how many destinations the datagram was handed to.
    async fn broadcast(&self, data: Bytes) -> Result<usize, TransportError>;

    /// Receive the next datagram
    ///
    /// Blocks until data is available or the transport is closed.
    async fn recv(&self) -> Result<Bytes, TransportError>;

    /// Try to receive data without blocking
    ///
    /// Returns `Ok(None)` if no data is immediately available.
    async fn try_recv(&self) -> Result<Option<Bytes>, TransportError> {
        match tokio::time::timeout(std::time::Duration::ZERO, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Record where an agent can be reached
    ///
    /// Default implementation does nothing (transports that route by id).
    async fn learn_peer(&self, _peer: AgentId, _address: &AgentAddress) -> Result<(), TransportError> {
        Ok(())
    }

    /// Forget an agent's address after it has been evicted
    fn forget_peer(&self, _peer: AgentId) {}

    /// Whether `send` to this agent can currently succeed
    fn knows_peer(&self, peer: AgentId) -> bool;

    /// Largest datagram `send` accepts, if the transport has a limit
    fn max_datagram_size(&self) -> Option<usize> {
        None
    }

    /// Release the underlying resources
    async fn close(&self) {}
}
