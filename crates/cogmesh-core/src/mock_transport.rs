//! Mock transport implementation for testing
//!
//! Provides an in-memory mesh of transports so coordinators can be tested
//! without real sockets. Datagram semantics are preserved: sends to a
//! partitioned or overloaded agent are silently lost.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cogmesh_core::{AgentId, MockNetwork, Transport};
//!
//! let network = MockNetwork::new();
//! let a = network.join(AgentId::new(1));
//! let b = network.join(AgentId::new(2));
//!
//! a.send(AgentId::new(2), bytes::Bytes::from_static(b"hi")).await?;
//! let data = b.recv().await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, mpsc};

use crate::error::TransportError;
use crate::identity::AgentId;
use crate::transport::Transport;

/// Shared in-memory medium connecting [`MockTransport`]s
pub struct MockNetwork {
    /// Inbox of every attached agent
    mailboxes: DashMap<AgentId, mpsc::Sender<Bytes>>,
    /// Severed directed links (from, to)
    severed: DashSet<(AgentId, AgentId)>,
    /// Datagrams lost to partitions or full inboxes
    dropped: AtomicU64,
    buffer_size: usize,
}

impl MockNetwork {
    /// Create a new network with the default inbox size
    pub fn new() -> Arc<Self> {
        Self::with_buffer_size(1024)
    }

    /// Create a new network with a specific inbox size
    pub fn with_buffer_size(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            mailboxes: DashMap::new(),
            severed: DashSet::new(),
            dropped: AtomicU64::new(0),
            buffer_size,
        })
    }

    /// Attach an agent and return its transport
    pub fn join(self: &Arc<Self>, agent: AgentId) -> Arc<MockTransport> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.mailboxes.insert(agent, tx);
        Arc::new(MockTransport {
            local_id: agent,
            network: Arc::clone(self),
            inbox_rx: Mutex::new(rx),
        })
    }

    /// Cut traffic in both directions between two agents
    pub fn partition(&self, a: AgentId, b: AgentId) {
        self.severed.insert((a, b));
        self.severed.insert((b, a));
    }

    /// Restore traffic between two agents
    pub fn heal(&self, a: AgentId, b: AgentId) {
        self.severed.remove(&(a, b));
        self.severed.remove(&(b, a));
    }

    /// Cut an agent off from everyone
    pub fn isolate(&self, agent: AgentId) {
        let others: Vec<AgentId> = self
            .mailboxes
            .iter()
            .map(|entry| *entry.key())
            .filter(|other| *other != agent)
            .collect();
        for other in others {
            self.partition(agent, other);
        }
    }

    /// Number of datagrams lost so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.mailboxes.iter().map(|entry| *entry.key()).collect();
        agents.sort();
        agents
    }

    fn deliver(&self, from: AgentId, to: AgentId, data: Bytes) -> Result<(), TransportError> {
        let sender = self
            .mailboxes
            .get(&to)
            .ok_or(TransportError::PeerUnknown(to))?;

        if self.severed.contains(&(from, to)) || sender.try_send(data).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// A mock transport for testing
///
/// Created by [`MockNetwork::join`].
pub struct MockTransport {
    local_id: AgentId,
    network: Arc<MockNetwork>,
    inbox_rx: Mutex<mpsc::Receiver<Bytes>>,
}

impl MockTransport {
    /// Get our local identity
    pub fn local_id(&self) -> AgentId {
        self.local_id
    }

    pub fn network(&self) -> &Arc<MockNetwork> {
        &self.network
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, peer: AgentId, data: Bytes) -> Result<(), TransportError> {
        self.network.deliver(self.local_id, peer, data)
    }

    async fn broadcast(&self, data: Bytes) -> Result<usize, TransportError> {
        let peers: Vec<AgentId> = self
            .network
            .mailboxes
            .iter()
            .map(|entry| *entry.key())
            .filter(|peer| *peer != self.local_id)
            .collect();

        for peer in &peers {
            self.network.deliver(self.local_id, *peer, data.clone())?;
        }
        Ok(peers.len())
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        let mut inbox = self.inbox_rx.lock().await;
        inbox.recv().await.ok_or(TransportError::Closed)
    }

    async fn try_recv(&self) -> Result<Option<Bytes>, TransportError> {
        let mut inbox = self.inbox_rx.lock().await;
        match inbox.try_recv() {
            Ok(data) => Ok(Some(data)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn knows_peer(&self, peer: AgentId) -> bool {
        self.network.mailboxes.contains_key(&peer)
    }

    async fn close(&self) {
        self.network.mailboxes.remove(&self.local_id);
    }
}
