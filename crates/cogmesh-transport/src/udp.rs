//! UDP transport implementing the core [`Transport`] trait
//!
//! One datagram carries one encoded message. Agents are addressed by id;
//! the transport keeps an address book filled from discovery announcements
//! plus a static list of seed addresses that broadcasts always reach.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cogmesh_transport::UdpTransport;
//! use cogmesh_core::{AgentAddress, AgentId, Transport};
//!
//! let transport = UdpTransport::bind("0.0.0.0:7400", &["10.0.0.2:7400".into()]).await?;
//! transport.learn_peer(AgentId::new(2), &AgentAddress::new("10.0.0.2", 7400)).await?;
//! transport.send(AgentId::new(2), bytes).await?;
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::{UdpSocket, lookup_host};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use cogmesh_core::{AgentAddress, AgentId, Transport, TransportError};

/// Largest payload a single IPv4 UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Connectionless transport over a single bound UDP socket
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    /// Address book keyed by agent id
    peers: DashMap<AgentId, SocketAddr>,
    /// Static bootstrap addresses
    seeds: Vec<SocketAddr>,
    closed: watch::Sender<bool>,
}

impl UdpTransport {
    /// Bind a socket and resolve the seed addresses
    ///
    /// Seeds that fail to resolve are skipped with a warning; a bind failure
    /// is returned as [`TransportError::Bind`].
    #[instrument(skip(seeds), fields(seeds = seeds.len()))]
    pub async fn bind(addr: &str, seeds: &[String]) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = socket.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        let mut resolved = Vec::with_capacity(seeds.len());
        for seed in seeds {
            match lookup_host(seed.as_str()).await {
                Ok(mut addrs) => {
                    if let Some(seed_addr) = addrs.next() {
                        resolved.push(seed_addr);
                    }
                }
                Err(e) => warn!(seed = %seed, error = %e, "Failed to resolve seed address"),
            }
        }

        info!(local_addr = %local_addr, seeds = resolved.len(), "UDP transport bound");

        let (closed, _) = watch::channel(false);
        Ok(Self {
            socket,
            local_addr,
            peers: DashMap::new(),
            seeds: resolved,
            closed,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address currently recorded for an agent
    pub fn peer_addr(&self, peer: AgentId) -> Option<SocketAddr> {
        self.peers.get(&peer).map(|addr| *addr)
    }

    pub fn seeds(&self) -> &[SocketAddr] {
        &self.seeds
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn check_size(data: &Bytes) -> Result<(), TransportError> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::SendFailed(format!(
                "datagram of {} bytes exceeds {} byte limit",
                data.len(),
                MAX_DATAGRAM_SIZE
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, peer: AgentId, data: Bytes) -> Result<(), TransportError> {
        self.ensure_open()?;
        Self::check_size(&data)?;

        let addr = self.peer_addr(peer).ok_or(TransportError::PeerUnknown(peer))?;
        self.socket
            .send_to(&data, addr)
            .await
            .map_err(|e| TransportError::SendFailed(format!("{}: {}", addr, e)))?;
        Ok(())
    }

    async fn broadcast(&self, data: Bytes) -> Result<usize, TransportError> {
        self.ensure_open()?;
        Self::check_size(&data)?;

        let mut targets: HashSet<SocketAddr> = self.seeds.iter().copied().collect();
        targets.extend(self.peers.iter().map(|entry| *entry.value()));
        targets.remove(&self.local_addr);

        let mut sent = 0;
        for addr in targets {
            match self.socket.send_to(&data, addr).await {
                Ok(_) => sent += 1,
                Err(e) => debug!(addr = %addr, error = %e, "Broadcast datagram not sent"),
            }
        }
        Ok(sent)
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::Closed);
        }

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        tokio::select! {
            _ = closed.changed() => Err(TransportError::Closed),
            result = self.socket.recv_from(&mut buf) => {
                let (len, from) = result.map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
                buf.truncate(len);
                debug!(from = %from, len, "Received datagram");
                Ok(Bytes::from(buf))
            }
        }
    }

    async fn learn_peer(&self, peer: AgentId, address: &AgentAddress) -> Result<(), TransportError> {
        let target = address.to_string();
        let addr = lookup_host(target.as_str())
            .await
            .map_err(|e| TransportError::AddressResolution(format!("{}: {}", target, e)))?
            .next()
            .ok_or_else(|| TransportError::AddressResolution(format!("{}: no address", target)))?;

        if self.peers.insert(peer, addr) != Some(addr) {
            debug!(peer = %peer, addr = %addr, "Learned peer address");
        }
        Ok(())
    }

    fn forget_peer(&self, peer: AgentId) {
        if self.peers.remove(&peer).is_some() {
            debug!(peer = %peer, "Forgot peer address");
        }
    }

    fn knows_peer(&self, peer: AgentId) -> bool {
        self.peers.contains_key(&peer)
    }

    fn max_datagram_size(&self) -> Option<usize> {
        Some(MAX_DATAGRAM_SIZE)
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        info!(local_addr = %self.local_addr, "UDP transport closed");
    }
}
