//! Sync coordinator
//!
//! Composes the registry, attention ledger, and membrane store of one agent
//! and keeps them in step with its peers. Three background tasks run while
//! the coordinator is started:
//!
//! - **ingest**: decodes datagrams and routes them by message kind
//! - **merge worker**: resolves membrane candidates off the ingest path
//! - **request worker**: answers command and inference requests, running
//!   the collaborator on the blocking pool
//! - **rounds**: discovery, heartbeats, attention and membrane sync on a
//!   fixed period; a round that is still running when the next tick comes
//!   makes that tick a no-op
//!
//! Tests can leave the coordinator stopped and drive it by hand with
//! [`Coordinator::run_round`] and [`Coordinator::drain_inbox`]; candidates
//! and requests are then handled inline.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, instrument, warn};

use cogmesh_core::{
    AgentAddress, AgentId, Capabilities, Clock, CognitiveError, CognitiveMessage, CognitiveResult,
    CollaboratorError, MessageKind, SyncError, Transport, TransportError, TruthValue,
};
use cogmesh_logging::agent_span;
use cogmesh_routing::{AgentRegistry, Dispatcher};
use cogmesh_sync::{AttentionLedger, MembraneCandidate, MembraneId, MembraneStore};
use cogmesh_transport::{
    AnnouncePayload, CognitiveStatePayload, HEADER_LEN, PatternSharePayload, RequestPayload,
    encode,
};

use crate::collaborators::{CollaboratorRegistry, Inference};
use crate::config::{NodeConfig, SyncConfig};
use crate::error::{NodeError, NodeResult};
use crate::events::NodeEvent;
use crate::handler::InboundRequest;
use crate::hooks::HookRegistry;
use crate::link::{LinkState, LinkTable, Transition};

/// A pattern received from a peer or shared by this agent
#[derive(Debug, Clone, PartialEq)]
pub struct SharedPattern {
    pub origin: AgentId,
    pub encoded: String,
    pub truth: Option<TruthValue>,
    /// Local time it arrived
    pub received_at: u32,
}

struct PendingRequest {
    agent: AgentId,
    reply: oneshot::Sender<RequestPayload>,
}

/// State shared by the coordinator handle and its background tasks
pub(crate) struct CoordinatorInner {
    pub(crate) local: AgentId,
    pub(crate) address: AgentAddress,
    pub(crate) capabilities: Capabilities,
    pub(crate) load_factor: AtomicU32,
    pub(crate) config: SyncConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) ledger: Arc<AttentionLedger>,
    pub(crate) store: Arc<MembraneStore>,
    pub(crate) links: LinkTable,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) collaborators: Arc<CollaboratorRegistry>,
    /// Replica holders per membrane
    pub(crate) holders: DashMap<MembraneId, BTreeSet<AgentId>>,
    /// Last `(version, checksum)` each holder is known to have
    pub(crate) acked: DashMap<(MembraneId, AgentId), (u64, u32)>,
    /// Peers sent a candidate and not heard from since, with the send time
    pub(crate) awaiting: DashMap<AgentId, u32>,
    pub(crate) patterns: DashMap<String, SharedPattern>,
    /// Membranes whose sync message exceeds the transport's datagram limit
    oversized: DashSet<MembraneId>,
    pending: DashMap<u32, PendingRequest>,
    next_request: AtomicU32,
    last_timestamp: AtomicU32,
    pub(crate) round_running: AtomicBool,
    events: broadcast::Sender<NodeEvent>,
    /// Set while the merge worker runs
    merge_tx: Mutex<Option<mpsc::Sender<MembraneCandidate>>>,
    /// Set while the request worker runs
    request_tx: Mutex<Option<mpsc::Sender<InboundRequest>>>,
}

/// Where an inbound request goes
pub(crate) enum RequestRoute {
    Queued,
    /// No worker running; answer on the caller
    Inline(InboundRequest),
    /// Queue full; answer with an error
    Refused(InboundRequest),
}

impl CoordinatorInner {
    /// Wire timestamp: clock seconds, never below one already sent
    fn next_timestamp(&self) -> u32 {
        let now = self.clock.now_secs();
        let previous = self.last_timestamp.fetch_max(now, Ordering::AcqRel);
        previous.max(now)
    }

    pub(crate) async fn send_to(
        &self,
        dest: AgentId,
        kind: MessageKind,
        payload: Bytes,
    ) -> CognitiveResult<()> {
        let msg = CognitiveMessage::new(kind, self.local, dest, self.next_timestamp(), payload)?;
        self.transport.send(dest, encode(&msg)).await?;
        Ok(())
    }

    pub(crate) async fn broadcast(&self, kind: MessageKind, payload: Bytes) -> CognitiveResult<usize> {
        let msg = CognitiveMessage::broadcast(kind, self.local, self.next_timestamp(), payload)?;
        Ok(self.transport.broadcast(encode(&msg)).await?)
    }

    /// Discovery and heartbeat payload describing this agent
    pub(crate) fn announce_payload(&self) -> CognitiveResult<Bytes> {
        let payload = AnnouncePayload {
            agent_id: self.local,
            address: self.address.clone(),
            capabilities: self.capabilities,
            load_factor: self.load_factor.load(Ordering::Relaxed),
        };
        Ok(payload.encode()?)
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Publish a link state change
    pub(crate) fn report(&self, transition: Transition) {
        let agent = transition.agent;
        debug!(agent = %agent, from = %transition.from, to = %transition.to, "Link state changed");
        match transition.to {
            LinkState::Discovering => self.emit(NodeEvent::AgentDiscovered { agent }),
            LinkState::Active => {
                if matches!(transition.from, LinkState::Unknown | LinkState::Evicted) {
                    self.emit(NodeEvent::AgentDiscovered { agent });
                }
                self.emit(NodeEvent::AgentActive { agent });
            }
            LinkState::Stale => {
                info!(agent = %agent, "Peer timed out");
                self.emit(NodeEvent::AgentStale { agent });
            }
            LinkState::Unknown | LinkState::Evicted => {}
        }
    }

    /// Drop everything in flight towards an agent that left
    ///
    /// Holder sets are kept; sends re-check registry membership, so a
    /// returning agent picks up where it left off.
    pub(crate) fn evict(&self, agent: AgentId) {
        let Some(previous) = self.links.evict(agent) else {
            return;
        };
        self.acked.retain(|&(_, holder), _| holder != agent);
        self.awaiting.remove(&agent);
        // Dropping the reply senders fails the waiting requests
        self.pending.retain(|_, pending| pending.agent != agent);
        self.transport.forget_peer(agent);

        info!(agent = %agent, previous = %previous, "Agent evicted");
        self.emit(NodeEvent::AgentEvicted { agent });
    }

    /// Hand a candidate to the merge worker
    ///
    /// Returns the candidate back when it has to be resolved inline. A full
    /// queue drops it; the sender offers it again next round.
    pub(crate) fn queue_candidate(&self, candidate: MembraneCandidate) -> Option<MembraneCandidate> {
        let Some(tx) = self.merge_tx.lock().clone() else {
            return Some(candidate);
        };
        match tx.try_send(candidate) {
            Ok(()) => None,
            Err(TrySendError::Full(candidate)) => {
                warn!(
                    membrane = candidate.membrane_id,
                    from = %candidate.origin,
                    "Merge queue full, dropping membrane candidate"
                );
                None
            }
            Err(TrySendError::Closed(candidate)) => Some(candidate),
        }
    }

    pub(crate) fn queue_request(&self, inbound: InboundRequest) -> RequestRoute {
        let Some(tx) = self.request_tx.lock().clone() else {
            return RequestRoute::Inline(inbound);
        };
        match tx.try_send(inbound) {
            Ok(()) => RequestRoute::Queued,
            Err(TrySendError::Full(inbound)) => {
                warn!(
                    from = %inbound.source,
                    request = inbound.request.request_id,
                    "Request queue full, refusing request"
                );
                RequestRoute::Refused(inbound)
            }
            Err(TrySendError::Closed(inbound)) => RequestRoute::Inline(inbound),
        }
    }

    /// Whether a membrane-sync payload fits one datagram; warns once per
    /// membrane until it fits again
    pub(crate) fn fits_datagram(&self, id: MembraneId, payload_len: usize) -> bool {
        let Some(limit) = self.transport.max_datagram_size() else {
            return true;
        };
        let size = HEADER_LEN + payload_len;
        if size <= limit {
            self.oversized.remove(&id);
            return true;
        }
        if self.oversized.insert(id) {
            warn!(membrane = id, size, limit, "Membrane exceeds datagram limit, not syncing it");
        }
        false
    }

    /// Send the current state of a membrane to every holder not known to
    /// have it
    pub(crate) async fn push_membrane(&self, id: MembraneId) -> CognitiveResult<usize> {
        let candidate = self.store.candidate(id)?;
        let current = (candidate.version, candidate.checksum);
        let targets: Vec<AgentId> = self
            .holders
            .get(&id)
            .map(|holders| {
                holders
                    .iter()
                    .copied()
                    .filter(|agent| self.acked.get(&(id, *agent)).map(|known| *known) != Some(current))
                    .collect()
            })
            .unwrap_or_default();
        if targets.is_empty() {
            return Ok(0);
        }

        let payload = candidate.to_payload().encode()?;
        if !self.fits_datagram(id, payload.len()) {
            return Err(TransportError::SendFailed(format!(
                "membrane {} does not fit in one datagram",
                id
            ))
            .into());
        }
        let now = self.clock.now_secs();
        let mut sent = 0;
        for agent in targets {
            // Membership is checked at send time, not when holders were read
            if !self.registry.contains(agent) || self.links.state(agent) == LinkState::Evicted {
                continue;
            }
            match self.send_to(agent, MessageKind::MembraneSync, payload.clone()).await {
                Ok(()) => {
                    self.awaiting.entry(agent).or_insert(now);
                    sent += 1;
                }
                Err(e) => debug!(membrane = id, agent = %agent, error = %e, "Membrane sync send failed"),
            }
        }
        Ok(sent)
    }

    /// Send a request to the best agent for `mask` and wait for the reply
    async fn request(
        &self,
        kind: MessageKind,
        body: &str,
        mask: Capabilities,
    ) -> CognitiveResult<RequestPayload> {
        let mut excluded = self.links.in_state(LinkState::Stale);
        excluded.extend(self.links.in_state(LinkState::Evicted));
        let target = self.dispatcher.select_excluding(mask, &excluded)?;
        let agent = target.agent_id;

        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let payload = RequestPayload::request(request_id, mask, body).encode()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingRequest {
                agent,
                reply: reply_tx,
            },
        );

        if let Err(e) = self.send_to(agent, kind, payload).await {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.round_trip_timeout(), reply_rx).await {
            Ok(Ok(reply)) if reply.is_error => Err(CollaboratorError::Failed(reply.body).into()),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::PeerUnknown(agent).into()),
            Err(_) => {
                self.pending.remove(&request_id);
                let waited_ms = self.config.round_trip_timeout_ms;
                info!(agent = %agent, request = request_id, waited_ms, "Peer timed out");
                if let Some(transition) = self.links.record_miss(agent, self.config.max_missed_replies) {
                    self.report(transition);
                }
                Err(CognitiveError::Timeout { agent, waited_ms })
            }
        }
    }

    /// Route a reply to the request waiting for it
    pub(crate) fn complete_request(&self, from: AgentId, reply: RequestPayload) {
        match self
            .pending
            .remove_if(&reply.request_id, |_, pending| pending.agent == from)
        {
            Some((_, pending)) => {
                // The requester may have timed out in the meantime
                let _ = pending.reply.send(reply);
            }
            None => debug!(request = reply.request_id, from = %from, "Dropping unexpected reply"),
        }
    }
}

/// Handle to one agent's sync coordinator
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Merge and request workers; they exit once their queue is dropped
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Coordinator {
    /// Build a coordinator over `transport`; nothing runs until [`start`](Self::start)
    pub fn new(config: &NodeConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let local = config.agent_id();
        let registry = Arc::new(AgentRegistry::new());
        let (events, _) = broadcast::channel(config.sync.event_channel_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);

        let inner = CoordinatorInner {
            local,
            address: config.address(),
            capabilities: config.capabilities(),
            load_factor: AtomicU32::new(config.agent.load_factor),
            config: config.sync.clone(),
            ledger: Arc::new(AttentionLedger::new(config.attention.clone(), Arc::clone(&clock))),
            store: Arc::new(MembraneStore::new(local)),
            dispatcher: Dispatcher::new(Arc::clone(&registry)),
            registry,
            transport,
            clock,
            links: LinkTable::new(),
            hooks: Arc::new(HookRegistry::new()),
            collaborators: Arc::new(CollaboratorRegistry::new(config.features)),
            holders: DashMap::new(),
            acked: DashMap::new(),
            awaiting: DashMap::new(),
            patterns: DashMap::new(),
            oversized: DashSet::new(),
            pending: DashMap::new(),
            next_request: AtomicU32::new(1),
            last_timestamp: AtomicU32::new(0),
            round_running: AtomicBool::new(false),
            events,
            merge_tx: Mutex::new(None),
            request_tx: Mutex::new(None),
        };

        Self {
            inner: Arc::new(inner),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the ingest loop, merge worker, and round task
    #[instrument(skip(self), fields(agent = %self.inner.local))]
    pub async fn start(&self) -> NodeResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }

        let (merge_tx, merge_rx) = mpsc::channel(self.inner.config.merge_queue_capacity);
        *self.inner.merge_tx.lock() = Some(merge_tx);
        let (request_tx, request_rx) = mpsc::channel(self.inner.config.request_queue_capacity);
        *self.inner.request_tx.lock() = Some(request_tx);

        let span = agent_span(self.inner.local);
        let ingest = tokio::spawn(
            ingest_loop(Arc::clone(&self.inner), self.shutdown_tx.subscribe()).instrument(span.clone()),
        );
        let rounds = tokio::spawn(
            round_loop(Arc::clone(&self.inner), self.shutdown_tx.subscribe()).instrument(span.clone()),
        );
        let merger =
            tokio::spawn(merge_worker(Arc::clone(&self.inner), merge_rx).instrument(span.clone()));
        let answerer = tokio::spawn(request_worker(Arc::clone(&self.inner), request_rx).instrument(span));

        self.tasks.lock().extend([ingest, rounds]);
        self.workers.lock().extend([merger, answerer]);

        info!(
            interval_ms = self.inner.config.round_interval_ms,
            "Coordinator started"
        );
        Ok(())
    }

    /// Stop rounds and ingestion, let queued merges finish, release the transport
    #[instrument(skip(self), fields(agent = %self.inner.local))]
    pub async fn shutdown(&self) -> NodeResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(NodeError::NotStarted);
        }

        let _ = self.shutdown_tx.send(());
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed");
            }
        }

        // With ingestion stopped these were the last senders; each worker
        // drains its queue and exits
        self.inner.merge_tx.lock().take();
        self.inner.request_tx.lock().take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker failed");
            }
        }

        self.inner.transport.close().await;
        info!("Coordinator stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Run one sync round now
    ///
    /// Returns `false` if another round was still running.
    pub async fn run_round(&self) -> bool {
        self.inner.run_round().await
    }

    /// Handle every datagram already waiting, without blocking
    ///
    /// Only for a stopped coordinator; a started one ingests on its own.
    pub async fn drain_inbox(&self) -> NodeResult<usize> {
        if self.is_started() {
            return Err(NodeError::AlreadyStarted);
        }
        let mut handled = 0;
        while let Some(data) = self.inner.transport.try_recv().await? {
            self.inner.handle_datagram(&data).await;
            handled += 1;
        }
        Ok(handled)
    }

    /// Evaluate `expression` on the least-loaded agent matching `mask`
    ///
    /// # Errors
    ///
    /// - `Dispatch(NoAgentAvailable)` when no agent matches
    /// - `Timeout` when no reply arrives within the round-trip timeout
    /// - `Collaborator(Failed)` carrying the remote error
    #[instrument(skip(self, expression), fields(agent = %self.inner.local))]
    pub async fn request_remote(&self, expression: &str, mask: Capabilities) -> CognitiveResult<String> {
        let reply = self
            .inner
            .request(MessageKind::CommandRequest, expression, mask)
            .await?;
        Ok(reply.body)
    }

    /// Ask an inference-capable agent to draw a conclusion from `premises`
    #[instrument(skip(self, premises), fields(agent = %self.inner.local))]
    pub async fn query_inference(&self, premises: &str) -> CognitiveResult<Inference> {
        let reply = self
            .inner
            .request(MessageKind::InferenceQuery, premises, Capabilities::INFERENCE)
            .await?;
        Ok(Inference::new(reply.body, reply.truth))
    }

    /// Broadcast an encoded pattern and keep it in the local pattern table
    pub async fn share_pattern(
        &self,
        key: &str,
        encoded: &str,
        truth: Option<TruthValue>,
    ) -> CognitiveResult<usize> {
        let payload = PatternSharePayload {
            key: key.to_string(),
            encoded: encoded.to_string(),
            truth,
        }
        .encode()?;
        self.inner.patterns.insert(
            key.to_string(),
            SharedPattern {
                origin: self.inner.local,
                encoded: encoded.to_string(),
                truth,
                received_at: self.inner.clock.now_secs(),
            },
        );
        self.inner.broadcast(MessageKind::PatternShare, payload).await
    }

    /// Broadcast load and attention totals
    pub async fn publish_state(&self) -> CognitiveResult<usize> {
        let attention = self.inner.ledger.snapshot();
        let payload = CognitiveStatePayload {
            load_factor: self.load_factor(),
            active_patterns: attention.active_patterns,
            total_attention: attention.total_attention,
            membrane_count: u32::try_from(self.inner.store.len()).unwrap_or(u32::MAX),
        };
        self.inner
            .broadcast(MessageKind::CognitiveState, payload.encode())
            .await
    }

    /// Add replica holders for a local membrane
    pub fn share_membrane(&self, id: MembraneId, peers: &[AgentId]) -> CognitiveResult<()> {
        if !self.inner.store.contains(id) {
            return Err(SyncError::NotFound(id).into());
        }
        let local = self.inner.local;
        self.inner
            .holders
            .entry(id)
            .or_default()
            .extend(peers.iter().copied().filter(|p| *p != local && !p.is_broadcast()));
        Ok(())
    }

    /// Replicate a membrane to every registered agent that holds membranes
    ///
    /// Returns the number of holders.
    pub fn start_membrane_sync(&self, id: MembraneId) -> CognitiveResult<usize> {
        let peers: Vec<AgentId> = self
            .inner
            .registry
            .find_by_capability(Capabilities::MEMBRANE)
            .into_iter()
            .map(|node| node.agent_id)
            .collect();
        self.share_membrane(id, &peers)?;
        Ok(self.holders(id).len())
    }

    /// Send a membrane to holders now instead of waiting for the next round
    pub async fn push_membrane(&self, id: MembraneId) -> CognitiveResult<usize> {
        self.inner.push_membrane(id).await
    }

    pub fn holders(&self, id: MembraneId) -> Vec<AgentId> {
        self.inner
            .holders
            .get(&id)
            .map(|holders| holders.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn shared_pattern(&self, key: &str) -> Option<SharedPattern> {
        self.inner.patterns.get(key).map(|p| p.clone())
    }

    /// Membranes too large for the transport, ascending
    pub fn oversized_membranes(&self) -> Vec<MembraneId> {
        let mut ids: Vec<MembraneId> = self.inner.oversized.iter().map(|id| *id).collect();
        ids.sort();
        ids
    }

    pub fn shared_pattern_count(&self) -> usize {
        self.inner.patterns.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    pub fn local_id(&self) -> AgentId {
        self.inner.local
    }

    pub fn load_factor(&self) -> u32 {
        self.inner.load_factor.load(Ordering::Relaxed)
    }

    /// Announced in the next heartbeat
    pub fn set_load_factor(&self, load_factor: u32) {
        self.inner.load_factor.store(load_factor, Ordering::Relaxed);
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn ledger(&self) -> &Arc<AttentionLedger> {
        &self.inner.ledger
    }

    pub fn store(&self) -> &Arc<MembraneStore> {
        &self.inner.store
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.inner.hooks
    }

    pub fn collaborators(&self) -> &Arc<CollaboratorRegistry> {
        &self.inner.collaborators
    }

    pub fn link_state(&self, agent: AgentId) -> LinkState {
        self.inner.links.state(agent)
    }

    pub fn links(&self) -> BTreeMap<AgentId, LinkState> {
        self.inner.links.snapshot()
    }

    pub fn missed_replies(&self, agent: AgentId) -> u32 {
        self.inner
            .links
            .get(agent)
            .map_or(0, |link| link.missed_replies)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("agent", &self.inner.local)
            .field("started", &self.is_started())
            .field("agents", &self.inner.registry.len())
            .field("membranes", &self.inner.store.len())
            .finish()
    }
}

async fn ingest_loop(inner: Arc<CoordinatorInner>, mut shutdown_rx: broadcast::Receiver<()>) {
    debug!("Ingest loop started");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            result = inner.transport.recv() => match result {
                Ok(data) => inner.handle_datagram(&data).await,
                Err(TransportError::Closed) => {
                    debug!("Transport closed");
                    break;
                }
                Err(e) => warn!(error = %e, "Transport receive error"),
            }
        }
    }
    debug!("Ingest loop stopped");
}

async fn round_loop(inner: Arc<CoordinatorInner>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(inner.config.round_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if !inner.run_round().await {
                    debug!("Previous round still running, skipping");
                }
            }
        }
    }
    debug!("Round task stopped");
}

async fn merge_worker(inner: Arc<CoordinatorInner>, mut merge_rx: mpsc::Receiver<MembraneCandidate>) {
    while let Some(candidate) = merge_rx.recv().await {
        inner.resolve_candidate(candidate).await;
    }
    debug!("Merge worker drained");
}

async fn request_worker(inner: Arc<CoordinatorInner>, mut request_rx: mpsc::Receiver<InboundRequest>) {
    while let Some(inbound) = request_rx.recv().await {
        let (source, kind, id) = (inbound.source, inbound.kind, inbound.request.request_id);
        let answering = Arc::clone(&inner);
        let reply = match tokio::task::spawn_blocking(move || answering.answer(&inbound)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(request = id, from = %source, error = %e, "Collaborator call panicked");
                RequestPayload::failure(id, "collaborator panicked")
            }
        };
        inner.send_reply(source, kind, reply).await;
    }
    debug!("Request worker drained");
}
