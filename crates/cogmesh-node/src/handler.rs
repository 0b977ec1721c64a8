//! Inbound message handling
//!
//! Every datagram is decoded, checked for addressing, and routed by kind.
//! Nothing here is fatal: a bad message is logged and dropped.

use tracing::{debug, trace, warn};

use cogmesh_core::{
    AgentId, CognitiveError, CognitiveMessage, CognitiveResult, MalformedMessage, MessageKind,
};
use cogmesh_routing::{AgentNode, AnnounceOutcome};
use cogmesh_sync::{ApplyOutcome, MembraneCandidate, MembraneId, RejectReason};
use cogmesh_transport::{
    AnnouncePayload, AttentionPayload, CognitiveStatePayload, MembraneSyncPayload,
    PatternSharePayload, RequestPayload, decode,
};

use crate::coordinator::{CoordinatorInner, RequestRoute, SharedPattern};
use crate::events::NodeEvent;
use crate::hooks::{HookAction, HookContext, HookKind};

/// A command or inference request from a peer, waiting to be answered
pub(crate) struct InboundRequest {
    pub(crate) kind: MessageKind,
    pub(crate) source: AgentId,
    pub(crate) request: RequestPayload,
}

impl CoordinatorInner {
    pub(crate) async fn handle_datagram(&self, data: &[u8]) {
        let msg = match decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, len = data.len(), "Dropping malformed message");
                return;
            }
        };
        if msg.source() == self.local || !msg.is_for(self.local) {
            trace!(kind = ?msg.kind(), source = %msg.source(), "Ignoring message not for us");
            return;
        }

        let kind = msg.kind();
        let source = msg.source();
        if let Err(e) = self.dispatch(&msg).await {
            match e {
                CognitiveError::Malformed(_) | CognitiveError::Sync(_) => {
                    warn!(kind = ?kind, source = %source, error = %e, "Dropping invalid message")
                }
                _ => debug!(kind = ?kind, source = %source, error = %e, "Message handling failed"),
            }
        }
    }

    async fn dispatch(&self, msg: &CognitiveMessage) -> CognitiveResult<()> {
        let source = msg.source();
        self.awaiting.remove(&source);

        match msg.kind() {
            MessageKind::Discovery | MessageKind::Heartbeat => return self.on_announce(msg).await,
            _ => {}
        }

        if let Some(transition) = self.links.on_message(source, self.clock.now_secs()) {
            self.report(transition);
        }

        match msg.kind() {
            MessageKind::AttentionSync => {
                let payload = AttentionPayload::decode(msg.payload())?;
                self.ledger.merge_remote(&payload.into_state());
            }
            MessageKind::PatternShare => {
                let payload = PatternSharePayload::decode(msg.payload())?;
                self.patterns.insert(
                    payload.key.clone(),
                    SharedPattern {
                        origin: source,
                        encoded: payload.encoded,
                        truth: payload.truth,
                        received_at: self.clock.now_secs(),
                    },
                );
                self.emit(NodeEvent::PatternShared {
                    origin: source,
                    key: payload.key,
                });
            }
            MessageKind::CognitiveState => {
                let state = CognitiveStatePayload::decode(msg.payload())?;
                self.registry.heartbeat(
                    source,
                    state.load_factor,
                    msg.timestamp(),
                    self.clock.now_secs(),
                );
                self.emit(NodeEvent::PeerState {
                    agent: source,
                    state,
                });
            }
            MessageKind::CommandRequest | MessageKind::InferenceQuery => {
                self.on_request(msg).await?;
            }
            MessageKind::MemorySync => {
                self.emit(NodeEvent::MemorySync {
                    agent: source,
                    payload: msg.payload().clone(),
                });
            }
            MessageKind::MembraneSync => {
                let payload = MembraneSyncPayload::decode(msg.payload())?;
                let candidate = MembraneCandidate::from_payload(payload, source)?;
                self.holders
                    .entry(candidate.membrane_id)
                    .or_default()
                    .insert(source);
                if let Some(candidate) = self.queue_candidate(candidate) {
                    self.resolve_candidate(candidate).await;
                }
            }
            MessageKind::Discovery | MessageKind::Heartbeat => {}
        }
        Ok(())
    }

    async fn on_announce(&self, msg: &CognitiveMessage) -> CognitiveResult<()> {
        let source = msg.source();
        let payload = AnnouncePayload::decode(msg.payload())?;
        if payload.agent_id != source {
            return Err(MalformedMessage::InvalidPayload(format!(
                "announce for {} sent by {}",
                payload.agent_id, source
            ))
            .into());
        }

        let now = self.clock.now_secs();
        let previous = self.registry.get(source);
        let node = AgentNode::new(
            source,
            payload.address.clone(),
            payload.capabilities,
            payload.load_factor,
            msg.timestamp(),
        )
        .received_at(now);
        let outcome = match msg.kind() {
            MessageKind::Heartbeat
                if self
                    .registry
                    .heartbeat(source, payload.load_factor, msg.timestamp(), now) =>
            {
                AnnounceOutcome::Updated
            }
            _ => self.registry.announce(node),
        };

        let moved = previous.is_none_or(|prev| prev.address != payload.address);
        if moved || !self.transport.knows_peer(source) {
            self.transport.learn_peer(source, &payload.address).await?;
        }

        let transition = match msg.kind() {
            MessageKind::Heartbeat => self.links.on_heartbeat(source, now),
            _ => self.links.on_discovery(source, now),
        };
        if let Some(transition) = transition {
            self.report(transition);
        }

        // Answer first contact so the newcomer learns about us without
        // waiting a round
        if msg.kind() == MessageKind::Discovery && outcome == AnnounceOutcome::Inserted {
            let reply = self.announce_payload()?;
            self.send_to(source, MessageKind::Discovery, reply).await?;
        }
        Ok(())
    }

    async fn on_request(&self, msg: &CognitiveMessage) -> CognitiveResult<()> {
        let source = msg.source();
        let request = RequestPayload::decode(msg.payload())?;
        if request.is_reply {
            self.complete_request(source, request);
            return Ok(());
        }

        let inbound = InboundRequest {
            kind: msg.kind(),
            source,
            request,
        };
        match self.queue_request(inbound) {
            RequestRoute::Queued => Ok(()),
            RequestRoute::Inline(inbound) => {
                let reply = self.answer(&inbound);
                self.send_to(inbound.source, inbound.kind, reply.encode()?).await
            }
            RequestRoute::Refused(inbound) => {
                let reply = RequestPayload::failure(inbound.request.request_id, "request queue full");
                self.send_to(inbound.source, inbound.kind, reply.encode()?).await
            }
        }
    }

    /// Run the collaborator for a request; may block for as long as it takes
    pub(crate) fn answer(&self, inbound: &InboundRequest) -> RequestPayload {
        let request = &inbound.request;
        match inbound.kind {
            MessageKind::InferenceQuery => match self.collaborators.infer(&request.body) {
                Ok(inference) => RequestPayload::reply(request.request_id, inference.text, inference.truth),
                Err(e) => RequestPayload::failure(request.request_id, e.to_string()),
            },
            _ => self.execute(inbound.source, request),
        }
    }

    pub(crate) async fn send_reply(&self, to: AgentId, kind: MessageKind, reply: RequestPayload) {
        let id = reply.request_id;
        let payload = match reply.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(request = id, error = %e, "Failed to encode reply");
                return;
            }
        };
        if let Err(e) = self.send_to(to, kind, payload).await {
            debug!(request = id, agent = %to, error = %e, "Reply send failed");
        }
    }

    /// Evaluate a remote command with hooks around it
    fn execute(&self, source: AgentId, request: &RequestPayload) -> RequestPayload {
        let id = request.request_id;
        let pre = HookContext::new(HookKind::PreExec, source, &request.body);
        if self.hooks.invoke(&pre) == HookAction::Abort {
            return RequestPayload::failure(id, "aborted by pre-exec hook");
        }

        match self.collaborators.evaluate(&request.body) {
            Ok(output) => {
                let post = HookContext::new(HookKind::PostExec, source, &request.body).with_output(&output);
                self.hooks.invoke(&post);
                RequestPayload::reply(id, output, None)
            }
            Err(e) => {
                let reason = e.to_string();
                let ctx = HookContext::new(HookKind::Error, source, &request.body).with_error(&reason);
                self.hooks.invoke(&ctx);
                RequestPayload::failure(id, reason)
            }
        }
    }

    /// Apply a remote membrane candidate and answer with the resulting local
    /// state
    ///
    /// Only a duplicate goes unanswered. The answer to an accepted candidate
    /// tells the sender its push arrived.
    pub(crate) async fn resolve_candidate(&self, candidate: MembraneCandidate) {
        let id = candidate.membrane_id;
        let from = candidate.origin;

        let outcome = match self.store.apply_remote(&candidate) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(membrane = id, from = %from, error = %e, "Membrane candidate rejected");
                return;
            }
        };
        if candidate.verify() {
            self.acked.insert((id, from), (candidate.version, candidate.checksum));
        }

        match outcome {
            ApplyOutcome::Duplicate => return,
            ApplyOutcome::Accepted { version } | ApplyOutcome::Merged { version } => {
                self.emit(NodeEvent::MembraneUpdated {
                    membrane_id: id,
                    version,
                    from,
                });
            }
            ApplyOutcome::Rejected(RejectReason::Stale { local, remote }) => {
                debug!(membrane = id, from = %from, local, remote, "Stale membrane candidate");
                // Same version, different content: the higher id absorbs
                if local == remote && self.local > from {
                    match self.store.absorb(&candidate) {
                        Ok(version) => self.emit(NodeEvent::MembraneUpdated {
                            membrane_id: id,
                            version,
                            from,
                        }),
                        Err(e) => warn!(membrane = id, error = %e, "Failed to absorb divergent state"),
                    }
                }
            }
            ApplyOutcome::Rejected(reason @ RejectReason::ChecksumMismatch { .. }) => {
                warn!(
                    membrane = id,
                    from = %from,
                    error = %reason.into_error(id),
                    "Checksum mismatch on membrane candidate"
                );
            }
        }

        self.reply_membrane(id, from).await;
    }

    async fn reply_membrane(&self, id: MembraneId, to: AgentId) {
        let current = match self.store.candidate(id) {
            Ok(candidate) => candidate,
            Err(e) => {
                debug!(membrane = id, error = %e, "Nothing to reply with");
                return;
            }
        };
        let payload = match current.to_payload().encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(membrane = id, error = %e, "Failed to encode membrane");
                return;
            }
        };
        if !self.fits_datagram(id, payload.len()) {
            return;
        }
        match self.send_to(to, MessageKind::MembraneSync, payload).await {
            Ok(()) => {
                self.awaiting.entry(to).or_insert(self.clock.now_secs());
            }
            Err(e) => debug!(membrane = id, agent = %to, error = %e, "Membrane reply failed"),
        }
    }
}
