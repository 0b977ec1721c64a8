//! Integration tests for the cogmesh coordinator
//!
//! Agents share a mock network and a manual clock. Rounds and inbox
//! draining are driven by hand so each step is deterministic; the last
//! test runs the background tasks for real.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use cogmesh_core::{
    AgentAddress, AgentId, Capabilities, CognitiveError, CollaboratorError, DispatchError,
    ManualClock, MockNetwork, Transport, TransportError, TruthValue,
};
use cogmesh_node::{
    Collaborator, Coordinator, Evaluator, FeatureFlags, HookAction, HookKind, Inference,
    LinkState, NodeConfig, NodeError, NodeEvent, PatternEngine,
};
use cogmesh_sync::PrimeShape;
use tokio_test::{assert_err, assert_ok};

const A: AgentId = AgentId::new(1);
const B: AgentId = AgentId::new(2);
const C: AgentId = AgentId::new(3);

struct Mesh {
    network: Arc<MockNetwork>,
    clock: Arc<ManualClock>,
    nodes: Vec<Arc<Coordinator>>,
}

impl Mesh {
    fn new(ids: &[u32]) -> Self {
        Self::with_config(ids, |config| config)
    }

    fn with_config(ids: &[u32], tweak: impl Fn(NodeConfig) -> NodeConfig) -> Self {
        let network = MockNetwork::new();
        let clock = Arc::new(ManualClock::new(1_000));
        let nodes = ids
            .iter()
            .map(|&id| {
                let config = tweak(NodeConfig::default().with_agent_id(id));
                Arc::new(Coordinator::new(
                    &config,
                    network.join(AgentId::new(id)),
                    clock.clone(),
                ))
            })
            .collect();
        Self {
            network,
            clock,
            nodes,
        }
    }

    fn node(&self, id: AgentId) -> &Arc<Coordinator> {
        self.nodes
            .iter()
            .find(|node| node.local_id() == id)
            .unwrap()
    }

    async fn round(&self) {
        for node in &self.nodes {
            assert!(node.run_round().await);
        }
        self.settle().await;
    }

    /// Deliver until no agent has anything left to read
    async fn settle(&self) {
        loop {
            let mut handled = 0;
            for node in &self.nodes {
                handled += node.drain_inbox().await.unwrap();
            }
            if handled == 0 {
                break;
            }
        }
    }

    /// Discovery round, then heartbeat round
    async fn connect(&self) {
        self.round().await;
        self.round().await;
    }
}

struct Adder {
    calls: AtomicUsize,
}

impl Evaluator for Adder {
    fn evaluate(&self, expression: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sum: i64 = expression
            .split_whitespace()
            .map(|term| term.parse::<i64>())
            .sum::<Result<i64, _>>()
            .map_err(|e| CollaboratorError::Failed(e.to_string()))?;
        Ok(sum.to_string())
    }
}

struct Syllogism;

impl PatternEngine for Syllogism {
    fn encode(&self, text: &str) -> Result<Inference, CollaboratorError> {
        Ok(Inference::new(text, None))
    }

    fn infer(&self, premises: &str) -> Result<Inference, CollaboratorError> {
        Ok(Inference::new(
            format!("(Implication {premises})"),
            Some(TruthValue::new(0.8, 0.9)),
        ))
    }

    fn transform(&self, text: &str) -> Result<Inference, CollaboratorError> {
        Ok(Inference::new(text, None))
    }
}

fn adder() -> Arc<Adder> {
    Arc::new(Adder {
        calls: AtomicUsize::new(0),
    })
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<NodeEvent>) -> Vec<NodeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_three_agents_discover_each_other() {
    let mesh = Mesh::new(&[1, 2, 3]);

    mesh.round().await;
    for node in &mesh.nodes {
        assert_eq!(node.registry().len(), 2);
        for (_, state) in node.links() {
            assert_eq!(state, LinkState::Discovering);
        }
    }

    mesh.round().await;
    for node in &mesh.nodes {
        let links = node.links();
        assert_eq!(links.len(), 2);
        assert!(links.values().all(|state| *state == LinkState::Active));
    }
    assert_eq!(mesh.node(A).link_state(C), LinkState::Active);
}

#[tokio::test]
async fn test_silent_agent_goes_stale_then_evicted_then_returns() {
    let mesh = Mesh::new(&[1, 2]);
    mesh.connect().await;
    let a = mesh.node(A);
    let mut events = a.subscribe();

    mesh.network.isolate(B);
    mesh.clock.advance(20);
    assert!(a.run_round().await);
    assert_eq!(a.link_state(B), LinkState::Stale);
    assert!(drain_events(&mut events).contains(&NodeEvent::AgentStale { agent: B }));

    mesh.clock.advance(30);
    assert!(a.run_round().await);
    assert_eq!(a.link_state(B), LinkState::Evicted);
    assert!(a.registry().get(B).is_none());
    assert!(a.registry().find_by_capability(Capabilities::ALL).is_empty());
    assert!(drain_events(&mut events).contains(&NodeEvent::AgentEvicted { agent: B }));

    mesh.network.heal(A, B);
    mesh.clock.advance(1);
    mesh.connect().await;
    assert_eq!(a.link_state(B), LinkState::Active);
    assert_eq!(mesh.node(B).link_state(A), LinkState::Active);
    assert!(a.registry().contains(B));

    let seen = drain_events(&mut events);
    assert!(seen.contains(&NodeEvent::AgentDiscovered { agent: B }));
    assert!(seen.contains(&NodeEvent::AgentActive { agent: B }));
}

#[tokio::test]
async fn test_attention_spreads() {
    let mesh = Mesh::new(&[1, 2]);
    mesh.connect().await;

    mesh.node(A).ledger().stimulate("cat", 4.0);
    mesh.node(B).ledger().stimulate("dog", 2.0);
    mesh.round().await;

    for node in &mesh.nodes {
        assert_eq!(node.ledger().get("cat").unwrap().sti, 4.0);
        assert_eq!(node.ledger().get("dog").unwrap().sti, 2.0);
    }
}

#[tokio::test]
async fn test_membrane_replicates_and_merges_concurrent_edits() {
    let mesh = Mesh::new(&[1, 2]);
    mesh.connect().await;
    let (a, b) = (mesh.node(A), mesh.node(B));

    a.store().create(7, PrimeShape::new(vec![2, 3]).unwrap()).unwrap();
    assert_eq!(a.start_membrane_sync(7).unwrap(), 1);
    assert_eq!(a.push_membrane(7).await.unwrap(), 1);
    mesh.settle().await;

    let replica = b.store().get(7).unwrap();
    assert_eq!(replica.version(), 1);
    assert_eq!(replica.data(), &[0.0; 6]);
    assert_eq!(b.holders(7), vec![A]);

    // Both edit from version 1 without hearing from each other
    a.store().set(7, 0, 1.0).unwrap();
    b.store().set(7, 1, 2.0).unwrap();
    mesh.round().await;

    let left = a.store().get(7).unwrap();
    let right = b.store().get(7).unwrap();
    assert_eq!(left.version(), 3);
    assert_eq!(left.version(), right.version());
    assert_eq!(left.checksum(), right.checksum());
    assert_eq!(left.data(), &[1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
    assert!(left.verify());

    // Converged: another round moves nothing
    mesh.round().await;
    assert_eq!(a.store().get(7).unwrap().version(), 3);
}

#[tokio::test]
async fn test_share_unknown_membrane_fails() {
    let mesh = Mesh::new(&[1, 2]);
    let err = assert_err!(mesh.node(A).start_membrane_sync(42));
    assert!(matches!(err, CognitiveError::Sync(_)));
}

#[tokio::test]
async fn test_remote_evaluation() {
    let mesh = Mesh::new(&[1, 2]);
    mesh.connect().await;
    let (a, b) = (mesh.node(A), mesh.node(B));
    let evaluator = adder();
    b.collaborators()
        .register("adder", Collaborator::Evaluator(evaluator.clone()));

    let (result, _) = tokio::join!(a.request_remote("1 2 3", Capabilities::EVALUATE), async {
        tokio::task::yield_now().await;
        b.drain_inbox().await.unwrap();
        a.drain_inbox().await.unwrap();
    });
    assert_eq!(result.unwrap(), "6");
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remote_failure_is_reported() {
    let mesh = Mesh::new(&[1, 2]);
    mesh.connect().await;
    let (a, b) = (mesh.node(A), mesh.node(B));
    b.collaborators().register("adder", Collaborator::Evaluator(adder()));

    let (result, _) = tokio::join!(a.request_remote("1 two", Capabilities::EVALUATE), async {
        tokio::task::yield_now().await;
        b.drain_inbox().await.unwrap();
        a.drain_inbox().await.unwrap();
    });
    assert!(matches!(
        result,
        Err(CognitiveError::Collaborator(CollaboratorError::Failed(_)))
    ));
}

#[tokio::test]
async fn test_disabled_feature_rejects_remote_evaluation() {
    let mesh = Mesh::with_config(&[1, 2], |config| {
        config.with_features(FeatureFlags {
            scheme: false,
            ..FeatureFlags::default()
        })
    });
    mesh.connect().await;
    let (a, b) = (mesh.node(A), mesh.node(B));
    let evaluator = adder();
    b.collaborators()
        .register("adder", Collaborator::Evaluator(evaluator.clone()));

    let (result, _) = tokio::join!(a.request_remote("1 2", Capabilities::EVALUATE), async {
        tokio::task::yield_now().await;
        b.drain_inbox().await.unwrap();
        a.drain_inbox().await.unwrap();
    });
    match result {
        Err(CognitiveError::Collaborator(CollaboratorError::Failed(reason))) => {
            assert!(reason.contains("scheme"), "unexpected reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_pre_exec_hook_aborts() {
    let mesh = Mesh::new(&[1, 2]);
    mesh.connect().await;
    let (a, b) = (mesh.node(A), mesh.node(B));
    let evaluator = adder();
    b.collaborators()
        .register("adder", Collaborator::Evaluator(evaluator.clone()));
    b.hooks().register(HookKind::PreExec, |ctx| {
        if ctx.agent == A {
            HookAction::Abort
        } else {
            HookAction::Continue
        }
    });

    let (result, _) = tokio::join!(a.request_remote("1 2", Capabilities::EVALUATE), async {
        tokio::task::yield_now().await;
        b.drain_inbox().await.unwrap();
        a.drain_inbox().await.unwrap();
    });
    match result {
        Err(CognitiveError::Collaborator(CollaboratorError::Failed(reason))) => {
            assert!(reason.contains("pre-exec"));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_inference_query() {
    let mesh = Mesh::new(&[1, 2]);
    mesh.connect().await;
    let (a, b) = (mesh.node(A), mesh.node(B));
    b.collaborators()
        .register("pln", Collaborator::PatternEngine(Arc::new(Syllogism)));

    let (result, _) = tokio::join!(a.query_inference("cat animal"), async {
        tokio::task::yield_now().await;
        b.drain_inbox().await.unwrap();
        a.drain_inbox().await.unwrap();
    });
    let inference = result.unwrap();
    assert_eq!(inference.text, "(Implication cat animal)");
    assert_eq!(inference.truth, Some(TruthValue::new(0.8, 0.9)));
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let mesh = Mesh::with_config(&[1, 2], |config| config.with_round_trip_timeout_ms(100));
    mesh.connect().await;
    let a = mesh.node(A);
    mesh.network.isolate(B);

    let err = a
        .request_remote("1 2", Capabilities::EVALUATE)
        .await
        .unwrap_err();
    match err {
        CognitiveError::Timeout { agent, waited_ms } => {
            assert_eq!(agent, B);
            assert_eq!(waited_ms, 100);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(a.missed_replies(B), 1);
    assert_eq!(a.link_state(B), LinkState::Active);
}

#[tokio::test]
async fn test_no_matching_agent() {
    let mesh = Mesh::with_config(&[1, 2], |config| {
        config.with_capabilities(Capabilities::ATTENTION | Capabilities::MEMBRANE)
    });
    mesh.connect().await;

    let err = mesh
        .node(A)
        .request_remote("1", Capabilities::TENSOR)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CognitiveError::Dispatch(DispatchError::NoAgentAvailable(mask)) if mask == Capabilities::TENSOR
    ));
}

#[tokio::test]
async fn test_pattern_share_and_state_publish() {
    let mesh = Mesh::new(&[1, 2]);
    mesh.connect().await;
    let (a, b) = (mesh.node(A), mesh.node(B));
    let mut events = b.subscribe();

    let truth = Some(TruthValue::new(0.9, 0.5));
    assert_eq!(a.share_pattern("cat", "(Concept \"cat\")", truth).await.unwrap(), 1);
    a.set_load_factor(5);
    a.publish_state().await.unwrap();
    mesh.settle().await;

    let pattern = b.shared_pattern("cat").unwrap();
    assert_eq!(pattern.origin, A);
    assert_eq!(pattern.encoded, "(Concept \"cat\")");
    assert_eq!(pattern.truth, truth);
    assert_eq!(a.shared_pattern("cat").unwrap().origin, A);
    assert_eq!(b.registry().get(A).unwrap().load_factor, 5);

    let seen = drain_events(&mut events);
    assert!(seen.contains(&NodeEvent::PatternShared {
        origin: A,
        key: "cat".into()
    }));
    assert!(seen.iter().any(|e| matches!(e, NodeEvent::PeerState { agent, state } if *agent == A && state.load_factor == 5)));
}

#[tokio::test]
async fn test_background_tasks_connect_agents() {
    let mesh = Mesh::with_config(&[1, 2], |config| config.with_round_interval_ms(20));
    let (a, b) = (mesh.node(A), mesh.node(B));
    assert_ok!(a.start().await);
    assert_ok!(b.start().await);
    assert!(matches!(a.start().await, Err(NodeError::AlreadyStarted)));

    let connected = tokio::time::timeout(Duration::from_secs(5), async {
        while a.link_state(B) != LinkState::Active || b.link_state(A) != LinkState::Active {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(connected.is_ok(), "agents never became active");

    assert_ok!(a.shutdown().await);
    assert_ok!(b.shutdown().await);
    assert_err!(a.shutdown().await);
    assert!(mesh.network.agents().is_empty());
}

#[tokio::test]
async fn test_skewed_sender_clock_keeps_peer_active() {
    let network = MockNetwork::new();
    let ahead = Arc::new(ManualClock::new(10_000));
    // Further behind than the eviction timeout
    let behind = Arc::new(ManualClock::new(9_900));
    let a = Coordinator::new(&NodeConfig::default().with_agent_id(1), network.join(A), ahead.clone());
    let b = Coordinator::new(&NodeConfig::default().with_agent_id(2), network.join(B), behind.clone());
    let mut events = a.subscribe();

    let mut states = Vec::new();
    for _ in 0..8 {
        assert!(a.run_round().await);
        assert!(b.run_round().await);
        while a.drain_inbox().await.unwrap() + b.drain_inbox().await.unwrap() > 0 {}
        states.push(a.link_state(B));
        ahead.advance(5);
        behind.advance(5);
    }

    assert_eq!(states[0], LinkState::Discovering);
    assert!(states[1..].iter().all(|state| *state == LinkState::Active));
    assert!(a.registry().contains(B));
    assert_eq!(b.link_state(A), LinkState::Active);
    assert!(
        !drain_events(&mut events).contains(&NodeEvent::AgentEvicted { agent: B })
    );
}

struct Sleeper {
    delay: Duration,
}

impl Evaluator for Sleeper {
    fn evaluate(&self, expression: &str) -> Result<String, CollaboratorError> {
        std::thread::sleep(self.delay);
        Ok(format!("done {expression}"))
    }
}

#[tokio::test]
async fn test_slow_evaluation_leaves_ingest_running() {
    let mesh = Mesh::with_config(&[1, 2], |config| config.with_round_trip_timeout_ms(5_000));
    mesh.connect().await;
    let (a, b) = (mesh.node(A), mesh.node(B));
    b.collaborators().register(
        "slow",
        Collaborator::Evaluator(Arc::new(Sleeper {
            delay: Duration::from_millis(600),
        })),
    );
    assert_ok!(a.start().await);
    assert_ok!(b.start().await);

    let observe = async {
        // Let the request reach b first
        tokio::time::sleep(Duration::from_millis(100)).await;
        a.set_load_factor(9);
        a.publish_state().await.unwrap();
        let sent = Instant::now();
        while b.registry().get(A).map(|node| node.load_factor) != Some(9) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sent.elapsed()
    };
    let (result, waited) = tokio::join!(a.request_remote("(pause)", Capabilities::EVALUATE), observe);

    assert_eq!(result.unwrap(), "done (pause)");
    assert!(
        waited < Duration::from_millis(300),
        "state update waited {waited:?} behind the evaluator"
    );

    assert_ok!(a.shutdown().await);
    assert_ok!(b.shutdown().await);
}

/// Mock transport with a datagram size limit
struct Narrow {
    inner: Arc<dyn Transport>,
    limit: usize,
}

#[async_trait]
impl Transport for Narrow {
    async fn send(&self, peer: AgentId, data: Bytes) -> Result<(), TransportError> {
        self.inner.send(peer, data).await
    }

    async fn broadcast(&self, data: Bytes) -> Result<usize, TransportError> {
        self.inner.broadcast(data).await
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        self.inner.recv().await
    }

    async fn try_recv(&self) -> Result<Option<Bytes>, TransportError> {
        self.inner.try_recv().await
    }

    async fn learn_peer(&self, peer: AgentId, address: &AgentAddress) -> Result<(), TransportError> {
        self.inner.learn_peer(peer, address).await
    }

    fn forget_peer(&self, peer: AgentId) {
        self.inner.forget_peer(peer)
    }

    fn knows_peer(&self, peer: AgentId) -> bool {
        self.inner.knows_peer(peer)
    }

    fn max_datagram_size(&self) -> Option<usize> {
        Some(self.limit)
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_membrane_over_datagram_limit_is_held_back() {
    let network = MockNetwork::new();
    let clock = Arc::new(ManualClock::new(1_000));
    let narrow = Arc::new(Narrow {
        inner: network.join(A),
        limit: 256,
    });
    let a = Coordinator::new(&NodeConfig::default().with_agent_id(1), narrow, clock.clone());
    let b = Coordinator::new(&NodeConfig::default().with_agent_id(2), network.join(B), clock.clone());
    for _ in 0..2 {
        assert!(a.run_round().await);
        assert!(b.run_round().await);
        while a.drain_inbox().await.unwrap() + b.drain_inbox().await.unwrap() > 0 {}
    }
    assert_eq!(a.link_state(B), LinkState::Active);

    // 4 cells fit, 210 cells do not
    a.store().create(3, PrimeShape::new(vec![2, 2]).unwrap()).unwrap();
    a.store().create(4, PrimeShape::new(vec![2, 3, 5, 7]).unwrap()).unwrap();
    a.share_membrane(3, &[B]).unwrap();
    a.share_membrane(4, &[B]).unwrap();

    assert_eq!(a.push_membrane(3).await.unwrap(), 1);
    assert_err!(a.push_membrane(4).await);
    assert_err!(a.push_membrane(4).await);
    assert_eq!(a.oversized_membranes(), vec![4]);

    while a.drain_inbox().await.unwrap() + b.drain_inbox().await.unwrap() > 0 {}
    assert!(b.store().get(3).is_ok());
    assert!(b.store().get(4).is_err());
}
