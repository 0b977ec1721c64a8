//! Integration tests for cogmesh-transport
//!
//! Full messages are encoded, sent over loopback UDP, and decoded on the
//! other side.

use std::time::Duration;

use cogmesh_core::{
    AgentAddress, AgentId, Capabilities, CognitiveMessage, MalformedMessage, MessageKind, Transport,
};
use cogmesh_transport::{AnnouncePayload, HEADER_LEN, MembraneSyncPayload, UdpTransport, decode, encode};

async fn recv_message(transport: &UdpTransport) -> Result<CognitiveMessage, MalformedMessage> {
    let data = tokio::time::timeout(Duration::from_secs(2), transport.recv())
        .await
        .expect("datagram should arrive")
        .expect("transport open");
    decode(&data)
}

#[tokio::test]
async fn test_discovery_over_udp() {
    let alice = UdpTransport::bind("127.0.0.1:0", &[]).await.unwrap();
    let bob = UdpTransport::bind("127.0.0.1:0", &[alice.local_addr().to_string()])
        .await
        .unwrap();

    let announce = AnnouncePayload {
        agent_id: AgentId::new(2),
        address: AgentAddress::new("127.0.0.1", bob.local_addr().port()),
        capabilities: Capabilities::EVALUATE | Capabilities::MEMBRANE,
        load_factor: 0,
    };
    let msg = CognitiveMessage::broadcast(
        MessageKind::Discovery,
        AgentId::new(2),
        1_700_000_000,
        announce.encode().unwrap(),
    )
    .unwrap();
    assert_eq!(bob.broadcast(encode(&msg)).await.unwrap(), 1);

    let received = recv_message(&alice).await.unwrap();
    assert_eq!(received.kind(), MessageKind::Discovery);
    assert!(received.is_for(AgentId::new(1)));

    // Alice learns Bob from the announcement and can answer directly
    let decoded = AnnouncePayload::decode(received.payload()).unwrap();
    alice
        .learn_peer(decoded.agent_id, &decoded.address)
        .await
        .unwrap();

    let reply = CognitiveMessage::new(
        MessageKind::Heartbeat,
        AgentId::new(1),
        decoded.agent_id,
        1_700_000_001,
        vec![],
    )
    .unwrap();
    alice.send(decoded.agent_id, encode(&reply)).await.unwrap();

    let received = recv_message(&bob).await.unwrap();
    assert_eq!(received, reply);
}

#[tokio::test]
async fn test_membrane_candidate_over_udp() {
    let alice = UdpTransport::bind("127.0.0.1:0", &[]).await.unwrap();
    let bob = UdpTransport::bind("127.0.0.1:0", &[]).await.unwrap();
    alice
        .learn_peer(
            AgentId::new(2),
            &AgentAddress::new("127.0.0.1", bob.local_addr().port()),
        )
        .await
        .unwrap();

    let candidate = MembraneSyncPayload {
        membrane_id: 1,
        version: 4,
        derived_from: 3,
        checksum: 0xdeadbeef,
        factors: vec![2, 2, 3],
        data: (0..12).map(|i| i as f32 * 0.5).collect(),
    };
    let msg = CognitiveMessage::new(
        MessageKind::MembraneSync,
        AgentId::new(1),
        AgentId::new(2),
        10,
        candidate.encode().unwrap(),
    )
    .unwrap();
    alice.send(AgentId::new(2), encode(&msg)).await.unwrap();

    let received = recv_message(&bob).await.unwrap();
    assert_eq!(MembraneSyncPayload::decode(received.payload()).unwrap(), candidate);
}

#[tokio::test]
async fn test_garbage_datagram_is_rejected() {
    let alice = UdpTransport::bind("127.0.0.1:0", &[]).await.unwrap();
    let bob = UdpTransport::bind("127.0.0.1:0", &[]).await.unwrap();
    alice
        .learn_peer(
            AgentId::new(2),
            &AgentAddress::new("127.0.0.1", bob.local_addr().port()),
        )
        .await
        .unwrap();

    alice
        .send(AgentId::new(2), bytes::Bytes::from_static(&[1, 2, 3]))
        .await
        .unwrap();
    let result = recv_message(&bob).await;
    assert_eq!(
        result,
        Err(MalformedMessage::TooShort {
            needed: HEADER_LEN,
            available: 3
        })
    );
}
