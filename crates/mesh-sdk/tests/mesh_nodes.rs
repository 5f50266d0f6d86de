//! End-to-end tests: chat nodes running on tokio over memory transports.

use mesh_sdk::quick::{spawn_mesh, MemoryMesh};
use mesh_delivery::DeliveryEngine;
use mesh_sdk::{
    ChatNode, LinkId, LinkTransport, MemoryTransport, NodeConfig, NodeConfigBuilder, NodeEvent,
    NodeId, NodeReport, Topology, VectorClock, WireRecord,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Poll a node's report until `done` holds.
async fn report_when(node: &ChatNode, done: impl Fn(&NodeReport) -> bool) -> NodeReport {
    tokio::time::timeout(WAIT, async {
        loop {
            let report = node.report().await.unwrap();
            if done(&report) {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

fn bodies(node: &ChatNode) -> Vec<String> {
    node.chat_log()
        .entries()
        .into_iter()
        .map(|entry| entry.split(": ").nth(1).unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_full_mesh_delivers_exactly_once() {
    let mesh = spawn_mesh(&["a", "b", "c"], &Topology::FullMesh, NodeConfig::default()).unwrap();

    for (idx, body) in ["from a", "from b", "from c"].iter().enumerate() {
        mesh.node(idx).submit(*body).await.unwrap();
    }

    for node in &mesh.nodes {
        node.wait_for_entries(3, WAIT).await.unwrap();
        // Two foreign messages, each arriving directly and via the third node.
        let report = report_when(node, |r| r.buffer.stats.received == 4).await;
        assert_eq!(report.buffer.stats.duplicates, 2);
        assert_eq!(report.buffer.stats.delivered, 3);
        assert_eq!(report.buffer.pending, 0);
        assert_eq!(node.chat_log().len(), 3);
    }

    mesh.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_line_relays_reply_after_question() {
    let mesh = spawn_mesh(&["asker", "relay", "far"], &Topology::Line, NodeConfig::default()).unwrap();

    mesh.node(0).submit("lunch?").await.unwrap();
    mesh.node(1).wait_for_entries(1, WAIT).await.unwrap();
    mesh.node(1).submit("yes").await.unwrap();

    for node in &mesh.nodes {
        node.wait_for_entries(2, WAIT).await.unwrap();
        assert_eq!(bodies(node), vec!["lunch?", "yes"]);
    }

    mesh.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_chatter_respects_causality() {
    let mesh = spawn_mesh(
        &["n0", "n1", "n2", "n3"],
        &Topology::Ring,
        NodeConfig::default(),
    )
    .unwrap();

    for round in 0..5 {
        for (idx, node) in mesh.nodes.iter().enumerate() {
            node.submit(format!("{}-{}", idx, round)).await.unwrap();
        }
    }

    for node in &mesh.nodes {
        node.wait_for_entries(20, WAIT).await.unwrap();
        let log = bodies(node);
        assert_eq!(log.len(), 20);
        // Each author's own messages stay in order everywhere.
        for author in 0..4 {
            let rounds: Vec<_> = log
                .iter()
                .filter(|b| b.starts_with(&format!("{}-", author)))
                .cloned()
                .collect();
            let expected: Vec<_> = (0..5).map(|r| format!("{}-{}", author, r)).collect();
            assert_eq!(rounds, expected);
        }
    }

    mesh.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_late_joiner_skips_history() {
    let mesh = spawn_mesh(
        &["node_0", "node_1", "node_2"],
        &Topology::Custom(vec![(0, 1)]),
        NodeConfig::default(),
    )
    .unwrap();

    for i in 0..3 {
        mesh.node(0).submit(format!("history {}", i)).await.unwrap();
    }
    mesh.node(1).wait_for_entries(3, WAIT).await.unwrap();

    let mut events = mesh.node(2).subscribe();
    assert!(mesh.connect(1, 2));
    mesh.node(0).submit("welcome").await.unwrap();

    mesh.node(2).wait_for_entries(1, WAIT).await.unwrap();
    assert_eq!(bodies(mesh.node(2)), vec!["welcome"]);

    let report = mesh.node(2).report().await.unwrap();
    assert_eq!(report.clock().get(&NodeId::new("node_0")), 4);
    assert_eq!(report.buffer.pending, 0);

    let opened = std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| e == NodeEvent::LinkOpened(mesh_sdk::LinkId::new("node_1")));
    assert!(opened);

    mesh.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnected_node_resumes_from_peer_context() {
    let mesh = spawn_mesh(&["node_0", "node_1", "node_2"], &Topology::Line, NodeConfig::default()).unwrap();

    assert!(mesh.disconnect(1, 2));
    mesh.node(0).submit("during").await.unwrap();
    mesh.node(1).wait_for_entries(1, WAIT).await.unwrap();
    assert!(mesh.node(2).chat_log().is_empty());

    // The context from node_1 covers "during", so node_2 never waits for it.
    assert!(mesh.connect(1, 2));
    mesh.node(1).submit("after").await.unwrap();

    mesh.node(2).wait_for_entries(1, WAIT).await.unwrap();
    assert_eq!(bodies(mesh.node(2)), vec!["after"]);
    let report = mesh.node(2).report().await.unwrap();
    assert_eq!(report.buffer.pending, 0);

    mesh.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_context_on_new_link_keeps_buffered_messages() {
    let peer = Arc::new(MemoryTransport::new("peer"));
    let local = Arc::new(MemoryTransport::new("local"));
    let node = ChatNode::spawn(NodeConfigBuilder::new().node_id("local").build(), local.clone()).unwrap();

    let mut author = DeliveryEngine::new("author");
    let first = author.submit("first").message;
    let second = author.submit("second").message;

    peer.connect_to(&local);
    let link = LinkId::new("local");
    peer.send_to(&link, WireRecord::Chat(second).encode().unwrap()).await.unwrap();
    report_when(&node, |r| r.buffer.pending == 1).await;

    // The peer has delivered both, so its context covers the buffered author.
    let clock = VectorClock::from_entries([("author", 2)]);
    peer.send_to(&link, WireRecord::Context { clock }.encode().unwrap()).await.unwrap();
    report_when(&node, |r| r.buffer.stats.context_merges == 1).await;
    assert!(node.chat_log().is_empty());

    peer.send_to(&link, WireRecord::Chat(first).encode().unwrap()).await.unwrap();
    node.wait_for_entries(2, WAIT).await.unwrap();

    assert_eq!(bodies(&node), vec!["first", "second"]);
    let report = node.report().await.unwrap();
    assert_eq!(report.buffer.pending, 0);
    assert_eq!(report.buffer.stats.subsumed, 0);
    assert_eq!(report.clock().get(&NodeId::new("author")), 2);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closed_links_are_skipped() {
    let mesh = spawn_mesh(&["x", "y"], &Topology::Line, NodeConfig::default()).unwrap();
    let mut events = mesh.node(0).subscribe();

    assert!(mesh.disconnect(0, 1));
    report_when(mesh.node(0), |r| r.links.is_empty()).await;

    let message = mesh.node(0).submit("into the void").await.unwrap();
    assert_eq!(message.id, 1);
    assert_eq!(mesh.node(0).chat_log().len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(mesh.node(1).chat_log().is_empty());

    let closed = std::iter::from_fn(|| events.try_recv().ok())
        .any(|e| e == NodeEvent::LinkClosed(mesh_sdk::LinkId::new("y")));
    assert!(closed);

    mesh.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_compaction_keeps_duplicates_out() {
    let config = NodeConfigBuilder::new().compact_dedup(true).build();
    let mesh: MemoryMesh = spawn_mesh(&["p", "q", "r"], &Topology::FullMesh, config).unwrap();

    for i in 0..5 {
        mesh.node(i % 3).submit(format!("m{}", i)).await.unwrap();
    }

    for node in &mesh.nodes {
        node.wait_for_entries(5, WAIT).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    for node in &mesh.nodes {
        let report = node.report().await.unwrap();
        assert_eq!(report.buffer.dedup_len, 0);
        assert_eq!(report.buffer.stats.delivered, 5);
        assert_eq!(node.chat_log().len(), 5);
    }

    mesh.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_node() {
    let mesh = spawn_mesh(&["only"], &Topology::FullMesh, NodeConfig::default()).unwrap();
    let MemoryMesh { mut nodes, .. } = mesh;
    let node = nodes.remove(0);
    assert!(node.is_running());
    node.shutdown().await.unwrap();
}
