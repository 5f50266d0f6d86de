//! Deterministic flood network simulator
//!
//! Runs a set of [`DeliveryEngine`]s connected by point-to-point links and
//! moves records between them one at a time, so tests can exercise causal
//! delivery under loss, duplication, reordering and partitions without any
//! async runtime.
//!
//! Forwarding follows the live protocol: a node that accepts a new message
//! sends it on every link except the one it arrived on.

use crate::engine::{DeliveryEngine, Receipt};
use crate::sink::{ApplicationSink, ChatLog};
use mesh_core::{ChatMessage, MessageId, NodeId, WireRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// A record in flight on the link `from → to`.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: usize,
    pub to: usize,
    pub record: WireRecord,
}

/// Shape of the initial link set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Every pair of nodes is linked.
    FullMesh,
    /// `0 - 1 - 2 - ... - n-1`
    Line,
    /// A line whose ends are also linked.
    Ring,
    /// Explicit undirected links.
    Custom(Vec<(usize, usize)>),
}

impl Topology {
    pub fn links(&self, n: usize) -> Vec<(usize, usize)> {
        match self {
            Topology::FullMesh => (0..n)
                .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
                .collect(),
            Topology::Line => (1..n).map(|i| (i - 1, i)).collect(),
            Topology::Ring => {
                let mut links: Vec<_> = (1..n).map(|i| (i - 1, i)).collect();
                if n > 2 {
                    links.push((n - 1, 0));
                }
                links
            }
            Topology::Custom(links) => links
                .iter()
                .copied()
                .filter(|&(a, b)| a != b && a < n && b < n)
                .collect(),
        }
    }
}

/// Network configuration for simulation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Probability of message loss (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability of message duplication (0.0 - 1.0)
    pub dup_rate: f64,
    /// Probability of message reordering (0.0 - 1.0)
    pub reorder_rate: f64,
}

impl NetworkConfig {
    /// Create a lossy network configuration
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    /// Create a network with duplicates
    pub fn with_dups(dup_rate: f64) -> Self {
        Self {
            dup_rate,
            ..Default::default()
        }
    }

    /// Create a network that only reorders
    pub fn reordering(reorder_rate: f64) -> Self {
        Self {
            reorder_rate,
            ..Default::default()
        }
    }

    /// Create a chaotic network (all problems)
    pub fn chaotic() -> Self {
        Self {
            loss_rate: 0.1,
            dup_rate: 0.2,
            reorder_rate: 0.3,
        }
    }
}

/// Links in flight, with seeded fault injection.
#[derive(Debug)]
pub struct NetworkSimulator {
    in_flight: VecDeque<Envelope>,
    lost: Vec<Envelope>,
    config: NetworkConfig,
    rng_state: u64,
}

impl NetworkSimulator {
    pub fn new(config: NetworkConfig) -> Self {
        Self::with_seed(config, 12345)
    }

    pub fn with_seed(config: NetworkConfig, seed: u64) -> Self {
        Self {
            in_flight: VecDeque::new(),
            lost: Vec::new(),
            config,
            rng_state: seed,
        }
    }

    /// Simple LCG random number generator
    fn next_random(&mut self) -> f64 {
        self.rng_state = self.rng_state.wrapping_mul(1103515245).wrapping_add(12345);
        ((self.rng_state >> 16) & 0x7fff) as f64 / 32768.0
    }

    pub fn send(&mut self, envelope: Envelope) {
        if self.next_random() < self.config.loss_rate {
            self.lost.push(envelope);
            return;
        }

        if self.next_random() < self.config.dup_rate {
            self.in_flight.push_back(envelope.clone());
        }

        self.in_flight.push_back(envelope);
        if self.next_random() < self.config.reorder_rate && self.in_flight.len() > 1 {
            let last = self.in_flight.len() - 1;
            let pos = ((self.next_random() * last as f64) as usize).min(last);
            self.in_flight.swap(pos, last);
        }
    }

    pub fn receive(&mut self) -> Option<Envelope> {
        self.in_flight.pop_front()
    }

    /// Re-send lost records (simulates link-level retransmission)
    pub fn retransmit_lost(&mut self) {
        for envelope in self.lost.drain(..) {
            self.in_flight.push_back(envelope);
        }
    }

    /// Drop everything in flight on the link between `a` and `b`.
    pub fn cut(&mut self, a: usize, b: usize) {
        let on_link = |e: &Envelope| (e.from == a && e.to == b) || (e.from == b && e.to == a);
        self.in_flight.retain(|e| !on_link(e));
        self.lost.retain(|e| !on_link(e));
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn lost_count(&self) -> usize {
        self.lost.len()
    }
}

/// One simulated participant.
#[derive(Debug)]
pub struct SimNode {
    pub engine: DeliveryEngine,
    pub log: ChatLog,
    /// Delivered ids, in delivery order.
    pub delivered: Vec<MessageId>,
    pub links: BTreeSet<usize>,
}

impl SimNode {
    fn new(id: NodeId) -> Self {
        Self {
            engine: DeliveryEngine::new(id),
            log: ChatLog::new(),
            delivered: Vec::new(),
            links: BTreeSet::new(),
        }
    }

    fn record(&mut self, messages: &[ChatMessage]) {
        for message in messages {
            self.log.deliver(message);
            self.delivered.push(message.message_id());
        }
    }

    /// Index of `id` in this node's delivery order.
    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.delivered.iter().position(|d| d == id)
    }
}

/// A cluster of engines joined by a simulated flood network
#[derive(Debug)]
pub struct FloodCluster {
    nodes: Vec<SimNode>,
    network: NetworkSimulator,
    transmissions: usize,
    sent: Vec<ChatMessage>,
}

impl FloodCluster {
    /// Create `n` nodes named `node_0 .. node_{n-1}`.
    pub fn new(n: usize, topology: Topology, config: NetworkConfig) -> Self {
        let ids: Vec<String> = (0..n).map(|i| format!("node_{}", i)).collect();
        Self::with_ids(&ids, topology, NetworkSimulator::new(config))
    }

    pub fn with_ids<S: AsRef<str>>(ids: &[S], topology: Topology, network: NetworkSimulator) -> Self {
        let mut cluster = Self {
            nodes: ids
                .iter()
                .map(|id| SimNode::new(NodeId::new(id.as_ref())))
                .collect(),
            network,
            transmissions: 0,
            sent: Vec::new(),
        };
        for (a, b) in topology.links(ids.len()) {
            cluster.connect(a, b);
        }
        cluster
    }

    pub fn node(&self, idx: usize) -> &SimNode {
        &self.nodes[idx]
    }

    pub fn engine(&self, idx: usize) -> &DeliveryEngine {
        &self.nodes[idx].engine
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Records put on links so far (duplicates from the network excluded).
    pub fn transmissions(&self) -> usize {
        self.transmissions
    }

    /// Every message submitted so far, in submit order.
    pub fn sent(&self) -> &[ChatMessage] {
        &self.sent
    }

    pub fn network(&self) -> &NetworkSimulator {
        &self.network
    }

    /// Open a link. Returns `false` if it already existed.
    pub fn connect(&mut self, a: usize, b: usize) -> bool {
        if a == b {
            return false;
        }
        let added = self.nodes[a].links.insert(b);
        self.nodes[b].links.insert(a);
        added
    }

    /// Close a link and drop whatever was in flight on it.
    pub fn disconnect(&mut self, a: usize, b: usize) {
        self.nodes[a].links.remove(&b);
        self.nodes[b].links.remove(&a);
        self.network.cut(a, b);
    }

    /// Open a link and exchange causal context over it, as a joining node does.
    pub fn handshake(&mut self, a: usize, b: usize) {
        self.connect(a, b);
        for (from, to) in [(a, b), (b, a)] {
            let clock = self.nodes[from].engine.causal_context();
            self.send(from, to, WireRecord::Context { clock });
        }
    }

    /// Submit a message at `idx` and flood it to all of its links.
    pub fn submit(&mut self, idx: usize, body: impl Into<String>) -> ChatMessage {
        let submitted = self.nodes[idx].engine.submit(body);
        self.nodes[idx].record(&submitted.delivered);
        self.flood(idx, None, &submitted.message);
        self.sent.push(submitted.message.clone());
        submitted.message
    }

    /// Hand `message` to `to` as if it arrived on the link from `from`.
    pub fn inject(&mut self, from: usize, to: usize, message: ChatMessage) -> Receipt {
        let receipt = self.nodes[to].engine.receive(message);
        if let Receipt::Accepted { forward, delivered } = &receipt {
            self.nodes[to].record(delivered);
            self.flood(to, Some(from), forward);
        }
        receipt
    }

    fn flood(&mut self, at: usize, except: Option<usize>, message: &ChatMessage) {
        let targets: Vec<usize> = self.nodes[at]
            .links
            .iter()
            .copied()
            .filter(|&l| Some(l) != except)
            .collect();
        for to in targets {
            self.send(at, to, WireRecord::Chat(message.clone()));
        }
    }

    fn send(&mut self, from: usize, to: usize, record: WireRecord) {
        self.transmissions += 1;
        self.network.send(Envelope { from, to, record });
    }

    /// Process one record in flight
    pub fn process_one(&mut self) -> bool {
        let Some(envelope) = self.network.receive() else {
            return false;
        };

        // The link may have closed while the record was in flight.
        if !self.nodes[envelope.to].links.contains(&envelope.from) {
            return true;
        }

        match envelope.record {
            WireRecord::Chat(message) => {
                self.inject(envelope.from, envelope.to, message);
            }
            WireRecord::Context { clock } => {
                let node = &mut self.nodes[envelope.to];
                let delivered = node.engine.merge_context(&clock);
                node.record(&delivered);
            }
        }
        true
    }

    /// Run until the network is empty
    pub fn drain_network(&mut self) {
        while self.process_one() {}
    }

    /// Retransmit lost records and process
    pub fn retransmit_and_process(&mut self) {
        self.network.retransmit_lost();
        self.drain_network();
    }

    /// Messages buffered across all nodes.
    pub fn total_pending(&self) -> usize {
        self.nodes.iter().map(|n| n.engine.buffer().len()).sum()
    }

    /// Every node delivered the same set of messages and nothing is buffered.
    pub fn is_converged(&self) -> bool {
        let Some(first) = self.nodes.first() else {
            return true;
        };
        let expected: BTreeSet<&MessageId> = first.delivered.iter().collect();
        self.nodes.iter().all(|n| {
            n.engine.buffer().is_empty()
                && n.delivered.len() == expected.len()
                && n.delivered.iter().collect::<BTreeSet<_>>() == expected
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_links() {
        assert_eq!(Topology::FullMesh.links(3), vec![(0, 1), (0, 2), (1, 2)]);
        assert_eq!(Topology::Line.links(3), vec![(0, 1), (1, 2)]);
        assert_eq!(Topology::Ring.links(3), vec![(0, 1), (1, 2), (2, 0)]);
        assert_eq!(Topology::Ring.links(2), vec![(0, 1)]);
        assert_eq!(
            Topology::Custom(vec![(0, 0), (0, 5), (1, 0)]).links(2),
            vec![(1, 0)]
        );
    }

    #[test]
    fn test_network_simulator_basic() {
        let mut net = NetworkSimulator::new(NetworkConfig::default());
        let msg = ChatMessage::new(NodeId::new("a"), 1, "hi", &Default::default());
        net.send(Envelope {
            from: 0,
            to: 1,
            record: WireRecord::Chat(msg.clone()),
        });

        assert_eq!(net.in_flight_count(), 1);
        let envelope = net.receive().unwrap();
        assert_eq!(envelope.record, WireRecord::Chat(msg));
        assert!(net.is_empty());
    }

    #[test]
    fn test_full_mesh_broadcast() {
        let mut cluster = FloodCluster::new(3, Topology::FullMesh, NetworkConfig::default());
        let sent = cluster.submit(0, "hello");
        cluster.drain_network();

        for i in 0..3 {
            assert_eq!(cluster.node(i).delivered, vec![sent.message_id()]);
            assert_eq!(cluster.engine(i).dedup().len(), 1);
        }
        // 2 initial sends, then each receiver forwards to its one other link.
        assert_eq!(cluster.transmissions(), 4);
        assert!(cluster.is_converged());
    }

    #[test]
    fn test_line_relays_through_middle() {
        let mut cluster = FloodCluster::new(3, Topology::Line, NetworkConfig::default());
        cluster.submit(0, "over the hill");
        cluster.drain_network();

        assert_eq!(cluster.node(2).log.len(), 1);
        assert!(cluster.node(2).log.entries()[0].ends_with(": over the hill"));
        assert!(cluster.is_converged());
    }

    #[test]
    fn test_disconnect_drops_in_flight() {
        let mut cluster = FloodCluster::new(2, Topology::Line, NetworkConfig::default());
        cluster.submit(0, "lost");
        cluster.disconnect(0, 1);
        cluster.drain_network();

        assert!(cluster.node(1).delivered.is_empty());
        assert!(!cluster.is_converged());
    }
}
