//! Shortcuts for standing up in-memory meshes.

use crate::config::NodeConfig;
use crate::error::Result;
use crate::network::{create_topology, LinkTransport, MemoryTransport};
use crate::node::ChatNode;
use mesh_delivery::Topology;
use std::sync::Arc;

/// A set of nodes wired over memory transports.
///
/// Transports are kept so links can be cut and restored while the nodes run.
pub struct MemoryMesh {
    pub nodes: Vec<ChatNode>,
    pub transports: Vec<Arc<MemoryTransport>>,
}

impl MemoryMesh {
    pub fn node(&self, idx: usize) -> &ChatNode {
        &self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Open a link between two nodes. Returns `false` if already linked.
    pub fn connect(&self, a: usize, b: usize) -> bool {
        self.transports[a].connect_to(&self.transports[b])
    }

    /// Close the link between two nodes. Returns `false` if not linked.
    pub fn disconnect(&self, a: usize, b: usize) -> bool {
        self.transports[a].disconnect_from(&self.transports[b])
    }

    /// Stop every node.
    pub async fn shutdown(self) -> Result<()> {
        for node in self.nodes {
            node.shutdown().await?;
        }
        Ok(())
    }
}

/// Spawn one node per id, linked according to `topology`.
///
/// Each node's id is its transport id; every other field comes from `base`.
pub fn spawn_mesh<S: AsRef<str>>(
    ids: &[S],
    topology: &Topology,
    base: NodeConfig,
) -> Result<MemoryMesh> {
    let transports: Vec<_> = create_topology(ids, topology)
        .into_iter()
        .map(Arc::new)
        .collect();

    let nodes = transports
        .iter()
        .map(|transport| {
            let config = NodeConfig {
                node_id: Some(transport.local_id().as_str().into()),
                ..base.clone()
            };
            ChatNode::spawn(config, transport.clone())
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(MemoryMesh { nodes, transports })
}
