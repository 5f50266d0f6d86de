//! Link transport abstractions for mesh nodes.
//!
//! A transport moves opaque frames over point-to-point links and reports
//! links opening and closing. It knows nothing about chat records; encoding
//! and fan-out live in [`crate::multiplexer`].

use crate::error::LinkError;
use async_trait::async_trait;
use mesh_delivery::Topology;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Opaque identifier for one point-to-point link.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub String);

impl LinkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that happened on a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Opened(LinkId),
    Closed(LinkId),
    /// One encoded record received on the link.
    Frame(LinkId, Vec<u8>),
}

/// Abstract link transport.
#[async_trait]
pub trait LinkTransport: Send + Sync + 'static {
    /// Address of this end of every link.
    fn local_id(&self) -> &LinkId;

    /// Send one frame on a specific link.
    async fn send_to(&self, link: &LinkId, frame: Vec<u8>) -> Result<(), LinkError>;

    /// Links currently open.
    async fn open_links(&self) -> Vec<LinkId>;

    /// Take the stream of link events. Only one subscriber is allowed.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<LinkEvent>, LinkError>;
}

type Inbox = mpsc::UnboundedSender<LinkEvent>;
type SharedEventReceiver = Arc<Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>>;
type SharedLinks = Arc<RwLock<HashMap<LinkId, Inbox>>>;

/// In-memory transport for tests, demos and the stress binary.
///
/// Inboxes are unbounded: a flood can make two nodes forward to each other
/// at the same time, and bounded inboxes would let both block forever.
#[derive(Clone)]
pub struct MemoryTransport {
    local_id: LinkId,
    inbox: Inbox,
    events: SharedEventReceiver,
    links: SharedLinks,
}

impl MemoryTransport {
    pub fn new(local_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            local_id: LinkId::new(local_id),
            inbox: tx,
            events: Arc::new(Mutex::new(Some(rx))),
            links: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a link between two memory transports.
    ///
    /// Both ends see `Opened` before any frame sent on the link. Returns
    /// `false` if the link was already open.
    pub fn connect_to(&self, other: &MemoryTransport) -> bool {
        if self.local_id == other.local_id || self.links.read().contains_key(&other.local_id) {
            return false;
        }

        self.links
            .write()
            .insert(other.local_id.clone(), other.inbox.clone());
        other
            .links
            .write()
            .insert(self.local_id.clone(), self.inbox.clone());

        let _ = self.inbox.send(LinkEvent::Opened(other.local_id.clone()));
        let _ = other.inbox.send(LinkEvent::Opened(self.local_id.clone()));
        true
    }

    /// Close the link between two memory transports.
    ///
    /// Frames already sent on the link are still delivered, ahead of the
    /// `Closed` event. Returns `false` if there was no such link.
    pub fn disconnect_from(&self, other: &MemoryTransport) -> bool {
        let ours = self.links.write().remove(&other.local_id);
        let theirs = other.links.write().remove(&self.local_id);
        if ours.is_none() && theirs.is_none() {
            return false;
        }

        let _ = self.inbox.send(LinkEvent::Closed(other.local_id.clone()));
        let _ = other.inbox.send(LinkEvent::Closed(self.local_id.clone()));
        true
    }

    pub fn is_linked_to(&self, other: &LinkId) -> bool {
        self.links.read().contains_key(other)
    }
}

#[async_trait]
impl LinkTransport for MemoryTransport {
    fn local_id(&self) -> &LinkId {
        &self.local_id
    }

    async fn send_to(&self, link: &LinkId, frame: Vec<u8>) -> Result<(), LinkError> {
        let tx = {
            let links = self.links.read();
            links.get(link).cloned()
        };

        match tx {
            Some(tx) => tx
                .send(LinkEvent::Frame(self.local_id.clone(), frame))
                .map_err(|e| LinkError::SendFailed(format!("{}: {}", link, e))),
            None => Err(LinkError::LinkNotFound(link.to_string())),
        }
    }

    async fn open_links(&self) -> Vec<LinkId> {
        let mut links: Vec<_> = self.links.read().keys().cloned().collect();
        links.sort();
        links
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<LinkEvent>, LinkError> {
        self.events.lock().take().ok_or(LinkError::AlreadySubscribed)
    }
}

/// Create memory transports named `ids`, linked according to `topology`.
pub fn create_topology<S: AsRef<str>>(ids: &[S], topology: &Topology) -> Vec<MemoryTransport> {
    let transports: Vec<_> = ids
        .iter()
        .map(|id| MemoryTransport::new(id.as_ref()))
        .collect();

    for (a, b) in topology.links(transports.len()) {
        transports[a].connect_to(&transports[b]);
    }

    transports
}

/// Create a fully connected network of `count` memory transports.
pub fn create_network(count: usize) -> Vec<MemoryTransport> {
    let ids: Vec<_> = (0..count).map(|i| format!("peer-{}", i)).collect();
    create_topology(&ids, &Topology::FullMesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_transport() {
        let a = MemoryTransport::new("a");
        let b = MemoryTransport::new("b");
        let mut b_events = b.subscribe().unwrap();

        assert!(a.connect_to(&b));
        assert!(!b.connect_to(&a));

        assert_eq!(a.open_links().await, vec![LinkId::new("b")]);
        assert_eq!(b.open_links().await, vec![LinkId::new("a")]);

        a.send_to(&LinkId::new("b"), b"hi".to_vec()).await.unwrap();
        assert_eq!(b_events.recv().await, Some(LinkEvent::Opened(LinkId::new("a"))));
        assert_eq!(
            b_events.recv().await,
            Some(LinkEvent::Frame(LinkId::new("a"), b"hi".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_disconnect_delivers_pending_frames_first() {
        let a = MemoryTransport::new("a");
        let b = MemoryTransport::new("b");
        let mut b_events = b.subscribe().unwrap();

        a.connect_to(&b);
        a.send_to(&LinkId::new("b"), vec![1]).await.unwrap();
        assert!(a.disconnect_from(&b));
        assert!(!a.disconnect_from(&b));

        let events: Vec<_> = std::iter::from_fn(|| b_events.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                LinkEvent::Opened(LinkId::new("a")),
                LinkEvent::Frame(LinkId::new("a"), vec![1]),
                LinkEvent::Closed(LinkId::new("a")),
            ]
        );

        let err = a.send_to(&LinkId::new("b"), vec![2]).await.unwrap_err();
        assert!(matches!(err, LinkError::LinkNotFound(_)));
    }

    #[test]
    fn test_subscribe_once() {
        let a = MemoryTransport::new("a");
        assert!(a.subscribe().is_ok());
        assert!(matches!(a.subscribe(), Err(LinkError::AlreadySubscribed)));
    }

    #[tokio::test]
    async fn test_network_creation() {
        let network = create_network(3);
        assert_eq!(network.len(), 3);

        for transport in &network {
            assert_eq!(transport.open_links().await.len(), 2);
        }

        let line = create_topology(&["x", "y", "z"], &Topology::Line);
        assert!(line[0].is_linked_to(&LinkId::new("y")));
        assert!(!line[0].is_linked_to(&LinkId::new("z")));
    }
}
