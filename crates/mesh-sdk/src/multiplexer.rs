//! Fan-out and fan-in of wire records over a set of links.

use crate::error::LinkError;
use crate::network::{LinkId, LinkTransport};
use mesh_core::WireRecord;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tracks open links and moves encoded [`WireRecord`]s over them.
///
/// Sends are fire-and-forget: a failure on one link is logged and never
/// stops the record from reaching the others.
pub struct LinkMultiplexer<T: LinkTransport> {
    transport: Arc<T>,
    open: BTreeSet<LinkId>,
}

impl<T: LinkTransport> LinkMultiplexer<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            open: BTreeSet::new(),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkId> {
        self.open.iter()
    }

    pub fn link_count(&self) -> usize {
        self.open.len()
    }

    pub fn is_open(&self, link: &LinkId) -> bool {
        self.open.contains(link)
    }

    /// Returns `false` if the link was already known.
    pub fn link_opened(&mut self, link: LinkId) -> bool {
        self.open.insert(link)
    }

    /// Returns `false` if the link was not open.
    pub fn link_closed(&mut self, link: &LinkId) -> bool {
        self.open.remove(link)
    }

    /// Record traffic from `link`, adopting it if it was never announced.
    ///
    /// Returns `true` when the link is new.
    pub fn note_inbound(&mut self, link: &LinkId) -> bool {
        if self.open.contains(link) {
            return false;
        }
        debug!(link = %link, "adopting link first seen through inbound traffic");
        self.open.insert(link.clone())
    }

    /// Decode a received frame. Malformed frames are logged and dropped.
    pub fn decode(&self, link: &LinkId, frame: &[u8]) -> Option<WireRecord> {
        match WireRecord::decode(frame) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(link = %link, bytes = frame.len(), error = %e, "dropping malformed record");
                None
            }
        }
    }

    /// Encode `record` and send it on one link.
    pub async fn send_to(&self, link: &LinkId, record: &WireRecord) -> Result<(), LinkError> {
        let frame = record.encode()?;
        self.transport.send_to(link, frame).await
    }

    /// Encode `record` once and send it on every open link except `exclude`.
    ///
    /// Returns the number of links the record was handed to.
    pub async fn broadcast(
        &self,
        record: &WireRecord,
        exclude: Option<&LinkId>,
    ) -> Result<usize, LinkError> {
        let frame = record.encode()?;
        let mut sent = 0;

        for link in self.open.iter().filter(|l| Some(*l) != exclude) {
            match self.transport.send_to(link, frame.clone()).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(link = %link, error = %e, "send failed"),
            }
        }

        Ok(sent)
    }
}
