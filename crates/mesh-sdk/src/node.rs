//! The chat node actor.
//!
//! Each [`ChatNode`] is a handle to one tokio task that owns a
//! [`DeliveryEngine`] and a [`LinkMultiplexer`]. Everything that touches the
//! engine (local submissions, frames from any link, link changes, stall
//! checks) goes through that task, so engine state is never shared.

use crate::config::NodeConfig;
use crate::error::{Result, SdkError};
use crate::multiplexer::LinkMultiplexer;
use crate::network::{LinkEvent, LinkId, LinkTransport};
use mesh_core::{ChatMessage, MessageId, NodeId, VectorClock, WireRecord};
use mesh_delivery::{ApplicationSink, BufferReport, ChatLog, DeliveryEngine, Receipt, Submitted};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

/// Events emitted by a node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    /// A message was handed to the application.
    Delivered { id: MessageId, entry: String },
    /// A new message is waiting for its predecessors.
    Buffered { id: MessageId, pending: usize },
    LinkOpened(LinkId),
    LinkClosed(LinkId),
    /// The oldest buffered message has waited past the stall threshold.
    /// `waiting` lists every message past the threshold, oldest first.
    Stalled {
        pending: usize,
        oldest_age: Duration,
        waiting: Vec<MessageId>,
    },
}

/// Snapshot of a running node.
#[derive(Clone, Debug)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub links: Vec<LinkId>,
    pub buffer: BufferReport,
}

impl NodeReport {
    pub fn clock(&self) -> &VectorClock {
        &self.buffer.clock
    }
}

enum Command {
    Submit {
        body: String,
        reply: oneshot::Sender<ChatMessage>,
    },
    Report {
        reply: oneshot::Sender<NodeReport>,
    },
    Compact {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Handle to a running chat node.
///
/// # Example
///
/// ```rust
/// use mesh_sdk::{ChatNode, MemoryTransport, NodeConfigBuilder};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let a = Arc::new(MemoryTransport::new("alice"));
/// let b = Arc::new(MemoryTransport::new("bob"));
/// a.connect_to(&b);
///
/// let alice = ChatNode::spawn(NodeConfigBuilder::new().node_id("alice").build(), a).unwrap();
/// let bob = ChatNode::spawn(NodeConfigBuilder::new().node_id("bob").build(), b).unwrap();
///
/// alice.submit("hi bob").await.unwrap();
/// bob.wait_for_entries(1, std::time::Duration::from_secs(5)).await.unwrap();
/// assert_eq!(bob.chat_log().position_of("hi bob"), Some(0));
/// # });
/// ```
pub struct ChatNode {
    id: NodeId,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<NodeEvent>,
    log: ChatLog,
    task: JoinHandle<()>,
}

impl ChatNode {
    /// Start a node on `transport`. Must be called inside a tokio runtime.
    pub fn spawn<T: LinkTransport>(config: NodeConfig, transport: Arc<T>) -> Result<Self> {
        config.validate()?;
        let id = config.node_id.clone().unwrap_or_else(NodeId::generate);
        let inbound = transport.subscribe()?;

        let (commands, mailbox) = mpsc::channel(config.mailbox_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        let log = ChatLog::new();

        let actor = NodeActor {
            engine: DeliveryEngine::new(id.clone()),
            mux: LinkMultiplexer::new(transport),
            log: log.clone(),
            events: events.clone(),
            config,
            stall_reported: false,
        };
        let span = info_span!("node", id = %id);
        let task = tokio::spawn(actor.run(mailbox, inbound).instrument(span));

        Ok(Self {
            id,
            commands,
            events,
            log,
            task,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Delivered entries, in delivery order.
    pub fn chat_log(&self) -> &ChatLog {
        &self.log
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Send a new message to the group. Returns it once it has been
    /// delivered locally and handed to every open link.
    pub async fn submit(&self, body: impl Into<String>) -> Result<ChatMessage> {
        let body = body.into();
        self.request(|reply| Command::Submit { body, reply }).await
    }

    pub async fn report(&self) -> Result<NodeReport> {
        self.request(|reply| Command::Report { reply }).await
    }

    /// Compact the dedup set now. Returns the number of ids dropped.
    pub async fn compact(&self) -> Result<usize> {
        self.request(|reply| Command::Compact { reply }).await
    }

    /// Wait until the chat log holds at least `count` entries.
    pub async fn wait_for_entries(&self, count: usize, within: Duration) -> Result<()> {
        let mut events = self.subscribe();
        let wait = async {
            while self.log.len() < count {
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Err(self.stopped()),
                }
            }
            Ok(())
        };

        time::timeout(within, wait)
            .await
            .map_err(|_| SdkError::Timeout(within))?
    }

    /// Stop the node task and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        // A closed mailbox means the task already ended.
        let _ = self.commands.send(Command::Shutdown).await;
        self.task
            .await
            .map_err(|e| SdkError::TaskFailed(e.to_string()))
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> SdkError {
        SdkError::NodeStopped(self.id.to_string())
    }
}

struct NodeActor<T: LinkTransport> {
    engine: DeliveryEngine,
    mux: LinkMultiplexer<T>,
    log: ChatLog,
    events: broadcast::Sender<NodeEvent>,
    config: NodeConfig,
    stall_reported: bool,
}

impl<T: LinkTransport> NodeActor<T> {
    async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<Command>,
        mut inbound: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        info!("node started");
        let mut stall_check = time::interval(self.config.stall_check_interval());
        stall_check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut links_live = true;

        loop {
            // Link events first: a link opened before a submit must carry it.
            tokio::select! {
                biased;

                event = inbound.recv(), if links_live => match event {
                    Some(event) => self.handle_link_event(event).await,
                    None => {
                        warn!("transport closed its event stream");
                        links_live = false;
                    }
                },
                command = mailbox.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                _ = stall_check.tick() => self.check_stall(),
            }
        }

        let stats = self.engine.stats();
        info!(
            delivered = stats.delivered,
            duplicates = stats.duplicates,
            pending = self.engine.buffer().len(),
            "node stopped"
        );
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { body, reply } => {
                let Submitted { message, delivered } = self.engine.submit(body);
                self.deliver(delivered);
                self.broadcast(&message, None).await;
                let _ = reply.send(message);
            }
            Command::Report { reply } => {
                let _ = reply.send(NodeReport {
                    node_id: self.engine.local_id().clone(),
                    links: self.mux.links().cloned().collect(),
                    buffer: self.engine.report(Instant::now()),
                });
            }
            Command::Compact { reply } => {
                let _ = reply.send(self.engine.compact());
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened(link) => {
                if self.mux.link_opened(link.clone()) {
                    self.on_new_link(link).await;
                }
            }
            LinkEvent::Closed(link) => {
                if self.mux.link_closed(&link) {
                    info!(link = %link, "link closed");
                    let _ = self.events.send(NodeEvent::LinkClosed(link));
                }
            }
            LinkEvent::Frame(link, frame) => {
                if self.mux.note_inbound(&link) {
                    self.on_new_link(link.clone()).await;
                }
                let Some(record) = self.mux.decode(&link, &frame) else {
                    return;
                };
                match record {
                    WireRecord::Chat(message) => self.handle_chat(link, message).await,
                    WireRecord::Context { clock } => {
                        debug!(link = %link, clock = %clock, "received causal context");
                        let delivered = self.engine.merge_context(&clock);
                        self.deliver(delivered);
                    }
                }
            }
        }
    }

    async fn on_new_link(&mut self, link: LinkId) {
        info!(link = %link, "link opened");
        let _ = self.events.send(NodeEvent::LinkOpened(link.clone()));

        if self.config.send_causal_context {
            let context = WireRecord::Context {
                clock: self.engine.causal_context(),
            };
            if let Err(e) = self.mux.send_to(&link, &context).await {
                warn!(link = %link, error = %e, "failed to send causal context");
            }
        }
    }

    async fn handle_chat(&mut self, link: LinkId, message: ChatMessage) {
        let id = message.message_id();
        match self.engine.receive(message) {
            Receipt::Duplicate => {}
            Receipt::Accepted { forward, delivered } => {
                self.broadcast(&forward, Some(&link)).await;
                if !delivered.iter().any(|m| m.message_id() == id) {
                    let pending = self.engine.buffer().len();
                    let _ = self.events.send(NodeEvent::Buffered { id, pending });
                }
                self.deliver(delivered);
            }
        }
    }

    async fn broadcast(&self, message: &ChatMessage, exclude: Option<&LinkId>) {
        let record = WireRecord::Chat(message.clone());
        match self.mux.broadcast(&record, exclude).await {
            Ok(links) => debug!(message = %message.message_id(), links, "flooded message"),
            Err(e) => warn!(message = %message.message_id(), error = %e, "failed to flood message"),
        }
    }

    fn deliver(&mut self, messages: Vec<ChatMessage>) {
        if messages.is_empty() {
            return;
        }

        for message in &messages {
            let entry = message.format_entry();
            self.log.on_delivered(entry.clone());
            let _ = self.events.send(NodeEvent::Delivered {
                id: message.message_id(),
                entry,
            });
        }

        if self.config.compact_dedup {
            self.engine.compact();
        }
    }

    fn check_stall(&mut self) {
        let now = Instant::now();
        let threshold = self.config.stall_threshold();
        let report = self.engine.report(now);
        if !report.is_stalled(threshold) {
            self.stall_reported = false;
            return;
        }
        if self.stall_reported {
            return;
        }

        let oldest_age = report.oldest_age.unwrap_or_default();
        let waiting = self.engine.buffer().stalled(now, threshold);
        let ids: Vec<String> = waiting.iter().map(ToString::to_string).collect();
        warn!(
            pending = report.pending,
            oldest_age_ms = oldest_age.as_millis() as u64,
            waiting = %ids.join(", "),
            "delivery stalled: buffered messages are missing predecessors"
        );
        let _ = self.events.send(NodeEvent::Stalled {
            pending: report.pending,
            oldest_age,
            waiting,
        });
        self.stall_reported = true;
    }
}
