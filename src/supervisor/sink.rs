//! Event sinks and the subscription interface.

use tokio::sync::{broadcast, mpsc};

use crate::worker::{Channel, SupervisorEvent};

/// Default capacity for the projection broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Destination for supervisor events.
pub trait EventSink: Send + Sync {
    /// Publish an event. Must not block.
    fn emit(&self, event: SupervisorEvent);
}

impl EventSink for mpsc::UnboundedSender<SupervisorEvent> {
    fn emit(&self, event: SupervisorEvent) {
        if self.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

impl EventSink for broadcast::Sender<SupervisorEvent> {
    fn emit(&self, event: SupervisorEvent) {
        // No subscribers is not an error
        let _ = self.send(event);
    }
}

/// Fan-out sink feeding the workflow and any number of projections.
///
/// The workflow gets a lossless, ordered queue; projections share a bounded
/// broadcast channel and may observe lag under load.
#[derive(Debug, Clone)]
pub struct EventBus {
    workflow_tx: mpsc::UnboundedSender<SupervisorEvent>,
    broadcast_tx: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    /// Create a bus and the workflow's receiving end.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (workflow_tx, workflow_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(capacity);
        (
            Self {
                workflow_tx,
                broadcast_tx,
            },
            workflow_rx,
        )
    }

    /// Subscribe to every channel.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.broadcast_tx.subscribe(),
            channels: None,
        }
    }

    /// Subscribe to a subset of channels.
    #[must_use]
    pub fn subscribe_to(&self, channels: &[Channel]) -> EventSubscription {
        EventSubscription {
            rx: self.broadcast_tx.subscribe(),
            channels: Some(channels.to_vec()),
        }
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: SupervisorEvent) {
        self.broadcast_tx.emit(event.clone());
        self.workflow_tx.emit(event);
    }
}

/// Receiving end for a projection.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<SupervisorEvent>,
    channels: Option<Vec<Channel>>,
}

impl EventSubscription {
    /// Receive the next event on a subscribed channel.
    ///
    /// Returns `None` once the bus has been dropped. Lagged events are
    /// skipped with a warning.
    pub async fn recv(&mut self) -> Option<SupervisorEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.wants(event.channel()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Projection lagged behind event stream");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn wants(&self, channel: Channel) -> bool {
        self.channels
            .as_ref()
            .map_or(true, |channels| channels.contains(&channel))
    }
}
