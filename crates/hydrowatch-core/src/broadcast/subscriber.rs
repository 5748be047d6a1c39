//! Subscriber capability and the channel-backed implementation

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::error::DeliveryError;

/// Serialized payload shared by every subscriber of one publish
pub type Frame = Arc<str>;

/// Opaque subscriber handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Allocate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A live fan-out destination
///
/// `send` must not block: a destination that cannot take the frame right
/// now reports [`DeliveryError::Lagging`] and gets dropped by the hub.
pub trait Subscriber: Send + Sync {
    /// Stable handle used for unregistering
    fn id(&self) -> SubscriberId;

    /// Hand one frame to the destination
    fn send(&self, frame: Frame) -> Result<(), DeliveryError>;

    /// Keep-alive check
    fn ping(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Tell the destination it will receive nothing more
    fn close(&self);
}

/// What a [`ChannelSubscriber`] pushes to its connection task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized payload
    Frame(Frame),
    /// Heartbeat
    Ping,
    /// Final message; the connection should close
    Close,
}

/// Subscriber backed by a bounded queue drained by a connection task
#[derive(Debug)]
pub struct ChannelSubscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Outbound>,
}

impl ChannelSubscriber {
    /// Create a subscriber holding at most `capacity` undelivered messages
    ///
    /// The receiver goes to whatever task writes to the connection.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: SubscriberId::new(),
                tx,
            },
            rx,
        )
    }

    fn push(&self, message: Outbound) -> Result<(), DeliveryError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Lagging,
            TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

impl Subscriber for ChannelSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.push(Outbound::Frame(frame))
    }

    fn ping(&self) -> Result<(), DeliveryError> {
        self.push(Outbound::Ping)
    }

    fn close(&self) {
        // With a full queue the Close is lost; the connection task then sees
        // the queue end once the hub drops this sender.
        let _ = self.tx.try_send(Outbound::Close);
    }
}
