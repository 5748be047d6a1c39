//! Live fan-out to connected observers
//!
//! The hub owns the subscriber registry. Each WebSocket connection is a
//! [`ChannelSubscriber`] whose bounded queue is drained by a per-connection
//! writer task.

mod heartbeat;
mod hub;
mod subscriber;
mod ws;

pub use heartbeat::start_heartbeat;
pub use hub::{BroadcastHub, PublishReport};
pub use subscriber::{ChannelSubscriber, Frame, Outbound, Subscriber, SubscriberId};
pub use ws::ws_handler;
