//! WebSocket subscriber endpoint

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::api::AppState;
use crate::models::BroadcastPayload;
use crate::state::StateCache;

use super::hub::BroadcastHub;
use super::subscriber::{ChannelSubscriber, Outbound, Subscriber, SubscriberId};

/// Upgrade to a WebSocket and stream readings and alerts
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state.hub, state.cache, state.subscriber_buffer)
    })
}

/// Serve one connection
///
/// The connection is registered with the hub together with a snapshot of the
/// state cache. A writer task drains the subscriber queue into the socket
/// while this task reads (and ignores) client messages. The connection ends
/// when either the peer goes away or the writer stops, which happens on
/// shutdown and when the hub drops a lagging subscriber.
async fn handle_socket(
    socket: WebSocket,
    hub: Arc<BroadcastHub>,
    cache: Arc<StateCache>,
    buffer: usize,
) {
    let (subscriber, rx) = ChannelSubscriber::new(buffer);
    let id = subscriber.id();

    if let Err(e) = hub.register_with_snapshot(Arc::new(subscriber), || {
        BroadcastPayload::Snapshot(cache.list())
    }) {
        warn!(subscriber_id = %id, error = %e, "Could not send snapshot");
        return;
    }
    info!(subscriber_id = %id, "WebSocket connected");

    let (sink, mut stream) = socket.split();
    let mut send_task = tokio::spawn(write_outbound(rx, sink, id));

    let read_loop = async {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Pong(_)) => trace!(subscriber_id = %id, "Pong received"),
                Ok(_) => {}
                Err(e) => {
                    debug!(subscriber_id = %id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    };

    // Whichever side finishes first ends the connection; dropping the read
    // half together with the finished writer releases the socket.
    tokio::select! {
        _ = &mut send_task => debug!(subscriber_id = %id, "Writer finished"),
        _ = read_loop => {}
    }

    hub.unregister(&id);
    send_task.abort();
    info!(subscriber_id = %id, "WebSocket disconnected");
}

/// Drain a subscriber queue into `sink` until the connection should end
///
/// The queue ends either with an explicit [`Outbound::Close`] or because the
/// hub dropped the subscriber; both send a Close frame before returning.
pub(crate) async fn write_outbound<S>(
    mut rx: mpsc::Receiver<Outbound>,
    mut sink: S,
    id: SubscriberId,
) where
    S: Sink<Message> + Unpin,
{
    loop {
        let message = match rx.recv().await {
            Some(Outbound::Frame(frame)) => Message::Text(frame.to_string()),
            Some(Outbound::Ping) => Message::Ping(Vec::new()),
            Some(Outbound::Close) | None => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                return;
            }
        };
        if sink.send(message).await.is_err() {
            debug!(subscriber_id = %id, "WebSocket sink closed");
            return;
        }
    }
}
