//! Realtime Notifier: pushes newly inserted messages to subscribers of a
//! thread over a websocket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use chatpsi_shared::protocol::RealtimeFrame;
use chatpsi_shared::{Message, ThreadId};

use crate::api::AppState;
use crate::auth::actor_from_bearer;
use crate::error::ServerError;

/// One broadcast channel per thread with at least one live subscriber.
#[derive(Clone)]
pub struct RealtimeHub {
    channels: Arc<Mutex<HashMap<ThreadId, broadcast::Sender<Message>>>>,
    capacity: usize,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    pub fn subscribe(&self, thread: ThreadId) -> broadcast::Receiver<Message> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        // Drop channels whose subscribers vanished without unsubscribing.
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(thread)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Notify every subscriber of `message.thread_id`.  Returns how many
    /// receivers got it.
    pub fn publish(&self, message: &Message) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = channels.get(&message.thread_id) else {
            return 0;
        };
        match tx.send(message.clone()) {
            Ok(n) => n,
            Err(_) => {
                // last subscriber went away
                channels.remove(&message.thread_id);
                0
            }
        }
    }

    /// Release `rx` and forget the thread's channel once nobody listens.
    pub fn unsubscribe(&self, thread: ThreadId, rx: broadcast::Receiver<Message>) {
        drop(rx);
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if channels
            .get(&thread)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(&thread);
        }
    }

    /// Threads that currently hold a channel.
    pub fn active_threads(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn subscriber_count(&self, thread: ThreadId) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&thread)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    access_token: String,
}

/// `GET /realtime?access_token=...`
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
) -> Result<Response, ServerError> {
    let actor = actor_from_bearer(&query.access_token, &state.config)?;
    let thread = actor.user_id.thread();

    // Subscribe before the upgrade completes so nothing inserted after the
    // `subscribed` frame can be missed.
    let rx = state.log.hub().subscribe(thread);
    debug!(
        thread = %thread,
        subscribers = state.log.hub().subscriber_count(thread),
        "Realtime upgrade accepted"
    );
    let hub = state.log.hub().clone();
    Ok(ws.on_upgrade(move |socket| async move {
        let rx = handle_socket(socket, thread, rx).await;
        hub.unsubscribe(thread, rx);
        debug!(thread = %thread, "Realtime subscriber disconnected");
    }))
}

/// Forward inserts until either side goes away, then hand the receiver back.
async fn handle_socket(
    socket: WebSocket,
    thread: ThreadId,
    mut rx: broadcast::Receiver<Message>,
) -> broadcast::Receiver<Message> {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    if send_frame(&mut ws_sender, &RealtimeFrame::Subscribed { thread_id: thread })
        .await
        .is_err()
    {
        return rx;
    }
    info!(thread = %thread, "Realtime subscriber connected");

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(message) => {
                    let frame = RealtimeFrame::Insert { message };
                    if send_frame(&mut ws_sender, &frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(thread = %thread, skipped, "Realtime subscriber lagged, closing");
                    let frame = RealtimeFrame::Error {
                        reason: format!("lagged behind by {skipped} messages"),
                    };
                    let _ = send_frame(&mut ws_sender, &frame).await;
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            },
        }
    }

    rx
}

async fn send_frame<S>(sender: &mut S, frame: &RealtimeFrame) -> Result<(), ()>
where
    S: Sink<WsMessage> + Unpin,
{
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    sender
        .send(WsMessage::Text(text.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatpsi_shared::{MessageBody, Sender, UserId};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_reaches_thread_subscribers_only() {
        let hub = RealtimeHub::new(8);
        let alice = UserId(Uuid::new_v4());
        let bob = UserId(Uuid::new_v4());

        let mut alice_rx = hub.subscribe(alice.thread());
        let mut bob_rx = hub.subscribe(bob.thread());

        let msg = Message::new(alice, Sender::Assistant, MessageBody::text("hi"));
        assert_eq!(hub.publish(&msg), 1);

        assert_eq!(alice_rx.recv().await.unwrap(), msg);
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = RealtimeHub::new(8);
        let alice = UserId(Uuid::new_v4());

        let rx = hub.subscribe(alice.thread());
        assert_eq!(hub.subscriber_count(alice.thread()), 1);
        drop(rx);

        let msg = Message::new(alice, Sender::User, MessageBody::text("hello"));
        assert_eq!(hub.publish(&msg), 0);
        assert_eq!(hub.subscriber_count(alice.thread()), 0);
    }

    #[test]
    fn test_unsubscribe_forgets_idle_thread() {
        let hub = RealtimeHub::new(8);
        let alice = UserId(Uuid::new_v4()).thread();

        let first = hub.subscribe(alice);
        let second = hub.subscribe(alice);
        hub.unsubscribe(alice, first);
        assert_eq!(hub.active_threads(), 1);
        assert_eq!(hub.subscriber_count(alice), 1);

        hub.unsubscribe(alice, second);
        assert_eq!(hub.active_threads(), 0);
    }

    #[test]
    fn test_subscribe_prunes_abandoned_channels() {
        let hub = RealtimeHub::new(8);
        let alice = UserId(Uuid::new_v4()).thread();
        let bob = UserId(Uuid::new_v4()).thread();

        // Connected once, never received an insert.
        drop(hub.subscribe(alice));
        assert_eq!(hub.active_threads(), 1);

        let _bob_rx = hub.subscribe(bob);
        assert_eq!(hub.active_threads(), 1);
        assert_eq!(hub.subscriber_count(alice), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let hub = RealtimeHub::new(2);
        let alice = UserId(Uuid::new_v4());
        let mut rx = hub.subscribe(alice.thread());

        for i in 0..4 {
            hub.publish(&Message::new(
                alice,
                Sender::Assistant,
                MessageBody::text(format!("m{i}")),
            ));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
    }
}
