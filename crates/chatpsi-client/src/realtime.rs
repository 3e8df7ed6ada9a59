//! Websocket implementation of the realtime notifier.
//!
//! `subscribe` connects to the gateway's `/realtime` endpoint and waits for
//! the `subscribed` frame before returning.  A background task then forwards
//! `insert` frames into the [`Subscription`] until either side goes away;
//! dropping the subscription closes the socket.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use chatpsi_shared::protocol::RealtimeFrame;
use chatpsi_shared::ThreadId;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::seams::{RealtimeEvent, RealtimeNotifier, Subscription};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 64;

pub struct WsNotifier {
    realtime_url: String,
    access_token: Option<String>,
}

impl WsNotifier {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            realtime_url: config.realtime_url.clone(),
            access_token: config.access_token.clone(),
        }
    }

    fn endpoint(&self) -> String {
        match &self.access_token {
            Some(token) => format!("{}?access_token={}", self.realtime_url, token),
            None => self.realtime_url.clone(),
        }
    }
}

#[async_trait]
impl RealtimeNotifier for WsNotifier {
    async fn subscribe(&self, thread: ThreadId) -> Result<Subscription, ClientError> {
        let (mut socket, _) = connect_async(self.endpoint()).await?;
        await_subscribed(&mut socket, thread).await?;
        info!(thread = %thread, "Realtime subscription established");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        tokio::spawn(pump(socket, thread, tx, stop_rx));

        Ok(Subscription::new(rx, move || {
            let _ = stop_tx.send(());
        }))
    }
}

async fn await_subscribed(socket: &mut Socket, thread: ThreadId) -> Result<(), ClientError> {
    loop {
        match socket.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return match serde_json::from_str::<RealtimeFrame>(text.as_str()) {
                    Ok(RealtimeFrame::Subscribed { thread_id }) if thread_id == thread => Ok(()),
                    Ok(RealtimeFrame::Error { reason }) => Err(ClientError::Transport(reason)),
                    Ok(other) => Err(ClientError::Decode(format!(
                        "unexpected frame before subscription: {other:?}"
                    ))),
                    Err(e) => Err(ClientError::Decode(e.to_string())),
                };
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(ClientError::Transport("closed during subscribe".into()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn pump(
    mut socket: Socket,
    thread: ThreadId,
    tx: mpsc::Sender<RealtimeEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                let _ = socket.close(None).await;
                debug!(thread = %thread, "Realtime subscription released");
                return;
            }
            frame = socket.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<RealtimeFrame>(text.as_str()) {
                        Ok(RealtimeFrame::Insert { message }) => {
                            if message.thread_id != thread {
                                warn!(thread = %thread, other = %message.thread_id, "Insert for another thread dropped");
                                continue;
                            }
                            if tx.send(RealtimeEvent::Insert(message)).await.is_err() {
                                return;
                            }
                        }
                        Ok(RealtimeFrame::Error { reason }) => {
                            warn!(thread = %thread, reason = %reason, "Realtime channel error");
                            let _ = tx.send(RealtimeEvent::Error(reason)).await;
                            return;
                        }
                        Ok(RealtimeFrame::Subscribed { .. }) => {}
                        Err(e) => warn!(error = %e, "Undecodable realtime frame"),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(thread = %thread, "Realtime socket closed by server");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(thread = %thread, error = %e, "Realtime socket failed");
                    return;
                }
            }
        }
    }
}
