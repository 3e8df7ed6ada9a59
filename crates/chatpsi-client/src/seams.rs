//! Collaborators the session and uploader depend on.
//!
//! Production uses [`HttpBackend`](crate::backend::HttpBackend) and
//! [`WsNotifier`](crate::realtime::WsNotifier); tests plug in fakes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use chatpsi_shared::protocol::{DispatchRequest, DispatchResponse, ProfileResponse};
use chatpsi_shared::{Message, ThreadId};

use crate::error::ClientError;

/// Current actor's profile, including the entitlement flag.
#[async_trait]
pub trait EntitlementProvider: Send + Sync {
    async fn profile(&self) -> Result<ProfileResponse, ClientError>;
}

#[async_trait]
pub trait DispatchGateway: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, ClientError>;
}

/// Read side of the message store: the actor's thread, non-deleted, ordered.
#[async_trait]
pub trait MessageHistory: Send + Sync {
    async fn fetch_thread(&self) -> Result<Vec<Message>, ClientError>;
}

/// Resolves once the subscription is confirmed by the server.
#[async_trait]
pub trait RealtimeNotifier: Send + Sync {
    async fn subscribe(&self, thread: ThreadId) -> Result<Subscription, ClientError>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` under `path` and return its public URL.
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<String, ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    Insert(Message),
    /// The server gave up on this subscription.
    Error(String),
}

/// A live realtime subscription.  Dropping it unsubscribes.
pub struct Subscription {
    events: mpsc::Receiver<RealtimeEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<RealtimeEvent>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            events,
            release: Some(Box::new(release)),
        }
    }

    /// Next event; `None` once the channel is gone.
    pub async fn next(&mut self) -> Option<RealtimeEvent> {
        self.events.recv().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("released", &self.release.is_none())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.events.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Everything a [`ChatSession`](crate::session::ChatSession) talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub entitlement: Arc<dyn EntitlementProvider>,
    pub gateway: Arc<dyn DispatchGateway>,
    pub history: Arc<dyn MessageHistory>,
    pub notifier: Arc<dyn RealtimeNotifier>,
}

impl SessionDeps {
    /// One backend serving all HTTP-side collaborators.
    pub fn from_backend<B>(backend: Arc<B>, notifier: Arc<dyn RealtimeNotifier>) -> Self
    where
        B: EntitlementProvider + DispatchGateway + MessageHistory + 'static,
    {
        Self {
            entitlement: backend.clone(),
            gateway: backend.clone(),
            history: backend,
            notifier,
        }
    }
}
