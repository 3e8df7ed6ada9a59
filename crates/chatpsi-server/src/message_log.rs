//! The gateway's view of the Message Store: every insert is also published
//! to realtime subscribers of the thread.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use chatpsi_shared::{Message, MessageId, ThreadId, UserId};
use chatpsi_store::{Database, NewWebhookEvent, Profile, Result};

use crate::realtime::RealtimeHub;

#[derive(Clone)]
pub struct MessageLog {
    db: Arc<Mutex<Database>>,
    hub: RealtimeHub,
}

impl MessageLog {
    pub fn new(db: Database, hub: RealtimeHub) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            hub,
        }
    }

    pub fn hub(&self) -> &RealtimeHub {
        &self.hub
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist a message, then notify subscribers of its thread.
    pub fn append(&self, message: &Message) -> Result<()> {
        self.db().insert_message(message)?;
        let delivered = self.hub.publish(message);
        debug!(
            msg_id = %message.id,
            thread = %message.thread_id,
            sender = message.sender.as_str(),
            delivered,
            "Message appended"
        );
        Ok(())
    }

    pub fn thread(&self, thread: ThreadId) -> Result<Vec<Message>> {
        self.db().messages_for_thread(thread)
    }

    pub fn soft_delete(&self, id: MessageId) -> Result<bool> {
        self.db().soft_delete_message(id)
    }

    pub fn profile(&self, user: UserId) -> Result<Option<Profile>> {
        self.db().get_profile(user)
    }

    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.db().upsert_profile(profile)
    }

    /// Audit trail writes never fail the request.
    pub fn audit(&self, event: NewWebhookEvent) {
        if let Err(e) = self.db().record_webhook_event(&event) {
            warn!(error = %e, "Failed to record webhook event");
        }
    }
}
