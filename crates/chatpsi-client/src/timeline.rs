//! The ordered list of messages a session renders.
//!
//! Entries start either as optimistic local sends (keyed by their
//! [`ClientRef`]) or as server rows.  When the server row for a local send
//! shows up, by dispatch response, realtime push or re-fetch, it replaces the
//! placeholder in place: matched by `client_ref` first, then by same author
//! and same content.  A server id is never present twice.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use chatpsi_shared::{ClientRef, Message, MessageBody, MessageId, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    /// Not yet confirmed by the server.
    Local(ClientRef),
    Server(MessageId),
}

/// Client-only delivery state of an entry.  Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub id: EntryId,
    pub client_ref: Option<ClientRef>,
    pub sender: Sender,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    /// Arrival order, breaks `created_at` ties.
    seq: u64,
}

impl TimelineEntry {
    pub fn server_id(&self) -> Option<MessageId> {
        match self.id {
            EntryId::Server(id) => Some(id),
            EntryId::Local(_) => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.id, EntryId::Server(_))
    }

    pub fn content(&self) -> &str {
        self.body.content()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The server id was already present.
    Duplicate,
    /// A local placeholder was replaced by the server row.
    Reconciled,
    Inserted,
    /// Soft-deleted rows are never shown.
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    next_seq: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, client_ref: ClientRef) -> Option<&TimelineEntry> {
        self.entries
            .iter()
            .find(|e| e.client_ref == Some(client_ref))
    }

    /// Append an optimistic user message.
    pub fn push_local(&mut self, client_ref: ClientRef, body: MessageBody, created_at: DateTime<Utc>) {
        let seq = self.bump_seq();
        self.entries.push(TimelineEntry {
            id: EntryId::Local(client_ref),
            client_ref: Some(client_ref),
            sender: Sender::User,
            body,
            created_at,
            status: DeliveryStatus::Pending,
            seq,
        });
        self.sort();
    }

    /// Pending -> Sent.  Entries already marked failed stay failed.
    pub fn mark_sent(&mut self, client_ref: ClientRef) -> bool {
        match self.entry_by_ref(client_ref) {
            Some(entry) if entry.status == DeliveryStatus::Pending => {
                entry.status = DeliveryStatus::Sent;
                true
            }
            _ => false,
        }
    }

    pub fn mark_failed(&mut self, client_ref: ClientRef) -> bool {
        match self.entry_by_ref(client_ref) {
            Some(entry) => {
                entry.status = DeliveryStatus::Failed;
                true
            }
            None => false,
        }
    }

    /// Fold one server row into the timeline.
    pub fn merge(&mut self, message: Message) -> MergeOutcome {
        if message.is_deleted {
            return MergeOutcome::Ignored;
        }
        if self
            .entries
            .iter()
            .any(|e| e.id == EntryId::Server(message.id))
        {
            return MergeOutcome::Duplicate;
        }

        // A row carrying a client_ref only ever claims its own placeholder.
        let placeholder = match message.client_ref {
            Some(cr) => self
                .entries
                .iter()
                .position(|e| !e.is_confirmed() && e.client_ref == Some(cr)),
            None => self.content_match(&message),
        };

        let outcome = match placeholder {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.id = EntryId::Server(message.id);
                entry.client_ref = message.client_ref.or(entry.client_ref);
                entry.created_at = message.created_at;
                entry.body = message.body;
                if entry.status != DeliveryStatus::Failed {
                    entry.status = DeliveryStatus::Sent;
                }
                MergeOutcome::Reconciled
            }
            None => {
                let seq = self.bump_seq();
                self.entries.push(TimelineEntry {
                    id: EntryId::Server(message.id),
                    client_ref: message.client_ref,
                    sender: message.sender,
                    body: message.body,
                    created_at: message.created_at,
                    status: DeliveryStatus::Sent,
                    seq,
                });
                MergeOutcome::Inserted
            }
        };

        self.sort();
        outcome
    }

    /// Replace the confirmed part of the timeline with a fresh copy of the
    /// thread.  Unconfirmed local entries are kept (and reconciled if their
    /// row is in `history`); delivery state of known rows is preserved.
    ///
    /// Returns the senders of rows that were not in the timeline before.
    pub fn reload(&mut self, history: Vec<Message>) -> Vec<Sender> {
        let previous = std::mem::take(&mut self.entries);
        let known: HashMap<MessageId, DeliveryStatus> = previous
            .iter()
            .filter_map(|e| e.server_id().map(|id| (id, e.status)))
            .collect();
        self.entries = previous.into_iter().filter(|e| !e.is_confirmed()).collect();

        let mut arrived = Vec::new();
        for message in history {
            let (id, sender) = (message.id, message.sender);
            let outcome = self.merge(message);
            match known.get(&id) {
                Some(status) => {
                    if let Some(entry) = self
                        .entries
                        .iter_mut()
                        .find(|e| e.id == EntryId::Server(id))
                    {
                        entry.status = *status;
                    }
                }
                None if outcome == MergeOutcome::Inserted => arrived.push(sender),
                None => {}
            }
        }
        arrived
    }

    // Oldest unconfirmed user entry with the same body.
    fn content_match(&self, message: &Message) -> Option<usize> {
        if message.sender != Sender::User {
            return None;
        }
        self.entries.iter().position(|e| {
            !e.is_confirmed() && e.sender == Sender::User && e.body == message.body
        })
    }

    fn entry_by_ref(&mut self, client_ref: ClientRef) -> Option<&mut TimelineEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.client_ref == Some(client_ref))
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatpsi_shared::UserId;
    use chrono::Duration;
    use uuid::Uuid;

    fn owner() -> UserId {
        UserId(Uuid::from_u128(7))
    }

    fn row(sender: Sender, text: &str) -> Message {
        Message::new(owner(), sender, MessageBody::text(text))
    }

    fn at(message: Message, offset_ms: i64, base: DateTime<Utc>) -> Message {
        Message {
            created_at: base + Duration::milliseconds(offset_ms),
            ..message
        }
    }

    fn assert_sorted(timeline: &Timeline) {
        let stamps: Vec<_> = timeline.entries().iter().map(|e| e.created_at).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[test]
    fn test_server_row_replaces_placeholder_by_client_ref() {
        let mut timeline = Timeline::new();
        let cr = ClientRef::new();
        timeline.push_local(cr, MessageBody::text("hello"), Utc::now());
        assert_eq!(timeline.entries()[0].status, DeliveryStatus::Pending);

        let server = row(Sender::User, "hello").with_client_ref(Some(cr));
        let id = server.id;
        assert_eq!(timeline.merge(server), MergeOutcome::Reconciled);

        assert_eq!(timeline.len(), 1);
        let entry = &timeline.entries()[0];
        assert_eq!(entry.id, EntryId::Server(id));
        assert_eq!(entry.status, DeliveryStatus::Sent);
        assert_eq!(entry.client_ref, Some(cr));
    }

    #[test]
    fn test_same_server_id_is_kept_once() {
        let mut timeline = Timeline::new();
        let message = row(Sender::Assistant, "hi");
        assert_eq!(timeline.merge(message.clone()), MergeOutcome::Inserted);
        assert_eq!(timeline.merge(message), MergeOutcome::Duplicate);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_content_fallback_without_client_ref() {
        let mut timeline = Timeline::new();
        let cr = ClientRef::new();
        timeline.push_local(cr, MessageBody::text("hello"), Utc::now());

        // Different text does not match.
        assert_eq!(timeline.merge(row(Sender::User, "other")), MergeOutcome::Inserted);
        assert_eq!(timeline.merge(row(Sender::User, "hello")), MergeOutcome::Reconciled);
        assert_eq!(timeline.len(), 2);
        assert!(timeline.entries().iter().all(|e| e.is_confirmed()));
        assert_eq!(timeline.find(cr).unwrap().content(), "hello");
    }

    #[test]
    fn test_assistant_rows_never_replace_user_placeholders() {
        let mut timeline = Timeline::new();
        timeline.push_local(ClientRef::new(), MessageBody::text("hello"), Utc::now());
        assert_eq!(timeline.merge(row(Sender::Assistant, "hello")), MergeOutcome::Inserted);
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn test_same_text_twice_reconciles_oldest_first() {
        let mut timeline = Timeline::new();
        let base = Utc::now();
        let first = ClientRef::new();
        let second = ClientRef::new();
        timeline.push_local(first, MessageBody::text("ok"), base);
        timeline.push_local(second, MessageBody::text("ok"), base + Duration::seconds(1));

        timeline.merge(row(Sender::User, "ok"));
        assert!(timeline.find(first).unwrap().is_confirmed());
        assert!(!timeline.find(second).unwrap().is_confirmed());

        timeline.merge(row(Sender::User, "ok"));
        assert_eq!(timeline.len(), 2);
        assert!(timeline.entries().iter().all(|e| e.is_confirmed()));
    }

    #[test]
    fn test_failed_status_survives_confirmation() {
        let mut timeline = Timeline::new();
        let cr = ClientRef::new();
        timeline.push_local(cr, MessageBody::text("hello"), Utc::now());
        assert!(timeline.mark_failed(cr));

        timeline.merge(row(Sender::User, "hello").with_client_ref(Some(cr)));
        let entry = timeline.find(cr).unwrap();
        assert!(entry.is_confirmed());
        assert_eq!(entry.status, DeliveryStatus::Failed);

        // A late success does not un-fail it.
        assert!(!timeline.mark_sent(cr));
    }

    #[test]
    fn test_out_of_order_arrivals_stay_sorted() {
        let mut timeline = Timeline::new();
        let base = Utc::now();
        for offset in [300, 100, 200, 0, 250] {
            timeline.merge(at(row(Sender::Assistant, "x"), offset, base));
            assert_sorted(&timeline);
        }
        assert_eq!(timeline.len(), 5);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut timeline = Timeline::new();
        let base = Utc::now();
        timeline.merge(at(row(Sender::User, "first"), 0, base));
        timeline.merge(at(row(Sender::Assistant, "second"), 0, base));
        let contents: Vec<_> = timeline.entries().iter().map(|e| e.content()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn test_deleted_rows_are_ignored() {
        let mut timeline = Timeline::new();
        let mut message = row(Sender::User, "gone");
        message.is_deleted = true;
        assert_eq!(timeline.merge(message), MergeOutcome::Ignored);
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_reload_keeps_unconfirmed_and_reports_new_rows() {
        let mut timeline = Timeline::new();
        let base = Utc::now();

        let old = at(row(Sender::User, "old"), 0, base);
        let removed = at(row(Sender::Assistant, "removed"), 10, base);
        timeline.merge(old.clone());
        timeline.merge(removed);

        let failed = ClientRef::new();
        timeline.push_local(failed, MessageBody::text("retry me"), base + Duration::seconds(1));
        timeline.mark_failed(failed);
        let pending = ClientRef::new();
        timeline.push_local(pending, MessageBody::text("still going"), base + Duration::seconds(2));

        let echoed = at(row(Sender::User, "retry me").with_client_ref(Some(failed)), 1_000, base);
        let reply = at(row(Sender::Assistant, "new reply"), 1_500, base);
        let arrived = timeline.reload(vec![old, echoed, reply]);

        assert_eq!(arrived, vec![Sender::Assistant]);
        let contents: Vec<_> = timeline.entries().iter().map(|e| e.content()).collect();
        assert_eq!(contents, vec!["old", "retry me", "new reply", "still going"]);
        assert_eq!(timeline.find(failed).unwrap().status, DeliveryStatus::Failed);
        assert_eq!(timeline.find(pending).unwrap().status, DeliveryStatus::Pending);
        assert_sorted(&timeline);
    }

    #[test]
    fn test_reload_preserves_failed_state_of_known_rows() {
        let mut timeline = Timeline::new();
        let cr = ClientRef::new();
        timeline.push_local(cr, MessageBody::text("hello"), Utc::now());
        let server = row(Sender::User, "hello").with_client_ref(Some(cr));
        timeline.merge(server.clone());
        timeline.mark_failed(cr);

        let arrived = timeline.reload(vec![server]);
        assert!(arrived.is_empty());
        assert_eq!(timeline.find(cr).unwrap().status, DeliveryStatus::Failed);
    }

    #[test]
    fn test_reload_keeps_pending_repeat_of_earlier_text() {
        let mut timeline = Timeline::new();
        let base = Utc::now();

        let earlier = ClientRef::new();
        timeline.push_local(earlier, MessageBody::text("ok"), base);
        let sent = at(row(Sender::User, "ok").with_client_ref(Some(earlier)), 10, base);
        let reply = at(row(Sender::Assistant, "sure"), 20, base);
        timeline.merge(sent.clone());
        timeline.merge(reply.clone());

        let repeat = ClientRef::new();
        timeline.push_local(repeat, MessageBody::text("ok"), base + Duration::seconds(1));

        let arrived = timeline.reload(vec![sent, reply]);
        assert!(arrived.is_empty());
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline.find(earlier).unwrap().status, DeliveryStatus::Sent);
        let pending = timeline.find(repeat).unwrap();
        assert!(!pending.is_confirmed());
        assert_eq!(pending.status, DeliveryStatus::Pending);
        assert!(timeline.mark_failed(repeat));
    }

    #[test]
    fn test_row_with_foreign_client_ref_never_claims_placeholder() {
        let mut timeline = Timeline::new();
        let cr = ClientRef::new();
        timeline.push_local(cr, MessageBody::text("ok"), Utc::now());

        let other = row(Sender::User, "ok").with_client_ref(Some(ClientRef::new()));
        assert_eq!(timeline.merge(other), MergeOutcome::Inserted);
        assert_eq!(timeline.len(), 2);
        assert!(!timeline.find(cr).unwrap().is_confirmed());
    }
}
