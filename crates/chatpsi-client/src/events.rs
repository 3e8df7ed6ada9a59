use chatpsi_shared::ClientRef;

use crate::error::ClientError;

/// State of the realtime channel as shown to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// One-off events the view surfaces as toasts or inline markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The gateway rejected or could not deliver a send.  The message stays
    /// in the timeline marked failed; resending is up to the user.
    SendFailed {
        client_ref: ClientRef,
        error: ClientError,
    },
    /// No reply within the response window; the thread was re-fetched.
    ReplyDelayed,
    EntitlementRequired,
    /// Realtime reconnects keep failing.  Emitted once per outage.
    ConnectionLost,
    ConnectionRestored,
    HistoryUnavailable { error: ClientError },
}
