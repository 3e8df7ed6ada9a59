//! Chat session controller.
//!
//! One actor task per open conversation owns the timeline, the realtime
//! subscription and every timer.  The view talks to it through a
//! [`SessionHandle`]: commands go in over a channel, state comes back as
//! [`SessionSnapshot`]s on a watch channel and one-off [`SessionNotice`]s on
//! a broadcast channel.
//!
//! Slow work (dispatch, history fetch, subscribe handshake) runs in spawned
//! tasks that report back to the actor, so the loop never blocks on the
//! network after the initial load.
//!
//! Per send: `pending -> sent | failed`.  Independently `awaiting-reply` is
//! set by a send and cleared by an assistant row, a failed dispatch, the
//! response timeout or a manual refresh.

use chatpsi_shared::message::now_micros;
use chatpsi_shared::protocol::{DispatchRequest, DispatchResponse, ProfileResponse};
use chatpsi_shared::{ClientRef, Message, Sender, ThreadId, UserId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::draft::Draft;
use crate::error::{ClientError, SendError};
use crate::events::{ConnectionState, SessionNotice};
use crate::scroll::{ScrollState, ScrollTracker, Viewport};
use crate::seams::{RealtimeEvent, SessionDeps, Subscription};
use crate::timeline::{MergeOutcome, Timeline, TimelineEntry};
use crate::timers::{TimerFired, TimerSlot};

const COMMAND_BUFFER: usize = 32;
const NOTICE_BUFFER: usize = 32;

/// What the view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub entries: Vec<TimelineEntry>,
    pub awaiting_reply: bool,
    /// "Assistant is typing" indicator.
    pub typing: bool,
    pub connection: ConnectionState,
    /// True until the first history fetch completed.
    pub loading: bool,
    /// `None` until the profile was fetched.
    pub entitled: Option<bool>,
    pub scroll: ScrollState,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            entries: Vec::new(),
            awaiting_reply: false,
            typing: false,
            connection: ConnectionState::Connecting,
            loading: true,
            entitled: None,
            scroll: ScrollState {
                near_bottom: true,
                unseen: 0,
            },
        }
    }
}

enum Command {
    Send {
        draft: Draft,
        reply: oneshot::Sender<Result<ClientRef, SendError>>,
    },
    Refresh,
    Viewport(Viewport),
    JumpToLatest,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchReason {
    Initial,
    ReplyTimeout,
    Refresh,
    Reconnected,
}

enum Internal {
    Dispatched {
        client_ref: ClientRef,
        result: Result<DispatchResponse, ClientError>,
    },
    History {
        reason: FetchReason,
        result: Result<Vec<Message>, ClientError>,
    },
    Entitlement(Result<ProfileResponse, ClientError>),
    Subscribed(Result<Subscription, ClientError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Response,
    Typing,
    Reconnect,
}

enum Step {
    Command(Command),
    Internal(Internal),
    Timer(TimerFired<TimerKind>),
    Realtime(Option<RealtimeEvent>),
    Stop,
}

pub struct ChatSession;

impl ChatSession {
    /// Start a session for `actor`'s thread.  Must be called inside a tokio
    /// runtime.
    pub fn spawn(actor: UserId, deps: SessionDeps, config: SessionConfig) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::initial());
        let (notice_tx, _) = broadcast::channel(NOTICE_BUFFER);

        let session = SessionActor {
            thread: actor.thread(),
            scroll: ScrollTracker::new(config.scroll_threshold),
            response_timer: TimerSlot::new(TimerKind::Response, timer_tx.clone()),
            typing_timer: TimerSlot::new(TimerKind::Typing, timer_tx.clone()),
            reconnect_timer: TimerSlot::new(TimerKind::Reconnect, timer_tx),
            deps,
            config,
            timeline: Timeline::new(),
            entitled: None,
            awaiting: None,
            typing: false,
            loading: true,
            connection: ConnectionState::Connecting,
            subscription: None,
            subscribing: false,
            failures: 0,
            lost_notified: false,
            internal_tx,
            snapshots: snapshot_tx,
            notices: notice_tx.clone(),
        };

        info!(user = %actor.short(), "Chat session starting");
        let task = tokio::spawn(session.run(command_rx, internal_rx, timer_rx));

        SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            notices: notice_tx,
            task,
        }
    }
}

/// The view's side of a running session.  Dropping it ends the session.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    notices: broadcast::Sender<SessionNotice>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue a message.  Returns once it is in the timeline as pending; the
    /// dispatch outcome shows up in snapshots and notices.
    pub async fn send(&self, draft: Draft) -> Result<ClientRef, SendError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { draft, reply })
            .await
            .map_err(|_| SendError::Closed)?;
        rx.await.map_err(|_| SendError::Closed)?
    }

    /// Stop waiting for the current reply and re-fetch the thread.
    pub async fn refresh(&self) {
        let _ = self.commands.send(Command::Refresh).await;
    }

    pub async fn viewport_changed(&self, viewport: Viewport) {
        let _ = self.commands.send(Command::Viewport(viewport)).await;
    }

    pub async fn jump_to_latest(&self) {
        let _ = self.commands.send(Command::JumpToLatest).await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Notices emitted from now on.
    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Release the subscription and timers and wait for the actor to exit.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Chat session task ended abnormally");
        }
    }
}

struct SessionActor {
    thread: ThreadId,
    deps: SessionDeps,
    config: SessionConfig,
    timeline: Timeline,
    scroll: ScrollTracker,
    entitled: Option<bool>,
    /// The send that owns the awaiting-reply state.
    awaiting: Option<ClientRef>,
    typing: bool,
    loading: bool,
    connection: ConnectionState,
    subscription: Option<Subscription>,
    subscribing: bool,
    /// Consecutive realtime failures.
    failures: u32,
    lost_notified: bool,
    response_timer: TimerSlot<TimerKind>,
    typing_timer: TimerSlot<TimerKind>,
    reconnect_timer: TimerSlot<TimerKind>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    snapshots: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<SessionNotice>,
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<RealtimeEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut timers: mpsc::UnboundedReceiver<TimerFired<TimerKind>>,
    ) {
        self.bootstrap().await;

        loop {
            let step = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => Step::Stop,
                    Some(command) => Step::Command(command),
                },
                Some(event) = internal.recv() => Step::Internal(event),
                Some(fired) = timers.recv() => Step::Timer(fired),
                event = next_event(&mut self.subscription) => Step::Realtime(event),
            };

            match step {
                Step::Stop => break,
                Step::Command(command) => self.on_command(command),
                Step::Internal(event) => self.on_internal(event),
                Step::Timer(fired) => self.on_timer(fired),
                Step::Realtime(event) => self.on_realtime(event),
            }
            self.publish();
        }

        self.teardown();
    }

    async fn bootstrap(&mut self) {
        let (profile, history) = tokio::join!(
            self.deps.entitlement.profile(),
            self.deps.history.fetch_thread()
        );
        self.on_entitlement(profile);
        self.on_history(FetchReason::Initial, history);
        self.start_subscribe();
        self.publish();
    }

    fn teardown(&mut self) {
        self.subscription = None;
        self.response_timer.cancel();
        self.typing_timer.cancel();
        self.reconnect_timer.cancel();
        self.connection = ConnectionState::Disconnected;
        self.publish();
        info!(thread = %self.thread, "Chat session closed");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send { draft, reply } => {
                let result = self.send(draft);
                let _ = reply.send(result);
            }
            Command::Refresh => self.refresh(),
            Command::Viewport(viewport) => self.scroll.viewport_changed(viewport),
            Command::JumpToLatest => {
                self.scroll.jump_to_latest();
            }
            Command::Shutdown => {}
        }
    }

    fn send(&mut self, draft: Draft) -> Result<ClientRef, SendError> {
        if self.entitled != Some(true) {
            self.notify(SessionNotice::EntitlementRequired);
            return Err(SendError::EntitlementRequired);
        }
        if self.awaiting.is_some() {
            return Err(SendError::AwaitingReply);
        }
        if draft.is_empty() {
            return Err(SendError::Empty);
        }

        let client_ref = ClientRef::new();
        let body = draft.into_body();
        let request = DispatchRequest::from_body(&body, Some(client_ref));
        info!(client_ref = %client_ref, kind = body.kind().as_str(), "Sending message");

        self.timeline.push_local(client_ref, body, now_micros());
        self.scroll.on_local_send();
        self.awaiting = Some(client_ref);
        self.typing = true;
        self.response_timer.arm(self.config.response_timeout);
        self.typing_timer.arm(self.config.typing_timeout);

        let gateway = self.deps.gateway.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = gateway.dispatch(request).await;
            let _ = tx.send(Internal::Dispatched { client_ref, result });
        });

        Ok(client_ref)
    }

    fn refresh(&mut self) {
        info!(thread = %self.thread, "Manual refresh");
        self.settle_reply();
        self.fetch(FetchReason::Refresh);

        let entitlement = self.deps.entitlement.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Internal::Entitlement(entitlement.profile().await));
        });
    }

    // -----------------------------------------------------------------------
    // Results of spawned work
    // -----------------------------------------------------------------------

    fn on_internal(&mut self, event: Internal) {
        match event {
            Internal::Dispatched { client_ref, result } => self.on_dispatched(client_ref, result),
            Internal::History { reason, result } => self.on_history(reason, result),
            Internal::Entitlement(result) => self.on_entitlement(result),
            Internal::Subscribed(result) => self.on_subscribed(result),
        }
    }

    fn on_dispatched(&mut self, client_ref: ClientRef, result: Result<DispatchResponse, ClientError>) {
        match result {
            Ok(response) => {
                debug!(client_ref = %client_ref, inline = response.reply.is_some(), "Dispatch accepted");
                self.timeline.mark_sent(client_ref);
                self.absorb(response.user_message);
                if let Some(reply) = response.reply {
                    self.absorb(reply);
                }
            }
            Err(error) => {
                warn!(client_ref = %client_ref, error = %error, "Dispatch failed");
                self.timeline.mark_failed(client_ref);
                if self.awaiting == Some(client_ref) {
                    self.settle_reply();
                }
                if error == ClientError::EntitlementRequired {
                    self.entitled = Some(false);
                    self.notify(SessionNotice::EntitlementRequired);
                }
                self.notify(SessionNotice::SendFailed { client_ref, error });
            }
        }
    }

    fn on_history(&mut self, reason: FetchReason, result: Result<Vec<Message>, ClientError>) {
        self.loading = false;
        match result {
            Ok(history) => {
                let arrived = self.timeline.reload(history);
                debug!(?reason, total = self.timeline.len(), new = arrived.len(), "Thread loaded");
                if reason != FetchReason::Initial {
                    self.scroll.on_arrival(arrived.len());
                    if arrived.contains(&Sender::Assistant) {
                        self.settle_reply();
                    }
                }
            }
            Err(error) => {
                warn!(?reason, error = %error, "Could not load thread");
                self.notify(SessionNotice::HistoryUnavailable { error });
            }
        }
    }

    fn on_entitlement(&mut self, result: Result<ProfileResponse, ClientError>) {
        match result {
            Ok(profile) => {
                if self.entitled != Some(profile.subscription_active) {
                    debug!(active = profile.subscription_active, "Entitlement updated");
                }
                self.entitled = Some(profile.subscription_active);
            }
            Err(error) => warn!(error = %error, "Could not load profile"),
        }
    }

    // -----------------------------------------------------------------------
    // Realtime
    // -----------------------------------------------------------------------

    fn start_subscribe(&mut self) {
        if self.subscription.is_some() || self.subscribing {
            return;
        }
        self.subscribing = true;

        let notifier = self.deps.notifier.clone();
        let thread = self.thread;
        let window = self.config.subscribe_timeout;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(window, notifier.subscribe(thread)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout("realtime subscribe".into())),
            };
            // If the session is gone the subscription is dropped here.
            let _ = tx.send(Internal::Subscribed(result));
        });
    }

    fn on_subscribed(&mut self, result: Result<Subscription, ClientError>) {
        self.subscribing = false;
        match result {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.connection = ConnectionState::Connected;
                let recovering = self.failures > 0;
                self.failures = 0;
                if self.lost_notified {
                    self.lost_notified = false;
                    self.notify(SessionNotice::ConnectionRestored);
                }
                if recovering {
                    info!(thread = %self.thread, "Realtime reconnected, re-fetching thread");
                    self.fetch(FetchReason::Reconnected);
                }
            }
            Err(error) => self.connection_failed(&error.to_string()),
        }
    }

    fn on_realtime(&mut self, event: Option<RealtimeEvent>) {
        match event {
            Some(RealtimeEvent::Insert(message)) => self.absorb(message),
            Some(RealtimeEvent::Error(reason)) => self.connection_failed(&reason),
            None => self.connection_failed("channel closed"),
        }
    }

    fn connection_failed(&mut self, reason: &str) {
        self.subscription = None;
        self.connection = ConnectionState::Disconnected;
        self.failures += 1;
        warn!(
            failures = self.failures,
            reason,
            retry_in = ?self.config.reconnect_backoff,
            "Realtime channel down"
        );
        if self.failures >= self.config.connection_lost_after && !self.lost_notified {
            self.lost_notified = true;
            self.notify(SessionNotice::ConnectionLost);
        }
        self.reconnect_timer.arm(self.config.reconnect_backoff);
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn on_timer(&mut self, fired: TimerFired<TimerKind>) {
        match fired.kind {
            TimerKind::Response if self.response_timer.accept(&fired) => {
                info!(thread = %self.thread, "No reply in time, re-fetching thread");
                self.awaiting = None;
                self.notify(SessionNotice::ReplyDelayed);
                self.fetch(FetchReason::ReplyTimeout);
            }
            TimerKind::Typing if self.typing_timer.accept(&fired) => {
                self.typing = false;
            }
            TimerKind::Reconnect if self.reconnect_timer.accept(&fired) => {
                self.start_subscribe();
            }
            kind => debug!(?kind, "Stale timer ignored"),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Fold a server row into the timeline.
    fn absorb(&mut self, message: Message) {
        if message.thread_id != self.thread {
            warn!(thread = %self.thread, other = %message.thread_id, "Row from another thread ignored");
            return;
        }
        let sender = message.sender;
        if self.timeline.merge(message) == MergeOutcome::Inserted {
            self.scroll.on_arrival(1);
            if sender == Sender::Assistant {
                self.settle_reply();
            }
        }
    }

    fn settle_reply(&mut self) {
        self.awaiting = None;
        self.typing = false;
        self.response_timer.cancel();
        self.typing_timer.cancel();
    }

    fn fetch(&mut self, reason: FetchReason) {
        let history = self.deps.history.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = history.fetch_thread().await;
            let _ = tx.send(Internal::History { reason, result });
        });
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            entries: self.timeline.entries().to_vec(),
            awaiting_reply: self.awaiting.is_some(),
            typing: self.typing,
            connection: self.connection,
            loading: self.loading,
            entitled: self.entitled,
            scroll: self.scroll.state(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}
