//! Cancellable one-shot timers for the session actor.
//!
//! A [`TimerSlot`] owns at most one scheduled firing.  Re-arming or
//! cancelling aborts the previous task and bumps the slot's generation, so a
//! firing that was already queued when it got superseded is recognised as
//! stale by [`TimerSlot::accept`] and dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired<K> {
    pub kind: K,
    pub generation: u64,
}

pub struct TimerSlot<K> {
    kind: K,
    generation: u64,
    handle: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<TimerFired<K>>,
}

impl<K> TimerSlot<K>
where
    K: Copy + PartialEq + Send + 'static,
{
    pub fn new(kind: K, tx: mpsc::UnboundedSender<TimerFired<K>>) -> Self {
        Self {
            kind,
            generation: 0,
            handle: None,
            tx,
        }
    }

    /// Schedule a firing after `delay`, replacing any pending one.
    pub fn arm(&mut self, delay: Duration) {
        self.cancel();
        let fired = TimerFired {
            kind: self.kind,
            generation: self.generation,
        };
        let tx = self.tx.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        }));
    }

    pub fn cancel(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether `fired` is this slot's current firing.  Accepting disarms the
    /// slot.
    pub fn accept(&mut self, fired: &TimerFired<K>) -> bool {
        if fired.kind != self.kind || fired.generation != self.generation || self.handle.is_none() {
            return false;
        }
        self.handle = None;
        true
    }
}

impl<K> Drop for TimerSlot<K> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
