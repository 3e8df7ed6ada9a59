//! Voice-note recorder state machine.
//!
//! ```text
//! idle -> requesting-permission -> recording -> processing -> idle
//!                 |                    |
//!                 +--(denied)--> idle  +--(cancel)--> idle
//! ```
//!
//! The open microphone stream is owned by the recorder while recording and is
//! stopped on `stop`, `cancel` and drop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::RecorderError;
use crate::microphone::{MediaStream, Microphone};
use crate::wav::encode_wav;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    RequestingPermission,
    Recording,
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderStatus {
    pub state: RecorderState,
    /// Whole seconds elapsed in the current recording.
    pub duration_secs: u64,
}

impl RecorderStatus {
    fn idle() -> Self {
        Self {
            state: RecorderState::Idle,
            duration_secs: 0,
        }
    }
}

/// A finished recording, ready to be uploaded as an attachment.
#[derive(Debug, Clone)]
pub struct Recording {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
    pub duration_secs: u64,
}

struct ActiveRecording {
    stream: Box<dyn MediaStream>,
    chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    ticker: JoinHandle<()>,
    started: Instant,
}

impl ActiveRecording {
    fn release(&mut self) {
        self.ticker.abort();
        self.stream.stop();
    }
}

pub struct AudioRecorder {
    microphone: Arc<dyn Microphone>,
    status: watch::Sender<RecorderStatus>,
    active: Option<ActiveRecording>,
}

impl AudioRecorder {
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        let (status, _) = watch::channel(RecorderStatus::idle());
        Self {
            microphone,
            status,
            active: None,
        }
    }

    pub fn status(&self) -> RecorderStatus {
        *self.status.borrow()
    }

    /// Follow state and duration changes, e.g. to drive a `m:ss` counter.
    pub fn subscribe(&self) -> watch::Receiver<RecorderStatus> {
        self.status.subscribe()
    }

    pub async fn start(&mut self) -> Result<(), RecorderError> {
        if self.status().state != RecorderState::Idle {
            return Err(RecorderError::AlreadyActive);
        }

        self.set_state(RecorderState::RequestingPermission);

        let (sink, chunks) = mpsc::unbounded_channel();
        let stream = match self.microphone.open(sink).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Microphone unavailable: {e}");
                self.status.send_replace(RecorderStatus::idle());
                return Err(e.into());
            }
        };

        let status = self.status.clone();
        let ticker = tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                status.send_modify(|s| s.duration_secs += 1);
            }
        });

        self.active = Some(ActiveRecording {
            stream,
            chunks,
            ticker,
            started: Instant::now(),
        });
        self.status.send_replace(RecorderStatus {
            state: RecorderState::Recording,
            duration_secs: 0,
        });
        info!("Recording started");
        Ok(())
    }

    /// Finish the recording and return it as a WAV file.
    pub async fn stop(&mut self) -> Result<Recording, RecorderError> {
        let mut active = self.active.take().ok_or(RecorderError::NotRecording)?;
        self.set_state(RecorderState::Processing);

        active.release();
        let format = active.stream.format();
        let duration_secs = active.started.elapsed().as_secs();

        let mut samples = Vec::new();
        while let Ok(chunk) = active.chunks.try_recv() {
            samples.extend_from_slice(&chunk);
        }

        let data = encode_wav(&samples, format);
        let file_name = format!(
            "audio_recording_{}.wav",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );

        self.status.send_replace(RecorderStatus::idle());
        info!(duration_secs, bytes = data.len(), "Recording finished");

        Ok(Recording {
            file_name,
            mime_type: "audio/wav".into(),
            data,
            duration_secs,
        })
    }

    /// Drop everything captured so far.  No-op when idle.
    pub fn cancel(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.release();
            debug!("Recording cancelled");
        }
        self.status.send_replace(RecorderStatus::idle());
    }

    fn set_state(&self, state: RecorderState) {
        self.status.send_modify(|s| s.state = state);
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.release();
        }
    }
}

/// Format a duration as `m:ss`.
pub fn format_duration(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}
