use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MicrophoneError;

/// Receives interleaved `f32` sample chunks from an open stream.
pub type ChunkSink = mpsc::UnboundedSender<Vec<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
        }
    }
}

/// An open capture stream.  `stop` releases the device and must be safe to
/// call more than once.
pub trait MediaStream: Send {
    fn format(&self) -> AudioFormat;
    fn stop(&mut self);
}

/// Source of microphone audio.  Opening the device is where the platform asks
/// the user for permission.
#[async_trait]
pub trait Microphone: Send + Sync {
    async fn open(&self, sink: ChunkSink) -> Result<Box<dyn MediaStream>, MicrophoneError>;
}
