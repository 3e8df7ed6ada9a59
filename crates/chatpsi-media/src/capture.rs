//! cpal-backed [`Microphone`].
//!
//! cpal streams are `!Send`, so each stream lives on its own thread which
//! parks until told to stop and then drops the stream, releasing the device.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info, warn};

use crate::error::MicrophoneError;
use crate::microphone::{AudioFormat, ChunkSink, MediaStream, Microphone};

#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self, sink: ChunkSink) -> Result<Box<dyn MediaStream>, MicrophoneError> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("chatpsi-mic".into())
            .spawn(move || run_capture(sink, ready_tx, stop_rx))
            .map_err(|e| MicrophoneError::Stream(e.to_string()))?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| MicrophoneError::Stream(e.to_string()))?;

        match ready {
            Ok(Ok(format)) => Ok(Box::new(CpalStream {
                format,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(MicrophoneError::Stream("capture thread exited".into()))
            }
        }
    }
}

fn run_capture(
    sink: ChunkSink,
    ready_tx: std_mpsc::Sender<Result<AudioFormat, MicrophoneError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match build_stream(sink) {
        Ok((stream, format)) => {
            let _ = ready_tx.send(Ok(format));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Blocks until stop() or until the handle is dropped.
    let _ = stop_rx.recv();
    if let Err(e) = stream.pause() {
        warn!("Failed to pause input stream: {e}");
    }
    drop(stream);
    debug!("Microphone released");
}

fn build_stream(sink: ChunkSink) -> Result<(cpal::Stream, AudioFormat), MicrophoneError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(MicrophoneError::NoInputDevice)?;

    info!(device = ?device.name(), "Using input device");

    let supported = device
        .default_input_config()
        .map_err(|e| MicrophoneError::Denied(e.to_string()))?;
    let format = AudioFormat {
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let config: cpal::StreamConfig = supported.config();
    let on_error = |err| error!("Audio input error: {err}");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let _ = sink.send(data.to_vec());
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _info: &cpal::InputCallbackInfo| {
                let chunk = data.iter().map(|s| *s as f32 / i16::MAX as f32).collect();
                let _ = sink.send(chunk);
            },
            on_error,
            None,
        ),
        other => {
            return Err(MicrophoneError::Stream(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    }
    .map_err(|e| MicrophoneError::Denied(e.to_string()))?;

    stream
        .play()
        .map_err(|e| MicrophoneError::Stream(e.to_string()))?;

    debug!(?format, "Audio capture started");
    Ok((stream, format))
}

struct CpalStream {
    format: AudioFormat,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MediaStream for CpalStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}
