//! # chatpsi-media
//!
//! Voice-note capture for the chat client.  [`AudioRecorder`] drives the
//! `idle -> requesting-permission -> recording -> processing -> idle` state
//! machine on top of a [`Microphone`] implementation and hands back a
//! finished WAV file.

#[cfg(feature = "capture")]
pub mod capture;
pub mod error;
pub mod microphone;
pub mod recorder;
pub mod wav;

#[cfg(feature = "capture")]
pub use capture::CpalMicrophone;
pub use error::{MicrophoneError, RecorderError};
pub use microphone::{AudioFormat, ChunkSink, MediaStream, Microphone};
pub use recorder::{format_duration, AudioRecorder, Recording, RecorderState, RecorderStatus};
