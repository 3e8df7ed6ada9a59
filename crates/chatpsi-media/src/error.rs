use thiserror::Error;

/// Failures reported by a [`Microphone`](crate::Microphone) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MicrophoneError {
    #[error("No input device available")]
    NoInputDevice,

    #[error("Microphone access denied: {0}")]
    Denied(String),

    #[error("Audio stream error: {0}")]
    Stream(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    /// The microphone could not be opened.  The recorder is back in idle.
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("A recording is already in progress")]
    AlreadyActive,

    #[error("No recording in progress")]
    NotRecording,
}

impl From<MicrophoneError> for RecorderError {
    fn from(err: MicrophoneError) -> Self {
        RecorderError::PermissionDenied(err.to_string())
    }
}
