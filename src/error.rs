//! Error types for the voxa chat client.

/// Top-level error type for the chat client.
#[derive(Debug, thiserror::Error)]
pub enum VoxaError {
    /// Submitted message was empty after trimming whitespace.
    #[error("empty input")]
    EmptyInput,

    /// Network failure or non-success response from the chat endpoint.
    #[error("transport error: {0}")]
    Transport(String),

    /// Voice input capability is absent in this environment.
    #[error("voice input unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Audio playback error (logged, never surfaced to the transcript).
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoxaError>;
