//! Error types for the tape engine.

use thiserror::Error;

/// Errors surfaced to control-thread callers.
///
/// The audio thread never produces these directly; its failures travel as
/// [`EngineEvent`](crate::audio_engine::EngineEvent)s and are converted here when the
/// control thread drains them.
#[derive(Error, Debug)]
pub enum TapeError {
    /// The operation is not allowed in the current transport state.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(&'static str),

    #[error("Invalid track index {index} (at most {max} tracks)")]
    InvalidTrackIndex { index: usize, max: usize },

    #[error("Invalid seek position: {0}s")]
    InvalidSeek(f64),

    /// A track ran out of pre-allocated sample chunks while recording.
    #[error("Track {track} ran out of sample memory, recording stopped")]
    OutOfMemory { track: usize },

    #[error("Audio graph disconnected: {0}")]
    GraphDisconnected(String),

    #[error("Failed to register port '{port}': {reason}")]
    PortRegistration { port: String, reason: String },

    #[error("Failed to connect '{from_port}' -> '{to_port}': {reason}")]
    Connection {
        from_port: String,
        to_port: String,
        reason: String,
    },

    #[error("Audio command queue is full")]
    CommandQueueFull,

    #[error("Audio backend error: {0}")]
    Backend(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings format error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for tape operations
pub type TapeResult<T> = Result<T, TapeError>;
