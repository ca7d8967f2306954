//! Error taxonomy for the interview session client.
//!
//! Errors that affect the user's ability to continue the interview
//! (permission denial, transport loss) surface as the `error` session
//! state; transient failures (one bad frame, one failed upload) are
//! logged and recovered locally.

use thiserror::Error;

/// Errors produced by the session components.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone or camera permission was declined by the platform.
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    /// No usable capture or playback device exists.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A channel was started while already running.
    #[error("{0} is already active")]
    AlreadyActive(&'static str),

    /// WebSocket connect failure or unexpected close.
    #[error("transport error: {0}")]
    Transport(String),

    /// Audio reply could not be decoded or played.
    #[error("playback error: {0}")]
    Playback(String),

    /// Recording could not be encoded or finalized.
    #[error("recording error: {0}")]
    Recording(String),

    /// Recording upload failed. Non-fatal: the local artifact survives.
    #[error("upload failed: {0}")]
    Upload(String),

    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether this error must pin the projected session state to `error`.
    ///
    /// Permission and transport failures end the interview; everything
    /// else is recovered in place.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied(_)
                | SessionError::DeviceUnavailable(_)
                | SessionError::Transport(_)
        )
    }
}
