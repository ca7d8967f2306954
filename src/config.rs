//! Client configuration: endpoints, audio parameters, recording options.
//!
//! Layered load order — built-in defaults, then an optional TOML file,
//! then `INTERVIEW_*` environment variables. Endpoints are injected into
//! `SessionSocket` and `RecordingChannel` at construction rather than
//! read from globals, so tests can point a session at a local stub.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SessionError;

/// Contract sample rate for outbound interview audio (Hz).
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per outbound audio frame (32 ms at 16 kHz).
pub const FRAME_SIZE: usize = 512;

/// Which driver feeds captured samples into the frame accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FramerKind {
    /// Frame directly inside the capture device callback (preferred).
    #[default]
    Callback,
    /// Buffer in the callback, frame on a periodic timer (fallback for
    /// hosts whose audio callbacks cannot run the full pipeline).
    Interval,
}

/// Backend endpoints for one deployment environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    /// Base URL for HTTP calls (recording upload/download).
    pub http_base_url: String,
    /// Base URL for the session WebSocket (`{ws_base_url}/ws/{session_id}`).
    pub ws_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            http_base_url: "http://127.0.0.1:8000".to_string(),
            ws_base_url: "ws://127.0.0.1:8000".to_string(),
        }
    }
}

/// Audio capture and framing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Framer driver selection.
    pub framer: FramerKind,
    /// Drain period for the interval framer, in milliseconds.
    pub interval_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            framer: FramerKind::Callback,
            interval_ms: 50,
        }
    }
}

/// Session-level behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Watchdog for the awaiting-response flag, in seconds. `0` disables
    /// it; on expiry the flag clears and a warning is logged so the
    /// projected state cannot hang at `processing` against a dead backend.
    pub response_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: 30,
        }
    }
}

/// Local recording settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Encoder chunk cadence in milliseconds (~1 s bounds memory growth
    /// before finalization).
    pub chunk_interval_ms: u64,
    /// `recording_type` form field sent with the upload.
    pub recording_type: String,
    /// Directory where the finalized artifact is also written locally.
    pub output_dir: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: 1_000,
            recording_type: "session".to_string(),
            output_dir: ".".to_string(),
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: Endpoints,
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub recording: RecordingConfig,
}

impl Config {
    /// Load configuration: defaults, then `path` (if given), then env.
    pub fn load(path: Option<&Path>) -> Result<Self, SessionError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    SessionError::Config(format!("cannot read {}: {e}", p.display()))
                })?;
                toml::from_str(&raw)
                    .map_err(|e| SessionError::Config(format!("invalid TOML in {}: {e}", p.display())))?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override endpoint/timeout fields from `INTERVIEW_*` env vars.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("INTERVIEW_HTTP_BASE_URL") {
            self.endpoints.http_base_url = v;
        }
        if let Ok(v) = std::env::var("INTERVIEW_WS_BASE_URL") {
            self.endpoints.ws_base_url = v;
        }
        if let Ok(v) = std::env::var("INTERVIEW_RESPONSE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.session.response_timeout_secs = secs;
            }
        }
    }

    /// Reject configurations that cannot produce a working session.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !self.endpoints.ws_base_url.starts_with("ws://")
            && !self.endpoints.ws_base_url.starts_with("wss://")
        {
            return Err(SessionError::Config(format!(
                "ws_base_url must start with ws:// or wss://, got {}",
                self.endpoints.ws_base_url
            )));
        }
        if !self.endpoints.http_base_url.starts_with("http://")
            && !self.endpoints.http_base_url.starts_with("https://")
        {
            return Err(SessionError::Config(format!(
                "http_base_url must start with http:// or https://, got {}",
                self.endpoints.http_base_url
            )));
        }
        if self.audio.interval_ms == 0 {
            return Err(SessionError::Config(
                "audio.interval_ms must be non-zero".to_string(),
            ));
        }
        if self.recording.chunk_interval_ms == 0 {
            return Err(SessionError::Config(
                "recording.chunk_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// WebSocket URL for one session.
    pub fn session_ws_url(&self, session_id: &str) -> String {
        format!(
            "{}/ws/{session_id}",
            self.endpoints.ws_base_url.trim_end_matches('/')
        )
    }

    /// Upload URL for one session's recording.
    pub fn upload_url(&self, session_id: &str) -> String {
        format!(
            "{}/recordings/upload/{session_id}",
            self.endpoints.http_base_url.trim_end_matches('/')
        )
    }

    /// Download URL for one session's recording.
    pub fn download_url(&self, session_id: &str) -> String {
        format!(
            "{}/recordings/{session_id}/download",
            self.endpoints.http_base_url.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.framer, FramerKind::Callback);
        assert_eq!(config.session.response_timeout_secs, 30);
        assert_eq!(config.recording.chunk_interval_ms, 1_000);
    }

    #[test]
    fn url_construction() {
        let config = Config {
            endpoints: Endpoints {
                http_base_url: "https://api.example.com/".to_string(),
                ws_base_url: "wss://api.example.com".to_string(),
            },
            ..Default::default()
        };
        assert_eq!(config.session_ws_url("abc"), "wss://api.example.com/ws/abc");
        assert_eq!(
            config.upload_url("abc"),
            "https://api.example.com/recordings/upload/abc"
        );
        assert_eq!(
            config.download_url("abc"),
            "https://api.example.com/recordings/abc/download"
        );
    }

    #[test]
    fn rejects_bad_schemes() {
        let mut config = Config::default();
        config.endpoints.ws_base_url = "http://wrong".to_string();
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));

        let mut config = Config::default();
        config.endpoints.http_base_url = "ftp://wrong".to_string();
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[endpoints]\nhttp_base_url = \"https://iv.example.com\"\nws_base_url = \"wss://iv.example.com\""
        )
        .unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.endpoints.http_base_url, "https://iv.example.com");
        // unspecified sections keep their defaults
        assert_eq!(config.recording.recording_type, "session");
        assert_eq!(config.audio.interval_ms, 50);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/interview.toml")));
        assert!(matches!(err, Err(SessionError::Config(_))));
    }

    #[test]
    fn framer_kind_parses_snake_case() {
        let config: Config = toml::from_str("[audio]\nframer = \"interval\"\ninterval_ms = 20").unwrap();
        assert_eq!(config.audio.framer, FramerKind::Interval);
        assert_eq!(config.audio.interval_ms, 20);
    }
}
