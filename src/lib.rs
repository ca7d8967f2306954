//! Real-time audio interview session client.
//!
//! Streams microphone audio (512-sample frames at 16 kHz, base64 PCM16
//! over a persistent WebSocket) to an interview inference backend,
//! plays back spoken AI replies while suppressing transmission
//! (half-duplex), and keeps an independent local recording of the
//! session that is uploaded when the user leaves.
//!
//! The top-level handle is [`session::InterviewRoom`]:
//!
//! ```no_run
//! use interview_room::config::Config;
//! use interview_room::session::InterviewRoom;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load(None)?;
//! let mut room = InterviewRoom::new(config, "my-session".to_string());
//! room.start().await?;
//! // ... interview runs; state available via room.subscribe() ...
//! room.leave().await;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod recording;
pub mod session;

pub use error::SessionError;
