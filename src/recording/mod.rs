//! Local session recording, independent of the interview audio path.
//!
//! The recording pipeline acquires its own capture device, accumulates
//! roughly one-second encoded chunks while the session runs, and on
//! session end finalizes them into a single artifact and uploads it.
//! Server-side transmission failures never lose the recording: the
//! artifact is retained locally and can be fetched later through the
//! download fallback.

pub mod capture;
pub mod channel;
pub mod upload;

pub use capture::{MediaSource, MicWavSource};
pub use channel::{RecordingArtifact, RecordingChannel};
pub use upload::{RecordingStore, UploadReceipt};
