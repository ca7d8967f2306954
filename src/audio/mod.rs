//! Audio path: capture, framing, sample codec, playback, and the
//! half-duplex gate between the last two.
//!
//! ## Design
//! - Pure framing/resampling logic separated from device I/O so it can
//!   run inside a realtime callback and be tested without hardware
//! - Device-owning threads (cpal capture, rodio playback) bridged to
//!   the async session over channels
//! - One shared [`PlaybackGate`] as the only mutable state between the
//!   capture path and the playback path

pub mod capture;
pub mod codec;
pub mod framer;
pub mod gate;
pub mod playback;

pub use capture::{AudioChannel, ChunkSink};
pub use framer::{AudioFrame, FrameAccumulator};
pub use gate::{GateGeneration, PlaybackGate};
pub use playback::{PlaybackDriver, PlaybackHandle};
