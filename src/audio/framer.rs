//! Frame accumulation for the realtime capture path.
//!
//! Capture devices deliver irregularly-sized sample batches; the wire
//! protocol wants exactly 512-sample mono frames at 16 kHz. This module
//! holds the pure pieces of that conversion so they can be tested
//! without a device:
//!
//! ```text
//! device callback ──▶ downmix_to_mono ──▶ LinearResampler ──▶ FrameAccumulator ──▶ AudioFrame
//! ```
//!
//! Everything here runs (or may run) inside the audio callback: no
//! blocking, no unbounded allocation, no panics on odd input shapes.

use crate::config::{FRAME_SIZE, SAMPLE_RATE};

// ── Frames ─────────────────────────────────────────────────────────

/// One fixed-length block of mono samples (32 ms at 16 kHz), the atomic
/// unit of transmission. Frames are immutable once emitted and carry no
/// cross-frame state.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    /// Build a frame from exactly [`FRAME_SIZE`] samples.
    pub fn from_samples(samples: Vec<f32>) -> Option<Self> {
        if samples.len() == FRAME_SIZE {
            Some(Self { samples })
        } else {
            None
        }
    }

    /// Normalized float samples, always [`FRAME_SIZE`] long.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate the frame is defined at.
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

// ── Accumulator ────────────────────────────────────────────────────

/// Accumulates raw sample batches into exactly-512-sample frames.
///
/// Batches may be smaller or larger than one frame; leftover samples
/// persist across calls and no frame is ever emitted partially.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buffer: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_SIZE),
        }
    }

    /// Consume one batch, returning every frame completed by it.
    pub fn push(&mut self, batch: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut rest = batch;
        while !rest.is_empty() {
            let take = (FRAME_SIZE - self.buffer.len()).min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buffer.len() == FRAME_SIZE {
                let full = std::mem::replace(&mut self.buffer, Vec::with_capacity(FRAME_SIZE));
                frames.push(AudioFrame { samples: full });
            }
        }
        frames
    }

    /// Samples currently buffered toward the next frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

// ── Downmix ────────────────────────────────────────────────────────

/// Average interleaved multi-channel samples down to mono.
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

// ── Resampler ──────────────────────────────────────────────────────

/// Streaming linear resampler.
///
/// Carries its fractional read position and the last input sample across
/// calls so frame boundaries between device callbacks do not produce
/// discontinuities.
#[derive(Debug)]
pub struct LinearResampler {
    src_rate: u32,
    dst_rate: u32,
    /// Input samples advanced per output sample.
    step: f64,
    /// Fractional read position into `[prev, input...]`.
    pos: f64,
    /// Final sample of the previous call, for cross-call interpolation.
    prev: Option<f32>,
}

impl LinearResampler {
    pub fn new(src_rate: u32, dst_rate: u32) -> Self {
        Self {
            src_rate,
            dst_rate,
            step: src_rate as f64 / dst_rate as f64,
            pos: 0.0,
            prev: None,
        }
    }

    /// Resample one batch of mono samples.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }
        if self.src_rate == self.dst_rate {
            return input.to_vec();
        }

        let prev = self.prev;
        let lead = prev.is_some() as usize;
        let virtual_len = input.len() + lead;
        let sample_at = |i: usize| -> f32 {
            if i < lead {
                prev.unwrap_or(0.0)
            } else {
                input[i - lead]
            }
        };

        let mut out = Vec::with_capacity(input.len() * self.dst_rate as usize / self.src_rate as usize + 2);
        while (self.pos as usize) + 1 < virtual_len {
            let base = self.pos as usize;
            let frac = (self.pos - base as f64) as f32;
            out.push(sample_at(base) * (1.0 - frac) + sample_at(base + 1) * frac);
            self.pos += self.step;
        }

        // Keep the last input sample; rebase the position against it.
        self.pos -= (virtual_len - 1) as f64;
        self.prev = input.last().copied();
        out
    }
}
