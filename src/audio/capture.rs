//! Microphone capture channel for the interview audio path.
//!
//! `cpal::Stream` is not `Send`, so the device and its stream live on a
//! dedicated capture thread; startup errors travel back over a oneshot
//! and frames cross into async land over a bounded channel. The channel
//! is lossy on purpose: realtime audio that cannot be forwarded now is
//! stale and must not be transmitted later.
//!
//! Two framer drivers feed the shared pipeline
//! (downmix → resample to 16 kHz → 512-sample frames):
//!
//! - `Callback`: the whole pipeline runs inside the device callback.
//! - `Interval`: the callback only appends resampled samples to a
//!   buffer; a periodic task frames and forwards them. Fallback for
//!   hosts whose callbacks must stay minimal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use parking_lot::Mutex;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::audio::framer::{downmix_to_mono, AudioFrame, FrameAccumulator, LinearResampler};
use crate::audio::gate::PlaybackGate;
use crate::config::{AudioConfig, FramerKind, SAMPLE_RATE};
use crate::error::SessionError;
use crate::session::wire::ClientMessage;

/// Depth of the frame queue between the capture thread and the forward
/// task (~1 s of audio). Overflow drops the newest frame.
const FRAME_QUEUE_DEPTH: usize = 32;

/// Consumer of encoded audio chunks, normally the session socket.
///
/// Returns whether the chunk was accepted; `false` means it was dropped
/// at the sink (e.g. socket not open). Either way the caller moves on.
pub trait ChunkSink: Send + Sync {
    fn submit(&self, chunk: ClientMessage) -> bool;
}

// ── Channel ────────────────────────────────────────────────────────

/// Owns the microphone and streams encoded frames into a [`ChunkSink`],
/// suppressed while the [`PlaybackGate`] is open.
pub struct AudioChannel {
    config: AudioConfig,
    gate: PlaybackGate,
    sink: Arc<dyn ChunkSink>,
    active: Option<Active>,
}

struct Active {
    stop_tx: std_mpsc::Sender<()>,
    capture_thread: JoinHandle<()>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl AudioChannel {
    pub fn new(config: AudioConfig, gate: PlaybackGate, sink: Arc<dyn ChunkSink>) -> Self {
        Self {
            config,
            gate,
            sink,
            active: None,
        }
    }

    /// Acquire the microphone and begin emitting frames.
    ///
    /// Fails with [`SessionError::AlreadyActive`] on a second start, and
    /// with `PermissionDenied`/`DeviceUnavailable` if the platform
    /// declines or no input device exists.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive("audio channel"));
        }

        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(FRAME_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), SessionError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let pending = Arc::new(Mutex::new(Vec::<f32>::new()));
        let driver = match self.config.framer {
            FramerKind::Callback => FramerDriver::Callback {
                tx: frame_tx.clone(),
            },
            FramerKind::Interval => FramerDriver::Interval {
                pending: Arc::clone(&pending),
            },
        };

        let capture_thread = std::thread::spawn(move || {
            run_capture_thread(driver, ready_tx, stop_rx);
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = capture_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = capture_thread.join();
                return Err(SessionError::DeviceUnavailable(
                    "capture thread exited during startup".to_string(),
                ));
            }
        }

        let mut tasks = Vec::new();
        if self.config.framer == FramerKind::Interval {
            let tx = frame_tx.clone();
            let interval_ms = self.config.interval_ms;
            tasks.push(tokio::spawn(interval_drain_loop(pending, tx, interval_ms)));
        }
        drop(frame_tx);

        let gate = self.gate.clone();
        let sink = Arc::clone(&self.sink);
        tasks.push(tokio::spawn(forward_frames(frame_rx, gate, sink)));

        self.active = Some(Active {
            stop_tx,
            capture_thread,
            tasks,
        });
        tracing::info!(framer = ?self.config.framer, "audio channel started");
        Ok(())
    }

    /// Release the microphone and stop all forwarding.
    ///
    /// Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            tracing::debug!("audio channel already stopped");
            return;
        };
        let _ = active.stop_tx.send(());
        let _ = active.capture_thread.join();
        for task in active.tasks {
            task.abort();
        }
        tracing::info!("audio channel stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for AudioChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Forwarding ─────────────────────────────────────────────────────

/// Drain frames from the capture side, drop while the gate is open,
/// otherwise encode and submit.
async fn forward_frames(
    mut rx: mpsc::Receiver<AudioFrame>,
    gate: PlaybackGate,
    sink: Arc<dyn ChunkSink>,
) {
    let mut sent: u64 = 0;
    let mut gated: u64 = 0;
    let mut refused: u64 = 0;

    while let Some(frame) = rx.recv().await {
        if gate.is_open() {
            gated += 1;
            if gated == 1 || gated.is_multiple_of(50) {
                tracing::debug!(gated, "frame dropped: playback in progress");
            }
            continue;
        }
        if sink.submit(ClientMessage::audio_chunk(&frame)) {
            sent += 1;
            if sent == 1 || sent.is_multiple_of(50) {
                tracing::info!(sent, gated, refused, "forwarding audio chunks");
            }
        } else {
            refused += 1;
            if refused == 1 || refused.is_multiple_of(50) {
                tracing::debug!(refused, "frame dropped: sink refused");
            }
        }
    }
    tracing::debug!(sent, gated, refused, "audio forward loop terminated");
}

/// Interval framer: periodically drain buffered samples into frames.
async fn interval_drain_loop(
    pending: Arc<Mutex<Vec<f32>>>,
    tx: mpsc::Sender<AudioFrame>,
    interval_ms: u64,
) {
    let mut accumulator = FrameAccumulator::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        ticker.tick().await;
        let batch = std::mem::take(&mut *pending.lock());
        if batch.is_empty() {
            continue;
        }
        for frame in accumulator.push(&batch) {
            if tx.try_send(frame).is_err() {
                tracing::trace!("frame queue full, dropping");
            }
        }
    }
}

// ── Capture thread ─────────────────────────────────────────────────

enum FramerDriver {
    Callback { tx: mpsc::Sender<AudioFrame> },
    Interval { pending: Arc<Mutex<Vec<f32>>> },
}

/// Per-callback pipeline state, owned by the device callback closure.
struct CallbackState {
    channels: u16,
    resampler: LinearResampler,
    accumulator: FrameAccumulator,
    driver: FramerDriver,
}

impl CallbackState {
    fn process(&mut self, interleaved: &[f32]) {
        let mono = downmix_to_mono(interleaved, self.channels);
        let resampled = self.resampler.process(&mono);
        match &self.driver {
            FramerDriver::Callback { tx } => {
                for frame in self.accumulator.push(&resampled) {
                    if tx.try_send(frame).is_err() {
                        // Queue full: the consumer is behind, shed load.
                    }
                }
            }
            FramerDriver::Interval { pending } => {
                pending.lock().extend_from_slice(&resampled);
            }
        }
    }
}

fn run_capture_thread(
    driver: FramerDriver,
    ready_tx: oneshot::Sender<Result<(), SessionError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    use cpal::Sample;

    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(
            "no input device".to_string(),
        )));
        return;
    };
    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(classify_capture_error(e.to_string())));
            return;
        }
    };

    let channels = supported.channels();
    let src_rate = supported.sample_rate().0;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    tracing::info!(
        device = device.name().unwrap_or_else(|_| "<unknown>".to_string()),
        src_rate,
        channels,
        ?sample_format,
        "input device acquired"
    );

    let mut state = CallbackState {
        channels,
        resampler: LinearResampler::new(src_rate, SAMPLE_RATE),
        accumulator: FrameAccumulator::new(),
        driver,
    };

    let err_fn = |err| {
        tracing::error!(error = %err, "input stream error");
    };

    let built = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                state.process(data);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| s.to_float_sample()).collect();
                state.process(&floats);
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| s.to_float_sample()).collect();
                state.process(&floats);
            },
            err_fn,
            None,
        ),
        other => {
            let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            ))));
            return;
        }
    };

    let stream = match built {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(classify_capture_error(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(classify_capture_error(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Park until told to stop; the stream drops with this frame.
    loop {
        match stop_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
        }
    }
    tracing::debug!("capture thread terminated");
}

/// Map a device-layer error message onto the session taxonomy.
///
/// cpal reports platform permission refusals as backend-specific
/// strings, so classification is by message content.
fn classify_capture_error(message: String) -> SessionError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        SessionError::PermissionDenied(message)
    } else {
        SessionError::DeviceUnavailable(message)
    }
}
