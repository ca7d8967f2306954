//! Media sources for the session recording.
//!
//! The recording pipeline is source-agnostic: anything that can acquire
//! a device, emit encoded chunks at a bounded cadence, and assemble the
//! chunks into one artifact can back a
//! [`RecordingChannel`](crate::recording::RecordingChannel). The bundled
//! [`MicWavSource`] records the session microphone into a WAV artifact.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::codec::f32_to_pcm16_bytes;
use crate::audio::framer::{downmix_to_mono, LinearResampler};
use crate::config::SAMPLE_RATE;
use crate::error::SessionError;

/// One local media capture feeding the recording channel.
///
/// Lifecycle: `open` (device acquisition, shown to the user as the
/// preview step) → `start` (chunks begin flowing) → `stop` (flush and
/// release). `stop` is a defensive no-op on an idle source.
pub trait MediaSource: Send {
    /// File extension of the finalized container.
    fn container_ext(&self) -> &'static str;

    /// Acquire the capture device(s) without starting the encoder.
    fn open(&mut self) -> Result<(), SessionError>;

    /// Begin emitting encoded chunks (~1 s cadence) into `chunk_tx`.
    /// Dropping all chunk receivers stops emission.
    fn start(&mut self, chunk_tx: mpsc::Sender<Vec<u8>>) -> Result<(), SessionError>;

    /// Stop the encoder, flush any partial chunk, release the device.
    fn stop(&mut self);

    /// Concatenate accumulated chunks into one immutable artifact.
    fn finalize(&self, chunks: &[Vec<u8>]) -> Result<Vec<u8>, SessionError>;
}

// ── Microphone WAV source ──────────────────────────────────────────

/// Records the default input device as 16 kHz mono PCM16, chunked at a
/// fixed interval, finalized as a single WAV file.
pub struct MicWavSource {
    chunk_interval_ms: u64,
    device: Option<cpal::Device>,
    running: Option<Running>,
}

struct Running {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl MicWavSource {
    pub fn new(chunk_interval_ms: u64) -> Self {
        Self {
            chunk_interval_ms,
            device: None,
            running: None,
        }
    }
}

impl MediaSource for MicWavSource {
    fn container_ext(&self) -> &'static str {
        "wav"
    }

    fn open(&mut self) -> Result<(), SessionError> {
        if self.device.is_some() {
            return Ok(());
        }
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            SessionError::DeviceUnavailable("no input device for recording".to_string())
        })?;
        tracing::info!(
            device = device.name().unwrap_or_else(|_| "<unknown>".to_string()),
            "recording device acquired"
        );
        self.device = Some(device);
        Ok(())
    }

    fn start(&mut self, chunk_tx: mpsc::Sender<Vec<u8>>) -> Result<(), SessionError> {
        if self.running.is_some() {
            return Err(SessionError::AlreadyActive("recording source"));
        }
        if self.device.is_none() {
            self.open()?;
        }
        let Some(device) = self.device.take() else {
            return Err(SessionError::DeviceUnavailable(
                "recording device lost".to_string(),
            ));
        };

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), SessionError>>();
        let chunk_interval_ms = self.chunk_interval_ms;
        let thread = std::thread::spawn(move || {
            run_recording_thread(device, chunk_interval_ms, chunk_tx, ready_tx, stop_rx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.running = Some(Running { stop_tx, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SessionError::DeviceUnavailable(
                    "recording thread exited during startup".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.stop_tx.send(());
        let _ = running.thread.join();
        tracing::info!("recording source stopped");
    }

    fn finalize(&self, chunks: &[Vec<u8>]) -> Result<Vec<u8>, SessionError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| SessionError::Recording(format!("wav header: {e}")))?;
            for chunk in chunks {
                for pair in chunk.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                        .map_err(|e| SessionError::Recording(format!("wav sample: {e}")))?;
                }
            }
            writer
                .finalize()
                .map_err(|e| SessionError::Recording(format!("wav finalize: {e}")))?;
        }
        Ok(cursor.into_inner())
    }
}

impl Drop for MicWavSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Recording thread ───────────────────────────────────────────────

fn run_recording_thread(
    device: cpal::Device,
    chunk_interval_ms: u64,
    chunk_tx: mpsc::Sender<Vec<u8>>,
    ready_tx: std_mpsc::Sender<Result<(), SessionError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    use cpal::Sample;

    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(e.to_string())));
            return;
        }
    };
    let channels = supported.channels();
    let src_rate = supported.sample_rate().0;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    // Raw batches cross from the device callback to this thread; the
    // callback itself never touches the chunk channel.
    let (sample_tx, sample_rx) = std_mpsc::channel::<Vec<f32>>();
    let mut resampler = LinearResampler::new(src_rate, SAMPLE_RATE);

    let err_fn = |err| {
        tracing::error!(error = %err, "recording stream error");
    };

    let built = match sample_format {
        SampleFormat::F32 => {
            let tx = sample_tx.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(data.to_vec());
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let tx = sample_tx.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(data.iter().map(|&s| s.to_float_sample()).collect());
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let tx = sample_tx.clone();
            device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(data.iter().map(|&s| s.to_float_sample()).collect());
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(format!(
                "unsupported sample format {other:?}"
            ))));
            return;
        }
    };
    drop(sample_tx);

    let stream = match built {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(SessionError::DeviceUnavailable(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    let chunk_bytes = (SAMPLE_RATE as u64 * chunk_interval_ms / 1000) as usize * 2;
    let mut assembly: Vec<u8> = Vec::with_capacity(chunk_bytes);
    let mut chunk_count: u64 = 0;

    loop {
        // Check for a stop request between sample batches.
        match stop_rx.try_recv() {
            Ok(()) | Err(std_mpsc::TryRecvError::Disconnected) => break,
            Err(std_mpsc::TryRecvError::Empty) => {}
        }
        let batch = match sample_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(batch) => batch,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        };
        let mono = downmix_to_mono(&batch, channels);
        assembly.extend_from_slice(&f32_to_pcm16_bytes(&resampler.process(&mono)));
        while assembly.len() >= chunk_bytes {
            let chunk: Vec<u8> = assembly.drain(..chunk_bytes).collect();
            chunk_count += 1;
            if chunk_count == 1 || chunk_count.is_multiple_of(30) {
                tracing::debug!(chunk = chunk_count, bytes = chunk.len(), "recording chunk");
            }
            if chunk_tx.blocking_send(chunk).is_err() {
                tracing::debug!("chunk receiver dropped, stopping recording thread");
                return;
            }
        }
    }

    // Flush the partial tail so the artifact covers the whole session.
    if !assembly.is_empty() {
        let _ = chunk_tx.blocking_send(assembly);
    }
    tracing::debug!(chunks = chunk_count, "recording thread terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_assembles_a_valid_wav() {
        let source = MicWavSource::new(1_000);
        let chunks = vec![
            f32_to_pcm16_bytes(&[0.5_f32; 1600]),
            f32_to_pcm16_bytes(&[-0.5_f32; 1600]),
        ];
        let wav = source.finalize(&chunks).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte canonical header plus both chunks' PCM payload.
        assert_eq!(wav.len(), 44 + 2 * 1600 * 2);

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 3200);
    }

    #[test]
    fn finalize_empty_recording_is_a_header_only_wav() {
        let source = MicWavSource::new(1_000);
        let wav = source.finalize(&[]).unwrap();
        assert_eq!(wav.len(), 44);
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let mut source = MicWavSource::new(1_000);
        source.stop();
        source.stop();
    }

    #[test]
    fn container_ext_is_wav() {
        assert_eq!(MicWavSource::new(500).container_ext(), "wav");
    }

    #[test]
    fn unsigned_samples_normalize_like_signed_ones() {
        use cpal::Sample;

        // U16 devices feed the same pipeline as I16/F32: midpoint is
        // silence, the extremes reach full scale.
        assert!(32768u16.to_float_sample().abs() < 1e-4);
        assert!((0u16.to_float_sample() - -1.0).abs() < 1e-4);
        assert!((65535u16.to_float_sample() - 1.0).abs() < 1e-3);
        assert_eq!(0i16.to_float_sample(), 0.0);
    }
}
