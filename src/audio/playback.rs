//! Audio reply playback driver.
//!
//! `rodio::OutputStream` is not `Send`, so playback runs on its own
//! thread behind a command channel. The driver owns every transition of
//! the [`PlaybackGate`]: open immediately before a reply starts,
//! generation-checked close on completion or error, force-close on
//! shutdown.
//!
//! A new reply arriving mid-playback replaces the in-flight one: the
//! old sink is stopped and its gate window superseded, so a late
//! completion of the replaced playback can never close the gate under
//! the new one.
//!
//! Hosts without an output device run in null mode: each play opens the
//! gate and closes it immediately, so the rest of the session behaves
//! identically on headless machines.

use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::gate::{GateGeneration, PlaybackGate};

/// Completion poll period while a reply is audible.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

enum PlaybackCommand {
    /// Play one WAV-encoded reply, replacing any in-flight playback.
    Play { wav: Vec<u8> },
    Shutdown,
}

/// Handle to the playback thread.
pub struct PlaybackDriver {
    cmd_tx: std_mpsc::Sender<PlaybackCommand>,
    thread: Option<JoinHandle<()>>,
    gate: PlaybackGate,
}

impl PlaybackDriver {
    /// Spawn the playback thread.
    ///
    /// Missing output devices are not an error; see module docs.
    pub fn new(gate: PlaybackGate) -> Self {
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let thread_gate = gate.clone();
        let thread = std::thread::spawn(move || {
            run_playback_thread(cmd_rx, thread_gate);
        });
        Self {
            cmd_tx,
            thread: Some(thread),
            gate,
        }
    }

    /// Queue one WAV reply for playback. Non-blocking; the gate opens
    /// on the playback thread just before audio starts.
    pub fn play(&self, wav: Vec<u8>) {
        if self.cmd_tx.send(PlaybackCommand::Play { wav }).is_err() {
            tracing::warn!("playback thread gone, dropping audio reply");
        }
    }

    /// Clonable sender for queuing replies from other tasks.
    pub fn handle(&self) -> PlaybackHandle {
        PlaybackHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Stop playback and join the thread. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.cmd_tx.send(PlaybackCommand::Shutdown);
        let _ = thread.join();
        // The thread force-closes on exit; repeat here in case it
        // panicked between opening the gate and its cleanup.
        self.gate.force_close();
        tracing::debug!("playback driver shut down");
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Detached sender half of a [`PlaybackDriver`].
#[derive(Clone)]
pub struct PlaybackHandle {
    cmd_tx: std_mpsc::Sender<PlaybackCommand>,
}

impl PlaybackHandle {
    pub fn play(&self, wav: Vec<u8>) {
        if self.cmd_tx.send(PlaybackCommand::Play { wav }).is_err() {
            tracing::warn!("playback thread gone, dropping audio reply");
        }
    }
}

// ── Playback thread ────────────────────────────────────────────────

fn run_playback_thread(cmd_rx: std_mpsc::Receiver<PlaybackCommand>, gate: PlaybackGate) {
    // Keep the OutputStream alive for the thread's lifetime; sinks are
    // created per reply so a replaced playback cannot bleed into the
    // next one.
    let output = rodio::OutputStream::try_default();
    let handle = match &output {
        Ok((_stream, handle)) => Some(handle.clone()),
        Err(e) => {
            tracing::warn!(error = %e, "no audio output device, running null playback");
            None
        }
    };

    let mut current: Option<(rodio::Sink, GateGeneration)> = None;

    loop {
        let cmd = if current.is_some() {
            match cmd_rx.recv_timeout(POLL_INTERVAL) {
                Ok(cmd) => Some(cmd),
                Err(std_mpsc::RecvTimeoutError::Timeout) => None,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => Some(PlaybackCommand::Shutdown),
            }
        } else {
            match cmd_rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => Some(PlaybackCommand::Shutdown),
            }
        };

        match cmd {
            Some(PlaybackCommand::Play { wav }) => {
                if let Some((old_sink, _superseded)) = current.take() {
                    tracing::info!("replacing in-flight playback");
                    old_sink.stop();
                }
                let token = gate.open();
                match start_playback(handle.as_ref(), wav) {
                    Ok(Some(sink)) => {
                        current = Some((sink, token));
                    }
                    Ok(None) => {
                        // Null mode: pretend the reply finished instantly.
                        gate.close(token);
                    }
                    Err(message) => {
                        tracing::warn!(%message, "playback failed, reopening transmission");
                        gate.close(token);
                    }
                }
            }
            Some(PlaybackCommand::Shutdown) => {
                if let Some((sink, _)) = current.take() {
                    sink.stop();
                }
                gate.force_close();
                break;
            }
            None => {
                // Completion poll.
                if let Some((sink, token)) = &current {
                    if sink.empty() {
                        gate.close(*token);
                        tracing::info!("playback complete");
                        current = None;
                    }
                }
            }
        }
    }
    tracing::debug!("playback thread terminated");
}

/// Decode and start one WAV reply. `Ok(None)` means null mode.
fn start_playback(
    handle: Option<&rodio::OutputStreamHandle>,
    wav: Vec<u8>,
) -> Result<Option<rodio::Sink>, String> {
    let Some(handle) = handle else {
        return Ok(None);
    };
    let bytes = wav.len();
    let source = rodio::Decoder::new(Cursor::new(wav)).map_err(|e| format!("decode: {e}"))?;
    let sink = rodio::Sink::try_new(handle).map_err(|e| format!("sink: {e}"))?;
    sink.append(source);
    tracing::info!(bytes, "playing audio reply");
    Ok(Some(sink))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_closed(gate: &PlaybackGate) -> bool {
        for _ in 0..200 {
            if !gate.is_open() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn bad_payload_never_leaves_gate_stuck() {
        // Whether this host has an output device or not, an undecodable
        // reply must end with the gate closed and the driver usable.
        let gate = PlaybackGate::new();
        let mut driver = PlaybackDriver::new(gate.clone());
        driver.play(vec![0u8, 1, 2, 3]);
        assert!(wait_closed(&gate), "gate stuck open after bad payload");
        driver.play(vec![9u8; 16]);
        assert!(wait_closed(&gate));
        driver.shutdown();
    }

    #[test]
    fn shutdown_force_closes_gate() {
        let gate = PlaybackGate::new();
        let mut driver = PlaybackDriver::new(gate.clone());
        gate.open();
        driver.shutdown();
        assert!(!gate.is_open());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let gate = PlaybackGate::new();
        let mut driver = PlaybackDriver::new(gate);
        driver.shutdown();
        driver.shutdown();
        // play after shutdown is a logged no-op
        driver.play(vec![1, 2, 3]);
    }
}
