//! Interview room: the one component that sequences session startup,
//! aggregates state inputs, and owns teardown.
//!
//! ## Startup protocol (strict order, each step awaited)
//!
//! 1. Connect the session socket and wait for `open`
//! 2. Acquire the recording device (the user-facing preview step)
//! 3. Start the recording channel
//! 4. Start the audio channel
//!
//! A failure at any step aborts startup, tears down what already
//! started, and leaves the presented state at `error`. Startup is
//! guarded by a has-started latch; a duplicate invocation is rejected.
//!
//! ## Teardown
//!
//! `leave` is best-effort and total: stop audio, stop recording (which
//! finalizes and uploads the artifact), close the socket, force-close
//! the gate, shut down playback. Each step is independently guarded, so
//! one failing step never skips the rest, and every step is a no-op on
//! an already-stopped resource.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::audio::{AudioChannel, ChunkSink, PlaybackDriver, PlaybackGate, PlaybackHandle};
use crate::config::Config;
use crate::error::SessionError;
use crate::recording::{
    MediaSource, MicWavSource, RecordingArtifact, RecordingChannel, RecordingStore,
};
use crate::session::socket::{SessionSocket, SocketEvent};
use crate::session::state::{SessionState, StateTracker};
use crate::session::wire::ClientMessage;

/// Watchdog poll period; the timeout itself comes from config.
const WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// Latest interview text, updated atomically per inbound message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    /// Most recent transcription of the user's speech.
    pub transcript: String,
    /// Most recent AI response text.
    pub response: String,
}

/// One interview session, from `start` to `leave`.
pub struct InterviewRoom {
    session_id: String,
    config: Config,
    tracker: Arc<StateTracker>,
    gate: PlaybackGate,
    playback: PlaybackDriver,
    conversation: Arc<Mutex<Conversation>>,
    awaiting_since: Arc<Mutex<Option<Instant>>>,
    socket: Option<Arc<SessionSocket>>,
    audio: Option<AudioChannel>,
    recording: RecordingChannel,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    started: bool,
}

impl InterviewRoom {
    pub fn new(config: Config, session_id: String) -> Self {
        let source = Box::new(MicWavSource::new(config.recording.chunk_interval_ms));
        Self::with_media_source(config, session_id, source)
    }

    /// Build a room around a caller-supplied recording source (a
    /// camera, a test double); `new` wires in the microphone source.
    pub fn with_media_source(
        config: Config,
        session_id: String,
        source: Box<dyn MediaSource>,
    ) -> Self {
        let gate = PlaybackGate::new();
        let playback = PlaybackDriver::new(gate.clone());
        let recording = RecordingChannel::new(
            source,
            RecordingStore::new(config.endpoints.http_base_url.clone()),
            session_id.clone(),
            config.recording.recording_type.clone(),
            std::path::PathBuf::from(&config.recording.output_dir),
        );
        Self {
            session_id,
            config,
            tracker: Arc::new(StateTracker::new()),
            gate,
            playback,
            conversation: Arc::new(Mutex::new(Conversation::default())),
            awaiting_since: Arc::new(Mutex::new(None)),
            socket: None,
            audio: None,
            recording,
            tasks: Vec::new(),
            started: false,
        }
    }

    /// Run the startup protocol; see module docs for the step order.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::AlreadyActive("interview room"));
        }
        self.started = true;
        tracing::info!(session_id = %self.session_id, "starting interview session");

        // Step 1: transport. A connect failure leaves connection_open
        // false, so the live projection reads `error`.
        let url = self.config.session_ws_url(&self.session_id);
        let (socket, event_rx) = match SessionSocket::connect(&url, self.session_id.clone()).await {
            Ok(pair) => pair,
            Err(e) => {
                self.tracker.begin();
                return Err(e);
            }
        };
        let socket = Arc::new(socket);
        self.socket = Some(Arc::clone(&socket));
        self.tracker.begin();
        self.tracker.update(|inputs| inputs.connection_open = true);

        // Step 2: acquire the recording device before anything records
        // or transmits. Permission problems surface here.
        if let Err(e) = self.recording.open() {
            self.abort_startup("recording device acquisition").await;
            return Err(e);
        }

        // Step 3: recording.
        if let Err(e) = self.recording.start() {
            self.abort_startup("recording start").await;
            return Err(e);
        }

        // Step 4: live audio.
        let sink = Arc::new(RoomSink {
            socket: Arc::clone(&socket),
            tracker: Arc::clone(&self.tracker),
            awaiting_since: Arc::clone(&self.awaiting_since),
        });
        let mut audio = AudioChannel::new(self.config.audio.clone(), self.gate.clone(), sink);
        if let Err(e) = audio.start().await {
            self.abort_startup("audio capture start").await;
            return Err(e);
        }
        self.audio = Some(audio);
        self.tracker.update(|inputs| inputs.capture_active = true);

        self.spawn_loops(event_rx);
        tracing::info!(session_id = %self.session_id, "interview session live");
        Ok(())
    }

    fn spawn_loops(&mut self, event_rx: mpsc::Receiver<SocketEvent>) {
        self.tasks.push(tokio::spawn(run_event_loop(
            event_rx,
            Arc::clone(&self.tracker),
            Arc::clone(&self.conversation),
            Arc::clone(&self.awaiting_since),
            self.playback.handle(),
            self.session_id.clone(),
        )));
        self.tasks.push(tokio::spawn(run_gate_mirror(
            self.gate.subscribe(),
            Arc::clone(&self.tracker),
        )));
        let timeout_secs = self.config.session.response_timeout_secs;
        if timeout_secs > 0 {
            self.tasks.push(tokio::spawn(run_watchdog(
                Arc::clone(&self.awaiting_since),
                Arc::clone(&self.tracker),
                Duration::from_secs(timeout_secs),
                self.session_id.clone(),
            )));
        }
    }

    /// Leave the interview. Safe from any state, idempotent.
    pub async fn leave(&mut self) {
        tracing::info!(session_id = %self.session_id, "leaving interview session");
        self.teardown().await;
    }

    async fn abort_startup(&mut self, step: &str) {
        tracing::error!(session_id = %self.session_id, step, "session startup aborted");
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
            self.tracker.update(|inputs| inputs.capture_active = false);
        }
        // Finalizes the artifact and attempts upload; never fails.
        self.recording.stop().await;
        if let Some(socket) = self.socket.take() {
            socket.close().await;
        }
        self.gate.force_close();
        self.playback.shutdown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        *self.awaiting_since.lock() = None;
        self.tracker.update(|inputs| {
            inputs.awaiting_response = false;
            inputs.playback_active = false;
            inputs.connection_open = false;
        });
    }

    pub fn state(&self) -> SessionState {
        self.tracker.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tracker.subscribe()
    }

    /// Snapshot of the latest transcript and response text.
    pub fn conversation(&self) -> Conversation {
        self.conversation.lock().clone()
    }

    /// The finalized local recording, available after `leave`.
    pub fn recording_artifact(&self) -> Option<RecordingArtifact> {
        self.recording.artifact()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for InterviewRoom {
    fn drop(&mut self) {
        // No async teardown here: device threads stop via their own
        // Drop impls, but the recording upload is skipped.
        if self.socket.is_some() {
            tracing::warn!(
                session_id = %self.session_id,
                "interview room dropped without leave, recording upload skipped"
            );
        }
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
        self.gate.force_close();
        self.playback.shutdown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

// ── Chunk sink ─────────────────────────────────────────────────────

/// Bridges the audio channel to the socket and flags `processing`.
struct RoomSink {
    socket: Arc<SessionSocket>,
    tracker: Arc<StateTracker>,
    awaiting_since: Arc<Mutex<Option<Instant>>>,
}

impl ChunkSink for RoomSink {
    fn submit(&self, chunk: ClientMessage) -> bool {
        let delivered = self.socket.submit_chunk(chunk);
        if delivered {
            let mut since = self.awaiting_since.lock();
            if since.is_none() {
                *since = Some(Instant::now());
                drop(since);
                self.tracker.update(|inputs| inputs.awaiting_response = true);
            }
        }
        delivered
    }
}

// ── Session loops ──────────────────────────────────────────────────

/// Applies inbound events: conversation text atomically, `processing`
/// cleared on response, audio replies queued for playback, transport
/// closure mirrored into the state inputs.
async fn run_event_loop(
    mut event_rx: mpsc::Receiver<SocketEvent>,
    tracker: Arc<StateTracker>,
    conversation: Arc<Mutex<Conversation>>,
    awaiting_since: Arc<Mutex<Option<Instant>>>,
    playback: PlaybackHandle,
    session_id: String,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            SocketEvent::Inbound(event) => {
                if event.is_empty() {
                    continue;
                }
                {
                    let mut convo = conversation.lock();
                    if let Some(transcription) = &event.transcription {
                        convo.transcript = transcription.clone();
                    }
                    if let Some(response) = &event.response {
                        convo.response = response.clone();
                    }
                }
                if event.response.is_some() {
                    *awaiting_since.lock() = None;
                    tracker.update(|inputs| inputs.awaiting_response = false);
                }
                match event.decode_audio() {
                    Some(Ok(wav)) => playback.play(wav),
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %session_id, error = %e, "undecodable audio reply, skipping");
                    }
                    None => {}
                }
            }
            SocketEvent::Closed { error } => {
                match error {
                    Some(error) => {
                        tracing::error!(session_id = %session_id, %error, "session transport lost");
                    }
                    None => {
                        tracing::info!(session_id = %session_id, "session transport closed");
                    }
                }
                tracker.update(|inputs| inputs.connection_open = false);
                break;
            }
        }
    }
}

/// Mirrors the playback gate into the `playback_active` state input.
async fn run_gate_mirror(mut gate_rx: watch::Receiver<bool>, tracker: Arc<StateTracker>) {
    while gate_rx.changed().await.is_ok() {
        let open = *gate_rx.borrow();
        tracker.update(|inputs| inputs.playback_active = open);
    }
}

/// Clears a stale `processing` state when the backend never answers.
async fn run_watchdog(
    awaiting_since: Arc<Mutex<Option<Instant>>>,
    tracker: Arc<StateTracker>,
    timeout: Duration,
    session_id: String,
) {
    let mut tick = tokio::time::interval(WATCHDOG_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let expired = {
            let mut since = awaiting_since.lock();
            match *since {
                Some(at) if at.elapsed() >= timeout => {
                    *since = None;
                    true
                }
                _ => false,
            }
        };
        if expired {
            tracing::warn!(
                session_id = %session_id,
                timeout_secs = timeout.as_secs(),
                "no response within timeout, clearing processing state"
            );
            tracker.update(|inputs| inputs.awaiting_response = false);
        }
    }
}
