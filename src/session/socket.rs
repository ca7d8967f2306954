//! Persistent WebSocket transport for one interview session.
//!
//! ## Protocol Overview
//!
//! 1. **Connect** — open the WebSocket at `{ws_base_url}/ws/{session_id}`
//! 2. **Stream** — send `audio_chunk` JSON frames, fire-and-forget;
//!    receive transcript/response/audio-reply events
//! 3. **Close** — one-way `connecting → open → closed`; `closed` is
//!    terminal, a new session needs a new instance
//!
//! Outbound audio rides a bounded channel drained by `outbound_loop`;
//! inbound frames are demultiplexed by `inbound_loop` into
//! [`SocketEvent`]s. A malformed inbound message is logged and skipped;
//! a transport error closes the session with no reconnect.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::audio::ChunkSink;
use crate::error::SessionError;
use crate::session::wire::{parse_server_event, ClientMessage, ServerEvent};

/// Outbound queue depth (~0.5 s of audio frames). Audio is a lossy
/// realtime stream: a slow link sheds fresh frames at the queue instead
/// of replaying seconds of stale audio when it recovers.
const OUTBOUND_DEPTH: usize = 16;

/// Inbound event queue depth.
const EVENT_DEPTH: usize = 64;

/// State of the session transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP/WS handshake in progress.
    Connecting,
    /// Ready to stream.
    Open,
    /// Terminal: closed gracefully or by a transport error.
    Closed,
}

/// Demultiplexed transport events, consumed by the room.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// One parsed inbound interview event.
    Inbound(ServerEvent),
    /// The connection ended; `error` is `None` on a clean close.
    Closed { error: Option<String> },
}

enum Outbound {
    Chunk(ClientMessage),
    Close,
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsSource = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Handle to one session transport. Created by [`SessionSocket::connect`];
/// events arrive on the receiver returned alongside it.
pub struct SessionSocket {
    outbound_tx: mpsc::Sender<Outbound>,
    state: Arc<SyncMutex<ConnectionState>>,
    session_id: String,
}

impl SessionSocket {
    /// Connect and start the transport loops.
    ///
    /// Returns once the WebSocket is open; entering `open` is the
    /// signal for the caller to continue session startup.
    pub async fn connect(
        url: &str,
        session_id: String,
    ) -> Result<(Self, mpsc::Receiver<SocketEvent>), SessionError> {
        tracing::info!(session_id = %session_id, %url, "connecting session socket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SessionError::Transport(format!("connect failed: {e}")))?;

        let (ws_sink, ws_source) = ws_stream.split();
        let ws_sink = Arc::new(Mutex::new(ws_sink));
        let state = Arc::new(SyncMutex::new(ConnectionState::Open));

        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_DEPTH);
        let (event_tx, event_rx) = mpsc::channel::<SocketEvent>(EVENT_DEPTH);

        let sink_out = Arc::clone(&ws_sink);
        let state_out = Arc::clone(&state);
        let sid_out = session_id.clone();
        tokio::spawn(async move {
            outbound_loop(outbound_rx, sink_out, state_out, sid_out).await;
        });

        let state_in = Arc::clone(&state);
        let sid_in = session_id.clone();
        tokio::spawn(async move {
            inbound_loop(ws_source, event_tx, state_in, sid_in).await;
        });

        tracing::info!(session_id = %session_id, "session socket open");
        Ok((
            Self {
                outbound_tx,
                state,
                session_id,
            },
            event_rx,
        ))
    }

    /// Hand one audio chunk to the transport, fire-and-forget.
    ///
    /// Returns `false` (with a logged drop) when the socket is not
    /// open or the outbound queue is full; never blocks, never queues
    /// beyond the bounded channel.
    pub fn submit_chunk(&self, chunk: ClientMessage) -> bool {
        if *self.state.lock() != ConnectionState::Open {
            tracing::debug!(session_id = %self.session_id, "chunk dropped: socket not open");
            return false;
        }
        match self.outbound_tx.try_send(Outbound::Chunk(chunk)) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(session_id = %self.session_id, "chunk dropped: outbound queue full");
                false
            }
        }
    }

    /// Close the transport gracefully. Idempotent.
    pub async fn close(&self) {
        if *self.state.lock() == ConnectionState::Closed {
            return;
        }
        let _ = self.outbound_tx.send(Outbound::Close).await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl ChunkSink for SessionSocket {
    fn submit(&self, chunk: ClientMessage) -> bool {
        self.submit_chunk(chunk)
    }
}

// ── Transport loops ────────────────────────────────────────────────

async fn outbound_loop(
    mut rx: mpsc::Receiver<Outbound>,
    ws_sink: Arc<Mutex<WsSink>>,
    state: Arc<SyncMutex<ConnectionState>>,
    session_id: String,
) {
    let mut chunk_count: u64 = 0;

    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Chunk(chunk) => {
                let json = match serde_json::to_string(&chunk) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "failed to serialize chunk");
                        continue;
                    }
                };
                chunk_count += 1;
                if chunk_count == 1 || chunk_count.is_multiple_of(50) {
                    tracing::info!(
                        session_id = %session_id,
                        chunk = chunk_count,
                        json_len = json.len(),
                        "sending audio chunk"
                    );
                }
                let mut sink = ws_sink.lock().await;
                if sink.send(WsMessage::Text(json.into())).await.is_err() {
                    tracing::warn!(session_id = %session_id, "send failed, closing outbound loop");
                    *state.lock() = ConnectionState::Closed;
                    break;
                }
            }
            Outbound::Close => {
                let mut sink = ws_sink.lock().await;
                let _ = sink.send(WsMessage::Close(None)).await;
                *state.lock() = ConnectionState::Closed;
                break;
            }
        }
    }
    tracing::debug!(session_id = %session_id, chunks = chunk_count, "outbound loop terminated");
}

async fn inbound_loop(
    mut ws_source: WsSource,
    event_tx: mpsc::Sender<SocketEvent>,
    state: Arc<SyncMutex<ConnectionState>>,
    session_id: String,
) {
    let mut event_count: u64 = 0;

    while let Some(msg_result) = ws_source.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => {
                // parse_server_event logs and returns None on malformed
                // input; one bad message never ends the session.
                let Some(event) = parse_server_event(text.as_str()) else {
                    continue;
                };
                event_count += 1;
                tracing::debug!(
                    session_id = %session_id,
                    n = event_count,
                    transcription = event.transcription.is_some(),
                    response = event.response.is_some(),
                    audio = event.audio_response.is_some(),
                    "inbound interview event"
                );
                if event_tx.send(SocketEvent::Inbound(event)).await.is_err() {
                    tracing::debug!(session_id = %session_id, "event receiver dropped, closing inbound loop");
                    return;
                }
            }
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(session_id = %session_id, close_frame = ?frame, "session socket closed by server");
                *state.lock() = ConnectionState::Closed;
                let _ = event_tx.send(SocketEvent::Closed { error: None }).await;
                break;
            }
            Ok(WsMessage::Binary(data)) => {
                tracing::warn!(session_id = %session_id, len = data.len(), "unexpected binary frame, skipping");
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {
                // Handled by tungstenite automatically
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "session socket transport error");
                *state.lock() = ConnectionState::Closed;
                let _ = event_tx
                    .send(SocketEvent::Closed {
                        error: Some(e.to_string()),
                    })
                    .await;
                break;
            }
        }
    }
    tracing::debug!(session_id = %session_id, events = event_count, "inbound loop terminated");
}
