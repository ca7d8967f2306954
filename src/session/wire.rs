//! Wire format for the interview session socket.
//!
//! Outbound (client → server), one JSON object per frame:
//!
//! ```text
//! {"type": "audio_chunk", "audio_data": "<base64 PCM16LE>", "sample_rate": 16000, "chunk_size": 512}
//! ```
//!
//! Inbound (server → client), all fields optional but at least one
//! expected; fields arriving together belong to one atomic update:
//!
//! ```text
//! {"transcription": "<text>", "response": "<text>", "audio_response": "<base64 WAV>"}
//! ```

use serde::{Deserialize, Serialize};

use crate::audio::codec;
use crate::audio::framer::AudioFrame;
use crate::config::FRAME_SIZE;

// ── Outbound ───────────────────────────────────────────────────────

/// Messages sent from the client to the inference server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// One 32 ms frame of microphone audio, fire-and-forget.
    #[serde(rename = "audio_chunk")]
    AudioChunk {
        /// Base64 over the little-endian PCM16 byte buffer.
        audio_data: String,
        sample_rate: u32,
        chunk_size: usize,
    },
}

impl ClientMessage {
    /// Encode one captured frame into its wire envelope.
    pub fn audio_chunk(frame: &AudioFrame) -> Self {
        let pcm = codec::f32_to_pcm16_bytes(frame.samples());
        Self::AudioChunk {
            audio_data: codec::encode_base64(&pcm),
            sample_rate: frame.sample_rate(),
            chunk_size: FRAME_SIZE,
        }
    }
}

// ── Inbound ────────────────────────────────────────────────────────

/// One inbound interview event.
///
/// `transcription` and `response` are textual state updates;
/// `audio_response` (if present) triggers playback of an AI speech
/// reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerEvent {
    pub transcription: Option<String>,
    pub response: Option<String>,
    /// Base64-encoded WAV bytes.
    pub audio_response: Option<String>,
}

impl ServerEvent {
    /// Whether the event carries anything at all.
    pub fn is_empty(&self) -> bool {
        self.transcription.is_none() && self.response.is_none() && self.audio_response.is_none()
    }

    /// Decode the audio reply, if present.
    pub fn decode_audio(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.audio_response.as_deref().map(codec::decode_base64)
    }
}

/// Parse one inbound text frame.
///
/// Returns `None` on malformed JSON — a single bad message is logged
/// and skipped by the caller, never fatal to the session.
pub fn parse_server_event(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, len = text.len(), "malformed inbound message, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn frame_of(value: f32) -> AudioFrame {
        AudioFrame::from_samples(vec![value; FRAME_SIZE]).unwrap()
    }

    #[test]
    fn audio_chunk_wire_shape() {
        let msg = ClientMessage::audio_chunk(&frame_of(0.0));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"audio_chunk\""));
        assert!(json.contains("\"audio_data\""));
        assert!(json.contains("\"sample_rate\":16000"));
        assert!(json.contains("\"chunk_size\":512"));
    }

    #[test]
    fn audio_chunk_payload_is_pcm16_base64() {
        let msg = ClientMessage::audio_chunk(&frame_of(1.0));
        let ClientMessage::AudioChunk { audio_data, .. } = msg;
        let pcm = base64::engine::general_purpose::STANDARD
            .decode(audio_data)
            .unwrap();
        assert_eq!(pcm.len(), FRAME_SIZE * 2);
        // full-scale float maps to the signed 16-bit maximum
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 32767);
    }

    #[test]
    fn parse_full_event() {
        let event = parse_server_event(
            r#"{"transcription": "hello", "response": "hi there", "audio_response": "AAEC"}"#,
        )
        .unwrap();
        assert_eq!(event.transcription.as_deref(), Some("hello"));
        assert_eq!(event.response.as_deref(), Some("hi there"));
        assert_eq!(event.decode_audio().unwrap().unwrap(), vec![0u8, 1, 2]);
    }

    #[test]
    fn parse_partial_event() {
        let event = parse_server_event(r#"{"transcription": "partial words"}"#).unwrap();
        assert_eq!(event.transcription.as_deref(), Some("partial words"));
        assert!(event.response.is_none());
        assert!(event.decode_audio().is_none());
    }

    #[test]
    fn parse_tolerates_unknown_fields() {
        let event = parse_server_event(r#"{"response": "ok", "turn_id": 7}"#).unwrap();
        assert_eq!(event.response.as_deref(), Some("ok"));
    }

    #[test]
    fn malformed_json_yields_none() {
        assert!(parse_server_event("not json at all").is_none());
        assert!(parse_server_event("").is_none());
        assert!(parse_server_event("[1,2,3]").is_none());
    }

    #[test]
    fn empty_object_is_empty_event() {
        let event = parse_server_event("{}").unwrap();
        assert!(event.is_empty());
    }

    #[test]
    fn bad_audio_base64_surfaces_decode_error() {
        let event = parse_server_event(r#"{"audio_response": "!!!not-base64!!!"}"#).unwrap();
        assert!(event.decode_audio().unwrap().is_err());
    }
}
