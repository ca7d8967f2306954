//! PCM16 sample conversion and base64 payload encoding.
//!
//! Outbound frames travel as base64 over little-endian PCM16; float
//! samples are scaled by 32767 and rounded, so 1.0 maps to the signed
//! 16-bit maximum and -1.0 maps to -32767.

use base64::Engine;

/// Scale factor between normalized float samples and PCM16.
const PCM16_SCALE: f32 = 32767.0;

/// Convert normalized float samples to little-endian PCM16 bytes.
///
/// Inputs are clamped to [-1, 1] first; capture pipelines occasionally
/// deliver samples fractionally outside the nominal range.
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * PCM16_SCALE).round() as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert little-endian PCM16 bytes back to normalized floats.
///
/// A trailing odd byte (truncated sample) is ignored.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect()
}

/// Base64-encode a PCM byte buffer for the JSON envelope.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a base64 audio payload (outbound PCM16 or inbound WAV).
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data)
}
