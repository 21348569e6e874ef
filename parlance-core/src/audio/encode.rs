//! PCM16 ↔ base64 chunk codec.
//!
//! The service consumes 16-bit little-endian PCM wrapped in base64. The f32
//! → i16 mapping is asymmetric on purpose (negative full scale is -0x8000,
//! positive is 0x7fff), matching the service's expected quantization.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::{ParlanceError, Result};

/// Convert one normalized f32 sample to a 16-bit PCM sample.
pub fn sample_to_pcm16(sample: f32) -> i16 {
    let scaled = if sample < 0.0 {
        sample * 0x8000 as f32
    } else {
        sample * 0x7fff as f32
    };
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode a PCM16 buffer as base64 over little-endian bytes.
pub fn encode_chunk(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode a base64 chunk back into PCM16 samples.
pub fn decode_chunk(chunk: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD
        .decode(chunk)
        .map_err(|e| ParlanceError::InvalidPacket(format!("bad audio chunk encoding: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(ParlanceError::InvalidPacket(
            "audio chunk has odd byte length".into(),
        ));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
