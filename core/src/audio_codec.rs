//! mu-law (G.711) <-> linear PCM16 conversion and base64 framing.
//!
//! Pure functions, no allocation beyond the output buffer. Sample rate is fixed at 8 kHz,
//! 16-bit signed, mono — the telephony media-stream wire format never varies.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

const BIAS: i16 = 0x84;
const CLIP: i16 = 32635;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed base64 payload: {0}")]
    MalformedBase64(String),
}

/// Encode one linear PCM16 sample to its 8-bit mu-law byte.
///
/// Exact inverse of `ulaw_to_linear`: that function reconstructs
/// `((mantissa << 3) + BIAS) << exponent - BIAS`, so here `exponent` is the biased
/// magnitude's MSB position minus 7 (BIAS's own MSB sits at bit 7) and `mantissa` is
/// read back off that same segment.
fn linear_to_ulaw(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x80u8 } else { 0x00u8 };
    let magnitude = if sample < 0 {
        -(sample as i32)
    } else {
        sample as i32
    };
    let magnitude = magnitude.min(CLIP as i32);
    let biased = magnitude + BIAS as i32;

    let msb = 31 - biased.leading_zeros() as i32;
    let exponent = (msb - 7).clamp(0, 7);
    let mantissa = (((biased >> exponent) - BIAS as i32) >> 3).clamp(0, 15) as u8;

    let byte = sign | ((exponent as u8) << 4) | mantissa;
    !byte
}

/// Decode one mu-law byte back to a linear PCM16 sample.
fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0f;
    let mut sample = ((mantissa as i16) << 3) + BIAS;
    sample <<= exponent;
    sample -= BIAS;
    if sign != 0 {
        -sample
    } else {
        sample
    }
}

/// Reverse base64 then mu-law companding: wire payload -> mono 16-bit PCM samples.
pub fn decode(frame_payload: &str) -> Result<Vec<i16>, CodecError> {
    let bytes = STANDARD
        .decode(frame_payload)
        .map_err(|e| CodecError::MalformedBase64(e.to_string()))?;
    Ok(bytes.into_iter().map(ulaw_to_linear).collect())
}

/// mu-law companding then base64: mono 16-bit PCM samples -> wire payload.
pub fn encode(pcm16: &[i16]) -> String {
    let bytes: Vec<u8> = pcm16.iter().copied().map(linear_to_ulaw).collect();
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_malformed_base64() {
        let result = decode("not valid base64!!");
        assert!(result.is_err());
    }

    #[test]
    fn round_trip_is_lossy_but_bounded() {
        let samples: Vec<i16> = vec![0, 100, -100, 5000, -5000, 32000, -32000];
        let encoded = encode(&samples);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (original, round_tripped) in samples.iter().zip(decoded.iter()) {
            let error = (*original as i32 - *round_tripped as i32).abs();
            // mu-law quantization error grows with amplitude; bound generously.
            assert!(error <= (original.abs() as i32 / 16) + 64, "error {error} too large for {original}");
        }
    }

    #[test]
    fn decode_encode_is_idempotent_after_one_pass() {
        let samples: Vec<i16> = vec![12345, -12345, 1, -1, 0];
        let once = decode(&encode(&samples)).unwrap();
        let twice = decode(&encode(&once)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn silence_round_trips_exactly() {
        let samples = vec![0i16; 160];
        let decoded = decode(&encode(&samples)).unwrap();
        assert_eq!(decoded, samples);
    }
}
