//! Linear PCM framing helpers
//!
//! Outbound audio is 16-bit signed little-endian PCM, quantised from the
//! capture device's floating samples. Inbound audio uses the same byte layout,
//! possibly interleaved over several channels.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Scale factor between floating samples in [-1, 1] and 16-bit PCM.
pub const PCM_SCALE: f32 = 32768.0;

/// Errors produced while decoding an inbound PCM payload
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("PCM payload has odd length ({0} bytes)")]
    OddLength(usize),
    #[error("{samples} samples do not divide into {channels} channels")]
    ChannelMismatch { samples: usize, channels: u16 },
    #[error("invalid audio format ({sample_rate} Hz, {channels} channels)")]
    InvalidFormat { sample_rate: u32, channels: u16 },
    #[error("invalid base64 audio payload: {0}")]
    Base64(String),
}

/// Quantise one floating sample to 16-bit PCM.
///
/// Multiplies by 32768 and truncates toward zero. The float-to-int cast
/// saturates, so exactly `1.0` lands on `i16::MAX`.
pub fn quantize(sample: f32) -> i16 {
    (sample * PCM_SCALE) as i16
}

/// Convert one 16-bit PCM sample back to a floating sample.
pub fn dequantize(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

/// Quantise a whole buffer of floating samples.
pub fn quantize_all(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| quantize(s)).collect()
}

/// Serialise PCM samples as little-endian bytes.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
}

/// Encode PCM samples into the transport-safe base64 form.
pub fn encode_base64(samples: &[i16]) -> String {
    STANDARD.encode(to_le_bytes(samples))
}

/// Decode a base64 payload into raw bytes.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(data)
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// A decoded audio buffer, one sample vector per channel
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Number of frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Decode raw little-endian 16-bit PCM into per-channel floating buffers,
/// de-interleaving when `channels > 1`.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<DecodedAudio, DecodeError> {
    if sample_rate == 0 || channels == 0 {
        return Err(DecodeError::InvalidFormat {
            sample_rate,
            channels,
        });
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    let samples = bytes.len() / 2;
    let channel_count = channels as usize;
    if samples % channel_count != 0 {
        return Err(DecodeError::ChannelMismatch { samples, channels });
    }

    let frame_count = samples / channel_count;
    let mut out: Vec<Vec<f32>> = (0..channel_count)
        .map(|_| Vec::with_capacity(frame_count))
        .collect();

    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channel_count].push(dequantize(value));
    }

    Ok(DecodedAudio {
        channels: out,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_truncates() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5), 16384);
        assert_eq!(quantize(-0.5), -16384);
        assert_eq!(quantize(-1.0), i16::MIN);
        // 1.0 * 32768 saturates
        assert_eq!(quantize(1.0), i16::MAX);
        // 0.00002 * 32768 = 0.65 -> truncated to 0
        assert_eq!(quantize(0.00002), 0);
    }

    #[test]
    fn test_quantize_roundtrip_within_one_step() {
        let step = 1.0 / PCM_SCALE;
        let mut x = -1.0f32;
        while x <= 1.0 {
            let back = dequantize(quantize(x));
            assert!(
                (back - x).abs() <= step + f32::EPSILON,
                "sample {} came back as {}",
                x,
                back
            );
            x += 0.000_37;
        }
        assert!((dequantize(quantize(1.0)) - 1.0).abs() <= step);
    }

    #[test]
    fn test_silent_frame_encodes_to_zero_bytes() {
        let frame = quantize_all(&[0.0f32; 4096]);
        let bytes = to_le_bytes(&frame);
        assert_eq!(bytes.len(), 8192);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_bytes_decode_to_silence() {
        let decoded = decode_pcm16(&[0u8; 8192], 24000, 1).unwrap();
        assert_eq!(decoded.channels.len(), 1);
        assert_eq!(decoded.frame_count(), 4096);
        assert!(decoded.channels[0].iter().all(|&s| s == 0.0));
        assert!((decoded.duration_secs() - 4096.0 / 24000.0).abs() < 1e-12);
    }

    #[test]
    fn test_decode_deinterleaves_stereo() {
        let bytes = to_le_bytes(&[100, -100, 200, -200]);
        let decoded = decode_pcm16(&bytes, 24000, 2).unwrap();
        assert_eq!(decoded.frame_count(), 2);
        assert_eq!(decoded.channels[0], vec![dequantize(100), dequantize(200)]);
        assert_eq!(decoded.channels[1], vec![dequantize(-100), dequantize(-200)]);
    }

    #[test]
    fn test_decode_sizes_every_channel_up_front() {
        let bytes = to_le_bytes(&[1, 2, 3, 4, 5, 6]);
        let decoded = decode_pcm16(&bytes, 24000, 2).unwrap();
        // Growth by push would have rounded the later channels up to 4
        for channel in &decoded.channels {
            assert_eq!(channel.len(), 3);
            assert_eq!(channel.capacity(), 3);
        }
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert_eq!(decode_pcm16(&[0u8; 3], 24000, 1), Err(DecodeError::OddLength(3)));
        assert!(matches!(
            decode_pcm16(&[0u8; 6], 24000, 2),
            Err(DecodeError::ChannelMismatch { samples: 3, channels: 2 })
        ));
        assert!(matches!(
            decode_pcm16(&[0u8; 4], 0, 1),
            Err(DecodeError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_base64_is_little_endian() {
        let encoded = encode_base64(&[0x1234, 0x5678]);
        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, vec![0x34, 0x12, 0x78, 0x56]);
        assert!(decode_base64("not base64!").is_err());
    }
}
