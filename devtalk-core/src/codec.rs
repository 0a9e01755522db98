//! PCM16 little-endian wire codec.
//!
//! ```text
//! AudioFrame (f32, [-1, 1]) ── encode ──► EncodedChunk { base64(PCM16 LE), "audio/pcm;rate=16000" }
//! base64 text ── decode ──► bytes ── decode_audio_samples ──► PlaybackSegment (f32, [-1, 1])
//! ```
//!
//! Everything here is pure: no I/O, no shared state.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::buffering::frame::AudioFrame;
use crate::error::{Result, TutorError};

/// Full-scale divisor for signed 16-bit PCM.
const PCM16_SCALE: f32 = 32_768.0;

/// One outbound capture frame in wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedChunk {
    /// Base64 of PCM16 LE samples.
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

impl EncodedChunk {
    /// Sample rate declared in the MIME tag, if present.
    pub fn declared_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|p| p.trim().strip_prefix("rate="))
            .find_map(|r| r.parse().ok())
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Convert f32 samples to PCM16 LE bytes, clamping to [-1, 1] first.
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let scaled = (s.clamp(-1.0, 1.0) * PCM16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32);
        out.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    out
}

/// Encode one capture frame into its wire chunk.
pub fn encode(frame: &AudioFrame) -> EncodedChunk {
    EncodedChunk {
        data: STANDARD.encode(samples_to_pcm16(&frame.samples)),
        mime_type: pcm_mime_type(frame.sample_rate),
    }
}

/// Inverse of the transport encoding step (base64 → raw bytes).
pub fn decode(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| TutorError::Decode(format!("invalid base64 payload: {e}")))
}

/// A decoded inbound audio buffer ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSegment {
    /// Interleaved samples in [-1, 1].
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl PlaybackSegment {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
        }
    }

    /// Mono segment of `duration` seconds of silence. Handy for tests and
    /// for priming the output.
    pub fn silence(duration: f64, sample_rate: u32) -> Self {
        let frames = (duration * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; frames], 1, sample_rate)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds on the playback clock.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn interleaved(&self) -> &[f32] {
        &self.samples
    }

    /// Samples of one channel, de-interleaved.
    pub fn channel_data(&self, channel: u16) -> Vec<f32> {
        let ch = self.channels as usize;
        self.samples
            .iter()
            .skip(channel as usize)
            .step_by(ch)
            .copied()
            .collect()
    }

    /// Mono mixdown (average of channels).
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }
        let ch = self.channels as usize;
        self.samples
            .chunks_exact(ch)
            .map(|f| f.iter().sum::<f32>() / ch as f32)
            .collect()
    }
}

/// Rebuild a float buffer from interleaved PCM16 LE bytes.
///
/// # Errors
/// `TutorError::Decode` when the byte length is not a whole number of
/// `channels`-wide 16-bit frames.
pub fn decode_audio_samples(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackSegment> {
    if channels == 0 {
        return Err(TutorError::Decode("channel count must be non-zero".into()));
    }
    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(TutorError::Decode(format!(
            "payload of {} bytes is not a multiple of {frame_bytes}-byte frames",
            bytes.len()
        )));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / PCM16_SCALE)
        .collect();
    Ok(PlaybackSegment::new(samples, channels, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn encode_then_decode_stays_within_quantization_error() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.9)
            .chain([1.0, -1.0, 0.0, 0.999_99, -0.5])
            .collect();
        let frame = AudioFrame::new(samples.clone(), 16_000);

        let chunk = encode(&frame);
        let bytes = decode(&chunk.data).expect("valid base64");
        let segment = decode_audio_samples(&bytes, 16_000, 1).expect("aligned payload");

        assert_eq!(segment.frames(), samples.len());
        for (orig, back) in samples.iter().zip(segment.interleaved()) {
            assert!(
                (orig - back).abs() <= 1.0 / 32_768.0 + f32::EPSILON,
                "orig={orig} back={back}"
            );
        }
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let bytes = samples_to_pcm16(&[2.0, -3.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
    }

    #[test]
    fn encode_writes_little_endian_and_mime_tag() {
        let chunk = encode(&AudioFrame::new(vec![0.5], 16_000));
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(chunk.declared_rate(), Some(16_000));
        let bytes = decode(&chunk.data).unwrap();
        assert_eq!(bytes, 16_384i16.to_le_bytes().to_vec());
    }

    #[test]
    fn decode_rejects_misaligned_payloads() {
        let err = decode_audio_samples(&[0, 1, 2], 24_000, 1).unwrap_err();
        assert!(matches!(err, TutorError::Decode(_)));

        let err = decode_audio_samples(&[0, 0, 0, 0, 0, 0], 24_000, 2).unwrap_err();
        assert!(matches!(err, TutorError::Decode(_)));

        assert!(decode("not base64!!").is_err());
    }

    #[test]
    fn stereo_payload_deinterleaves() {
        let mut bytes = Vec::new();
        for v in [16_384i16, -16_384, 0, 32_767] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let seg = decode_audio_samples(&bytes, 24_000, 2).unwrap();
        assert_eq!(seg.frames(), 2);
        assert_eq!(seg.channel_data(0), vec![0.5, 0.0]);
        assert_eq!(seg.channel_data(1), vec![-0.5, 32_767.0 / 32_768.0]);
        assert_abs_diff_eq!(seg.to_mono()[0], 0.0);
    }

    #[test]
    fn segment_duration_uses_frames_not_samples() {
        let seg = PlaybackSegment::silence(0.5, 24_000);
        assert_eq!(seg.frames(), 12_000);
        assert_abs_diff_eq!(seg.duration(), 0.5);
    }
}
