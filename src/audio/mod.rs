//! Audio capture and PCM framing for DailyFlow voice sessions
//!
//! Uses CPAL for microphone capture. Frames are 4096 samples of
//! 16 kHz mono PCM16.

pub mod capture;
pub mod pcm;

pub use capture::{
    AudioError, AudioFrame, CaptureHandle, CpalMicrophone, FrameChunker, Microphone,
    CAPTURE_SAMPLE_RATE, FRAME_SAMPLES,
};
pub use pcm::{DecodeError, DecodedAudio};
