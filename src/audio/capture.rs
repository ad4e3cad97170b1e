//! Microphone capture using CPAL
//!
//! The capture pipeline turns the default input device into a stream of
//! fixed-size [`AudioFrame`]s (4096 samples of 16 kHz mono PCM16). Frames are
//! handed to the voice session with a non-blocking `try_send` straight from the
//! audio callback, so capture and transmission stay coupled.
//!
//! # Threading
//!
//! ```text
//! Capture Thread (sync)                        Voice loop (async)
//! ┌──────────────────────────────┐             ┌──────────────────┐
//! │ CPAL callback                │             │ frames_rx.recv() │
//! │  ├─ mix to mono              │──channel──▶ │  └─ session.send │
//! │  ├─ downsample to 16 kHz     │             └──────────────────┘
//! │  └─ FrameChunker (4096)      │
//! └──────────────────────────────┘
//! ```
//!
//! CPAL streams are not `Send` on every platform, so the stream is created and
//! dropped on a dedicated thread. [`CaptureHandle`] only holds atomics and the
//! channel used to park that thread, which keeps it `Send`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;

use super::pcm::quantize_all;

/// Capture sample rate sent to the live model
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Samples per outbound frame
pub const FRAME_SAMPLES: usize = 4096;

/// Errors that can occur while acquiring the microphone.
///
/// Every variant means the microphone is unavailable for this session;
/// the voice session treats them all as a permission failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,
    #[error("No supported audio configuration")]
    NoSupportedConfig,
    #[error("Failed to create audio stream: {0}")]
    StreamCreationFailed(String),
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),
}

/// One fixed-size chunk of captured PCM16 audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Mono PCM16 samples at `sample_rate`
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Monotonically increasing within one capture
    pub sequence: u64,
}

impl AudioFrame {
    /// Transport MIME type, e.g. `audio/pcm;rate=16000`
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Duration of this frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Size of the resampler's input blocks, in device frames
const RESAMPLE_CHUNK: usize = 1024;

/// How device-rate mono samples become target-rate samples
enum RateConversion {
    /// Average every `ratio` samples (device rate is an integer multiple)
    Average {
        ratio: usize,
        window_sum: f32,
        window_len: usize,
    },
    /// FFT resampling for any other pair of rates
    Resample {
        resampler: Box<FftFixedIn<f32>>,
        input: Vec<f32>,
    },
}

/// Accumulates device samples into fixed-size [`AudioFrame`]s.
///
/// Input is interleaved device audio; it is mixed down to mono and converted
/// to the target rate. Integer multiples are averaged down; other rates
/// (44.1 kHz, or anything slower than the target) go through `rubato`.
pub struct FrameChunker {
    source_channels: usize,
    conversion: RateConversion,
    target_rate: u32,
    frame_samples: usize,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameChunker {
    pub fn new(
        source_rate: u32,
        source_channels: u16,
        target_rate: u32,
        frame_samples: usize,
    ) -> Result<Self, AudioError> {
        if source_rate == 0 || target_rate == 0 {
            log::warn!(
                "Capture: invalid sample rate (source: {}, target: {})",
                source_rate,
                target_rate
            );
            return Err(AudioError::NoSupportedConfig);
        }

        let conversion = if source_rate % target_rate == 0 {
            RateConversion::Average {
                ratio: (source_rate / target_rate) as usize,
                window_sum: 0.0,
                window_len: 0,
            }
        } else {
            log::info!("Capture: resampling {} Hz to {} Hz", source_rate, target_rate);
            let resampler = FftFixedIn::<f32>::new(
                source_rate as usize,
                target_rate as usize,
                RESAMPLE_CHUNK,
                2,
                1,
            )
            .map_err(|e| AudioError::StreamCreationFailed(format!("Resampler: {}", e)))?;
            RateConversion::Resample {
                resampler: Box::new(resampler),
                input: Vec::with_capacity(RESAMPLE_CHUNK * 2),
            }
        };

        Ok(Self {
            source_channels: source_channels.max(1) as usize,
            conversion,
            target_rate,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            next_sequence: 0,
        })
    }

    /// Feed interleaved device samples; returns every frame completed by them.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<AudioFrame> {
        let mono = interleaved
            .chunks(self.source_channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32);

        match &mut self.conversion {
            RateConversion::Average {
                ratio,
                window_sum,
                window_len,
            } => {
                for sample in mono {
                    *window_sum += sample;
                    *window_len += 1;
                    if *window_len == *ratio {
                        self.pending.push(*window_sum / *ratio as f32);
                        *window_sum = 0.0;
                        *window_len = 0;
                    }
                }
            }
            RateConversion::Resample { resampler, input } => {
                input.extend(mono);
                loop {
                    let needed = resampler.input_frames_next();
                    if input.len() < needed {
                        break;
                    }
                    let block: Vec<f32> = input.drain(..needed).collect();
                    match resampler.process(&[block], None) {
                        Ok(mut out) => {
                            if let Some(channel) = out.pop() {
                                self.pending.extend(channel);
                            }
                        }
                        Err(e) => log::warn!("Capture: resampling failed, block dropped: {}", e),
                    }
                }
            }
        }

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let chunk: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            frames.push(AudioFrame {
                samples: quantize_all(&chunk),
                sample_rate: self.target_rate,
                sequence: self.next_sequence,
            });
            self.next_sequence += 1;
        }
        frames
    }

    /// Samples waiting for the next full frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Handle to an acquired microphone.
///
/// Frames flow only while streaming is enabled. `stop()` is idempotent and
/// takes effect before it returns; dropping the handle also stops capture.
pub struct CaptureHandle {
    streaming: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    park: Option<(std_mpsc::Sender<()>, JoinHandle<()>)>,
}

impl CaptureHandle {
    /// Handle with no backing thread. Used by microphone implementations that
    /// deliver frames themselves (and by tests).
    pub fn detached(streaming: Arc<AtomicBool>, stopped: Arc<AtomicBool>) -> Self {
        Self {
            streaming,
            stopped,
            park: None,
        }
    }

    /// Start (or pause) delivering frames.
    pub fn set_streaming(&self, on: bool) {
        if !self.stopped.load(Ordering::SeqCst) {
            self.streaming.store(on, Ordering::SeqCst);
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Halt capture and release the device.
    pub fn stop(&mut self) {
        self.streaming.store(false, Ordering::SeqCst);
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some((park_tx, thread)) = self.park.take() {
            let _ = park_tx.send(());
            if thread.join().is_err() {
                log::warn!("Capture: audio thread panicked during shutdown");
            }
        }
        log::info!("Capture: stopped");
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Source of microphone audio.
///
/// Opening the microphone is the permission step: on success frames go to
/// `frames` once the handle starts streaming.
pub trait Microphone: Send + Sync + 'static {
    fn open(&self, frames: mpsc::Sender<AudioFrame>) -> Result<CaptureHandle, AudioError>;
}

/// Microphone backed by the default CPAL input device
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn open(&self, frames: mpsc::Sender<AudioFrame>) -> Result<CaptureHandle, AudioError> {
        let streaming = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();
        let (park_tx, park_rx) = std_mpsc::channel::<()>();

        let thread_streaming = streaming.clone();
        let thread = std::thread::Builder::new()
            .name("dailyflow-capture".to_string())
            .spawn(move || {
                let stream = match build_capture_stream(frames, thread_streaming) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Parked until stop() or the handle is dropped
                let _ = park_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(CaptureHandle {
                streaming,
                stopped,
                park: Some((park_tx, thread)),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamCreationFailed(
                    "capture thread exited before the stream started".to_string(),
                ))
            }
        }
    }
}

fn build_capture_stream(
    frames: mpsc::Sender<AudioFrame>,
    streaming: Arc<AtomicBool>,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("Capture: using input device {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;

    log::info!(
        "Capture: {} Hz, {} channels, {:?}",
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let chunker = FrameChunker::new(
        config.sample_rate.0,
        config.channels,
        CAPTURE_SAMPLE_RATE,
        FRAME_SAMPLES,
    )?;

    let stream = match sample_format {
        SampleFormat::I16 => build_typed::<i16>(&device, &config, chunker, frames, streaming),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, chunker, frames, streaming),
        SampleFormat::F32 => build_typed::<f32>(&device, &config, chunker, frames, streaming),
        _ => Err(AudioError::NoSupportedConfig),
    }?;

    stream
        .play()
        .map_err(|e| AudioError::PermissionDenied(format!("Failed to start stream: {}", e)))?;

    Ok(stream)
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut chunker: FrameChunker,
    frames: mpsc::Sender<AudioFrame>,
    streaming: Arc<AtomicBool>,
) -> Result<Stream, AudioError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let err_fn = |err| log::error!("Capture: stream error: {}", err);
    let mut scratch: Vec<f32> = Vec::new();
    let mut dropped: u64 = 0;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !streaming.load(Ordering::SeqCst) {
                    return;
                }

                scratch.clear();
                scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));

                for frame in chunker.push(&scratch) {
                    if frames.try_send(frame).is_err() {
                        dropped += 1;
                        if dropped % 50 == 1 {
                            log::warn!("Capture: frame channel full, {} frames dropped", dropped);
                        }
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_emits_fixed_frames() {
        let mut chunker = FrameChunker::new(16000, 1, 16000, FRAME_SAMPLES).unwrap();

        assert!(chunker.push(&vec![0.0; 4000]).is_empty());
        let frames = chunker.push(&vec![0.0; 4000]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples.len(), FRAME_SAMPLES);
        assert_eq!(frames[0].sample_rate, 16000);
        assert_eq!(chunker.pending_len(), 8000 - FRAME_SAMPLES);
    }

    #[test]
    fn test_chunker_sequence_numbers() {
        let mut chunker = FrameChunker::new(16000, 1, 16000, 4).unwrap();
        let frames = chunker.push(&[0.0; 12]);
        let seqs: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_chunker_mixes_and_downsamples() {
        // 48kHz stereo -> 16kHz mono, 3:1
        let mut chunker = FrameChunker::new(48000, 2, 16000, 2).unwrap();
        let input = [
            0.5, 0.5, 0.5, 0.5, 0.5, 0.5, // window 1: mono 0.5
            0.0, 0.5, 0.0, 0.5, 0.0, 0.5, // window 2: mono 0.25
        ];
        let frames = chunker.push(&input);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![16384, 8192]);
    }

    #[test]
    fn test_chunker_carries_partial_windows() {
        let mut chunker = FrameChunker::new(32000, 1, 16000, 2).unwrap();
        assert!(chunker.push(&[0.5]).is_empty());
        assert!(chunker.push(&[0.5, 0.25]).is_empty());
        let frames = chunker.push(&[0.25]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![16384, 8192]);
    }

    /// Total 16 kHz samples produced so far, emitted or pending
    fn produced(chunker: &FrameChunker, frames: &[AudioFrame]) -> usize {
        frames.iter().map(|f| f.samples.len()).sum::<usize>() + chunker.pending_len()
    }

    #[test]
    fn test_chunker_resamples_44100_to_16000() {
        let mut chunker = FrameChunker::new(44100, 1, 16000, FRAME_SAMPLES).unwrap();
        let one_second: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let frames = chunker.push(&one_second);

        assert!(frames.iter().all(|f| f.sample_rate == 16000));
        // One second in is at most one second out, minus the resampler's
        // buffered block
        let produced = produced(&chunker, &frames);
        assert!(produced <= 16000, "produced {}", produced);
        assert!(produced >= 16000 - 1024, "produced {}", produced);
        let claimed_ms: u64 = frames.iter().map(|f| f.duration_ms()).sum();
        assert!(claimed_ms <= 1000);
    }

    #[test]
    fn test_chunker_upsamples_slow_devices() {
        let mut chunker = FrameChunker::new(8000, 2, 16000, FRAME_SAMPLES).unwrap();
        let frames = chunker.push(&vec![0.25; 8000 * 2]);
        let produced = produced(&chunker, &frames);
        assert!(produced <= 16000, "produced {}", produced);
        assert!(produced >= 16000 - 2 * 1024, "produced {}", produced);
    }

    #[test]
    fn test_chunker_rejects_zero_rate() {
        assert!(matches!(
            FrameChunker::new(0, 1, 16000, FRAME_SAMPLES),
            Err(AudioError::NoSupportedConfig)
        ));
    }

    #[test]
    fn test_frame_mime_type_and_duration() {
        let frame = AudioFrame {
            samples: vec![0; FRAME_SAMPLES],
            sample_rate: CAPTURE_SAMPLE_RATE,
            sequence: 0,
        };
        assert_eq!(frame.mime_type(), "audio/pcm;rate=16000");
        assert_eq!(frame.duration_ms(), 256);
    }

    #[test]
    fn test_detached_handle_stop_is_idempotent() {
        let streaming = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let mut handle = CaptureHandle::detached(streaming.clone(), stopped.clone());

        handle.set_streaming(true);
        assert!(streaming.load(Ordering::SeqCst));

        handle.stop();
        handle.stop();
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!streaming.load(Ordering::SeqCst));

        // Stopped handles cannot be restarted
        handle.set_streaming(true);
        assert!(!handle.is_streaming());
    }
}
