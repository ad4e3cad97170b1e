//! Audio output backed by CPAL
//!
//! The output owns a monotonic audio clock (frames rendered / device rate)
//! and a small mixer of scheduled buffers. Buffers are rendered from their
//! absolute start frame; when one finishes, its id is reported through the
//! completion channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;

use crate::audio::pcm::DecodedAudio;
use crate::audio::AudioError;

/// Identifies one scheduled buffer
pub type SourceId = u64;

/// Sender half of the completion channel
pub type EndedSender = mpsc::UnboundedSender<SourceId>;

/// A playback clock plus the ability to start and stop buffers on it.
pub trait AudioOutput: Send + 'static {
    /// Current time on the output clock, in seconds
    fn now(&self) -> f64;
    /// Play `audio` starting at the absolute time `start_at`
    fn play(&self, id: SourceId, audio: DecodedAudio, start_at: f64);
    /// Stop a buffer immediately. Unknown ids are ignored.
    fn stop(&self, id: SourceId);
}

/// Opens an [`AudioOutput`] for one voice session.
pub trait Speaker: Send + Sync + 'static {
    fn open(&self, ended: EndedSender) -> Result<Box<dyn AudioOutput>, AudioError>;
}

#[derive(Debug)]
struct Voice {
    id: SourceId,
    start_frame: u64,
    audio: DecodedAudio,
}

/// Sums scheduled voices into interleaved output frames.
#[derive(Debug)]
pub struct Mixer {
    rate: u32,
    channels: usize,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(rate: u32, channels: u16) -> Self {
        Self {
            rate: rate.max(1),
            channels: channels.max(1) as usize,
            frames_rendered: 0,
            voices: Vec::new(),
        }
    }

    pub fn now(&self) -> f64 {
        self.frames_rendered as f64 / self.rate as f64
    }

    pub fn add(&mut self, id: SourceId, audio: DecodedAudio, start_at: f64) {
        let start_frame = (start_at.max(0.0) * self.rate as f64).round() as u64;
        self.voices.push(Voice {
            id,
            start_frame,
            audio,
        });
    }

    pub fn remove(&mut self, id: SourceId) {
        self.voices.retain(|v| v.id != id);
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Render interleaved frames into `out`; returns ids that finished.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<SourceId> {
        out.fill(0.0);
        let frames = out.len() / self.channels;
        let base = self.frames_rendered;

        for voice in &self.voices {
            let src_rate = voice.audio.sample_rate as u64;
            let src_len = voice.audio.frame_count() as u64;
            let src_channels = voice.audio.channels.len();
            if src_channels == 0 {
                continue;
            }

            for i in 0..frames {
                let abs = base + i as u64;
                if abs < voice.start_frame {
                    continue;
                }
                // Nearest-sample mapping from device frames to buffer frames
                let pos = (abs - voice.start_frame) * src_rate / self.rate as u64;
                if pos >= src_len {
                    break;
                }
                for ch in 0..self.channels {
                    out[i * self.channels + ch] += voice.audio.channels[ch % src_channels][pos as usize];
                }
            }
        }

        self.frames_rendered += frames as u64;
        let now_frame = self.frames_rendered;
        let rate = self.rate as u64;

        let mut finished = Vec::new();
        self.voices.retain(|v| {
            let len = v.audio.frame_count() as u64 * rate / (v.audio.sample_rate.max(1) as u64);
            let done = now_frame >= v.start_frame + len;
            if done {
                finished.push(v.id);
            }
            !done
        });
        finished
    }
}

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    match mixer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// [`AudioOutput`] on the default CPAL output device.
///
/// The stream lives on its own thread; dropping the output stops it.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    park: Option<(std_mpsc::Sender<()>, JoinHandle<()>)>,
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        lock(&self.mixer).now()
    }

    fn play(&self, id: SourceId, audio: DecodedAudio, start_at: f64) {
        lock(&self.mixer).add(id, audio, start_at);
    }

    fn stop(&self, id: SourceId) {
        lock(&self.mixer).remove(id);
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some((park_tx, thread)) = self.park.take() {
            let _ = park_tx.send(());
            if thread.join().is_err() {
                log::warn!("Playback: output thread panicked during shutdown");
            }
        }
    }
}

/// Speaker backed by the default CPAL output device
#[derive(Debug, Default)]
pub struct CpalSpeaker;

impl CpalSpeaker {
    pub fn new() -> Self {
        Self
    }
}

impl Speaker for CpalSpeaker {
    fn open(&self, ended: EndedSender) -> Result<Box<dyn AudioOutput>, AudioError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<Arc<Mutex<Mixer>>, AudioError>>();
        let (park_tx, park_rx) = std_mpsc::channel::<()>();
        let running = Arc::new(AtomicBool::new(true));

        let thread = std::thread::Builder::new()
            .name("dailyflow-playback".to_string())
            .spawn(move || {
                let (stream, mixer) = match build_output_stream(ended, running.clone()) {
                    Ok(parts) => parts,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(mixer));
                let _ = park_rx.recv();
                running.store(false, Ordering::SeqCst);
                drop(stream);
            })
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(mixer)) => Ok(Box::new(CpalOutput {
                mixer,
                park: Some((park_tx, thread)),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamCreationFailed(
                    "playback thread exited before the stream started".to_string(),
                ))
            }
        }
    }
}

fn build_output_stream(
    ended: EndedSender,
    running: Arc<AtomicBool>,
) -> Result<(Stream, Arc<Mutex<Mixer>>), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::StreamCreationFailed("No audio output device found".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;

    log::info!(
        "Playback: {:?} at {} Hz, {} channels, {:?}",
        device.name(),
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0, config.channels)));

    let stream = match sample_format {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, mixer.clone(), ended, running),
        SampleFormat::I16 => build_typed::<i16>(&device, &config, mixer.clone(), ended, running),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, mixer.clone(), ended, running),
        _ => Err(AudioError::NoSupportedConfig),
    }?;

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("Failed to start output: {}", e)))?;

    Ok((stream, mixer))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    ended: EndedSender,
    running: Arc<AtomicBool>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let err_fn = |err| log::error!("Playback: stream error: {}", err);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                let finished = if running.load(Ordering::SeqCst) {
                    lock(&mixer).render(&mut scratch)
                } else {
                    scratch.fill(0.0);
                    Vec::new()
                };

                for (out, &value) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(value.clamp(-1.0, 1.0));
                }
                for id in finished {
                    let _ = ended.send(id);
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

    fn mono(samples: Vec<f32>, rate: u32) -> DecodedAudio {
        DecodedAudio {
            channels: vec![samples],
            sample_rate: rate,
        }
    }

    #[test]
    fn test_clock_advances_with_rendered_frames() {
        let mut mixer = Mixer::new(100, 2);
        assert_eq!(mixer.now(), 0.0);
        let mut out = vec![0.0; 50 * 2];
        mixer.render(&mut out);
        assert_eq!(mixer.now(), 0.5);
    }

    #[test]
    fn test_voice_starts_at_scheduled_frame() {
        let mut mixer = Mixer::new(10, 1);
        mixer.add(7, mono(vec![0.5; 3], 10), 0.2);

        let mut out = vec![0.0; 6];
        let finished = mixer.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.0]);
        assert_eq!(finished, vec![7]);
        assert_eq!(mixer.voice_count(), 0);
    }

    #[test]
    fn test_back_to_back_voices_have_no_gap() {
        let mut mixer = Mixer::new(10, 1);
        mixer.add(1, mono(vec![0.1; 2], 10), 0.0);
        mixer.add(2, mono(vec![0.2; 2], 10), 0.2);

        let mut out = vec![0.0; 4];
        let finished = mixer.render(&mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(finished, vec![1, 2]);
    }

    #[test]
    fn test_voice_spans_render_calls() {
        let mut mixer = Mixer::new(10, 1);
        mixer.add(3, mono(vec![0.25; 4], 10), 0.0);

        let mut out = vec![0.0; 2];
        assert!(mixer.render(&mut out).is_empty());
        assert_eq!(out, vec![0.25, 0.25]);
        assert_eq!(mixer.render(&mut out), vec![3]);
    }

    #[test]
    fn test_stopped_voice_is_silent() {
        let mut mixer = Mixer::new(10, 1);
        mixer.add(1, mono(vec![0.5; 4], 10), 0.0);
        mixer.remove(1);

        let mut out = vec![0.0; 4];
        assert!(mixer.render(&mut out).is_empty());
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_upsamples_by_index_mapping() {
        // 5 Hz buffer on a 10 Hz device: each sample repeated twice
        let mut mixer = Mixer::new(10, 1);
        mixer.add(1, mono(vec![0.1, 0.2], 5), 0.0);

        let mut out = vec![0.0; 4];
        let finished = mixer.render(&mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
        assert_eq!(finished, vec![1]);
    }

    #[test]
    fn test_mono_voice_fills_every_output_channel() {
        let mut mixer = Mixer::new(10, 2);
        mixer.add(1, mono(vec![0.3], 10), 0.0);

        let mut out = vec![0.0; 2];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.3, 0.3]);
    }
}
