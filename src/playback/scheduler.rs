//! Gapless playback scheduling
//!
//! Inbound audio fragments arrive as discrete network messages with arbitrary
//! delivery jitter. The scheduler lays them end to end on the output's audio
//! clock so that playback has no gaps and no overlap:
//!
//! ```text
//! start = max(now, next_start_time)
//! next_start_time = start + frames / sample_rate
//! ```
//!
//! An interruption stops everything in flight and resets the cursor to zero,
//! so the next fragment establishes a fresh baseline at "now".

use std::collections::BTreeMap;

use super::output::{AudioOutput, SourceId};
use crate::audio::pcm::{decode_pcm16, DecodeError};

/// A buffer that has been handed to the output with an absolute start time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Absolute start on the output clock, in seconds
    pub start_at: f64,
    /// Buffer duration in seconds
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Schedules decoded fragments back to back on an [`AudioOutput`].
///
/// Owns the clock cursor and the set of in-flight sources; nothing else
/// mutates either.
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    next_start_time: f64,
    active: BTreeMap<SourceId, ScheduledSource>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Decode a PCM16 fragment and schedule it right after the previous one.
    ///
    /// On a decode error nothing is scheduled and the cursor is untouched.
    pub fn on_audio_fragment(
        &mut self,
        bytes: &[u8],
        sample_rate: u32,
        channels: u16,
    ) -> Result<ScheduledSource, DecodeError> {
        let audio = decode_pcm16(bytes, sample_rate, channels)?;

        let start_at = self.next_start_time.max(self.output.now());
        let source = ScheduledSource {
            id: self.next_id,
            start_at,
            duration: audio.duration_secs(),
        };
        self.next_id += 1;

        self.output.play(source.id, audio, start_at);
        self.next_start_time = source.end_at();
        self.active.insert(source.id, source);

        log::debug!(
            "Playback: scheduled source {} at {:.3}s for {:.3}s ({} in flight)",
            source.id,
            source.start_at,
            source.duration,
            self.active.len()
        );

        Ok(source)
    }

    /// Stop every in-flight source and reset the clock cursor.
    pub fn on_interrupted(&mut self) {
        if !self.active.is_empty() {
            log::info!("Playback: interrupted, stopping {} sources", self.active.len());
        }
        for id in self.active.keys() {
            self.output.stop(*id);
        }
        self.active.clear();
        self.next_start_time = 0.0;
    }

    /// Completion callback: forget a source that finished playing.
    pub fn on_source_ended(&mut self, id: SourceId) {
        self.active.remove(&id);
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_tracking(&self, id: SourceId) -> bool {
        self.active.contains_key(&id)
    }
}
