//! Playback of streamed model audio
//!
//! ```text
//! InboundFragment::Audio ──▶ PlaybackScheduler ──▶ AudioOutput (CPAL mixer)
//!                               │  start = max(now, cursor)      │
//!                               ◀──────── ended(SourceId) ───────┘
//! ```

mod output;
mod scheduler;

pub use output::{AudioOutput, CpalOutput, CpalSpeaker, EndedSender, Mixer, SourceId, Speaker};
pub use scheduler::{PlaybackScheduler, ScheduledSource};
