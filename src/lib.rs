//! DailyFlow habit mentor
//!
//! Realtime spoken conversations with the mentor (microphone in, model speech
//! out) plus text coaching over the user's tasks, habits and check-ins.

pub mod audio;
pub mod live;
pub mod mentor;
pub mod model;
pub mod playback;
pub mod settings;
pub mod state_machine;
pub mod store;
pub mod voice;

pub use model::{AppState, DailyCheckIn, Language};
pub use settings::AppSettings;
pub use voice::{VoiceBackend, VoiceHandle, VoiceSnapshot, VoiceStatus};
