use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::live::LiveConfig;
use crate::mentor::prompts::voice_instruction;
use crate::model::Language;
use crate::store::{write_atomic, StoreError};

const SETTINGS_FILE_NAME: &str = "settings.json";

/// Keys accepted by [`AppSettings::set`], in file order
pub const SETTING_KEYS: &[&str] = &[
    "live_model",
    "voice_name",
    "default_language",
    "live_endpoint",
    "connect_timeout_secs",
    "setup_timeout_secs",
    "max_session_secs",
    "mentor_model",
    "strategy_model",
];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Unknown setting '{0}' (expected one of: {keys})", keys = SETTING_KEYS.join(", "))]
    UnknownKey(String),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
    #[error("Serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Write(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Model used for realtime voice sessions.
    pub live_model: String,

    /// Prebuilt voice the mentor speaks with.
    pub voice_name: String,

    /// Language used when none is given on the command line.
    pub default_language: Language,

    /// Live API WebSocket endpoint.
    pub live_endpoint: String,

    /// Give up on opening the WebSocket after this many seconds.
    pub connect_timeout_secs: u64,

    /// Give up waiting for `setupComplete` after this many seconds.
    pub setup_timeout_secs: u64,

    /// Stop an active voice session after this many seconds. 0 disables the limit.
    pub max_session_secs: u64,

    /// Model for routine mentorship and weekly reports.
    pub mentor_model: String,

    /// Model for grounded strategic advice.
    pub strategy_model: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            live_model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            voice_name: "Puck".to_string(),
            default_language: Language::En,
            live_endpoint: crate::live::LIVE_API_URL.to_string(),
            connect_timeout_secs: 10,
            setup_timeout_secs: 5,
            max_session_secs: 0,
            mentor_model: "gemini-3-flash-preview".to_string(),
            strategy_model: "gemini-3-pro-preview".to_string(),
        }
    }
}

impl AppSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs.max(1))
    }

    pub fn max_session(&self) -> Option<Duration> {
        (self.max_session_secs > 0).then(|| Duration::from_secs(self.max_session_secs))
    }

    /// Live session parameters for a mentor conversation in `language`
    pub fn live_config(&self, api_key: &str, language: Language) -> LiveConfig {
        let mut config = LiveConfig::new(api_key, self.live_model.as_str());
        config.endpoint = self.live_endpoint.clone();
        config.voice_name = self.voice_name.clone();
        config.system_instruction = voice_instruction(language);
        config.connect_timeout = self.connect_timeout();
        config.setup_timeout = self.setup_timeout();
        config
    }

    /// Change one setting from its textual form
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = |message: String| SettingsError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let seconds = |value: &str| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|e| invalid(format!("'{}' is not a number of seconds ({})", value, e)))
        };
        let text = |value: &str| {
            let value = value.trim();
            if value.is_empty() {
                Err(invalid("must not be empty".to_string()))
            } else {
                Ok(value.to_string())
            }
        };

        match key {
            "live_model" => self.live_model = text(value)?,
            "voice_name" => self.voice_name = text(value)?,
            "default_language" => self.default_language = value.parse().map_err(invalid)?,
            "live_endpoint" => {
                let endpoint = text(value)?;
                if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
                    return Err(invalid("expected a ws:// or wss:// URL".to_string()));
                }
                self.live_endpoint = endpoint;
            }
            "connect_timeout_secs" => self.connect_timeout_secs = seconds(value)?,
            "setup_timeout_secs" => self.setup_timeout_secs = seconds(value)?,
            "max_session_secs" => self.max_session_secs = seconds(value)?,
            "mentor_model" => self.mentor_model = text(value)?,
            "strategy_model" => self.strategy_model = text(value)?,
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

pub fn settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir()
        .ok_or(SettingsError::NoConfigDir)?
        .join("dailyflow");
    Ok(dir.join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> AppSettings {
    match settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            AppSettings::default()
        }
    }
}

pub fn load_settings_from(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

/// Replace the settings file at `path`, atomically
pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    let contents = serde_json::to_string_pretty(settings)?;
    write_atomic(path, &contents)?;
    log::info!("Settings: saved to {:?}", path);
    Ok(())
}

/// Load the file at `path`, change `key` and save it back.
///
/// Nothing is written when the key or value is rejected.
pub fn update_setting_at(path: &Path, key: &str, value: &str) -> Result<AppSettings, SettingsError> {
    let mut settings = load_settings_from(path);
    settings.set(key, value)?;
    save_settings_to(path, &settings)?;
    Ok(settings)
}
