use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dailyflow::audio::CpalMicrophone;
use dailyflow::live::{self, GeminiConnector};
use dailyflow::mentor::MentorClient;
use dailyflow::playback::CpalSpeaker;
use dailyflow::settings::{self, load_settings, AppSettings};
use dailyflow::store::StateStore;
use dailyflow::{DailyCheckIn, Language, VoiceBackend, VoiceHandle, VoiceSnapshot, VoiceStatus};

#[derive(Debug, Parser)]
#[command(name = "dailyflow", version, about = "DailyFlow habit mentor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Talk to the mentor. Ctrl-C ends the session.
    Voice {
        /// Conversation language (en or pt)
        #[arg(long)]
        language: Option<Language>,
    },
    /// Text coaching from the mentor
    Mentor {
        /// Response language (en or pt)
        #[arg(long)]
        language: Option<Language>,
        #[command(subcommand)]
        action: MentorAction,
    },
    /// Record today's energy and mood
    Checkin {
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
        energy: u8,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
        mood: u8,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show or change saved settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    /// Print the settings file location and current values
    Show,
    /// Change one setting, e.g. `settings set voice_name Kore`
    Set { key: String, value: String },
}

#[derive(Debug, Subcommand)]
enum MentorAction {
    /// Adjust today's routine to current energy and mood
    Routine {
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3), requires = "mood")]
        energy: Option<u8>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3), requires = "energy")]
        mood: Option<u8>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Three insights on the past week
    Report,
    /// Deep strategic analysis
    Strategy,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (for development convenience)
    // Silently ignore if not found - production uses system env vars
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Both ring and aws-lc may be linked; TLS needs one chosen explicitly
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let settings = load_settings();

    let result = match cli.command {
        Command::Voice { language } => {
            run_voice(settings.clone(), language.unwrap_or(settings.default_language)).await
        }
        Command::Mentor { language, action } => run_mentor(&settings, language, action).await,
        Command::Checkin { energy, mood, note } => run_checkin(energy, mood, note),
        Command::Settings { action } => run_settings(&settings, action),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_voice(settings: AppSettings, language: Language) -> Result<(), String> {
    let api_key = live::get_api_key().unwrap_or_default();
    let backend = VoiceBackend {
        microphone: Arc::new(CpalMicrophone::new()),
        speaker: Arc::new(CpalSpeaker::new()),
        connector: Arc::new(GeminiConnector::new()),
    };

    let handle = VoiceHandle::spawn(backend, settings, api_key);
    let mut updates = handle.subscribe();
    handle.start(language).await.map_err(|e| e.to_string())?;
    println!("Connecting to the mentor ({})...", language.code());

    let mut printed = 0usize;
    let mut last_status = VoiceStatus::Idle;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.stop().await.map_err(|e| e.to_string())?;
                println!();
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    return Err("voice loop ended unexpectedly".to_string());
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.status != last_status {
                    last_status = snapshot.status;
                    if snapshot.status == VoiceStatus::Active {
                        println!("Listening. Press Ctrl-C to stop.");
                    }
                }
                printed = print_transcript(&snapshot, printed);
                if snapshot.status == VoiceStatus::Closed {
                    println!();
                    return match snapshot.error {
                        Some(e) => Err(e),
                        None => Ok(()),
                    };
                }
            }
        }
    }
}

/// Print the part of the transcript not shown yet; returns the new offset
fn print_transcript(snapshot: &VoiceSnapshot, printed: usize) -> usize {
    let transcript = &snapshot.transcript;
    let start = if printed <= transcript.len() && transcript.is_char_boundary(printed) {
        printed
    } else {
        0
    };
    if start < transcript.len() {
        print!("{}", &transcript[start..]);
        let _ = std::io::stdout().flush();
    }
    transcript.len()
}

async fn run_mentor(
    settings: &AppSettings,
    language: Option<Language>,
    action: MentorAction,
) -> Result<(), String> {
    let store = StateStore::open_default().map_err(|e| e.to_string())?;
    let mut state = store.load();
    let language = language.unwrap_or(state.language);
    let client = MentorClient::new(live::get_api_key(), settings).map_err(|e| e.to_string())?;
    if !client.is_configured() {
        log::warn!("Mentor: no API key configured, responses will fall back");
    }

    match action {
        MentorAction::Routine { energy, mood, note } => {
            let today = chrono::Local::now().date_naive();
            let given = match (energy, mood) {
                (Some(energy), Some(mood)) => Some(DailyCheckIn::new(today, energy, mood, note)),
                _ => None,
            };
            let check_in = given.as_ref().or_else(|| state.latest_check_in());

            match client.routine_mentorship(&state, check_in, language).await {
                Some(m) => {
                    println!("{}\n", m.message);
                    println!("Adjustment: {}", m.adjustment);
                    println!("Micro habit: {}", m.micro_habit);
                    if !m.suggested_deferrals.is_empty() {
                        println!("Defer: {}", m.suggested_deferrals.join(", "));
                    }
                }
                None => return Err("no mentorship available right now".to_string()),
            }
        }
        MentorAction::Report => {
            let insights = client.weekly_report(&state, language).await;
            if insights.is_empty() {
                return Err("no weekly report available right now".to_string());
            }
            for insight in &insights {
                println!("[{:?}] {}\n{}\n", insight.insight_type, insight.title, insight.content);
            }
            state.ai_insights = insights;
            store.save(&state).map_err(|e| e.to_string())?;
        }
        MentorAction::Strategy => {
            println!("{}", client.strategic_advice(&state, language).await);
        }
    }
    Ok(())
}

fn run_checkin(energy: u8, mood: u8, note: Option<String>) -> Result<(), String> {
    let store = StateStore::open_default().map_err(|e| e.to_string())?;
    let today = chrono::Local::now().date_naive();
    store
        .update(|state| state.record_check_in(DailyCheckIn::new(today, energy, mood, note)))
        .map_err(|e| e.to_string())?;
    println!("Check-in saved for {}", today);
    Ok(())
}

fn run_settings(current: &AppSettings, action: SettingsAction) -> Result<(), String> {
    let path = settings::settings_path().map_err(|e| e.to_string())?;
    match action {
        SettingsAction::Show => {
            println!("# {}", path.display());
            let json = serde_json::to_string_pretty(current).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
        SettingsAction::Set { key, value } => {
            settings::update_setting_at(&path, &key, &value).map_err(|e| e.to_string())?;
            println!("{} updated in {}", key, path.display());
        }
    }
    Ok(())
}
