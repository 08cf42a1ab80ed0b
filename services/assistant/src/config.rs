use clap::Parser;
use realtime_core::{
    dispatcher::{DispatcherConfig, ErrorPolicy, FinalTurnPolicy},
    generic_types::Voice,
    wav::{REALTIME_PCM16_SAMPLE_RATE, WavSpec},
};
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::Level;

pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful digital assistant called Chad. You can use the plugins and functions and tools provided. Respond in character.";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub openai_api_key: SecretString,
    pub realtime_url: String,
    pub model: String,
    pub voice: Voice,
    pub transcription_model: Option<String>,
    pub instructions: String,
    pub output_dir: PathBuf,
    pub output_sample_rate: u32,
    pub audio_player: Option<String>,
    pub record_command: String,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_url = std::env::var("REALTIME_URL")
            .unwrap_or_else(|_| "wss://api.openai.com/v1/realtime".to_string());
        let model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| "gpt-4o-realtime-preview-2024-10-01".to_string());

        let voice = match std::env::var("REALTIME_VOICE") {
            Ok(value) => value
                .parse::<Voice>()
                .map_err(|e| ConfigError::InvalidValue("REALTIME_VOICE".to_string(), e))?,
            Err(_) => Voice::default(),
        };

        // An empty value disables input transcription.
        let transcription_model = match std::env::var("TRANSCRIPTION_MODEL") {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(value),
            Err(_) => Some("whisper-1".to_string()),
        };

        let instructions = std::env::var("ASSISTANT_INSTRUCTIONS")
            .unwrap_or_else(|_| DEFAULT_INSTRUCTIONS.to_string());

        let output_dir = std::env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let output_sample_rate = match std::env::var("OUTPUT_SAMPLE_RATE") {
            Ok(value) => value
                .parse::<u32>()
                .ok()
                .filter(|rate| *rate > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "OUTPUT_SAMPLE_RATE".to_string(),
                        format!("'{}' is not a valid sample rate", value),
                    )
                })?,
            Err(_) => REALTIME_PCM16_SAMPLE_RATE,
        };

        let audio_player = std::env::var("AUDIO_PLAYER")
            .ok()
            .filter(|player| !player.trim().is_empty());
        let record_command = std::env::var("RECORD_COMMAND").unwrap_or_else(|_| "sox".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            openai_api_key,
            realtime_url,
            model,
            voice,
            transcription_model,
            instructions,
            output_dir,
            output_sample_rate,
            audio_player,
            record_command,
            log_level,
        })
    }

    /// Applies command-line overrides on top of the environment.
    pub fn apply(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(player) = &cli.player {
            self.audio_player = Some(player.clone());
        }
    }

    /// The dispatcher settings for this run.
    pub fn dispatcher_config(&self, cli: &Cli) -> DispatcherConfig {
        DispatcherConfig {
            output_format: WavSpec::pcm16_mono(self.output_sample_rate),
            on_error: if cli.exit_on_error {
                ErrorPolicy::Terminate
            } else {
                ErrorPolicy::Continue
            },
            on_final_turn: if cli.single_turn {
                FinalTurnPolicy::EndSession
            } else {
                FinalTurnPolicy::KeepListening
            },
        }
    }
}

/// Talk to a realtime model that can switch your lights.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct Cli {
    /// Directory the model's spoken answers are written to.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Command used to play each answer, e.g. `afplay` or `aplay`.
    #[arg(long)]
    pub player: Option<String>,
    /// End the session when the provider reports an error.
    #[arg(long)]
    pub exit_on_error: bool,
    /// End the session after the first answer that needs no tools.
    #[arg(long)]
    pub single_turn: bool,
}
