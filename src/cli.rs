//! Command-line interface for sensevoice
//!
//! Provides argument parsing using clap derive macros.

use crate::stt::protocol::Language;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Transcribe audio files with a long-running SenseVoice engine
#[derive(Parser, Debug)]
#[command(
    name = "sensevoice",
    version,
    about = "Transcribe audio files with a long-running SenseVoice engine"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe one or more audio files through a single engine session
    Transcribe {
        /// Audio files, processed in order
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,

        /// Engine executable (default: sense-voice-main on PATH)
        #[arg(long, value_name = "PATH")]
        executable: Option<PathBuf>,

        /// GGUF model file (default: <model.dir>/<model.file>)
        #[arg(long, value_name = "PATH")]
        model: Option<PathBuf>,

        /// Spoken language: auto, zh, en, yue, ja, ko
        #[arg(long, short = 'l', value_name = "LANG", value_parser = parse_language)]
        language: Option<Language>,

        /// Keep time ranges and tag tokens in the output
        #[arg(long)]
        raw: bool,

        /// Prevent automatic model download if the model file is missing
        #[arg(long)]
        no_download: bool,

        /// How long to wait for the engine to load. Examples: 30s, 2m
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        startup_timeout: Option<Duration>,
    },

    /// Manage SenseVoice models
    Models {
        /// Action to perform
        #[command(subcommand)]
        action: ModelsAction,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Model management actions
#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// Download a model file from the hub
    Fetch {
        /// Repository identifier (owner/name)
        #[arg(long, value_name = "ID")]
        id: Option<String>,

        /// File inside the repository
        #[arg(long, value_name = "FILE")]
        file: Option<String>,

        /// Local directory to store the model in
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Print the result as {"status", "message"} JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the local path of the configured model
    Path,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`, plus bare numbers
/// as seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_language(s: &str) -> Result<Language, String> {
    s.parse::<Language>().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transcribe_command() {
        let cli = Cli::try_parse_from(["sensevoice", "transcribe", "a.wav", "b.wav"]).unwrap();
        match cli.command {
            Commands::Transcribe {
                files,
                executable,
                model,
                language,
                raw,
                no_download,
                startup_timeout,
            } => {
                assert_eq!(files, vec![PathBuf::from("a.wav"), PathBuf::from("b.wav")]);
                assert!(executable.is_none());
                assert!(model.is_none());
                assert!(language.is_none());
                assert!(!raw);
                assert!(!no_download);
                assert!(startup_timeout.is_none());
            }
            other => panic!("Expected Transcribe, got {other:?}"),
        }
    }

    #[test]
    fn test_transcribe_requires_files() {
        assert!(Cli::try_parse_from(["sensevoice", "transcribe"]).is_err());
    }

    #[test]
    fn test_parse_transcribe_options() {
        let cli = Cli::try_parse_from([
            "sensevoice",
            "transcribe",
            "--language",
            "zh",
            "--raw",
            "--no-download",
            "--startup-timeout",
            "1m30s",
            "--model",
            "/m/sv.gguf",
            "a.wav",
        ])
        .unwrap();
        let Commands::Transcribe {
            language,
            raw,
            no_download,
            startup_timeout,
            model,
            ..
        } = cli.command
        else {
            panic!("Expected Transcribe");
        };
        assert_eq!(language, Some(Language::Zh));
        assert!(raw);
        assert!(no_download);
        assert_eq!(startup_timeout, Some(Duration::from_secs(90)));
        assert_eq!(model, Some(PathBuf::from("/m/sv.gguf")));
    }

    #[test]
    fn test_invalid_language_rejected() {
        assert!(
            Cli::try_parse_from(["sensevoice", "transcribe", "-l", "de", "a.wav"]).is_err()
        );
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_models_fetch() {
        let cli = Cli::try_parse_from([
            "sensevoice",
            "models",
            "fetch",
            "--id",
            "lovemefan/SenseVoiceGGUF",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Models {
                action: ModelsAction::Fetch { id, file, dir, json },
            } => {
                assert_eq!(id.as_deref(), Some("lovemefan/SenseVoiceGGUF"));
                assert!(file.is_none());
                assert!(dir.is_none());
                assert!(json);
            }
            other => panic!("Expected models fetch, got {other:?}"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli =
            Cli::try_parse_from(["sensevoice", "-vv", "--config", "/tmp/c.toml", "config", "show"])
                .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["sensevoice", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn test_cli_debug_assert() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
