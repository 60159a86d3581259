use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use sensevoice::app::{TranscribeOptions, describe_model_path, run_transcribe_command};
use sensevoice::cli::{Cli, Commands, ConfigAction, ModelsAction};
use sensevoice::config::Config;
use sensevoice::error::FetchReport;
use sensevoice::models::download::fetch_model_from;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);
    tracing::debug!(version = %sensevoice::version_string(), "starting");

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
            let config = load_config(cli.config.as_deref())?;
            let options = TranscribeOptions {
                executable,
                model,
                language,
                raw,
                no_download,
                startup_timeout,
                quiet: cli.quiet,
            };
            if let Err(e) = run_transcribe_command(config, files, options).await {
                eprintln!("{}", format!("Error: {e}").red());
                std::process::exit(1);
            }
        }
        Commands::Models { action } => {
            handle_models_command(action, cli.config.as_deref(), cli.quiet).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "sensevoice",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Install the stderr log subscriber.
///
/// `RUST_LOG` wins when set; otherwise `-q` shows only errors and each `-v`
/// raises the level from `warn`.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(verbose > 1)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/sensevoice/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides()?)
}

/// Handle model management commands.
async fn handle_models_command(
    action: ModelsAction,
    custom_path: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let config = load_config(custom_path)?;

    match action {
        ModelsAction::Fetch {
            id,
            file,
            dir,
            json,
        } => {
            let mut config = config;
            if let Some(id) = id {
                config.model.id = id;
            }
            if let Some(file) = file {
                config.model.file = file;
            }
            if let Some(dir) = dir {
                config.model.dir = dir;
            }

            let result =
                fetch_model_from(&config.model_source(), &config.model.dir, !quiet && !json).await;
            let report = FetchReport::from_result(&result);

            if json {
                println!(
                    "{}",
                    serde_json::to_string(&report).context("failed to encode fetch report")?
                );
            } else {
                match &result {
                    Ok(path) => println!("{} {}", "Model ready:".green(), path.display()),
                    Err(e) => eprintln!("{}", format!("Error ({}): {e}", e.code()).red()),
                }
            }
            if !report.is_ok() {
                std::process::exit(1);
            }
        }
        ModelsAction::Path => {
            println!("{}", describe_model_path(&config));
        }
    }
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            let text = toml::to_string_pretty(&config).context("failed to render configuration")?;
            print!("{text}");
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            let status = if path.is_file() {
                "exists".green().to_string()
            } else {
                "not found, using defaults".dimmed().to_string()
            };
            println!("{}  ({status})", path.display());
        }
    }
    Ok(())
}
