//! Quipbot CLI
//!
//! Command-line interface for the Quipbot Telegram bot

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quipbot_config::Config;
use quipbot_core::QuipbotRuntime;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tracing::info;

const EXAMPLE_CONFIG: &str = include_str!("../../../config/config.example.toml");
const REDACTED: &str = "***REDACTED***";

#[derive(Parser)]
#[command(name = "quipbot")]
#[command(about = "Telegram bot with jokes, trivia quizzes and small utilities", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides core.log_level)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground until Ctrl-C
    Start,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Connectivity checks
    Test {
        #[command(subcommand)]
        action: TestCommands,
    },

    /// Log file management
    Logs {
        #[command(subcommand)]
        action: LogCommands,
    },

    /// Show version
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the example configuration
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show current configuration with secrets redacted
    Show,
    /// Validate configuration
    Validate,
}

#[derive(Subcommand)]
enum TestCommands {
    /// Call getMe with the configured bot token
    Telegram,
}

#[derive(Subcommand)]
enum LogCommands {
    /// List log files
    List,
    /// Delete old log files
    Clean {
        /// Keep logs newer than this many days
        #[arg(short, long, default_value_t = logging::LOG_RETENTION_DAYS)]
        days: u64,
    },
    /// Print the last lines of today's log
    Tail {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = load_config(cli.config.clone())?;
            let data_dir = config.data_dir();
            fs::create_dir_all(&data_dir)
                .with_context(|| format!("creating data dir {}", data_dir.display()))?;

            let log_level = resolve_log_level(cli.log_level.as_deref(), &config);
            let _logging_guard = logging::init_logging(&data_dir.join("logs"), &log_level)?;

            let runtime = QuipbotRuntime::new(config)?;
            info!("Starting Quipbot runtime in foreground...");
            runtime.run().await?;
        }

        Commands::Config { action } => match action {
            ConfigCommands::Init { force } => {
                let path = write_example_config(cli.config, force)?;
                println!("Configuration created at: {}", path.display());
                println!("\nEdit bot_token, or export {} instead.", quipbot_config::TELEGRAM_TOKEN_ENV);
            }
            ConfigCommands::Show => match load_config(cli.config) {
                Ok(config) => {
                    println!("Current configuration:");
                    println!("{}", serde_json::to_string_pretty(&redacted_config(&config)?)?);
                }
                Err(e) => eprintln!("Error loading config: {}", e),
            },
            ConfigCommands::Validate => match load_config(cli.config) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => eprintln!("Configuration is invalid: {}", e),
            },
        },

        Commands::Test { action } => match action {
            TestCommands::Telegram => {
                println!("Testing Telegram bot connection...\n");
                let config = load_config(cli.config)?;
                test_telegram_bot(&config).await?;
            }
        },

        Commands::Logs { action } => {
            let config = load_config(cli.config)?;
            let manager = logging::LogManager::new(config.data_dir().join("logs"));
            match action {
                LogCommands::List => {
                    let files = manager.get_log_files()?;
                    println!(
                        "Log files ({} total):\n",
                        logging::LogManager::format_size(manager.get_log_size()?)
                    );
                    for file in files {
                        let metadata = fs::metadata(&file)?;
                        let modified: chrono::DateTime<chrono::Local> = metadata.modified()?.into();
                        println!(
                            "  {} ({}, modified {})",
                            file.file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_default(),
                            logging::LogManager::format_size(metadata.len()),
                            modified.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                LogCommands::Clean { days } => {
                    let removed = manager.cleanup_logs_older_than(days)?;
                    println!("Cleaned {} old log file(s)", removed);
                }
                LogCommands::Tail { lines } => {
                    let current_log = manager.get_current_log_path();
                    if current_log.exists() {
                        let content = fs::read_to_string(&current_log)?;
                        for line in tail_lines(&content, lines) {
                            println!("{}", line);
                        }
                    } else {
                        println!("No log file found at {}", current_log.display());
                    }
                }
            }
        }

        Commands::Version => {
            println!("quipbot {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

/// Explicit path, then the default path, then env-only defaults.
fn load_config(config_path: Option<String>) -> Result<Config> {
    if let Some(path) = config_path {
        return Config::load(&path).with_context(|| format!("loading {}", path));
    }
    if let Some(default_path) = Config::default_path().filter(|p| p.exists()) {
        return Config::load(&default_path)
            .with_context(|| format!("loading {}", default_path.display()));
    }

    let mut config = Config::default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn config_path(config_path: Option<String>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Config::default_path().context("cannot determine config directory"),
    }
}

fn write_example_config(config_path_arg: Option<String>, force: bool) -> Result<PathBuf> {
    let path = config_path(config_path_arg)?;
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, EXAMPLE_CONFIG)?;
    Ok(path)
}

fn resolve_log_level(cli_level: Option<&str>, config: &Config) -> String {
    cli_level
        .or(config.core.log_level.as_deref())
        .map(str::trim)
        .filter(|level| !level.is_empty())
        .unwrap_or("info")
        .to_string()
}

fn redacted_config(config: &Config) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(config)?;
    if let Some(token) = value
        .get_mut("telegram")
        .and_then(|t| t.get_mut("bot_token"))
    {
        *token = json!(REDACTED);
    }
    Ok(value)
}

fn tail_lines(content: &str, count: usize) -> Vec<&str> {
    let all_lines: Vec<&str> = content.lines().collect();
    let start = all_lines.len().saturating_sub(count);
    all_lines[start..].to_vec()
}

async fn test_telegram_bot(config: &Config) -> Result<()> {
    let Some(telegram) = &config.telegram else {
        println!("No Telegram bot configured.");
        return Ok(());
    };

    let adapter = quipbot_telegram::TelegramAdapter::new(telegram)?;
    println!("Testing bot (bot_id: {})...", adapter.account_tag());
    match adapter.get_me().await {
        Ok(me) => {
            println!(
                "  ✓ SUCCESS: @{} ({})",
                me.username.as_deref().unwrap_or("unknown"),
                me.first_name.as_deref().unwrap_or("unknown")
            );
            Ok(())
        }
        Err(e) => {
            println!("  ✗ FAILED: {}", e);
            Err(e)
        }
    }
}
