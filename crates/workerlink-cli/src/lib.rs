//! Command line front end for workerlink.

pub mod demo;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use workerlink_config::{expand_path, Config, DEFAULT_LOG_LEVEL};

use crate::demo::{run_demo, DemoOptions};

#[derive(Debug, Parser)]
#[command(name = "workerlink", version, about = "Batched controller/worker message transport")]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log level or filter directive; overrides RUST_LOG and the config file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Spawn a worker context, exchange messages with it and print counts
    Demo {
        /// Work items to send
        #[arg(long, default_value_t = 100)]
        messages: usize,

        /// Every n-th reply carries a transferred buffer (0 disables)
        #[arg(long, default_value_t = 10)]
        transfer_every: usize,

        /// Size of each transferred buffer in bytes
        #[arg(long, default_value_t = 4096)]
        payload_bytes: usize,

        /// Maximum time to wait for replies, in milliseconds
        #[arg(long, default_value_t = 2000)]
        settle_ms: u64,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default configuration file
    Init {
        /// Destination (defaults to the platform config directory)
        #[arg(long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Does not load the existing file, so a broken one can be replaced.
        Command::Config {
            action: ConfigAction::Init { path, force },
        } => {
            init_logging(cli.log_level.as_deref(), DEFAULT_LOG_LEVEL);
            let path = init_path(path.as_deref())?;
            Config::write_default(&path, force)?;
            println!("Wrote default configuration to {}", path.display());
        }
        Command::Config {
            action: ConfigAction::Show,
        } => {
            let config = load_config(cli.config.as_deref(), cli.log_level.as_deref())?;
            print!("{}", config.to_toml()?);
        }
        Command::Demo {
            messages,
            transfer_every,
            payload_bytes,
            settle_ms,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), cli.log_level.as_deref())?;
            let options = DemoOptions {
                messages,
                transfer_every,
                payload_bytes,
                settle: Duration::from_millis(settle_ms),
            };
            let summary = run_demo(&config, &options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("sent:         {}", summary.sent);
                println!("replies:      {}", summary.replies);
                println!("out of order: {}", summary.out_of_order);
                println!("buffers:      {} ({} bytes)", summary.buffers, summary.bytes);
                for error in &summary.errors {
                    println!("worker error: {}", error);
                }
            }
            if !summary.errors.is_empty() {
                return Err(anyhow!("worker reported {} error(s)", summary.errors.len()));
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>, log_level: Option<&str>) -> Result<Config> {
    let config = Config::load(path)?;
    init_logging(log_level, &config.logging.level);
    debug!(?config, "Configuration loaded");
    Ok(config)
}

fn init_path(raw: Option<&str>) -> Result<PathBuf> {
    match raw {
        Some(raw) => Ok(expand_path(raw)),
        None => Config::default_path()
            .ok_or_else(|| anyhow!("no config directory on this platform; pass --path")),
    }
}

/// Install the global subscriber. `--log-level` wins over `RUST_LOG`, which
/// wins over the configured level.
fn init_logging(flag: Option<&str>, configured: &str) {
    let filter = match flag {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured)),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_demo_defaults() {
        let cli = Cli::try_parse_from(["workerlink", "demo"]).unwrap();
        match cli.command {
            Command::Demo {
                messages,
                transfer_every,
                payload_bytes,
                settle_ms,
                json,
            } => {
                assert_eq!(messages, 100);
                assert_eq!(transfer_every, 10);
                assert_eq!(payload_bytes, 4096);
                assert_eq!(settle_ms, 2000);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "workerlink",
            "config",
            "show",
            "--config",
            "/tmp/wl.toml",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/tmp/wl.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_parse_config_init() {
        let args = ["workerlink", "config", "init", "--path", "x.toml", "--force"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Config {
                action: ConfigAction::Init { path, force },
            } => {
                assert_eq!(path.as_deref(), Some("x.toml"));
                assert!(force);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["workerlink", "serve"]).is_err());
    }

    #[test]
    fn test_init_path_expands_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("config.toml");
        let path = init_path(raw.to_str()).unwrap();
        assert_eq!(path, raw);

        Config::write_default(&path, false).unwrap();
        let loaded = Config::load(path.to_str()).unwrap();
        assert_eq!(loaded, Config::default());
    }
}
