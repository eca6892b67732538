pub mod config;
pub mod run;

use clap::{Parser, Subcommand};

/// Chorus — deduplicated multi-character chat generation.
#[derive(Debug, Parser)]
#[command(name = "chorus", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway, worker pool and maintenance scheduler (default).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Submit one message through the full pipeline and print the reply.
    Run {
        /// Personality that should answer.
        personality: String,
        /// Acting user id.
        user: String,
        /// The message text.
        message: String,
        /// Channel the message belongs to.
        #[arg(long, default_value = "cli")]
        channel: String,
        /// Print the outcome as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `CHORUS_CONFIG` (default `config.toml`).
/// A missing file yields the defaults. Returns the config and the path
/// that was used.
pub fn load_config() -> anyhow::Result<(ch_domain::config::Config, String)> {
    let config_path = std::env::var("CHORUS_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

pub fn load_config_from(config_path: &str) -> anyhow::Result<ch_domain::config::Config> {
    if !std::path::Path::new(config_path).exists() {
        return Ok(ch_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(config_path).map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))
}
