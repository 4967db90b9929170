//! Component J's command surface: a thin CLI that loads configuration,
//! wires dialog-core to concrete providers/tools, and drives a dialog
//! end-to-end (§2 AMBIENT "Host wiring"). Grounded on the teacher's own
//! `cli::{Cli, Command}` clap shape, narrowed to the subcommands this
//! host actually needs — there is no HTTP/WebSocket surface here (§1
//! out-of-scope), so `serve`/`import`/`systemd` have no counterpart.

pub mod config;

use clap::{Parser, Subcommand};

/// Drives the dialog core from the command line.
#[derive(Debug, Parser)]
#[command(name = "serialagent-dialog", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Drive a dialog for one user turn and print the event stream.
    Run {
        /// The message to send as the user prompt.
        message: String,
        /// Resume an existing root dialog by its selfId instead of starting a new one.
        #[arg(long)]
        root_id: Option<String>,
        /// Responder agent id for a freshly created root dialog.
        #[arg(long, default_value = "cmdr")]
        agent: String,
        /// Task document path recorded on a freshly created root dialog.
        #[arg(long, default_value = "task.md")]
        task_doc: String,
    },
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
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

/// Load the configuration from the path named by `SA_CONFIG` (or
/// `config.toml` by default). Shared by `run`, `doctor`, and `config` so
/// the load-or-default logic lives in one place.
pub fn load_config() -> anyhow::Result<(crate::config::GatewayConfig, String)> {
    let config_path = std::env::var("SA_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        crate::config::GatewayConfig::default()
    };

    Ok((config, config_path))
}
