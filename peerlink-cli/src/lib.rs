//! Command-line interface for peer DIDs and DIDComm message packing

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use peerlink_agent::{AgentConfig, PeerAgent};
use tracing::debug;

pub mod commands;
pub mod error;
pub mod output;

pub use error::{Error, Result};
use output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "peerlink",
    about = "Create peer DIDs and pack DIDComm messages",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub debug: bool,

    /// Directory holding the secrets file [default: ~/.peerlink]
    #[arg(long, global = true, env = "PEERLINK_HOME")]
    pub home: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(long, global = true, default_value = "json")]
    pub output: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a peer DID and store its private keys
    CreatePeerDid(commands::did::CreatePeerDidArgs),
    /// Resolve a peer DID to its DID document
    ResolvePeerDid(commands::did::ResolvePeerDidArgs),
    /// Pack a text message
    Pack(commands::message::PackArgs),
    /// Unpack a packed message
    Unpack(commands::message::UnpackArgs),
}

impl Cli {
    /// The requested output format, falling back to JSON
    pub fn output_format(&self) -> OutputFormat {
        self.output.parse().unwrap_or_else(|_| {
            eprintln!("Warning: unknown output format '{}', using json", self.output);
            OutputFormat::Json
        })
    }

    /// Agent configuration for this invocation
    pub fn agent_config(&self) -> Result<AgentConfig> {
        match &self.home {
            Some(home) => Ok(AgentConfig::new().with_home(home.clone())),
            None => Ok(AgentConfig::from_env()?),
        }
    }
}

/// Runs the parsed command
pub async fn run(cli: &Cli) -> Result<()> {
    let format = cli.output_format();
    let config = cli.agent_config()?;
    debug!(keys_path = ?config.keys_path, "Loading agent");
    let agent = PeerAgent::new(config)?;

    match &cli.command {
        Commands::CreatePeerDid(args) => commands::did::handle_create(&agent, args, format).await,
        Commands::ResolvePeerDid(args) => {
            commands::did::handle_resolve(&agent, args, format).await
        }
        Commands::Pack(args) => commands::message::handle_pack(&agent, args, format).await,
        Commands::Unpack(args) => commands::message::handle_unpack(&agent, args, format).await,
    }
}
