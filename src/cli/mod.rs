//! Operator CLI (SPEC_FULL §6): a small `clap` surface for the concerns
//! that belong to an operator rather than the HTTP transport this crate
//! does not ship — generating a config file, running migrations, and
//! probing readiness. Mirrors the teacher's `cli::Cli`/`Commands` split.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::VoteServiceConfig;
use crate::store::StoreGateway;

#[derive(Parser)]
#[command(name = "vote-corectl")]
#[command(author = "vote-core maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the electronic-poll core service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default config.toml to the given path (or the default
    /// location if omitted).
    GenerateConfig {
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Run embedded schema migrations against the configured database.
    Migrate {
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Probe the database connection the same way `/system/vote/health`
    /// does.
    Health {
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the binary's version.
    Version,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vote-core")
        .join("config.toml")
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::GenerateConfig { path } => {
            let path = path.unwrap_or_else(default_config_path);
            std::fs::write(&path, VoteServiceConfig::generate_default_toml())
                .map_err(|e| format!("failed to write '{}': {e}", path.display()))?;
            println!("wrote default config to {}", path.display());
            Ok(())
        }
        Commands::Migrate { config } => {
            let config = VoteServiceConfig::load(&config.unwrap_or_else(default_config_path))?;
            StoreGateway::connect(&config.database.url).await?;
            println!("migrations applied");
            Ok(())
        }
        Commands::Health { config } => {
            let config = VoteServiceConfig::load(&config.unwrap_or_else(default_config_path))?;
            let store = StoreGateway::connect(&config.database.url).await?;
            store.health().await?;
            println!("ok");
            Ok(())
        }
        Commands::Version => {
            println!("vote-corectl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
