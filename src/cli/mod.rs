mod agent;
mod server;
mod sweep;
mod tree;

use std::{env, path::PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};

use crate::core::{ClobbererConfig, DEFAULT_CONFIG_FILE_NAME};

// Clobberer lets engineers force clean builds on build farm slaves
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the clobberer web service
    Server(server::Params),
    /// Remove build and clobber records past the retention period
    Sweep(sweep::Params),
    /// Poll a clobberer service and clobber local build directories
    Agent(agent::Params),
    /// Manage legacy named trees
    #[command(subcommand)]
    Tree(tree::TreeCommands),
}

impl Cli {
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        match cli.command {
            Commands::Server(args) => server::execute(args),
            Commands::Sweep(args) => sweep::execute(args),
            Commands::Agent(args) => agent::execute(args),
            Commands::Tree(args) => tree::execute(args),
        }
    }
}

/// Loads the configuration, defaulting to `clobberer.json` in the current
/// directory. Returns the path it was resolved against as well.
pub(crate) fn load_config(config_path: Option<PathBuf>) -> Result<(PathBuf, ClobbererConfig)> {
    let config_path = match config_path {
        Some(config_path) => config_path,
        None => env::current_dir()
            .context("Failed to determine current working directory")?
            .join(DEFAULT_CONFIG_FILE_NAME),
    };
    let config = ClobbererConfig::new(&config_path)?;
    Ok((config_path, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommand_names() {
        let cli = Cli::try_parse_from(["clobberer", "server", "--listen", "0.0.0.0:9000"]).unwrap();
        assert!(matches!(cli.command, Commands::Server(_)));
        assert!(Cli::try_parse_from(["clobberer", "serve"]).is_err());
        let cli = Cli::try_parse_from(["clobberer", "tree", "list", "-f", "json"]).unwrap();
        assert!(matches!(cli.command, Commands::Tree(_)));
        let cli = Cli::try_parse_from([
            "clobberer", "agent", "-n", "-t", "1.5", "http://localhost/", "branch1", "Linux",
            "linux", "slave01", "master01",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Agent(_)));
    }
}
