use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, Context, Result};
use tracing::info;

use crate::store::{self, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Plain,
    Json,
}

#[derive(Debug, Subcommand)]
pub(crate) enum TreeCommands {
    /// Register a tree that can be clobbered by name
    Add(AddParams),
    /// List registered trees and their last clobber
    List(ListParams),
}

#[derive(Debug, Args)]
pub(crate) struct AddParams {
    /// Path to clobberer configuration
    #[arg(short, long)]
    config_path: Option<PathBuf>,
    /// Short name used in the clobber form
    short_name: String,
    /// Full name used by the `?tree=` lookup
    long_name: String,
}

#[derive(Debug, Args)]
pub(crate) struct ListParams {
    /// Path to clobberer configuration
    #[arg(short, long)]
    config_path: Option<PathBuf>,
    /// Output format
    #[arg(value_enum, short = 'f', long, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,
}

pub(crate) fn execute(command: TreeCommands) -> Result<()> {
    match command {
        TreeCommands::Add(args) => add(args),
        TreeCommands::List(args) => list(args),
    }
}

fn open_store(config_path: Option<PathBuf>) -> Result<Store> {
    let (config_path, config) = super::load_config(config_path)?;
    Store::new(config.store_path(&config_path))
}

fn add(args: AddParams) -> Result<()> {
    let store = open_store(args.config_path)?;
    let mut connection = store.get_connection()?;
    if store::tree_get(&mut connection, &args.long_name)?.is_some() {
        return Err(eyre!("Tree '{}' is already registered", args.long_name));
    }
    store::tree_put(&mut connection, &args.short_name, &args.long_name)
        .with_context(|| eyre!("Failed to register tree '{}'", args.short_name))?;
    info!(target: "user-log", "Tree {} ({}) registered", args.long_name, args.short_name);
    Ok(())
}

fn list(args: ListParams) -> Result<()> {
    let store = open_store(args.config_path)?;
    let mut connection = store.get_connection()?;
    let trees = store::trees_list(&mut connection)?;
    match args.format {
        OutputFormat::Plain => {
            for tree in trees {
                info!(target: "user-ui",
                    "{:<30} {:<12} {:<20} {}",
                    tree.long_name,
                    tree.short_name,
                    tree.lastclobber.unwrap_or_default(),
                    tree.clobberer.unwrap_or_default()
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&trees)?);
        }
    }
    Ok(())
}
