use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Args;
use color_eyre::eyre::{eyre, Context, Result};

use crate::{core::AllowList, server::AppState, store::Store};

#[derive(Debug, Args)]
pub(crate) struct Params {
    /// Path to clobberer configuration
    #[arg(short, long)]
    config_path: Option<PathBuf>,
    /// Address to listen for HTTP requests on, overrides the configuration
    #[arg(short, long, env = "CLOBBERER_LISTEN")]
    listen: Option<SocketAddr>,
}

pub(crate) fn execute(args: Params) -> Result<()> {
    let (config_path, config) = super::load_config(args.config_path)?;
    let store_path = config.store_path(&config_path);
    let store = Store::new(&store_path).with_context(|| {
        eyre!(
            "Failed to open clobberer store at '{}'",
            store_path.display()
        )
    })?;
    let listen = args.listen.unwrap_or(config.listen);
    let policy = Arc::new(AllowList::new(config.release_users.iter().cloned()));
    let state = AppState::new(store, config, policy)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(crate::server::start(state, listen))
}
