use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use color_eyre::eyre::Result;
use tracing::info;

use crate::{core::sweep, store::Store};

#[derive(Debug, Args)]
pub(crate) struct Params {
    /// Path to clobberer configuration
    #[arg(short, long)]
    config_path: Option<PathBuf>,
    /// Retention period in days, overrides the configuration
    #[arg(short, long)]
    days: Option<u32>,
}

pub(crate) fn execute(args: Params) -> Result<()> {
    let (config_path, config) = super::load_config(args.config_path)?;
    let retention = match args.days {
        Some(days) => chrono::Duration::days(i64::from(days)),
        None => config.retention(),
    };
    let store = Store::new(config.store_path(&config_path))?;
    let mut connection = store.get_connection()?;
    let report = sweep(
        &mut connection,
        Utc::now().timestamp(),
        retention,
        &config.release_prefix,
    )?;
    for statement in report.statements.iter() {
        info!(target: "user-log", "{}", statement);
    }
    info!(target: "user-log",
        "Removed {} build records and {} clobber requests",
        report.builds_removed, report.clobbers_removed
    );
    Ok(())
}
