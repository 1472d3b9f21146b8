use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use color_eyre::eyre::{eyre, Context, Result};
use tracing::info;

use crate::core::agent::{self, AgentOptions, LAST_CLOBBER_FILE_NAME};

#[derive(Debug, Args)]
pub(crate) struct Params {
    /// Don't actually delete anything
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Hours between periodic clobbers
    #[arg(short = 't', long = "periodic", default_value_t = 24.0 * 7.0)]
    period: f64,
    /// Do not delete this directory entry, may be repeated
    #[arg(short, long)]
    skip: Vec<String>,
    /// Directory holding the build directories
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,
    /// Clobberer service URL
    url: String,
    branch: String,
    buildername: String,
    builddir: String,
    slave: String,
    master: String,
}

fn fetch(args: &Params) -> Result<String> {
    let client = reqwest::blocking::Client::new();
    let response = client
        .get(&args.url)
        .query(&[
            ("branch", args.branch.as_str()),
            ("buildername", args.buildername.as_str()),
            ("builddir", args.builddir.as_str()),
            ("slave", args.slave.as_str()),
            ("master", args.master.as_str()),
        ])
        .send()
        .with_context(|| eyre!("Error contacting clobberer at '{}'", args.url))?;
    info!(target: "user-log", "Checking clobber URL: {}", response.url());
    Ok(response.error_for_status()?.text()?)
}

pub(crate) fn execute(args: Params) -> Result<()> {
    let period = agent::period_from_hours(args.period)?;
    let body = fetch(&args)?;
    let instructions = agent::parse_instructions(&body);

    let mut skip = args.skip.clone();
    skip.push(LAST_CLOBBER_FILE_NAME.to_string());
    let options = AgentOptions {
        root: args.dir.clone(),
        builddir: args.builddir.clone(),
        period,
        skip,
        dry_run: args.dry_run,
    };
    let report = agent::run(&options, &instructions, Utc::now().timestamp())?;
    if report.clobbered.is_empty() {
        info!(target: "user-log", "Nothing to clobber");
    }
    Ok(())
}
