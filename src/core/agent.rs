use std::{
    ffi::OsString,
    fs,
    path::{Component, Path, PathBuf},
};

use chrono::{Duration, NaiveDateTime};
use thiserror::Error;
use tracing::{info, warn};

use super::poll::ClobberInstruction;
use crate::store::TREE_TIMESTAMP_FORMAT;

pub const LAST_CLOBBER_FILE_NAME: &str = "last-clobber";
pub const CLOBBER_SUFFIX: &str = ".deleteme";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Couldn't clobber '{path}' properly")]
    Clobber {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to record last clobber time in '{path}'")]
    LastClobberWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid periodic clobber interval of {0} hours")]
    InvalidPeriod(f64),
}

/// Converts the `--periodic` hours into a duration, refusing negative,
/// non-finite or out of range values.
pub fn period_from_hours(hours: f64) -> Result<Duration, AgentError> {
    let seconds = hours * 3600.0;
    if !seconds.is_finite() || seconds < 0.0 || seconds >= i64::MAX as f64 {
        return Err(AgentError::InvalidPeriod(hours));
    }
    Duration::try_seconds(seconds as i64).ok_or(AgentError::InvalidPeriod(hours))
}

/// Parses a poll response. Lines that don't look like
/// `builddir:lastclobber:who` are skipped.
pub fn parse_instructions(body: &str) -> Vec<ClobberInstruction> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let builddir = parts.next()?;
            let lastclobber = parts.next()?.parse::<i64>().ok();
            let who = parts.next().unwrap_or_default();
            match lastclobber {
                Some(lastclobber) if !builddir.is_empty() => Some(ClobberInstruction {
                    builddir: builddir.to_string(),
                    lastclobber,
                    who: who.to_string(),
                }),
                _ => {
                    warn!("Ignoring malformed clobber line '{}'", line);
                    None
                }
            }
        })
        .collect()
}

/// Reads a `last-clobber` file. Both unix timestamps and the older
/// `YYYY-MM-DD HH:MM:SS` form are understood.
pub fn read_last_clobber(path: impl AsRef<Path>) -> Option<i64> {
    let data = fs::read_to_string(path.as_ref()).ok()?;
    let data = data.trim();
    data.parse::<i64>().ok().or_else(|| {
        NaiveDateTime::parse_from_str(data, TREE_TIMESTAMP_FORMAT)
            .ok()
            .map(|dt| dt.and_utc().timestamp())
    })
}

pub fn write_last_clobber(path: impl AsRef<Path>, timestamp: i64) -> Result<(), AgentError> {
    fs::write(path.as_ref(), timestamp.to_string()).map_err(|source| {
        AgentError::LastClobberWrite {
            path: path.as_ref().to_path_buf(),
            source,
        }
    })
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Empties `dir`, keeping the entries named in `skip`. Every entry is first
/// moved aside with a `.deleteme` suffix so an interrupted clobber leaves
/// nothing that looks like valid build output. Returns the removed paths.
pub fn clobber_dir(
    dir: impl AsRef<Path>,
    dry_run: bool,
    skip: &[String],
) -> Result<Vec<PathBuf>, AgentError> {
    let dir = dir.as_ref();
    let wrap = |source| AgentError::Clobber {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(wrap)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(wrap)?;
    entries.sort();

    let mut removed = Vec::new();
    for path in entries {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if fs::symlink_metadata(&path).is_err() {
            // Already taken out while clearing an earlier entry's leftover.
            continue;
        }
        if skip.iter().any(|s| *s == name) {
            info!(target: "user-log", "Skipping {}", name);
            continue;
        }
        info!(target: "user-log", "Removing {}", path.display());
        if !dry_run {
            if name.ends_with(CLOBBER_SUFFIX) {
                remove_entry(&path).map_err(wrap)?;
            } else {
                let mut aside = OsString::from(path.as_os_str());
                aside.push(CLOBBER_SUFFIX);
                let aside = PathBuf::from(aside);
                if fs::symlink_metadata(&aside).is_ok() {
                    remove_entry(&aside).map_err(wrap)?;
                }
                fs::rename(&path, &aside).map_err(wrap)?;
                remove_entry(&aside).map_err(wrap)?;
            }
        }
        removed.push(path);
    }
    Ok(removed)
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Directory holding one subdirectory per builddir
    pub root: PathBuf,
    /// The builddir this agent is about to build
    pub builddir: String,
    pub period: Duration,
    pub skip: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClobberReason {
    Forced { lastclobber: i64, who: String },
    Periodic,
}

#[derive(Debug, Default)]
pub struct AgentReport {
    pub clobbered: Vec<(String, ClobberReason)>,
}

fn is_plain_dir_name(builddir: &str) -> bool {
    let mut components = Path::new(builddir).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn clobber_builddir(options: &AgentOptions, builddir: &str) -> Result<(), AgentError> {
    let dir = options.root.join(builddir);
    if dir.is_dir() {
        info!(target: "user-log", "Clobbering {}...", builddir);
        let mut skip = options.skip.clone();
        if !skip.iter().any(|s| s == LAST_CLOBBER_FILE_NAME) {
            skip.push(LAST_CLOBBER_FILE_NAME.to_string());
        }
        clobber_dir(&dir, options.dry_run, &skip)?;
    } else {
        warn!(target: "user-log", "Clobber failed because '{}' doesn't exist", dir.display());
    }
    Ok(())
}

/// Acts on a poll response: forced clobbers for any builddir whose server
/// time is newer than the local record, then a periodic clobber of the
/// current builddir if it is overdue.
pub fn run(
    options: &AgentOptions,
    instructions: &[ClobberInstruction],
    now: i64,
) -> Result<AgentReport, AgentError> {
    let mut report = AgentReport::default();

    for instruction in instructions {
        if !is_plain_dir_name(&instruction.builddir) {
            warn!(target: "user-log", "Ignoring clobber of suspicious builddir '{}'", instruction.builddir);
            continue;
        }
        let last_clobber_path = options
            .root
            .join(&instruction.builddir)
            .join(LAST_CLOBBER_FILE_NAME);
        let ours = read_last_clobber(&last_clobber_path);
        info!(target: "user-log", "{}:Our last clobber date: {:?}", instruction.builddir, ours);
        info!(target: "user-log", "{}:Server clobber date: {}", instruction.builddir, instruction.lastclobber);
        // Without a local record this is a fresh checkout, nothing to wipe.
        match ours {
            Some(ours) if instruction.lastclobber > ours => {
                info!(target: "user-log", "{}:Server is forcing a clobber, initiated by {}", instruction.builddir, instruction.who);
                clobber_builddir(options, &instruction.builddir)?;
                if !options.dry_run {
                    write_last_clobber(&last_clobber_path, instruction.lastclobber)?;
                }
                report.clobbered.push((
                    instruction.builddir.clone(),
                    ClobberReason::Forced {
                        lastclobber: instruction.lastclobber,
                        who: instruction.who.clone(),
                    },
                ));
            }
            _ => {}
        }
    }

    if report.clobbered.iter().any(|(b, _)| *b == options.builddir) {
        return Ok(report);
    }

    let dir = options.root.join(&options.builddir);
    let last_clobber_path = dir.join(LAST_CLOBBER_FILE_NAME);
    match read_last_clobber(&last_clobber_path) {
        None => {
            // Start the periodic clock from the first build.
            if !options.dry_run && dir.is_dir() {
                write_last_clobber(&last_clobber_path, now)?;
            }
        }
        // A last-clobber far enough in the future is never due.
        Some(ours)
            if ours
                .checked_add(options.period.num_seconds())
                .map_or(false, |due| now > due) =>
        {
            info!(
                target: "user-log",
                "{}:More than {} hours have passed since our last clobber",
                options.builddir,
                options.period.num_hours()
            );
            clobber_builddir(options, &options.builddir)?;
            if !options.dry_run {
                write_last_clobber(&last_clobber_path, now)?;
            }
            report
                .clobbered
                .push((options.builddir.clone(), ClobberReason::Periodic));
        }
        Some(_) => {}
    }
    Ok(report)
}
