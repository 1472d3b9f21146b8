use std::collections::HashSet;

use chrono::{DateTime, Utc};
use color_eyre::eyre::Report;
use diesel::SqliteConnection;
use thiserror::Error;
use tracing::info;

use super::{command::ClobberCommand, policy::ReleasePolicy};
use crate::store::{self, model::NewClobberRequest, TREE_TIMESTAMP_FORMAT};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("'{0}' may not issue broadcast clobbers")]
    Forbidden(String),
    #[error("No builder with id {0}")]
    UnknownRecord(i32),
    #[error("No tree named '{0}'")]
    UnknownTree(String),
    #[error("Failed to store clobber requests: {0:?}")]
    Store(Report),
}

impl From<Report> for SubmitError {
    fn from(err: Report) -> Self {
        SubmitError::Store(err)
    }
}

impl From<diesel::result::Error> for SubmitError {
    fn from(err: diesel::result::Error) -> Self {
        SubmitError::Store(Report::new(err))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubmitSummary {
    pub clobbers: usize,
    pub trees: usize,
}

/// Applies a parsed clobber form on behalf of `who`. Every write happens in
/// one transaction; any failure leaves the store untouched.
pub fn submit(
    connection: &mut SqliteConnection,
    policy: &dyn ReleasePolicy,
    release_prefix: &str,
    who: &str,
    commands: &[ClobberCommand],
    now: DateTime<Utc>,
) -> Result<SubmitSummary, SubmitError> {
    if commands.iter().any(ClobberCommand::is_broadcast) && !policy.may_broadcast(who) {
        return Err(SubmitError::Forbidden(who.to_string()));
    }
    let lastclobber = now.timestamp();
    let tree_stamp = now.format(TREE_TIMESTAMP_FORMAT).to_string();

    let summary = connection.immediate_transaction::<_, SubmitError, _>(|connection| {
        let mut seen: HashSet<(Option<String>, Option<String>, String, Option<String>)> =
            HashSet::new();
        let mut requests = Vec::new();
        let mut push = |master: Option<String>,
                        branch: Option<String>,
                        builddir: String,
                        slave: Option<String>| {
            if seen.insert((master.clone(), branch.clone(), builddir.clone(), slave.clone())) {
                requests.push(NewClobberRequest {
                    master,
                    branch,
                    builddir,
                    slave,
                    lastclobber,
                    who: who.to_string(),
                });
            }
        };
        let mut summary = SubmitSummary::default();

        for command in commands {
            match command {
                ClobberCommand::Builder { record, slaves } => {
                    let build = store::build_get(connection, *record)?
                        .ok_or(SubmitError::UnknownRecord(*record))?;
                    for slave in slaves {
                        push(
                            None,
                            Some(build.branch.clone()),
                            build.builddir.clone(),
                            Some(slave.clone()),
                        );
                    }
                }
                ClobberCommand::Slave { record, slave } => {
                    let build = store::build_get(connection, *record)?
                        .ok_or(SubmitError::UnknownRecord(*record))?;
                    push(
                        None,
                        Some(build.branch),
                        build.builddir,
                        Some(slave.clone()),
                    );
                }
                ClobberCommand::Broadcast {
                    master,
                    branch,
                    builddir,
                } => {
                    push(master.clone(), branch.clone(), builddir.clone(), None);
                    // Release builders build `<prefix>...-<builddir>` and
                    // follow broadcasts aimed at the base builddir.
                    for release in store::release_builddirs_get(
                        connection,
                        master.as_deref(),
                        branch.as_deref(),
                        release_prefix,
                        builddir,
                    )? {
                        push(master.clone(), branch.clone(), release, None);
                    }
                }
                ClobberCommand::Tree { short_name } => {
                    if store::tree_clobber_put(connection, short_name, who, &tree_stamp)? == 0 {
                        return Err(SubmitError::UnknownTree(short_name.clone()));
                    }
                    summary.trees += 1;
                }
            }
        }

        summary.clobbers = store::clobber_requests_put(connection, &requests)?;
        Ok(summary)
    })?;

    info!(
        "{} requested {} clobbers and {} tree clobbers",
        who, summary.clobbers, summary.trees
    );
    Ok(summary)
}
