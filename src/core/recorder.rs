use color_eyre::eyre::{Report, Result};
use diesel::SqliteConnection;
use tracing::debug;

use crate::store::{self, model::NewBuildRecord};

/// A slave announcing that it is about to build `builddir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poll {
    pub master: String,
    pub branch: String,
    pub buildername: String,
    pub builddir: String,
    pub slave: String,
}

/// Records that the slave polled at `now`. Returns true if this is the first
/// poll seen for its (master, branch, builddir, slave) key.
pub fn record_poll(connection: &mut SqliteConnection, poll: &Poll, now: i64) -> Result<bool> {
    let inserted = connection.immediate_transaction::<_, Report, _>(|connection| {
        let build = NewBuildRecord {
            master: &poll.master,
            branch: &poll.branch,
            buildername: &poll.buildername,
            builddir: &poll.builddir,
            slave: &poll.slave,
            last_build_time: now,
            poll_seq: store::build_poll_seq_next(connection)?,
        };
        if store::build_time_touch(connection, &build)? == 0 {
            store::build_put(connection, &build)?;
            Ok(true)
        } else {
            Ok(false)
        }
    })?;
    debug!(
        "Recorded poll of {} on {} for {}/{} (new: {})",
        poll.builddir, poll.slave, poll.master, poll.branch, inserted
    );
    Ok(inserted)
}
