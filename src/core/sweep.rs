use std::fmt::Display;

use chrono::Duration;
use color_eyre::eyre::Result;
use diesel::SqliteConnection;
use tracing::info;

use crate::store;

/// Outcome of a retention sweep: the statements that ran, for the audit
/// trail, and how many rows each table lost.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub statements: Vec<String>,
    pub builds_removed: usize,
    pub clobbers_removed: usize,
}

impl Display for SweepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for statement in self.statements.iter() {
            writeln!(f, "{}", statement)?;
        }
        write!(f, "OK")
    }
}

/// Removes build and clobber rows strictly older than `retention` relative
/// to `now`, then compacts the database. Release builders keep their build
/// rows regardless of age.
pub fn sweep(
    connection: &mut SqliteConnection,
    now: i64,
    retention: Duration,
    release_prefix: &str,
) -> Result<SweepReport> {
    let cutoff = now - retention.num_seconds();
    let mut report = SweepReport::default();

    let (statement, removed) = store::builds_sweep(connection, cutoff, release_prefix)?;
    report.statements.push(statement);
    report.builds_removed = removed;

    let (statement, removed) = store::clobber_times_sweep(connection, cutoff)?;
    report.statements.push(statement);
    report.clobbers_removed = removed;

    report.statements.push(store::vacuum(connection)?);

    info!(
        "Swept {} build records and {} clobber requests older than {}",
        report.builds_removed, report.clobbers_removed, cutoff
    );
    Ok(report)
}
