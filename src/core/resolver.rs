use std::collections::HashMap;

use color_eyre::eyre::Result;
use diesel::SqliteConnection;
use serde::Serialize;
use tracing::trace;

use crate::store::{self, model::ClobberRequestRecord};

/// The most recent clobber that applies to a slave's build directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastClobber {
    pub who: String,
    pub lastclobber: i64,
}

impl From<&ClobberRequestRecord> for LastClobber {
    fn from(record: &ClobberRequestRecord) -> Self {
        LastClobber {
            who: record.who.clone(),
            lastclobber: record.lastclobber,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CandidateKey {
    master: String,
    branch: String,
    builddir: String,
}

/// Candidate clobber rows keyed by (master, branch, builddir).
///
/// A cache lives for one request only; handlers create it, hand it to every
/// lookup they make and drop it with the response.
#[derive(Debug, Default)]
pub struct ResolverCache {
    candidates: HashMap<CandidateKey, Vec<ClobberRequestRecord>>,
}

impl ResolverCache {
    pub fn new() -> ResolverCache {
        ResolverCache::default()
    }
}

/// Finds the newest clobber request that applies to `slave` building
/// `builddir` for `branch` on `master`. NULL master, branch or slave columns
/// act as wildcards. Ties on the timestamp go to the row read last.
pub fn resolve(
    connection: &mut SqliteConnection,
    cache: &mut ResolverCache,
    master: &str,
    branch: &str,
    builddir: &str,
    slave: &str,
) -> Result<Option<LastClobber>> {
    let key = CandidateKey {
        master: master.to_string(),
        branch: branch.to_string(),
        builddir: builddir.to_string(),
    };
    if !cache.candidates.contains_key(&key) {
        let rows = store::clobber_candidates_get(connection, master, branch, builddir)?;
        cache.candidates.insert(key.clone(), rows);
    } else {
        trace!("Reusing clobber candidates for {}/{}/{}", master, branch, builddir);
    }
    Ok(cache
        .candidates
        .get(&key)
        .and_then(|rows| newest_for_slave(rows, slave))
        .map(LastClobber::from))
}

fn newest_for_slave<'a>(
    rows: &'a [ClobberRequestRecord],
    slave: &str,
) -> Option<&'a ClobberRequestRecord> {
    let mut newest: Option<&ClobberRequestRecord> = None;
    for row in rows
        .iter()
        .filter(|row| row.slave.as_deref().map_or(true, |s| s == slave))
    {
        match newest {
            Some(current) if current.lastclobber > row.lastclobber => {}
            _ => newest = Some(row),
        }
    }
    newest
}
