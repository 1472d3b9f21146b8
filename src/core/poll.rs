use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use color_eyre::eyre::Result;
use diesel::SqliteConnection;
use tracing::info;

use super::{
    recorder::{record_poll, Poll},
    resolver::{resolve, LastClobber, ResolverCache},
};
use crate::store;

/// One `builddir:lastclobber:who` line of a poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClobberInstruction {
    pub builddir: String,
    pub lastclobber: i64,
    pub who: String,
}

impl Display for ClobberInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.builddir, self.lastclobber, self.who)
    }
}

/// Answers a slave's poll: every directory it has built on this master that
/// has a clobber on record, then records the poll itself.
///
/// Each known directory is checked against the branch it was last built for,
/// since that is the state left on disk. The polled directory is also checked
/// against the branch about to be built.
pub fn answer_poll(
    connection: &mut SqliteConnection,
    poll: &Poll,
    now: i64,
) -> Result<Vec<ClobberInstruction>> {
    let previous = store::builds_for_slave(connection, &poll.master, &poll.slave)?;

    let mut last_branch: BTreeMap<&str, &str> = BTreeMap::new();
    for build in previous.iter() {
        // Ordered oldest first, the last write wins.
        last_branch.insert(build.builddir.as_str(), build.branch.as_str());
    }
    let mut checks: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (builddir, branch) in last_branch {
        checks.entry(builddir).or_default().insert(branch);
    }
    checks
        .entry(poll.builddir.as_str())
        .or_default()
        .insert(poll.branch.as_str());

    let mut cache = ResolverCache::new();
    let mut instructions = Vec::new();
    for (builddir, branches) in checks {
        let mut newest: Option<LastClobber> = None;
        for branch in branches {
            if let Some(found) =
                resolve(connection, &mut cache, &poll.master, branch, builddir, &poll.slave)?
            {
                if newest
                    .as_ref()
                    .map_or(true, |current| found.lastclobber >= current.lastclobber)
                {
                    newest = Some(found);
                }
            }
        }
        if let Some(LastClobber { who, lastclobber }) = newest {
            instructions.push(ClobberInstruction {
                builddir: builddir.to_string(),
                lastclobber,
                who,
            });
        }
    }

    if record_poll(connection, poll, now)? {
        info!(
            "First poll of {} by {} on {} ({})",
            poll.builddir, poll.slave, poll.master, poll.branch
        );
    }
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        clobber_requests_put,
        tests::{clobber, temp_store},
    };

    fn poll(branch: &str, buildername: &str, builddir: &str, slave: &str, master: &str) -> Poll {
        Poll {
            master: master.to_string(),
            branch: branch.to_string(),
            buildername: buildername.to_string(),
            builddir: builddir.to_string(),
            slave: slave.to_string(),
        }
    }

    fn answer(connection: &mut SqliteConnection, p: &Poll, now: i64) -> String {
        answer_poll(connection, p, now)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn slave_clobber_applies_on_any_master() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        clobber_requests_put(
            &mut connection,
            &[clobber(None, Some("branch1"), "mybuilder", Some("slave01"), 1000)],
        )
        .unwrap();

        let data = answer(
            &mut connection,
            &poll("branch1", "My Builder 2", "mybuilder2", "slave01", "master01"),
            2000,
        );
        assert!(!data.contains("mybuilder2"), "{}", data);
        assert_eq!(
            answer(
                &mut connection,
                &poll("branch1", "My Builder", "mybuilder", "slave01", "master01"),
                2001
            ),
            "mybuilder:1000:testuser"
        );
        assert_eq!(
            answer(
                &mut connection,
                &poll("branch1", "My Builder", "mybuilder", "slave01", "master02"),
                2002
            ),
            "mybuilder:1000:testuser"
        );
    }

    #[test]
    fn master_clobber_applies_to_all_slaves_of_that_master_only() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        clobber_requests_put(
            &mut connection,
            &[clobber(Some("master01"), Some("branch1"), "mybuilder", None, 1000)],
        )
        .unwrap();

        for slave in ["slave01", "slave02"] {
            assert_eq!(
                answer(
                    &mut connection,
                    &poll("branch1", "My Builder", "mybuilder", slave, "master01"),
                    2000
                ),
                "mybuilder:1000:testuser"
            );
            assert_eq!(
                answer(
                    &mut connection,
                    &poll("branch1", "My Builder", "mybuilder", slave, "master02"),
                    2000
                ),
                ""
            );
        }
    }

    #[test]
    fn slave_and_master_clobber_is_narrow() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        clobber_requests_put(
            &mut connection,
            &[clobber(
                Some("master01"),
                Some("branch1"),
                "mybuilder",
                Some("slave01"),
                1000,
            )],
        )
        .unwrap();
        assert_eq!(
            answer(
                &mut connection,
                &poll("branch1", "My Builder", "mybuilder", "slave01", "master01"),
                2000
            ),
            "mybuilder:1000:testuser"
        );
        assert_eq!(
            answer(
                &mut connection,
                &poll("branch1", "My Builder", "mybuilder", "slave02", "master01"),
                2000
            ),
            ""
        );
        assert_eq!(
            answer(
                &mut connection,
                &poll("branch1", "My Builder", "mybuilder", "slave01", "master02"),
                2000
            ),
            ""
        );
    }

    #[test]
    fn other_builddirs_of_the_slave_are_reported() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        answer(
            &mut connection,
            &poll("branch1", "linux_build", "linux_build", "slave01", "master01"),
            900,
        );
        clobber_requests_put(
            &mut connection,
            &[
                clobber(Some("master01"), Some("branch1"), "mybuilder", Some("slave01"), 999),
                clobber(Some("master01"), Some("branch1"), "linux_build", None, 1001),
            ],
        )
        .unwrap();
        assert_eq!(
            answer(
                &mut connection,
                &poll("branch1", "My Builder", "mybuilder", "slave01", "master01"),
                1000
            ),
            "linux_build:1001:testuser\nmybuilder:999:testuser"
        );
    }

    #[test]
    fn release_builddir_follows_its_last_branch() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        answer(
            &mut connection,
            &poll("branch1", "linux_build", "linux_build", "slave01", "master01"),
            100,
        );
        answer(
            &mut connection,
            &poll("branch2", "linux_build", "linux_build", "slave01", "master01"),
            101,
        );
        clobber_requests_put(
            &mut connection,
            &[clobber(None, Some("branch2"), "linux_build", None, 102)],
        )
        .unwrap();

        // The directory was last built for branch2, so its clobber applies
        // even though this run is for branch1.
        assert_eq!(
            answer(
                &mut connection,
                &poll("branch1", "Linux Release Build", "linux_build", "slave01", "master01"),
                103
            ),
            "linux_build:102:testuser"
        );
    }

    #[test]
    fn release_builddir_ignores_branch_it_moved_away_from() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        answer(
            &mut connection,
            &poll("branch2", "linux_build", "linux_build", "slave01", "master01"),
            100,
        );
        answer(
            &mut connection,
            &poll("branch1", "linux_build", "linux_build", "slave01", "master01"),
            101,
        );
        clobber_requests_put(
            &mut connection,
            &[clobber(None, Some("branch2"), "linux_build", None, 102)],
        )
        .unwrap();
        assert_eq!(
            answer(
                &mut connection,
                &poll("branch1", "Linux Release Build", "linux_build", "slave01", "master01"),
                103
            ),
            ""
        );
    }

    #[test]
    fn other_builder_does_not_inherit_other_branch_clobber() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        answer(
            &mut connection,
            &poll("branch1", "linux_build", "linux_build", "slave01", "master01"),
            100,
        );
        answer(
            &mut connection,
            &poll("branch2", "linux_build", "linux_build", "slave01", "master01"),
            101,
        );
        clobber_requests_put(
            &mut connection,
            &[clobber(None, Some("branch1"), "linux_build", None, 102)],
        )
        .unwrap();
        let data = answer(
            &mut connection,
            &poll("branch1", "My Builder", "mybuilder", "slave01", "master01"),
            103,
        );
        assert!(!data.contains("linux_build"), "{}", data);
    }

    #[test]
    fn poll_is_recorded_after_answering() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        answer(
            &mut connection,
            &poll("branch1", "My Builder", "mybuilder", "slave01", "master01"),
            100,
        );
        let builds = store::builds_list(&mut connection).unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].last_build_time, 100);
    }

    #[test]
    fn last_branch_follows_poll_order_within_one_second() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        clobber_requests_put(
            &mut connection,
            &[clobber(None, Some("branch1"), "mybuilder", None, 500)],
        )
        .unwrap();
        for branch in ["branch1", "branch2", "branch1"] {
            answer(
                &mut connection,
                &poll(branch, "My Builder", "mybuilder", "slave01", "master01"),
                1000,
            );
        }
        assert_eq!(
            answer(
                &mut connection,
                &poll("branch2", "My Builder 2", "mybuilder2", "slave01", "master01"),
                1000
            ),
            "mybuilder:500:testuser"
        );
    }
}
