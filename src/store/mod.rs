pub mod model;
pub mod schema;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use self::model::{
    BuildRecord, ClobberRequestRecord, NewBuildRecord, NewClobberRequest, TreeRecord,
};
use color_eyre::eyre::{eyre, Context, Result};

use diesel::{
    connection::SimpleConnection,
    debug_query, delete, insert_into,
    prelude::*,
    r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection},
    sql_query,
    sqlite::Sqlite,
    update,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{debug, trace};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
pub const DATABASE_FILE_NAME: &str = "clobberer.sqlite";
/// Format of the timestamps kept in the legacy `trees` table.
pub const TREE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub(crate) struct StorePath(PathBuf);

impl AsRef<Path> for StorePath {
    fn as_ref(&self) -> &Path {
        self.0.as_path()
    }
}

#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, connection: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // Two engineers clobbering at once must wait on the lock, not fail.
        connection
            .batch_execute(&format!(
                "PRAGMA busy_timeout = {};",
                self.busy_timeout.as_millis()
            ))
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

pub(crate) type StoreConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Clone)]
pub(crate) struct Store {
    path: StorePath,
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub fn new(path: impl AsRef<Path>) -> Result<Store> {
        std::fs::create_dir_all(path.as_ref()).with_context(|| {
            format!(
                "Failed to create clobberer store at '{}'",
                path.as_ref().display()
            )
        })?;
        let db_path = path.as_ref().join(DATABASE_FILE_NAME);
        let db_url = db_path
            .to_str()
            .ok_or_else(|| eyre!("Store path '{}' is not valid UTF-8", db_path.display()))?
            .to_string();

        let manager = ConnectionManager::<SqliteConnection>::new(db_url);
        let pool = Pool::builder()
            .test_on_check_out(true)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout: BUSY_TIMEOUT,
            }))
            .build(manager)?;
        let mut connection = pool.get()?;
        connection
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| eyre!("Failed to run migrations: {}", err))?;
        Ok(Store {
            path: StorePath(path.as_ref().to_path_buf()),
            pool,
        })
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    pub fn get_connection(&self) -> Result<StoreConnection> {
        trace!("Opening database connection");
        Ok(self.pool.get()?)
    }
}

pub(crate) fn builds_list(connection: &mut SqliteConnection) -> Result<Vec<BuildRecord>> {
    use crate::store::schema::builds::dsl::*;
    Ok(builds
        .order((branch.asc(), builddir.asc(), master.asc(), slave.asc(), id.asc()))
        .select(BuildRecord::as_select())
        .load(connection)?)
}

pub(crate) fn build_get(
    connection: &mut SqliteConnection,
    id_value: i32,
) -> Result<Option<BuildRecord>> {
    use crate::store::schema::builds::dsl::*;
    Ok(builds
        .filter(id.eq(id_value))
        .select(BuildRecord::as_select())
        .first(connection)
        .optional()?)
}

pub(crate) fn builds_for_slave(
    connection: &mut SqliteConnection,
    master_value: &str,
    slave_value: &str,
) -> Result<Vec<BuildRecord>> {
    use crate::store::schema::builds::dsl::*;
    Ok(builds
        .filter(master.eq(master_value))
        .filter(slave.eq(slave_value))
        .order((poll_seq.asc(), id.asc()))
        .select(BuildRecord::as_select())
        .load(connection)?)
}

/// Updates the poll time of an existing build row, returning the number of
/// rows touched.
pub(crate) fn build_time_touch(
    connection: &mut SqliteConnection,
    build: &NewBuildRecord<'_>,
) -> Result<usize> {
    use crate::store::schema::builds::dsl::*;
    Ok(update(
        builds
            .filter(master.eq(build.master))
            .filter(branch.eq(build.branch))
            .filter(builddir.eq(build.builddir))
            .filter(slave.eq(build.slave)),
    )
    .set((
        last_build_time.eq(build.last_build_time),
        buildername.eq(build.buildername),
        poll_seq.eq(build.poll_seq),
    ))
    .execute(connection)?)
}

/// Next value of the poll counter. Callers hold a write transaction so two
/// polls never share a value.
pub(crate) fn build_poll_seq_next(connection: &mut SqliteConnection) -> Result<i64> {
    use crate::store::schema::builds::dsl::*;
    let current: Option<i64> = builds
        .select(diesel::dsl::max(poll_seq))
        .first(connection)?;
    Ok(current.unwrap_or(0) + 1)
}

pub(crate) fn build_put(
    connection: &mut SqliteConnection,
    build: &NewBuildRecord<'_>,
) -> Result<()> {
    use crate::store::schema::builds::dsl::*;
    insert_into(builds).values(build).execute(connection)?;
    Ok(())
}

/// Loads every clobber request that could apply to `builddir_value` on the
/// given master and branch. Rows with a NULL master or branch match any.
pub(crate) fn clobber_candidates_get(
    connection: &mut SqliteConnection,
    master_value: &str,
    branch_value: &str,
    builddir_value: &str,
) -> Result<Vec<ClobberRequestRecord>> {
    use crate::store::schema::clobber_times::dsl::*;
    debug!(
        "Loading clobber candidates for {}/{}/{}",
        master_value, branch_value, builddir_value
    );
    Ok(clobber_times
        .filter(builddir.eq(builddir_value))
        .filter(branch.eq(branch_value).or(branch.is_null()))
        .filter(master.eq(master_value).or(master.is_null()))
        .order(id.asc())
        .select(ClobberRequestRecord::as_select())
        .load(connection)?)
}

pub(crate) fn clobber_requests_put(
    connection: &mut SqliteConnection,
    requests: &[NewClobberRequest],
) -> Result<usize> {
    use crate::store::schema::clobber_times::dsl::*;
    let mut inserted = 0;
    for request in requests {
        inserted += insert_into(clobber_times)
            .values(request)
            .execute(connection)?;
    }
    Ok(inserted)
}

const LIKE_ESCAPE: char = '\\';

/// Escapes `%`, `_` and the escape character itself for a LIKE pattern
/// using `LIKE_ESCAPE`.
pub(crate) fn like_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Known release builddirs for `builddir_value`, named
/// `<release_prefix>...-<builddir>`, optionally limited to one master and
/// branch.
pub(crate) fn release_builddirs_get(
    connection: &mut SqliteConnection,
    master_value: Option<&str>,
    branch_value: Option<&str>,
    release_prefix: &str,
    builddir_value: &str,
) -> Result<Vec<String>> {
    use crate::store::schema::builds::dsl::*;
    let pattern = format!(
        "{}%-{}",
        like_escape(release_prefix),
        like_escape(builddir_value)
    );
    let mut query = builds
        .select(builddir)
        .distinct()
        .filter(builddir.like(pattern).escape(LIKE_ESCAPE))
        .into_boxed();
    if let Some(master_value) = master_value {
        query = query.filter(master.eq(master_value));
    }
    if let Some(branch_value) = branch_value {
        query = query.filter(branch.eq(branch_value));
    }
    Ok(query.order(builddir.asc()).load(connection)?)
}

/// Deletes build rows older than `cutoff`, sparing release builders.
/// Returns the statement that was run and the number of rows removed.
pub(crate) fn builds_sweep(
    connection: &mut SqliteConnection,
    cutoff: i64,
    release_prefix: &str,
) -> Result<(String, usize)> {
    use crate::store::schema::builds::dsl::*;
    let query = delete(
        builds
            .filter(last_build_time.lt(cutoff))
            .filter(
                buildername
                    .not_like(format!("{}%", like_escape(release_prefix)))
                    .escape(LIKE_ESCAPE),
            ),
    );
    let statement = debug_query::<Sqlite, _>(&query).to_string();
    let count = query.execute(connection)?;
    Ok((statement, count))
}

pub(crate) fn clobber_times_sweep(
    connection: &mut SqliteConnection,
    cutoff: i64,
) -> Result<(String, usize)> {
    use crate::store::schema::clobber_times::dsl::*;
    let query = delete(clobber_times.filter(lastclobber.lt(cutoff)));
    let statement = debug_query::<Sqlite, _>(&query).to_string();
    let count = query.execute(connection)?;
    Ok((statement, count))
}

pub(crate) fn vacuum(connection: &mut SqliteConnection) -> Result<String> {
    let statement = "VACUUM";
    sql_query(statement).execute(connection)?;
    Ok(statement.to_string())
}

pub(crate) fn trees_list(connection: &mut SqliteConnection) -> Result<Vec<TreeRecord>> {
    use crate::store::schema::trees::dsl::*;
    Ok(trees
        .order(long_name.asc())
        .select(TreeRecord::as_select())
        .load(connection)?)
}

pub(crate) fn tree_get(
    connection: &mut SqliteConnection,
    long_name_value: &str,
) -> Result<Option<TreeRecord>> {
    use crate::store::schema::trees::dsl::*;
    Ok(trees
        .filter(long_name.eq(long_name_value))
        .select(TreeRecord::as_select())
        .first(connection)
        .optional()?)
}

pub(crate) fn tree_put(
    connection: &mut SqliteConnection,
    short_name_value: &str,
    long_name_value: &str,
) -> Result<()> {
    use crate::store::schema::trees::dsl::*;
    insert_into(trees)
        .values((
            short_name.eq(short_name_value),
            long_name.eq(long_name_value),
        ))
        .execute(connection)?;
    Ok(())
}

pub(crate) fn tree_clobber_put(
    connection: &mut SqliteConnection,
    short_name_value: &str,
    who: &str,
    lastclobber_value: &str,
) -> Result<usize> {
    use crate::store::schema::trees::dsl::*;
    Ok(
        update(trees.filter(short_name.eq(short_name_value)))
            .set((lastclobber.eq(lastclobber_value), clobberer.eq(who)))
            .execute(connection)?,
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempdir::TempDir;

    pub(crate) fn temp_store() -> (TempDir, Store) {
        let dir = TempDir::new("clobberer-store").unwrap();
        let store = Store::new(dir.path()).unwrap();
        (dir, store)
    }

    pub(crate) fn clobber(
        master: Option<&str>,
        branch: Option<&str>,
        builddir: &str,
        slave: Option<&str>,
        lastclobber: i64,
    ) -> NewClobberRequest {
        NewClobberRequest {
            master: master.map(String::from),
            branch: branch.map(String::from),
            builddir: builddir.to_string(),
            slave: slave.map(String::from),
            lastclobber,
            who: String::from("testuser"),
        }
    }

    #[test]
    fn migrations_create_database_file() {
        let (dir, store) = temp_store();
        assert!(dir.path().join(DATABASE_FILE_NAME).exists());
        assert_eq!(store.path().as_ref(), dir.path());
        let mut connection = store.get_connection().unwrap();
        assert!(builds_list(&mut connection).unwrap().is_empty());
        assert!(trees_list(&mut connection).unwrap().is_empty());
    }

    #[test]
    fn candidates_honor_null_master_and_branch() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        clobber_requests_put(
            &mut connection,
            &[
                clobber(None, None, "linux", None, 1),
                clobber(Some("m1"), None, "linux", None, 2),
                clobber(Some("m2"), None, "linux", None, 3),
                clobber(None, Some("b1"), "linux", Some("s1"), 4),
                clobber(None, Some("b2"), "linux", None, 5),
                clobber(None, None, "win32", None, 6),
            ],
        )
        .unwrap();

        let candidates = clobber_candidates_get(&mut connection, "m1", "b1", "linux").unwrap();
        let times = candidates.iter().map(|c| c.lastclobber).collect::<Vec<_>>();
        assert_eq!(times, vec![1, 2, 4]);
    }

    #[test]
    fn duplicate_build_key_is_rejected() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        let build = NewBuildRecord {
            master: "m1",
            branch: "b1",
            buildername: "Linux",
            builddir: "linux",
            slave: "s1",
            last_build_time: 10,
            poll_seq: 1,
        };
        build_put(&mut connection, &build).unwrap();
        assert!(build_put(&mut connection, &build).is_err());
        assert_eq!(build_time_touch(&mut connection, &build).unwrap(), 1);
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(like_escape("rel"), "rel");
        assert_eq!(like_escape("a_b%c\\d"), "a\\_b\\%c\\\\d");
    }

    #[test]
    fn release_builddirs_match_prefix_and_suffix() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        for (br, dir) in [
            ("branch2", "release-mozilla-central-linux_build"),
            ("branch2", "release-mozilla-central-linuxXbuild"),
            ("branch2", "linux_build"),
            ("branch3", "release-mozilla-beta-linux_build"),
        ] {
            build_put(
                &mut connection,
                &NewBuildRecord {
                    master: "m1",
                    branch: br,
                    buildername: dir,
                    builddir: dir,
                    slave: "s1",
                    last_build_time: 10,
                    poll_seq: 1,
                },
            )
            .unwrap();
        }

        assert_eq!(
            release_builddirs_get(&mut connection, None, None, "rel", "linux_build").unwrap(),
            vec![
                "release-mozilla-beta-linux_build",
                "release-mozilla-central-linux_build"
            ]
        );
        assert_eq!(
            release_builddirs_get(&mut connection, None, Some("branch2"), "rel", "linux_build")
                .unwrap(),
            vec!["release-mozilla-central-linux_build"]
        );
        assert!(
            release_builddirs_get(&mut connection, Some("m2"), None, "rel", "linux_build")
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn tree_clobber_updates_row() {
        let (_dir, store) = temp_store();
        let mut connection = store.get_connection().unwrap();
        tree_put(&mut connection, "mc", "mozilla-central").unwrap();
        assert_eq!(
            tree_clobber_put(&mut connection, "mc", "alice", "2024-01-02 03:04:05").unwrap(),
            1
        );
        assert_eq!(
            tree_clobber_put(&mut connection, "missing", "alice", "2024-01-02 03:04:05").unwrap(),
            0
        );
        let tree = tree_get(&mut connection, "mozilla-central").unwrap().unwrap();
        assert_eq!(tree.lastclobber.as_deref(), Some("2024-01-02 03:04:05"));
        assert_eq!(tree.clobberer.as_deref(), Some("alice"));
        assert!(tree_get(&mut connection, "unknown").unwrap().is_none());
    }
}
