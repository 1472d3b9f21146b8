use diesel::prelude::*;
use serde::Serialize;

use super::schema::{builds, clobber_times, trees};

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = builds)]
pub struct BuildRecord {
    pub id: i32,
    pub master: String,
    pub branch: String,
    pub buildername: String,
    pub builddir: String,
    pub slave: String,
    pub last_build_time: i64,
    pub poll_seq: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = builds)]
pub struct NewBuildRecord<'a> {
    pub master: &'a str,
    pub branch: &'a str,
    pub buildername: &'a str,
    pub builddir: &'a str,
    pub slave: &'a str,
    pub last_build_time: i64,
    pub poll_seq: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = clobber_times)]
pub struct ClobberRequestRecord {
    pub id: i32,
    pub master: Option<String>,
    pub branch: Option<String>,
    pub builddir: String,
    pub slave: Option<String>,
    pub lastclobber: i64,
    pub who: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable)]
#[diesel(table_name = clobber_times, treat_none_as_null = true)]
pub struct NewClobberRequest {
    pub master: Option<String>,
    pub branch: Option<String>,
    pub builddir: String,
    pub slave: Option<String>,
    pub lastclobber: i64,
    pub who: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = trees)]
pub struct TreeRecord {
    pub short_name: String,
    pub long_name: String,
    pub lastclobber: Option<String>,
    pub clobberer: Option<String>,
}
