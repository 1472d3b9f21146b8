use chrono::DateTime;
use color_eyre::eyre::Result;
use diesel::SqliteConnection;
use serde::Serialize;

use super::resolver::{resolve, ResolverCache};
use crate::store::{self, model::TreeRecord, TREE_TIMESTAMP_FORMAT};

#[derive(Debug, Serialize)]
pub struct Overview {
    pub branches: Vec<BranchView>,
    pub trees: Vec<TreeRecord>,
}

#[derive(Debug, Serialize)]
pub struct BranchView {
    pub name: String,
    pub builders: Vec<BuilderView>,
}

#[derive(Debug, Serialize)]
pub struct BuilderView {
    /// Id of the builder's first build record, used as the form key.
    pub id: i32,
    pub master: String,
    pub buildername: String,
    pub builddir: String,
    pub slave_names: String,
    pub slaves: Vec<SlaveView>,
}

#[derive(Debug, Serialize)]
pub struct SlaveView {
    pub name: String,
    pub last_build: String,
    pub last_clobber: Option<ClobberView>,
}

#[derive(Debug, Serialize)]
pub struct ClobberView {
    pub who: String,
    pub when: String,
}

pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format(TREE_TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Collects everything the clobber page shows, grouping build records by
/// branch and then by (builddir, master).
pub fn overview(connection: &mut SqliteConnection) -> Result<Overview> {
    let builds = store::builds_list(connection)?;
    let mut cache = ResolverCache::new();
    let mut branches: Vec<BranchView> = Vec::new();

    for build in builds.iter() {
        if branches.last().map_or(true, |b| b.name != build.branch) {
            branches.push(BranchView {
                name: build.branch.clone(),
                builders: Vec::new(),
            });
        }
        let Some(branch) = branches.last_mut() else {
            continue;
        };
        let same_builder = branch
            .builders
            .last()
            .map_or(false, |b| b.builddir == build.builddir && b.master == build.master);
        if !same_builder {
            branch.builders.push(BuilderView {
                id: build.id,
                master: build.master.clone(),
                buildername: build.buildername.clone(),
                builddir: build.builddir.clone(),
                slave_names: String::new(),
                slaves: Vec::new(),
            });
        }
        let Some(builder) = branch.builders.last_mut() else {
            continue;
        };
        builder.id = builder.id.min(build.id);
        let last_clobber = resolve(
            connection,
            &mut cache,
            &build.master,
            &build.branch,
            &build.builddir,
            &build.slave,
        )?
        .map(|clobber| ClobberView {
            who: clobber.who,
            when: format_timestamp(clobber.lastclobber),
        });
        builder.slaves.push(SlaveView {
            name: build.slave.clone(),
            last_build: format_timestamp(build.last_build_time),
            last_clobber,
        });
    }

    for builder in branches.iter_mut().flat_map(|b| b.builders.iter_mut()) {
        builder.slave_names = builder
            .slaves
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
    }

    Ok(Overview {
        branches,
        trees: store::trees_list(connection)?,
    })
}
