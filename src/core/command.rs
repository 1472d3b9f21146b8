use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

pub const FORM_SUBMITTED_FIELD: &str = "form_submitted";
pub const BUILDER_FIELD_PREFIX: &str = "bld-";
pub const BUILDER_SLAVES_FIELD_SUFFIX: &str = "_slaves";
pub const SLAVE_FIELD_PREFIX: &str = "slave-";
pub const TREE_FIELD_PREFIX: &str = "clobber-";

/// A single clobber action requested through the web form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClobberCommand {
    /// Clobber a builder on each listed slave. `record` is the id of a build
    /// record naming the builder's branch and builddir.
    Builder { record: i32, slaves: Vec<String> },
    /// Clobber a builder on one slave.
    Slave { record: i32, slave: String },
    /// Clobber a builddir on every slave, optionally narrowed to one master
    /// and/or branch. Requires the release capability.
    Broadcast {
        master: Option<String>,
        branch: Option<String>,
        builddir: String,
    },
    /// Stamp a legacy named tree.
    Tree { short_name: String },
}

impl ClobberCommand {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, ClobberCommand::Broadcast { .. })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Form was not submitted from the clobber page")]
    NotSubmitted,
    #[error("Unrecognized form field '{0}'")]
    UnknownField(String),
    #[error("Invalid builder id '{0}'")]
    InvalidRecordId(String),
    #[error("Form field '{0}' given more than once")]
    DuplicateField(String),
    #[error("Form field '{0}' names nothing")]
    EmptyName(String),
    #[error("Builder {0} was selected without any slaves")]
    NoSlaves(i32),
    #[error("A broadcast clobber needs a builddir")]
    MissingBuilddir,
}

fn parse_record_id(field: &str, value: &str) -> Result<i32, CommandError> {
    value
        .parse::<i32>()
        .map_err(|_| CommandError::InvalidRecordId(field.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Turns the raw form fields into validated commands. Either every field is
/// understood or the whole form is rejected.
pub fn parse_form(fields: &[(String, String)]) -> Result<Vec<ClobberCommand>, CommandError> {
    let mut submitted = false;
    let mut builders: BTreeSet<i32> = BTreeSet::new();
    let mut slave_lists: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    let mut slaves: Vec<ClobberCommand> = Vec::new();
    let mut trees: Vec<ClobberCommand> = Vec::new();
    let mut broadcast: BTreeMap<&str, String> = BTreeMap::new();

    for (key, value) in fields {
        let key = key.as_str();
        match key {
            FORM_SUBMITTED_FIELD => {
                if value != "true" {
                    return Err(CommandError::NotSubmitted);
                }
                submitted = true;
            }
            "master" | "branch" | "builddir" => {
                if broadcast.insert(key, value.clone()).is_some() {
                    return Err(CommandError::DuplicateField(key.to_string()));
                }
            }
            _ => {
                if let Some(id) = key.strip_prefix(BUILDER_FIELD_PREFIX) {
                    let id = parse_record_id(key, id)?;
                    if !builders.insert(id) {
                        return Err(CommandError::DuplicateField(key.to_string()));
                    }
                } else if let Some(slave) = key.strip_prefix(SLAVE_FIELD_PREFIX) {
                    if slave.is_empty() {
                        return Err(CommandError::EmptyName(key.to_string()));
                    }
                    slaves.push(ClobberCommand::Slave {
                        record: parse_record_id(key, value)?,
                        slave: slave.to_string(),
                    });
                } else if let Some(short_name) = key.strip_prefix(TREE_FIELD_PREFIX) {
                    if short_name.is_empty() {
                        return Err(CommandError::EmptyName(key.to_string()));
                    }
                    trees.push(ClobberCommand::Tree {
                        short_name: short_name.to_string(),
                    });
                } else if let Some(id) = key.strip_suffix(BUILDER_SLAVES_FIELD_SUFFIX) {
                    let id = parse_record_id(key, id)?;
                    let names = value
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(String::from)
                        .collect::<Vec<_>>();
                    if slave_lists.insert(id, names).is_some() {
                        return Err(CommandError::DuplicateField(key.to_string()));
                    }
                } else {
                    return Err(CommandError::UnknownField(key.to_string()));
                }
            }
        }
    }

    if !submitted {
        return Err(CommandError::NotSubmitted);
    }
    // Slave lists of unchecked builders are sent along as hidden fields.
    let mut commands = Vec::new();
    for record in builders {
        let slaves = slave_lists.remove(&record).unwrap_or_default();
        if slaves.is_empty() {
            return Err(CommandError::NoSlaves(record));
        }
        commands.push(ClobberCommand::Builder { record, slaves });
    }
    commands.extend(slaves);

    let master = non_empty(broadcast.remove("master"));
    let branch = non_empty(broadcast.remove("branch"));
    let builddir = non_empty(broadcast.remove("builddir"));
    match builddir {
        Some(builddir) => commands.push(ClobberCommand::Broadcast {
            master,
            branch,
            builddir,
        }),
        None if master.is_some() || branch.is_some() => {
            return Err(CommandError::MissingBuilddir)
        }
        None => {}
    }

    commands.extend(trees);
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(fields: &[(&str, &str)]) -> Vec<(String, String)> {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_every_kind_of_command() {
        let commands = parse_form(&form(&[
            ("form_submitted", "true"),
            ("bld-12", "on"),
            ("12_slaves", "slave01, slave02,"),
            ("slave-slave07", "3"),
            ("master", ""),
            ("branch", "mozilla-central"),
            ("builddir", "linux_build"),
            ("clobber-mc", "on"),
        ]))
        .unwrap();
        assert_eq!(
            commands,
            vec![
                ClobberCommand::Builder {
                    record: 12,
                    slaves: vec!["slave01".to_string(), "slave02".to_string()],
                },
                ClobberCommand::Slave {
                    record: 3,
                    slave: "slave07".to_string(),
                },
                ClobberCommand::Broadcast {
                    master: None,
                    branch: Some("mozilla-central".to_string()),
                    builddir: "linux_build".to_string(),
                },
                ClobberCommand::Tree {
                    short_name: "mc".to_string(),
                },
            ]
        );
        assert!(commands[2].is_broadcast());
    }

    #[test]
    fn empty_broadcast_fields_produce_nothing() {
        let commands = parse_form(&form(&[
            ("form_submitted", "true"),
            ("master", ""),
            ("branch", " "),
            ("builddir", ""),
        ]))
        .unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        assert_eq!(
            parse_form(&form(&[("form_submitted", "true"), ("frobnicate", "1")])),
            Err(CommandError::UnknownField("frobnicate".to_string()))
        );
    }

    #[test]
    fn rejects_missing_marker() {
        assert_eq!(
            parse_form(&form(&[("bld-1", "on"), ("1_slaves", "s1")])),
            Err(CommandError::NotSubmitted)
        );
        assert_eq!(
            parse_form(&form(&[("form_submitted", "false")])),
            Err(CommandError::NotSubmitted)
        );
    }

    #[test]
    fn rejects_malformed_ids() {
        assert_eq!(
            parse_form(&form(&[("form_submitted", "true"), ("bld-abc", "on")])),
            Err(CommandError::InvalidRecordId("bld-abc".to_string()))
        );
        assert_eq!(
            parse_form(&form(&[("form_submitted", "true"), ("slave-s1", "x")])),
            Err(CommandError::InvalidRecordId("slave-s1".to_string()))
        );
    }

    #[test]
    fn rejects_inconsistent_builder_fields() {
        assert_eq!(
            parse_form(&form(&[("form_submitted", "true"), ("4_slaves", "s1")])),
            Ok(vec![])
        );
        assert_eq!(
            parse_form(&form(&[("form_submitted", "true"), ("bld-4", "on")])),
            Err(CommandError::NoSlaves(4))
        );
        assert_eq!(
            parse_form(&form(&[
                ("form_submitted", "true"),
                ("bld-4", "on"),
                ("bld-4", "on"),
            ])),
            Err(CommandError::DuplicateField("bld-4".to_string()))
        );
    }

    #[test]
    fn broadcast_requires_builddir() {
        assert_eq!(
            parse_form(&form(&[("form_submitted", "true"), ("master", "m1")])),
            Err(CommandError::MissingBuilddir)
        );
    }

    #[test]
    fn rejects_empty_names() {
        assert_eq!(
            parse_form(&form(&[("form_submitted", "true"), ("slave-", "1")])),
            Err(CommandError::EmptyName("slave-".to_string()))
        );
        assert_eq!(
            parse_form(&form(&[("form_submitted", "true"), ("clobber-", "on")])),
            Err(CommandError::EmptyName("clobber-".to_string()))
        );
    }
}
