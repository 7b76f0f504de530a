//! Backup table and global defaults.
//!
//! A [`BackupConfig`] is loaded once from a configuration directory holding a
//! common file (`key = value` lines) and a table file (one [`BackupEntry`] per
//! line). Nothing in here changes after loading.

pub mod common;
pub mod table;

use crate::backup::config::common::CommonConfig;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;

use bon::bon;
use derive_more::{Display, From};
use getset::{CopyGetters, Getters};
use itertools::Itertools;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Target column value meaning "same as source".
pub const TARGET_SAME_AS_SOURCE: &str = "-";

/// Value of a single option, either from an entry's option column or from
/// the common file.
#[derive(Debug, Clone, PartialEq, Eq, Display, From)]
pub enum OptionValue {
    #[display("{_0}")]
    Flag(bool),
    #[display("{_0}")]
    Text(String),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Flag(b) => Some(*b),
            OptionValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            },
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    #[display("plain")]
    Plain,
    #[display("command")]
    Command,
    #[display("lvm")]
    Lvm,
    #[display("crypt")]
    Crypt,
    #[display("lvm+crypt")]
    LvmCrypt,
}

impl EntryType {
    /// Whether the entry consumes space in a volume group for a snapshot.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, EntryType::Lvm | EntryType::LvmCrypt)
    }
}

impl FromStr for EntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(EntryType::Plain),
            "command" => Ok(EntryType::Command),
            "lvm" => Ok(EntryType::Lvm),
            "crypt" => Ok(EntryType::Crypt),
            "lvm+crypt" => Ok(EntryType::LvmCrypt),
            other => Err(Error::configuration(format!(
                "Unknown backup type {other:?}, expected one of plain, command, lvm, crypt, lvm+crypt"
            ))),
        }
    }
}

/// One line of the backup table.
///
/// The target is always concrete: a `-` target is replaced by the source when
/// the entry is built.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct BackupEntry {
    #[getset(get = "pub")]
    source: String,
    #[getset(get = "pub")]
    branch: String,
    #[getset(get = "pub")]
    target: String,
    #[getset(get_copy = "pub")]
    entry_type: EntryType,
    #[getset(get = "pub")]
    options: BTreeMap<String, OptionValue>,
}

#[bon]
impl BackupEntry {
    #[builder]
    pub fn new(
        #[builder(into)] source: String,
        #[builder(into)] branch: String,
        #[builder(into)] target: String,
        entry_type: EntryType,
        #[builder(default)] options: BTreeMap<String, OptionValue>,
    ) -> Self {
        let target = if target == TARGET_SAME_AS_SOURCE {
            source.clone()
        } else {
            target
        };

        Self {
            source,
            branch,
            target,
            entry_type,
            options,
        }
    }
}

impl BackupEntry {
    pub fn option(&self, key: &str) -> Option<&OptionValue> {
        self.options.get(key)
    }
}

/// A config file that cannot be read is a configuration problem, not a
/// failure of the run.
fn read_config_file(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::configuration(format!("Reading {what} {path:?} failed: {e}")))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct BackupConfig {
    common: CommonConfig,
    table: Vec<BackupEntry>,
}

impl BackupConfig {
    pub fn new(common: CommonConfig, table: Vec<BackupEntry>) -> Self {
        Self { common, table }
    }

    /// Reads `<dir>/<common_name>` over the built-in defaults, then
    /// `<dir>/<table_name>`.
    pub fn load<P: AsRef<Path>>(dir: P, common_name: &str, table_name: &str) -> Result<Self> {
        let dir = dir.as_ref();

        let common_path = dir.join(common_name);
        let common_content = read_config_file(&common_path, "common config")?;
        let mut common = CommonConfig::default();
        common.merge_lines(&common_content);

        let table_path = dir.join(table_name);
        let table_content = read_config_file(&table_path, "backup table")?;
        let table = table::parse_table(&table_content)
            .add_msg(format!("Parsing backup table {:?} failed", table_path))?;

        tracing::debug!(
            "Loaded {} table entries and {} common options from {:?}",
            table.len(),
            common.len(),
            dir
        );

        Ok(Self { common, table })
    }

    pub fn entry(&self, index: usize) -> Result<&BackupEntry> {
        self.table.get(index).ok_or_else(|| {
            Error::configuration(format!(
                "No entry {index} in a table of {} entries",
                self.table.len()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Distinct branches in order of first appearance.
    pub fn branches(&self) -> Vec<&str> {
        self.table
            .iter()
            .map(|e| e.branch.as_str())
            .unique()
            .collect()
    }

    /// Indices of the entries that belong to `branch`, in table order.
    pub fn branch_entries<'a>(&'a self, branch: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.table
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.branch == branch)
            .map(|(i, _)| i)
    }
}

/// Lines of a config file with comments and blanks removed, paired with
/// their 1-based line number.
pub(crate) fn effective_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}
