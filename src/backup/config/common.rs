use crate::backup::config::{effective_lines, OptionValue};

use std::collections::BTreeMap;

pub const DEFAULT_SNAP_SIZE: &str = "1g";
pub const DEFAULT_SNAP_NAME: &str = "snap-backup";
pub const DEFAULT_DECRYPT_NAME: &str = "snap-backup-decrypted";
pub const DEFAULT_MOUNT_BASE: &str = "/run/bup-backup/mnt";
pub const DEFAULT_MOUNT_OPTS: &str = "ro";
pub const DEFAULT_BUP_CMD: &str = "/usr/bin/bup";
pub const DEFAULT_RSYNC: &str = "/usr/bin/rsync";

/// Global option defaults, overridable per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonConfig {
    values: BTreeMap<String, OptionValue>,
}

impl Default for CommonConfig {
    fn default() -> Self {
        let values = [
            ("snap_size", OptionValue::from(DEFAULT_SNAP_SIZE)),
            ("snap_name", OptionValue::from(DEFAULT_SNAP_NAME)),
            ("decrypt_name", OptionValue::from(DEFAULT_DECRYPT_NAME)),
            ("mount_base", OptionValue::from(DEFAULT_MOUNT_BASE)),
            ("mount_inplace", OptionValue::Flag(false)),
            ("mount_opts", OptionValue::from(DEFAULT_MOUNT_OPTS)),
            ("bup_cmd", OptionValue::from(DEFAULT_BUP_CMD)),
            ("rsync", OptionValue::from(DEFAULT_RSYNC)),
            ("require_root", OptionValue::Flag(true)),
            ("unwind_on_error", OptionValue::Flag(true)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self { values }
    }
}

impl CommonConfig {
    /// A config with no defaults at all.
    pub fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn set<K: Into<String>, V: Into<OptionValue>>(&mut self, key: K, value: V) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Applies `key = value` lines on top of the current values. Lines
    /// without `=` are skipped.
    pub fn merge_lines(&mut self, content: &str) {
        for (line_no, line) in effective_lines(content) {
            match line.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim();
                    let value = value.trim();
                    tracing::trace!("common option {key} = {value:?} (line {line_no})");
                    self.values.insert(key.to_string(), OptionValue::from(value));
                }
                None => tracing::warn!("Ignoring common config line {line_no} without '=': {line:?}"),
            }
        }
    }
}
