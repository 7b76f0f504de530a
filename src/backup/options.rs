//! Three-tier option lookup: entry override, then common default, then a
//! caller supplied fallback.
//!
//! Lookups read straight from the loaded [`BackupConfig`] every time so the
//! validation pass and the execution pass always see the same values.

use crate::backup::config::{BackupConfig, OptionValue};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;

use std::path::PathBuf;
use std::rc::Rc;

const KIB: f64 = 1024.0;

#[derive(Debug, Clone)]
pub struct OptionResolver {
    config: Rc<BackupConfig>,
}

impl OptionResolver {
    pub fn new(config: Rc<BackupConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// `entry.options[key]`, else `common[key]`, else `fallback`.
    pub fn resolve(
        &self,
        index: usize,
        key: &str,
        fallback: Option<OptionValue>,
    ) -> Result<Option<OptionValue>> {
        let entry = self.config.entry(index)?;
        let value = entry
            .option(key)
            .or_else(|| self.config.common().get(key))
            .cloned()
            .or(fallback);
        tracing::trace!("entry {index}: option {key} resolved to {value:?}");
        Ok(value)
    }

    /// Like [`resolve`](Self::resolve) but a missing value is an error.
    pub fn require(&self, index: usize, key: &str) -> Result<OptionValue> {
        self.resolve(index, key, None)?
            .ok_or_else(|| Error::missing_option(key, format!("entry {index}")))
    }

    pub fn text(&self, index: usize, key: &str, fallback: &str) -> Result<String> {
        Ok(self
            .resolve(index, key, Some(OptionValue::from(fallback)))?
            .map(|v| v.to_string())
            .unwrap_or_else(|| fallback.to_string()))
    }

    pub fn required_text(&self, index: usize, key: &str) -> Result<String> {
        self.require(index, key).map(|v| v.to_string())
    }

    pub fn required_path(&self, index: usize, key: &str) -> Result<PathBuf> {
        self.required_text(index, key).map(PathBuf::from)
    }

    pub fn flag(&self, index: usize, key: &str, fallback: bool) -> Result<bool> {
        match self.resolve(index, key, Some(OptionValue::Flag(fallback)))? {
            Some(value) => value.as_bool().ok_or_else(|| {
                Error::configuration(format!(
                    "Option {key:?} of entry {index} must be a boolean, got {value:?}"
                ))
            }),
            None => Ok(fallback),
        }
    }

    /// Required size option converted to bytes.
    pub fn size(&self, index: usize, key: &str) -> Result<u64> {
        parse_size(&self.required_text(index, key)?)
    }

    /// Common-only lookup for settings that are not per entry.
    pub fn global(&self, key: &str) -> Option<&OptionValue> {
        self.config.common().get(key)
    }

    pub fn global_text(&self, key: &str, fallback: &str) -> String {
        self.global(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn required_global_text(&self, key: &str) -> Result<String> {
        self.global(key)
            .map(|v| v.to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::missing_option(key, "common config"))
    }

    pub fn global_flag(&self, key: &str, fallback: bool) -> Result<bool> {
        match self.global(key) {
            Some(value) => value.as_bool().ok_or_else(|| {
                Error::configuration(format!(
                    "Common option {key:?} must be a boolean, got {value:?}"
                ))
            }),
            None => Ok(fallback),
        }
    }
}

/// Parses `<number>[k|m|g|t]` (case-insensitive, `,` or `.` as decimal
/// separator) into bytes using 1024-based multipliers. No unit means bytes.
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let invalid = || Error::InvalidSize(input.to_string());

    let (mantissa, multiplier) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let exponent = match c.to_ascii_lowercase() {
                'k' => 1,
                'm' => 2,
                'g' => 3,
                't' => 4,
                _ => return Err(invalid()),
            };
            (&trimmed[..trimmed.len() - 1], KIB.powi(exponent))
        }
        Some(_) => (trimmed, 1.0),
        None => return Err(invalid()),
    };

    if mantissa.is_empty()
        || !mantissa
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',' || c == '.')
    {
        return Err(invalid());
    }

    let number: f64 = mantissa.replace(',', ".").parse().map_err(|_| invalid())?;
    Ok((number * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::config::common::CommonConfig;
    use crate::backup::config::{BackupEntry, EntryType};
    use std::collections::BTreeMap;

    fn resolver(entry_options: &[(&str, &str)], common: &[(&str, &str)]) -> OptionResolver {
        let mut common_config = CommonConfig::empty();
        for (k, v) in common {
            common_config.set(*k, *v);
        }
        let options: BTreeMap<_, _> = entry_options
            .iter()
            .map(|(k, v)| (k.to_string(), OptionValue::from(*v)))
            .collect();
        let entry = BackupEntry::builder()
            .source("/dev/vg0/data")
            .branch("b1")
            .target("/data")
            .entry_type(EntryType::Lvm)
            .options(options)
            .build();
        OptionResolver::new(Rc::new(BackupConfig::new(common_config, vec![entry])))
    }

    #[test]
    fn test_entry_override_wins() {
        let r = resolver(&[("snap_size", "2g")], &[("snap_size", "1g")]);
        assert_eq!(
            r.resolve(0, "snap_size", Some("5g".into())).unwrap(),
            Some(OptionValue::from("2g"))
        );
    }

    #[test]
    fn test_common_default_used_without_override() {
        let r = resolver(&[], &[("snap_size", "1g")]);
        assert_eq!(
            r.resolve(0, "snap_size", Some("5g".into())).unwrap(),
            Some(OptionValue::from("1g"))
        );
    }

    #[test]
    fn test_fallback_used_when_both_absent() {
        let r = resolver(&[], &[]);
        assert_eq!(
            r.resolve(0, "snap_size", Some("5g".into())).unwrap(),
            Some(OptionValue::from("5g"))
        );
        assert_eq!(r.resolve(0, "snap_size", None).unwrap(), None);
    }

    #[test]
    fn test_require_missing_option() {
        let r = resolver(&[], &[]);
        match r.require(0, "key_file").unwrap_err() {
            Error::MissingOption { key, scope } => {
                assert_eq!(key, "key_file");
                assert_eq!(scope, "entry 0");
            }
            e => panic!("Expected MissingOption, got {e}"),
        }
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let r = resolver(&[("mount_inplace", "yes")], &[]);
        let first = r.flag(0, "mount_inplace", false).unwrap();
        let second = r.flag(0, "mount_inplace", false).unwrap();
        assert!(first);
        assert_eq!(first, second);
    }

    #[test]
    fn test_flag_rejects_garbage() {
        let r = resolver(&[("mount_inplace", "sometimes")], &[]);
        assert!(r.flag(0, "mount_inplace", false).is_err());
    }

    #[test]
    fn test_unknown_entry_index() {
        let r = resolver(&[], &[]);
        assert!(r.resolve(7, "snap_size", None).is_err());
    }

    #[test]
    fn test_global_lookup() {
        let r = resolver(&[("work_folder", "/ignored")], &[("work_folder", "/var/work")]);
        assert_eq!(r.required_global_text("work_folder").unwrap(), "/var/work");
        assert!(r.required_global_text("bup_folder").is_err());
        assert_eq!(r.global_text("rsync", "/usr/bin/rsync"), "/usr/bin/rsync");
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("1g").unwrap(), 1_073_741_824);
        assert_eq!(parse_size("2,5m").unwrap(), 2_621_440);
        assert_eq!(parse_size("2.5M").unwrap(), 2_621_440);
        assert_eq!(parse_size("10").unwrap(), 10);
        assert_eq!(parse_size("3k").unwrap(), 3072);
        assert_eq!(parse_size("1T").unwrap(), 1_099_511_627_776);
    }

    #[test]
    fn test_parse_size_rejects_malformed() {
        for bad in ["", "g", "1x", "1.2.3g", "-1g", "1 g", "abc"] {
            match parse_size(bad) {
                Err(Error::InvalidSize(s)) => assert_eq!(s, bad),
                other => panic!("Expected InvalidSize for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_size_option() {
        let r = resolver(&[], &[("snap_size", "512m")]);
        assert_eq!(r.size(0, "snap_size").unwrap(), 536_870_912);
    }
}
