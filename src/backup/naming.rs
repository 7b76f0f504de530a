//! Deterministic names for snapshots, decrypted mappings and mount points.
//!
//! Resources that live for the whole run (in-place entries) are named
//! `<template>---<fingerprint>` where the fingerprint hashes `branch:target`.
//! Transient resources share `<template>---tmp`; entries run strictly one
//! after another, so two transient resources with the same template never
//! exist at the same time.

use crate::backup::options::OptionResolver;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;

use sha2::{Digest, Sha256};

use std::path::PathBuf;

pub const NAME_SEPARATOR: &str = "---";
pub const TRANSIENT_SUFFIX: &str = "tmp";

pub fn fingerprint(branch: &str, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(branch.as_bytes());
    hasher.update(b":");
    hasher.update(target.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn permanent_name(template: &str, branch: &str, target: &str) -> String {
    format!("{template}{NAME_SEPARATOR}{}", fingerprint(branch, target))
}

pub fn transient_name(template: &str) -> String {
    format!("{template}{NAME_SEPARATOR}{TRANSIENT_SUFFIX}")
}

/// Fails when a resource about to be created is already present, which means
/// either a previous run crashed or two entries collide.
pub fn ensure_vacant(what: &str, name: &str, exists: bool) -> Result<()> {
    if exists {
        return Err(Error::configuration(format!(
            "Cannot create {what} {name} as it exists already (left over from an aborted run?)"
        )));
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct ResourceNamer {
    options: OptionResolver,
}

impl ResourceNamer {
    pub fn new(options: OptionResolver) -> Self {
        Self { options }
    }

    fn name(&self, index: usize, template_key: &str, in_place: bool) -> Result<String> {
        let template = self.options.required_text(index, template_key)?;
        if in_place {
            let entry = self.options.config().entry(index)?;
            Ok(permanent_name(&template, entry.branch(), entry.target()))
        } else {
            Ok(transient_name(&template))
        }
    }

    pub fn snapshot_name(&self, index: usize, in_place: bool) -> Result<String> {
        self.name(index, "snap_name", in_place)
    }

    pub fn mapping_name(&self, index: usize, in_place: bool) -> Result<String> {
        self.name(index, "decrypt_name", in_place)
    }

    /// Mount point used for transient mounts; `mount_path` overrides the
    /// derived `<mount_base>/<fingerprint>`.
    pub fn mount_point(&self, index: usize) -> Result<PathBuf> {
        if let Some(path) = self.options.resolve(index, "mount_path", None)? {
            return Ok(PathBuf::from(path.to_string()));
        }
        let base = self.options.required_path(index, "mount_base")?;
        let entry = self.options.config().entry(index)?;
        Ok(base.join(fingerprint(entry.branch(), entry.target())))
    }
}
