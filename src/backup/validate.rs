//! Validation functions for configuration values.
//!
//! Provides custom validation functions for branch names, directories,
//! executables and key files, usable from `#[validate(custom(...))]`.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub fn validate_branch_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || !is_sanitized(name) {
        return Err(ValidationError::new("InvalidBranchName").with_message(
            format!(
                "Branch must be usable as a directory name, try sanitizing like {:?}",
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_dir_exist<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} not found", dir).into()));
    }

    Ok(())
}

/// Accepts a directory that either exists or can be created later; only an
/// existing non-directory is rejected.
pub fn validate_dir_or_absent<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.as_os_str().is_empty() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message("directory path is empty".into()));
    }
    if dir.exists() && !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}

pub fn validate_executable<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    let path = path.as_ref();
    let md = std::fs::metadata(path).map_err(|e| {
        ValidationError::new("InvalidExecutable")
            .with_message(format!("cannot access {:?}: {}", path, e).into())
    })?;
    if !md.is_file() {
        return Err(ValidationError::new("InvalidExecutable")
            .with_message(format!("{:?} is not a file", path).into()));
    }
    if md.permissions().mode() & 0o111 == 0 {
        return Err(ValidationError::new("InvalidExecutable")
            .with_message(format!("{:?} cannot be executed", path).into()));
    }

    Ok(())
}

pub fn validate_key_file<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ValidationError::new("InvalidKeyFile")
            .with_message(format!("key file {:?} not found", path).into()));
    }
    let file = File::open(path).map_err(|e| {
        ValidationError::new("InvalidKeyFile")
            .with_message(format!("cannot read key file {:?}: {}", path, e).into())
    })?;
    let md = file.metadata().map_err(|e| {
        ValidationError::new("InvalidKeyFile")
            .with_message(format!("cannot access metadata for {:?}: {}", path, e).into())
    })?;
    if md.len() == 0 {
        return Err(ValidationError::new("InvalidKeyFile")
            .with_message(format!("key file {:?} is empty", path).into()));
    }

    Ok(())
}
