//! # bup-backup
//!
//! Stages heterogeneous backup sources into one working tree and hands that
//! tree to bup.
//!
//! ## Features
//!
//! - **Entry types**: plain folders, command output, LVM snapshots, LUKS
//!   volumes and LUKS on top of LVM snapshots
//! - **Capacity planning**: every volume group is proven large enough before
//!   the first snapshot is taken
//! - **In-place or copied**: resources are either copied into the tree and
//!   released at once, or mounted onto the tree and kept until bup is done
//! - **Dry run**: the full decision log without touching anything
//!
//! ## Quick Start
//!
//! ```no_run
//! use bup_backup::backup::config::BackupConfig;
//! use bup_backup::backup::options::OptionResolver;
//! use bup_backup::backup::run::BackupRun;
//! use bup_backup::backup::services::Services;
//! use std::rc::Rc;
//!
//! let config = BackupConfig::load("/etc/bup-backup", "common.conf", "backup.table")?;
//! let services = Services::system(&OptionResolver::new(Rc::new(config.clone())))?;
//! BackupRun::new(config, services, false)?.execute()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
