//! Contracts for the external tools the staging engine drives.
//!
//! Read-only calls (`exists`, `pool_of`, `free_space`, path helpers) are
//! always made, dry-run or not. Mutating calls are only ever reached through
//! [`ActionLog::perform`](crate::backup::actions::ActionLog::perform).

pub mod bup;
pub mod command;
pub mod cryptsetup;
pub mod lvm;
pub mod mount;
pub mod process;
pub mod rsync;

use crate::backup::actions::Graft;
use crate::backup::config::common::{DEFAULT_BUP_CMD, DEFAULT_RSYNC};
use crate::backup::options::OptionResolver;
use crate::backup::result_error::result::Result;

use bon::Builder;

use std::path::{Path, PathBuf};
use std::rc::Rc;

pub trait SnapshotService {
    /// Whether the logical volume at `device` exists.
    fn exists(&self, device: &Path) -> Result<bool>;
    /// Name of the pool (volume group) backing `device`.
    fn pool_of(&self, device: &Path) -> Result<String>;
    fn free_space(&self, pool: &str) -> Result<u64>;
    fn snapshot_path(&self, pool: &str, name: &str) -> PathBuf;
    fn create(&self, source: &Path, name: &str, size: u64) -> Result<PathBuf>;
    fn remove(&self, device: &Path) -> Result<()>;
}

pub trait CryptService {
    fn mapped_path(&self, name: &str) -> PathBuf;
    fn exists(&self, name: &str) -> bool;
    fn open(&self, device: &Path, key_file: &Path, name: &str) -> Result<PathBuf>;
    fn close(&self, name: &str) -> Result<()>;
}

pub trait MountService {
    fn mount(&self, device: &Path, mount_point: &Path, options: &str) -> Result<()>;
    fn unmount(&self, mount_point: &Path) -> Result<()>;
}

/// Per-entry tuning handed to the tree sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub short_opts: String,
    pub long_opts: Vec<String>,
}

pub trait TreeSync {
    fn check(&self) -> Result<()>;
    /// Makes `dest` mirror `source`, leaving `protected` subpaths of `dest`
    /// untouched.
    fn sync(
        &self,
        source: &Path,
        dest: &Path,
        protected: &[String],
        options: &SyncOptions,
    ) -> Result<()>;
}

pub trait BackupStore {
    fn check(&self) -> Result<()>;
    fn index(&self, path: &Path) -> Result<()>;
    fn save(&self, path: &Path, branch: &str, grafts: &[Graft]) -> Result<()>;
}

/// Runs the program behind a `command` entry.
pub trait CommandService {
    fn run(&self, argv: &[String], cwd: &Path) -> Result<()>;
}

#[derive(Clone, Builder)]
pub struct Services {
    pub snapshots: Rc<dyn SnapshotService>,
    pub crypt: Rc<dyn CryptService>,
    pub mounts: Rc<dyn MountService>,
    pub tree_sync: Rc<dyn TreeSync>,
    pub store: Rc<dyn BackupStore>,
    pub commands: Rc<dyn CommandService>,
}

impl Services {
    /// The real command-line tools, configured from the common options.
    pub fn system(options: &OptionResolver) -> Result<Self> {
        let rsync = rsync::Rsync::builder()
            .rsync(options.global_text("rsync", DEFAULT_RSYNC))
            .build();
        let bup = bup::Bup::builder()
            .bup_cmd(options.global_text("bup_cmd", DEFAULT_BUP_CMD))
            .bup_folder(options.required_global_text("bup_folder")?)
            .build();

        Ok(Services::builder()
            .snapshots(Rc::new(lvm::Lvm))
            .crypt(Rc::new(cryptsetup::Cryptsetup::default()))
            .mounts(Rc::new(mount::Mounter))
            .tree_sync(Rc::new(rsync))
            .store(Rc::new(bup))
            .commands(Rc::new(command::CommandRunner))
            .build())
    }
}
