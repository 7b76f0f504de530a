//! In-memory collaborators for tests. Every mutating call is recorded as a
//! short line such as `create snap---tmp` so tests can assert on order.

use crate::backup::actions::Graft;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::services::{
    BackupStore, CommandService, CryptService, MountService, Services, SnapshotService,
    SyncOptions, TreeSync,
};

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Default)]
pub(crate) struct FakeWorld {
    calls: RefCell<Vec<String>>,
    lookups: Cell<usize>,
    pools: RefCell<HashMap<PathBuf, String>>,
    free: RefCell<HashMap<String, u64>>,
    mappings: RefCell<HashSet<String>>,
    protected: RefCell<Vec<Vec<String>>>,
    fail_on: RefCell<Option<String>>,
}

impl FakeWorld {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn add_volume<P: Into<PathBuf>>(&self, device: P, pool: &str) {
        self.pools
            .borrow_mut()
            .insert(device.into(), pool.to_string());
    }

    pub fn set_free_space(&self, pool: &str, bytes: u64) {
        self.free.borrow_mut().insert(pool.to_string(), bytes);
    }

    pub fn add_mapping(&self, name: &str) {
        self.mappings.borrow_mut().insert(name.to_string());
    }

    /// Makes the first mutating call starting with `prefix` fail.
    pub fn fail_on(&self, prefix: &str) {
        *self.fail_on.borrow_mut() = Some(prefix.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Number of pool and free space lookups that reached the service.
    pub fn lookups(&self) -> usize {
        self.lookups.get()
    }

    /// Protected subpaths handed to each sync, in call order.
    pub fn protected(&self) -> Vec<Vec<String>> {
        self.protected.borrow().clone()
    }

    pub fn services(self: &Rc<Self>) -> Services {
        Services::builder()
            .snapshots(self.clone())
            .crypt(self.clone())
            .mounts(self.clone())
            .tree_sync(self.clone())
            .store(self.clone())
            .commands(self.clone())
            .build()
    }

    fn record(&self, call: String) -> Result<()> {
        let failing = self
            .fail_on
            .borrow()
            .as_ref()
            .is_some_and(|prefix| call.starts_with(prefix.as_str()));
        self.calls.borrow_mut().push(call.clone());
        if failing {
            *self.fail_on.borrow_mut() = None;
            return Err(Error::Execution {
                command: call,
                status: "exit status: 1".to_string(),
                output: "simulated failure".to_string(),
            });
        }

        Ok(())
    }
}

impl SnapshotService for FakeWorld {
    fn exists(&self, device: &Path) -> Result<bool> {
        Ok(self.pools.borrow().contains_key(device))
    }

    fn pool_of(&self, device: &Path) -> Result<String> {
        self.lookups.set(self.lookups.get() + 1);
        self.pools
            .borrow()
            .get(device)
            .cloned()
            .ok_or_else(|| Error::configuration(format!("{device:?} is not a logical volume")))
    }

    fn free_space(&self, pool: &str) -> Result<u64> {
        self.lookups.set(self.lookups.get() + 1);
        Ok(self.free.borrow().get(pool).copied().unwrap_or(0))
    }

    fn snapshot_path(&self, pool: &str, name: &str) -> PathBuf {
        Path::new("/dev").join(pool).join(name)
    }

    fn create(&self, source: &Path, name: &str, _size: u64) -> Result<PathBuf> {
        self.record(format!("create {name}"))?;
        let pool = self
            .pools
            .borrow()
            .get(source)
            .cloned()
            .unwrap_or_default();
        let device = self.snapshot_path(&pool, name);
        self.add_volume(device.clone(), &pool);
        Ok(device)
    }

    fn remove(&self, device: &Path) -> Result<()> {
        self.record(format!("remove {}", device.display()))?;
        self.pools.borrow_mut().remove(device);
        Ok(())
    }
}

impl CryptService for FakeWorld {
    fn mapped_path(&self, name: &str) -> PathBuf {
        Path::new("/dev/mapper").join(name)
    }

    fn exists(&self, name: &str) -> bool {
        self.mappings.borrow().contains(name)
    }

    fn open(&self, device: &Path, _key_file: &Path, name: &str) -> Result<PathBuf> {
        self.record(format!("open {} {name}", device.display()))?;
        self.add_mapping(name);
        Ok(self.mapped_path(name))
    }

    fn close(&self, name: &str) -> Result<()> {
        self.record(format!("close {name}"))?;
        self.mappings.borrow_mut().remove(name);
        Ok(())
    }
}

impl MountService for FakeWorld {
    fn mount(&self, device: &Path, mount_point: &Path, _options: &str) -> Result<()> {
        self.record(format!(
            "mount {} {}",
            device.display(),
            mount_point.display()
        ))
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        self.record(format!("umount {}", mount_point.display()))
    }
}

impl TreeSync for FakeWorld {
    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn sync(
        &self,
        source: &Path,
        dest: &Path,
        protected: &[String],
        _options: &SyncOptions,
    ) -> Result<()> {
        self.record(format!("sync {} {}", source.display(), dest.display()))?;
        self.protected.borrow_mut().push(protected.to_vec());
        Ok(())
    }
}

impl BackupStore for FakeWorld {
    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn index(&self, path: &Path) -> Result<()> {
        self.record(format!("index {}", path.display()))
    }

    fn save(&self, _path: &Path, branch: &str, grafts: &[Graft]) -> Result<()> {
        self.record(format!("save {branch} {}", grafts.len()))
    }
}

impl CommandService for FakeWorld {
    fn run(&self, argv: &[String], _cwd: &Path) -> Result<()> {
        self.record(format!("run {}", argv.join(" ")))
    }
}
