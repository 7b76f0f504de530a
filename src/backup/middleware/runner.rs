//! Drives every entry through its stages:
//! `Idle → Prepared → Acquired → Synced → Released | DeferredRelease`.
//!
//! Entries are processed strictly one after another. An entry whose
//! workspace aliases its last mount (in place) keeps its resources until
//! [`MiddlewareRunner::release_deferred`] is called after the store has seen
//! the tree.

use crate::backup::actions::Action;
use crate::backup::config::{BackupConfig, EntryType};
use crate::backup::context::Context;
use crate::backup::middleware::{Middleware, Stage, StageState};
use crate::backup::planner::PoolCache;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;
use crate::backup::services::command::split_command;
use crate::backup::services::rsync::{DEFAULT_LONG_OPTS, DEFAULT_SHORT_OPTS};
use crate::backup::services::SyncOptions;
use crate::backup::workspace::WorkspaceManager;

use derive_more::Display;
use itertools::Itertools;

use std::path::PathBuf;
use std::rc::Rc;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    #[display("idle")]
    Idle,
    #[display("prepared")]
    Prepared,
    #[display("acquired")]
    Acquired,
    #[display("synced")]
    Synced,
    #[display("released")]
    Released,
    #[display("waiting for deferred release")]
    DeferredRelease,
    #[display("failed")]
    Failed,
}

struct EntryRun {
    state: EntryState,
    in_place: bool,
    stages: Vec<Stage>,
    prepared: Vec<StageState>,
    /// `(output location, state)` of every stage whose `before_step`
    /// succeeded, in acquisition order.
    acquired: Vec<(PathBuf, StageState)>,
}

/// Subpaths of `index`'s target owned by other entries of the same branch,
/// relative to that target.
pub fn protected_paths(config: &BackupConfig, index: usize) -> Result<Vec<String>> {
    let entry = config.entry(index)?;
    let current = entry.target().trim_end_matches('/');

    let mut protected = Vec::new();
    for other in config.branch_entries(entry.branch()) {
        if other == index {
            continue;
        }
        let Some(rest) = config.entry(other)?.target().strip_prefix(current) else {
            continue;
        };
        let rest = rest.trim_end_matches('/');
        if rest.starts_with('/') && rest.len() > 1 {
            protected.push(rest.to_string());
        }
    }

    Ok(protected.into_iter().unique().collect())
}

pub struct MiddlewareRunner {
    ctx: Rc<Context>,
    entries: Vec<EntryRun>,
}

impl MiddlewareRunner {
    pub fn new(ctx: Rc<Context>) -> Result<Self> {
        let entries = ctx
            .config()
            .table()
            .iter()
            .enumerate()
            .map(|(index, entry)| -> Result<EntryRun> {
                Ok(EntryRun {
                    state: EntryState::Idle,
                    in_place: ctx.is_in_place(index)?,
                    stages: Stage::build_all(entry.entry_type(), &ctx),
                    prepared: Vec::new(),
                    acquired: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { ctx, entries })
    }

    fn run(&self, index: usize) -> Result<&EntryRun> {
        self.entries
            .get(index)
            .ok_or_else(|| Error::configuration(format!("No backup entry with index {index}")))
    }

    fn run_mut(&mut self, index: usize) -> Result<&mut EntryRun> {
        self.entries
            .get_mut(index)
            .ok_or_else(|| Error::configuration(format!("No backup entry with index {index}")))
    }

    fn expect_state(
        &self,
        index: usize,
        expected: EntryState,
        operation: &'static str,
    ) -> Result<()> {
        let state = self.run(index)?.state;
        if state != expected {
            return Err(Error::InvalidTransition {
                index,
                state: state.to_string(),
                operation,
            });
        }
        Ok(())
    }

    pub fn state(&self, index: usize) -> Result<EntryState> {
        Ok(self.run(index)?.state)
    }

    pub fn is_in_place(&self, index: usize) -> Result<bool> {
        Ok(self.run(index)?.in_place)
    }

    /// Read-only checks of every stage of `index`.
    pub fn check_config(&self, index: usize, pools: &mut PoolCache) -> Result<()> {
        let run = self.run(index)?;
        let errors = run
            .stages
            .iter()
            .filter_map(|stage| {
                stage
                    .check_config(index, run.in_place, pools)
                    .add_msg(format!("Checking {} stage", stage.kind()))
                    .err()
            })
            .collect_vec();
        convert_error_vec(errors)
    }

    /// `Idle → Prepared`.
    pub fn prepare(&mut self, index: usize) -> Result<()> {
        self.expect_state(index, EntryState::Idle, "prepare")?;
        let prepared = self
            .run(index)?
            .stages
            .iter()
            .map(|stage| stage.prepare(index))
            .collect::<Result<Vec<_>>>();

        let run = self.run_mut(index)?;
        match prepared {
            Ok(prepared) => {
                run.prepared = prepared;
                run.state = EntryState::Prepared;
                Ok(())
            }
            Err(e) => {
                run.state = EntryState::Failed;
                Err(e)
            }
        }
    }

    /// `Prepared → Acquired`, returning the location the last stage exposes
    /// (the entry source itself when there are no stages).
    pub fn acquire(&mut self, index: usize) -> Result<PathBuf> {
        self.expect_state(index, EntryState::Prepared, "acquire")?;
        let mut location = PathBuf::from(self.ctx.config().entry(index)?.source());

        let run = self.run_mut(index)?;
        let prepared = std::mem::take(&mut run.prepared);
        for (stage, state) in run.stages.iter().zip(prepared) {
            match stage.before_step(index, &location, run.in_place, state) {
                Ok((output, state)) => {
                    run.acquired.push((output.clone(), state));
                    location = output;
                }
                Err(e) => {
                    run.state = EntryState::Failed;
                    return Err(e.add_msg(format!("Acquiring {} stage", stage.kind())));
                }
            }
        }

        run.state = EntryState::Acquired;
        Ok(location)
    }

    /// `Acquired → Synced`: fills the workspace from `location`.
    pub fn sync(&mut self, index: usize, location: PathBuf) -> Result<()> {
        self.expect_state(index, EntryState::Acquired, "sync")?;
        let result = self.fill_workspace(index, location);
        self.run_mut(index)?.state = match &result {
            Ok(()) => EntryState::Synced,
            Err(_) => EntryState::Failed,
        };
        result
    }

    fn fill_workspace(&self, index: usize, location: PathBuf) -> Result<()> {
        let ctx = &self.ctx;
        let entry = ctx.config().entry(index)?;
        let actions = ctx.actions();

        if entry.entry_type() == EntryType::Command {
            let workspace = ctx
                .workspace()
                .ensure_entry_path(ctx.config(), index, true, actions)?;
            WorkspaceManager::restrict(&workspace, actions)?;
            let argv = split_command(entry.source());
            return actions.perform_unit(
                Action::RunCommand {
                    argv: argv.clone(),
                    cwd: workspace.clone(),
                },
                || ctx.services().commands.run(&argv, &workspace),
            );
        }

        if self.run(index)?.in_place {
            tracing::debug!("entry {index}: workspace is the mount itself, nothing to copy");
            return Ok(());
        }

        let workspace = ctx
            .workspace()
            .ensure_entry_path(ctx.config(), index, false, actions)?;
        let protected = protected_paths(ctx.config(), index)?;
        let options = self.sync_options(index)?;
        actions.perform_unit(
            Action::Sync {
                source: location.clone(),
                dest: workspace.clone(),
                protected: protected.clone(),
            },
            || {
                ctx.services()
                    .tree_sync
                    .sync(&location, &workspace, &protected, &options)
            },
        )
    }

    fn sync_options(&self, index: usize) -> Result<SyncOptions> {
        let options = self.ctx.options();
        Ok(SyncOptions {
            short_opts: options.text(index, "rsync_short_opts", DEFAULT_SHORT_OPTS)?,
            long_opts: options
                .text(index, "rsync_opts", DEFAULT_LONG_OPTS)?
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        })
    }

    /// `Synced → Released`, or `Synced → DeferredRelease` for in-place
    /// entries.
    pub fn release(&mut self, index: usize) -> Result<()> {
        self.expect_state(index, EntryState::Synced, "release")?;
        if self.run(index)?.in_place {
            tracing::info!("Keeping resources of entry {index} until the backup is saved");
            self.run_mut(index)?.state = EntryState::DeferredRelease;
            return Ok(());
        }
        self.teardown(index, EntryState::Released)
    }

    /// `DeferredRelease → Released`.
    pub fn release_deferred(&mut self, index: usize) -> Result<()> {
        self.expect_state(index, EntryState::DeferredRelease, "release deferred resources")?;
        self.teardown(index, EntryState::Released)
    }

    /// Acquire, sync and release (or defer) one prepared entry.
    pub fn process(&mut self, index: usize) -> Result<()> {
        let location = self.acquire(index)?;
        self.sync(index, location)?;
        self.release(index)
    }

    /// Best-effort release of whatever `index` still holds, whatever its
    /// state.
    pub fn unwind(&mut self, index: usize) -> Result<()> {
        if self.run(index)?.acquired.is_empty() {
            return Ok(());
        }
        tracing::warn!("Unwinding resources of entry {index}");
        let final_state = match self.state(index)? {
            EntryState::Failed => EntryState::Failed,
            _ => EntryState::Released,
        };
        self.teardown(index, final_state)
    }

    /// Runs `after_step` on every acquired stage in reverse order. Every
    /// stage is attempted even when an earlier one fails.
    fn teardown(&mut self, index: usize, final_state: EntryState) -> Result<()> {
        let run = self.run_mut(index)?;
        let acquired = std::mem::take(&mut run.acquired);
        let mut errors = Vec::new();
        for (stage, (location, state)) in run.stages.iter().zip(acquired).rev() {
            if let Err(e) = stage.after_step(&location, &state) {
                tracing::warn!("Releasing {} stage of entry {index} failed: {e}", stage.kind());
                errors.push(e.add_msg(format!("Releasing {} stage", stage.kind())));
            }
        }

        run.state = if errors.is_empty() {
            final_state
        } else {
            EntryState::Failed
        };
        convert_error_vec(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::config::common::CommonConfig;
    use crate::backup::config::{BackupEntry, OptionValue};
    use crate::backup::naming::permanent_name;
    use crate::backup::planner::PoolCache;
    use crate::backup::testing::FakeWorld;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::TempDir;

    fn entry(branch: &str, target: &str) -> BackupEntry {
        BackupEntry::builder()
            .source("/srv")
            .branch(branch)
            .target(target)
            .entry_type(EntryType::Plain)
            .build()
    }

    fn lvm_entry(target: &str, in_place: bool) -> BackupEntry {
        let mut options = BTreeMap::new();
        options.insert("mount_inplace".to_string(), OptionValue::Flag(in_place));
        BackupEntry::builder()
            .source("/dev/vg0/data")
            .branch("home")
            .target(target)
            .entry_type(EntryType::Lvm)
            .options(options)
            .build()
    }

    fn lvm_crypt_entry(key_file: &Path, in_place: bool) -> BackupEntry {
        let mut options = BTreeMap::new();
        options.insert("mount_inplace".to_string(), OptionValue::Flag(in_place));
        options.insert(
            "key_file".to_string(),
            OptionValue::from(key_file.to_string_lossy().into_owned()),
        );
        BackupEntry::builder()
            .source("/dev/vg0/data")
            .branch("home")
            .target("/data")
            .entry_type(EntryType::LvmCrypt)
            .options(options)
            .build()
    }

    fn key_file(dir: &TempDir) -> PathBuf {
        let key = dir.path().join("key");
        std::fs::write(&key, "secret").unwrap();
        key
    }

    fn runner(dir: &TempDir, table: Vec<BackupEntry>) -> (Rc<FakeWorld>, MiddlewareRunner) {
        let world = FakeWorld::new();
        world.add_volume("/dev/vg0/data", "vg0");
        let mut common = CommonConfig::default();
        common
            .set("work_folder", dir.path().join("work").to_string_lossy().into_owned())
            .set("mount_base", dir.path().join("mnt").to_string_lossy().into_owned());
        let config = Rc::new(BackupConfig::new(common, table));
        let ctx = Context::new(config, world.services(), false).unwrap();
        let runner = MiddlewareRunner::new(Rc::new(ctx)).unwrap();
        (world, runner)
    }

    #[test]
    fn test_protected_paths_of_nested_targets() {
        let config = BackupConfig::new(
            CommonConfig::default(),
            vec![
                entry("home", "/data"),
                entry("home", "/data/sub"),
                entry("home", "/database"),
                entry("other", "/data/elsewhere"),
            ],
        );

        assert_eq!(protected_paths(&config, 0).unwrap(), vec!["/sub"]);
        assert!(protected_paths(&config, 1).unwrap().is_empty());
        assert!(protected_paths(&config, 2).unwrap().is_empty());
    }

    #[test]
    fn test_protected_paths_of_root_target() {
        let config = BackupConfig::new(
            CommonConfig::default(),
            vec![entry("sys", "/"), entry("sys", "/var/"), entry("sys", "/home")],
        );

        assert_eq!(protected_paths(&config, 0).unwrap(), vec!["/var", "/home"]);
    }

    #[test]
    fn test_transient_entry_releases_in_reverse_order() {
        let dir = TempDir::new().unwrap();
        let (world, mut runner) = runner(&dir, vec![lvm_entry("/data", false)]);

        runner.prepare(0).unwrap();
        runner.process(0).unwrap();

        assert_eq!(runner.state(0).unwrap(), EntryState::Released);
        let mount_point = dir
            .path()
            .join("mnt")
            .join(crate::backup::naming::fingerprint("home", "/data"));
        assert_eq!(
            world.calls(),
            vec![
                "create snap-backup---tmp".to_string(),
                format!("mount /dev/vg0/snap-backup---tmp {}", mount_point.display()),
                format!(
                    "sync {} {}",
                    mount_point.display(),
                    dir.path().join("work/home/data").display()
                ),
                format!("umount {}", mount_point.display()),
                "remove /dev/vg0/snap-backup---tmp".to_string(),
            ]
        );
    }

    #[test]
    fn test_in_place_entry_defers_release() {
        let dir = TempDir::new().unwrap();
        let (world, mut runner) = runner(&dir, vec![lvm_entry("/data", true)]);

        runner.prepare(0).unwrap();
        runner.process(0).unwrap();
        assert_eq!(runner.state(0).unwrap(), EntryState::DeferredRelease);
        assert!(!world.calls().iter().any(|c| c.starts_with("sync")));
        assert!(!world.calls().iter().any(|c| c.starts_with("umount")));

        runner.release_deferred(0).unwrap();
        assert_eq!(runner.state(0).unwrap(), EntryState::Released);
        let calls = world.calls();
        assert!(calls[calls.len() - 2].starts_with("umount"));
        assert!(calls[calls.len() - 1].starts_with("remove /dev/vg0/snap-backup---"));
    }

    #[test]
    fn test_out_of_order_transition_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (_world, mut runner) = runner(&dir, vec![lvm_entry("/data", false)]);

        match runner.acquire(0).unwrap_err() {
            Error::InvalidTransition { index, state, .. } => {
                assert_eq!(index, 0);
                assert_eq!(state, "idle");
            }
            e => panic!("Expected InvalidTransition, got {e}"),
        }
        assert!(runner.release_deferred(0).is_err());
    }

    #[test]
    fn test_failed_acquisition_unwinds_acquired_stages() {
        let dir = TempDir::new().unwrap();
        let (world, mut runner) = runner(&dir, vec![lvm_entry("/data", false)]);
        world.fail_on("mount");

        runner.prepare(0).unwrap();
        assert!(runner.process(0).is_err());
        assert_eq!(runner.state(0).unwrap(), EntryState::Failed);

        runner.unwind(0).unwrap();
        assert_eq!(
            world.calls().last().unwrap(),
            "remove /dev/vg0/snap-backup---tmp"
        );
        assert!(!world.calls().iter().any(|c| c.starts_with("umount")));
    }

    #[test]
    fn test_transient_lvm_crypt_chains_stages_and_releases_in_reverse() {
        let dir = TempDir::new().unwrap();
        let key = key_file(&dir);
        let (world, mut runner) = runner(&dir, vec![lvm_crypt_entry(&key, false)]);
        let mut pools = PoolCache::new(world.clone());

        runner.check_config(0, &mut pools).unwrap();
        runner.prepare(0).unwrap();
        runner.process(0).unwrap();

        assert_eq!(runner.state(0).unwrap(), EntryState::Released);
        let mount_point = dir
            .path()
            .join("mnt")
            .join(crate::backup::naming::fingerprint("home", "/data"));
        assert_eq!(
            world.calls(),
            vec![
                "create snap-backup---tmp".to_string(),
                "open /dev/vg0/snap-backup---tmp snap-backup-decrypted---tmp".to_string(),
                format!(
                    "mount /dev/mapper/snap-backup-decrypted---tmp {}",
                    mount_point.display()
                ),
                format!(
                    "sync {} {}",
                    mount_point.display(),
                    dir.path().join("work/home/data").display()
                ),
                format!("umount {}", mount_point.display()),
                "close snap-backup-decrypted---tmp".to_string(),
                "remove /dev/vg0/snap-backup---tmp".to_string(),
            ]
        );
        assert!(!mount_point.exists());
    }

    #[test]
    fn test_in_place_lvm_crypt_uses_permanent_names() {
        let dir = TempDir::new().unwrap();
        let key = key_file(&dir);
        let (world, mut runner) = runner(&dir, vec![lvm_crypt_entry(&key, true)]);
        let snapshot = permanent_name("snap-backup", "home", "/data");
        let mapping = permanent_name("snap-backup-decrypted", "home", "/data");
        let workspace = dir.path().join("work/home/data");

        runner.prepare(0).unwrap();
        runner.process(0).unwrap();
        assert_eq!(runner.state(0).unwrap(), EntryState::DeferredRelease);
        assert_eq!(
            world.calls(),
            vec![
                format!("create {snapshot}"),
                format!("open /dev/vg0/{snapshot} {mapping}"),
                format!("mount /dev/mapper/{mapping} {}", workspace.display()),
            ]
        );

        runner.release_deferred(0).unwrap();
        assert_eq!(runner.state(0).unwrap(), EntryState::Released);
        assert_eq!(
            world.calls()[3..],
            [
                format!("umount {}", workspace.display()),
                format!("close {mapping}"),
                format!("remove /dev/vg0/{snapshot}"),
            ]
        );
        assert!(workspace.is_dir());
    }

    #[test]
    fn test_failed_mount_closes_mapping_before_removing_snapshot() {
        let dir = TempDir::new().unwrap();
        let key = key_file(&dir);
        let (world, mut runner) = runner(&dir, vec![lvm_crypt_entry(&key, false)]);
        world.fail_on("mount");

        runner.prepare(0).unwrap();
        assert!(runner.process(0).is_err());
        runner.unwind(0).unwrap();

        let calls = world.calls();
        assert_eq!(
            calls[calls.len() - 2..],
            [
                "close snap-backup-decrypted---tmp".to_string(),
                "remove /dev/vg0/snap-backup---tmp".to_string(),
            ]
        );
    }
}
