//! One complete backup run: validate everything, stage every entry in table
//! order, hand the tree to the backup store, then release what in-place
//! entries kept.

use crate::backup::actions::{Action, Graft};
use crate::backup::config::{BackupConfig, EntryType};
use crate::backup::context::Context;
use crate::backup::middleware::runner::{EntryState, MiddlewareRunner};
use crate::backup::middleware::{stage_plan, StageKind};
use crate::backup::naming::permanent_name;
use crate::backup::planner::{CapacityPlanner, PoolCache};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;
use crate::backup::services::command::split_command;
use crate::backup::services::Services;
use crate::backup::validate::{validate_dir_or_absent, validate_executable};

use itertools::Itertools;
use nix::unistd::geteuid;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub struct BackupRun {
    ctx: Rc<Context>,
    runner: MiddlewareRunner,
}

impl BackupRun {
    pub fn new(config: BackupConfig, services: Services, dry_run: bool) -> Result<Self> {
        let ctx = Rc::new(Context::new(Rc::new(config), services, dry_run)?);
        let runner = MiddlewareRunner::new(ctx.clone())?;
        Ok(Self { ctx, runner })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn runner(&self) -> &MiddlewareRunner {
        &self.runner
    }

    /// Every read-only check, for every entry, before anything is mutated.
    /// Failures of independent entries are reported together.
    pub fn check_config(&self) -> Result<()> {
        let config = self.ctx.config();
        let options = self.ctx.options();
        let services = self.ctx.services();

        if options.global_flag("require_root", true)? {
            check_root()?;
        }
        validate_dir_or_absent(self.ctx.workspace().root()).map_err(|e| {
            Error::configuration(format!("Unusable work_folder: {e}"))
        })?;
        services
            .store
            .check()
            .add_msg("Invalid backup store settings")?;
        if config
            .table()
            .iter()
            .any(|e| !matches!(e.entry_type(), EntryType::Command))
        {
            services
                .tree_sync
                .check()
                .add_msg("Invalid tree sync settings")?;
        }

        let mut pools = PoolCache::new(services.snapshots.clone());
        let mut errors = Vec::new();
        for (index, entry) in config.table().iter().enumerate() {
            tracing::debug!(
                "Checking entry {index}: {} -> {}:{}",
                entry.source(),
                entry.branch(),
                entry.target()
            );
            if let Err(e) = self
                .check_source(index)
                .and_then(|_| self.runner.check_config(index, &mut pools))
            {
                errors.push(e.add_msg(format!(
                    "Invalid backup entry {index} ({} -> {}:{})",
                    entry.source(),
                    entry.branch(),
                    entry.target()
                )));
            }
        }
        errors.extend(self.check_unique_workspaces().err());
        errors.extend(self.check_unique_permanent_names().err());
        convert_error_vec(errors)?;

        CapacityPlanner::new(&self.ctx).validate(&mut pools)?;
        tracing::info!("Configuration of {} entries is valid", config.len());
        Ok(())
    }

    fn check_source(&self, index: usize) -> Result<()> {
        let entry = self.ctx.config().entry(index)?;
        let source = Path::new(entry.source());
        match entry.entry_type() {
            EntryType::Plain => {
                if !source.is_dir() {
                    return Err(Error::configuration(format!(
                        "Source {source:?} is not a directory"
                    )));
                }
            }
            EntryType::Crypt => {
                if !source.exists() {
                    return Err(Error::configuration(format!(
                        "Source {source:?} does not exist"
                    )));
                }
            }
            EntryType::Lvm | EntryType::LvmCrypt => {
                if !self.ctx.services().snapshots.exists(source)? {
                    return Err(Error::configuration(format!(
                        "Source {source:?} is not a logical volume"
                    )));
                }
            }
            EntryType::Command => {
                let argv = split_command(entry.source());
                let program = argv
                    .first()
                    .ok_or_else(|| Error::configuration("Command line is empty"))?;
                validate_executable(program).map_err(|e| {
                    Error::configuration(format!("Cannot run command {program:?}: {e}"))
                })?;
            }
        }

        Ok(())
    }

    fn check_unique_workspaces(&self) -> Result<()> {
        let config = self.ctx.config();
        let mut seen: HashMap<PathBuf, usize> = HashMap::new();
        let mut errors = Vec::new();
        for index in 0..config.len() {
            let path = self.ctx.workspace().entry_path(config, index)?;
            if let Some(first) = seen.insert(path.clone(), index) {
                errors.push(Error::configuration(format!(
                    "Entries {first} and {index} both write to {path:?}"
                )));
            }
        }
        convert_error_vec(errors)
    }

    fn check_unique_permanent_names(&self) -> Result<()> {
        let config = self.ctx.config();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut errors = Vec::new();
        for (index, entry) in config.table().iter().enumerate() {
            if !self.runner.is_in_place(index)? {
                continue;
            }
            let templates = stage_plan(entry.entry_type())
                .iter()
                .filter_map(|kind| match kind {
                    StageKind::Snapshot => Some("snap_name"),
                    StageKind::Decrypt => Some("decrypt_name"),
                    StageKind::Mount => None,
                })
                .collect_vec();
            for key in templates {
                let template = self.ctx.options().required_text(index, key)?;
                let name = permanent_name(&template, entry.branch(), entry.target());
                if let Some(first) = seen.insert(name.clone(), index) {
                    errors.push(Error::configuration(format!(
                        "Entries {first} and {index} would both create {name}"
                    )));
                }
            }
        }
        convert_error_vec(errors)
    }

    /// Validates and runs the whole table. On failure, acquired resources
    /// are given back unless `unwind_on_error` is off.
    pub fn execute(&mut self) -> Result<()> {
        self.check_config()?;
        let unwind = self.ctx.options().global_flag("unwind_on_error", true)?;

        match self.stage_and_save() {
            Err(e) if unwind => Err(self.unwind(e)),
            Err(e) => {
                tracing::warn!("Leaving acquired resources in place as unwind_on_error is off");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    fn stage_and_save(&mut self) -> Result<()> {
        let config = self.ctx.config().clone();
        let root = self.ctx.workspace().root().to_path_buf();

        for index in 0..config.len() {
            self.runner
                .prepare(index)
                .add_msg(format!("Preparing entry {index}"))?;
        }

        for (index, entry) in config.table().iter().enumerate() {
            let span = tracing::info_span!(
                "entry",
                index,
                branch = entry.branch().as_str(),
                target = entry.target().as_str()
            );
            let _enter = span.enter();
            tracing::info!("Staging {} entry {}", entry.entry_type(), entry.source());
            self.runner
                .process(index)
                .add_msg(format!("Processing entry {index}"))?;
        }

        let actions = self.ctx.actions();
        let store = &self.ctx.services().store;
        actions.perform_unit(Action::Index { path: root.clone() }, || store.index(&root))?;
        for branch in config.branches() {
            let grafts = config
                .branch_entries(branch)
                .map(|index| -> Result<Graft> {
                    Ok(Graft {
                        source: self.ctx.workspace().entry_path(&config, index)?,
                        target: config.entry(index)?.target().clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            actions.perform_unit(
                Action::Save {
                    path: root.clone(),
                    branch: branch.to_string(),
                    grafts: grafts.clone(),
                },
                || store.save(&root, branch, &grafts),
            )?;
        }

        for index in (0..config.len()).rev() {
            if self.runner.state(index)? == EntryState::DeferredRelease {
                self.runner.release_deferred(index)?;
            }
        }

        Ok(())
    }

    /// Releases everything still held, newest first, and attaches any
    /// release failure to `error`.
    fn unwind(&mut self, error: Error) -> Error {
        let mut error = error;
        for index in (0..self.ctx.config().len()).rev() {
            if let Err(e) = self.runner.unwind(index) {
                error = error.chain(e.add_msg(format!("Unwinding entry {index}")));
            }
        }
        error
    }
}

fn check_root() -> Result<()> {
    let euid = geteuid();
    if !euid.is_root() {
        return Err(Error::configuration(format!(
            "Must run as root (running as uid {euid}); set require_root = false to skip this check"
        )));
    }
    Ok(())
}
