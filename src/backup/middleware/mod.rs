//! Resource-acquisition stages and the fixed stage list of every entry type.
//!
//! Each stage turns an input location into an output location the next
//! stage reads from (device → snapshot → decrypted mapping → mount point),
//! and knows how to give its resource back.

pub mod crypt;
pub mod mount;
pub mod runner;
pub mod snapshot;

use crate::backup::config::EntryType;
use crate::backup::context::Context;
use crate::backup::planner::PoolCache;
use crate::backup::result_error::result::Result;

use derive_more::{Display, From};

use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    #[display("snapshot")]
    Snapshot,
    #[display("decrypt")]
    Decrypt,
    #[display("mount")]
    Mount,
}

const NO_STAGES: &[StageKind] = &[];
const LVM_STAGES: &[StageKind] = &[StageKind::Snapshot, StageKind::Mount];
const CRYPT_STAGES: &[StageKind] = &[StageKind::Decrypt, StageKind::Mount];
const LVM_CRYPT_STAGES: &[StageKind] = &[StageKind::Snapshot, StageKind::Decrypt, StageKind::Mount];

/// Ordered stages for `entry_type`; the first consumes the entry source.
pub fn stage_plan(entry_type: EntryType) -> &'static [StageKind] {
    match entry_type {
        EntryType::Plain | EntryType::Command => NO_STAGES,
        EntryType::Lvm => LVM_STAGES,
        EntryType::Crypt => CRYPT_STAGES,
        EntryType::LvmCrypt => LVM_CRYPT_STAGES,
    }
}

/// What a stage needs to remember between acquiring and releasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageState {
    Empty,
    Snapshot { device: PathBuf },
    Mapping { name: String },
    /// `transient` mount points are private and removed after unmounting.
    Mount { mount_point: PathBuf, transient: bool },
}

pub trait Middleware {
    fn kind(&self) -> StageKind;

    /// Read-only checks run for every entry before anything is mutated.
    fn check_config(&self, index: usize, in_place: bool, pools: &mut PoolCache) -> Result<()>;

    /// Stage-local setup that needs no input from other stages.
    fn prepare(&self, index: usize) -> Result<StageState>;

    /// Acquires the resource for `input` and returns where the next stage
    /// should read from.
    fn before_step(
        &self,
        index: usize,
        input: &Path,
        in_place: bool,
        state: StageState,
    ) -> Result<(PathBuf, StageState)>;

    /// Releases what `before_step` acquired at `location`.
    fn after_step(&self, location: &Path, state: &StageState) -> Result<()>;
}

#[derive(From)]
pub enum Stage {
    Snapshot(snapshot::SnapshotStage),
    Decrypt(crypt::DecryptStage),
    Mount(mount::MountStage),
}

impl Stage {
    pub fn new(kind: StageKind, ctx: Rc<Context>) -> Self {
        match kind {
            StageKind::Snapshot => snapshot::SnapshotStage::new(ctx).into(),
            StageKind::Decrypt => crypt::DecryptStage::new(ctx).into(),
            StageKind::Mount => mount::MountStage::new(ctx).into(),
        }
    }

    /// The stage list for `entry_type`, sharing `ctx`.
    pub fn build_all(entry_type: EntryType, ctx: &Rc<Context>) -> Vec<Stage> {
        stage_plan(entry_type)
            .iter()
            .map(|kind| Stage::new(*kind, ctx.clone()))
            .collect()
    }

    fn inner(&self) -> &dyn Middleware {
        match self {
            Stage::Snapshot(s) => s,
            Stage::Decrypt(s) => s,
            Stage::Mount(s) => s,
        }
    }
}

impl Middleware for Stage {
    fn kind(&self) -> StageKind {
        self.inner().kind()
    }

    fn check_config(&self, index: usize, in_place: bool, pools: &mut PoolCache) -> Result<()> {
        self.inner().check_config(index, in_place, pools)
    }

    fn prepare(&self, index: usize) -> Result<StageState> {
        self.inner().prepare(index)
    }

    fn before_step(
        &self,
        index: usize,
        input: &Path,
        in_place: bool,
        state: StageState,
    ) -> Result<(PathBuf, StageState)> {
        self.inner().before_step(index, input, in_place, state)
    }

    fn after_step(&self, location: &Path, state: &StageState) -> Result<()> {
        self.inner().after_step(location, state)
    }
}
