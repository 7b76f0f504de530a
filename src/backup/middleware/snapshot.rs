use crate::backup::actions::Action;
use crate::backup::context::Context;
use crate::backup::middleware::{Middleware, StageKind, StageState};
use crate::backup::naming::ensure_vacant;
use crate::backup::planner::PoolCache;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;

use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Copy-on-write snapshot of a logical volume.
pub struct SnapshotStage {
    ctx: Rc<Context>,
}

impl SnapshotStage {
    pub fn new(ctx: Rc<Context>) -> Self {
        Self { ctx }
    }

    fn device_for(&self, pool: &str, index: usize, in_place: bool) -> Result<PathBuf> {
        let name = self.ctx.namer().snapshot_name(index, in_place)?;
        Ok(self.ctx.services().snapshots.snapshot_path(pool, &name))
    }
}

impl Middleware for SnapshotStage {
    fn kind(&self) -> StageKind {
        StageKind::Snapshot
    }

    fn check_config(&self, index: usize, in_place: bool, pools: &mut PoolCache) -> Result<()> {
        self.ctx.options().size(index, "snap_size")?;

        let source = PathBuf::from(self.ctx.config().entry(index)?.source());
        let pool = pools.pool_of(&source)?;
        let device = self.device_for(&pool, index, in_place)?;
        let exists = self.ctx.services().snapshots.exists(&device)?;
        ensure_vacant("snapshot", &device.to_string_lossy(), exists)
    }

    fn prepare(&self, _index: usize) -> Result<StageState> {
        Ok(StageState::Empty)
    }

    fn before_step(
        &self,
        index: usize,
        input: &Path,
        in_place: bool,
        _state: StageState,
    ) -> Result<(PathBuf, StageState)> {
        let snapshots = &self.ctx.services().snapshots;
        let name = self.ctx.namer().snapshot_name(index, in_place)?;
        let size = self.ctx.options().size(index, "snap_size")?;
        let pool = snapshots
            .pool_of(input)
            .add_msg(format!("Cannot snapshot {input:?}"))?;
        let expected = snapshots.snapshot_path(&pool, &name);
        ensure_vacant("snapshot", &expected.to_string_lossy(), snapshots.exists(&expected)?)?;

        let device = self.ctx.actions().perform(
            Action::CreateSnapshot {
                source: input.to_path_buf(),
                name: name.clone(),
                size,
            },
            || snapshots.create(input, &name, size),
            || expected.clone(),
        )?;

        Ok((device.clone(), StageState::Snapshot { device }))
    }

    fn after_step(&self, _location: &Path, state: &StageState) -> Result<()> {
        let StageState::Snapshot { device } = state else {
            return Ok(());
        };
        self.ctx.actions().perform_unit(
            Action::RemoveSnapshot {
                device: device.clone(),
            },
            || self.ctx.services().snapshots.remove(device),
        )
    }
}
