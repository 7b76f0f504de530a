use crate::backup::actions::Action;
use crate::backup::config::common::DEFAULT_MOUNT_OPTS;
use crate::backup::context::Context;
use crate::backup::middleware::{Middleware, StageKind, StageState};
use crate::backup::planner::PoolCache;
use crate::backup::result_error::result::Result;
use crate::backup::workspace::WorkspaceManager;

use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Mounts the device produced by the previous stage. In-place entries mount
/// straight onto their workspace path, others onto a private mount point.
pub struct MountStage {
    ctx: Rc<Context>,
}

impl MountStage {
    pub fn new(ctx: Rc<Context>) -> Self {
        Self { ctx }
    }

    fn mount_point(&self, index: usize, in_place: bool) -> Result<PathBuf> {
        if in_place {
            self.ctx.workspace().entry_path(self.ctx.config(), index)
        } else {
            self.ctx.namer().mount_point(index)
        }
    }
}

impl Middleware for MountStage {
    fn kind(&self) -> StageKind {
        StageKind::Mount
    }

    fn check_config(&self, index: usize, in_place: bool, _pools: &mut PoolCache) -> Result<()> {
        let mount_point = self.mount_point(index, in_place)?;
        tracing::debug!("entry {index}: mounting at {mount_point:?}");
        Ok(())
    }

    fn prepare(&self, index: usize) -> Result<StageState> {
        let in_place = self.ctx.is_in_place(index)?;
        let mount_point = if in_place {
            self.ctx.workspace().ensure_entry_path(
                self.ctx.config(),
                index,
                false,
                self.ctx.actions(),
            )?
        } else {
            self.mount_point(index, false)?
        };

        Ok(StageState::Mount {
            mount_point,
            transient: !in_place,
        })
    }

    fn before_step(
        &self,
        index: usize,
        input: &Path,
        in_place: bool,
        state: StageState,
    ) -> Result<(PathBuf, StageState)> {
        let mount_point = match state {
            StageState::Mount { mount_point, .. } => mount_point,
            _ => self.mount_point(index, in_place)?,
        };
        if !in_place {
            WorkspaceManager::ensure_path(&mount_point, false, self.ctx.actions())?;
        }
        let options = self.ctx.options().text(index, "mount_opts", DEFAULT_MOUNT_OPTS)?;

        self.ctx.actions().perform_unit(
            Action::Mount {
                device: input.to_path_buf(),
                mount_point: mount_point.clone(),
                options: options.clone(),
            },
            || {
                self.ctx
                    .services()
                    .mounts
                    .mount(input, &mount_point, &options)
            },
        )?;

        Ok((
            mount_point.clone(),
            StageState::Mount {
                mount_point,
                transient: !in_place,
            },
        ))
    }

    fn after_step(&self, location: &Path, state: &StageState) -> Result<()> {
        self.ctx.actions().perform_unit(
            Action::Unmount {
                mount_point: location.to_path_buf(),
            },
            || self.ctx.services().mounts.unmount(location),
        )?;
        if let StageState::Mount {
            transient: true, ..
        } = state
        {
            WorkspaceManager::remove_empty(location, self.ctx.actions())?;
        }
        Ok(())
    }
}
