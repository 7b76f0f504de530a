use crate::backup::actions::Action;
use crate::backup::context::Context;
use crate::backup::middleware::{Middleware, StageKind, StageState};
use crate::backup::naming::ensure_vacant;
use crate::backup::planner::PoolCache;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::validate_key_file;

use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Opens an encrypted device with the entry's `key_file`.
pub struct DecryptStage {
    ctx: Rc<Context>,
}

impl DecryptStage {
    pub fn new(ctx: Rc<Context>) -> Self {
        Self { ctx }
    }

    fn key_file(&self, index: usize) -> Result<PathBuf> {
        let key_file = self.ctx.options().required_path(index, "key_file")?;
        validate_key_file(&key_file).map_err(|e| {
            Error::configuration(format!("Unusable key_file of entry {index}: {e}"))
        })?;
        Ok(key_file)
    }
}

impl Middleware for DecryptStage {
    fn kind(&self) -> StageKind {
        StageKind::Decrypt
    }

    fn check_config(&self, index: usize, in_place: bool, _pools: &mut PoolCache) -> Result<()> {
        self.key_file(index)?;
        let name = self.ctx.namer().mapping_name(index, in_place)?;
        ensure_vacant(
            "encrypted mapping",
            &name,
            self.ctx.services().crypt.exists(&name),
        )
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
        let crypt = &self.ctx.services().crypt;
        let key_file = self.key_file(index)?;
        let name = self.ctx.namer().mapping_name(index, in_place)?;
        ensure_vacant("encrypted mapping", &name, crypt.exists(&name))?;

        let mapped = self.ctx.actions().perform(
            Action::OpenMapping {
                device: input.to_path_buf(),
                key_file: key_file.clone(),
                name: name.clone(),
            },
            || crypt.open(input, &key_file, &name),
            || crypt.mapped_path(&name),
        )?;

        Ok((mapped, StageState::Mapping { name }))
    }

    fn after_step(&self, _location: &Path, state: &StageState) -> Result<()> {
        let StageState::Mapping { name } = state else {
            return Ok(());
        };
        self.ctx.actions().perform_unit(
            Action::CloseMapping { name: name.clone() },
            || self.ctx.services().crypt.close(name),
        )
    }
}
