//! Shared, read-only view of one run handed to every stage.

use crate::backup::actions::ActionLog;
use crate::backup::config::BackupConfig;
use crate::backup::middleware::stage_plan;
use crate::backup::naming::ResourceNamer;
use crate::backup::options::OptionResolver;
use crate::backup::result_error::result::Result;
use crate::backup::services::Services;
use crate::backup::workspace::WorkspaceManager;

use getset::Getters;

use std::rc::Rc;

#[derive(Getters)]
#[getset(get = "pub")]
pub struct Context {
    config: Rc<BackupConfig>,
    options: OptionResolver,
    namer: ResourceNamer,
    workspace: WorkspaceManager,
    services: Services,
    actions: ActionLog,
}

impl Context {
    pub fn new(config: Rc<BackupConfig>, services: Services, dry_run: bool) -> Result<Self> {
        let options = OptionResolver::new(config.clone());
        let workspace = WorkspaceManager::new(options.required_global_text("work_folder")?);
        Ok(Self {
            namer: ResourceNamer::new(options.clone()),
            config,
            options,
            workspace,
            services,
            actions: ActionLog::new(dry_run),
        })
    }

    /// Whether the entry's workspace aliases its last stage's mount instead
    /// of receiving a copy. Entries without stages are never in place.
    pub fn is_in_place(&self, index: usize) -> Result<bool> {
        let entry_type = self.config.entry(index)?.entry_type();
        if stage_plan(entry_type).is_empty() {
            return Ok(false);
        }
        self.options.flag(index, "mount_inplace", false)
    }
}
