use crate::backup::actions::Graft;
use crate::backup::result_error::result::Result;
use crate::backup::services::process::{run_captured, run_inherited};
use crate::backup::services::BackupStore;
use crate::backup::validate::{validate_dir_exist, validate_executable};

use bon::Builder;
use validator::Validate;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// The bup repository the staged tree ends up in.
#[derive(Debug, Clone, Validate, Builder)]
pub struct Bup {
    #[validate(custom(function = validate_executable))]
    #[builder(into)]
    bup_cmd: PathBuf,
    #[validate(custom(function = validate_dir_exist))]
    #[builder(into)]
    bup_folder: PathBuf,
}

impl Bup {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bup_cmd);
        cmd.arg("-d").arg(&self.bup_folder);
        cmd
    }

    pub fn save_arguments(branch: &str, grafts: &[Graft]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["save".into(), "-q".into(), "-n".into(), branch.into()];
        for g in grafts {
            let mut graft = g.source.as_os_str().to_owned();
            graft.push("=");
            graft.push(&g.target);
            args.push("--graft".into());
            args.push(graft);
        }
        args.extend(grafts.iter().map(|g| g.source.as_os_str().to_owned()));
        args
    }
}

impl BackupStore for Bup {
    fn check(&self) -> Result<()> {
        Ok(self.validate()?)
    }

    fn index(&self, path: &Path) -> Result<()> {
        run_captured(self.command().arg("index").arg(path)).map(|_| ())
    }

    fn save(&self, path: &Path, branch: &str, grafts: &[Graft]) -> Result<()> {
        run_inherited(
            self.command()
                .current_dir(path)
                .args(Self::save_arguments(branch, grafts)),
        )
    }
}
