use crate::backup::result_error::result::Result;
use crate::backup::services::process::run_inherited;
use crate::backup::services::{SyncOptions, TreeSync};
use crate::backup::validate::validate_executable;

use bon::Builder;
use validator::Validate;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_SHORT_OPTS: &str = "-ax";
pub const DEFAULT_LONG_OPTS: &str = "--delete --delete-delay --delete-excluded";

/// Mirrors a tree with rsync, deleting what the source no longer has.
#[derive(Debug, Clone, Validate, Builder)]
pub struct Rsync {
    #[validate(custom(function = validate_executable))]
    #[builder(into)]
    rsync: PathBuf,
}

impl Rsync {
    pub fn arguments(
        source: &Path,
        dest: &Path,
        protected: &[String],
        options: &SyncOptions,
    ) -> Vec<OsString> {
        let mut src = source.as_os_str().to_owned();
        if !source.to_string_lossy().ends_with('/') {
            src.push("/");
        }

        let mut args: Vec<OsString> = Vec::new();
        if !options.short_opts.is_empty() {
            args.push(options.short_opts.clone().into());
        }
        args.extend(options.long_opts.iter().map(OsString::from));
        for p in protected {
            args.push(format!("--filter=P {p}").into());
            args.push(format!("--filter=H {p}").into());
        }
        args.push(src);
        args.push(dest.as_os_str().to_owned());
        args
    }
}

impl TreeSync for Rsync {
    fn check(&self) -> Result<()> {
        Ok(self.validate()?)
    }

    fn sync(
        &self,
        source: &Path,
        dest: &Path,
        protected: &[String],
        options: &SyncOptions,
    ) -> Result<()> {
        run_inherited(
            Command::new(&self.rsync).args(Self::arguments(source, dest, protected, options)),
        )
    }
}
