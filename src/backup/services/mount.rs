use crate::backup::result_error::result::Result;
use crate::backup::services::process::run_captured;
use crate::backup::services::MountService;

use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, Default)]
pub struct Mounter;

impl MountService for Mounter {
    fn mount(&self, device: &Path, mount_point: &Path, options: &str) -> Result<()> {
        let mut cmd = Command::new("mount");
        cmd.arg(device).arg(mount_point);
        if !options.is_empty() {
            cmd.args(["-o", options]);
        }
        run_captured(&mut cmd).map(|_| ())
    }

    fn unmount(&self, mount_point: &Path) -> Result<()> {
        run_captured(Command::new("umount").arg(mount_point)).map(|_| ())
    }
}
