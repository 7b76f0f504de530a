use crate::backup::result_error::result::Result;
use crate::backup::services::process::run_captured;
use crate::backup::services::CryptService;

use bon::Builder;

use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_MAPPER_DIR: &str = "/dev/mapper";

/// LUKS mappings through `cryptsetup open` / `cryptsetup close`.
#[derive(Debug, Clone, Builder)]
pub struct Cryptsetup {
    #[builder(default = PathBuf::from(DEFAULT_MAPPER_DIR), into)]
    mapper_dir: PathBuf,
}

impl Default for Cryptsetup {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CryptService for Cryptsetup {
    fn mapped_path(&self, name: &str) -> PathBuf {
        self.mapper_dir.join(name)
    }

    fn exists(&self, name: &str) -> bool {
        self.mapped_path(name).exists()
    }

    fn open(&self, device: &Path, key_file: &Path, name: &str) -> Result<PathBuf> {
        run_captured(
            Command::new("cryptsetup")
                .args(["open", "-d"])
                .arg(key_file)
                .arg(device)
                .arg(name),
        )?;
        Ok(self.mapped_path(name))
    }

    fn close(&self, name: &str) -> Result<()> {
        run_captured(Command::new("cryptsetup").args(["close", name])).map(|_| ())
    }
}
