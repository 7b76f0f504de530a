//! LVM snapshots through `lvdisplay`, `vgdisplay`, `lvcreate` and `lvremove`.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddFunctionName;
use crate::backup::services::process::{describe, run_captured, run_exit_code};
use crate::backup::services::SnapshotService;

use function_name::named;

use std::path::{Path, PathBuf};
use std::process::Command;

const LV_VG_NAME_FIELD: usize = 1;
const VG_PE_SIZE_KIB_FIELD: usize = 12;
const VG_FREE_PE_FIELD: usize = 15;
/// `lvdisplay` exit code for "volume not found".
const LVDISPLAY_NOT_FOUND: i32 = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct Lvm;

/// Splits the single record printed by `lvdisplay -c` / `vgdisplay -c`.
pub fn parse_colon_record(output: &str) -> Vec<String> {
    output.trim().split(':').map(|s| s.trim().to_string()).collect()
}

fn field<'a>(record: &'a [String], idx: usize, what: &str) -> Result<&'a str> {
    record.get(idx).map(String::as_str).ok_or_else(|| {
        Error::Execution {
            command: what.to_string(),
            status: "unexpected output".to_string(),
            output: record.join(":"),
        }
    })
}

/// Free bytes of a volume group from its `vgdisplay -c` record.
pub fn free_bytes(record: &[String]) -> Result<u64> {
    let parse = |idx: usize| -> Result<u64> {
        let raw = field(record, idx, "vgdisplay -c")?;
        raw.parse().map_err(|_| Error::Execution {
            command: "vgdisplay -c".to_string(),
            status: format!("field {idx} is not a number"),
            output: raw.to_string(),
        })
    };
    let pe_size = parse(VG_PE_SIZE_KIB_FIELD)? * 1024;
    let free_pe = parse(VG_FREE_PE_FIELD)?;
    Ok(pe_size * free_pe)
}

impl SnapshotService for Lvm {
    #[named]
    fn exists(&self, device: &Path) -> Result<bool> {
        let mut cmd = Command::new("lvdisplay");
        cmd.arg(device);
        match run_exit_code(&mut cmd)? {
            Some(0) => Ok(true),
            Some(LVDISPLAY_NOT_FOUND) => Ok(false),
            code => Err(Error::Execution {
                command: describe(&cmd),
                status: format!("exit code {code:?}"),
                output: format!("Could not detect if {device:?} is a valid LV"),
            }
            .add_fn_name(function_path!())),
        }
    }

    fn pool_of(&self, device: &Path) -> Result<String> {
        let out = run_captured(Command::new("lvdisplay").arg("-c").arg(device))?;
        let record = parse_colon_record(&out);
        field(&record, LV_VG_NAME_FIELD, "lvdisplay -c").map(str::to_string)
    }

    fn free_space(&self, pool: &str) -> Result<u64> {
        let out = run_captured(Command::new("vgdisplay").arg("-c").arg(pool))?;
        free_bytes(&parse_colon_record(&out))
    }

    fn snapshot_path(&self, pool: &str, name: &str) -> PathBuf {
        Path::new("/dev").join(pool).join(name)
    }

    fn create(&self, source: &Path, name: &str, size: u64) -> Result<PathBuf> {
        run_captured(
            Command::new("lvcreate")
                .args(["--snapshot", "--name", name, "--size"])
                .arg(format!("{size}b"))
                .arg(source),
        )?;
        let pool = self.pool_of(source)?;
        Ok(self.snapshot_path(&pool, name))
    }

    fn remove(&self, device: &Path) -> Result<()> {
        run_captured(Command::new("lvremove").arg("--force").arg(device)).map(|_| ())
    }
}
