//! Record of every mutating decision a run takes.
//!
//! All state-changing work goes through [`ActionLog::perform`]. In dry-run
//! mode the action is recorded and logged but the closure doing the work is
//! never called, so a dry run produces exactly the record a real run would.

use crate::backup::result_error::result::Result;

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::Serialize;
use serde_with::skip_serializing_none;

use std::cell::RefCell;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Graft {
    pub source: PathBuf,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    #[display("create snapshot {name} of {source:?} ({size} bytes)")]
    CreateSnapshot {
        source: PathBuf,
        name: String,
        size: u64,
    },
    #[display("remove snapshot {device:?}")]
    RemoveSnapshot { device: PathBuf },
    #[display("open encrypted device {device:?} as {name}")]
    OpenMapping {
        device: PathBuf,
        key_file: PathBuf,
        name: String,
    },
    #[display("close encrypted mapping {name}")]
    CloseMapping { name: String },
    #[display("mount {device:?} at {mount_point:?} ({options})")]
    Mount {
        device: PathBuf,
        mount_point: PathBuf,
        options: String,
    },
    #[display("unmount {mount_point:?}")]
    Unmount { mount_point: PathBuf },
    #[display("create directory {path:?}")]
    CreateDir { path: PathBuf },
    #[display("remove directory {path:?} for recreation")]
    ClearDir { path: PathBuf },
    #[display("remove empty directory {path:?}")]
    RemoveDir { path: PathBuf },
    #[display("restrict {path:?} to owner access")]
    RestrictDir { path: PathBuf },
    #[display("synchronize {source:?} into {dest:?} protecting {protected:?}")]
    Sync {
        source: PathBuf,
        dest: PathBuf,
        protected: Vec<String>,
    },
    #[display("run {argv:?} in {cwd:?}")]
    RunCommand { argv: Vec<String>, cwd: PathBuf },
    #[display("index {path:?}")]
    Index { path: PathBuf },
    #[display("save branch {branch} with {} grafts", grafts.len())]
    Save {
        path: PathBuf,
        branch: String,
        grafts: Vec<Graft>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub at: DateTime<Utc>,
    pub executed: bool,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Default)]
pub struct ActionLog {
    dry_run: bool,
    records: RefCell<Vec<ActionRecord>>,
}

impl ActionLog {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            records: RefCell::new(Vec::new()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Records `action` and runs `run`, or returns `simulated()` in dry-run.
    pub fn perform<T>(
        &self,
        action: Action,
        run: impl FnOnce() -> Result<T>,
        simulated: impl FnOnce() -> T,
    ) -> Result<T> {
        if self.dry_run {
            tracing::info!("[dry-run] would {action}");
        } else {
            tracing::info!("{action}");
        }
        self.records.borrow_mut().push(ActionRecord {
            at: Utc::now(),
            executed: !self.dry_run,
            action,
        });

        if self.dry_run {
            Ok(simulated())
        } else {
            run()
        }
    }

    pub fn perform_unit(&self, action: Action, run: impl FnOnce() -> Result<()>) -> Result<()> {
        self.perform(action, run, || ())
    }

    pub fn records(&self) -> Vec<ActionRecord> {
        self.records.borrow().clone()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.records
            .borrow()
            .iter()
            .map(|r| r.action.clone())
            .collect()
    }
}

/// JSON summary of a run, written with `--report`.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub error: Option<String>,
    pub actions: Vec<ActionRecord>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, log: &ActionLog, error: Option<String>) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            dry_run: log.is_dry_run(),
            error,
            actions: log.records(),
        }
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn unmount(path: &str) -> Action {
        Action::Unmount {
            mount_point: PathBuf::from(path),
        }
    }

    #[test]
    fn test_perform_runs_closure_when_live() {
        let log = ActionLog::new(false);
        let called = Cell::new(false);

        let value = log
            .perform(
                unmount("/mnt/a"),
                || {
                    called.set(true);
                    Ok(5)
                },
                || 0,
            )
            .unwrap();

        assert!(called.get());
        assert_eq!(value, 5);
        assert!(log.records()[0].executed);
    }

    #[test]
    fn test_perform_simulates_in_dry_run() {
        let log = ActionLog::new(true);
        let called = Cell::new(false);

        let value = log
            .perform(
                unmount("/mnt/a"),
                || {
                    called.set(true);
                    Ok(5)
                },
                || 7,
            )
            .unwrap();

        assert!(!called.get());
        assert_eq!(value, 7);
        assert!(!log.records()[0].executed);
        assert_eq!(log.actions(), vec![unmount("/mnt/a")]);
    }

    #[test]
    fn test_failed_action_is_still_recorded() {
        let log = ActionLog::new(false);
        let result = log.perform_unit(unmount("/mnt/a"), || {
            Err(std::io::Error::other("busy").into())
        });

        assert!(result.is_err());
        assert_eq!(log.actions().len(), 1);
    }

    #[test]
    fn test_action_display() {
        let action = Action::CreateSnapshot {
            source: PathBuf::from("/dev/vg0/data"),
            name: "snap---tmp".into(),
            size: 1024,
        };
        assert_eq!(
            action.to_string(),
            "create snapshot snap---tmp of \"/dev/vg0/data\" (1024 bytes)"
        );
    }

    #[test]
    fn test_report_serialization() {
        let dir = TempDir::new().unwrap();
        let log = ActionLog::new(true);
        log.perform_unit(unmount("/mnt/a"), || Ok(())).unwrap();

        let path = dir.path().join("report.json");
        RunReport::new(Utc::now(), &log, None).write_to(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["dry_run"], true);
        assert!(json.get("error").is_none());
        assert_eq!(json["actions"][0]["action"], "unmount");
        assert_eq!(json["actions"][0]["mount_point"], "/mnt/a");
        assert_eq!(json["actions"][0]["executed"], false);
    }
}
