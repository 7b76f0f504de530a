//! On-disk working tree: `<work_folder>/<branch>/<target>` per entry.

use crate::backup::actions::{Action, ActionLog};
use crate::backup::config::BackupConfig;
use crate::backup::result_error::result::Result;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `branch/target` with leading slashes dropped from the target.
    pub fn relative_path(branch: &str, target: &str) -> PathBuf {
        Path::new(branch).join(target.trim_start_matches('/'))
    }

    pub fn entry_path(&self, config: &BackupConfig, index: usize) -> Result<PathBuf> {
        let entry = config.entry(index)?;
        Ok(self
            .root
            .join(Self::relative_path(entry.branch(), entry.target())))
    }

    pub fn ensure_entry_path(
        &self,
        config: &BackupConfig,
        index: usize,
        empty: bool,
        actions: &ActionLog,
    ) -> Result<PathBuf> {
        let path = self.entry_path(config, index)?;
        Self::ensure_path(&path, empty, actions)?;
        Ok(path)
    }

    /// Creates `path` if missing. With `empty`, an existing directory is
    /// removed first so nothing stale survives.
    pub fn ensure_path(path: &Path, empty: bool, actions: &ActionLog) -> Result<()> {
        if empty && path.exists() {
            actions.perform_unit(
                Action::ClearDir {
                    path: path.to_path_buf(),
                },
                || Ok(std::fs::remove_dir_all(path)?),
            )?;
        }

        if empty || !path.exists() {
            actions.perform_unit(
                Action::CreateDir {
                    path: path.to_path_buf(),
                },
                || Ok(std::fs::create_dir_all(path)?),
            )?;
        }

        Ok(())
    }

    /// Removes the empty directory `path`. A missing directory is fine.
    pub fn remove_empty(path: &Path, actions: &ActionLog) -> Result<()> {
        actions.perform_unit(
            Action::RemoveDir {
                path: path.to_path_buf(),
            },
            || match std::fs::remove_dir(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            },
        )
    }

    /// Limits `path` to its owner (mode 0700).
    pub fn restrict(path: &Path, actions: &ActionLog) -> Result<()> {
        actions.perform_unit(
            Action::RestrictDir {
                path: path.to_path_buf(),
            },
            || {
                Ok(std::fs::set_permissions(
                    path,
                    std::fs::Permissions::from_mode(0o700),
                )?)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::config::common::CommonConfig;
    use crate::backup::config::{BackupEntry, EntryType};
    use tempfile::TempDir;

    fn config() -> BackupConfig {
        BackupConfig::new(
            CommonConfig::default(),
            vec![BackupEntry::builder()
                .source("/srv/a")
                .branch("b1")
                .target("-")
                .entry_type(EntryType::Plain)
                .build()],
        )
    }

    #[test]
    fn test_relative_path_strips_leading_slashes() {
        assert_eq!(
            WorkspaceManager::relative_path("home", "//data/sub"),
            PathBuf::from("home/data/sub")
        );
        assert_eq!(
            WorkspaceManager::relative_path("home", "/"),
            PathBuf::from("home")
        );
    }

    #[test]
    fn test_entry_path_under_root() {
        let ws = WorkspaceManager::new("/var/work");
        assert_eq!(
            ws.entry_path(&config(), 0).unwrap(),
            PathBuf::from("/var/work/b1/srv/a")
        );
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(dir.path());
        let log = ActionLog::new(false);

        let path = ws.ensure_entry_path(&config(), 0, false, &log).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();
        ws.ensure_entry_path(&config(), 0, false, &log).unwrap();

        assert!(path.join("keep").exists());
        assert_eq!(log.actions().len(), 1);
    }

    #[test]
    fn test_empty_mode_recreates_directory() {
        let dir = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(dir.path());
        let log = ActionLog::new(false);

        let path = ws.ensure_entry_path(&config(), 0, false, &log).unwrap();
        std::fs::write(path.join("stale"), "x").unwrap();
        ws.ensure_entry_path(&config(), 0, true, &log).unwrap();

        assert!(path.is_dir());
        assert!(!path.join("stale").exists());
        assert!(matches!(log.actions()[1], Action::ClearDir { .. }));
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(dir.path());
        let log = ActionLog::new(true);

        let path = ws.ensure_entry_path(&config(), 0, true, &log).unwrap();

        assert!(!path.exists());
        assert_eq!(log.actions(), vec![Action::CreateDir { path }]);
    }

    #[test]
    fn test_restrict_sets_owner_only_mode() {
        let dir = TempDir::new().unwrap();
        let log = ActionLog::new(false);
        WorkspaceManager::restrict(dir.path(), &log).unwrap();

        let mode = std::fs::metadata(dir.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
