//! Purpose: Materialize one request's config/plan/state as files for the engine.
//! Exports: `StagedFiles`, `StageContents`, `CONFIG_FILE`, `PLAN_FILE`, `STATE_FILE`.
//! Role: Owns the per-request staging directory from creation to removal.
//! Invariants: The directory is removed when `StagedFiles` is closed or dropped.
//! Invariants: Either every required file exists or no directory is left behind.
//! Invariants: The state file is always written, even when the request carried none.
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::core::error::{Error, ErrorKind};

pub const CONFIG_FILE: &str = "terraform.tf";
pub const PLAN_FILE: &str = "terraform.tfplan";
pub const STATE_FILE: &str = "terraform.tfstate";

const DIR_PREFIX: &str = "terraform-";

/// Raw file contents decoded from a request body. Empty slices mean "absent".
#[derive(Clone, Copy, Debug, Default)]
pub struct StageContents<'a> {
    pub config: &'a [u8],
    pub plan: &'a [u8],
    pub state: &'a [u8],
}

#[derive(Debug)]
pub struct StagedFiles {
    dir: TempDir,
    config_file: Option<PathBuf>,
    plan_file: Option<PathBuf>,
    state_file: PathBuf,
}

impl StagedFiles {
    /// Creates a fresh directory under `parent` (or the system temp dir) and
    /// writes the non-empty inputs into it.
    pub fn create(parent: Option<&Path>, contents: StageContents<'_>) -> Result<Self, Error> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(DIR_PREFIX);
        let created = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        let dir = created.map_err(|err| {
            let err = Error::new(ErrorKind::Io)
                .with_message("failed to create staging directory")
                .with_source(err);
            match parent {
                Some(parent) => err.with_path(parent),
                None => err,
            }
        })?;
        Self::populate(dir, contents)
    }

    /// Writes `contents` into `dir`. On any early return `dir` drops and takes
    /// partial files with it.
    fn populate(dir: TempDir, contents: StageContents<'_>) -> Result<Self, Error> {
        let config_file = if contents.config.is_empty() {
            None
        } else {
            Some(write_staged(dir.path(), CONFIG_FILE, contents.config, "config")?)
        };
        let plan_file = if contents.plan.is_empty() {
            None
        } else {
            Some(write_staged(dir.path(), PLAN_FILE, contents.plan, "plan")?)
        };
        let state_file = write_staged(dir.path(), STATE_FILE, contents.state, "state")?;

        Ok(Self {
            dir,
            config_file,
            plan_file,
            state_file,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// The client-supplied plan, if the request carried one.
    pub fn plan_file(&self) -> Option<&Path> {
        self.plan_file.as_deref()
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Path the engine writes a newly generated plan to. Overrides any
    /// client-supplied plan.
    pub fn fresh_plan_file(&mut self) -> PathBuf {
        let path = self.dir.path().join(PLAN_FILE);
        self.plan_file = Some(path.clone());
        path
    }

    pub fn read_state(&self) -> Result<Vec<u8>, Error> {
        read_back(&self.state_file, "state")
    }

    pub fn read_plan(&self) -> Result<Vec<u8>, Error> {
        let path = self
            .plan_file
            .clone()
            .unwrap_or_else(|| self.dir.path().join(PLAN_FILE));
        read_back(&path, "plan")
    }

    /// Removes the directory, reporting failures instead of swallowing them.
    pub fn close(self) -> Result<(), Error> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to remove staging directory")
                .with_path(path)
                .with_source(err)
        })
    }
}

fn write_staged(dir: &Path, name: &str, contents: &[u8], label: &str) -> Result<PathBuf, Error> {
    let path = dir.join(name);
    fs::write(&path, contents).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("failed to save {label} to disk"))
            .with_path(&path)
            .with_source(err)
    })?;
    Ok(path)
}

fn read_back(path: &Path, label: &str) -> Result<Vec<u8>, Error> {
    fs::read(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to read {label} from disk"))
            .with_path(path)
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use super::{CONFIG_FILE, PLAN_FILE, STATE_FILE, StageContents, StagedFiles};
    use crate::core::error::ErrorKind;

    fn entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).expect("read_dir").count()
    }

    #[test]
    fn writes_all_supplied_files() {
        let parent = tempfile::tempdir().expect("tempdir");
        let staged = StagedFiles::create(
            Some(parent.path()),
            StageContents {
                config: br#"{"resource":{}}"#,
                plan: b"\x00plan",
                state: b"{}",
            },
        )
        .expect("stage");

        let dir = staged.dir().to_path_buf();
        assert!(dir.starts_with(parent.path()));
        assert!(
            dir.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("terraform-"))
        );
        assert_eq!(staged.config_file(), Some(dir.join(CONFIG_FILE).as_path()));
        assert_eq!(staged.plan_file(), Some(dir.join(PLAN_FILE).as_path()));
        assert_eq!(staged.state_file(), dir.join(STATE_FILE).as_path());
        assert_eq!(
            std::fs::read(dir.join(CONFIG_FILE)).expect("config"),
            br#"{"resource":{}}"#
        );
        assert_eq!(std::fs::read(dir.join(PLAN_FILE)).expect("plan"), b"\x00plan");
        assert_eq!(staged.read_state().expect("state"), b"{}");
    }

    #[test]
    fn empty_state_still_creates_state_file() {
        let parent = tempfile::tempdir().expect("tempdir");
        let staged =
            StagedFiles::create(Some(parent.path()), StageContents::default()).expect("stage");

        assert!(staged.config_file().is_none());
        assert!(staged.plan_file().is_none());
        assert!(staged.state_file().is_file());
        assert_eq!(entries(staged.dir()), 1);
        assert!(staged.read_state().expect("state").is_empty());
    }

    #[test]
    fn drop_removes_directory() {
        let parent = tempfile::tempdir().expect("tempdir");
        let staged = StagedFiles::create(
            Some(parent.path()),
            StageContents {
                state: b"{}",
                ..StageContents::default()
            },
        )
        .expect("stage");
        let dir = staged.dir().to_path_buf();
        assert!(dir.is_dir());
        drop(staged);
        assert!(!dir.exists());
        assert_eq!(entries(parent.path()), 0);
    }

    #[test]
    fn close_removes_directory() {
        let parent = tempfile::tempdir().expect("tempdir");
        let staged =
            StagedFiles::create(Some(parent.path()), StageContents::default()).expect("stage");
        staged.close().expect("close");
        assert_eq!(entries(parent.path()), 0);
    }

    #[test]
    fn fresh_plan_path_overrides_client_plan() {
        let parent = tempfile::tempdir().expect("tempdir");
        let mut staged = StagedFiles::create(
            Some(parent.path()),
            StageContents {
                plan: b"client plan",
                ..StageContents::default()
            },
        )
        .expect("stage");
        let fresh = staged.fresh_plan_file();
        assert_eq!(fresh, staged.dir().join(PLAN_FILE));
        assert_eq!(staged.plan_file(), Some(fresh.as_path()));
    }

    #[test]
    fn missing_parent_is_an_io_error() {
        let parent = tempfile::tempdir().expect("tempdir");
        let missing = parent.path().join("does-not-exist");
        let err = StagedFiles::create(Some(&missing), StageContents::default())
            .expect_err("missing parent");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.path(), Some(missing.as_path()));
    }

    #[test]
    fn write_failure_removes_partial_directory() {
        let parent = tempfile::tempdir().expect("tempdir");
        let dir = tempfile::Builder::new()
            .prefix("terraform-")
            .tempdir_in(parent.path())
            .expect("staging dir");
        let blocked = dir.path().join(STATE_FILE);
        std::fs::create_dir(&blocked).expect("occupy state path");

        let err = StagedFiles::populate(
            dir,
            StageContents {
                config: br#"{"resource":{}}"#,
                ..StageContents::default()
            },
        )
        .expect_err("state write fails");

        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.message(), Some("failed to save state to disk"));
        assert_eq!(err.path(), Some(blocked.as_path()));
        assert_eq!(entries(parent.path()), 0);
    }

    #[test]
    fn missing_plan_read_is_an_io_error() {
        let parent = tempfile::tempdir().expect("tempdir");
        let mut staged =
            StagedFiles::create(Some(parent.path()), StageContents::default()).expect("stage");
        staged.fresh_plan_file();
        let err = staged.read_plan().expect_err("no plan written");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), Some("failed to read plan from disk"));
    }
}
