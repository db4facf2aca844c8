//! Purpose: Build the engine command line for apply, plan, and refresh.
//! Exports: `Operation`, `Invocation`.
//! Role: Pure translation from a staged file set to engine arguments.
//! Invariants: Every run disables input and color and discards state backups.
//! Invariants: Plan runs always write to the adapter-owned plan path.
//! Invariants: Flags precede the single positional target.
use std::fmt;
use std::path::{Path, PathBuf};

use crate::core::staging::StagedFiles;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    Apply,
    Plan,
    Refresh,
}

impl Operation {
    /// Engine subcommand name.
    pub fn subcommand(self) -> &'static str {
        match self {
            Operation::Apply => "apply",
            Operation::Plan => "plan",
            Operation::Refresh => "refresh",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    pub operation: Operation,
    pub destroy: bool,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl Invocation {
    /// Applies the supplied plan when there is one, otherwise the staged config.
    pub fn apply(files: &StagedFiles, destroy: bool) -> Self {
        let mut args = common_args(files.state_file());
        if destroy {
            args.push("-destroy".to_string());
        }
        let target = files.plan_file().unwrap_or_else(|| files.dir());
        args.push(path_arg(target));
        Self {
            operation: Operation::Apply,
            destroy,
            args,
            working_dir: files.dir().to_path_buf(),
        }
    }

    pub fn plan(files: &mut StagedFiles, destroy: bool) -> Self {
        let plan_file = files.fresh_plan_file();
        let mut args = common_args(files.state_file());
        args.push(format!("-out={}", path_arg(&plan_file)));
        if destroy {
            args.push("-destroy".to_string());
        }
        args.push(path_arg(files.dir()));
        Self {
            operation: Operation::Plan,
            destroy,
            args,
            working_dir: files.dir().to_path_buf(),
        }
    }

    pub fn refresh(files: &StagedFiles) -> Self {
        let mut args = common_args(files.state_file());
        args.push(path_arg(files.dir()));
        Self {
            operation: Operation::Refresh,
            destroy: false,
            args,
            working_dir: files.dir().to_path_buf(),
        }
    }
}

fn common_args(state_file: &Path) -> Vec<String> {
    vec![
        "-backup=-".to_string(),
        "-input=false".to_string(),
        "-no-color".to_string(),
        format!("-state={}", path_arg(state_file)),
    ]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
