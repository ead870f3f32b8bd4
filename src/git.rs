//! Git command surface used by the replayer.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

/// Exit status and captured output of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The narrow set of version-control operations a replay needs.
///
/// A non-zero exit is not an `Err`: it comes back as a [`CommandOutput`] so
/// the caller can decide whether to stop. `Err` means the tool could not be
/// run at all.
pub trait ToolRunner {
    /// `init`
    fn init(&self) -> Result<CommandOutput, Error>;

    /// `branch -M <name>`
    fn rename_branch(&self, name: &str) -> Result<CommandOutput, Error>;

    /// `add <path>`
    fn add_path(&self, path: &str) -> Result<CommandOutput, Error>;

    /// `status --porcelain`
    fn status(&self) -> Result<CommandOutput, Error>;

    /// `commit -m <message>`
    fn commit(&self, message: &str) -> Result<CommandOutput, Error>;

    /// `remote add <name> <url>`
    fn add_remote(&self, name: &str, url: &str) -> Result<CommandOutput, Error>;

    /// `push -u <remote> <branch> --force`
    fn push(&self, remote: &str, branch: &str) -> Result<CommandOutput, Error>;
}

impl<T: ToolRunner + ?Sized> ToolRunner for &T {
    fn init(&self) -> Result<CommandOutput, Error> {
        (**self).init()
    }

    fn rename_branch(&self, name: &str) -> Result<CommandOutput, Error> {
        (**self).rename_branch(name)
    }

    fn add_path(&self, path: &str) -> Result<CommandOutput, Error> {
        (**self).add_path(path)
    }

    fn status(&self) -> Result<CommandOutput, Error> {
        (**self).status()
    }

    fn commit(&self, message: &str) -> Result<CommandOutput, Error> {
        (**self).commit(message)
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<CommandOutput, Error> {
        (**self).add_remote(name, url)
    }

    fn push(&self, remote: &str, branch: &str) -> Result<CommandOutput, Error> {
        (**self).push(remote, branch)
    }
}

/// One line of `git status --porcelain` (v1) output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub index: char,
    pub worktree: char,
    pub path: String,
}

impl StatusEntry {
    /// Whether this entry has changes recorded in the index.
    pub fn is_staged(&self) -> bool {
        !matches!(self.index, ' ' | '?' | '!')
    }
}

/// Parse porcelain status output, ignoring lines too short to carry a path.
pub fn parse_porcelain(stdout: &str) -> Vec<StatusEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut chars = line.chars();
            let index = chars.next()?;
            let worktree = chars.next()?;
            let path = line.get(3..)?;
            if path.is_empty() {
                return None;
            }
            Some(StatusEntry {
                index,
                worktree,
                path: path.to_string(),
            })
        })
        .collect()
}

/// Runs the real `git` binary in a fixed working directory.
pub struct Git {
    program: OsString,
    root: PathBuf,
    envs: Vec<(OsString, OsString)>,
}

impl Git {
    /// A runner that executes `git` inside `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            program: OsString::from("git"),
            root: root.into(),
            envs: Vec::new(),
        }
    }

    /// Use a different executable in place of `git`.
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Set an environment variable on every invocation.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Run a git command and capture its exit status and output.
    fn run(&self, args: &[&str]) -> Result<CommandOutput, Error> {
        tracing::debug!(args = ?args, "git");
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.root)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .output()
            .map_err(|e| Error::Exec {
                command: format!("git {}", args.join(" ")),
                source: e,
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

impl ToolRunner for Git {
    fn init(&self) -> Result<CommandOutput, Error> {
        self.run(&["init"])
    }

    fn rename_branch(&self, name: &str) -> Result<CommandOutput, Error> {
        self.run(&["branch", "-M", name])
    }

    fn add_path(&self, path: &str) -> Result<CommandOutput, Error> {
        self.run(&["add", path])
    }

    fn status(&self) -> Result<CommandOutput, Error> {
        self.run(&["status", "--porcelain"])
    }

    fn commit(&self, message: &str) -> Result<CommandOutput, Error> {
        self.run(&["commit", "-m", message])
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<CommandOutput, Error> {
        self.run(&["remote", "add", name, url])
    }

    fn push(&self, remote: &str, branch: &str) -> Result<CommandOutput, Error> {
        self.run(&["push", "-u", remote, branch, "--force"])
    }
}

/// Errors from git operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to execute `{command}`")]
    Exec {
        command: String,
        #[source]
        source: std::io::Error,
    },
}
