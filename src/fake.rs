//! In-memory [`ToolRunner`] for tests.
//!
//! `FakeGit` models just enough of a repository to observe a replay: a set
//! of dirty paths, the index, the commit log, remotes and what each remote
//! holds after a push. It never touches the filesystem.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::git::{CommandOutput, Error, ToolRunner};

/// A commit recorded by [`FakeGit`].
#[derive(Debug, Clone)]
pub struct FakeCommit {
    pub message: String,
    pub paths: Vec<String>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct State {
    initialized: bool,
    branch: Option<String>,
    dirty: BTreeSet<String>,
    staged: BTreeSet<String>,
    commits: Vec<FakeCommit>,
    remotes: BTreeMap<String, String>,
    /// Commit messages held by each remote URL.
    published: BTreeMap<String, Vec<String>>,
    failing: BTreeSet<&'static str>,
    calls: Vec<String>,
}

/// In-memory stand-in for the git binary.
#[derive(Debug, Default)]
pub struct FakeGit {
    state: Mutex<State>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark paths as untracked in the working tree.
    pub fn with_files<I, S>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().dirty.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Seed a remote URL with history that a push must replace.
    pub fn with_remote_history<I, S>(self, url: &str, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .published
            .insert(url.to_string(), messages.into_iter().map(Into::into).collect());
        self
    }

    /// Make every call of `operation` (e.g. `"commit"`) exit non-zero.
    pub fn failing(self, operation: &'static str) -> Self {
        self.lock().failing.insert(operation);
        self
    }

    pub fn commits(&self) -> Vec<FakeCommit> {
        self.lock().commits.clone()
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.lock().commits.iter().map(|c| c.message.clone()).collect()
    }

    pub fn branch(&self) -> Option<String> {
        self.lock().branch.clone()
    }

    pub fn remote(&self, name: &str) -> Option<String> {
        self.lock().remotes.get(name).cloned()
    }

    pub fn published(&self, url: &str) -> Option<Vec<String>> {
        self.lock().published.get(url).cloned()
    }

    /// Paths changed but not yet committed.
    pub fn pending(&self) -> Vec<String> {
        self.lock().dirty.iter().cloned().collect()
    }

    /// Every operation invoked, in order, as the git argument line.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and short-circuit with a failure if it is configured to fail.
    fn enter(&self, operation: &'static str, call: String) -> Option<CommandOutput> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.failing.contains(operation) {
            return Some(failure(1, &format!("fatal: {operation} failed")));
        }
        if operation != "init" && !state.initialized {
            return Some(failure(128, "fatal: not a git repository"));
        }
        None
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        exit_code: Some(0),
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn failure(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn covers(pattern: &str, path: &str) -> bool {
    let pattern = pattern.trim_end_matches('/');
    pattern == "." || path == pattern || path.starts_with(&format!("{pattern}/"))
}

impl ToolRunner for FakeGit {
    fn init(&self) -> Result<CommandOutput, Error> {
        if let Some(out) = self.enter("init", "init".to_string()) {
            return Ok(out);
        }
        let mut state = self.lock();
        // Fresh metadata: every previously committed path is untracked again.
        let committed: Vec<String> = state
            .commits
            .drain(..)
            .flat_map(|c| c.paths)
            .collect();
        state.dirty.extend(committed);
        state.staged.clear();
        state.remotes.clear();
        state.branch = Some("master".to_string());
        state.initialized = true;
        Ok(ok("Initialized empty Git repository\n"))
    }

    fn rename_branch(&self, name: &str) -> Result<CommandOutput, Error> {
        if let Some(out) = self.enter("branch", format!("branch -M {name}")) {
            return Ok(out);
        }
        self.lock().branch = Some(name.to_string());
        Ok(ok(""))
    }

    fn add_path(&self, path: &str) -> Result<CommandOutput, Error> {
        if let Some(out) = self.enter("add", format!("add {path}")) {
            return Ok(out);
        }
        let mut state = self.lock();
        let matched: Vec<String> = state
            .dirty
            .iter()
            .filter(|p| covers(path, p))
            .cloned()
            .collect();
        state.staged.extend(matched);
        Ok(ok(""))
    }

    fn status(&self) -> Result<CommandOutput, Error> {
        if let Some(out) = self.enter("status", "status --porcelain".to_string()) {
            return Ok(out);
        }
        let state = self.lock();
        let stdout: String = state
            .dirty
            .iter()
            .map(|p| {
                if state.staged.contains(p) {
                    format!("A  {p}\n")
                } else {
                    format!("?? {p}\n")
                }
            })
            .collect();
        Ok(ok(stdout))
    }

    fn commit(&self, message: &str) -> Result<CommandOutput, Error> {
        if let Some(out) = self.enter("commit", format!("commit -m {message}")) {
            return Ok(out);
        }
        let mut state = self.lock();
        if state.staged.is_empty() {
            return Ok(CommandOutput {
                exit_code: Some(1),
                stdout: "nothing added to commit\n".to_string(),
                stderr: String::new(),
            });
        }
        let paths: Vec<String> = std::mem::take(&mut state.staged).into_iter().collect();
        for p in &paths {
            state.dirty.remove(p);
        }
        state.commits.push(FakeCommit {
            message: message.to_string(),
            paths,
            at: Instant::now(),
        });
        Ok(ok(format!("[{}] {message}\n", state.branch.as_deref().unwrap_or("master"))))
    }

    fn add_remote(&self, name: &str, url: &str) -> Result<CommandOutput, Error> {
        if let Some(out) = self.enter("remote", format!("remote add {name} {url}")) {
            return Ok(out);
        }
        let mut state = self.lock();
        if state.remotes.contains_key(name) {
            return Ok(failure(3, &format!("error: remote {name} already exists.")));
        }
        state.remotes.insert(name.to_string(), url.to_string());
        Ok(ok(""))
    }

    fn push(&self, remote: &str, branch: &str) -> Result<CommandOutput, Error> {
        if let Some(out) = self.enter("push", format!("push -u {remote} {branch} --force")) {
            return Ok(out);
        }
        let mut state = self.lock();
        let Some(url) = state.remotes.get(remote).cloned() else {
            let message = format!("fatal: '{remote}' does not appear to be a git repository");
            return Ok(failure(128, &message));
        };
        if state.branch.as_deref() != Some(branch) || state.commits.is_empty() {
            return Ok(failure(1, &format!("error: src refspec {branch} does not match any")));
        }
        let messages = state.commits.iter().map(|c| c.message.clone()).collect();
        state.published.insert(url, messages);
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: format!("branch '{branch}' set up to track '{remote}/{branch}'.\n"),
            stderr: format!(" + forced update -> {branch}\n"),
        })
    }
}
