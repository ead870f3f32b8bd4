//! Replay a working tree as a sequence of commits.
//!
//! The run is strictly linear: reset the repository, commit each planned
//! group, sweep leftovers into one catch-all commit, then force-push.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::git::{self, CommandOutput, ToolRunner, parse_porcelain};
use crate::plan::{self, CommitSpec, ReplayPlan};

/// Name the remote is registered under.
pub const REMOTE_NAME: &str = "origin";

/// Default pause after each commit so consecutive timestamps differ.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// What to do when a step fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ErrorPolicy {
    /// Log the failure and carry on with the next step
    #[default]
    BestEffort,
    /// Stop at the first failure
    Strict,
}

/// Everything a replay needs, fixed before it starts.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub root: PathBuf,
    pub plan: Vec<CommitSpec>,
    pub remote_url: Option<String>,
    pub branch: String,
    pub catch_all_message: String,
    pub pause: Duration,
    pub policy: ErrorPolicy,
}

impl ReplayConfig {
    /// Build a config for `root` from a loaded plan, with default pause and policy.
    pub fn from_plan(root: impl Into<PathBuf>, plan: ReplayPlan) -> Self {
        Self {
            root: root.into(),
            branch: plan.branch().to_string(),
            catch_all_message: plan.catch_all_message().to_string(),
            remote_url: plan.remote,
            plan: plan.commits,
            pause: DEFAULT_PAUSE,
            policy: ErrorPolicy::default(),
        }
    }
}

/// A commit the replay created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCommit {
    /// Position in the plan, or `None` for the catch-all commit
    pub plan_index: Option<usize>,
    pub message: String,
}

/// Outcome of a replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub commits: Vec<CreatedCommit>,
    /// Plan indices that produced no commit
    pub skipped: Vec<usize>,
    pub catch_all: bool,
    pub pushed: bool,
    /// Failures tolerated under [`ErrorPolicy::BestEffort`]
    pub failures: Vec<String>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives a [`ToolRunner`] through one replay.
pub struct HistoryReplayer<R> {
    runner: R,
    config: ReplayConfig,
    report: ReplayReport,
}

impl<R: ToolRunner> HistoryReplayer<R> {
    pub fn new(runner: R, config: ReplayConfig) -> Self {
        Self {
            runner,
            config,
            report: ReplayReport::default(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn report(&self) -> &ReplayReport {
        &self.report
    }

    /// Run every stage in order and return the report.
    pub fn run(mut self) -> Result<ReplayReport, Error> {
        self.reset()?;
        self.replay_commits()?;
        self.finalize()?;
        if let Some(url) = self.config.remote_url.clone() {
            let branch = self.config.branch.clone();
            self.publish_remote(&url, &branch)?;
        } else {
            info!("No remote configured, skipping push");
        }
        info!(
            commits = self.report.commits.len(),
            skipped = self.report.skipped.len(),
            failures = self.report.failures.len(),
            "History reconstruction complete"
        );
        Ok(self.report)
    }

    /// Delete existing repository metadata and start an empty repository.
    pub fn reset(&mut self) -> Result<(), Error> {
        info!(root = %self.config.root.display(), "Resetting git repository");
        let metadata = self.config.root.join(".git");
        match remove_metadata(&metadata) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => self.tolerate(Error::ResetMetadata {
                path: metadata.display().to_string(),
                source: e,
            })?,
        }

        let out = self.runner.init();
        self.check("init", out)?;
        let branch = self.config.branch.clone();
        let out = self.runner.rename_branch(&branch);
        self.check(&format!("branch -M {branch}"), out)?;
        Ok(())
    }

    /// Commit each planned group whose paths produce staged changes.
    pub fn replay_commits(&mut self) -> Result<(), Error> {
        let plan = std::mem::take(&mut self.config.plan);
        let result = self.replay_groups(&plan);
        self.config.plan = plan;
        result
    }

    fn replay_groups(&mut self, plan: &[CommitSpec]) -> Result<(), Error> {
        let total = plan.len();
        info!("Starting creation of {total} commits");

        for (i, spec) in plan.iter().enumerate() {
            let parts = spec.partition_paths(&self.config.root);
            for path in &parts.missing {
                debug!(path, "path not present, skipping");
            }
            for path in &parts.present {
                let out = self.runner.add_path(path);
                self.check(&format!("add {path}"), out)?;
            }

            if self.has_staged_changes()? && self.commit(&spec.message, Some(i))? {
                info!("Commit {}/{total}: {}", i + 1, spec.message);
            } else {
                info!("Skipping commit {}: no changes for {:?}", i + 1, spec.paths);
                self.report.skipped.push(i);
            }
        }
        Ok(())
    }

    /// Stage everything left and commit it under the catch-all message.
    pub fn finalize(&mut self) -> Result<(), Error> {
        let out = self.runner.add_path(".");
        self.check("add .", out)?;
        if self.has_staged_changes()? {
            let message = self.config.catch_all_message.clone();
            if self.commit(&message, None)? {
                self.report.catch_all = true;
                info!("Added final integration commit");
            }
        }
        Ok(())
    }

    /// Register `url` as `origin` and force-push `branch` to it.
    pub fn publish_remote(&mut self, url: &str, branch: &str) -> Result<(), Error> {
        let out = self.runner.add_remote(REMOTE_NAME, url);
        self.check(&format!("remote add {REMOTE_NAME} {url}"), out)?;
        info!(url, "Remote added, pushing");

        let out = self.runner.push(REMOTE_NAME, branch);
        if let Some(out) = self.check(&format!("push -u {REMOTE_NAME} {branch} --force"), out)? {
            log_output(&out);
            self.report.pushed = true;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    fn has_staged_changes(&mut self) -> Result<bool, Error> {
        let out = self.runner.status();
        Ok(self
            .check("status --porcelain", out)?
            .is_some_and(|out| parse_porcelain(&out.stdout).iter().any(|e| e.is_staged())))
    }

    /// Commit, pausing afterwards. Returns whether a commit was made.
    fn commit(&mut self, message: &str, plan_index: Option<usize>) -> Result<bool, Error> {
        let out = self.runner.commit(message);
        if self.check(&format!("commit -m {message}"), out)?.is_none() {
            return Ok(false);
        }
        self.report.commits.push(CreatedCommit {
            plan_index,
            message: message.to_string(),
        });
        if !self.config.pause.is_zero() {
            std::thread::sleep(self.config.pause);
        }
        Ok(true)
    }

    /// Turn a tool result into its output, or a failure handled by the policy.
    ///
    /// Returns `Ok(None)` for a tolerated failure.
    fn check(
        &mut self,
        command: &str,
        result: Result<CommandOutput, git::Error>,
    ) -> Result<Option<CommandOutput>, Error> {
        let err = match result {
            Ok(out) if out.success() => return Ok(Some(out)),
            Ok(out) => Error::Failed {
                command: format!("git {command}"),
                code: out.exit_code,
                stderr: failure_text(&out),
            },
            Err(e) => Error::Tool(e),
        };
        self.tolerate(err)?;
        Ok(None)
    }

    fn tolerate(&mut self, err: Error) -> Result<(), Error> {
        match self.config.policy {
            ErrorPolicy::Strict => Err(err),
            ErrorPolicy::BestEffort => {
                error!("{err}");
                self.report.failures.push(err.to_string());
                Ok(())
            }
        }
    }
}

/// Remove `.git`, whether it is a directory or a gitfile pointing elsewhere.
fn remove_metadata(path: &Path) -> std::io::Result<()> {
    if std::fs::symlink_metadata(path)?.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Stderr of a failed command, falling back to stdout (`git commit` reports there).
fn failure_text(out: &CommandOutput) -> String {
    let stderr = out.stderr.trim();
    if stderr.is_empty() {
        out.stdout.trim().to_string()
    } else {
        stderr.to_string()
    }
}

fn log_output(out: &CommandOutput) {
    for line in out.stdout.lines().chain(out.stderr.lines()) {
        if !line.trim().is_empty() {
            info!("{line}");
        }
    }
}

/// Per-group view of which patterns exist, without touching git.
pub fn preview<'a>(
    root: &Path,
    plan: &'a [CommitSpec],
) -> Vec<(usize, &'a CommitSpec, plan::PathPartition<'a>)> {
    plan.iter()
        .enumerate()
        .map(|(i, spec)| (i, spec, spec.partition_paths(root)))
        .collect()
}

/// Errors that stop a replay under [`ErrorPolicy::Strict`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to remove repository metadata at '{path}'")]
    ResetMetadata {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tool(#[from] git::Error),

    #[error("`{command}` failed ({}): {stderr}", exit_label(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeGit;
    use std::fs;

    /// A tempdir holding `files`, plus a fake repository that sees them as untracked.
    fn tree(files: &[&str]) -> (tempfile::TempDir, FakeGit) {
        let dir = tempfile::tempdir().expect("tempdir");
        for f in files {
            let path = dir.path().join(f);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("mkdir");
            }
            fs::write(&path, f).expect("write");
        }
        (dir, FakeGit::new().with_files(files.iter().copied()))
    }

    fn config(root: &Path, plan: Vec<CommitSpec>) -> ReplayConfig {
        ReplayConfig {
            root: root.to_path_buf(),
            plan,
            remote_url: None,
            branch: "main".to_string(),
            catch_all_message: "Final integration merge".to_string(),
            pause: Duration::ZERO,
            policy: ErrorPolicy::BestEffort,
        }
    }

    #[test]
    fn missing_group_produces_no_commit() {
        let (dir, git) = tree(&["a.txt"]);
        let plan = vec![
            CommitSpec::new("msg1", ["a.txt"]),
            CommitSpec::new("msg2", ["b.txt"]),
        ];
        let report = HistoryReplayer::new(&git, config(dir.path(), plan))
            .run()
            .expect("run");

        assert_eq!(git.commit_messages(), vec!["msg1"]);
        assert_eq!(report.skipped, vec![1]);
        assert!(!report.catch_all);
        assert!(report.is_clean());
        assert!(!git.calls().iter().any(|c| c == "add b.txt"));
    }

    #[test]
    fn leftovers_land_in_catch_all_commit() {
        let (dir, git) = tree(&["a.txt", "b.txt", "docs/guide.md"]);
        let plan = vec![CommitSpec::new("msg1", ["a.txt"]), CommitSpec::new("msg2", ["c.txt"])];
        let report = HistoryReplayer::new(&git, config(dir.path(), plan))
            .run()
            .expect("run");

        assert_eq!(git.commit_messages(), vec!["msg1", "Final integration merge"]);
        let last = git.commits().pop().expect("catch-all");
        assert_eq!(last.paths, vec!["b.txt", "docs/guide.md"]);
        assert!(report.catch_all);
        assert_eq!(report.commits[1].plan_index, None);
        assert!(git.pending().is_empty());
    }

    #[test]
    fn commits_follow_plan_order_with_increasing_timestamps() {
        let (dir, git) = tree(&["a", "b/one", "b/two", "c"]);
        let plan = vec![
            CommitSpec::new("first", ["a"]),
            CommitSpec::new("second", ["b/"]),
            CommitSpec::new("third", ["c"]),
        ];
        let mut cfg = config(dir.path(), plan);
        cfg.pause = Duration::from_millis(5);
        HistoryReplayer::new(&git, cfg).run().expect("run");

        let commits = git.commits();
        assert_eq!(git.commit_messages(), vec!["first", "second", "third"]);
        assert_eq!(commits[1].paths, vec!["b/one", "b/two"]);
        for pair in commits.windows(2) {
            assert!(pair[1].at > pair[0].at);
        }
    }

    #[test]
    fn finalize_twice_makes_one_commit() {
        let (dir, git) = tree(&["a.txt"]);
        let mut replayer = HistoryReplayer::new(&git, config(dir.path(), Vec::new()));
        replayer.reset().expect("reset");
        replayer.finalize().expect("finalize");
        replayer.finalize().expect("finalize again");

        assert_eq!(git.commit_messages(), vec!["Final integration merge"]);
        assert!(git.pending().is_empty());
    }

    #[test]
    fn reset_starts_empty_repository_on_configured_branch() {
        let (dir, git) = tree(&["a.txt"]);
        fs::create_dir_all(dir.path().join(".git/objects")).expect("mkdir");

        let mut replayer = HistoryReplayer::new(&git, config(dir.path(), Vec::new()));
        replayer.reset().expect("reset");

        assert!(!dir.path().join(".git").exists());
        assert_eq!(git.branch().as_deref(), Some("main"));
        assert!(git.commits().is_empty());
        assert_eq!(git.calls(), vec!["init", "branch -M main"]);
    }

    #[test]
    fn reset_removes_gitfile_metadata() {
        let (dir, git) = tree(&["a.txt"]);
        fs::write(dir.path().join(".git"), "gitdir: /elsewhere/repo.git\n").expect("gitfile");

        let mut replayer = HistoryReplayer::new(&git, config(dir.path(), Vec::new()));
        replayer.reset().expect("reset");

        assert!(!dir.path().join(".git").exists());
        assert!(replayer.report().is_clean());
    }

    #[test]
    fn publish_force_replaces_remote_history() {
        let url = "https://example.com/repo.git";
        let (dir, git) = tree(&["a.txt"]);
        let git = git.with_remote_history(url, ["unrelated", "history"]);
        let mut cfg = config(dir.path(), vec![CommitSpec::new("msg1", ["a.txt"])]);
        cfg.remote_url = Some(url.to_string());

        let report = HistoryReplayer::new(&git, cfg).run().expect("run");

        assert!(report.pushed);
        assert_eq!(git.remote(REMOTE_NAME).as_deref(), Some(url));
        assert_eq!(git.published(url), Some(vec!["msg1".to_string()]));
        assert_eq!(git.calls().last().map(String::as_str), Some("push -u origin main --force"));
    }

    #[test]
    fn no_remote_skips_publish() {
        let (dir, git) = tree(&["a.txt"]);
        let report = HistoryReplayer::new(&git, config(dir.path(), Vec::new()))
            .run()
            .expect("run");
        assert!(!report.pushed);
        assert!(!git.calls().iter().any(|c| c.starts_with("remote") || c.starts_with("push")));
    }

    #[test]
    fn best_effort_continues_past_failures() {
        let (dir, git) = tree(&["a.txt"]);
        let git = git.failing("init");
        let plan = vec![CommitSpec::new("msg1", ["a.txt"])];
        let report = HistoryReplayer::new(&git, config(dir.path(), plan))
            .run()
            .expect("best effort never aborts");

        // Nothing works without a repository, but every stage still ran.
        assert!(git.commits().is_empty());
        assert!(report.commits.is_empty());
        assert!(report.failures.len() >= 3);
        assert!(report.failures[0].starts_with("`git init` failed (exit code 1)"));
        assert!(git.calls().iter().any(|c| c == "add ."));
    }

    #[test]
    fn strict_stops_at_first_failure() {
        let (dir, git) = tree(&["a.txt", "b.txt"]);
        let git = git.failing("commit");
        let plan = vec![
            CommitSpec::new("msg1", ["a.txt"]),
            CommitSpec::new("msg2", ["b.txt"]),
        ];
        let mut cfg = config(dir.path(), plan);
        cfg.policy = ErrorPolicy::Strict;

        let err = HistoryReplayer::new(&git, cfg).run().unwrap_err();
        assert!(matches!(
            err,
            Error::Failed { ref command, .. } if command == "git commit -m msg1"
        ));
        assert!(!git.calls().iter().any(|c| c == "add b.txt"));
    }

    #[test]
    fn failed_commit_is_reported_as_skipped() {
        let (dir, git) = tree(&["a.txt"]);
        let git = git.failing("commit");
        let plan = vec![CommitSpec::new("msg1", ["a.txt"])];
        let report = HistoryReplayer::new(&git, config(dir.path(), plan))
            .run()
            .expect("run");
        assert_eq!(report.skipped, vec![0]);
        assert!(report.commits.is_empty());
        assert!(!report.catch_all);
    }

    #[test]
    fn config_from_plan_uses_plan_defaults() {
        let plan = ReplayPlan::builtin().expect("builtin");
        let cfg = ReplayConfig::from_plan("/tmp/project", plan);
        assert_eq!(cfg.branch, "main");
        assert_eq!(cfg.catch_all_message, "Final integration merge");
        assert_eq!(cfg.remote_url, None);
        assert_eq!(cfg.pause, DEFAULT_PAUSE);
        assert_eq!(cfg.policy, ErrorPolicy::BestEffort);
        assert_eq!(cfg.plan.len(), 36);
    }

    #[test]
    fn preview_lists_present_and_missing() {
        let (dir, _git) = tree(&["a.txt"]);
        let plan = vec![CommitSpec::new("m", ["a.txt", "b.txt"])];
        let rows = preview(dir.path(), &plan);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].2.present, vec!["a.txt"]);
        assert_eq!(rows[0].2.missing, vec!["b.txt"]);
    }
}
