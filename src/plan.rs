//! Replay plan types.
//!
//! A plan is an ordered list of path groups, each committed with its own
//! message. Plans are written as TOML; one is bundled with the crate.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// The plan bundled with the binary, used when no plan file is given.
const BUILTIN_PLAN: &str = include_str!("default_plan.toml");

/// Message of the commit that sweeps up everything the plan did not cover.
pub const DEFAULT_CATCH_ALL_MESSAGE: &str = "Final integration merge";

/// Branch name used when neither the plan nor the command line picks one.
pub const DEFAULT_BRANCH: &str = "main";

/// The complete replay plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayPlan {
    /// Branch the history is written to
    #[serde(default)]
    pub branch: Option<String>,

    /// URL registered as `origin` and force-pushed to
    #[serde(default)]
    pub remote: Option<String>,

    /// Message for the final commit of leftover changes
    #[serde(default)]
    pub catch_all_message: Option<String>,

    /// Commit groups, in order
    #[serde(rename = "commit", default)]
    pub commits: Vec<CommitSpec>,
}

/// One group of paths committed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSpec {
    /// The commit message
    pub message: String,

    /// Files or directories relative to the repository root
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Which patterns of a group exist on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPartition<'a> {
    pub present: Vec<&'a str>,
    pub missing: Vec<&'a str>,
}

impl ReplayPlan {
    /// Parse a plan from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, Error> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize the plan back to TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Read and validate a plan file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let plan = Self::from_toml(&content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// The plan compiled into the binary.
    pub fn builtin() -> Result<Self, Error> {
        let plan = Self::from_toml(BUILTIN_PLAN)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Raw TOML of the built-in plan, suitable as a starting template.
    #[must_use]
    pub fn builtin_source() -> &'static str {
        BUILTIN_PLAN
    }

    pub fn branch(&self) -> &str {
        self.branch.as_deref().unwrap_or(DEFAULT_BRANCH)
    }

    pub fn catch_all_message(&self) -> &str {
        self.catch_all_message
            .as_deref()
            .unwrap_or(DEFAULT_CATCH_ALL_MESSAGE)
    }

    /// Reject plans that would commit outside the root or produce unnamed commits.
    pub fn validate(&self) -> Result<(), Error> {
        if self.branch.as_deref().is_some_and(|b| b.trim().is_empty()) {
            return Err(Error::InvalidBranch);
        }
        for (index, commit) in self.commits.iter().enumerate() {
            commit
                .validate()
                .map_err(|reason| Error::Invalid { index, reason })?;
        }
        Ok(())
    }
}

impl CommitSpec {
    pub fn new<I, S>(message: impl Into<String>, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            message: message.into(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.message.trim().is_empty() {
            return Err("commit message is empty".to_string());
        }
        for pattern in &self.paths {
            let path = Path::new(pattern);
            if pattern.is_empty() {
                return Err("empty path pattern".to_string());
            }
            if path.is_absolute() {
                return Err(format!("path '{pattern}' is absolute"));
            }
            if path.components().any(|c| c == Component::ParentDir) {
                return Err(format!("path '{pattern}' escapes the repository root"));
            }
        }
        Ok(())
    }

    /// Split this group's patterns by whether they currently exist under `root`.
    pub fn partition_paths(&self, root: &Path) -> PathPartition<'_> {
        let (present, missing): (Vec<&str>, Vec<&str>) = self
            .paths
            .iter()
            .map(String::as_str)
            .partition(|p| root.join(p).exists());
        PathPartition { present, missing }
    }
}

/// Errors from loading or validating a plan.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read plan file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse plan")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize plan")]
    Serialize(#[from] toml::ser::Error),

    #[error("commit {} is invalid: {reason}", .index + 1)]
    Invalid { index: usize, reason: String },

    #[error("branch name is empty")]
    InvalidBranch,
}
