//! Backdate: rebuild a repository's history as a curated series of commits.
//!
//! Backdate throws away a project's existing git metadata and replays the
//! working tree as one commit per planned group of paths, then force-pushes
//! the result. The plan is a TOML file (or the bundled default).
//!
//! # Architecture
//!
//! - **Plan**: Parse and validate replay plans
//! - **Git**: The narrow tool surface ([`ToolRunner`]) and its subprocess implementation
//! - **Replay**: Reset, commit each group, sweep leftovers, publish
//! - **Fake**: An in-memory [`ToolRunner`] for tests

pub mod fake;
pub mod git;
mod plan;
mod replay;

pub use git::{CommandOutput, Git, StatusEntry, ToolRunner};
pub use plan::{CommitSpec, PathPartition, ReplayPlan};
pub use replay::{
    CreatedCommit, DEFAULT_PAUSE, ErrorPolicy, HistoryReplayer, REMOTE_NAME, ReplayConfig,
    ReplayReport, preview,
};

/// Errors from plan loading and replaying.
pub mod error {
    pub use crate::plan::Error as PlanError;
    pub use crate::replay::Error as ReplayError;
}
