use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use backdate::{ErrorPolicy, Git, HistoryReplayer, ReplayConfig, ReplayPlan};

#[derive(Parser)]
#[command(name = "backdate")]
#[command(about = "Replay a working tree as a curated sequence of commits")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the built-in plan as a TOML template
    Template,

    /// Show which paths of each planned commit exist, without touching git
    Preview {
        /// Path to a plan TOML file (default: the built-in plan)
        plan: Option<PathBuf>,

        /// Project root the plan's paths are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Delete the existing history and replay the plan as fresh commits
    Run {
        /// Path to a plan TOML file (default: the built-in plan)
        plan: Option<PathBuf>,

        /// Project root the plan's paths are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Remote URL to force-push to (overrides the plan)
        #[arg(long)]
        remote: Option<String>,

        /// Branch to create (overrides the plan)
        #[arg(long)]
        branch: Option<String>,

        /// How to react when a git step fails
        #[arg(long, value_enum, default_value_t = ErrorPolicy::BestEffort)]
        policy: ErrorPolicy,

        /// Pause after each commit, in milliseconds
        #[arg(long, default_value_t = 1000)]
        pause_ms: u64,

        /// Skip registering the remote and pushing
        #[arg(long)]
        no_push: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Template => {
            print!("{}", ReplayPlan::builtin_source());
        }
        Command::Preview { plan, root } => {
            let plan = load_plan(plan.as_deref())?;
            let root = resolve_root(&root)?;
            for (i, spec, parts) in backdate::preview(&root, &plan.commits) {
                let marker = if parts.present.is_empty() { "-" } else { "+" };
                println!("{marker} {}. {}", i + 1, spec.message);
                for path in &parts.present {
                    println!("      {path}");
                }
                for path in &parts.missing {
                    println!("      {path} (missing)");
                }
            }
        }
        Command::Run {
            plan,
            root,
            remote,
            branch,
            policy,
            pause_ms,
            no_push,
        } => {
            let plan = load_plan(plan.as_deref())?;
            let root = resolve_root(&root)?;

            let mut config = ReplayConfig::from_plan(&root, plan);
            if let Some(branch) = branch {
                config.branch = branch;
            }
            if remote.is_some() {
                config.remote_url = remote;
            }
            if no_push {
                config.remote_url = None;
            }
            config.policy = policy;
            config.pause = Duration::from_millis(pause_ms);

            let report = HistoryReplayer::new(Git::new(&root), config)
                .run()
                .context("replay aborted")?;

            println!(
                "{} commits created, {} groups skipped{}",
                report.commits.len(),
                report.skipped.len(),
                if report.pushed { ", pushed" } else { "" }
            );
            if !report.is_clean() {
                tracing::warn!(failures = report.failures.len(), "some steps failed");
            }
        }
    }

    Ok(())
}

fn load_plan(path: Option<&Path>) -> anyhow::Result<ReplayPlan> {
    match path {
        Some(path) => {
            ReplayPlan::load(path).with_context(|| format!("loading plan {}", path.display()))
        }
        None => ReplayPlan::builtin().context("built-in plan is invalid"),
    }
}

fn resolve_root(root: &Path) -> anyhow::Result<PathBuf> {
    std::fs::canonicalize(root)
        .with_context(|| format!("project root {} is not accessible", root.display()))
}
