//! CLI surface (§6.4): `garden`, `gardener`, `status`, `inspect`.
//!
//! Grounded on the teacher's `src/main.rs` shape — clap derive subcommands,
//! `fn main` delegating to a `Result`-returning `run()`, JSON-schema
//! validation via `jsonschema` before a tree is ever trusted — generalized
//! from the teacher's single `tree.json`/`Validate`/`Select` surface to this
//! engine's four commands and git-log-derived state.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use jsonschema::Draft;
use serde_json::Value;

use arborist::exit_codes;
use arborist::garden::{self, GardenDeps, GardenOutcome, GardenPolicy};
use arborist::gardener::{self, GardenerDeps};
use arborist::io::artifacts::ArtifactsRoot;
use arborist::io::config::{self, GardenerConfig};
use arborist::io::git::Git;
use arborist::io::runner::{Runner, ShellRunner};
use arborist::protocol::state::{completed_tasks, derive_task_state};
use arborist::tree::TaskTree;

const V1_SCHEMA: &str = include_str!("../schemas/task_tree/v1.schema.json");

#[derive(Parser)]
#[command(
    name = "arborist",
    version,
    about = "Git-native task-tree orchestrator for agentic code generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive exactly one ready leaf to a terminal state (§4.5).
    Garden {
        #[arg(long)]
        tree: PathBuf,
        /// The logical branch to read/write protocol commits on. Defaults
        /// to whatever branch is currently checked out.
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the outer loop to completion (§4.7).
    Gardener {
        #[arg(long)]
        tree: PathBuf,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print every leaf's current state, derived from the branch's commit log.
    Status {
        #[arg(long)]
        tree: PathBuf,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Dump the protocol commits recorded for one task (subject + trailers).
    Inspect {
        #[arg(long)]
        tree: PathBuf,
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long)]
        branch: Option<String>,
    },
}

fn main() {
    arborist::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID_INPUT);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Garden { tree, branch, config } => cmd_garden(&tree, branch, config.as_deref()),
        Command::Gardener { tree, branch, config } => cmd_gardener(&tree, branch, config.as_deref()),
        Command::Status { tree, branch } => cmd_status(&tree, branch),
        Command::Inspect { tree, task_id, branch } => cmd_inspect(&tree, &task_id, branch),
    }
}

fn cmd_garden(tree_path: &Path, branch: Option<String>, config_path: Option<&Path>) -> Result<i32> {
    let tree = load_tree(tree_path)?;
    let git = Git::new(std::env::current_dir().context("current directory")?);
    let cfg = load_config(config_path, &git)?;
    let base_branch = match cfg.base_branch.clone() {
        Some(branch) => branch,
        None => git.current_branch()?,
    };
    let run_branch = resolve_run_branch(&tree, branch);
    ensure_run_branch_writable(&git, &run_branch, &base_branch)?;

    let completed = completed_tasks(&tree, |task_id| {
        git.log_for_task(&run_branch, task_id).unwrap_or_default()
    });
    let Some(&next) = tree.ready_leaves(&completed).first() else {
        println!("no ready leaf; unfinished: {}", unfinished(&tree, &completed).join(", "));
        return Ok(exit_codes::STALLED_OR_TASK_FAILURE);
    };

    let implement_runner = ShellRunner {
        command: cfg.implement_runner.resolve()?,
        output_limit_bytes: cfg.output_limit_bytes,
    };
    let review_runner = ShellRunner {
        command: cfg.review_runner.resolve()?,
        output_limit_bytes: cfg.output_limit_bytes,
    };
    let artifacts = cfg.artifacts_dir.as_ref().map(ArtifactsRoot::new);
    let deps = GardenDeps {
        git: &git,
        implement_runner: &implement_runner as &dyn Runner,
        review_runner: &review_runner as &dyn Runner,
        artifacts: artifacts.as_ref(),
    };

    let outcome = garden::garden(&run_branch, next, &deps, &policy_from_config(&cfg))?;
    match outcome {
        GardenOutcome::Complete => {
            println!("{} complete", next.id);
            Ok(exit_codes::SUCCESS)
        }
        GardenOutcome::TaskFailed { last_commit_sha } => {
            println!("{} failed at {last_commit_sha}", next.id);
            Ok(exit_codes::STALLED_OR_TASK_FAILURE)
        }
    }
}

fn cmd_gardener(tree_path: &Path, branch: Option<String>, config_path: Option<&Path>) -> Result<i32> {
    let tree = load_tree(tree_path)?;
    let git = Git::new(std::env::current_dir().context("current directory")?);
    let cfg = load_config(config_path, &git)?;
    let base_branch = match cfg.base_branch.clone() {
        Some(branch) => branch,
        None => git.current_branch()?,
    };
    let run_branch = resolve_run_branch(&tree, branch);
    ensure_run_branch_writable(&git, &run_branch, &base_branch)?;

    let implement_runner = ShellRunner {
        command: cfg.implement_runner.resolve()?,
        output_limit_bytes: cfg.output_limit_bytes,
    };
    let review_runner = ShellRunner {
        command: cfg.review_runner.resolve()?,
        output_limit_bytes: cfg.output_limit_bytes,
    };
    let artifacts = cfg.artifacts_dir.as_ref().map(ArtifactsRoot::new);
    let deps = GardenerDeps {
        git: &git,
        implement_runner: &implement_runner as &dyn Runner,
        review_runner: &review_runner as &dyn Runner,
        artifacts: artifacts.as_ref(),
    };

    let outcome = gardener::run_gardener(&tree, &run_branch, &base_branch, &deps, &policy_from_config(&cfg))?;
    println!(
        "{} tasks completed: {}",
        if outcome.success { "success," } else { "stopped," },
        outcome.order_executed.join(", ")
    );
    if let Some(reason) = &outcome.reason {
        println!("reason: {reason}");
    }
    Ok(if outcome.success {
        exit_codes::SUCCESS
    } else {
        exit_codes::STALLED_OR_TASK_FAILURE
    })
}

fn cmd_status(tree_path: &Path, branch: Option<String>) -> Result<i32> {
    let tree = load_tree(tree_path)?;
    let git = Git::new(std::env::current_dir().context("current directory")?);
    let run_branch = resolve_run_branch(&tree, branch);
    ensure_run_branch_readable(&git, &run_branch)?;

    for leaf in tree.leaves() {
        let commits = git.log_for_task(&run_branch, &leaf.id)?;
        let state = derive_task_state(&commits);
        println!("{}: {}", leaf.id, state);
    }
    Ok(exit_codes::SUCCESS)
}

fn cmd_inspect(tree_path: &Path, task_id: &str, branch: Option<String>) -> Result<i32> {
    let tree = load_tree(tree_path)?;
    if tree.node(task_id).is_none() {
        bail!("unknown task id '{task_id}'");
    }
    let git = Git::new(std::env::current_dir().context("current directory")?);
    let run_branch = resolve_run_branch(&tree, branch);
    ensure_run_branch_readable(&git, &run_branch)?;

    let commits = git.log_for_task(&run_branch, task_id)?;
    if commits.is_empty() {
        println!("no commits recorded for {task_id} on {run_branch}");
        return Ok(exit_codes::SUCCESS);
    }
    for commit in &commits {
        println!("{} task({}@{}@{}): {}", commit.sha, commit.branch, commit.task_id, commit.status, commit.subject_text);
        for (key, value) in &commit.trailers {
            println!("    {key}: {value}");
        }
    }
    Ok(exit_codes::SUCCESS)
}

/// The run branch to operate on: the explicit `--branch`, or a name derived
/// deterministically from the tree (`arborist/{namespace}/{spec_id}`) so
/// repeated invocations against the same tree agree without a flag.
fn resolve_run_branch(tree: &TaskTree, branch: Option<String>) -> String {
    branch.unwrap_or_else(|| format!("arborist/{}/{}", tree.namespace, tree.spec_id))
}

/// Check out `run_branch` for writing (§4.6): reuse it if it already exists
/// (resumption), otherwise branch it off `base_branch` fresh.
fn ensure_run_branch_writable(git: &Git, run_branch: &str, base_branch: &str) -> Result<()> {
    if git.branch_exists(run_branch)? {
        git.checkout_branch(run_branch)
    } else {
        git.checkout_branch(base_branch)?;
        git.checkout_new_branch(run_branch)
    }
}

/// Check out `run_branch` for a read-only query (`status`/`inspect`);
/// unlike [`ensure_run_branch_writable`] this never creates it.
fn ensure_run_branch_readable(git: &Git, run_branch: &str) -> Result<()> {
    if !git.branch_exists(run_branch)? {
        bail!("branch '{run_branch}' does not exist; nothing has been gardened on it yet");
    }
    git.checkout_branch(run_branch)
}

fn load_config(path: Option<&Path>, git: &Git) -> Result<GardenerConfig> {
    let default_path = git.workdir().join(".arborist/config.toml");
    config::load_config(path.unwrap_or(&default_path))
}

fn policy_from_config(cfg: &GardenerConfig) -> GardenPolicy {
    GardenPolicy {
        max_retries: cfg.max_retries,
        implement_timeout: Duration::from_secs(cfg.implement_timeout_secs),
        test_timeout: Duration::from_secs(cfg.test_timeout_secs),
        review_timeout: Duration::from_secs(cfg.review_timeout_secs),
        output_limit_bytes: cfg.output_limit_bytes,
        prompt_budget_bytes: cfg.output_limit_bytes,
    }
}

fn unfinished(tree: &TaskTree, completed: &HashSet<String>) -> Vec<String> {
    tree.leaves()
        .into_iter()
        .filter(|leaf| !completed.contains(&leaf.id))
        .map(|leaf| leaf.id.clone())
        .collect()
}

/// Parse and schema-validate a task tree file, then check its structural
/// invariants and recompute `execution_order` (§3.1).
fn load_tree(path: &Path) -> Result<TaskTree> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let instance: Value = serde_json::from_str(&raw).context("parse tree json")?;
    validate_schema(&instance)?;
    let tree: TaskTree = serde_json::from_str(&raw).context("parse tree as v1 struct")?;
    tree.validate_and_reorder().map_err(|err| anyhow::anyhow!(err))
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(V1_SCHEMA).context("parse embedded v1 schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile v1 schema")?;
    let messages: Vec<String> = compiled.iter_errors(instance).map(|err| err.to_string()).collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_garden_subcommand() {
        let cli = Cli::parse_from(["arborist", "garden", "--tree", "tree.json"]);
        assert!(matches!(cli.command, Command::Garden { .. }));
    }

    #[test]
    fn parse_inspect_requires_task_id() {
        let cli = Cli::parse_from([
            "arborist",
            "inspect",
            "--tree",
            "tree.json",
            "--task-id",
            "T001",
        ]);
        match cli.command {
            Command::Inspect { task_id, .. } => assert_eq!(task_id, "T001"),
            _ => panic!("expected Inspect"),
        }
    }

    #[test]
    fn validate_schema_rejects_missing_required_field() {
        let instance: Value = serde_json::from_str(r#"{"version": "1"}"#).unwrap();
        assert!(validate_schema(&instance).is_err());
    }

    #[test]
    fn validate_schema_accepts_minimal_valid_tree() {
        let instance: Value = serde_json::from_str(
            r#"{
                "version": "1",
                "spec_id": "spec1",
                "namespace": "feature",
                "root_ids": ["phase1"],
                "execution_order": ["T001"],
                "nodes": {
                    "phase1": {
                        "id": "phase1",
                        "name": "Phase 1",
                        "description": "",
                        "children": ["T001"],
                        "is_leaf": false
                    },
                    "T001": {
                        "id": "T001",
                        "name": "Task 1",
                        "description": "Do the thing",
                        "parent": "phase1",
                        "is_leaf": true
                    }
                }
            }"#,
        )
        .unwrap();
        assert!(validate_schema(&instance).is_ok());
    }
}
