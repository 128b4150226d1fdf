//! Rebuild CLI - periodic image rebuilds
//!
//! The `rebuild` command re-triggers the build workflow of every configured
//! repository on the newest release branches and the rolling branch.
//!
//! ## Commands
//!
//! - `branches`: List and select the branches to rebuild
//! - `matrix`: Print the repo × branch matrix axes
//! - `dispatch`: Trigger and wait for a single cell
//! - `run`: Full flow, list -> select -> fan out -> report

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use rebuild_core::{
    BranchLister, BranchName, BranchSet, BuildMatrix, DispatchJob, DispatchOutcome, Dispatcher,
    RebuildConfig, RebuildReport, RebuildRunner,
};
use rebuild_github::{GitHubBranchSource, GitHubClient, GitHubConfig, GitHubWorkflowTrigger};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "rebuild")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Re-trigger image builds on the latest release branches", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to a TOML config file (built-in defaults when omitted)
    #[arg(short, long, global = true, env = "REBUILD_CONFIG")]
    config: Option<PathBuf>,

    /// GitHub REST API root
    #[arg(
        long,
        global = true,
        env = "GITHUB_API_URL",
        default_value = rebuild_github::DEFAULT_API_URL
    )]
    api_url: String,

    /// Seconds before an unanswered GitHub request is abandoned
    #[arg(long, global = true, default_value_t = rebuild_github::DEFAULT_TIMEOUT.as_secs())]
    http_timeout: u64,

    /// Token with permission to dispatch workflows
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the source repository's branches and print the selection as JSON
    Branches {
        /// Append `branches=<json>` to this file (set by GitHub Actions)
        #[arg(long, env = "GITHUB_OUTPUT")]
        github_output: Option<PathBuf>,
    },

    /// Print the matrix axes as JSON
    Matrix {
        /// Only include these repositories (comma-separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Use these branches instead of listing (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        branch: Vec<String>,

        /// Append `matrix=<json>` to this file (set by GitHub Actions)
        #[arg(long, env = "GITHUB_OUTPUT")]
        github_output: Option<PathBuf>,
    },

    /// Trigger one repository's workflow on one branch and wait for it
    Dispatch {
        /// Target repository name as configured
        #[arg(long)]
        repo: String,

        /// Branch to build
        #[arg(long)]
        branch: String,

        #[command(flatten)]
        wait: WaitArgs,
    },

    /// Rebuild every (repository, branch) cell
    Run {
        /// Use these branches instead of listing (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        branch: Vec<String>,

        /// Only include these repositories (comma-separated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Print the jobs without dispatching anything
        #[arg(long)]
        dry_run: bool,

        /// Write a Markdown report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        wait: WaitArgs,
    },
}

/// Overrides for the `[dispatch]` config section.
#[derive(Args, Debug, Default)]
struct WaitArgs {
    /// Seconds between status polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Seconds allowed for dispatching and locating the new run
    #[arg(long)]
    trigger_timeout: Option<u64>,

    /// Seconds to wait for a triggered run before giving up
    #[arg(long)]
    wait_timeout: Option<u64>,

    /// Maximum cells in flight at once
    #[arg(long)]
    max_parallel: Option<usize>,
}

impl WaitArgs {
    fn apply(&self, config: &mut RebuildConfig) -> Result<()> {
        if let Some(secs) = self.poll_interval {
            config.dispatch.poll_interval_secs = secs;
        }
        if let Some(secs) = self.trigger_timeout {
            config.dispatch.trigger_timeout_secs = secs;
        }
        if let Some(secs) = self.wait_timeout {
            config.dispatch.wait_timeout_secs = secs;
        }
        if self.max_parallel.is_some() {
            config.dispatch.max_parallel = self.max_parallel;
        }
        config.validate().context("Invalid dispatch overrides")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    rebuild_core::init_tracing(cli.json, level);

    let mut config = RebuildConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load rebuild config")?;
    let client = github_client(
        &cli.api_url,
        cli.token.as_deref(),
        Duration::from_secs(cli.http_timeout),
    )?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    match cli.command {
        Commands::Branches { github_output } => {
            cmd_branches(&config, &client, github_output.as_deref()).await
        }
        Commands::Matrix {
            only,
            branch,
            github_output,
        } => cmd_matrix(&config, &client, &only, &branch, github_output.as_deref()).await,
        Commands::Dispatch { repo, branch, wait } => {
            wait.apply(&mut config)?;
            cmd_dispatch(&config, client, &repo, &branch, cancel).await
        }
        Commands::Run {
            branch,
            only,
            dry_run,
            report,
            wait,
        } => {
            wait.apply(&mut config)?;
            cmd_run(
                &config,
                client,
                &branch,
                &only,
                dry_run,
                report.as_deref(),
                cancel,
            )
            .await
        }
    }
}

fn github_client(api_url: &str, token: Option<&str>, timeout: Duration) -> Result<GitHubClient> {
    if timeout.is_zero() {
        bail!("--http-timeout must be positive");
    }
    let mut config = GitHubConfig::new(api_url).with_timeout(timeout);
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        config = config.with_token(token);
    }
    GitHubClient::new(config).context("Failed to build GitHub client")
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling in-flight waits");
            cancel.cancel();
        }
    });
}

/// Branches given on the command line, validated but not filtered.
fn branch_overrides(names: &[String]) -> Result<BranchSet> {
    let names = names
        .iter()
        .map(|n| BranchName::new(n.trim()))
        .collect::<rebuild_core::Result<Vec<_>>>()
        .context("Invalid --branch value")?;
    Ok(BranchSet::from_names(names))
}

async fn select_branches(config: &RebuildConfig, client: &GitHubClient) -> Result<BranchSet> {
    let source = config.source_repo();
    let lister = BranchLister::new(
        Arc::new(GitHubBranchSource::new(client.clone())),
        config.retry_policy(),
    );
    let names = lister
        .list(&source)
        .await
        .with_context(|| format!("Failed to list branches of {source}"))?;
    let selected = config.selector()?.select(names);
    info!(repo = %source, branches = %selected.to_json(), "selected branches");
    Ok(selected)
}

async fn resolve_branches(
    config: &RebuildConfig,
    client: &GitHubClient,
    overrides: &[String],
) -> Result<BranchSet> {
    if overrides.is_empty() {
        select_branches(config, client).await
    } else {
        branch_overrides(overrides)
    }
}

fn append_github_output(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    writeln!(file, "{key}={value}")
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn dispatcher(config: &RebuildConfig, client: GitHubClient) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(
        Arc::new(GitHubWorkflowTrigger::new(client)),
        config.dispatch_settings(),
    ))
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_outcome(outcome: &DispatchOutcome) {
    let status = if outcome.succeeded() { "✓" } else { "✗" };
    let run = outcome
        .run
        .as_ref()
        .map(|r| r.url.clone().unwrap_or_else(|| format!("run {}", r.id)))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {} {} {} ({}ms, {})",
        status,
        outcome.label(),
        outcome.state,
        outcome.duration_ms,
        run
    );
    if let Some(detail) = outcome.detail.as_deref().filter(|_| !outcome.succeeded()) {
        println!("      {}", detail);
    }
}

/// Print the selected branches as a JSON array
async fn cmd_branches(
    config: &RebuildConfig,
    client: &GitHubClient,
    github_output: Option<&Path>,
) -> Result<ExitCode> {
    let branches = select_branches(config, client).await?;
    let json = branches.to_json();
    println!("{}", json);
    if let Some(path) = github_output {
        append_github_output(path, "branches", &json)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the matrix axes
async fn cmd_matrix(
    config: &RebuildConfig,
    client: &GitHubClient,
    only: &[String],
    branches: &[String],
    github_output: Option<&Path>,
) -> Result<ExitCode> {
    let branches = resolve_branches(config, client, branches).await?;
    let matrix = BuildMatrix::new(config.repo_targets(), branches).restrict_repos(only);
    let axes = serde_json::to_string(&matrix.axes_json())?;
    println!("{}", axes);
    if let Some(path) = github_output {
        append_github_output(path, "matrix", &axes)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Trigger a single cell and wait for its outcome
async fn cmd_dispatch(
    config: &RebuildConfig,
    client: GitHubClient,
    repo: &str,
    branch: &str,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let Some(target) = config.repo_targets().into_iter().find(|t| t.repo.name == repo) else {
        bail!("Unknown target repository: {}", repo);
    };
    let branch = BranchName::new(branch).context("Invalid --branch value")?;
    let job = DispatchJob::new(target, branch);

    println!("Dispatching {}", job);
    let outcome = dispatcher(config, client).run_job(job, cancel).await;
    print_outcome(&outcome);
    Ok(exit_code(outcome.succeeded()))
}

/// Full rebuild: list, select, fan out, report
async fn cmd_run(
    config: &RebuildConfig,
    client: GitHubClient,
    branches: &[String],
    only: &[String],
    dry_run: bool,
    report_path: Option<&Path>,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let branches = resolve_branches(config, &client, branches).await?;
    let matrix = BuildMatrix::new(config.repo_targets(), branches).restrict_repos(only);
    if matrix.is_empty() {
        bail!("No targets match --only {:?}", only);
    }

    println!(
        "Rebuilding {} cell(s): {} repo(s) × {} branch(es)",
        matrix.len(),
        matrix.repos.len(),
        matrix.branches.len()
    );

    if dry_run {
        for job in matrix.jobs() {
            println!("  - {} ({})", job.label(), job.target.workflow);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let runner = RebuildRunner::new(dispatcher(config, client))
        .with_max_parallel(config.dispatch.max_parallel);
    let report = runner.run(&matrix, cancel).await;
    print_report(&report);

    if let Some(path) = report_path {
        std::fs::write(path, report.to_markdown())
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "wrote rebuild report");
    }

    Ok(exit_code(report.success()))
}

fn print_report(report: &RebuildReport) {
    println!();
    for outcome in &report.outcomes {
        print_outcome(outcome);
    }
    println!();
    let counts = report
        .counts()
        .into_iter()
        .map(|(state, n)| format!("{state}={n}"))
        .collect::<Vec<_>>()
        .join(", ");
    println!(
        "Summary: {}/{} cells succeeded ({})",
        report.count(rebuild_core::DispatchState::Succeeded),
        report.outcomes.len(),
        counts
    );
    println!(
        "Status: {}",
        if report.success() {
            "✓ PASSED"
        } else {
            "✗ FAILED"
        }
    );
}
