use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use git::{Diff, GitCli, GitService};
use serde::Serialize;
use services::services::{
    config::{Settings, open_settings_store, settings_path},
    repository::RepositoryService,
    store::StateStore,
};
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "inspect")]
#[command(about = "Print the state of a git repository as JSON")]
#[command(version)]
struct Args {
    /// Repository to inspect
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,

    /// Settings file (defaults to the per-user settings)
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Working directory status
    Status,
    /// Commit history of HEAD
    Log {
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },
    /// Local and remote branches
    Branches,
    /// Diff and rendered rows of a changed file
    Diff {
        path: String,
        #[arg(long, default_value_t = false)]
        side_by_side: bool,
    },
    /// A commit and the files it changed
    Show { sha: String },
    /// Stash entries created by this tool
    Stashes,
}

fn init_tracing() -> Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,inspect={level},services={level},git={level},utils={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).context("Failed to create tracing filter")?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(env_filter),
        )
        .init();
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let path = match path {
        Some(path) => path,
        None => settings_path()?,
    };
    Ok(open_settings_store(path).await.snapshot().as_ref().clone())
}

async fn git_service(settings: &Settings) -> Result<GitService> {
    let cli = GitCli::discover(settings.git_executable.as_deref())
        .await?
        .with_timeout(settings.git_timeout());
    tracing::debug!("Using git at {}", cli.executable().display());
    Ok(GitService::new(Arc::new(cli)).with_max_status_buffer_bytes(settings.max_status_buffer_bytes))
}

async fn show_diff(repo: &Path, git: GitService, settings: Settings, path: &str) -> Result<()> {
    // Flags only apply to this run; the stored settings stay untouched.
    let service = RepositoryService::new(git, repo, Arc::new(StateStore::new(settings)));
    service.refresh_status().await?;
    let snapshot = service.select_working_file(path).await?;
    let Some(selected) = &snapshot.selected_diff else {
        bail!("no diff loaded for {path}");
    };
    let rows = match selected.diff {
        Diff::Text(_) => Some(service.diff_rows()?),
        _ => None,
    };
    print_json(&serde_json::json!({
        "file": selected.file,
        "diff": selected.diff,
        "rows": rows,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let mut settings = load_settings(args.settings).await?;
    let git = git_service(&settings).await?;
    let repo = args.repo.as_path();

    match args.command {
        Command::Status => match git.get_status(repo).await? {
            Some(status) => print_json(&status),
            None => bail!("{} is not a git repository", repo.display()),
        },
        Command::Log { limit } => {
            let commits = git.get_commits(repo, None, Some(limit), None, &[]).await?;
            print_json(&commits)
        }
        Command::Branches => {
            let service = RepositoryService::new(git, repo, Arc::new(StateStore::new(settings)));
            let snapshot = service.refresh().await?;
            print_json(&serde_json::json!({
                "branches": snapshot.branches,
                "recent_branches": snapshot.recent_branches,
                "default_branch": snapshot.default_branch,
            }))
        }
        Command::Diff { path, side_by_side } => {
            settings.show_side_by_side_diff |= side_by_side;
            show_diff(repo, git, settings, &path).await
        }
        Command::Show { sha } => {
            let Some(commit) = git.get_commit(repo, &sha).await? else {
                bail!("unknown revision {sha}");
            };
            let changes = git.get_changed_files(repo, &commit.sha).await?;
            print_json(&serde_json::json!({
                "commit": commit,
                "changes": changes,
            }))
        }
        Command::Stashes => print_json(&git.get_stashes(repo).await?),
    }
}
