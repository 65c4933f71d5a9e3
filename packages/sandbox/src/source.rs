// ABOUTME: Materializes project source code into a local working directory
// ABOUTME: Clones on first use and fast-forwards an existing checkout of the same origin

use async_trait::async_trait;
use git2::Repository;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid source location: {0}")]
    InvalidLocation(String),

    #[error("git executable not found in PATH")]
    GitNotAvailable,

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the working copy was brought up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Cloned,
    Refreshed,
}

/// Fetches source from a location into a target directory.
///
/// Implementations must leave `target` holding the latest source on success.
/// Deadlines are applied by the caller, so a dropped future must not leave
/// child processes behind.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn materialize(
        &self,
        location: &str,
        target: &Path,
    ) -> Result<FetchOutcome, SourceError>;
}

/// Git-backed fetcher driving the `git` CLI
pub struct GitSourceFetcher {
    git_path: PathBuf,
}

impl GitSourceFetcher {
    pub fn new() -> Result<Self, SourceError> {
        let git_path = which::which("git").map_err(|_| SourceError::GitNotAvailable)?;
        debug!("Using git at {}", git_path.display());
        Ok(Self { git_path })
    }

    async fn run_git(&self, args: &[&str], cwd: Option<&Path>) -> Result<(), SourceError> {
        let mut command = Command::new(&self.git_path);
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SourceError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr,
            });
        }
        Ok(())
    }

    async fn clone_into(&self, location: &str, target: &Path) -> Result<(), SourceError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target_str = target.to_string_lossy();
        self.run_git(&["clone", "--", location, &target_str], None)
            .await
    }
}

#[async_trait]
impl SourceFetcher for GitSourceFetcher {
    async fn materialize(
        &self,
        location: &str,
        target: &Path,
    ) -> Result<FetchOutcome, SourceError> {
        validate_location(location)?;

        if target.exists() {
            if checkout_matches(target, location) {
                info!("Refreshing source in {}", target.display());
                self.run_git(&["pull", "--ff-only"], Some(target)).await?;
                return Ok(FetchOutcome::Refreshed);
            }
            warn!(
                "Replacing {} which is not a checkout of {}",
                target.display(),
                location
            );
            tokio::fs::remove_dir_all(target).await?;
        }

        info!("Cloning {} into {}", location, target.display());
        self.clone_into(location, target).await?;
        Ok(FetchOutcome::Cloned)
    }
}

/// Reject locations git would read as an option
pub fn validate_location(location: &str) -> Result<(), SourceError> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err(SourceError::InvalidLocation("location is empty".to_string()));
    }
    if trimmed.starts_with('-') {
        return Err(SourceError::InvalidLocation(format!(
            "'{}' must not start with '-'",
            location
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(SourceError::InvalidLocation(
            "location contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// Whether `dir` is a git checkout whose origin is `location`
fn checkout_matches(dir: &Path, location: &str) -> bool {
    let repo = match Repository::open(dir) {
        Ok(repo) => repo,
        Err(e) => {
            debug!("No git repository at {}: {}", dir.display(), e);
            return false;
        }
    };

    let remote = match repo.find_remote("origin") {
        Ok(remote) => remote,
        Err(e) => {
            debug!("No origin remote in {}: {}", dir.display(), e);
            return false;
        }
    };

    remote
        .url()
        .map(|url| url.trim_end_matches('/') == location.trim().trim_end_matches('/'))
        .unwrap_or(false)
}
