// ABOUTME: Provider trait and shared types for container runtime backends
// ABOUTME: Defines the capability interface the orchestrator uses to build and run sandboxes

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub mod docker;

pub use docker::DockerProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image build failed: {message}")]
    BuildFailed {
        message: String,
        /// Build output collected before the failure
        log: Vec<String>,
    },

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    /// Backend output worth showing to a user, including the build log tail
    pub fn diagnostics(&self) -> String {
        match self {
            ProviderError::BuildFailed { message, log } if !log.is_empty() => {
                let tail: Vec<&str> = log
                    .iter()
                    .rev()
                    .take(BUILD_LOG_TAIL)
                    .rev()
                    .map(String::as_str)
                    .collect();
                format!("{}\n{}", message, tail.join("\n"))
            }
            other => other.to_string(),
        }
    }
}

/// Number of build log lines kept in diagnostics
const BUILD_LOG_TAIL: usize = 20;

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Resource ceilings applied to every sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    pub memory_mb: u64,
    /// CPU time (µs) per `cpu_period_us`; 50000/100000 is half a core
    pub cpu_quota_us: i64,
    pub cpu_period_us: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_quota_us: 50_000,
            cpu_period_us: 100_000,
        }
    }
}

/// Container configuration for creating sandboxes
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    pub env_vars: HashMap<String, String>,
    pub host_port: u16,
    pub container_port: u16,
    pub limits: ResourceLimits,
    /// Restart attempts allowed by the on-failure policy
    pub restart_max_retries: i64,
    pub network_mode: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Image build request
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub context_dir: &'a Path,
    pub image_tag: &'a str,
    /// Dockerfile contents to use when the context has none
    pub fallback_dockerfile: Option<String>,
}

/// Image build result
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub image_id: Option<String>,
    pub log: Vec<String>,
}

/// Container runtime information
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub running: bool,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    Created,
    Running,
    Restarting,
    Paused,
    Stopped,
    Removing,
    Dead,
    Unknown(String),
}

impl ContainerStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Stopped => "exited",
            ContainerStatus::Removing => "removing",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Unknown(s) => s.as_str(),
        }
    }
}

/// Capability interface over a container runtime
#[async_trait]
pub trait RuntimeProvider: Send + Sync {
    /// Check if the runtime is reachable
    async fn is_available(&self) -> Result<bool>;

    /// Build an image from a source directory
    async fn build_image(&self, request: BuildRequest<'_>) -> Result<BuildOutput>;

    /// Create a container without starting it
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    /// Start a stopped container
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop a running container; stopping a stopped container succeeds
    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Restart a container in one runtime operation
    async fn restart_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Remove a container. Accepts an id or a name.
    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()>;

    /// Inspect a container
    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo>;
}
