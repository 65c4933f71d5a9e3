// ABOUTME: Docker provider implementation for locally hosted sandboxes
// ABOUTME: Uses bollard to build images and manage container lifecycle on the local daemon

use super::{
    BuildOutput, BuildRequest, ContainerConfig, ContainerInfo, ContainerStatus, ProviderError,
    Result, RuntimeProvider,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, RemoveContainerOptions, RestartContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    image::BuildImageOptions,
    models::{
        BuildInfoAux, HostConfig, ImageId, PortBinding, RestartPolicy, RestartPolicyNameEnum,
    },
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the generated Dockerfile placed into the build context
const FALLBACK_DOCKERFILE: &str = "Dockerfile.hostbox";

pub struct DockerProvider {
    client: Docker,
    label_prefix: String,
}

impl DockerProvider {
    /// Connect to the local Docker daemon using the platform defaults
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Create with a specific Docker connection
    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            label_prefix: "hostbox.sandbox".to_string(),
        }
    }

    /// Convert our config to bollard config
    fn to_bollard_config(&self, config: &ContainerConfig) -> Config<String> {
        let mut labels = config.labels.clone();
        labels.insert(format!("{}.managed", self.label_prefix), "true".to_string());
        labels.insert(format!("{}.name", self.label_prefix), config.name.clone());

        let container_port = format!("{}/tcp", config.container_port);
        let exposed_ports = HashMap::from([(container_port.clone(), HashMap::new())]);
        let port_bindings = HashMap::from([(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(config.host_port.to_string()),
            }]),
        )]);

        let env: Vec<String> = config
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let memory_bytes = (config.limits.memory_mb * 1024 * 1024) as i64;
        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            memory: Some(memory_bytes),
            // Swap limit equal to the memory limit means no swap
            memory_swap: Some(memory_bytes),
            cpu_quota: Some(config.limits.cpu_quota_us),
            cpu_period: Some(config.limits.cpu_period_us),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: Some(config.restart_max_retries),
            }),
            network_mode: config.network_mode.clone(),
            privileged: Some(false),
            ..Default::default()
        };

        Config {
            image: Some(config.image.clone()),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Convert bollard container status to our status
    fn convert_status(state: &str) -> ContainerStatus {
        match state.to_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "restarting" => ContainerStatus::Restarting,
            "paused" => ContainerStatus::Paused,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Stopped,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Unknown(other.to_string()),
        }
    }

    /// Map a daemon error for a container call, keeping 404 distinguishable
    fn container_error(container_id: &str, err: bollard::errors::Error) -> ProviderError {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => ProviderError::NotFound(container_id.to_string()),
            other => ProviderError::ContainerError(other.to_string()),
        }
    }
}

#[async_trait]
impl RuntimeProvider for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn build_image(&self, request: BuildRequest<'_>) -> Result<BuildOutput> {
        info!(
            "Building image {} from {}",
            request.image_tag,
            request.context_dir.display()
        );

        let context_dir = request.context_dir.to_path_buf();
        let fallback = request.fallback_dockerfile.clone();
        let dockerfile = if fallback.is_some() {
            FALLBACK_DOCKERFILE
        } else {
            "Dockerfile"
        };

        // Archiving walks the whole tree, keep it off the async workers
        let tar_data =
            tokio::task::spawn_blocking(move || create_build_context(&context_dir, fallback))
                .await
                .map_err(|e| ProviderError::InternalError(e.to_string()))?
                .map_err(|e| ProviderError::ImageError(format!("Failed to archive source: {}", e)))?;

        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string(),
            t: request.image_tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(options, None, Some(tar_data.into()));

        let mut output = BuildOutput::default();
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(line) = info.stream.as_deref().map(str::trim_end) {
                        if !line.is_empty() {
                            debug!("build {}: {}", request.image_tag, line);
                            output.log.push(line.to_string());
                        }
                    }
                    if let Some(error) = info.error {
                        return Err(ProviderError::BuildFailed {
                            message: error,
                            log: output.log,
                        });
                    }
                    if let Some(id) = built_image_id(info.aux) {
                        output.image_id = Some(id);
                    }
                }
                Err(e) => {
                    return Err(ProviderError::BuildFailed {
                        message: e.to_string(),
                        log: output.log,
                    });
                }
            }
        }

        info!("Built image {}", request.image_tag);
        Ok(output)
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        info!("Creating container: {}", config.name);

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), self.to_bollard_config(config))
            .await
            .map_err(|e| ProviderError::ContainerError(e.to_string()))?;

        for warning in &container.warnings {
            warn!("Docker warning for {}: {}", config.name, warning);
        }
        debug!("Created container: {}", container.id);

        Ok(container.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        info!("Starting container: {}", container_id);

        match self
            .client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(_) => Ok(()),
            // 304: already running
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(Self::container_error(container_id, e)),
        }
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        info!(
            "Stopping container: {} (timeout: {}s)",
            container_id, timeout_secs
        );

        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };

        match self.client.stop_container(container_id, Some(options)).await {
            Ok(_) => Ok(()),
            // 304: already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(Self::container_error(container_id, e)),
        }
    }

    async fn restart_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        info!(
            "Restarting container: {} (timeout: {}s)",
            container_id, timeout_secs
        );

        let options = RestartContainerOptions {
            t: timeout_secs as isize,
        };

        self.client
            .restart_container(container_id, Some(options))
            .await
            .map_err(|e| Self::container_error(container_id, e))
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> Result<()> {
        info!("Removing container: {} (force: {})", container_id, force);

        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| Self::container_error(container_id, e))
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        let inspect = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(|e| Self::container_error(container_id, e))?;

        let state = inspect.state.as_ref().ok_or_else(|| {
            ProviderError::ContainerError("Container has no state information".to_string())
        })?;

        let status = Self::convert_status(
            state
                .status
                .as_ref()
                .map(|s| s.as_ref())
                .unwrap_or("unknown"),
        );

        let started_at = state
            .started_at
            .as_ref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc));

        Ok(ContainerInfo {
            id: inspect.id.clone().unwrap_or_else(|| container_id.to_string()),
            name: inspect
                .name
                .clone()
                .unwrap_or_else(|| container_id.to_string())
                .trim_start_matches('/')
                .to_string(),
            running: state.running.unwrap_or(false),
            status,
            started_at,
            labels: inspect
                .config
                .as_ref()
                .and_then(|config| config.labels.clone())
                .unwrap_or_default(),
        })
    }
}

/// Tar the build context, adding the fallback Dockerfile when one is supplied
/// Image id from a classic builder aux message; BuildKit progress carries none
fn built_image_id(aux: Option<BuildInfoAux>) -> Option<String> {
    match aux {
        Some(BuildInfoAux::Default(ImageId { id, .. })) => id,
        _ => None,
    }
}

fn create_build_context(context_dir: &Path, fallback: Option<String>) -> std::io::Result<Vec<u8>> {
    use tar::{Builder, Header};

    let mut archive = Builder::new(Vec::new());
    archive.append_dir_all(".", context_dir)?;

    if let Some(contents) = fallback {
        let mut header = Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        archive.append_data(
            &mut header,
            PathBuf::from(FALLBACK_DOCKERFILE),
            contents.as_bytes(),
        )?;
    }

    archive.into_inner()
}
