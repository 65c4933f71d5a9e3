// ABOUTME: End-to-end sandbox provisioning: fetch source, build, launch, route, register
// ABOUTME: Rolls back everything a failed call committed so provisioning can simply be retried

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::controller::ContainerController;
use crate::error::{HostingError, Result};
use crate::locks::KeyedLocks;
use crate::naming::{derive_names, DerivedNames};
use crate::ports::PortAllocator;
use crate::providers::{BuildRequest, ContainerConfig, ProviderError, RuntimeProvider};
use crate::proxy::ProxyConfigManager;
use crate::registry::SandboxRegistry;
use crate::settings::{LaunchSettings, SourceSettings};
use crate::source::SourceFetcher;
use crate::types::{LifecycleOutcome, ProjectRef, Sandbox, SandboxIdentity, SandboxState};

/// Label naming the owner a container was provisioned for
pub const OWNER_LABEL: &str = "hostbox.owner";
/// Label naming the public hostname a container serves
pub const HOSTNAME_LABEL: &str = "hostbox.hostname";

/// What a provisioning call has committed so far
#[derive(Debug, Default)]
struct Rollback {
    port: Option<u16>,
    launch_attempted: bool,
    container_id: Option<String>,
    route: Option<String>,
}

pub struct Provisioner {
    runtime: Arc<dyn RuntimeProvider>,
    fetcher: Arc<dyn SourceFetcher>,
    registry: Arc<SandboxRegistry>,
    ports: Arc<PortAllocator>,
    proxy: Arc<ProxyConfigManager>,
    controller: Arc<ContainerController>,
    locks: KeyedLocks<SandboxIdentity>,
    base_domain: String,
    source: SourceSettings,
    launch: LaunchSettings,
}

#[allow(clippy::too_many_arguments)]
impl Provisioner {
    pub fn new(
        runtime: Arc<dyn RuntimeProvider>,
        fetcher: Arc<dyn SourceFetcher>,
        registry: Arc<SandboxRegistry>,
        ports: Arc<PortAllocator>,
        proxy: Arc<ProxyConfigManager>,
        controller: Arc<ContainerController>,
        base_domain: impl Into<String>,
        source: SourceSettings,
        launch: LaunchSettings,
    ) -> Self {
        Self {
            runtime,
            fetcher,
            registry,
            ports,
            proxy,
            controller,
            locks: KeyedLocks::new(),
            base_domain: base_domain.into(),
            source,
            launch,
        }
    }

    /// Working copy location for a project
    pub fn source_dir(&self, identity: &SandboxIdentity) -> PathBuf {
        self.source
            .work_dir
            .join(&identity.owner_key)
            .join(&identity.logical_name)
    }

    /// Provision a sandbox for the project, or return the one it already has
    pub async fn provision(&self, project: &ProjectRef) -> Result<LifecycleOutcome> {
        let names = derive_names(&project.logical_name, &project.owner_key, &self.base_domain)?;
        let _guard = self.locks.lock(&names.identity).await;

        if let Some(existing) = self.registry.find_by_identity(&names.identity).await {
            return match existing.state {
                SandboxState::Running => {
                    debug!("Sandbox for {} already running as {}", names.identity, existing.id);
                    Ok(LifecycleOutcome::new(existing))
                }
                SandboxState::Stopped => {
                    info!("Sandbox for {} is stopped, starting {}", names.identity, existing.id);
                    self.controller.start(&existing.id).await
                }
                state => Err(HostingError::Conflict(format!(
                    "sandbox for {} is {}",
                    names.identity, state
                ))),
            };
        }

        self.registry
            .begin_pending(&names.identity, &names.public_hostname)
            .await?;
        info!(
            "Provisioning {} ({} template) from {}",
            names.identity, project.template, project.source_location
        );

        let mut rollback = Rollback::default();
        let result = self.run_pipeline(project, &names, &mut rollback).await;

        match result {
            Ok(outcome) => {
                let sandbox = &outcome.sandbox;
                info!(
                    "Provisioned {} as {} at {} (port {})",
                    names.identity, sandbox.id, sandbox.public_hostname, sandbox.host_port
                );
                Ok(outcome)
            }
            Err(err) => {
                error!(
                    "Provisioning {} failed at {}: {}",
                    names.identity,
                    err.step().map(|s| s.as_str()).unwrap_or("commit"),
                    err
                );
                self.roll_back(&names, rollback).await;
                self.registry.abandon_pending(&names.identity).await;
                Err(err)
            }
        }
    }

    async fn run_pipeline(
        &self,
        project: &ProjectRef,
        names: &DerivedNames,
        rollback: &mut Rollback,
    ) -> Result<LifecycleOutcome> {
        // Source
        let source_dir = self.source_dir(&names.identity);
        let location = project.source_location.as_str();
        match with_deadline(
            self.source.fetch_timeout,
            self.fetcher.materialize(location, &source_dir),
        )
        .await
        {
            Some(Ok(outcome)) => debug!("Source for {} ready ({:?})", names.identity, outcome),
            Some(Err(e)) => return Err(HostingError::source_fetch(location, e)),
            None => {
                return Err(HostingError::SourceFetch {
                    location: location.to_string(),
                    reason: timed_out(self.source.fetch_timeout),
                })
            }
        }

        // Image
        let has_dockerfile = tokio::fs::try_exists(source_dir.join("Dockerfile"))
            .await
            .unwrap_or(false);
        let fallback_dockerfile = (!has_dockerfile)
            .then(|| project.template.default_dockerfile(self.launch.container_port));
        if fallback_dockerfile.is_some() {
            debug!(
                "No Dockerfile in {}, using the {} template",
                source_dir.display(),
                project.template
            );
        }
        let request = BuildRequest {
            context_dir: &source_dir,
            image_tag: &names.image_tag,
            fallback_dockerfile,
        };
        match with_deadline(self.launch.build_timeout, self.runtime.build_image(request)).await {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(HostingError::Build {
                    image: names.image_tag.clone(),
                    diagnostics: e.diagnostics(),
                })
            }
            None => {
                return Err(HostingError::Build {
                    image: names.image_tag.clone(),
                    diagnostics: timed_out(self.launch.build_timeout),
                })
            }
        }

        // Launch
        let port = self.ports.allocate().await?;
        rollback.port = Some(port);
        self.remove_orphan(names).await?;

        let config = self.container_config(project, names, port);
        rollback.launch_attempted = true;
        let launch = async {
            let id = self.runtime.create_container(&config).await?;
            rollback.container_id = Some(id.clone());
            self.runtime.start_container(&id).await?;
            Ok::<_, ProviderError>(id)
        };
        let container_id = match with_deadline(self.launch.launch_timeout, launch).await {
            Some(Ok(id)) => id,
            Some(Err(e)) => return Err(HostingError::launch(&names.container_name, e)),
            None => {
                return Err(HostingError::launch(
                    &names.container_name,
                    timed_out(self.launch.launch_timeout),
                ))
            }
        };

        // Route
        rollback.route = Some(names.public_hostname.clone());
        self.proxy.write_route(&names.public_hostname, port).await?;
        let reload_error = match self.proxy.reload().await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    "Route for {} written but proxy not reloaded: {}",
                    names.public_hostname, e
                );
                Some(e.to_string())
            }
        };

        // Register
        let now = Utc::now();
        let sandbox = Sandbox {
            id: container_id,
            logical_name: names.identity.logical_name.clone(),
            owner_key: names.identity.owner_key.clone(),
            container_name: names.container_name.clone(),
            image: names.image_tag.clone(),
            host_port: port,
            public_hostname: names.public_hostname.clone(),
            state: SandboxState::Running,
            created_at: now,
            last_activity_at: now,
        };
        self.registry.commit(sandbox.clone()).await?;
        Ok(LifecycleOutcome {
            sandbox,
            reload_error,
        })
    }

    fn container_config(
        &self,
        project: &ProjectRef,
        names: &DerivedNames,
        port: u16,
    ) -> ContainerConfig {
        ContainerConfig {
            image: names.image_tag.clone(),
            name: names.container_name.clone(),
            env_vars: HashMap::from([
                ("SUBDOMAIN".to_string(), names.public_hostname.clone()),
                ("PROJECT_NAME".to_string(), project.logical_name.clone()),
            ]),
            host_port: port,
            container_port: self.launch.container_port,
            limits: self.launch.limits.clone(),
            restart_max_retries: self.launch.restart_max_retries,
            network_mode: self.launch.network_mode.clone(),
            labels: HashMap::from([
                (OWNER_LABEL.to_string(), names.identity.owner_key.clone()),
                (HOSTNAME_LABEL.to_string(), names.public_hostname.clone()),
            ]),
        }
    }

    /// A container left over from an earlier crash of this identity would block
    /// the name. Containers labelled for anything else are never touched.
    async fn remove_orphan(&self, names: &DerivedNames) -> Result<()> {
        let container_name = names.container_name.as_str();
        let info = match self.runtime.get_container_info(container_name).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                warn!("Could not inspect container name {}: {}", container_name, e);
                return Ok(());
            }
        };

        let label = |key: &str| info.labels.get(key).map(String::as_str);
        if label(OWNER_LABEL) != Some(names.identity.owner_key.as_str())
            || label(HOSTNAME_LABEL) != Some(names.public_hostname.as_str())
        {
            return Err(HostingError::Conflict(format!(
                "container name {} is held by container {} that does not belong to {}",
                container_name, info.id, names.identity
            )));
        }

        match self.runtime.remove_container(&info.id, true).await {
            Ok(()) => warn!("Removed orphaned container {} ({})", container_name, info.id),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Could not clear container name {}: {}", container_name, e),
        }
        Ok(())
    }

    /// Undo what the failed call committed. Failures here are only logged.
    async fn roll_back(&self, names: &DerivedNames, rollback: Rollback) {
        if let Some(hostname) = &rollback.route {
            match self.proxy.remove_route(hostname).await {
                Ok(outcome) => {
                    if let Some(reason) = outcome.reload_error {
                        warn!("Rollback: proxy reload failed: {}", reason);
                    }
                }
                Err(e) => error!("Rollback: failed to remove route {}: {}", hostname, e),
            }
        }

        if rollback.launch_attempted {
            // Fall back to the name when create never returned an id
            let target = rollback
                .container_id
                .as_deref()
                .unwrap_or(&names.container_name);
            match self.runtime.remove_container(target, true).await {
                Ok(()) => debug!("Rollback: removed container {}", target),
                Err(e) if e.is_not_found() => {}
                Err(e) => error!("Rollback: failed to remove container {}: {}", target, e),
            }
        }

        if let Some(port) = rollback.port {
            self.ports.release(port).await;
        }
    }
}

/// None when the deadline passed first
async fn with_deadline<F: Future>(deadline: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(deadline, fut).await.ok()
}

fn timed_out(deadline: Duration) -> String {
    format!("timed out after {}s", deadline.as_secs())
}
