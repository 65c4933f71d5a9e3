// ABOUTME: Wires the registry, ports, proxy, controller, provisioner and reaper together
// ABOUTME: The caller-facing API for hosting: provision plus lifecycle calls by sandbox id

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::controller::ContainerController;
use crate::error::{HostingError, Result};
use crate::ports::PortAllocator;
use crate::providers::{DockerProvider, RuntimeProvider};
use crate::provisioner::Provisioner;
use crate::proxy::{CommandReloadHook, ProxyConfigManager, ReloadHook};
use crate::reaper::{Reaper, ReaperHandle, SweepReport};
use crate::registry::{SandboxRegistry, SnapshotError};
use crate::settings::HostingSettings;
use crate::source::{GitSourceFetcher, SourceFetcher};
use crate::types::{LifecycleOutcome, ProjectRef, Sandbox, SandboxState, SandboxStatus};

pub struct Orchestrator {
    settings: HostingSettings,
    runtime: Arc<dyn RuntimeProvider>,
    registry: Arc<SandboxRegistry>,
    ports: Arc<PortAllocator>,
    proxy: Arc<ProxyConfigManager>,
    controller: Arc<ContainerController>,
    provisioner: Provisioner,
    reaper: Arc<Reaper>,
}

impl Orchestrator {
    pub fn new(
        settings: HostingSettings,
        runtime: Arc<dyn RuntimeProvider>,
        fetcher: Arc<dyn SourceFetcher>,
        reload_hook: Box<dyn ReloadHook>,
    ) -> Self {
        let registry = Arc::new(match &settings.state_file {
            Some(path) => SandboxRegistry::with_snapshot(path),
            None => SandboxRegistry::new(),
        });
        let ports = Arc::new(PortAllocator::with_host_probe(
            settings.ports.range(),
            settings.ports.probe_host,
        ));
        let proxy = Arc::new(ProxyConfigManager::new(settings.proxy.clone(), reload_hook));
        let controller = Arc::new(ContainerController::new(
            runtime.clone(),
            registry.clone(),
            ports.clone(),
            proxy.clone(),
            settings.launch.stop_timeout,
        ));
        let provisioner = Provisioner::new(
            runtime.clone(),
            fetcher,
            registry.clone(),
            ports.clone(),
            proxy.clone(),
            controller.clone(),
            settings.base_domain.clone(),
            settings.source.clone(),
            settings.launch.clone(),
        );
        let reaper = Arc::new(Reaper::new(controller.clone(), settings.reaper.clone()));

        Self {
            settings,
            runtime,
            registry,
            ports,
            proxy,
            controller,
            provisioner,
            reaper,
        }
    }

    /// Local Docker daemon, git CLI and command-driven proxy reload
    pub fn local(settings: HostingSettings) -> Result<Self> {
        let runtime = DockerProvider::new()?;
        let fetcher = GitSourceFetcher::new().map_err(|e| HostingError::SourceFetch {
            location: "git".to_string(),
            reason: e.to_string(),
        })?;
        let reload = CommandReloadHook::new(settings.reload.command.clone(), settings.reload.timeout)?;
        Ok(Self::new(
            settings,
            Arc::new(runtime),
            Arc::new(fetcher),
            Box::new(reload),
        ))
    }

    pub fn settings(&self) -> &HostingSettings {
        &self.settings
    }

    pub fn controller(&self) -> &Arc<ContainerController> {
        &self.controller
    }

    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    pub fn proxy(&self) -> &Arc<ProxyConfigManager> {
        &self.proxy
    }

    pub fn reaper(&self) -> &Arc<Reaper> {
        &self.reaper
    }

    pub async fn runtime_available(&self) -> bool {
        self.runtime.is_available().await.unwrap_or(false)
    }

    /// Reload sandboxes from the registry snapshot, re-reserving their ports and
    /// rewriting routes for the running ones
    pub async fn restore(&self) -> std::result::Result<usize, SnapshotError> {
        let restored = self.registry.load_snapshot().await?;
        let mut routes_written = 0;

        for sandbox in &restored {
            if let Err(e) = self.ports.reserve(sandbox.host_port).await {
                warn!("Restored sandbox {}: {}", sandbox.id, e);
            }
            if sandbox.state == SandboxState::Running {
                match self
                    .proxy
                    .write_route(&sandbox.public_hostname, sandbox.host_port)
                    .await
                {
                    Ok(()) => routes_written += 1,
                    Err(e) => warn!("Restored sandbox {}: {}", sandbox.id, e),
                }
            } else if let Err(e) = self.proxy.delete_route(&sandbox.public_hostname).await {
                warn!("Restored sandbox {}: {}", sandbox.id, e);
            }
        }

        if routes_written > 0 {
            if let Err(e) = self.proxy.reload().await {
                warn!("Proxy reload after restore failed: {}", e);
            }
        }
        info!("Restored {} sandboxes", restored.len());
        Ok(restored.len())
    }

    /// Persist activity timestamps that changed since the last state change
    pub async fn flush(&self) -> std::result::Result<(), SnapshotError> {
        self.registry.flush().await
    }

    pub async fn provision(&self, project: &ProjectRef) -> Result<LifecycleOutcome> {
        self.provisioner.provision(project).await
    }

    pub async fn start(&self, id: &str) -> Result<LifecycleOutcome> {
        self.controller.start(id).await
    }

    pub async fn stop(&self, id: &str) -> Result<LifecycleOutcome> {
        self.controller.stop(id).await
    }

    pub async fn restart(&self, id: &str) -> Result<LifecycleOutcome> {
        self.controller.restart(id).await
    }

    pub async fn ensure_running(&self, id: &str) -> Result<bool> {
        self.controller.ensure_running(id).await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.controller.remove(id).await
    }

    pub async fn status(&self, id: &str) -> Result<SandboxStatus> {
        self.controller.status(id).await
    }

    pub async fn get(&self, id: &str) -> Result<Sandbox> {
        self.controller.get(id).await
    }

    pub async fn list(&self) -> Vec<Sandbox> {
        self.controller.list().await
    }

    pub async fn record_activity(&self, id: &str) -> Result<DateTime<Utc>> {
        self.controller.record_activity(id).await
    }

    pub async fn record_activity_at(&self, id: &str, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.controller.record_activity_at(id, at).await
    }

    pub async fn record_activity_for_host(
        &self,
        hostname: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Sandbox> {
        self.controller.record_activity_for_host(hostname, at).await
    }

    /// Retry a reload on its own, e.g. after a failed one was reported
    pub async fn reload_proxy(&self) -> Result<()> {
        Ok(self.proxy.reload().await?)
    }

    pub async fn sweep_idle(&self) -> Option<SweepReport> {
        self.reaper.sweep().await
    }

    pub fn spawn_reaper(&self) -> ReaperHandle {
        self.reaper.clone().spawn()
    }
}
