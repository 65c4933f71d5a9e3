// ABOUTME: Lifecycle control over provisioned sandboxes (start, stop, restart, remove, status)
// ABOUTME: Keeps registry state, proxy routes, ports and activity in step with the runtime

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityTracker;
use crate::error::{HostingError, Result};
use crate::locks::KeyedLocks;
use crate::ports::PortAllocator;
use crate::providers::{ProviderError, RuntimeProvider};
use crate::proxy::ProxyConfigManager;
use crate::registry::SandboxRegistry;
use crate::types::{LifecycleOutcome, Sandbox, SandboxState, SandboxStatus};

/// What an idle check did with a sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleStop {
    Stopped,
    /// No longer running or active again since the check started
    Skipped,
    /// Gone from the runtime, bookkeeping dropped
    Purged,
}

pub struct ContainerController {
    runtime: Arc<dyn RuntimeProvider>,
    registry: Arc<SandboxRegistry>,
    activity: ActivityTracker,
    ports: Arc<PortAllocator>,
    proxy: Arc<ProxyConfigManager>,
    locks: KeyedLocks<String>,
    stop_timeout: Duration,
}

impl ContainerController {
    pub fn new(
        runtime: Arc<dyn RuntimeProvider>,
        registry: Arc<SandboxRegistry>,
        ports: Arc<PortAllocator>,
        proxy: Arc<ProxyConfigManager>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            activity: ActivityTracker::new(registry.clone()),
            registry,
            ports,
            proxy,
            locks: KeyedLocks::new(),
            stop_timeout,
        }
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    pub async fn get(&self, id: &str) -> Result<Sandbox> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| HostingError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<Sandbox> {
        self.registry.list().await
    }

    /// Stopped -> Running. Already running sandboxes are left alone.
    pub async fn start(&self, id: &str) -> Result<LifecycleOutcome> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let sandbox = self.get(id).await?;

        if sandbox.is_running() {
            debug!("Sandbox {} already running", id);
            self.activity.record(id).await?;
            return Ok(LifecycleOutcome::new(self.get(id).await?));
        }

        self.bring_up(&sandbox, false).await
    }

    /// Running -> Stopped. Stopping a stopped sandbox only makes sure its route is gone.
    pub async fn stop(&self, id: &str) -> Result<LifecycleOutcome> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let sandbox = self.get(id).await?;
        self.stop_locked(&sandbox).await
    }

    /// Restart in one runtime operation; always ends Running
    pub async fn restart(&self, id: &str) -> Result<LifecycleOutcome> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let sandbox = self.get(id).await?;
        self.bring_up(&sandbox, true).await
    }

    /// Start the sandbox if the runtime says it is not running.
    /// Returns whether a start happened.
    pub async fn ensure_running(&self, id: &str) -> Result<bool> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let sandbox = self.get(id).await?;

        let info = match self.runtime.get_container_info(id).await {
            Ok(info) => info,
            Err(e) => return Err(self.runtime_failure(&sandbox, e).await),
        };

        if info.running {
            if !sandbox.is_running() {
                // Registry fell behind the runtime, e.g. after a restore
                self.mark_running(&sandbox).await?;
            }
            self.activity.record(id).await?;
            return Ok(false);
        }

        info!("Sandbox {} is not running ({}), starting it", id, info.status.as_str());
        self.bring_up(&sandbox, false).await?;
        Ok(true)
    }

    /// Remove the sandbox and everything it holds. Unknown ids are not an error.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let Some(sandbox) = self.registry.get(id).await else {
            debug!("Remove of unknown sandbox {} is a no-op", id);
            return Ok(());
        };

        info!("Removing sandbox {} ({})", id, sandbox.public_hostname);
        self.proxy.remove_route(&sandbox.public_hostname).await?;

        if sandbox.is_running() {
            match self
                .runtime
                .stop_container(id, self.stop_timeout.as_secs())
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Failed to stop sandbox {} before removal: {}", id, e),
            }
        }

        match self.runtime.remove_container(id, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Container {} already gone from runtime", id);
            }
            Err(e) => {
                // Keep bookkeeping so the removal can be retried
                error!("Failed to remove container {}: {}", id, e);
                return Err(e.into());
            }
        }

        self.forget(&sandbox).await;
        info!("Sandbox {} removed", id);
        Ok(())
    }

    /// Read-only view of a sandbox and its runtime liveness
    pub async fn status(&self, id: &str) -> Result<SandboxStatus> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let sandbox = self.get(id).await?;

        let info = match self.runtime.get_container_info(id).await {
            Ok(info) => info,
            Err(e) => return Err(self.runtime_failure(&sandbox, e).await),
        };

        Ok(SandboxStatus {
            id: sandbox.id,
            name: sandbox.container_name,
            state: sandbox.state,
            running: info.running,
            runtime_status: info.status.as_str().to_string(),
            started_at: info.started_at,
            last_activity_at: sandbox.last_activity_at,
        })
    }

    pub async fn record_activity(&self, id: &str) -> Result<DateTime<Utc>> {
        self.activity.record(id).await
    }

    pub async fn record_activity_at(&self, id: &str, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.activity.record_at(id, at).await
    }

    /// Record activity reported by the proxy, which only knows hostnames
    pub async fn record_activity_for_host(
        &self,
        hostname: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<Sandbox> {
        let sandbox = self
            .registry
            .find_by_hostname(hostname)
            .await
            .ok_or_else(|| HostingError::NotFound(hostname.to_string()))?;
        self.activity
            .record_at(&sandbox.id, at.unwrap_or_else(Utc::now))
            .await?;
        self.get(&sandbox.id).await
    }

    /// Stop the sandbox if it is still running and has had no activity since `cutoff`
    pub async fn stop_if_idle(&self, id: &str, cutoff: DateTime<Utc>) -> Result<IdleStop> {
        let _guard = self.locks.lock(&id.to_string()).await;
        let Some(sandbox) = self.registry.get(id).await else {
            return Ok(IdleStop::Skipped);
        };
        if !sandbox.is_running() || sandbox.last_activity_at >= cutoff {
            return Ok(IdleStop::Skipped);
        }

        match self.stop_locked(&sandbox).await {
            Ok(_) => Ok(IdleStop::Stopped),
            Err(e) if e.is_not_found() => Ok(IdleStop::Purged),
            Err(e) => Err(e),
        }
    }

    async fn stop_locked(&self, sandbox: &Sandbox) -> Result<LifecycleOutcome> {
        let id = sandbox.id.as_str();

        if sandbox.is_running() {
            info!("Stopping sandbox {}", id);
            if let Err(e) = self
                .runtime
                .stop_container(id, self.stop_timeout.as_secs())
                .await
            {
                return Err(self.runtime_failure(sandbox, e).await);
            }
        }

        let stopped = self
            .registry
            .set_state(id, SandboxState::Stopped)
            .await
            .ok_or_else(|| HostingError::NotFound(id.to_string()))?;

        let route = self.proxy.remove_route(&sandbox.public_hostname).await?;
        if let Some(reason) = &route.reload_error {
            warn!(
                "Route for {} removed but proxy not reloaded: {}",
                sandbox.public_hostname, reason
            );
        }
        Ok(LifecycleOutcome {
            sandbox: stopped,
            reload_error: route.reload_error,
        })
    }

    /// Start (or restart) the container, then route traffic to it
    async fn bring_up(&self, sandbox: &Sandbox, restart: bool) -> Result<LifecycleOutcome> {
        let id = sandbox.id.as_str();
        let result = if restart {
            info!("Restarting sandbox {}", id);
            self.runtime
                .restart_container(id, self.stop_timeout.as_secs())
                .await
        } else {
            info!("Starting sandbox {}", id);
            self.runtime.start_container(id).await
        };
        if let Err(e) = result {
            return Err(self.runtime_failure(sandbox, e).await);
        }

        let mut outcome = self.mark_running(sandbox).await?;
        self.activity.record(id).await?;
        if let Some(latest) = self.registry.get(id).await {
            outcome.sandbox = latest;
        }
        Ok(outcome)
    }

    /// Flip the registry entry to Running and register its route. If the
    /// route cannot be written the container is stopped again.
    async fn mark_running(&self, sandbox: &Sandbox) -> Result<LifecycleOutcome> {
        let id = sandbox.id.as_str();
        let reload_error = match self
            .proxy
            .register_route(&sandbox.public_hostname, sandbox.host_port)
            .await
        {
            Ok(route) => {
                if let Some(reason) = &route.reload_error {
                    warn!(
                        "Route for {} written but proxy not reloaded: {}",
                        sandbox.public_hostname, reason
                    );
                }
                route.reload_error
            }
            Err(e) => {
                error!("Failed to route {}: {}", sandbox.public_hostname, e);
                if let Err(stop_err) = self
                    .runtime
                    .stop_container(id, self.stop_timeout.as_secs())
                    .await
                {
                    warn!("Failed to stop unroutable sandbox {}: {}", id, stop_err);
                }
                self.registry.set_state(id, SandboxState::Stopped).await;
                return Err(e.into());
            }
        };

        let running = self
            .registry
            .set_state(id, SandboxState::Running)
            .await
            .ok_or_else(|| HostingError::NotFound(id.to_string()))?;
        Ok(LifecycleOutcome {
            sandbox: running,
            reload_error,
        })
    }

    /// Map a runtime failure, purging the sandbox if the runtime no longer knows it
    async fn runtime_failure(&self, sandbox: &Sandbox, err: ProviderError) -> HostingError {
        if err.is_not_found() {
            warn!(
                "Sandbox {} disappeared from the runtime, dropping its bookkeeping",
                sandbox.id
            );
            self.forget(sandbox).await;
            return HostingError::NotFound(sandbox.id.clone());
        }
        HostingError::Runtime(err)
    }

    /// Drop route, registry entry (with its activity) and port
    async fn forget(&self, sandbox: &Sandbox) {
        if let Err(e) = self.proxy.remove_route(&sandbox.public_hostname).await {
            error!(
                "Failed to remove route for {}: {}",
                sandbox.public_hostname, e
            );
        }
        self.registry.remove(&sandbox.id).await;
        self.ports.release(sandbox.host_port).await;
    }
}
