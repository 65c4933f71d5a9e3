// ABOUTME: In-process fakes for the runtime, source fetch and proxy reload seams
// ABOUTME: Builds an orchestrator over temp directories so tests never need Docker or git

#![allow(dead_code)]

use async_trait::async_trait;
use hostbox_sandbox::{
    BuildOutput, BuildRequest, ContainerConfig, ContainerInfo, ContainerStatus, FetchOutcome,
    HostingSettings, Orchestrator, ProjectRef, ProviderError, ProxyError, ReloadHook,
    RuntimeProvider, SourceError, SourceFetcher, TemplateKind, HOSTNAME_LABEL, OWNER_LABEL,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub config: ContainerConfig,
}

#[derive(Default)]
struct RuntimeState {
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    build_failure: Option<(String, Vec<String>)>,
    failing_creates: usize,
    failing_starts: usize,
    failing_stops: HashSet<String>,
    start_delay: Option<Duration>,
    stop_delay: Option<Duration>,
    last_fallback_dockerfile: Option<Option<String>>,
    builds: usize,
    creates: usize,
    starts: usize,
    stops: usize,
    restarts: usize,
}

/// Container runtime kept entirely in memory
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    fn with_state<T>(&self, f: impl FnOnce(&mut RuntimeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_build(&self, message: &str, log: &[&str]) {
        self.with_state(|s| {
            s.build_failure = Some((
                message.to_string(),
                log.iter().map(|l| l.to_string()).collect(),
            ))
        });
    }

    pub fn fail_next_creates(&self, count: usize) {
        self.with_state(|s| s.failing_creates = count);
    }

    pub fn fail_next_starts(&self, count: usize) {
        self.with_state(|s| s.failing_starts = count);
    }

    pub fn fail_stop_for(&self, id: &str) {
        self.with_state(|s| s.failing_stops.insert(id.to_string()));
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.with_state(|s| s.start_delay = Some(delay));
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        self.with_state(|s| s.stop_delay = Some(delay));
    }

    /// Container deleted behind the orchestrator's back
    pub fn vanish(&self, id: &str) {
        self.with_state(|s| s.containers.remove(id));
    }

    /// Container exited on its own
    pub fn kill(&self, id: &str) {
        self.with_state(|s| {
            if let Some(c) = s.containers.get_mut(id) {
                c.running = false;
            }
        });
    }

    /// A stopped container occupying a name, as left by a crash of the sandbox
    /// with this owner and hostname
    pub fn insert_orphan(&self, name: &str, owner: &str, hostname: &str) -> String {
        self.insert_stopped(
            name,
            HashMap::from([
                (OWNER_LABEL.to_string(), owner.to_string()),
                (HOSTNAME_LABEL.to_string(), hostname.to_string()),
            ]),
        )
    }

    /// A container hostbox never created that happens to use a sandbox name
    pub fn insert_foreign(&self, name: &str) -> String {
        self.insert_stopped(name, HashMap::new())
    }

    fn insert_stopped(&self, name: &str, labels: HashMap<String, String>) -> String {
        self.with_state(|s| {
            let id = format!("orphan-{}", name);
            s.containers.insert(
                id.clone(),
                FakeContainer {
                    id: id.clone(),
                    name: name.to_string(),
                    running: false,
                    config: ContainerConfig {
                        image: "old".to_string(),
                        name: name.to_string(),
                        env_vars: HashMap::new(),
                        host_port: 0,
                        container_port: 80,
                        limits: Default::default(),
                        restart_max_retries: 0,
                        network_mode: None,
                        labels,
                    },
                },
            );
            id
        })
    }

    pub fn container_named(&self, name: &str) -> Option<FakeContainer> {
        self.with_state(|s| s.containers.values().find(|c| c.name == name).cloned())
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.with_state(|s| s.containers.get(id).cloned())
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.container(id).map(|c| c.running).unwrap_or(false)
    }

    pub fn container_count(&self) -> usize {
        self.with_state(|s| s.containers.len())
    }

    pub fn last_fallback_dockerfile(&self) -> Option<Option<String>> {
        self.with_state(|s| s.last_fallback_dockerfile.clone())
    }

    pub fn builds(&self) -> usize {
        self.with_state(|s| s.builds)
    }

    pub fn creates(&self) -> usize {
        self.with_state(|s| s.creates)
    }

    pub fn starts(&self) -> usize {
        self.with_state(|s| s.starts)
    }

    pub fn stops(&self) -> usize {
        self.with_state(|s| s.stops)
    }

    pub fn restarts(&self) -> usize {
        self.with_state(|s| s.restarts)
    }
}

#[async_trait]
impl RuntimeProvider for FakeRuntime {
    async fn is_available(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }

    async fn build_image(&self, request: BuildRequest<'_>) -> Result<BuildOutput, ProviderError> {
        self.with_state(|s| {
            s.builds += 1;
            s.last_fallback_dockerfile = Some(request.fallback_dockerfile.clone());
            match &s.build_failure {
                Some((message, log)) => Err(ProviderError::BuildFailed {
                    message: message.clone(),
                    log: log.clone(),
                }),
                None => Ok(BuildOutput {
                    image_id: Some(format!("sha256:{}", request.image_tag)),
                    log: vec!["Successfully built".to_string()],
                }),
            }
        })
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String, ProviderError> {
        self.with_state(|s| {
            s.creates += 1;
            if s.failing_creates > 0 {
                s.failing_creates -= 1;
                return Err(ProviderError::ContainerError("create refused".to_string()));
            }
            if s.containers.values().any(|c| c.name == config.name) {
                return Err(ProviderError::ContainerError(format!(
                    "name {} already in use",
                    config.name
                )));
            }
            s.next_id += 1;
            let id = format!("ctr{:04}", s.next_id);
            s.containers.insert(
                id.clone(),
                FakeContainer {
                    id: id.clone(),
                    name: config.name.clone(),
                    running: false,
                    config: config.clone(),
                },
            );
            Ok(id)
        })
    }

    async fn start_container(&self, container_id: &str) -> Result<(), ProviderError> {
        if let Some(delay) = self.with_state(|s| s.start_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| {
            s.starts += 1;
            if s.failing_starts > 0 {
                s.failing_starts -= 1;
                return Err(ProviderError::ContainerError("port already allocated".to_string()));
            }
            let c = s
                .containers
                .get_mut(container_id)
                .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
            c.running = true;
            Ok(())
        })
    }

    async fn stop_container(&self, container_id: &str, _timeout_secs: u64) -> Result<(), ProviderError> {
        if let Some(delay) = self.with_state(|s| s.stop_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| {
            s.stops += 1;
            if s.failing_stops.contains(container_id) {
                return Err(ProviderError::ContainerError("stop timed out".to_string()));
            }
            let c = s
                .containers
                .get_mut(container_id)
                .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
            c.running = false;
            Ok(())
        })
    }

    async fn restart_container(&self, container_id: &str, _timeout_secs: u64) -> Result<(), ProviderError> {
        self.with_state(|s| {
            s.restarts += 1;
            let c = s
                .containers
                .get_mut(container_id)
                .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
            c.running = true;
            Ok(())
        })
    }

    async fn remove_container(&self, container_id: &str, _force: bool) -> Result<(), ProviderError> {
        self.with_state(|s| {
            let key = if s.containers.contains_key(container_id) {
                Some(container_id.to_string())
            } else {
                s.containers
                    .values()
                    .find(|c| c.name == container_id)
                    .map(|c| c.id.clone())
            };
            match key {
                Some(key) => {
                    s.containers.remove(&key);
                    Ok(())
                }
                None => Err(ProviderError::NotFound(container_id.to_string())),
            }
        })
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo, ProviderError> {
        self.with_state(|s| {
            // Like the Docker API, accept either an id or a name
            let c = s
                .containers
                .get(container_id)
                .or_else(|| s.containers.values().find(|c| c.name == container_id))
                .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
            Ok(ContainerInfo {
                id: c.id.clone(),
                name: c.name.clone(),
                status: if c.running {
                    ContainerStatus::Running
                } else {
                    ContainerStatus::Stopped
                },
                running: c.running,
                started_at: None,
                labels: c.config.labels.clone(),
            })
        })
    }
}

/// Writes a tiny site into the target directory instead of cloning
#[derive(Default)]
pub struct FakeSource {
    pub fetches: AtomicUsize,
    pub fail: AtomicBool,
    pub ship_dockerfile: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeSource {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl SourceFetcher for FakeSource {
    async fn materialize(&self, location: &str, target: &Path) -> Result<FetchOutcome, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::CommandFailed {
                command: "clone".to_string(),
                stderr: format!("repository '{}' not found", location),
            });
        }

        let existed = target.exists();
        std::fs::create_dir_all(target)?;
        std::fs::write(target.join("index.html"), "<h1>hello</h1>")?;
        if self.ship_dockerfile.load(Ordering::SeqCst) {
            std::fs::write(target.join("Dockerfile"), "FROM nginx:alpine\n")?;
        }
        Ok(if existed {
            FetchOutcome::Refreshed
        } else {
            FetchOutcome::Cloned
        })
    }
}

#[derive(Default)]
pub struct FakeReload {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

pub struct CountingReload(pub Arc<FakeReload>);

#[async_trait]
impl ReloadHook for CountingReload {
    async fn reload(&self) -> Result<(), ProxyError> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        if self.0.fail.load(Ordering::SeqCst) {
            Err(ProxyError::Reload("nginx: [emerg] host not found".to_string()))
        } else {
            Ok(())
        }
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub runtime: Arc<FakeRuntime>,
    pub source: Arc<FakeSource>,
    pub reload: Arc<FakeReload>,
    pub settings: HostingSettings,
    pub routes_dir: PathBuf,
    _dirs: Arc<(TempDir, TempDir)>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(configure: impl FnOnce(&mut HostingSettings)) -> Self {
        let routes = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();

        let mut settings = HostingSettings::default();
        settings.ports.range_start = 20000;
        settings.ports.range_end = 20009;
        settings.ports.probe_host = false;
        settings.source.work_dir = work.path().to_path_buf();
        settings.source.fetch_timeout = Duration::from_secs(2);
        settings.launch.build_timeout = Duration::from_secs(2);
        settings.launch.launch_timeout = Duration::from_secs(2);
        settings.launch.stop_timeout = Duration::from_secs(1);
        settings.proxy.routes_dir = routes.path().join("projects");
        configure(&mut settings);

        Self::assemble(
            settings,
            Arc::new(FakeRuntime::default()),
            Arc::new((routes, work)),
        )
    }

    /// A second orchestrator over the same runtime and directories, as after a restart
    pub fn reopen(&self) -> Self {
        Self::assemble(self.settings.clone(), self.runtime.clone(), self._dirs.clone())
    }

    fn assemble(
        settings: HostingSettings,
        runtime: Arc<FakeRuntime>,
        dirs: Arc<(TempDir, TempDir)>,
    ) -> Self {
        let source = Arc::new(FakeSource::default());
        let reload = Arc::new(FakeReload::default());
        let orchestrator = Orchestrator::new(
            settings.clone(),
            runtime.clone(),
            source.clone(),
            Box::new(CountingReload(reload.clone())),
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            runtime,
            source,
            reload,
            routes_dir: settings.proxy.routes_dir.clone(),
            settings,
            _dirs: dirs,
        }
    }

    pub fn route_file(&self, hostname: &str) -> PathBuf {
        self.routes_dir.join(format!("{}.conf", hostname))
    }

    pub fn has_route(&self, hostname: &str) -> bool {
        self.route_file(hostname).exists()
    }

    pub fn reloads(&self) -> usize {
        self.reload.calls.load(Ordering::SeqCst)
    }

    pub fn route_count(&self) -> usize {
        std::fs::read_dir(&self.routes_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().map(|x| x == "conf").unwrap_or(false))
                    .count()
            })
            .unwrap_or(0)
    }
}

pub fn project(name: &str, owner: &str) -> ProjectRef {
    ProjectRef {
        logical_name: name.to_string(),
        owner_key: owner.to_string(),
        source_location: format!("https://git.example.com/{}/{}.git", owner, name),
        template: TemplateKind::Static,
    }
}
