// ABOUTME: Hosting core for per-project sandboxes served behind a reverse proxy
// ABOUTME: Provisioning, lifecycle control, port allocation, routing and idle reclamation

pub mod activity;
pub mod controller;
pub mod error;
pub mod locks;
pub mod naming;
pub mod orchestrator;
pub mod ports;
pub mod providers;
pub mod provisioner;
pub mod proxy;
pub mod reaper;
pub mod registry;
pub mod settings;
pub mod source;
pub mod types;

pub use activity::ActivityTracker;
pub use controller::{ContainerController, IdleStop};
pub use error::{HostingError, ProvisionStep, Result};
pub use naming::{derive_names, DerivedNames};
pub use orchestrator::Orchestrator;
pub use ports::PortAllocator;
pub use providers::{
    BuildOutput, BuildRequest, ContainerConfig, ContainerInfo, ContainerStatus, DockerProvider,
    ProviderError, ResourceLimits, RuntimeProvider,
};
pub use provisioner::{Provisioner, HOSTNAME_LABEL, OWNER_LABEL};
pub use proxy::{
    CommandReloadHook, NoopReloadHook, ProxyConfigManager, ProxyError, ProxySettings,
    ReloadHook, RouteOutcome,
};
pub use reaper::{Reaper, ReaperConfig, ReaperHandle, SweepReport};
pub use registry::{SandboxRegistry, SnapshotError};
pub use settings::{HostingSettings, SettingsError};
pub use source::{FetchOutcome, GitSourceFetcher, SourceError, SourceFetcher};
pub use types::{
    LifecycleOutcome, ProjectRef, Sandbox, SandboxHandle, SandboxIdentity, SandboxState,
    SandboxStatus, TemplateKind,
};
