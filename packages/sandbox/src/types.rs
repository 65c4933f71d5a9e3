use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HostingError;

/// Build template declared by the project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Static,
    React,
    Flask,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 3] = [TemplateKind::Static, TemplateKind::React, TemplateKind::Flask];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Static => "static",
            TemplateKind::React => "react",
            TemplateKind::Flask => "flask",
        }
    }

    /// Dockerfile used when the project source does not ship its own.
    /// Every template serves HTTP on `container_port`.
    pub fn default_dockerfile(&self, container_port: u16) -> String {
        match self {
            TemplateKind::Static => format!(
                "FROM nginx:alpine\n\
                 COPY . /usr/share/nginx/html\n\
                 RUN sed -i 's/listen\\s*80;/listen {port};/' /etc/nginx/conf.d/default.conf\n\
                 EXPOSE {port}\n",
                port = container_port
            ),
            TemplateKind::React => format!(
                "FROM node:20-alpine AS build\n\
                 WORKDIR /app\n\
                 COPY package*.json ./\n\
                 RUN npm install\n\
                 COPY . .\n\
                 RUN npm run build\n\
                 \n\
                 FROM nginx:alpine\n\
                 COPY --from=build /app/build /usr/share/nginx/html\n\
                 RUN sed -i 's/listen\\s*80;/listen {port};/' /etc/nginx/conf.d/default.conf\n\
                 EXPOSE {port}\n",
                port = container_port
            ),
            TemplateKind::Flask => format!(
                "FROM python:3.12-slim\n\
                 WORKDIR /app\n\
                 COPY requirements.txt* ./\n\
                 RUN pip install --no-cache-dir gunicorn && \\\n\
                 \x20   if [ -f requirements.txt ]; then pip install --no-cache-dir -r requirements.txt; fi\n\
                 COPY . .\n\
                 EXPOSE {port}\n\
                 CMD [\"gunicorn\", \"--bind\", \"0.0.0.0:{port}\", \"app:app\"]\n",
                port = container_port
            ),
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateKind {
    type Err = HostingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "static" => Ok(TemplateKind::Static),
            "react" => Ok(TemplateKind::React),
            "flask" => Ok(TemplateKind::Flask),
            other => Err(HostingError::InvalidName(format!(
                "unknown template '{}', expected one of: static, react, flask",
                other
            ))),
        }
    }
}

/// Project data handed in by the project store at provisioning time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRef {
    pub logical_name: String,
    pub owner_key: String,
    pub source_location: String,
    pub template: TemplateKind,
}

/// Lifecycle state of a sandbox.
///
/// `Pending` only exists while a provisioning call is in flight and is never
/// returned to callers as a resting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Pending,
    Running,
    Stopped,
    Removed,
}

impl SandboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxState::Pending => "pending",
            SandboxState::Running => "running",
            SandboxState::Stopped => "stopped",
            SandboxState::Removed => "removed",
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical (sanitized) identity of a project's sandbox
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SandboxIdentity {
    pub logical_name: String,
    pub owner_key: String,
}

impl fmt::Display for SandboxIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_key, self.logical_name)
    }
}

/// A sandbox tracked by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    /// Runtime-assigned container id
    pub id: String,
    pub logical_name: String,
    pub owner_key: String,
    pub container_name: String,
    pub image: String,
    pub host_port: u16,
    pub public_hostname: String,
    pub state: SandboxState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Sandbox {
    pub fn identity(&self) -> SandboxIdentity {
        SandboxIdentity {
            logical_name: self.logical_name.clone(),
            owner_key: self.owner_key.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == SandboxState::Running
    }

    /// How long the sandbox has gone without recorded activity
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_activity_at)
    }

    pub fn handle(&self) -> SandboxHandle {
        SandboxHandle::from(self)
    }
}

/// What the project store persists against the project record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub sandbox_id: String,
    pub host_port: u16,
    pub public_hostname: String,
    pub state: SandboxState,
}

impl From<&Sandbox> for SandboxHandle {
    fn from(sandbox: &Sandbox) -> Self {
        Self {
            sandbox_id: sandbox.id.clone(),
            host_port: sandbox.host_port,
            public_hostname: sandbox.public_hostname.clone(),
            state: sandbox.state,
        }
    }
}

/// A sandbox returned from an operation that changed its route.
///
/// `reload_error` is set when the route file is correct but the proxy did not
/// pick it up; the change takes effect after a successful `reload_proxy`.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleOutcome {
    pub sandbox: Sandbox,
    pub reload_error: Option<String>,
}

impl LifecycleOutcome {
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            sandbox,
            reload_error: None,
        }
    }

    pub fn proxy_reloaded(&self) -> bool {
        self.reload_error.is_none()
    }

    pub fn handle(&self) -> SandboxHandle {
        self.sandbox.handle()
    }
}

/// Read-only status report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxStatus {
    pub id: String,
    pub name: String,
    pub state: SandboxState,
    /// Liveness as reported by the runtime backend
    pub running: bool,
    pub runtime_status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}
