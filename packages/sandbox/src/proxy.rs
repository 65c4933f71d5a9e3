// ABOUTME: Reverse-proxy route management for sandbox public hostnames
// ABOUTME: Writes one nginx server block per hostname and signals the live proxy to reload

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

const ROUTE_EXTENSION: &str = "conf";

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid hostname for proxy route: {0}")]
    InvalidHostname(String),

    #[error("Failed to write route for {hostname}: {source}")]
    Write {
        hostname: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Reload(String),
}

/// Where and how route files are rendered
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub routes_dir: PathBuf,
    /// Host the proxy uses to reach sandbox ports
    pub upstream_host: String,
    pub log_dir: PathBuf,
    /// `limit_req` zone applied to every route, if any
    pub rate_limit_zone: Option<String>,
    pub listen_port: u16,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            routes_dir: PathBuf::from("/etc/nginx/conf.d/projects"),
            upstream_host: "host.docker.internal".to_string(),
            log_dir: PathBuf::from("/var/log/nginx"),
            rate_limit_zone: Some("app_limit".to_string()),
            listen_port: 80,
        }
    }
}

/// Signal that makes the live proxy pick up changed route files
#[async_trait]
pub trait ReloadHook: Send + Sync {
    async fn reload(&self) -> Result<(), ProxyError>;
}

/// Runs an external command, e.g. `docker exec hosting-nginx nginx -s reload`
pub struct CommandReloadHook {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandReloadHook {
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self, ProxyError> {
        let mut words = command.into_iter();
        let program = words
            .next()
            .ok_or_else(|| ProxyError::Reload("reload command is empty".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
            timeout,
        })
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl ReloadHook for CommandReloadHook {
    async fn reload(&self) -> Result<(), ProxyError> {
        debug!("Running proxy reload: {}", self.command_line());

        let child = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                ProxyError::Reload(format!(
                    "'{}' timed out after {}s",
                    self.command_line(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ProxyError::Reload(format!("'{}': {}", self.command_line(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProxyError::Reload(format!(
                "'{}' exited with {}: {}",
                self.command_line(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// For setups without a live proxy to notify
pub struct NoopReloadHook;

#[async_trait]
impl ReloadHook for NoopReloadHook {
    async fn reload(&self) -> Result<(), ProxyError> {
        Ok(())
    }
}

/// Result of a composed route change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Whether the route artifact changed on disk
    pub changed: bool,
    /// Set when the artifact changed but the proxy did not reload
    pub reload_error: Option<String>,
}

impl RouteOutcome {
    pub fn reloaded(&self) -> bool {
        self.changed && self.reload_error.is_none()
    }

    /// Surface a failed reload as an error
    pub fn into_result(self) -> Result<bool, ProxyError> {
        match self.reload_error {
            Some(reason) => Err(ProxyError::Reload(reason)),
            None => Ok(self.changed),
        }
    }
}

pub struct ProxyConfigManager {
    settings: ProxySettings,
    reload_hook: Box<dyn ReloadHook>,
}

impl ProxyConfigManager {
    pub fn new(settings: ProxySettings, reload_hook: Box<dyn ReloadHook>) -> Self {
        Self {
            settings,
            reload_hook,
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Render the nginx server block for one hostname
    pub fn render_route(&self, hostname: &str, port: u16) -> String {
        let log_dir = self.settings.log_dir.display();
        let rate_limit = self
            .settings
            .rate_limit_zone
            .as_deref()
            .map(|zone| format!("    limit_req zone={} burst=10 nodelay;\n\n", zone))
            .unwrap_or_default();

        format!(
            "server {{\n\
             \x20   listen {listen};\n\
             \x20   server_name {host};\n\
             \n\
             {rate_limit}\
             \x20   access_log {log_dir}/{host}.access.log main;\n\
             \x20   error_log {log_dir}/{host}.error.log;\n\
             \n\
             \x20   location / {{\n\
             \x20       proxy_pass http://{upstream}:{port};\n\
             \x20       proxy_set_header Host $host;\n\
             \x20       proxy_set_header X-Real-IP $remote_addr;\n\
             \x20       proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
             \x20       proxy_set_header X-Forwarded-Proto $scheme;\n\
             \x20   }}\n\
             }}\n",
            listen = self.settings.listen_port,
            host = hostname,
            rate_limit = rate_limit,
            log_dir = log_dir,
            upstream = self.settings.upstream_host,
            port = port,
        )
    }

    /// Path of the route file for `hostname`
    pub fn route_path(&self, hostname: &str) -> Result<PathBuf, ProxyError> {
        validate_hostname(hostname)?;
        Ok(self
            .settings
            .routes_dir
            .join(format!("{}.{}", hostname, ROUTE_EXTENSION)))
    }

    /// Write (or overwrite) the route file atomically without reloading
    pub async fn write_route(&self, hostname: &str, port: u16) -> Result<(), ProxyError> {
        let path = self.route_path(hostname)?;
        let write_err = |source| ProxyError::Write {
            hostname: hostname.to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.settings.routes_dir)
            .await
            .map_err(write_err)?;

        let tmp_path = self
            .settings
            .routes_dir
            .join(format!(".{}.{}.tmp", hostname, ROUTE_EXTENSION));
        tokio::fs::write(&tmp_path, self.render_route(hostname, port))
            .await
            .map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_err(e));
        }

        info!("Wrote proxy route {} -> port {}", hostname, port);
        Ok(())
    }

    /// Delete the route file. Returns false if there was none.
    pub async fn delete_route(&self, hostname: &str) -> Result<bool, ProxyError> {
        let path = self.route_path(hostname)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted proxy route {}", hostname);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ProxyError::Write {
                hostname: hostname.to_string(),
                source,
            }),
        }
    }

    pub async fn reload(&self) -> Result<(), ProxyError> {
        self.reload_hook.reload().await?;
        debug!("Proxy reloaded");
        Ok(())
    }

    /// Write the route then reload. A failed reload leaves the route in place.
    pub async fn register_route(&self, hostname: &str, port: u16) -> Result<RouteOutcome, ProxyError> {
        self.write_route(hostname, port).await?;
        Ok(self.reload_after_change(true).await)
    }

    /// Delete the route then reload if anything changed
    pub async fn remove_route(&self, hostname: &str) -> Result<RouteOutcome, ProxyError> {
        let changed = self.delete_route(hostname).await?;
        Ok(self.reload_after_change(changed).await)
    }

    async fn reload_after_change(&self, changed: bool) -> RouteOutcome {
        if !changed {
            return RouteOutcome {
                changed,
                reload_error: None,
            };
        }
        let reload_error = match self.reload().await {
            Ok(()) => None,
            Err(e) => {
                warn!("Proxy reload failed: {}", e);
                Some(e.to_string())
            }
        };
        RouteOutcome {
            changed,
            reload_error,
        }
    }

    /// Hostnames that currently have a route file
    pub async fn routes(&self) -> Result<Vec<String>, ProxyError> {
        let mut entries = match tokio::fs::read_dir(&self.settings.routes_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ProxyError::Write {
                    hostname: self.settings.routes_dir.display().to_string(),
                    source,
                })
            }
        };

        let mut hostnames = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(hostname) = route_hostname(&entry.path()) {
                hostnames.push(hostname);
            }
        }
        hostnames.sort();
        Ok(hostnames)
    }

    pub async fn has_route(&self, hostname: &str) -> bool {
        match self.route_path(hostname) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

fn route_hostname(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != ROUTE_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

/// Hostnames become file names, so only plain DNS names are accepted
fn validate_hostname(hostname: &str) -> Result<(), ProxyError> {
    let valid = !hostname.is_empty()
        && hostname.len() <= 253
        && !hostname.starts_with(['.', '-'])
        && !hostname.ends_with('.')
        && !hostname.contains("..")
        && hostname
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(ProxyError::InvalidHostname(hostname.to_string()))
    }
}
