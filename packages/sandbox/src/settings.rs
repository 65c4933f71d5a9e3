// ABOUTME: Hosting configuration loaded from HOSTBOX_* environment variables
// ABOUTME: Groups port, source, launch, proxy and reaper settings with validated defaults

use hostbox_config::constants::*;
use hostbox_config::{
    parse_env_flag, parse_env_or_default, parse_env_or_default_with_validation, parse_env_string,
    parse_env_words,
};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::providers::ResourceLimits;
use crate::proxy::ProxySettings;
use crate::reaper::ReaperConfig;

#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("Invalid port range {start}-{end}")]
    InvalidPortRange { start: u16, end: u16 },

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct PortSettings {
    pub range_start: u16,
    pub range_end: u16,
    /// Skip ports that another process already holds on the host
    pub probe_host: bool,
}

impl PortSettings {
    pub fn range(&self) -> RangeInclusive<u16> {
        self.range_start..=self.range_end
    }
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Working copies live at `{work_dir}/{owner}/{name}`
    pub work_dir: PathBuf,
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub limits: ResourceLimits,
    /// Port the sandbox serves HTTP on inside the container
    pub container_port: u16,
    pub network_mode: Option<String>,
    pub restart_max_retries: i64,
    pub build_timeout: Duration,
    pub launch_timeout: Duration,
    pub stop_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReloadSettings {
    pub command: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HostingSettings {
    pub base_domain: String,
    pub ports: PortSettings,
    pub source: SourceSettings,
    pub launch: LaunchSettings,
    pub proxy: ProxySettings,
    pub reload: ReloadSettings,
    pub reaper: ReaperConfig,
    pub reaper_enabled: bool,
    /// Registry snapshot file; None keeps state in memory only
    pub state_file: Option<PathBuf>,
}

impl Default for HostingSettings {
    fn default() -> Self {
        Self {
            base_domain: "localhost".to_string(),
            ports: PortSettings {
                range_start: 8000,
                range_end: 8999,
                probe_host: true,
            },
            source: SourceSettings {
                work_dir: PathBuf::from("/tmp/repos"),
                fetch_timeout: Duration::from_secs(60),
            },
            launch: LaunchSettings {
                limits: ResourceLimits::default(),
                container_port: 80,
                network_mode: None,
                restart_max_retries: 3,
                build_timeout: Duration::from_secs(600),
                launch_timeout: Duration::from_secs(60),
                stop_timeout: Duration::from_secs(10),
            },
            proxy: ProxySettings::default(),
            reload: ReloadSettings {
                command: ["docker", "exec", "hosting-nginx", "nginx", "-s", "reload"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                timeout: Duration::from_secs(15),
            },
            reaper: ReaperConfig::default(),
            reaper_enabled: true,
            state_file: None,
        }
    }
}

impl HostingSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let defaults = Self::default();
        let positive = |v: u64| v > 0;

        let ports = PortSettings {
            range_start: parse_env_or_default(HOSTBOX_PORT_RANGE_START, defaults.ports.range_start),
            range_end: parse_env_or_default(HOSTBOX_PORT_RANGE_END, defaults.ports.range_end),
            probe_host: parse_env_flag(HOSTBOX_PORT_PROBE, defaults.ports.probe_host),
        };

        let source = SourceSettings {
            work_dir: parse_env_string(HOSTBOX_WORK_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.source.work_dir),
            fetch_timeout: Duration::from_secs(parse_env_or_default_with_validation(
                HOSTBOX_FETCH_TIMEOUT_SECS,
                defaults.source.fetch_timeout.as_secs(),
                positive,
            )),
        };

        let limits = ResourceLimits {
            memory_mb: parse_env_or_default_with_validation(
                HOSTBOX_MEMORY_MB,
                defaults.launch.limits.memory_mb,
                |v: u64| v >= 6,
            ),
            cpu_quota_us: parse_env_or_default_with_validation(
                HOSTBOX_CPU_QUOTA,
                defaults.launch.limits.cpu_quota_us,
                |v: i64| v >= 1000,
            ),
            cpu_period_us: parse_env_or_default_with_validation(
                HOSTBOX_CPU_PERIOD,
                defaults.launch.limits.cpu_period_us,
                |v: i64| (1000..=1_000_000).contains(&v),
            ),
        };

        let launch = LaunchSettings {
            limits,
            container_port: parse_env_or_default_with_validation(
                HOSTBOX_CONTAINER_PORT,
                defaults.launch.container_port,
                |v: u16| v > 0,
            ),
            network_mode: parse_env_string(HOSTBOX_NETWORK_MODE),
            restart_max_retries: parse_env_or_default_with_validation(
                HOSTBOX_RESTART_MAX_RETRIES,
                defaults.launch.restart_max_retries,
                |v: i64| v >= 0,
            ),
            build_timeout: Duration::from_secs(parse_env_or_default_with_validation(
                HOSTBOX_BUILD_TIMEOUT_SECS,
                defaults.launch.build_timeout.as_secs(),
                positive,
            )),
            launch_timeout: Duration::from_secs(parse_env_or_default_with_validation(
                HOSTBOX_LAUNCH_TIMEOUT_SECS,
                defaults.launch.launch_timeout.as_secs(),
                positive,
            )),
            stop_timeout: Duration::from_secs(parse_env_or_default(
                HOSTBOX_STOP_TIMEOUT_SECS,
                defaults.launch.stop_timeout.as_secs(),
            )),
        };

        let rate_limit_zone = match std::env::var(HOSTBOX_PROXY_RATE_LIMIT_ZONE) {
            // Explicitly empty disables rate limiting
            Ok(zone) if zone.trim().is_empty() => None,
            Ok(zone) => Some(zone.trim().to_string()),
            Err(_) => defaults.proxy.rate_limit_zone.clone(),
        };

        let proxy = ProxySettings {
            routes_dir: parse_env_string(HOSTBOX_ROUTES_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.proxy.routes_dir),
            upstream_host: parse_env_string(HOSTBOX_PROXY_UPSTREAM_HOST)
                .unwrap_or(defaults.proxy.upstream_host),
            log_dir: parse_env_string(HOSTBOX_PROXY_LOG_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.proxy.log_dir),
            rate_limit_zone,
            listen_port: defaults.proxy.listen_port,
        };

        let reload = ReloadSettings {
            command: parse_env_words(HOSTBOX_PROXY_RELOAD_COMMAND).unwrap_or(defaults.reload.command),
            timeout: Duration::from_secs(parse_env_or_default_with_validation(
                HOSTBOX_PROXY_RELOAD_TIMEOUT_SECS,
                defaults.reload.timeout.as_secs(),
                positive,
            )),
        };

        let reaper = ReaperConfig {
            interval: Duration::from_secs(parse_env_or_default_with_validation(
                HOSTBOX_REAPER_INTERVAL_SECS,
                defaults.reaper.interval.as_secs(),
                positive,
            )),
            idle_threshold: Duration::from_secs(
                60 * parse_env_or_default_with_validation(
                    HOSTBOX_IDLE_THRESHOLD_MINUTES,
                    defaults.reaper.idle_threshold.as_secs() / 60,
                    positive,
                ),
            ),
        };

        let settings = Self {
            base_domain: parse_env_string(HOSTBOX_BASE_DOMAIN).unwrap_or(defaults.base_domain),
            ports,
            source,
            launch,
            proxy,
            reload,
            reaper,
            reaper_enabled: parse_env_flag(HOSTBOX_REAPER_ENABLED, defaults.reaper_enabled),
            state_file: parse_env_string(HOSTBOX_STATE_FILE).map(PathBuf::from),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let (start, end) = (self.ports.range_start, self.ports.range_end);
        if start == 0 || start > end {
            return Err(SettingsError::InvalidPortRange { start, end });
        }
        if self.reload.command.is_empty() {
            return Err(SettingsError::InvalidValue {
                name: HOSTBOX_PROXY_RELOAD_COMMAND,
                reason: "command is empty".to_string(),
            });
        }
        let domain = self.base_domain.trim_matches('.');
        if domain.is_empty() || domain.contains('/') || domain.contains("..") {
            return Err(SettingsError::InvalidValue {
                name: HOSTBOX_BASE_DOMAIN,
                reason: format!("'{}' is not a domain", self.base_domain),
            });
        }
        Ok(())
    }
}
