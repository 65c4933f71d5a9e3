// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Hostbox

// API Server
pub const HOSTBOX_API_HOST: &str = "HOSTBOX_API_HOST";
pub const HOSTBOX_API_PORT: &str = "HOSTBOX_API_PORT";
pub const PORT: &str = "PORT"; // Legacy

// Port Allocation
pub const HOSTBOX_PORT_RANGE_START: &str = "HOSTBOX_PORT_RANGE_START";
pub const HOSTBOX_PORT_RANGE_END: &str = "HOSTBOX_PORT_RANGE_END";
pub const HOSTBOX_PORT_PROBE: &str = "HOSTBOX_PORT_PROBE";

// Source Checkout
pub const HOSTBOX_WORK_DIR: &str = "HOSTBOX_WORK_DIR";
pub const HOSTBOX_FETCH_TIMEOUT_SECS: &str = "HOSTBOX_FETCH_TIMEOUT_SECS";

// Image Build
pub const HOSTBOX_BUILD_TIMEOUT_SECS: &str = "HOSTBOX_BUILD_TIMEOUT_SECS";

// Container Launch
pub const HOSTBOX_LAUNCH_TIMEOUT_SECS: &str = "HOSTBOX_LAUNCH_TIMEOUT_SECS";
pub const HOSTBOX_STOP_TIMEOUT_SECS: &str = "HOSTBOX_STOP_TIMEOUT_SECS";
pub const HOSTBOX_MEMORY_MB: &str = "HOSTBOX_MEMORY_MB";
pub const HOSTBOX_CPU_QUOTA: &str = "HOSTBOX_CPU_QUOTA";
pub const HOSTBOX_CPU_PERIOD: &str = "HOSTBOX_CPU_PERIOD";
pub const HOSTBOX_CONTAINER_PORT: &str = "HOSTBOX_CONTAINER_PORT";
pub const HOSTBOX_NETWORK_MODE: &str = "HOSTBOX_NETWORK_MODE";
pub const HOSTBOX_RESTART_MAX_RETRIES: &str = "HOSTBOX_RESTART_MAX_RETRIES";

// Reverse Proxy
pub const HOSTBOX_BASE_DOMAIN: &str = "HOSTBOX_BASE_DOMAIN";
pub const HOSTBOX_ROUTES_DIR: &str = "HOSTBOX_ROUTES_DIR";
pub const HOSTBOX_PROXY_RELOAD_COMMAND: &str = "HOSTBOX_PROXY_RELOAD_COMMAND";
pub const HOSTBOX_PROXY_RELOAD_TIMEOUT_SECS: &str = "HOSTBOX_PROXY_RELOAD_TIMEOUT_SECS";
pub const HOSTBOX_PROXY_UPSTREAM_HOST: &str = "HOSTBOX_PROXY_UPSTREAM_HOST";
pub const HOSTBOX_PROXY_LOG_DIR: &str = "HOSTBOX_PROXY_LOG_DIR";
pub const HOSTBOX_PROXY_RATE_LIMIT_ZONE: &str = "HOSTBOX_PROXY_RATE_LIMIT_ZONE";

// Idle Reclamation
pub const HOSTBOX_IDLE_THRESHOLD_MINUTES: &str = "HOSTBOX_IDLE_THRESHOLD_MINUTES";
pub const HOSTBOX_REAPER_INTERVAL_SECS: &str = "HOSTBOX_REAPER_INTERVAL_SECS";
pub const HOSTBOX_REAPER_ENABLED: &str = "HOSTBOX_REAPER_ENABLED";

// Registry Snapshot
pub const HOSTBOX_STATE_FILE: &str = "HOSTBOX_STATE_FILE";

// System Environment Variables
pub const HOME: &str = "HOME";
pub const RUST_LOG: &str = "RUST_LOG";
