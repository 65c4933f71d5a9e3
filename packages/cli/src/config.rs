use hostbox_config::constants::{HOSTBOX_API_HOST, HOSTBOX_API_PORT, PORT};
use hostbox_config::{parse_env_string, parse_env_with_fallback};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid listen address: {0}")]
    InvalidHost(String),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
}

/// HTTP listener settings for the daemon
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host_str = parse_env_string(HOSTBOX_API_HOST).unwrap_or_else(|| "127.0.0.1".to_string());
        let host = host_str
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidHost(host_str.clone()))?;

        let port = parse_env_with_fallback(HOSTBOX_API_PORT, PORT, 3000u16);

        // Validate port is in valid range
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        Ok(Config { host, port })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
