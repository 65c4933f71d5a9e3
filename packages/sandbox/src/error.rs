// ABOUTME: Error taxonomy surfaced by the hosting core to its callers
// ABOUTME: Maps provider, source and proxy failures onto provisioning steps and lifecycle errors

use crate::providers::ProviderError;
use crate::proxy::ProxyError;
use crate::source::SourceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stage of the provisioning pipeline an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    DeriveName,
    FetchSource,
    BuildImage,
    Launch,
    RegisterRoute,
}

impl ProvisionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisionStep::DeriveName => "derive_name",
            ProvisionStep::FetchSource => "fetch_source",
            ProvisionStep::BuildImage => "build_image",
            ProvisionStep::Launch => "launch",
            ProvisionStep::RegisterRoute => "register_route",
        }
    }
}

#[derive(Error, Debug)]
pub enum HostingError {
    #[error("Invalid sandbox name: {0}")]
    InvalidName(String),

    #[error("Failed to fetch source from {location}: {reason}")]
    SourceFetch { location: String, reason: String },

    #[error("Failed to build image {image}: {diagnostics}")]
    Build { image: String, diagnostics: String },

    #[error("Failed to launch sandbox {name}: {reason}")]
    Launch { name: String, reason: String },

    #[error("Failed to write proxy route for {hostname}: {reason}")]
    RouteWrite { hostname: String, reason: String },

    #[error("Proxy reload failed: {0}")]
    ProxyReload(String),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] ProviderError),
}

pub type Result<T> = std::result::Result<T, HostingError>;

impl HostingError {
    /// The provisioning step this error belongs to, if it is a pipeline error
    pub fn step(&self) -> Option<ProvisionStep> {
        match self {
            HostingError::InvalidName(_) => Some(ProvisionStep::DeriveName),
            HostingError::SourceFetch { .. } => Some(ProvisionStep::FetchSource),
            HostingError::Build { .. } => Some(ProvisionStep::BuildImage),
            HostingError::Launch { .. } | HostingError::ResourceExhausted(_) => {
                Some(ProvisionStep::Launch)
            }
            HostingError::RouteWrite { .. } | HostingError::ProxyReload(_) => {
                Some(ProvisionStep::RegisterRoute)
            }
            HostingError::NotFound(_) | HostingError::Conflict(_) | HostingError::Runtime(_) => {
                None
            }
        }
    }

    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            HostingError::InvalidName(_) => "INVALID_NAME",
            HostingError::SourceFetch { .. } => "SOURCE_FETCH_ERROR",
            HostingError::Build { .. } => "BUILD_ERROR",
            HostingError::Launch { .. } => "LAUNCH_ERROR",
            HostingError::RouteWrite { .. } => "ROUTE_WRITE_ERROR",
            HostingError::ProxyReload(_) => "PROXY_RELOAD_ERROR",
            HostingError::NotFound(_) => "NOT_FOUND",
            HostingError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            HostingError::Conflict(_) => "CONFLICT",
            HostingError::Runtime(_) => "RUNTIME_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HostingError::NotFound(_) | HostingError::Runtime(ProviderError::NotFound(_))
        )
    }

    pub(crate) fn source_fetch(location: &str, err: SourceError) -> Self {
        HostingError::SourceFetch {
            location: location.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn launch(name: &str, reason: impl ToString) -> Self {
        HostingError::Launch {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<ProxyError> for HostingError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::InvalidHostname(hostname) => HostingError::InvalidName(hostname),
            ProxyError::Write { hostname, source } => HostingError::RouteWrite {
                hostname,
                reason: source.to_string(),
            },
            ProxyError::Reload(reason) => HostingError::ProxyReload(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_errors_carry_their_step() {
        let err = HostingError::Build {
            image: "hosting-blog-alice".to_string(),
            diagnostics: "COPY failed".to_string(),
        };
        assert_eq!(err.step(), Some(ProvisionStep::BuildImage));
        assert!(err.to_string().contains("COPY failed"));

        let err = HostingError::ResourceExhausted("no ports left".to_string());
        assert_eq!(err.step(), Some(ProvisionStep::Launch));

        assert_eq!(HostingError::NotFound("abc".to_string()).step(), None);
    }

    #[test]
    fn test_proxy_errors_stay_distinct() {
        let write: HostingError = ProxyError::Write {
            hostname: "blog.alice.localhost".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert_eq!(write.code(), "ROUTE_WRITE_ERROR");

        let reload: HostingError = ProxyError::Reload("nginx exited with 1".to_string()).into();
        assert_eq!(reload.code(), "PROXY_RELOAD_ERROR");
    }

    #[test]
    fn test_provider_not_found_is_not_found() {
        let err = HostingError::Runtime(ProviderError::NotFound("abc".to_string()));
        assert!(err.is_not_found());
        assert!(!HostingError::Conflict("x".to_string()).is_not_found());
    }
}
