// ABOUTME: Per-sandbox last-activity tracking backed by the sandbox registry
// ABOUTME: Timestamps only move forward and exist only for registered sandboxes

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::error::{HostingError, Result};
use crate::registry::SandboxRegistry;
use crate::types::Sandbox;

#[derive(Clone)]
pub struct ActivityTracker {
    registry: Arc<SandboxRegistry>,
}

impl ActivityTracker {
    pub fn new(registry: Arc<SandboxRegistry>) -> Self {
        Self { registry }
    }

    /// Mark the sandbox as active now
    pub async fn record(&self, id: &str) -> Result<DateTime<Utc>> {
        self.record_at(id, Utc::now()).await
    }

    /// Mark the sandbox as active at an externally observed time
    pub async fn record_at(&self, id: &str, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let recorded = self
            .registry
            .touch(id, at)
            .await
            .ok_or_else(|| HostingError::NotFound(id.to_string()))?;
        debug!("Activity recorded for {} at {}", id, recorded);
        Ok(recorded)
    }

    pub async fn last_activity(&self, id: &str) -> Option<DateTime<Utc>> {
        self.registry.get(id).await.map(|s| s.last_activity_at)
    }

    pub async fn idle_for(&self, id: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.registry.get(id).await.map(|s| s.idle_for(now))
    }

    /// Running sandboxes idle for longer than `threshold` at `now`
    pub async fn idle_candidates(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<Sandbox> {
        self.registry
            .list()
            .await
            .into_iter()
            .filter(|s| s.is_running() && s.idle_for(now) > threshold)
            .collect()
    }
}
