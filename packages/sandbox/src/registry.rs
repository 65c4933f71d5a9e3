// ABOUTME: In-memory table of tracked sandboxes with identity and hostname lookups
// ABOUTME: Exposes only atomic operations and can mirror itself to a JSON snapshot file

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{HostingError, Result};
use crate::types::{Sandbox, SandboxIdentity, SandboxState};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {0}")]
    Version(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    sandboxes: Vec<Sandbox>,
}

#[derive(Default)]
struct RegistryState {
    sandboxes: HashMap<String, Sandbox>,
    by_identity: HashMap<SandboxIdentity, String>,
    /// Identities with a provisioning call in flight, with the hostname they will use
    pending: HashMap<SandboxIdentity, String>,
}

impl RegistryState {
    fn insert(&mut self, sandbox: Sandbox) {
        self.by_identity
            .insert(sandbox.identity(), sandbox.id.clone());
        self.sandboxes.insert(sandbox.id.clone(), sandbox);
    }

    /// Identity holding a hostname, registered or mid-provisioning
    fn hostname_owner(&self, hostname: &str) -> Option<SandboxIdentity> {
        self.sandboxes
            .values()
            .find(|s| s.public_hostname == hostname)
            .map(Sandbox::identity)
            .or_else(|| {
                self.pending
                    .iter()
                    .find(|(_, h)| h.as_str() == hostname)
                    .map(|(identity, _)| identity.clone())
            })
    }
}

/// The single owner of sandbox bookkeeping: state, port and last activity
#[derive(Default)]
pub struct SandboxRegistry {
    state: RwLock<RegistryState>,
    snapshot_path: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl SandboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every mutation to `path`
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    pub async fn get(&self, id: &str) -> Option<Sandbox> {
        self.state.read().await.sandboxes.get(id).cloned()
    }

    pub async fn find_by_identity(&self, identity: &SandboxIdentity) -> Option<Sandbox> {
        let state = self.state.read().await;
        state
            .by_identity
            .get(identity)
            .and_then(|id| state.sandboxes.get(id))
            .cloned()
    }

    pub async fn find_by_hostname(&self, hostname: &str) -> Option<Sandbox> {
        let hostname = hostname.trim().trim_end_matches('.').to_lowercase();
        self.state
            .read()
            .await
            .sandboxes
            .values()
            .find(|s| s.public_hostname == hostname)
            .cloned()
    }

    /// All tracked sandboxes, oldest first
    pub async fn list(&self) -> Vec<Sandbox> {
        let mut sandboxes: Vec<Sandbox> =
            self.state.read().await.sandboxes.values().cloned().collect();
        sandboxes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        sandboxes
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.sandboxes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_pending(&self, identity: &SandboxIdentity) -> bool {
        self.state.read().await.pending.contains_key(identity)
    }

    /// Claim an identity, and the hostname it will be served on, for provisioning
    pub async fn begin_pending(&self, identity: &SandboxIdentity, hostname: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.by_identity.contains_key(identity) {
            return Err(HostingError::Conflict(format!(
                "sandbox for {} already exists",
                identity
            )));
        }
        if state.pending.contains_key(identity) {
            return Err(HostingError::Conflict(format!(
                "sandbox for {} is already being provisioned",
                identity
            )));
        }
        if let Some(owner) = state.hostname_owner(hostname) {
            return Err(HostingError::Conflict(format!(
                "hostname {} is already used by {}",
                hostname, owner
            )));
        }
        state.pending.insert(identity.clone(), hostname.to_string());
        debug!("Provisioning started for {}", identity);
        Ok(())
    }

    pub async fn abandon_pending(&self, identity: &SandboxIdentity) {
        if self.state.write().await.pending.remove(identity).is_some() {
            debug!("Provisioning abandoned for {}", identity);
        }
    }

    /// Register a provisioned sandbox, ending its pending claim
    pub async fn commit(&self, sandbox: Sandbox) -> Result<()> {
        let identity = sandbox.identity();
        {
            let mut state = self.state.write().await;
            if let Some(existing) = state.by_identity.get(&identity) {
                return Err(HostingError::Conflict(format!(
                    "sandbox for {} is already registered as {}",
                    identity, existing
                )));
            }
            if state.sandboxes.contains_key(&sandbox.id) {
                return Err(HostingError::Conflict(format!(
                    "sandbox id {} is already registered",
                    sandbox.id
                )));
            }
            if let Some(owner) = state
                .hostname_owner(&sandbox.public_hostname)
                .filter(|owner| *owner != identity)
            {
                return Err(HostingError::Conflict(format!(
                    "hostname {} is already used by {}",
                    sandbox.public_hostname, owner
                )));
            }
            state.pending.remove(&identity);
            info!(
                "Registered sandbox {} for {} on port {}",
                sandbox.id, identity, sandbox.host_port
            );
            state.insert(sandbox);
        }
        self.persist().await;
        Ok(())
    }

    /// Update a sandbox's state, returning the updated entry
    pub async fn set_state(&self, id: &str, new_state: SandboxState) -> Option<Sandbox> {
        let updated = {
            let mut state = self.state.write().await;
            let sandbox = state.sandboxes.get_mut(id)?;
            if sandbox.state != new_state {
                debug!("Sandbox {}: {} -> {}", id, sandbox.state, new_state);
                sandbox.state = new_state;
            }
            sandbox.clone()
        };
        self.persist().await;
        Some(updated)
    }

    /// Move `last_activity_at` forward to `at`. Older timestamps are ignored.
    /// Returns the resulting timestamp, or None for an unknown id.
    pub async fn touch(&self, id: &str, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut state = self.state.write().await;
        let sandbox = state.sandboxes.get_mut(id)?;
        if at > sandbox.last_activity_at {
            sandbox.last_activity_at = at;
        }
        Some(sandbox.last_activity_at)
    }

    /// Drop a sandbox and its identity entry
    pub async fn remove(&self, id: &str) -> Option<Sandbox> {
        let removed = {
            let mut state = self.state.write().await;
            let sandbox = state.sandboxes.remove(id)?;
            let identity = sandbox.identity();
            if state.by_identity.get(&identity).map(String::as_str) == Some(id) {
                state.by_identity.remove(&identity);
            }
            sandbox
        };
        info!("Unregistered sandbox {}", id);
        self.persist().await;
        Some(removed)
    }

    /// Write the snapshot now. Activity timestamps are only saved this way
    /// or alongside the next state change.
    pub async fn flush(&self) -> std::result::Result<(), SnapshotError> {
        match &self.snapshot_path {
            Some(path) => self.save_snapshot(path).await,
            None => Ok(()),
        }
    }

    async fn persist(&self) {
        if let Some(path) = &self.snapshot_path {
            if let Err(e) = self.save_snapshot(path).await {
                warn!("Failed to save registry snapshot to {:?}: {}", path, e);
            }
        }
    }

    async fn save_snapshot(&self, path: &Path) -> std::result::Result<(), SnapshotError> {
        let _guard = self.save_lock.lock().await;

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            sandboxes: self.list().await,
        };
        let content = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        debug!(
            "Saved {} sandboxes to registry snapshot",
            snapshot.sandboxes.len()
        );
        Ok(())
    }

    /// Load the snapshot into an empty registry, returning the restored sandboxes.
    /// A missing file is not an error.
    pub async fn load_snapshot(&self) -> std::result::Result<Vec<Sandbox>, SnapshotError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(Vec::new());
        };

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Registry snapshot does not exist yet at {:?}", path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_str(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version(snapshot.version));
        }

        let mut state = self.state.write().await;
        let mut restored = Vec::new();
        for sandbox in snapshot.sandboxes {
            if matches!(sandbox.state, SandboxState::Pending | SandboxState::Removed) {
                warn!(
                    "Skipping sandbox {} saved in {} state",
                    sandbox.id, sandbox.state
                );
                continue;
            }
            if state.by_identity.contains_key(&sandbox.identity()) {
                warn!("Skipping duplicate sandbox {} for {}", sandbox.id, sandbox.identity());
                continue;
            }
            if state.hostname_owner(&sandbox.public_hostname).is_some() {
                warn!(
                    "Skipping sandbox {}: hostname {} already restored",
                    sandbox.id, sandbox.public_hostname
                );
                continue;
            }
            restored.push(sandbox.clone());
            state.insert(sandbox);
        }

        info!("Loaded {} sandboxes from registry snapshot", restored.len());
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    const HOST: &str = "blog.alice.localhost";

    fn sandbox(id: &str, name: &str, port: u16) -> Sandbox {
        let now = Utc::now();
        Sandbox {
            id: id.to_string(),
            logical_name: name.to_string(),
            owner_key: "alice".to_string(),
            container_name: format!("{}-alice", name),
            image: format!("hosting-{}-alice", name),
            host_port: port,
            public_hostname: format!("{}.alice.localhost", name),
            state: SandboxState::Running,
            created_at: now,
            last_activity_at: now,
        }
    }

    #[tokio::test]
    async fn test_pending_claim_is_exclusive() {
        let registry = SandboxRegistry::new();
        let sb = sandbox("c1", "blog", 8000);
        let identity = sb.identity();

        registry.begin_pending(&identity, HOST).await.unwrap();
        assert!(matches!(
            registry.begin_pending(&identity, HOST).await,
            Err(HostingError::Conflict(_))
        ));

        registry.commit(sb).await.unwrap();
        assert!(!registry.is_pending(&identity).await);
        assert!(matches!(
            registry.begin_pending(&identity, HOST).await,
            Err(HostingError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_hostname_belongs_to_one_identity() {
        let registry = SandboxRegistry::new();
        let blog = sandbox("c1", "blog", 8000);
        registry.begin_pending(&blog.identity(), HOST).await.unwrap();

        let mut intruder = sandbox("c2", "shop", 8001);
        intruder.public_hostname = HOST.to_string();
        assert!(matches!(
            registry.begin_pending(&intruder.identity(), HOST).await,
            Err(HostingError::Conflict(_))
        ));

        registry.commit(blog).await.unwrap();
        let err = registry.commit(intruder).await.unwrap_err();
        assert!(matches!(err, HostingError::Conflict(_)));
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.find_by_hostname(HOST).await.unwrap().id, "c1");
    }

    #[tokio::test]
    async fn test_commit_rejects_duplicate_identity() {
        let registry = SandboxRegistry::new();
        registry.commit(sandbox("c1", "blog", 8000)).await.unwrap();
        let err = registry.commit(sandbox("c2", "blog", 8001)).await.unwrap_err();
        assert!(matches!(err, HostingError::Conflict(_)));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_lookups() {
        let registry = SandboxRegistry::new();
        let sb = sandbox("c1", "blog", 8000);
        registry.commit(sb.clone()).await.unwrap();

        assert_eq!(registry.get("c1").await, Some(sb.clone()));
        assert_eq!(registry.find_by_identity(&sb.identity()).await, Some(sb.clone()));
        assert_eq!(
            registry.find_by_hostname("Blog.Alice.localhost.").await,
            Some(sb)
        );
        assert_eq!(registry.find_by_hostname("other.localhost").await, None);
    }

    #[tokio::test]
    async fn test_touch_only_moves_forward() {
        let registry = SandboxRegistry::new();
        let sb = sandbox("c1", "blog", 8000);
        let start = sb.last_activity_at;
        registry.commit(sb).await.unwrap();

        let later = start + Duration::minutes(5);
        assert_eq!(registry.touch("c1", later).await, Some(later));
        assert_eq!(
            registry.touch("c1", start - Duration::minutes(10)).await,
            Some(later)
        );
        assert_eq!(registry.touch("missing", later).await, None);
    }

    #[tokio::test]
    async fn test_remove_frees_identity() {
        let registry = SandboxRegistry::new();
        let sb = sandbox("c1", "blog", 8000);
        let identity = sb.identity();
        registry.commit(sb).await.unwrap();

        assert!(registry.remove("c1").await.is_some());
        assert!(registry.remove("c1").await.is_none());
        assert!(registry.find_by_identity(&identity).await.is_none());
        registry.begin_pending(&identity, HOST).await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("registry.json");

        let registry = SandboxRegistry::with_snapshot(&path);
        registry.commit(sandbox("c1", "blog", 8000)).await.unwrap();
        registry.commit(sandbox("c2", "shop", 8001)).await.unwrap();
        registry.set_state("c2", SandboxState::Stopped).await.unwrap();

        let restored_registry = SandboxRegistry::with_snapshot(&path);
        let restored = restored_registry.load_snapshot().await.unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(
            restored_registry.get("c2").await.map(|s| s.state),
            Some(SandboxState::Stopped)
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SandboxRegistry::with_snapshot(dir.path().join("none.json"));
        assert!(registry.load_snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();
        let registry = SandboxRegistry::with_snapshot(&path);
        assert!(matches!(
            registry.load_snapshot().await,
            Err(SnapshotError::Parse(_))
        ));
    }
}
