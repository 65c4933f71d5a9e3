// ABOUTME: Host port allocation for sandbox ingress with an explicit reservation set
// ABOUTME: Serializes allocation so concurrent callers never receive the same port

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{HostingError, Result};

/// Hands out unique host ports from a fixed range.
///
/// A port stays reserved until `release` is called, which only happens once the
/// owning sandbox has been removed (or its provisioning was rolled back).
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    probe_host: bool,
    reserved: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator that also skips ports already bound on the host
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self::with_host_probe(range, true)
    }

    pub fn with_host_probe(range: RangeInclusive<u16>, probe_host: bool) -> Self {
        Self {
            range,
            probe_host,
            reserved: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }

    /// Reserve the lowest free port in the range
    pub async fn allocate(&self) -> Result<u16> {
        let mut reserved = self.reserved.lock().await;

        for port in self.range.clone() {
            if reserved.contains(&port) {
                continue;
            }
            if self.probe_host && !is_port_available(port).await {
                debug!("Skipping port {}: bound by another process", port);
                continue;
            }
            reserved.insert(port);
            debug!("Allocated port {} ({} reserved)", port, reserved.len());
            return Ok(port);
        }

        warn!(
            "No free port left in range {}-{} ({} reserved)",
            self.range.start(),
            self.range.end(),
            reserved.len()
        );
        Err(HostingError::ResourceExhausted(format!(
            "no free port in range {}-{}",
            self.range.start(),
            self.range.end()
        )))
    }

    /// Mark a specific port as held, e.g. when restoring known sandboxes
    pub async fn reserve(&self, port: u16) -> Result<()> {
        if !self.range.contains(&port) {
            warn!(
                "Reserving port {} outside of allocation range {}-{}",
                port,
                self.range.start(),
                self.range.end()
            );
        }
        let mut reserved = self.reserved.lock().await;
        if !reserved.insert(port) {
            return Err(HostingError::Conflict(format!(
                "port {} is already reserved",
                port
            )));
        }
        Ok(())
    }

    /// Return a port to the pool. Returns false if it was not reserved.
    pub async fn release(&self, port: u16) -> bool {
        let released = self.reserved.lock().await.remove(&port);
        if released {
            info!("Released port {}", port);
        } else {
            debug!("Port {} was not reserved", port);
        }
        released
    }

    pub async fn is_reserved(&self, port: u16) -> bool {
        self.reserved.lock().await.contains(&port)
    }

    pub async fn in_use(&self) -> usize {
        self.reserved.lock().await.len()
    }

    /// Ports in the range not yet reserved (ignores the host probe)
    pub async fn available(&self) -> usize {
        let reserved = self.reserved.lock().await;
        let total = self.range.clone().count();
        let held = reserved.iter().filter(|p| self.range.contains(p)).count();
        total - held
    }
}

/// Check if a port can be bound on the host. The listener is dropped at once.
async fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).await.is_ok()
}
