// ABOUTME: Periodic reclamation of sandboxes that have been idle past a threshold
// ABOUTME: Sweeps never overlap and one failing sandbox never aborts a sweep

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityTracker;
use crate::controller::{ContainerController, IdleStop};

#[derive(Debug, Clone, PartialEq)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub idle_threshold: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            idle_threshold: Duration::from_secs(30 * 60),
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub stopped: Vec<String>,
    pub purged: Vec<String>,
    pub skipped: Vec<String>,
    /// (sandbox id, error) pairs
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty()
            && self.purged.is_empty()
            && self.skipped.is_empty()
            && self.failed.is_empty()
    }
}

pub struct Reaper {
    controller: Arc<ContainerController>,
    config: ReaperConfig,
    sweep_guard: Mutex<()>,
}

impl Reaper {
    pub fn new(controller: Arc<ContainerController>, config: ReaperConfig) -> Self {
        Self {
            controller,
            config,
            sweep_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// Sweep now. Returns None if another sweep is still in flight.
    pub async fn sweep(&self) -> Option<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Option<SweepReport> {
        let Ok(_guard) = self.sweep_guard.try_lock() else {
            debug!("Reaper sweep already in progress, skipping");
            return None;
        };

        let threshold = chrono::Duration::seconds(self.config.idle_threshold.as_secs() as i64);
        let cutoff = now - threshold;
        let tracker: &ActivityTracker = self.controller.activity();
        let candidates = tracker.idle_candidates(now, threshold).await;

        let mut report = SweepReport::default();
        for sandbox in candidates {
            let idle_minutes = sandbox.idle_for(now).num_minutes();
            match self.controller.stop_if_idle(&sandbox.id, cutoff).await {
                Ok(IdleStop::Stopped) => {
                    info!(
                        "Stopped idle sandbox {} ({}, idle {} min)",
                        sandbox.id, sandbox.public_hostname, idle_minutes
                    );
                    report.stopped.push(sandbox.id);
                }
                Ok(IdleStop::Purged) => {
                    warn!("Idle sandbox {} was already gone from the runtime", sandbox.id);
                    report.purged.push(sandbox.id);
                }
                Ok(IdleStop::Skipped) => report.skipped.push(sandbox.id),
                Err(e) => {
                    error!("Failed to stop idle sandbox {}: {}", sandbox.id, e);
                    report.failed.push((sandbox.id, e.to_string()));
                }
            }
        }

        if !report.is_empty() {
            info!(
                "Reaper sweep: {} stopped, {} purged, {} skipped, {} failed",
                report.stopped.len(),
                report.purged.len(),
                report.skipped.len(),
                report.failed.len()
            );
        }
        Some(report)
    }

    /// Run sweeps on the configured interval until the handle is shut down
    pub fn spawn(self: Arc<Self>) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let reaper = self;

        let task = tokio::spawn(async move {
            info!(
                "Reaper started (every {}s, idle threshold {} min)",
                reaper.config.interval.as_secs(),
                reaper.config.idle_threshold.as_secs() / 60
            );
            let mut interval = tokio::time::interval(reaper.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        reaper.sweep().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Reaper stopped");
        });

        ReaperHandle {
            shutdown_tx,
            task: Some(task),
        }
    }
}

pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stop the loop and wait for an in-flight sweep to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Reaper task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
