// ABOUTME: Integration tests for idle reclamation sweeps and the background reaper task
// ABOUTME: Threshold handling, out-of-band removal, failure isolation and non-overlapping sweeps

mod common;

use chrono::Duration as ChronoDuration;
use common::{project, Harness};
use hostbox_sandbox::{ReaperConfig, SandboxState};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn test_idle_sandbox_is_stopped_and_active_one_kept() {
    let h = Harness::new();
    let idle = h.orchestrator.provision(&project("blog", "alice")).await.unwrap().sandbox;
    let active = h.orchestrator.provision(&project("shop", "alice")).await.unwrap().sandbox;

    let now = idle.last_activity_at + ChronoDuration::minutes(31);
    h.orchestrator
        .record_activity_at(&active.id, now - ChronoDuration::minutes(10))
        .await
        .unwrap();

    let report = h.orchestrator.reaper().sweep_at(now).await.unwrap();

    assert_eq!(report.stopped, vec![idle.id.clone()]);
    assert!(report.failed.is_empty());
    assert_eq!(
        h.orchestrator.get(&idle.id).await.unwrap().state,
        SandboxState::Stopped
    );
    assert_eq!(
        h.orchestrator.get(&active.id).await.unwrap().state,
        SandboxState::Running
    );
    assert!(!h.has_route(&idle.public_hostname));
    assert!(h.has_route(&active.public_hostname));
    // Stopped, not removed: the port stays reserved
    assert!(h.orchestrator.ports().is_reserved(idle.host_port).await);
}

#[tokio::test]
async fn test_stopped_sandboxes_are_ignored() {
    let h = Harness::new();
    let sandbox = h.orchestrator.provision(&project("blog", "alice")).await.unwrap().sandbox;
    h.orchestrator.stop(&sandbox.id).await.unwrap();
    let stops = h.runtime.stops();

    let report = h
        .orchestrator
        .reaper()
        .sweep_at(sandbox.last_activity_at + ChronoDuration::hours(5))
        .await
        .unwrap();

    assert!(report.is_empty());
    assert_eq!(h.runtime.stops(), stops);
}

#[tokio::test]
async fn test_vanished_sandbox_is_purged_not_retried() {
    let h = Harness::new();
    let sandbox = h.orchestrator.provision(&project("blog", "alice")).await.unwrap().sandbox;
    h.runtime.vanish(&sandbox.id);

    let later = sandbox.last_activity_at + ChronoDuration::minutes(45);
    let report = h.orchestrator.reaper().sweep_at(later).await.unwrap();

    assert_eq!(report.purged, vec![sandbox.id.clone()]);
    assert!(h.orchestrator.list().await.is_empty());
    assert_eq!(h.orchestrator.ports().in_use().await, 0);
    assert!(!h.has_route(&sandbox.public_hostname));

    let report = h.orchestrator.reaper().sweep_at(later).await.unwrap();
    assert!(report.is_empty());
}

#[tokio::test]
async fn test_one_failure_does_not_abort_the_sweep() {
    let h = Harness::new();
    let stuck = h.orchestrator.provision(&project("blog", "alice")).await.unwrap().sandbox;
    let fine = h.orchestrator.provision(&project("shop", "alice")).await.unwrap().sandbox;
    h.runtime.fail_stop_for(&stuck.id);

    let now = fine.last_activity_at + ChronoDuration::minutes(31);
    let report = h.orchestrator.reaper().sweep_at(now).await.unwrap();

    assert_eq!(report.stopped, vec![fine.id.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, stuck.id);
    assert_eq!(
        h.orchestrator.get(&stuck.id).await.unwrap().state,
        SandboxState::Running
    );
    assert!(h.has_route(&stuck.public_hostname));
}

#[tokio::test]
async fn test_sweeps_never_overlap() {
    let h = Harness::new();
    let sandbox = h.orchestrator.provision(&project("blog", "alice")).await.unwrap().sandbox;
    h.runtime.set_stop_delay(Duration::from_millis(200));
    let now = sandbox.last_activity_at + ChronoDuration::minutes(31);

    let reaper = h.orchestrator.reaper().clone();
    let first = tokio::spawn(async move { reaper.sweep_at(now).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.orchestrator.reaper().sweep_at(now).await.is_none());

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.stopped, vec![sandbox.id]);
    assert_eq!(h.runtime.stops(), 1);
}

#[tokio::test]
async fn test_background_reaper_runs_until_shutdown() {
    let h = Harness::with_settings(|s| {
        s.reaper = ReaperConfig {
            interval: Duration::from_millis(20),
            idle_threshold: Duration::ZERO,
        };
    });
    let sandbox = h.orchestrator.provision(&project("blog", "alice")).await.unwrap().sandbox;

    let handle = h.orchestrator.spawn_reaper();
    let mut stopped = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if h.orchestrator.get(&sandbox.id).await.unwrap().state == SandboxState::Stopped {
            stopped = true;
            break;
        }
    }
    assert!(stopped, "reaper never stopped the idle sandbox");

    handle.shutdown().await;
}
