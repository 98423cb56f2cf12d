//! ---
//! lbs_section: "05-testing-qa"
//! lbs_subsection: "module"
//! lbs_type: "source"
//! lbs_scope: "code"
//! lbs_description: "End-to-end reconciliation loop scenarios against scripted doubles."
//! lbs_version: "v0.0.0-prealpha"
//! lbs_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lb_sync_common::config::AppConfig;
use lb_sync_core::{Baseline, ReconcileEngine, Scheduler};
use lb_sync_inventory::{Member, StaticInventory};
use lb_sync_reload::RecordingReload;
use lb_sync_render::ConfigRenderer;
use tempfile::tempdir;
use tokio::sync::broadcast;

const TEMPLATE: &str =
    "backend {{ group }}\n{% for member in members %}  server {{ member.id }}\n{% endfor %}";

fn test_config(dir: &Path, poll_interval: Duration) -> Arc<AppConfig> {
    let mut config: AppConfig = "group = \"web-asg\"".parse().unwrap();
    config.output = dir.join("haproxy.cfg");
    config.poll_interval = poll_interval;
    Arc::new(config)
}

fn members(ids: &[&str]) -> Vec<Member> {
    ids.iter().map(|id| Member::with_id(*id)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loop_tracks_membership_growth_and_settles() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), Duration::from_millis(50));

    // One member at startup, a second appears on the next poll, then the
    // membership holds steady.
    let inventory = Arc::new(StaticInventory::with_responses(vec![
        Ok(members(&["i-1"])),
        Ok(members(&["i-2", "i-1"])),
    ]));
    let reload = Arc::new(RecordingReload::succeeding());
    let renderer = ConfigRenderer::from_template_source(TEMPLATE).unwrap();
    let engine = ReconcileEngine::new(
        config.clone(),
        inventory.clone(),
        renderer,
        reload.clone(),
        None,
    );

    // Initial reconciliation happens before the loop, as in the daemon.
    let initial = engine.run_cycle(&Baseline::empty()).await.unwrap();
    assert_eq!(reload.invocations(), 1);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let scheduler = Scheduler::new(engine, Duration::from_millis(50));
    let loop_task = tokio::spawn(scheduler.run(shutdown_rx, initial.baseline));

    // Enough time for several ticks: one reconciles the new member, the
    // rest observe unchanged membership.
    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(()).unwrap();
    let final_baseline = loop_task.await.unwrap();

    assert_eq!(
        final_baseline,
        Baseline::from_ids(vec!["i-1".to_owned(), "i-2".to_owned()])
    );
    // Exactly two reloads: the initial sync and the membership change.
    assert_eq!(reload.invocations(), 2);
    assert!(inventory.fetches() >= 3);

    let written = std::fs::read_to_string(&config.output).unwrap();
    assert!(written.starts_with("backend web-asg"));
    assert!(written.contains("server i-1"));
    assert!(written.contains("server i-2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_wins_over_a_pending_tick() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), Duration::from_secs(3600));

    let inventory = Arc::new(StaticInventory::steady(members(&["i-1"])));
    let reload = Arc::new(RecordingReload::succeeding());
    let renderer = ConfigRenderer::from_template_source(TEMPLATE).unwrap();
    let engine = ReconcileEngine::new(
        config,
        inventory.clone(),
        renderer,
        reload.clone(),
        None,
    );

    let initial = engine.run_cycle(&Baseline::empty()).await.unwrap();
    let expected = initial.baseline.clone();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let scheduler = Scheduler::new(engine, Duration::from_secs(3600));
    let loop_task = tokio::spawn(scheduler.run(shutdown_rx, initial.baseline));

    // Signal before the first tick can ever fire; the loop must exit
    // promptly without starting another cycle.
    shutdown_tx.send(()).unwrap();
    let final_baseline =
        tokio::time::timeout(Duration::from_secs(5), loop_task).await.unwrap().unwrap();

    assert_eq!(final_baseline, expected);
    assert_eq!(inventory.fetches(), 1);
    assert_eq!(reload.invocations(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loop_retains_baseline_across_failed_cycles() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), Duration::from_millis(50));

    // A healthy poll, then the group drains to empty, which the loop
    // must treat as a failed cycle that leaves the baseline alone.
    let inventory = Arc::new(StaticInventory::with_responses(vec![
        Ok(members(&["i-1"])),
        Ok(Vec::new()),
    ]));
    let reload = Arc::new(RecordingReload::succeeding());
    let renderer = ConfigRenderer::from_template_source(TEMPLATE).unwrap();
    let engine = ReconcileEngine::new(
        config,
        inventory.clone(),
        renderer,
        reload.clone(),
        None,
    );

    let initial = engine.run_cycle(&Baseline::empty()).await.unwrap();
    let expected = initial.baseline.clone();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let scheduler = Scheduler::new(engine, Duration::from_millis(50));
    let loop_task = tokio::spawn(scheduler.run(shutdown_rx, initial.baseline));

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(()).unwrap();
    let final_baseline = loop_task.await.unwrap();

    // Every post-initial cycle failed with EmptyGroup; the baseline from
    // the last successful cycle survives.
    assert_eq!(final_baseline, expected);
    assert_eq!(reload.invocations(), 1);
    assert!(inventory.fetches() >= 2);
}
