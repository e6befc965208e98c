//! Integration tests for exit detection by the process monitor.

use std::time::Duration;

use pw_session_engine::config::MonitorConfig;
use pw_session_engine::models::session::ExitReason;
use pw_session_engine::orchestrator::host::ProcessHost;
use pw_session_engine::orchestrator::monitor::Monitor;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{account, game_dir, launcher, FakeHost};

fn monitor_config(threshold: u32) -> MonitorConfig {
    MonitorConfig {
        poll_interval_ms: 10,
        failure_threshold: threshold,
    }
}

#[tokio::test]
async fn exited_client_is_retired_with_one_notice() {
    let host = FakeHost::new();
    let launcher = launcher(&host);
    let dir = game_dir();
    let mut notices = launcher.registry().subscribe();

    let alice = launcher
        .launch(&account("alice"), dir.path())
        .await
        .expect("launch alice");
    launcher
        .launch(&account("bob"), dir.path())
        .await
        .expect("launch bob");

    let mut monitor = Monitor::new(
        launcher.registry().clone(),
        host.clone() as std::sync::Arc<dyn ProcessHost>,
        monitor_config(3),
    );
    assert_eq!(monitor.reconcile().await, 0, "nothing exited yet");

    host.exit(alice.process_id);
    assert_eq!(monitor.reconcile().await, 1);
    assert!(launcher.registry().get("alice").is_none());
    assert!(launcher.registry().is_running("bob"));

    let notice = notices.try_recv().expect("notice");
    assert_eq!(notice.login, "alice");
    assert_eq!(notice.process_id, alice.process_id);
    assert_eq!(notice.reason, ExitReason::Exited);

    assert_eq!(monitor.reconcile().await, 0);
    assert_eq!(notices.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn reused_pid_is_reported_as_replaced() {
    let host = FakeHost::new();
    let launcher = launcher(&host);
    let dir = game_dir();
    let mut notices = launcher.registry().subscribe();

    let session = launcher
        .launch(&account("carol"), dir.path())
        .await
        .expect("launch");
    host.replace(session.process_id);

    let mut monitor = Monitor::new(
        launcher.registry().clone(),
        host.clone() as std::sync::Arc<dyn ProcessHost>,
        monitor_config(3),
    );
    assert_eq!(monitor.reconcile().await, 1);
    assert_eq!(notices.try_recv().expect("notice").reason, ExitReason::Replaced);
}

#[tokio::test]
async fn unobservable_client_is_retired_after_threshold() {
    let host = FakeHost::new();
    let launcher = launcher(&host);
    let dir = game_dir();
    let mut notices = launcher.registry().subscribe();

    let session = launcher
        .launch(&account("dave"), dir.path())
        .await
        .expect("launch");
    host.set_unobservable(session.process_id, true);

    let mut monitor = Monitor::new(
        launcher.registry().clone(),
        host.clone() as std::sync::Arc<dyn ProcessHost>,
        monitor_config(3),
    );
    assert_eq!(monitor.reconcile().await, 0);
    assert_eq!(monitor.reconcile().await, 0);
    assert!(launcher.registry().is_running("dave"), "below threshold");

    assert_eq!(monitor.reconcile().await, 1);
    assert!(!launcher.registry().is_running("dave"));
    assert_eq!(
        notices.try_recv().expect("notice").reason,
        ExitReason::Unobservable
    );
}

#[tokio::test]
async fn successful_probe_resets_failure_count() {
    let host = FakeHost::new();
    let launcher = launcher(&host);
    let dir = game_dir();

    let session = launcher
        .launch(&account("erin"), dir.path())
        .await
        .expect("launch");
    let mut monitor = Monitor::new(
        launcher.registry().clone(),
        host.clone() as std::sync::Arc<dyn ProcessHost>,
        monitor_config(2),
    );

    host.set_unobservable(session.process_id, true);
    assert_eq!(monitor.reconcile().await, 0);
    host.set_unobservable(session.process_id, false);
    assert_eq!(monitor.reconcile().await, 0);
    host.set_unobservable(session.process_id, true);
    assert_eq!(monitor.reconcile().await, 0);

    assert!(
        launcher.registry().is_running("erin"),
        "failures must be consecutive"
    );
}

#[tokio::test]
async fn background_loop_detects_exit_within_interval() {
    let host = FakeHost::new();
    let launcher = launcher(&host);
    let dir = game_dir();
    let mut notices = launcher.registry().subscribe();

    let session = launcher
        .launch(&account("frank"), dir.path())
        .await
        .expect("launch");

    let ct = CancellationToken::new();
    let handle = Monitor::new(
        launcher.registry().clone(),
        host.clone() as std::sync::Arc<dyn ProcessHost>,
        monitor_config(3),
    )
    .spawn(ct.clone());

    host.exit(session.process_id);
    let notice = tokio::time::timeout(Duration::from_secs(2), notices.recv())
        .await
        .expect("notice within timeout")
        .expect("channel open");
    assert_eq!(notice.login, "frank");
    assert!(launcher.registry().get("frank").is_none());

    ct.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("monitor stops on cancel")
        .expect("join");
}

#[tokio::test]
async fn close_racing_monitor_notifies_once() {
    let host = FakeHost::new();
    let launcher = launcher(&host);
    let dir = game_dir();
    let mut notices = launcher.registry().subscribe();

    let session = launcher
        .launch(&account("gina"), dir.path())
        .await
        .expect("launch");
    host.exit(session.process_id);

    let mut monitor = Monitor::new(
        launcher.registry().clone(),
        host.clone() as std::sync::Arc<dyn ProcessHost>,
        monitor_config(3),
    );
    let closer = launcher.clone();
    let (closed, retired) = tokio::join!(
        async move { closer.close("gina").await },
        monitor.reconcile()
    );

    // Whichever side got there first retired the session; the other saw
    // it already gone.
    match closed {
        Ok(_) => {}
        Err(err) => assert!(
            matches!(err, pw_session_engine::AppError::NotRunning(_)),
            "got {err}"
        ),
    }
    assert!(retired <= 1);
    assert!(notices.try_recv().is_ok(), "one notice expected");
    assert_eq!(notices.try_recv(), Err(TryRecvError::Empty));
    assert!(launcher.registry().is_empty());
}
