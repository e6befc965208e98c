//! Integration tests for bulk launch and close.

use std::time::{Duration, Instant};

use pw_session_engine::orchestrator::bulk::{BulkCoordinator, OutcomeRow};
use pw_session_engine::orchestrator::launcher::CloseStatus;
use pw_session_engine::AppError;

use super::test_helpers::{account, game_dir, launcher, FakeHost};

#[tokio::test]
async fn one_missing_game_directory_does_not_stop_the_rest() {
    let host = FakeHost::new();
    let bulk = BulkCoordinator::new(launcher(&host), 2, Duration::ZERO);
    let good = game_dir();
    let bad = tempfile::tempdir().expect("tempdir");

    let targets = vec![
        (account("alice"), good.path().to_path_buf()),
        (account("bob"), good.path().to_path_buf()),
        (account("carol"), bad.path().to_path_buf()),
        (account("dave"), good.path().to_path_buf()),
        (account("erin"), good.path().to_path_buf()),
    ];
    let outcomes = bulk.launch_each(targets).await;

    let logins: Vec<&str> = outcomes.iter().map(|o| o.login.as_str()).collect();
    assert_eq!(logins, vec!["alice", "bob", "carol", "dave", "erin"]);
    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 4);
    assert!(matches!(
        outcomes[2].result,
        Err(AppError::GameClientNotFound(_))
    ));
    assert_eq!(bulk.launcher().registry().len(), 4);
    assert!(!bulk.launcher().registry().is_running("carol"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn launch_many_respects_concurrency_limit() {
    let host = FakeHost::with_spawn_delay(Duration::from_millis(25));
    let bulk = BulkCoordinator::new(launcher(&host), 2, Duration::ZERO);
    let dir = game_dir();

    let accounts = (0..10).map(|i| account(&format!("user{i:02}"))).collect();
    let outcomes = bulk.launch_many(accounts, dir.path().to_path_buf()).await;

    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 10);
    assert_eq!(host.spawn_count(), 10);
    let peak = host.peak_in_flight();
    assert!(peak <= 2, "at most 2 spawns at once, saw {peak}");
    assert!(peak >= 1);
}

#[tokio::test]
async fn duplicate_login_in_one_batch_launches_once() {
    let host = FakeHost::with_spawn_delay(Duration::from_millis(20));
    let bulk = BulkCoordinator::new(launcher(&host), 4, Duration::ZERO);
    let dir = game_dir();

    let outcomes = bulk
        .launch_many(
            vec![account("alice"), account("alice"), account("bob")],
            dir.path().to_path_buf(),
        )
        .await;

    assert_eq!(outcomes.len(), 3);
    let alice_failures: Vec<_> = outcomes[..2]
        .iter()
        .filter_map(|o| o.result.as_ref().err())
        .collect();
    assert_eq!(alice_failures, vec![&AppError::AlreadyRunning("alice".into())]);
    assert!(outcomes[2].is_success());
    assert_eq!(host.spawn_count(), 2);
}

#[tokio::test]
async fn close_many_reports_per_login() {
    let host = FakeHost::new();
    let bulk = BulkCoordinator::new(launcher(&host), 3, Duration::ZERO);
    let dir = game_dir();

    bulk.launch_many(
        vec![account("alice"), account("bob")],
        dir.path().to_path_buf(),
    )
    .await;

    let outcomes = bulk
        .close_many(vec!["bob".into(), "ghost".into(), "alice".into()])
        .await;

    assert_eq!(outcomes[0].result, Ok(CloseStatus::Exited));
    assert_eq!(outcomes[1].result, Err(AppError::NotRunning("ghost".into())));
    assert_eq!(outcomes[2].result, Ok(CloseStatus::Exited));
    assert!(bulk.launcher().registry().is_empty());
}

#[tokio::test]
async fn close_all_empties_registry() {
    let host = FakeHost::new();
    let bulk = BulkCoordinator::new(launcher(&host), 2, Duration::ZERO);
    let dir = game_dir();

    bulk.launch_many(
        vec![account("alice"), account("bob"), account("carol")],
        dir.path().to_path_buf(),
    )
    .await;
    let outcomes = bulk.close_all().await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert!(bulk.launcher().registry().is_empty());
}

#[tokio::test]
async fn stagger_spaces_spawn_starts() {
    let host = FakeHost::new();
    let bulk = BulkCoordinator::new(launcher(&host), 4, Duration::from_millis(40));
    let dir = game_dir();

    let started = Instant::now();
    let outcomes = bulk
        .launch_many(
            vec![account("alice"), account("bob"), account("carol")],
            dir.path().to_path_buf(),
        )
        .await;

    assert!(outcomes.iter().all(|o| o.is_success()));
    assert!(
        started.elapsed() >= Duration::from_millis(80),
        "three staggered starts span at least two intervals"
    );
}

#[tokio::test]
async fn outcome_rows_carry_error_kind() {
    let host = FakeHost::new();
    let bulk = BulkCoordinator::new(launcher(&host), 1, Duration::ZERO);

    let rows: Vec<OutcomeRow<CloseStatus>> = bulk
        .close_many(vec!["ghost".into()])
        .await
        .into_iter()
        .map(OutcomeRow::from)
        .collect();

    let json = serde_json::to_value(&rows).expect("serialize");
    assert_eq!(json[0]["login"], "ghost");
    assert_eq!(json[0]["ok"], false);
    assert_eq!(json[0]["error_kind"], "not_running");
    assert!(json[0].get("value").is_none());
}
