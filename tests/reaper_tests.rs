//! Idle expiry end to end: the reaper destroys stale sessions and releases
//! their resources, activity postpones it.

use geosession::reaper;
use geosession::{Config, EchoEngine, MemoryStore, Operation, ServiceError, SessionManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn manager(dir: &tempfile::TempDir) -> (Arc<SessionManager>, Arc<MemoryStore>) {
    init_tracing();
    let mut config = Config::default();
    config.paths.working_dir = dir.path().join("work");
    config.paths.output_dir = dir.path().join("output");
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(SessionManager::new(
        config,
        store.clone(),
        Arc::new(EchoEngine::new()),
    ));
    (manager, store)
}

fn spatial_file(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, b"features").unwrap();
    path
}

#[tokio::test]
async fn test_expired_session_is_fully_released() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, store) = manager(&dir);
    let file = spatial_file(&dir, "a.geojson");

    let token = manager.create_session().await.unwrap();
    manager
        .ingest(&token, &file, Some("a".to_string()), None)
        .await
        .unwrap();
    manager
        .apply(&token, None, &Operation::Buffer { distance: 2.0 }, None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reaped = reaper::sweep_with_threshold(&manager, Duration::from_millis(20)).await;
    assert_eq!(reaped, 1);

    // Storage objects dropped one by one, working directory removed
    assert_eq!(store.object_count(), 0);
    assert_eq!(store.drop_log().len(), 2);
    let work_root = dir.path().join("work").join("session");
    let remaining = std::fs::read_dir(&work_root)
        .map(Iterator::count)
        .unwrap_or(0);
    assert_eq!(remaining, 0);

    assert!(matches!(
        manager.resolve(&token).await,
        Err(ServiceError::SessionNotFound)
    ));
}

#[tokio::test]
async fn test_only_idle_sessions_are_reaped() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _) = manager(&dir);

    let stale = manager.create_session().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let fresh = manager.create_session().await.unwrap();

    let reaped = reaper::sweep_with_threshold(&manager, Duration::from_millis(40)).await;
    assert_eq!(reaped, 1);
    assert!(!manager.has_session(&stale));
    assert!(manager.has_session(&fresh));
}

#[tokio::test]
async fn test_any_request_resets_the_idle_clock() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _) = manager(&dir);
    let file = spatial_file(&dir, "a.geojson");
    let token = manager.create_session().await.unwrap();

    // Stay just under the threshold by issuing requests
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        manager
            .ingest(&token, &file, None, None)
            .await
            .unwrap();
        let reaped = reaper::sweep_with_threshold(&manager, Duration::from_millis(60)).await;
        assert_eq!(reaped, 0);
    }
    assert!(manager.has_session(&token));

    // Then go quiet and expire
    tokio::time::sleep(Duration::from_millis(80)).await;
    let reaped = reaper::sweep_with_threshold(&manager, Duration::from_millis(60)).await;
    assert_eq!(reaped, 1);
}

#[tokio::test]
async fn test_sweep_handles_many_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, store) = manager(&dir);
    let file = spatial_file(&dir, "a.geojson");

    for _ in 0..5 {
        let token = manager.create_session().await.unwrap();
        manager
            .ingest(&token, &file, Some("a".to_string()), None)
            .await
            .unwrap();
    }
    assert_eq!(manager.session_count(), 5);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reaped = reaper::sweep_with_threshold(&manager, Duration::from_millis(20)).await;
    assert_eq!(reaped, 5);
    assert_eq!(manager.session_count(), 0);
    assert_eq!(store.object_count(), 0);
}

#[tokio::test]
async fn test_explicit_destroy_then_sweep_is_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _) = manager(&dir);
    let token = manager.create_session().await.unwrap();
    manager.destroy_session(&token).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    let reaped = reaper::sweep_with_threshold(&manager, Duration::from_millis(10)).await;
    assert_eq!(reaped, 0);
}

#[tokio::test]
async fn test_background_reaper_destroys_idle_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.paths.working_dir = dir.path().join("work");
    config.session.idle_timeout_secs = 1;
    config.session.sweep_interval_secs = 1;
    let manager = Arc::new(SessionManager::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(EchoEngine::new()),
    ));

    let token = manager.create_session().await.unwrap();
    let reaper = geosession::Reaper::spawn(manager.clone());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!manager.has_session(&token));
    reaper.shutdown().await;
}
