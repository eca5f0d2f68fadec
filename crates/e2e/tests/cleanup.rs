//! Resource cleanup ordering and teardown fault tolerance

mod support;

use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use recruit_e2e::{
    cleanup, deleter_fn, BrowserDriver, CleanupOrchestrator, Deleter, DeleterRegistry, E2eError,
    E2eResult, ResourceTracker, ResourceType, SessionEnd, SessionPolicy,
};
use support::*;

fn registry(log: &Arc<Mutex<Vec<String>>>, failing: Option<ResourceType>) -> DeleterRegistry {
    let mut registry = DeleterRegistry::new();
    for (ty, kind) in [
        (ResourceType::JobPosting, "jobPosting"),
        (ResourceType::Applicant, "applicant"),
        (ResourceType::Interview, "interview"),
    ] {
        registry
            .register(
                ty,
                Arc::new(RecordingDeleter {
                    kind,
                    log: log.clone(),
                    fail: failing == Some(ty),
                }),
            )
            .unwrap();
    }
    registry
}

#[tokio::test]
async fn test_failing_interview_deleter_does_not_stop_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let app = FakeApp::new();
    let cache = cache(&config, &app);
    let mut handle = cache.acquire(ADMIN).await.unwrap();

    let tracker = ResourceTracker::new();
    tracker.record("t-1", ResourceType::JobPosting, "J1");
    tracker.record("t-1", ResourceType::Applicant, "A1");
    tracker.record("t-1", ResourceType::Interview, "I1");

    let log = Arc::new(Mutex::new(Vec::new()));
    let deleters = registry(&log, Some(ResourceType::Interview));

    let summary = cleanup(
        &tracker,
        "t-1",
        &deleters,
        handle.driver(),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].resource_type, ResourceType::Interview);
    assert_eq!(summary.failures[0].identifier, "I1");
    assert_eq!(
        *log.lock(),
        vec!["interview:I1", "applicant:A1", "jobPosting:J1"]
    );
    assert_eq!(tracker.pending("t-1"), 0);
    assert!(tracker.drain("t-1").is_empty());
}

#[tokio::test]
async fn test_cleanup_is_lifo_including_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let cache = cache(&config, &FakeApp::new());
    let mut handle = cache.acquire(ADMIN).await.unwrap();

    let tracker = ResourceTracker::new();
    let recorded = [
        (ResourceType::JobPosting, "Role_1"),
        (ResourceType::Applicant, "app-1"),
        (ResourceType::JobPosting, "Role_2"),
        (ResourceType::Applicant, "app-1"),
        (ResourceType::Interview, "int-1"),
    ];
    for (ty, id) in recorded {
        tracker.record("t-2", ty, id);
    }
    tracker.record("other", ResourceType::Applicant, "untouched");

    let log = Arc::new(Mutex::new(Vec::new()));
    let deleters = registry(&log, None);
    let summary = cleanup(
        &tracker,
        "t-2",
        &deleters,
        handle.driver(),
        Duration::from_secs(1),
    )
    .await;

    let expected: Vec<String> = recorded
        .iter()
        .rev()
        .map(|(ty, id)| format!("{}:{}", ty, id))
        .collect();
    assert_eq!(*log.lock(), expected);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(tracker.pending("other"), 1);
}

#[tokio::test]
async fn test_missing_deleter_and_timeout_count_as_failures() {
    struct Slow;

    #[async_trait::async_trait]
    impl Deleter for Slow {
        async fn delete(
            &self,
            _driver: &mut dyn BrowserDriver,
            _identifier: &str,
        ) -> E2eResult<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let cache = cache(&config, &FakeApp::new());
    let mut handle = cache.acquire(ADMIN).await.unwrap();

    let tracker = ResourceTracker::new();
    tracker.record("t-3", ResourceType::JobPosting, "Role_9");
    tracker.record("t-3", ResourceType::Interview, "int-9");

    let deleters = DeleterRegistry::new()
        .with(ResourceType::JobPosting, Arc::new(Slow))
        .unwrap();

    let summary = cleanup(
        &tracker,
        "t-3",
        &deleters,
        handle.driver(),
        Duration::from_millis(50),
    )
    .await;

    assert_eq!(summary.failed, 2);
    assert_eq!(
        summary.failures[0].reason,
        E2eError::NoDeleter("interview".to_string()).to_string()
    );
    assert!(summary.failures[1].reason.contains("timed out"));
}

#[tokio::test]
async fn test_deleter_fn_adapter() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let cache = cache(&config, &FakeApp::new());
    let mut handle = cache.acquire(ADMIN).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_deleter = seen.clone();
    let deleter = deleter_fn(move |driver: &mut dyn BrowserDriver, identifier: String| {
        let seen = seen_by_deleter.clone();
        async move {
            driver
                .navigate(&format!("{}/jobs?q={}", BASE_URL, identifier), Duration::from_secs(1))
                .await?;
            seen.lock().push(identifier);
            Ok::<(), E2eError>(())
        }
        .boxed()
    });

    let tracker = ResourceTracker::new();
    tracker.record("t-4", ResourceType::JobPosting, "Role_4");
    let deleters = DeleterRegistry::new().with(ResourceType::JobPosting, deleter).unwrap();

    let summary = cleanup(
        &tracker,
        "t-4",
        &deleters,
        handle.driver(),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(*seen.lock(), vec!["Role_4".to_string()]);
}

#[tokio::test]
async fn test_perform_test_cleanup_survives_every_step_failing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let app = FakeApp::new();
    let cache = cache(&config, &app);
    let handle = cache.acquire(ADMIN).await.unwrap();

    let tracker = ResourceTracker::new();
    tracker.record("t-5", ResourceType::JobPosting, "Role_5");
    tracker.record("t-5", ResourceType::Applicant, "app-5");

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut deleters = DeleterRegistry::new();
    deleters
        .register(ResourceType::Applicant, Arc::new(PanickingDeleter))
        .unwrap();
    deleters
        .register(
            ResourceType::JobPosting,
            Arc::new(RecordingDeleter {
                kind: "jobPosting",
                log: log.clone(),
                fail: true,
            }),
        )
        .unwrap();

    // An overlay is up, but the browser is gone.
    app.show("[data-testid=\"modal-close\"]");
    app.set_broken(true);

    let orchestrator = CleanupOrchestrator::new(&config, cache.clone(), tracker.clone(), deleters);
    let report = orchestrator.perform_test_cleanup("t-5", Some(handle)).await;

    let summary = report.resources.as_ref().unwrap();
    assert_eq!(summary.failed, 2);
    assert!(summary.failures[0].reason.contains("panicked"));
    assert_eq!(report.overlays, Ok(0));
    assert!(report.session.is_err());
    assert!(!report.is_clean());
    assert_eq!(report.leaked(), 2);
    assert_eq!(tracker.pending("t-5"), 0);
    assert_eq!(*log.lock(), vec!["jobPosting:Role_5"]);
}

#[tokio::test]
async fn test_perform_test_cleanup_happy_path_dismisses_overlays() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let app = FakeApp::new();
    let cache = cache(&config, &app);
    let handle = cache.acquire(ADMIN).await.unwrap();

    let tracker = ResourceTracker::new();
    tracker.record("t-6", ResourceType::JobPosting, "Role_6");
    app.show("[data-testid=\"modal-close\"]");

    let log = Arc::new(Mutex::new(Vec::new()));
    let orchestrator =
        CleanupOrchestrator::new(&config, cache.clone(), tracker.clone(), registry(&log, None));
    let report = orchestrator.perform_test_cleanup("t-6", Some(handle)).await;

    assert!(report.is_clean());
    assert_eq!(report.overlays, Ok(1));
    assert_eq!(report.session, Ok(SessionEnd::Persisted));
    assert_eq!(app.state.lock().dismissed, 1);
}

#[tokio::test]
async fn test_every_visible_overlay_is_dismissed() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let app = FakeApp::new();
    let cache = cache(&config, &app);
    let handle = cache.acquire(ADMIN).await.unwrap();

    app.show("[data-testid=\"modal-close\"]");
    app.show(".toast-close");

    let orchestrator = CleanupOrchestrator::new(
        &config,
        cache.clone(),
        ResourceTracker::new(),
        DeleterRegistry::new(),
    );
    let report = orchestrator.perform_test_cleanup("t-overlays", Some(handle)).await;

    assert_eq!(report.overlays, Ok(2));
    let state = app.state.lock();
    assert_eq!(state.dismissed, 2);
    assert!(state.visible.is_empty());
}

#[tokio::test]
async fn test_logout_policy_ends_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.teardown.session_policy = SessionPolicy::Logout;
    let app = FakeApp::new();
    let cache = cache(&config, &app);
    let handle = cache.acquire(ADMIN).await.unwrap();

    let orchestrator = CleanupOrchestrator::new(
        &config,
        cache.clone(),
        ResourceTracker::new(),
        DeleterRegistry::new(),
    );
    let report = orchestrator.perform_test_cleanup("t-7", Some(handle)).await;

    assert_eq!(
        report.session,
        Ok(SessionEnd::LoggedOut(recruit_e2e::session::LogoutMethod::Api))
    );
    assert_eq!(app.state.lock().api_logouts, 1);
    assert!(!store(&config).path_for(ADMIN).exists());
}

#[tokio::test]
async fn test_cleanup_without_session_accounts_for_resources() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let cache = cache(&config, &FakeApp::new());
    let tracker = ResourceTracker::new();
    tracker.record("t-8", ResourceType::Applicant, "app-8");

    let orchestrator =
        CleanupOrchestrator::new(&config, cache, tracker.clone(), DeleterRegistry::new());
    let report = orchestrator.perform_test_cleanup("t-8", None).await;

    assert_eq!(report.session, Ok(SessionEnd::NoSession));
    assert_eq!(report.leaked(), 1);
    assert_eq!(tracker.pending("t-8"), 0);
}

#[test]
fn test_duplicate_registration_is_rejected_at_registration_time() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = registry(&log, None);
    let err = registry
        .register(
            ResourceType::Interview,
            Arc::new(RecordingDeleter {
                kind: "interview",
                log,
                fail: false,
            }),
        )
        .unwrap_err();
    assert!(matches!(err, E2eError::DuplicateDeleter(_)));
}
