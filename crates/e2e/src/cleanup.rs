//! Teardown: dependency-ordered resource deletion and session release
//!
//! Nothing in here fails a test. Every step returns its failure as a value,
//! the orchestrator collects them into a [`TeardownReport`], and the report
//! is logged and attached to the test result.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{SessionPolicy, SuiteConfig, TimeoutConfig};
use crate::driver::BrowserDriver;
use crate::error::{panic_message, E2eError, E2eResult, FailureReason};
use crate::session::{LogoutMethod, SessionCache, SessionHandle};
use crate::tracker::{ResourceTracker, ResourceType, TrackedResource};

/// Deletes one kind of entity by its identifier
#[async_trait]
pub trait Deleter: Send + Sync {
    async fn delete(&self, driver: &mut dyn BrowserDriver, identifier: &str) -> E2eResult<()>;
}

/// Adapter turning a closure into a [`Deleter`]
pub struct FnDeleter<F>(F);

#[async_trait]
impl<F> Deleter for FnDeleter<F>
where
    F: for<'a> Fn(&'a mut dyn BrowserDriver, String) -> BoxFuture<'a, E2eResult<()>>
        + Send
        + Sync
        + 'static,
{
    async fn delete(&self, driver: &mut dyn BrowserDriver, identifier: &str) -> E2eResult<()> {
        (self.0)(driver, identifier.to_string()).await
    }
}

pub fn deleter_fn<F>(f: F) -> Arc<dyn Deleter>
where
    F: for<'a> Fn(&'a mut dyn BrowserDriver, String) -> BoxFuture<'a, E2eResult<()>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnDeleter(f))
}

/// Capability map from resource type to its deleter
#[derive(Clone, Default)]
pub struct DeleterRegistry {
    deleters: HashMap<ResourceType, Arc<dyn Deleter>>,
}

impl DeleterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the deleter for a type. Each type takes exactly one.
    pub fn register(
        &mut self,
        resource_type: ResourceType,
        deleter: Arc<dyn Deleter>,
    ) -> E2eResult<()> {
        if self.deleters.contains_key(&resource_type) {
            return Err(E2eError::DuplicateDeleter(resource_type.to_string()));
        }
        self.deleters.insert(resource_type, deleter);
        Ok(())
    }

    pub fn with(
        mut self,
        resource_type: ResourceType,
        deleter: Arc<dyn Deleter>,
    ) -> E2eResult<Self> {
        self.register(resource_type, deleter)?;
        Ok(self)
    }

    pub fn get(&self, resource_type: ResourceType) -> Option<&Arc<dyn Deleter>> {
        self.deleters.get(&resource_type)
    }

    /// Types that have no deleter yet
    pub fn missing(&self) -> Vec<ResourceType> {
        ResourceType::ALL
            .into_iter()
            .filter(|ty| !self.deleters.contains_key(ty))
            .collect()
    }
}

impl std::fmt::Debug for DeleterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.deleters.keys().collect();
        types.sort();
        f.debug_struct("DeleterRegistry").field("types", &types).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionFailure {
    pub resource_type: ResourceType,
    pub identifier: String,
    pub reason: String,
}

/// Outcome of deleting everything one test created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub test_id: String,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<DeletionFailure>,
    pub duration_ms: u64,
}

impl CleanupSummary {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    fn failure(&mut self, resource: &TrackedResource, reason: String) {
        warn!(
            test_id = %resource.test_id,
            resource_type = %resource.resource_type,
            identifier = %resource.identifier,
            "Cleanup failed: {}", reason
        );
        self.failed += 1;
        self.failures.push(DeletionFailure {
            resource_type: resource.resource_type,
            identifier: resource.identifier.clone(),
            reason,
        });
    }
}

/// Drain `test_id`'s resources and delete them newest first.
///
/// Each deletion is independent: a failure, timeout or panic is counted
/// and the next resource is still attempted. The tracker holds nothing for
/// `test_id` afterwards.
pub async fn cleanup(
    tracker: &ResourceTracker,
    test_id: &str,
    deleters: &DeleterRegistry,
    driver: &mut dyn BrowserDriver,
    timeout: Duration,
) -> CleanupSummary {
    let start = Instant::now();
    let mut resources = tracker.drain(test_id);
    resources.reverse();

    let mut summary = CleanupSummary {
        test_id: test_id.to_string(),
        ..Default::default()
    };

    for resource in &resources {
        let Some(deleter) = deleters.get(resource.resource_type) else {
            let missing = E2eError::NoDeleter(resource.resource_type.to_string());
            summary.failure(resource, missing.to_string());
            continue;
        };

        let attempt = AssertUnwindSafe(tokio::time::timeout(
            timeout,
            deleter.delete(&mut *driver, &resource.identifier),
        ))
        .catch_unwind()
        .await;

        match attempt {
            Ok(Ok(Ok(()))) => {
                debug!(
                    test_id,
                    resource_type = %resource.resource_type,
                    identifier = %resource.identifier,
                    "Deleted resource"
                );
                summary.succeeded += 1;
            }
            Ok(Ok(Err(e))) => summary.failure(resource, e.to_string()),
            Ok(Err(_)) => {
                summary.failure(resource, format!("timed out after {} ms", timeout.as_millis()))
            }
            Err(panic) => {
                summary.failure(resource, format!("deleter panicked: {}", panic_message(panic)))
            }
        }
    }

    summary.duration_ms = start.elapsed().as_millis() as u64;
    summary
}

/// How the session was ended at teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    Persisted,
    LoggedOut(LogoutMethod),
    /// The test never obtained a session
    NoSession,
}

/// Everything teardown did for one test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownReport {
    pub test_id: String,
    pub resources: Result<CleanupSummary, FailureReason>,
    /// Number of overlays dismissed
    pub overlays: Result<usize, FailureReason>,
    pub session: Result<SessionEnd, FailureReason>,
    pub duration_ms: u64,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        matches!(&self.resources, Ok(summary) if summary.failed == 0)
            && self.overlays.is_ok()
            && self.session.is_ok()
    }

    /// Resources whose deletion failed and may still exist
    pub fn leaked(&self) -> usize {
        self.resources.as_ref().map(|s| s.failed).unwrap_or(0)
    }

    pub fn step_failures(&self) -> Vec<&FailureReason> {
        [
            self.resources.as_ref().err(),
            self.overlays.as_ref().err(),
            self.session.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Runs the teardown sequence for a test: resources, overlays, session
pub struct CleanupOrchestrator {
    cache: Arc<SessionCache>,
    tracker: ResourceTracker,
    deleters: DeleterRegistry,
    overlay_selectors: Vec<String>,
    timeouts: TimeoutConfig,
    policy: SessionPolicy,
}

impl CleanupOrchestrator {
    pub fn new(
        config: &SuiteConfig,
        cache: Arc<SessionCache>,
        tracker: ResourceTracker,
        deleters: DeleterRegistry,
    ) -> Self {
        let missing = deleters.missing();
        if !missing.is_empty() {
            warn!("No deleter registered for {:?}; such resources will leak", missing);
        }
        Self {
            cache,
            tracker,
            deleters,
            overlay_selectors: config.overlays.dismiss_selectors.clone(),
            timeouts: config.timeouts.clone(),
            policy: config.teardown.session_policy,
        }
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Tear down after a test. Never fails and never panics outward; each
    /// step runs even if the ones before it failed.
    pub async fn perform_test_cleanup(
        &self,
        test_id: &str,
        mut handle: Option<SessionHandle>,
    ) -> TeardownReport {
        let start = Instant::now();

        let resources = match handle.as_mut() {
            Some(handle) => {
                let step = cleanup(
                    &self.tracker,
                    test_id,
                    &self.deleters,
                    handle.driver(),
                    self.timeouts.deletion(),
                );
                guarded("resource_cleanup", step).await
            }
            None => Ok(self.abandon(test_id)),
        };
        if resources.is_err() {
            // Keep the tracker empty even if the step blew up midway.
            self.tracker.drain(test_id);
        }

        let overlays = match handle.as_mut() {
            Some(handle) => {
                let step = tokio::time::timeout(
                    self.timeouts.step(),
                    dismiss_overlays(
                        handle.driver(),
                        &self.overlay_selectors,
                        self.timeouts.element(),
                    ),
                );
                match guarded("dismiss_overlays", step).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(FailureReason::new(
                        "dismiss_overlays",
                        format!("timed out after {} ms", self.timeouts.step_ms),
                    )),
                    Err(reason) => Err(reason),
                }
            }
            None => Ok(0),
        };

        let session = match handle {
            Some(handle) => guarded("session_release", self.end_session(handle))
                .await
                .and_then(|r| r),
            None => Ok(SessionEnd::NoSession),
        };

        let report = TeardownReport {
            test_id: test_id.to_string(),
            resources,
            overlays,
            session,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if report.is_clean() {
            info!(test_id, "Teardown complete in {} ms", report.duration_ms);
        } else {
            warn!(
                test_id,
                leaked = report.leaked(),
                step_failures = report.step_failures().len(),
                "Teardown completed with failures"
            );
        }
        report
    }

    async fn end_session(&self, handle: SessionHandle) -> Result<SessionEnd, FailureReason> {
        match self.policy {
            SessionPolicy::Persist => {
                self.cache.release(handle).await.map(|_| SessionEnd::Persisted)
            }
            SessionPolicy::Logout => self.cache.logout(handle).await.map(SessionEnd::LoggedOut),
        }
    }

    /// Without a session nothing can be deleted; account for it anyway
    fn abandon(&self, test_id: &str) -> CleanupSummary {
        let mut summary = CleanupSummary {
            test_id: test_id.to_string(),
            ..Default::default()
        };
        for resource in self.tracker.drain(test_id).iter().rev() {
            summary.failure(resource, "no live session to delete with".to_string());
        }
        summary
    }
}

/// Click away any blocking dialogs. Absent overlays are not an error.
async fn dismiss_overlays(
    driver: &mut dyn BrowserDriver,
    selectors: &[String],
    timeout: Duration,
) -> Result<usize, FailureReason> {
    // Overlays are normally already on screen; don't wait long for them.
    let glance = (timeout / 10).max(Duration::from_millis(100));
    let mut dismissed = 0;
    let mut last_error = None;

    for selector in selectors {
        if driver.wait_for_element(selector, glance).await.is_err() {
            continue;
        }
        match driver.click(selector, timeout).await {
            Ok(()) => dismissed += 1,
            Err(e) => {
                debug!("Could not dismiss overlay {}: {}", selector, e);
                last_error = Some(FailureReason::from_error("dismiss_overlays", &e));
            }
        }
    }

    match last_error {
        Some(reason) if dismissed == 0 => Err(reason),
        _ => Ok(dismissed),
    }
}

/// Run a teardown step, turning a panic into a failure
async fn guarded<F, T>(step: &str, fut: F) -> Result<T, FailureReason>
where
    F: std::future::Future<Output = T>,
{
    AssertUnwindSafe(fut).catch_unwind().await.map_err(|panic| {
        let reason = FailureReason::new(step, format!("panicked: {}", panic_message(panic)));
        warn!("Teardown step failed: {}", reason);
        reason
    })
}
