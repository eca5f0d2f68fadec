//! Suite runner: session, scenario, teardown, retries

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cleanup::{CleanupOrchestrator, DeleterRegistry};
use crate::config::SuiteConfig;
use crate::driver::{BrowserDriver, BrowserLauncher};
use crate::error::{panic_message, E2eResult};
use crate::profile::Profiles;
use crate::report::{self, AttemptResult, TestResult, TestStatus, TestSuiteResult};
use crate::session::{
    AcquireOutcome, CachePolicy, FormAuthenticator, FsSessionStore, SessionCache, SessionHandle,
};
use crate::target;
use crate::tracker::{ResourceTracker, ResourceType};

/// A business scenario run against the application
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    /// Key of the profile the scenario logs in as
    fn profile(&self) -> &str;

    async fn run(&self, ctx: &mut TestContext) -> E2eResult<()>;
}

/// What a scenario gets to work with during one attempt
pub struct TestContext {
    test_id: String,
    base_url: String,
    handle: SessionHandle,
    tracker: ResourceTracker,
}

impl TestContext {
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn url(&self, path: &str) -> String {
        crate::config::join_url(&self.base_url, path)
    }

    pub fn driver(&mut self) -> &mut dyn BrowserDriver {
        self.handle.driver()
    }

    pub fn session_outcome(&self) -> AcquireOutcome {
        self.handle.outcome()
    }

    /// Register an entity the scenario just created so teardown deletes it
    pub fn record(&self, resource_type: ResourceType, identifier: impl Into<String>) {
        self.tracker.record(&self.test_id, resource_type, identifier);
    }

    fn into_handle(self) -> SessionHandle {
        self.handle
    }
}

/// Main E2E test runner
pub struct SuiteRunner {
    config: SuiteConfig,
    cache: Arc<SessionCache>,
    tracker: ResourceTracker,
    orchestrator: CleanupOrchestrator,
}

impl SuiteRunner {
    /// Wire up the default stack: file-backed session store and the
    /// form-based login flow
    pub fn new(
        config: SuiteConfig,
        launcher: Arc<dyn BrowserLauncher>,
        deleters: DeleterRegistry,
    ) -> E2eResult<Self> {
        config.validate()?;
        let cache = SessionCache::new(
            Profiles::from_config(&config),
            Arc::new(FsSessionStore::new(config.session.state_dir.clone())),
            launcher,
            Arc::new(FormAuthenticator::new(&config)),
            CachePolicy::from_config(&config),
        );
        Ok(Self::with_cache(config, Arc::new(cache), deleters))
    }

    /// Build around an existing cache
    pub fn with_cache(
        config: SuiteConfig,
        cache: Arc<SessionCache>,
        deleters: DeleterRegistry,
    ) -> Self {
        let tracker = ResourceTracker::new();
        let orchestrator =
            CleanupOrchestrator::new(&config, cache.clone(), tracker.clone(), deleters);
        Self {
            config,
            cache,
            tracker,
            orchestrator,
        }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Run scenarios one after another
    pub async fn run_all(&self, scenarios: &[Arc<dyn Scenario>]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();

        if self.config.target.check_reachable {
            target::wait_for_reachable(&self.config.base_url, &self.config.target).await?;
        }

        info!("Running {} test(s)...", scenarios.len());

        let mut results = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            results.push(self.run_test(scenario.as_ref()).await);
        }

        let suite = TestSuiteResult::from_results(
            results,
            start.elapsed().as_millis() as u64,
            self.cache.stats(),
        );

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} flaky ({} ms)",
            suite.passed, suite.failed, suite.flaky, suite.duration_ms
        );
        if suite.leaked_resources > 0 {
            warn!("{} resource(s) could not be cleaned up", suite.leaked_resources);
        }

        Ok(suite)
    }

    /// Run a single scenario with retries
    pub async fn run_test(&self, scenario: &dyn Scenario) -> TestResult {
        let test_id = new_test_id(scenario.name());
        let max_attempts = self.config.runner.retries + 1;
        let mut attempts = Vec::new();

        for attempt in 1..=max_attempts {
            let result = self.run_attempt(scenario, &test_id, attempt).await;
            let success = result.success;
            attempts.push(result);
            if success {
                break;
            }
            if attempt < max_attempts {
                debug!(test_id = %test_id, "Retrying after failed attempt {}", attempt);
            }
        }

        let result =
            TestResult::from_attempts(scenario.name(), &test_id, scenario.profile(), attempts);
        match result.status {
            TestStatus::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
            TestStatus::Flaky => warn!(
                "~ {} passed after {} attempts (flaky)",
                result.name,
                result.attempts.len()
            ),
            TestStatus::Failed => error!(
                "✗ {} - {}",
                result.name,
                result.error.as_deref().unwrap_or("unknown error")
            ),
        }
        result
    }

    async fn run_attempt(
        &self,
        scenario: &dyn Scenario,
        test_id: &str,
        attempt: u32,
    ) -> AttemptResult {
        let start = Instant::now();

        let (error, session, handle) = match self.cache.acquire(scenario.profile()).await {
            Ok(handle) => {
                let session = handle.outcome();
                let mut ctx = TestContext {
                    test_id: test_id.to_string(),
                    base_url: self.config.base_url.clone(),
                    handle,
                    tracker: self.tracker.clone(),
                };

                let outcome = AssertUnwindSafe(scenario.run(&mut ctx)).catch_unwind().await;
                let error = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(panic) => Some(format!("scenario panicked: {}", panic_message(panic))),
                };
                (error, Some(session), Some(ctx.into_handle()))
            }
            Err(e) => (Some(e.to_string()), None, None),
        };

        let teardown = self.orchestrator.perform_test_cleanup(test_id, handle).await;

        AttemptResult {
            attempt,
            success: error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            session,
            error,
            teardown,
        }
    }

    /// Write results to the configured output directory
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        report::write_results(&self.config.runner.output_dir, results)
    }
}

/// Unique, readable id for one test's run
fn new_test_id(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", slug, &suffix[..8])
}
