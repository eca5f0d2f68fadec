//! Test results, performance stats and flaky detection

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cleanup::TeardownReport;
use crate::error::E2eResult;
use crate::session::{AcquireOutcome, CacheStats};

/// How many of the slowest tests to list
const SLOWEST_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    /// Failed at least once, then passed on retry
    Flaky,
}

/// One try at running a test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt: u32,
    pub success: bool,
    pub duration_ms: u64,
    pub session: Option<AcquireOutcome>,
    pub error: Option<String>,
    pub teardown: TeardownReport,
}

/// Result of running a single test, across its attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub test_id: String,
    pub profile: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub attempts: Vec<AttemptResult>,
    pub error: Option<String>,
}

impl TestResult {
    /// Fold attempts into a result. Status only looks at the test's own
    /// outcome; teardown failures never change it.
    pub fn from_attempts(
        name: &str,
        test_id: &str,
        profile: &str,
        attempts: Vec<AttemptResult>,
    ) -> Self {
        let passed_last = attempts.last().map(|a| a.success).unwrap_or(false);
        let any_failed = attempts.iter().any(|a| !a.success);

        let status = match (passed_last, any_failed) {
            (true, false) => TestStatus::Passed,
            (true, true) => TestStatus::Flaky,
            (false, _) => TestStatus::Failed,
        };
        let error = if passed_last {
            None
        } else {
            attempts.last().and_then(|a| a.error.clone())
        };

        Self {
            name: name.to_string(),
            test_id: test_id.to_string(),
            profile: profile.to_string(),
            status,
            duration_ms: attempts.iter().map(|a| a.duration_ms).sum(),
            attempts,
            error,
        }
    }

    pub fn leaked_resources(&self) -> usize {
        self.attempts.iter().map(|a| a.teardown.leaked()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub mean_ms: f64,
    pub median_ms: u64,
    pub max_ms: u64,
    /// Slowest tests, slowest first
    pub slowest: Vec<(String, u64)>,
}

impl PerformanceStats {
    pub fn from_results(results: &[TestResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let mut durations: Vec<u64> = results.iter().map(|r| r.duration_ms).collect();
        durations.sort_unstable();

        let mid = durations.len() / 2;
        let median_ms = if durations.len() % 2 == 0 {
            (durations[mid - 1] + durations[mid]) / 2
        } else {
            durations[mid]
        };

        let mut slowest: Vec<(String, u64)> = results
            .iter()
            .map(|r| (r.name.clone(), r.duration_ms))
            .collect();
        slowest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        slowest.truncate(SLOWEST_LIMIT);

        Self {
            mean_ms: durations.iter().sum::<u64>() as f64 / durations.len() as f64,
            median_ms,
            max_ms: durations.last().copied().unwrap_or(0),
            slowest,
        }
    }
}

/// Result of running all tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub flaky: usize,
    pub duration_ms: u64,
    pub performance: PerformanceStats,
    pub leaked_resources: usize,
    pub cache: CacheStats,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn from_results(results: Vec<TestResult>, duration_ms: u64, cache: CacheStats) -> Self {
        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();

        Self {
            total: results.len(),
            passed: count(TestStatus::Passed),
            failed: count(TestStatus::Failed),
            flaky: count(TestStatus::Flaky),
            duration_ms,
            performance: PerformanceStats::from_results(&results),
            leaked_resources: results.iter().map(TestResult::leaked_resources).sum(),
            cache,
            results,
        }
    }

    pub fn flaky_tests(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status == TestStatus::Flaky)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Write test results to `<dir>/test-results.json`
pub fn write_results(dir: &Path, results: &TestSuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
