//! Recruitment Portal E2E Harness Core
//!
//! This crate provides the stateful parts of the browser-driven E2E suite:
//! - Caches authenticated sessions per profile on disk and re-verifies them
//!   with a cheap liveness probe before trusting them
//! - Tracks every job posting, applicant and interview a test creates
//! - Tears tests down in dependency-safe (LIFO) order without ever failing
//!   a test because of cleanup
//! - Runs scenarios with retries, flaky detection and a JSON results file
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SuiteRunner                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SessionCache                                               │
//! │    ├── acquire(profile) -> SessionHandle                    │
//! │    │     persisted state? fresh? ─ probe ─ login ─ persist  │
//! │    ├── release(handle)   persist state, close context       │
//! │    └── logout(handle)    API logout, UI fallback            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ResourceTracker                                            │
//! │    ├── record(test_id, type, identifier)                    │
//! │    └── drain(test_id) -> [TrackedResource]                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CleanupOrchestrator::perform_test_cleanup                  │
//! │    ├── (a) cleanup: drain, reverse, delete each             │
//! │    ├── (b) dismiss blocking overlays                        │
//! │    └── (c) release or log out the session                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  BrowserLauncher / BrowserDriver  (Playwright or a fake)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cleanup;
pub mod config;
pub mod driver;
pub mod error;
pub mod locator;
pub mod playwright;
pub mod profile;
pub mod report;
pub mod runner;
pub mod session;
pub mod target;
pub mod tracker;

pub use cleanup::{
    cleanup, deleter_fn, CleanupOrchestrator, CleanupSummary, Deleter, DeleterRegistry,
    DeletionFailure, SessionEnd, TeardownReport,
};
pub use config::{init_logging, SessionPolicy, SuiteConfig};
pub use driver::{BrowserDriver, BrowserLauncher};
pub use error::{E2eError, E2eResult, FailureReason};
pub use locator::ResilientLocator;
pub use profile::{Profile, Profiles};
pub use report::{TestResult, TestStatus, TestSuiteResult};
pub use runner::{Scenario, SuiteRunner, TestContext};
pub use session::{
    AcquireOutcome, Authenticator, CachePolicy, FormAuthenticator, FsSessionStore, SessionCache,
    SessionHandle, SessionStore, VerificationResult,
};
pub use tracker::{ResourceTracker, ResourceType, TrackedResource};
