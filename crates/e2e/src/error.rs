//! Error types for the E2E harness core

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Session acquisition failed for profile '{profile}': {reason}")]
    SessionAcquisition { profile: String, reason: String },

    #[error("Persisted session state at {location} is unusable: {reason}")]
    StateCorruption { location: String, reason: String },

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Target application unreachable after {0} attempts")]
    TargetUnreachable(usize),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Element not found, tried: {}", tried.join(", "))]
    ElementNotFound { tried: Vec<String> },

    #[error("Timeout waiting for {what} after {after_ms} ms")]
    Timeout { what: String, after_ms: u64 },

    #[error("No deleter registered for resource type {0}")]
    NoDeleter(String),

    #[error("Deleter already registered for resource type {0}")]
    DuplicateDeleter(String),

    #[error("Scenario failed: {0}")]
    Scenario(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// A recovered failure of one best-effort teardown step.
///
/// These are observability values: they get logged and summarised, never
/// propagated into a test's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub step: String,
    pub message: String,
}

impl FailureReason {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn from_error(step: impl Into<String>, err: &E2eError) -> Self {
        Self::new(step, err.to_string())
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
