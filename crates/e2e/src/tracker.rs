//! Tracking of entities created during a test

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::error::E2eError;

/// Kinds of application entities a test can leave behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    JobPosting,
    Applicant,
    Interview,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [
        ResourceType::JobPosting,
        ResourceType::Applicant,
        ResourceType::Interview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::JobPosting => "jobPosting",
            ResourceType::Applicant => "applicant",
            ResourceType::Interview => "interview",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
            "jobposting" | "job" => Ok(ResourceType::JobPosting),
            "applicant" => Ok(ResourceType::Applicant),
            "interview" => Ok(ResourceType::Interview),
            _ => Err(E2eError::Config(format!("unknown resource type '{}'", s))),
        }
    }
}

/// One entity owed a delete at teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub test_id: String,
    pub resource_type: ResourceType,
    /// Title or name the UI/API can find the entity by
    pub identifier: String,
    pub recorded_at: DateTime<Utc>,
}

/// Resources per test id, in creation order
///
/// Cloning shares the underlying map, so a worker can hand copies to the
/// test body and to teardown.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    inner: Arc<Mutex<HashMap<String, Vec<TrackedResource>>>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource. Duplicates are kept and each gets a delete attempt.
    pub fn record(
        &self,
        test_id: &str,
        resource_type: ResourceType,
        identifier: impl Into<String>,
    ) {
        let resource = TrackedResource {
            test_id: test_id.to_string(),
            resource_type,
            identifier: identifier.into(),
            recorded_at: Utc::now(),
        };
        debug!(
            test_id,
            resource_type = %resource.resource_type,
            identifier = %resource.identifier,
            "Tracking resource"
        );
        self.inner
            .lock()
            .entry(test_id.to_string())
            .or_default()
            .push(resource);
    }

    /// Remove and return everything recorded for `test_id`, oldest first
    pub fn drain(&self, test_id: &str) -> Vec<TrackedResource> {
        self.inner.lock().remove(test_id).unwrap_or_default()
    }

    /// Resources still owed a delete for `test_id`
    pub fn pending(&self, test_id: &str) -> usize {
        self.inner.lock().get(test_id).map(Vec::len).unwrap_or(0)
    }

    /// Test ids with outstanding resources
    pub fn test_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .iter()
            .filter(|(_, resources)| !resources.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
