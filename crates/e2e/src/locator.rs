//! Resilient locators
//!
//! A locator holds an ordered list of selector candidates for the same
//! element. Resolution tries them in order and settles on the first one
//! that becomes visible.

use std::time::Duration;
use tracing::debug;

use crate::driver::BrowserDriver;
use crate::error::{E2eError, E2eResult};

/// Smallest wait given to a single candidate
const MIN_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ResilientLocator {
    candidates: Vec<String>,
    timeout: Duration,
}

impl ResilientLocator {
    pub fn new<I, S>(candidates: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Wait budget per candidate: the total split evenly, never below
    /// `MIN_SLICE`
    pub fn slice(&self) -> Duration {
        let n = self.candidates.len().max(1) as u32;
        (self.timeout / n).max(MIN_SLICE)
    }

    /// Return the first candidate that appears
    pub async fn resolve(&self, driver: &mut dyn BrowserDriver) -> E2eResult<String> {
        let slice = self.slice();
        for selector in &self.candidates {
            match driver.wait_for_element(selector, slice).await {
                Ok(()) => return Ok(selector.clone()),
                Err(e) => debug!("Locator candidate {} not found: {}", selector, e),
            }
        }
        Err(E2eError::ElementNotFound {
            tried: self.candidates.clone(),
        })
    }

    pub async fn click(&self, driver: &mut dyn BrowserDriver) -> E2eResult<String> {
        let selector = self.resolve(driver).await?;
        driver.click(&selector, self.slice()).await?;
        Ok(selector)
    }

    pub async fn fill(&self, driver: &mut dyn BrowserDriver, value: &str) -> E2eResult<String> {
        let selector = self.resolve(driver).await?;
        driver.fill(&selector, value, self.slice()).await?;
        Ok(selector)
    }
}
