//! Browser driver seam
//!
//! The session cache and cleanup orchestrator only need these capabilities;
//! they never see a concrete automation library.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::E2eResult;

/// One isolated, live browsing context
#[async_trait]
pub trait BrowserDriver: Send {
    /// Navigate to an absolute URL
    async fn navigate(&mut self, url: &str, timeout: Duration) -> E2eResult<()>;

    /// Wait until `selector` is visible on the current page
    async fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> E2eResult<()>;

    async fn click(&mut self, selector: &str, timeout: Duration) -> E2eResult<()>;

    async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> E2eResult<()>;

    /// Issue a request with the context's cookies, returning the HTTP status
    async fn fetch(&mut self, url: &str, method: &str, timeout: Duration) -> E2eResult<u16>;

    /// Serialise the context's storage state (cookies, local storage)
    async fn save_state(&mut self) -> E2eResult<Vec<u8>>;

    /// Release the context. Further calls are undefined.
    async fn close(&mut self) -> E2eResult<()>;
}

/// Creates browsing contexts, optionally seeded with a saved state blob
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a context. A blob that cannot be used must produce
    /// `E2eError::StateCorruption` so the caller can fall back to login.
    async fn launch(&self, state: Option<&[u8]>) -> E2eResult<Box<dyn BrowserDriver>>;
}
