//! Login, liveness probe and logout flows

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{join_url, LoginConfig, LogoutConfig, SessionConfig, SuiteConfig, TimeoutConfig};
use crate::driver::BrowserDriver;
use crate::error::{E2eError, E2eResult};
use crate::locator::ResilientLocator;
use crate::profile::Profile;

/// How a logout was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutMethod {
    Api,
    Ui,
}

/// Application-specific authentication flows
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Full login with the profile's credentials
    async fn login(&self, driver: &mut dyn BrowserDriver, profile: &Profile) -> E2eResult<()>;

    /// Cheap check that the context is still authenticated
    async fn probe(&self, driver: &mut dyn BrowserDriver) -> E2eResult<()>;

    async fn logout(&self, driver: &mut dyn BrowserDriver) -> E2eResult<LogoutMethod>;
}

/// Drives the application's login form and account menu
#[derive(Debug, Clone)]
pub struct FormAuthenticator {
    base_url: String,
    session: SessionConfig,
    login: LoginConfig,
    logout: LogoutConfig,
    timeouts: TimeoutConfig,
}

impl FormAuthenticator {
    pub fn new(config: &SuiteConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            session: config.session.clone(),
            login: config.login.clone(),
            logout: config.logout.clone(),
            timeouts: config.timeouts.clone(),
        }
    }

    fn locator(&self, candidates: &[String]) -> ResilientLocator {
        ResilientLocator::new(candidates.iter().cloned(), self.timeouts.element())
    }

    async fn ui_logout(&self, driver: &mut dyn BrowserDriver) -> E2eResult<()> {
        let url = join_url(&self.base_url, &self.session.probe_path);
        driver.navigate(&url, self.timeouts.navigation()).await?;
        self.locator(&self.logout.menu_selectors).click(driver).await?;
        self.locator(&self.logout.logout_selectors).click(driver).await?;
        driver
            .wait_for_element(&self.logout.login_page_selector, self.timeouts.element())
            .await
    }
}

#[async_trait]
impl Authenticator for FormAuthenticator {
    async fn login(&self, driver: &mut dyn BrowserDriver, profile: &Profile) -> E2eResult<()> {
        let url = join_url(&self.base_url, &self.login.login_path);
        debug!(profile = %profile.key, "Logging in via {}", url);

        driver.navigate(&url, self.timeouts.navigation()).await?;
        self.locator(&self.login.username_selectors)
            .fill(driver, &profile.username)
            .await?;
        self.locator(&self.login.password_selectors)
            .fill(driver, &profile.password)
            .await?;
        self.locator(&self.login.submit_selectors).click(driver).await?;

        driver
            .wait_for_element(&self.login.success_selector, self.timeouts.element())
            .await
            .map_err(|e| E2eError::Driver(format!("login did not complete: {}", e)))
    }

    async fn probe(&self, driver: &mut dyn BrowserDriver) -> E2eResult<()> {
        let url = join_url(&self.base_url, &self.session.probe_path);
        driver.navigate(&url, self.timeouts.navigation()).await?;
        driver
            .wait_for_element(&self.session.probe_selector, self.timeouts.element())
            .await
    }

    async fn logout(&self, driver: &mut dyn BrowserDriver) -> E2eResult<LogoutMethod> {
        let url = join_url(&self.base_url, &self.logout.api_path);
        match driver
            .fetch(&url, &self.logout.api_method, self.timeouts.step())
            .await
        {
            Ok(status) if status < 400 => return Ok(LogoutMethod::Api),
            Ok(status) => warn!("API logout returned {}, falling back to UI", status),
            Err(e) => warn!("API logout failed: {}, falling back to UI", e),
        }

        self.ui_logout(driver).await?;
        Ok(LogoutMethod::Ui)
    }
}
