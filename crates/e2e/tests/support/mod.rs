//! In-memory recruitment app and browser driver for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use recruit_e2e::config::{LoginConfig, LogoutConfig, SessionConfig};
use recruit_e2e::{
    BrowserDriver, BrowserLauncher, CachePolicy, Deleter, E2eError, E2eResult, FormAuthenticator,
    FsSessionStore, Profile, Profiles, SessionCache, SuiteConfig,
};

pub const BASE_URL: &str = "http://app.test";
pub const ADMIN: &str = "admin";
pub const ADMIN_USER: &str = "admin@hr.test";
pub const ADMIN_PASS: &str = "correct-horse";

#[derive(Debug, Default)]
pub struct AppState {
    pub users: HashMap<String, String>,
    pub valid_tokens: HashSet<String>,
    pub next_token: u64,
    pub logins: usize,
    pub api_logouts: usize,
    pub ui_logouts: usize,
    /// Extra selectors currently on screen (e.g. overlays)
    pub visible: HashSet<String>,
    pub dismissed: usize,
    pub saves: usize,
    pub closes: usize,
    /// Every driver call fails
    pub broken: bool,
    /// The logout endpoint answers 500
    pub api_logout_broken: bool,
    /// Loading the dashboard never finishes
    pub stall_dashboard: bool,
    /// Submitting the login form never finishes
    pub stall_login: bool,
}

/// Fake server side of the application
#[derive(Debug, Clone, Default)]
pub struct FakeApp {
    pub state: Arc<Mutex<AppState>>,
}

impl FakeApp {
    pub fn new() -> Self {
        let app = Self::default();
        app.state
            .lock()
            .users
            .insert(ADMIN_USER.to_string(), ADMIN_PASS.to_string());
        app
    }

    pub fn logins(&self) -> usize {
        self.state.lock().logins
    }

    pub fn revoke_all(&self) {
        self.state.lock().valid_tokens.clear();
    }

    pub fn set_broken(&self, broken: bool) {
        self.state.lock().broken = broken;
    }

    pub fn show(&self, selector: &str) {
        self.state.lock().visible.insert(selector.to_string());
    }

    fn is_valid(&self, token: &Option<String>) -> bool {
        token
            .as_ref()
            .map(|t| self.state.lock().valid_tokens.contains(t))
            .unwrap_or(false)
    }
}

pub struct FakeLauncher {
    pub app: FakeApp,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, state: Option<&[u8]>) -> E2eResult<Box<dyn BrowserDriver>> {
        let token = match state {
            None => None,
            Some(bytes) => {
                let corrupt = |reason: String| E2eError::StateCorruption {
                    location: "fake".to_string(),
                    reason,
                };
                let value: serde_json::Value =
                    serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
                let cookies = value["cookies"]
                    .as_array()
                    .ok_or_else(|| corrupt("missing cookies".to_string()))?;
                if !value["origins"].is_array() {
                    return Err(corrupt("missing origins".to_string()));
                }
                cookies
                    .iter()
                    .find(|c| c["name"] == "sid")
                    .and_then(|c| c["value"].as_str())
                    .map(String::from)
            }
        };

        Ok(Box::new(FakeDriver {
            app: self.app.clone(),
            token,
            url: None,
            fields: HashMap::new(),
        }))
    }
}

pub struct FakeDriver {
    app: FakeApp,
    token: Option<String>,
    url: Option<String>,
    fields: HashMap<String, String>,
}

impl FakeDriver {
    fn check(&self, what: &str) -> E2eResult<()> {
        if self.app.state.lock().broken {
            Err(E2eError::Driver(format!("{} failed: browser crashed", what)))
        } else {
            Ok(())
        }
    }

    fn on_login_page(&self) -> bool {
        self.url.as_deref().map(|u| u.ends_with("/login")).unwrap_or(false)
    }

    fn authenticated(&self) -> bool {
        self.app.is_valid(&self.token)
    }

    fn is_visible(&self, selector: &str) -> bool {
        let login = LoginConfig::default();
        let logout = LogoutConfig::default();
        let session = SessionConfig::default();

        if selector == session.probe_selector || selector == login.success_selector {
            return self.authenticated() && !self.on_login_page();
        }
        let mut login_form = login
            .username_selectors
            .iter()
            .chain(&login.password_selectors)
            .chain(&login.submit_selectors);
        if login_form.any(|s| s == selector) {
            return self.on_login_page();
        }
        if selector == logout.login_page_selector {
            return !self.authenticated();
        }
        if logout.menu_selectors.iter().chain(&logout.logout_selectors).any(|s| s == selector) {
            return self.authenticated();
        }
        self.app.state.lock().visible.contains(selector)
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> E2eResult<()> {
        self.check("navigate")?;
        let stall = self.app.state.lock().stall_dashboard;
        if stall && url.ends_with("/dashboard") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.url = Some(url.to_string());
        self.fields.clear();
        Ok(())
    }

    async fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> E2eResult<()> {
        self.check("wait_for_element")?;
        if self.is_visible(selector) {
            Ok(())
        } else {
            Err(E2eError::Timeout {
                what: selector.to_string(),
                after_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn click(&mut self, selector: &str, _timeout: Duration) -> E2eResult<()> {
        self.check("click")?;
        let login = LoginConfig::default();
        let logout = LogoutConfig::default();

        if self.on_login_page() && login.submit_selectors.iter().any(|s| s == selector) {
            let stall = self.app.state.lock().stall_login;
            if stall {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            let field = |selectors: &[String]| {
                selectors.iter().find_map(|s| self.fields.get(s)).cloned()
            };
            let username = field(&login.username_selectors);
            let password = field(&login.password_selectors);

            let mut state = self.app.state.lock();
            state.logins += 1;
            let ok = match (&username, &password) {
                (Some(u), Some(p)) => state.users.get(u) == Some(p),
                _ => false,
            };
            if ok {
                state.next_token += 1;
                let token = format!("tok-{}", state.next_token);
                state.valid_tokens.insert(token.clone());
                self.token = Some(token);
                self.url = Some(format!("{}/dashboard", BASE_URL));
            }
            return Ok(());
        }

        if logout.logout_selectors.iter().any(|s| s == selector) {
            let mut state = self.app.state.lock();
            if let Some(token) = &self.token {
                state.valid_tokens.remove(token);
            }
            state.ui_logouts += 1;
            return Ok(());
        }

        let mut state = self.app.state.lock();
        if state.visible.remove(selector) {
            state.dismissed += 1;
        }
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str, _timeout: Duration) -> E2eResult<()> {
        self.check("fill")?;
        self.fields.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn fetch(&mut self, url: &str, _method: &str, _timeout: Duration) -> E2eResult<u16> {
        self.check("fetch")?;
        if !url.ends_with("/api/auth/logout") {
            return Ok(404);
        }
        let mut state = self.app.state.lock();
        if state.api_logout_broken {
            return Ok(500);
        }
        if let Some(token) = &self.token {
            state.valid_tokens.remove(token);
        }
        state.api_logouts += 1;
        Ok(200)
    }

    async fn save_state(&mut self) -> E2eResult<Vec<u8>> {
        self.check("save_state")?;
        self.app.state.lock().saves += 1;
        let cookies = match &self.token {
            Some(token) => serde_json::json!([{ "name": "sid", "value": token }]),
            None => serde_json::json!([]),
        };
        Ok(serde_json::to_vec(&serde_json::json!({ "cookies": cookies, "origins": [] }))?)
    }

    async fn close(&mut self) -> E2eResult<()> {
        self.app.state.lock().closes += 1;
        self.check("close")
    }
}

pub fn config(state_dir: &Path) -> SuiteConfig {
    let mut config = SuiteConfig::default();
    config.base_url = BASE_URL.to_string();
    config.profiles = vec![Profile::new(ADMIN, ADMIN_USER, ADMIN_PASS).with_display_name("Admin")];
    config.session.state_dir = state_dir.to_path_buf();
    config.target.check_reachable = false;
    config.timeouts.element_ms = 300;
    config.timeouts.deletion_ms = 200;
    config
}

pub fn store(config: &SuiteConfig) -> FsSessionStore {
    FsSessionStore::new(config.session.state_dir.clone())
}

pub fn cache(config: &SuiteConfig, app: &FakeApp) -> Arc<SessionCache> {
    Arc::new(SessionCache::new(
        Profiles::from_config(config),
        Arc::new(store(config)),
        Arc::new(FakeLauncher { app: app.clone() }),
        Arc::new(FormAuthenticator::new(config)),
        CachePolicy::from_config(config),
    ))
}

/// Deleter that logs `type:identifier` and succeeds, or fails on demand
pub struct RecordingDeleter {
    pub kind: &'static str,
    pub log: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

#[async_trait]
impl Deleter for RecordingDeleter {
    async fn delete(&self, _driver: &mut dyn BrowserDriver, identifier: &str) -> E2eResult<()> {
        self.log.lock().push(format!("{}:{}", self.kind, identifier));
        if self.fail {
            Err(E2eError::Driver(format!("{} {} not found", self.kind, identifier)))
        } else {
            Ok(())
        }
    }
}

pub struct PanickingDeleter;

#[async_trait]
impl Deleter for PanickingDeleter {
    async fn delete(&self, _driver: &mut dyn BrowserDriver, identifier: &str) -> E2eResult<()> {
        panic!("page object blew up deleting {}", identifier);
    }
}
