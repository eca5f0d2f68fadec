//! Suite configuration
//!
//! Loaded once per run from a YAML file, then overridden from the
//! environment. Every field has a default so a partial file is enough.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::error::{E2eError, E2eResult};
use crate::profile::Profile;

const ENV_PREFIX: &str = "RECRUIT_E2E";

/// Top-level configuration for a test run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Base URL of the recruitment application
    pub base_url: String,

    /// Credential profiles available to tests
    pub profiles: Vec<Profile>,

    pub session: SessionConfig,
    pub login: LoginConfig,
    pub logout: LogoutConfig,
    pub overlays: OverlayConfig,
    pub timeouts: TimeoutConfig,
    pub teardown: TeardownConfig,
    pub target: TargetConfig,
    pub runner: RunnerSettings,
    pub logging: LoggingConfig,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            profiles: Vec::new(),
            session: SessionConfig::default(),
            login: LoginConfig::default(),
            logout: LogoutConfig::default(),
            overlays: OverlayConfig::default(),
            timeouts: TimeoutConfig::default(),
            teardown: TeardownConfig::default(),
            target: TargetConfig::default(),
            runner: RunnerSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Session cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding one persisted state file per profile
    pub state_dir: PathBuf,

    /// Persisted state older than this is re-verified before use
    pub max_age_secs: u64,

    /// How long a successful liveness probe is trusted in memory
    pub verification_ttl_secs: u64,

    /// Authenticated-only view used as the liveness probe
    pub probe_path: String,

    /// Element that only renders for an authenticated user
    pub probe_selector: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".auth"),
            max_age_secs: 5 * 60,
            verification_ttl_secs: 5 * 60,
            probe_path: "/dashboard".to_string(),
            probe_selector: "[data-testid=\"dashboard\"]".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn verification_ttl(&self) -> Duration {
        Duration::from_secs(self.verification_ttl_secs)
    }
}

/// Login form description, each field with fallback selectors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub login_path: String,
    pub username_selectors: Vec<String>,
    pub password_selectors: Vec<String>,
    pub submit_selectors: Vec<String>,
    /// Element that appears once login has completed
    pub success_selector: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            username_selectors: vec![
                "[data-testid=\"login-username\"]".to_string(),
                "input[name=\"username\"]".to_string(),
                "input[type=\"email\"]".to_string(),
            ],
            password_selectors: vec![
                "[data-testid=\"login-password\"]".to_string(),
                "input[name=\"password\"]".to_string(),
                "input[type=\"password\"]".to_string(),
            ],
            submit_selectors: vec![
                "[data-testid=\"login-submit\"]".to_string(),
                "button[type=\"submit\"]".to_string(),
            ],
            success_selector: "[data-testid=\"dashboard\"]".to_string(),
        }
    }
}

/// Logout settings: API first, UI as fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoutConfig {
    pub api_path: String,
    pub api_method: String,
    pub menu_selectors: Vec<String>,
    pub logout_selectors: Vec<String>,
    pub login_page_selector: String,
}

impl Default for LogoutConfig {
    fn default() -> Self {
        Self {
            api_path: "/api/auth/logout".to_string(),
            api_method: "POST".to_string(),
            menu_selectors: vec![
                "[data-testid=\"user-menu\"]".to_string(),
                "button[aria-label=\"Account\"]".to_string(),
            ],
            logout_selectors: vec![
                "[data-testid=\"logout\"]".to_string(),
                "text=Logout".to_string(),
            ],
            login_page_selector: "[data-testid=\"login-page\"]".to_string(),
        }
    }
}

/// Blocking dialogs and overlays dismissed during teardown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub dismiss_selectors: Vec<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            dismiss_selectors: vec![
                "[role=\"dialog\"] [aria-label=\"Close\"]".to_string(),
                "[data-testid=\"modal-close\"]".to_string(),
                ".toast-close".to_string(),
            ],
        }
    }
}

/// Bounds on every suspension point, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub navigation_ms: u64,
    pub element_ms: u64,
    pub login_ms: u64,
    pub probe_ms: u64,
    pub deletion_ms: u64,
    pub step_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation_ms: 15_000,
            element_ms: 5_000,
            login_ms: 30_000,
            probe_ms: 10_000,
            deletion_ms: 20_000,
            step_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn element(&self) -> Duration {
        Duration::from_millis(self.element_ms)
    }

    pub fn login(&self) -> Duration {
        Duration::from_millis(self.login_ms)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }

    pub fn deletion(&self) -> Duration {
        Duration::from_millis(self.deletion_ms)
    }

    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

/// What happens to the session at the end of a test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPolicy {
    /// Save the context state so the next test can reuse it
    #[default]
    Persist,
    /// Log out and drop the persisted state
    Logout,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TeardownConfig {
    pub session_policy: SessionPolicy,
}

/// Reachability check run before the first test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub check_reachable: bool,
    pub health_path: String,
    pub startup_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            check_reachable: true,
            health_path: "/".to_string(),
            startup_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    /// Extra attempts for a failing test; a later pass marks it flaky
    pub retries: u32,
    pub output_dir: PathBuf,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            retries: 0,
            output_dir: PathBuf::from("test-results"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl SuiteConfig {
    /// Load configuration from a YAML file, falling back to defaults when
    /// the file does not exist. Environment overrides are applied after.
    pub fn load(path: &Path) -> E2eResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse from a YAML string without touching the environment
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the process env)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(&format!("{ENV_PREFIX}_BASE_URL")) {
            self.base_url = url;
        }
        if let Some(dir) = lookup(&format!("{ENV_PREFIX}_STATE_DIR")) {
            self.session.state_dir = PathBuf::from(dir);
        }
        for profile in &mut self.profiles {
            let key = env_key(&profile.key);
            if let Some(user) = lookup(&format!("{ENV_PREFIX}_{key}_USERNAME")) {
                profile.username = user;
            }
            if let Some(pass) = lookup(&format!("{ENV_PREFIX}_{key}_PASSWORD")) {
                profile.password = pass;
            }
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(E2eError::Config("base_url must not be empty".to_string()));
        }
        if self.profiles.is_empty() {
            return Err(E2eError::Config("at least one profile is required".to_string()));
        }

        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.key.as_str()) {
                return Err(E2eError::Config(format!("duplicate profile key '{}'", profile.key)));
            }
            if profile.username.is_empty() || profile.password.is_empty() {
                return Err(E2eError::Config(format!(
                    "profile '{}' is missing credentials",
                    profile.key
                )));
            }
        }

        let t = &self.timeouts;
        if [t.navigation_ms, t.element_ms, t.login_ms, t.probe_ms, t.deletion_ms, t.step_ms]
            .contains(&0)
        {
            return Err(E2eError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Join a path onto the base URL
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter.clone()));

    let result = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    // A subscriber installed earlier (e.g. by another test) wins.
    let _ = result;
}
