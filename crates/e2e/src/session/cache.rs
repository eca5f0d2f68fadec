//! Session cache manager
//!
//! Hands out verified sessions per profile while keeping live logins to a
//! minimum. Per profile the cache walks a small state machine:
//!
//! ```text
//! Unknown --probe ok--> Valid
//! Unknown --probe fail--> Invalid --login--> Valid
//! Valid --verification ttl elapses--> Unknown
//! ```
//!
//! The persisted state on disk is shared with other workers and read
//! optimistically: anything unreadable is treated as a miss.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::auth::{Authenticator, LogoutMethod};
use super::store::{PersistedState, SessionStore};
use crate::config::SuiteConfig;
use crate::driver::{BrowserDriver, BrowserLauncher};
use crate::error::{E2eError, E2eResult, FailureReason};
use crate::profile::Profiles;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationResult {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// How `acquire` produced a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireOutcome {
    /// Fresh persisted state, trusted without a probe
    Reused,
    /// Persisted state passed the liveness probe
    Verified,
    /// A live login was performed
    LoggedIn,
}

/// Cached authentication state of one profile
#[derive(Debug, Clone)]
pub struct SessionRecord {
    profile_key: String,
    state_blob: Vec<u8>,
    persisted_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    verification_result: VerificationResult,
}

impl SessionRecord {
    fn new(profile_key: &str) -> Self {
        Self {
            profile_key: profile_key.to_string(),
            state_blob: Vec::new(),
            persisted_at: None,
            verified_at: None,
            verification_result: VerificationResult::Unknown,
        }
    }

    pub fn profile_key(&self) -> &str {
        &self.profile_key
    }

    pub fn state_blob(&self) -> &[u8] {
        &self.state_blob
    }

    pub fn persisted_at(&self) -> Option<DateTime<Utc>> {
        self.persisted_at
    }

    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        self.verified_at
    }

    pub fn verification_result(&self) -> VerificationResult {
        self.verification_result
    }
}

#[derive(Debug, Clone, Copy)]
struct VerificationEntry {
    result: VerificationResult,
    at: DateTime<Utc>,
}

/// Expiry and timeout knobs for the cache
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Persisted state older than this is re-verified
    pub max_age: Duration,
    /// How long a verification result is trusted
    pub verification_ttl: Duration,
    pub probe_timeout: Duration,
    pub login_timeout: Duration,
    pub logout_timeout: Duration,
}

impl CachePolicy {
    pub fn from_config(config: &SuiteConfig) -> Self {
        Self {
            max_age: config.session.max_age(),
            verification_ttl: config.session.verification_ttl(),
            probe_timeout: config.timeouts.probe(),
            login_timeout: config.timeouts.login(),
            logout_timeout: config.timeouts.step(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    logins: AtomicU64,
    probes: AtomicU64,
    reuses: AtomicU64,
    corrupt_states: AtomicU64,
}

/// Snapshot of cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub logins: u64,
    pub probes: u64,
    pub reuses: u64,
    pub corrupt_states: u64,
}

/// A live, verified session handed to a test
pub struct SessionHandle {
    profile_key: String,
    driver: Box<dyn BrowserDriver>,
    outcome: AcquireOutcome,
    acquired_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn profile_key(&self) -> &str {
        &self.profile_key
    }

    pub fn outcome(&self) -> AcquireOutcome {
        self.outcome
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn driver(&mut self) -> &mut dyn BrowserDriver {
        self.driver.as_mut()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("profile_key", &self.profile_key)
            .field("outcome", &self.outcome)
            .field("acquired_at", &self.acquired_at)
            .finish_non_exhaustive()
    }
}

/// Per-run session cache, shared between workers behind an `Arc`
pub struct SessionCache {
    profiles: Profiles,
    store: Arc<dyn SessionStore>,
    launcher: Arc<dyn BrowserLauncher>,
    authenticator: Arc<dyn Authenticator>,
    policy: CachePolicy,
    /// One record per profile key
    records: Mutex<HashMap<String, SessionRecord>>,
    /// Keyed by store location; an optimisation only
    verified: Mutex<HashMap<String, VerificationEntry>>,
    counters: CacheCounters,
}

impl SessionCache {
    pub fn new(
        profiles: Profiles,
        store: Arc<dyn SessionStore>,
        launcher: Arc<dyn BrowserLauncher>,
        authenticator: Arc<dyn Authenticator>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            profiles,
            store,
            launcher,
            authenticator,
            policy,
            records: Mutex::new(HashMap::new()),
            verified: Mutex::new(HashMap::new()),
            counters: CacheCounters::default(),
        }
    }

    /// Produce a verified session for `profile_key`.
    ///
    /// Only a failed live login (or an unknown profile) is an error; every
    /// problem with cached state is recovered by logging in again.
    pub async fn acquire(&self, profile_key: &str) -> E2eResult<SessionHandle> {
        let profile = self.profiles.get(profile_key)?.clone();
        let location = self.store.location(profile_key);

        let persisted = match self.store.load(profile_key).await {
            Ok(state) => state,
            Err(e) => {
                self.note_corruption(profile_key, &e);
                self.discard(profile_key, &location).await;
                None
            }
        };

        let mut should_verify = match &persisted {
            None => true,
            Some(state) => self.is_stale(state) || !self.verification_fresh(&location),
        };

        let mut restored = None;
        if let Some(state) = &persisted {
            match self.launcher.launch(Some(&state.bytes)).await {
                Ok(driver) => {
                    self.adopt(profile_key, state);
                    restored = Some(driver);
                }
                Err(e) => {
                    self.note_corruption(profile_key, &e);
                    self.discard(profile_key, &location).await;
                    should_verify = true;
                }
            }
        }

        let from_state = restored.is_some();
        let mut driver = match restored {
            Some(driver) => driver,
            None => self
                .launcher
                .launch(None)
                .await
                .map_err(|e| acquisition_error(profile_key, e.to_string()))?,
        };

        if !should_verify {
            self.counters.reuses.fetch_add(1, Ordering::Relaxed);
            debug!(profile = profile_key, "Reusing cached session");
            return Ok(self.handle(profile_key, driver, AcquireOutcome::Reused));
        }

        if from_state {
            self.counters.probes.fetch_add(1, Ordering::Relaxed);
            let probe = tokio::time::timeout(
                self.policy.probe_timeout,
                self.authenticator.probe(driver.as_mut()),
            )
            .await;
            match probe {
                Ok(Ok(())) => {
                    self.mark(profile_key, &location, VerificationResult::Valid);
                    info!(profile = profile_key, "Cached session verified");
                    return Ok(self.handle(profile_key, driver, AcquireOutcome::Verified));
                }
                Ok(Err(e)) => warn!(profile = profile_key, "Liveness probe failed: {}", e),
                Err(_) => warn!(
                    profile = profile_key,
                    "Liveness probe timed out after {} ms",
                    self.policy.probe_timeout.as_millis()
                ),
            }
            self.mark(profile_key, &location, VerificationResult::Invalid);
        }

        self.counters.logins.fetch_add(1, Ordering::Relaxed);
        info!(profile = profile_key, "Performing live login");
        let login = tokio::time::timeout(
            self.policy.login_timeout,
            self.authenticator.login(driver.as_mut(), &profile),
        )
        .await;

        let failure = match login {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "login timed out after {} ms",
                self.policy.login_timeout.as_millis()
            )),
        };
        if let Some(reason) = failure {
            if let Err(e) = driver.close().await {
                debug!(profile = profile_key, "Closing failed context: {}", e);
            }
            return Err(acquisition_error(profile_key, reason));
        }

        self.mark(profile_key, &location, VerificationResult::Valid);
        if let Err(reason) = self.persist(profile_key, driver.as_mut()).await {
            // The live session is still good; the next acquisition just
            // won't find it on disk.
            warn!(profile = profile_key, "Could not persist fresh session: {}", reason);
        }

        Ok(self.handle(profile_key, driver, AcquireOutcome::LoggedIn))
    }

    /// Persist the session's current state and close its context.
    ///
    /// Both parts are always attempted; failures are logged and returned
    /// as a value, never raised.
    pub async fn release(&self, handle: SessionHandle) -> Result<(), FailureReason> {
        let SessionHandle {
            profile_key,
            mut driver,
            ..
        } = handle;

        let persisted = self.persist(&profile_key, driver.as_mut()).await;
        if let Err(reason) = &persisted {
            warn!(profile = %profile_key, "Failed to persist session on release: {}", reason);
        }

        let closed = close_driver(&profile_key, driver.as_mut()).await;
        persisted.and(closed)
    }

    /// Log the session out (API first, UI fallback), drop its cached state
    /// and close the context
    pub async fn logout(&self, handle: SessionHandle) -> Result<LogoutMethod, FailureReason> {
        let SessionHandle {
            profile_key,
            mut driver,
            ..
        } = handle;

        let result = match tokio::time::timeout(
            self.policy.logout_timeout,
            self.authenticator.logout(driver.as_mut()),
        )
        .await
        {
            Ok(Ok(method)) => {
                info!(profile = %profile_key, "Logged out via {:?}", method);
                Ok(method)
            }
            Ok(Err(e)) => Err(FailureReason::from_error("logout", &e)),
            Err(_) => Err(FailureReason::new(
                "logout",
                format!("timed out after {} ms", self.policy.logout_timeout.as_millis()),
            )),
        };
        if let Err(reason) = &result {
            warn!(profile = %profile_key, "Logout failed: {}", reason);
        }

        // Whatever happened server-side, the stored state can't be trusted now.
        self.invalidate(&profile_key).await;

        let closed = close_driver(&profile_key, driver.as_mut()).await;
        result.and_then(|method| closed.map(|_| method))
    }

    /// Mark a profile's session invalid and remove its persisted state
    pub async fn invalidate(&self, profile_key: &str) {
        let location = self.store.location(profile_key);
        self.mark(profile_key, &location, VerificationResult::Invalid);
        if let Err(e) = self.store.remove(profile_key).await {
            warn!(profile = profile_key, "Failed to remove persisted state: {}", e);
        }
    }

    /// Current verification state, with expiry applied
    pub fn state(&self, profile_key: &str) -> VerificationResult {
        let location = self.store.location(profile_key);
        match self.verified.lock().get(&location) {
            Some(entry) if entry.result == VerificationResult::Valid && !self.expired(entry) => {
                VerificationResult::Valid
            }
            Some(entry) if entry.result == VerificationResult::Invalid => {
                VerificationResult::Invalid
            }
            _ => VerificationResult::Unknown,
        }
    }

    pub fn record(&self, profile_key: &str) -> Option<SessionRecord> {
        self.records.lock().get(profile_key).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            logins: self.counters.logins.load(Ordering::Relaxed),
            probes: self.counters.probes.load(Ordering::Relaxed),
            reuses: self.counters.reuses.load(Ordering::Relaxed),
            corrupt_states: self.counters.corrupt_states.load(Ordering::Relaxed),
        }
    }

    fn handle(
        &self,
        profile_key: &str,
        driver: Box<dyn BrowserDriver>,
        outcome: AcquireOutcome,
    ) -> SessionHandle {
        SessionHandle {
            profile_key: profile_key.to_string(),
            driver,
            outcome,
            acquired_at: Utc::now(),
        }
    }

    fn is_stale(&self, state: &PersistedState) -> bool {
        age(state.modified_at) > self.policy.max_age
    }

    fn expired(&self, entry: &VerificationEntry) -> bool {
        age(entry.at) > self.policy.verification_ttl
    }

    fn verification_fresh(&self, location: &str) -> bool {
        self.verified
            .lock()
            .get(location)
            .map(|entry| entry.result == VerificationResult::Valid && !self.expired(entry))
            .unwrap_or(false)
    }

    fn mark(&self, profile_key: &str, location: &str, result: VerificationResult) {
        let now = Utc::now();
        self.verified
            .lock()
            .insert(location.to_string(), VerificationEntry { result, at: now });

        let mut records = self.records.lock();
        let record = records
            .entry(profile_key.to_string())
            .or_insert_with(|| SessionRecord::new(profile_key));
        record.verification_result = result;
        if result == VerificationResult::Valid {
            record.verified_at = Some(now);
        }
    }

    /// Take over a blob read from storage as the profile's record
    fn adopt(&self, profile_key: &str, state: &PersistedState) {
        let mut records = self.records.lock();
        let record = records
            .entry(profile_key.to_string())
            .or_insert_with(|| SessionRecord::new(profile_key));
        record.state_blob = state.bytes.clone();
        record.persisted_at = Some(state.modified_at);
    }

    async fn persist(
        &self,
        profile_key: &str,
        driver: &mut dyn BrowserDriver,
    ) -> Result<(), FailureReason> {
        let blob = driver
            .save_state()
            .await
            .map_err(|e| FailureReason::from_error("save_state", &e))?;
        let persisted_at = self
            .store
            .save(profile_key, &blob)
            .await
            .map_err(|e| FailureReason::from_error("persist_state", &e))?;

        let mut records = self.records.lock();
        let record = records
            .entry(profile_key.to_string())
            .or_insert_with(|| SessionRecord::new(profile_key));
        record.state_blob = blob;
        record.persisted_at = Some(persisted_at);
        Ok(())
    }

    async fn discard(&self, profile_key: &str, location: &str) {
        self.verified.lock().remove(location);
        self.records.lock().remove(profile_key);
        if let Err(e) = self.store.remove(profile_key).await {
            warn!(profile = profile_key, "Failed to discard persisted state: {}", e);
        }
    }

    fn note_corruption(&self, profile_key: &str, err: &E2eError) {
        self.counters.corrupt_states.fetch_add(1, Ordering::Relaxed);
        warn!(profile = profile_key, "Discarding unusable session state: {}", err);
    }
}

async fn close_driver(
    profile_key: &str,
    driver: &mut dyn BrowserDriver,
) -> Result<(), FailureReason> {
    driver.close().await.map_err(|e| {
        warn!(profile = profile_key, "Failed to close browser context: {}", e);
        FailureReason::from_error("close_context", &e)
    })
}

fn acquisition_error(profile_key: &str, reason: String) -> E2eError {
    E2eError::SessionAcquisition {
        profile: profile_key.to_string(),
        reason,
    }
}

/// Time elapsed since `at`; timestamps in the future count as fresh
fn age(at: DateTime<Utc>) -> Duration {
    (Utc::now() - at).to_std().unwrap_or(Duration::ZERO)
}
