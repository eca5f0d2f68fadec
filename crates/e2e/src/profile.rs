//! Credential profiles

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::SuiteConfig;
use crate::error::{E2eError, E2eResult};

/// A named credential set used to log in to the application
#[derive(Clone, Serialize, Deserialize)]
pub struct Profile {
    pub key: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub display_name: String,
}

impl Profile {
    pub fn new(
        key: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            username: username.into(),
            password: password.into(),
            display_name: String::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("key", &self.key)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Read-only registry of profiles for a run
#[derive(Debug, Clone, Default)]
pub struct Profiles {
    by_key: HashMap<String, Profile>,
}

impl Profiles {
    pub fn new(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            by_key: profiles.into_iter().map(|p| (p.key.clone(), p)).collect(),
        }
    }

    pub fn from_config(config: &SuiteConfig) -> Self {
        Self::new(config.profiles.iter().cloned())
    }

    pub fn get(&self, key: &str) -> E2eResult<&Profile> {
        self.by_key
            .get(key)
            .ok_or_else(|| E2eError::UnknownProfile(key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
