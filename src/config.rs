use crate::cookie::{current_site, CookieOptions};
use crate::error::ConfigError;
use crate::session::state::validate_product_key;
use crate::session::{SampledTracking, SessionStoreOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runs cookie accesses through the cooperative lock protocol.
pub const COOKIE_LOCK_FEATURE: &str = "cookie-lock";

const KNOWN_EXPERIMENTAL_FEATURES: [&str; 1] = [COOKIE_LOCK_FEATURE];

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Key this product owns in the session cookie.
    #[serde(default = "default_product_key")]
    pub product_key: String,
    /// Percentage of new sessions that are tracked.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default)]
    pub use_secure_session_cookie: bool,
    /// Allows the cookie in third-party contexts. Implies a secure cookie.
    #[serde(default)]
    pub use_cross_site_session_cookie: bool,
    /// Scopes the cookie to the site rather than the current host.
    #[serde(default)]
    pub track_session_across_subdomains: bool,
    #[serde(default)]
    pub experimental_features: Vec<String>,
}

fn default_product_key() -> String {
    "logs".to_string()
}

fn default_sample_rate() -> f64 {
    100.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            product_key: default_product_key(),
            sample_rate: default_sample_rate(),
            use_secure_session_cookie: false,
            use_cross_site_session_cookie: false,
            track_session_across_subdomains: false,
            experimental_features: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Loads `path` when it exists, the defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_product_key(&self.product_key)?;

        if !(0.0..=100.0).contains(&self.sample_rate) {
            return Err(ConfigError::InvalidSampleRate {
                rate: self.sample_rate,
            });
        }

        if let Some(name) = self
            .experimental_features
            .iter()
            .find(|name| !KNOWN_EXPERIMENTAL_FEATURES.contains(&name.as_str()))
        {
            return Err(ConfigError::UnknownExperimentalFeature { name: name.clone() });
        }

        Ok(())
    }

    pub fn is_experimental_feature_enabled(&self, name: &str) -> bool {
        self.experimental_features.iter().any(|enabled| enabled == name)
    }

    /// Cookie attributes for a page served from `hostname`.
    pub fn cookie_options(&self, hostname: &str) -> CookieOptions {
        CookieOptions {
            secure: self.use_secure_session_cookie || self.use_cross_site_session_cookie,
            cross_site: self.use_cross_site_session_cookie,
            domain: self
                .track_session_across_subdomains
                .then(|| current_site(hostname)),
        }
    }

    pub fn store_options(&self, hostname: &str) -> SessionStoreOptions {
        SessionStoreOptions {
            cookie: self.cookie_options(hostname),
            product_key: self.product_key.clone(),
            strategy: Box::new(SampledTracking::new(self.sample_rate)),
            lock_enabled: self.is_experimental_feature_enabled(COOKIE_LOCK_FEATURE),
        }
    }
}

#[cfg(test)]
#[path = "tests/session_config_tests.rs"]
mod tests;
