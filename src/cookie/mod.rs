//! Cookie storage seam.
//!
//! A [`CookieJar`] only offers whole-value reads and writes, the same
//! guarantees a browser gives `document.cookie`. Anything smarter (locking,
//! read-modify-write) is built on top by the session cookie store.

mod file_jar;
mod memory_jar;

pub use file_jar::FileCookieJar;
pub use memory_jar::MemoryCookieJar;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// How a cookie is written. Passed through from configuration untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieOptions {
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub cross_site: bool,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Whole-value cookie storage shared between tabs.
pub trait CookieJar {
    /// Returns the current value, or `None` when absent or expired.
    fn get(&self, name: &str) -> Option<String>;

    /// Replaces the value. A zero `max_age_ms` deletes the cookie.
    fn set(&self, name: &str, value: &str, max_age_ms: u64, options: &CookieOptions);
}

/// A cookie as kept by the in-process and file-backed jars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub value: String,
    pub expires_at_ms: u64,
    #[serde(default)]
    pub options: CookieOptions,
}

impl StoredCookie {
    pub fn new(value: &str, now_ms: u64, max_age_ms: u64, options: &CookieOptions) -> Self {
        Self {
            value: value.to_string(),
            expires_at_ms: now_ms + max_age_ms,
            options: options.clone(),
        }
    }

    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// Renders the `Set-Cookie` string a browser would receive for this write.
pub fn format_set_cookie(
    name: &str,
    value: &str,
    now_ms: u64,
    max_age_ms: u64,
    options: &CookieOptions,
) -> String {
    let expires_at = (now_ms + max_age_ms) as i64;
    let expires = Utc
        .timestamp_millis_opt(expires_at)
        .single()
        .unwrap_or_else(Utc::now)
        .format("%a, %d %b %Y %H:%M:%S GMT");
    let same_site = if options.cross_site { "none" } else { "strict" };
    let domain = options
        .domain
        .as_deref()
        .map(|domain| format!(";domain={}", domain))
        .unwrap_or_default();
    let secure = if options.secure { ";secure" } else { "" };
    format!(
        "{}={};expires={};path=/;samesite={}{}{}",
        name, value, expires, same_site, domain, secure
    )
}

/// Extracts `name`'s value from a `Cookie` request header.
pub fn find_cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Site a cookie should be scoped to so every subdomain shares it.
///
/// Keeps the last two labels of the host name; IP addresses and single-label
/// hosts are returned unchanged.
pub fn current_site(hostname: &str) -> String {
    let hostname = hostname.trim_end_matches('.');
    if hostname.parse::<std::net::IpAddr>().is_ok() {
        return hostname.to_string();
    }
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() <= 2 {
        return hostname.to_string();
    }
    labels[labels.len() - 2..].join(".")
}

#[cfg(test)]
#[path = "tests/cookie_tests.rs"]
mod tests;
