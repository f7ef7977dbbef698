//! The persisted session record and its activity rules.

use crate::error::ConfigError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

pub const ONE_SECOND_MS: u64 = 1_000;
pub const ONE_MINUTE_MS: u64 = 60 * ONE_SECOND_MS;
pub const ONE_HOUR_MS: u64 = 60 * ONE_MINUTE_MS;

/// Sliding expiration window, pushed forward by every persist.
pub const SESSION_EXPIRATION_DELAY: u64 = 15 * ONE_MINUTE_MS;
/// Hard limit on a session's age, regardless of activity.
pub const SESSION_TIME_OUT_DELAY: u64 = 4 * ONE_HOUR_MS;
/// Watcher poll period and throttle window.
pub const COOKIE_ACCESS_DELAY: u64 = ONE_SECOND_MS;
/// Delay before a contended locked access is retried.
pub const LOCK_RETRY_DELAY: u64 = 1;

pub const SESSION_COOKIE_NAME: &str = "_dd_s";

/// Field names with a dedicated slot in [`SessionState`].
pub const RESERVED_KEYS: [&str; 4] = ["id", "created", "expire", "lock"];

/// Accepts the keys a product may own in the session record: lowercase
/// ASCII words that the codec round-trips and that are not reserved fields.
pub fn validate_product_key(key: &str) -> Result<(), ConfigError> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_lowercase()) || RESERVED_KEYS.contains(&key)
    {
        return Err(ConfigError::InvalidProductKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// The session record shared by every tab through the session cookie.
///
/// The empty state is the one and only "no session" value; use
/// [`SessionState::is_empty`] to test for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub id: Option<String>,
    /// Epoch milliseconds at which `id` was minted.
    pub created: Option<String>,
    /// Epoch milliseconds after which the session is expired.
    pub expire: Option<String>,
    /// Token of the tab currently holding the write lock.
    pub lock: Option<String>,
    /// Per-product tracking types and any other key found in the cookie.
    pub tracking: BTreeMap<String, String>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.created.is_none()
            && self.expire.is_none()
            && self.lock.is_none()
            && self.tracking.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "id" => self.id.as_deref(),
            "created" => self.created.as_deref(),
            "expire" => self.expire.as_deref(),
            "lock" => self.lock.as_deref(),
            other => self.tracking.get(other).map(String::as_str),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match key {
            "id" => self.id = value,
            "created" => self.created = value,
            "expire" => self.expire = value,
            "lock" => self.lock = value,
            other => {
                if let Some(value) = value {
                    self.tracking.insert(other.to_string(), value);
                }
            }
        }
    }

    /// Entries in wire order: reserved fields first, then tracking keys.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries = Vec::with_capacity(RESERVED_KEYS.len() + self.tracking.len());
        for key in RESERVED_KEYS {
            if let Some(value) = self.get(key) {
                entries.push((key, value));
            }
        }
        entries.extend(
            self.tracking
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );
        entries
    }

    /// Copy of the state without the lock token.
    pub fn unlocked(&self) -> SessionState {
        SessionState {
            lock: None,
            ..self.clone()
        }
    }
}

impl Serialize for SessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries = self.entries();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

fn parse_timestamp(value: &str) -> Option<u64> {
    value.parse::<u64>().ok()
}

/// Whether `state` is still usable at `now_ms`.
///
/// A session is inactive once it is [`SESSION_TIME_OUT_DELAY`] old or past
/// its `expire` deadline. Missing timestamps never make a session inactive,
/// records written before those fields existed stay valid. Timestamps that
/// are not numbers do.
pub fn is_active_session(state: &SessionState, now_ms: u64) -> bool {
    let within_timeout = match state.created.as_deref() {
        None => true,
        Some(created) => parse_timestamp(created)
            .is_some_and(|created| now_ms.saturating_sub(created) < SESSION_TIME_OUT_DELAY),
    };
    let before_expire = match state.expire.as_deref() {
        None => true,
        Some(expire) => parse_timestamp(expire).is_some_and(|expire| now_ms < expire),
    };
    within_timeout && before_expire
}
