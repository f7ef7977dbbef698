//! The per-tab session state machine.
//!
//! A [`SessionStore`] keeps an in-memory cache of the session it last agreed
//! on with the cookie and reconciles it every time the cookie is accessed.
//! The cookie is the source of truth: when another tab renewed, cleared or
//! retyped the session, this tab expires its cache and notifies
//! [`SessionStore::expire_observable`]. A tracked session that appears in an
//! empty cache notifies [`SessionStore::renew_observable`].
//!
//! Session states as seen by a tab:
//! - tracked: the session has an id and follows the user's activity
//! - not tracked: no id, but the tracking decision is kept and expanded
//! - inactive: nothing in the cookie, or an expired session, waiting for
//!   activity to renew it

use super::cookie_store::{SessionCookieStore, SessionOperation};
use super::state::{
    is_active_session, validate_product_key, SessionState, COOKIE_ACCESS_DELAY,
};
use super::tracking::TrackingStrategy;
use crate::cookie::{CookieJar, CookieOptions};
use crate::error::ConfigError;
use crate::event_loop::{EventLoop, TimerId};
use crate::monitoring::MonitoringSink;
use crate::observable::Observable;
use crate::throttle::Throttle;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

pub const SESSION_INCONSISTENCIES_MESSAGE: &str = "Session inconsistencies detected";

/// What a tab decides for itself.
pub struct SessionStoreOptions {
    pub cookie: CookieOptions,
    /// Key under which this product stores its tracking type.
    pub product_key: String,
    pub strategy: Box<dyn TrackingStrategy>,
    /// Run cookie accesses through the lock protocol.
    pub lock_enabled: bool,
}

/// What a tab is given by its host.
pub struct SessionEnv {
    pub jar: Rc<dyn CookieJar>,
    pub event_loop: EventLoop,
    pub monitoring: Rc<dyn MonitoringSink>,
}

struct Inner {
    cookies: SessionCookieStore,
    event_loop: EventLoop,
    product_key: String,
    strategy: Box<dyn TrackingStrategy>,
    monitoring: Rc<dyn MonitoringSink>,
    cache: RefCell<SessionState>,
    renew: Observable<()>,
    expire: Observable<()>,
    watcher: Cell<Option<TimerId>>,
}

impl Inner {
    fn now_ms(&self) -> u64 {
        self.cookies.now_ms()
    }

    fn expand_or_renew_session(self: &Rc<Self>) {
        let is_tracked = Rc::new(Cell::new(false));

        let process = {
            let weak = Rc::downgrade(self);
            let is_tracked = Rc::clone(&is_tracked);
            move |cookie: SessionState| {
                let inner = weak.upgrade()?;
                let mut synchronized = inner.synchronize_session(cookie);
                is_tracked.set(inner.expand_or_renew_cookie(&mut synchronized));
                Some(synchronized)
            }
        };
        let after = {
            let weak = Rc::downgrade(self);
            move |cookie: SessionState| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if is_tracked.get() && !inner.has_session_in_cache() {
                    inner.renew_session(cookie);
                } else {
                    inner.set_cache(cookie);
                }
            }
        };

        self.cookies
            .with_locked_access(SessionOperation::new(process).with_after(after));
    }

    fn expand_session(self: &Rc<Self>) {
        let process = {
            let weak = Rc::downgrade(self);
            move |cookie: SessionState| {
                let inner = weak.upgrade()?;
                if !inner.has_session_in_cache() {
                    return None;
                }
                Some(inner.synchronize_session(cookie))
            }
        };
        let after = {
            let weak = Rc::downgrade(self);
            move |cookie: SessionState| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.has_session_in_cache() && inner.is_cached_session(&cookie) {
                    inner.set_cache(cookie);
                }
            }
        };

        self.cookies
            .with_locked_access(SessionOperation::new(process).with_after(after));
    }

    fn watch_session(self: &Rc<Self>) {
        let process = {
            let weak = Rc::downgrade(self);
            move |cookie: SessionState| {
                let inner = weak.upgrade()?;
                (!is_active_session(&cookie, inner.now_ms())).then(SessionState::default)
            }
        };
        let after = {
            let weak = Rc::downgrade(self);
            move |cookie: SessionState| {
                if let Some(inner) = weak.upgrade() {
                    inner.synchronize_session(cookie);
                }
            }
        };

        self.cookies
            .with_locked_access(SessionOperation::new(process).with_after(after));
    }

    /// Reconciles the cache with `cookie` and returns the cookie state to
    /// keep, which is empty when the cookie session is no longer active.
    fn synchronize_session(&self, cookie: SessionState) -> SessionState {
        let cookie = if is_active_session(&cookie, self.now_ms()) {
            cookie
        } else {
            SessionState::default()
        };
        if self.has_session_in_cache() {
            if self.is_session_in_cache_outdated(&cookie) {
                self.expire_session();
            } else {
                self.set_cache(cookie.clone());
            }
        }
        cookie
    }

    /// Applies the tracking decision to `cookie`, minting an id for a
    /// tracked session that has none. Returns whether it is tracked.
    fn expand_or_renew_cookie(&self, cookie: &mut SessionState) -> bool {
        let decision = self.strategy.compute(cookie.get(&self.product_key));
        cookie.set(&self.product_key, decision.tracking_type);
        if decision.is_tracked && cookie.id.is_none() {
            cookie.id = Some(uuid::Uuid::new_v4().to_string());
            cookie.created = Some(self.now_ms().to_string());
        }
        decision.is_tracked
    }

    fn has_session_in_cache(&self) -> bool {
        self.cache.borrow().get(&self.product_key).is_some()
    }

    fn is_cached_session(&self, cookie: &SessionState) -> bool {
        let cache = self.cache.borrow();
        cache.id == cookie.id && cache.get(&self.product_key) == cookie.get(&self.product_key)
    }

    fn is_session_in_cache_outdated(&self, cookie: &SessionState) -> bool {
        let cache = self.cache.borrow().clone();
        if cache.id != cookie.id {
            // A missing cookie id is an expiry, and an inactive cache means
            // another tab renewed before this one noticed.
            if cookie.id.is_some() && is_active_session(&cache, self.now_ms()) {
                self.report_inconsistency(&cache, cookie, "different id");
            }
            return true;
        }
        if cache.get(&self.product_key) != cookie.get(&self.product_key) {
            self.report_inconsistency(&cache, cookie, "different tracking type");
            return true;
        }
        false
    }

    fn report_inconsistency(&self, cache: &SessionState, cookie: &SessionState, cause: &str) {
        tracing::warn!(
            product_key = %self.product_key,
            cause,
            "{}",
            SESSION_INCONSISTENCIES_MESSAGE
        );
        self.monitoring.add_message(
            SESSION_INCONSISTENCIES_MESSAGE,
            json!({
                "debug": {
                    "productKey": self.product_key,
                    "sessionCache": cache,
                    "cookieSession": cookie,
                    "cause": cause,
                }
            }),
        );
    }

    fn set_cache(&self, state: SessionState) {
        *self.cache.borrow_mut() = state.unlocked();
    }

    fn expire_session(&self) {
        tracing::debug!(product_key = %self.product_key, "session expired");
        self.set_cache(SessionState::default());
        self.expire.notify(&());
    }

    fn renew_session(&self, cookie: SessionState) {
        tracing::debug!(product_key = %self.product_key, id = ?cookie.id, "session renewed");
        self.set_cache(cookie);
        self.renew.notify(&());
    }
}

/// One tab's view of the shared session.
///
/// Dropping the store stops its watcher. Accesses already waiting on the
/// cookie lock still run to completion so the lock is always released.
pub struct SessionStore {
    inner: Rc<Inner>,
    throttle: Throttle,
}

impl SessionStore {
    /// Loads the active session from the cookie, if any, and starts watching
    /// the cookie every [`COOKIE_ACCESS_DELAY`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidProductKey`] when the product key is not
    /// a lowercase ASCII word or collides with a reserved session field.
    pub fn start(options: SessionStoreOptions, env: SessionEnv) -> Result<Self, ConfigError> {
        validate_product_key(&options.product_key)?;
        let cookies = SessionCookieStore::new(
            env.jar,
            options.cookie,
            env.event_loop.clone(),
            options.lock_enabled,
        );
        let cache = retrieve_active_session(&cookies);

        let inner = Rc::new(Inner {
            cookies,
            event_loop: env.event_loop.clone(),
            product_key: options.product_key,
            strategy: options.strategy,
            monitoring: env.monitoring,
            cache: RefCell::new(cache),
            renew: Observable::new(),
            expire: Observable::new(),
            watcher: Cell::new(None),
        });

        let weak: Weak<Inner> = Rc::downgrade(&inner);
        let watcher = env.event_loop.set_interval(COOKIE_ACCESS_DELAY, move || {
            if let Some(inner) = weak.upgrade() {
                inner.watch_session();
            }
        });
        inner.watcher.set(Some(watcher));

        let weak = Rc::downgrade(&inner);
        let throttle = Throttle::new(env.event_loop, COOKIE_ACCESS_DELAY, move || {
            if let Some(inner) = weak.upgrade() {
                inner.expand_or_renew_session();
            }
        });

        tracing::debug!(
            product_key = %inner.product_key,
            lock = inner.cookies.is_lock_enabled(),
            "session store started"
        );
        Ok(Self { inner, throttle })
    }

    /// Extends the current session, or starts a new one when there is none.
    /// Calls are throttled to one per [`COOKIE_ACCESS_DELAY`], with a
    /// trailing call for activity inside the window.
    pub fn expand_or_renew_session(&self) {
        self.throttle.call();
    }

    /// Extends the cached session without ever starting a new one.
    pub fn expand_session(&self) {
        self.inner.expand_session();
    }

    /// One watcher tick: clears an inactive cookie and reconciles the cache.
    pub fn watch_session(&self) {
        self.inner.watch_session();
    }

    /// The cached session. Empty when this tab has no session.
    pub fn get_session(&self) -> SessionState {
        self.inner.cache.borrow().clone()
    }

    pub fn product_key(&self) -> &str {
        &self.inner.product_key
    }

    pub fn renew_observable(&self) -> &Observable<()> {
        &self.inner.renew
    }

    pub fn expire_observable(&self) -> &Observable<()> {
        &self.inner.expire
    }

    /// Stops the watcher, drops any pending throttled call and every
    /// renew/expire subscription.
    pub fn stop(&self) {
        self.halt();
        self.inner.renew.unsubscribe_all();
        self.inner.expire.unsubscribe_all();
    }

    fn halt(&self) {
        if let Some(watcher) = self.inner.watcher.take() {
            self.inner.event_loop.clear(watcher);
        }
        self.throttle.cancel();
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.halt();
    }
}

fn retrieve_active_session(cookies: &SessionCookieStore) -> SessionState {
    let session = cookies.retrieve_session();
    if is_active_session(&session, cookies.now_ms()) {
        session.unlocked()
    } else {
        SessionState::default()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
