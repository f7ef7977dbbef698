use super::*;
use crate::clock::{Clock, ManualClock};
use crate::cookie::MemoryCookieJar;
use crate::monitoring::MemorySink;
use crate::session::codec::decode;
use crate::session::state::{
    SESSION_COOKIE_NAME, SESSION_EXPIRATION_DELAY, SESSION_TIME_OUT_DELAY,
};
use crate::session::tracking::{TrackingDecision, NOT_TRACKED, TRACKED};

const NOW: u64 = 1_700_000_000_000;
const PRODUCT: &str = "logs";

fn always_tracked(_raw: Option<&str>) -> TrackingDecision {
    TrackingDecision::new(TRACKED, true)
}

fn never_tracked(_raw: Option<&str>) -> TrackingDecision {
    TrackingDecision::new(NOT_TRACKED, false)
}

/// Tabs sharing one cookie jar and one event loop.
struct World {
    clock: Rc<ManualClock>,
    event_loop: EventLoop,
    jar: MemoryCookieJar,
}

fn world() -> World {
    let clock = Rc::new(ManualClock::new(NOW));
    let event_loop = EventLoop::with_manual_clock(Rc::clone(&clock));
    let as_clock: Rc<dyn Clock> = clock.clone();
    World {
        clock,
        event_loop,
        jar: MemoryCookieJar::new(as_clock),
    }
}

struct Tab {
    store: SessionStore,
    monitoring: Rc<MemorySink>,
    renewals: Rc<Cell<u32>>,
    expirations: Rc<Cell<u32>>,
}

fn tab(
    world: &World,
    strategy: impl TrackingStrategy + 'static,
    lock_enabled: bool,
) -> Tab {
    let monitoring = Rc::new(MemorySink::new());
    let store = SessionStore::start(
        SessionStoreOptions {
            cookie: CookieOptions::default(),
            product_key: PRODUCT.to_string(),
            strategy: Box::new(strategy),
            lock_enabled,
        },
        SessionEnv {
            jar: Rc::new(world.jar.clone()),
            event_loop: world.event_loop.clone(),
            monitoring: monitoring.clone(),
        },
    )
    .expect("valid product key");

    let renewals = Rc::new(Cell::new(0));
    let expirations = Rc::new(Cell::new(0));
    let counter = Rc::clone(&renewals);
    store
        .renew_observable()
        .subscribe(move |_| counter.set(counter.get() + 1));
    let counter = Rc::clone(&expirations);
    store
        .expire_observable()
        .subscribe(move |_| counter.set(counter.get() + 1));

    Tab {
        store,
        monitoring,
        renewals,
        expirations,
    }
}

fn cookie(world: &World) -> SessionState {
    decode(world.jar.get(SESSION_COOKIE_NAME).as_deref())
}

fn write_cookie(world: &World, value: &str) {
    world.jar.set(
        SESSION_COOKIE_NAME,
        value,
        SESSION_EXPIRATION_DELAY,
        &CookieOptions::default(),
    );
}

#[test]
fn test_fresh_tab_tracked_renews_once() {
    for lock_enabled in [false, true] {
        let world = world();
        let tab = tab(&world, always_tracked, lock_enabled);
        assert!(tab.store.get_session().is_empty());

        tab.store.expand_or_renew_session();

        let stored = cookie(&world);
        assert!(stored.id.is_some());
        assert_eq!(stored.created.as_deref(), Some(NOW.to_string().as_str()));
        assert_eq!(
            stored.expire,
            Some((NOW + SESSION_EXPIRATION_DELAY).to_string())
        );
        assert_eq!(stored.get(PRODUCT), Some(TRACKED));
        assert_eq!(stored.lock, None);
        assert_eq!(tab.renewals.get(), 1);
        assert_eq!(tab.store.get_session(), stored);
    }
}

#[test]
fn test_not_tracked_session_has_no_id() {
    let world = world();
    let tab = tab(&world, never_tracked, true);

    tab.store.expand_or_renew_session();

    let stored = cookie(&world);
    assert_eq!(stored.id, None);
    assert_eq!(stored.created, None);
    assert_eq!(stored.get(PRODUCT), Some(NOT_TRACKED));
    assert_eq!(tab.renewals.get(), 0);
    assert_eq!(tab.store.get_session().get(PRODUCT), Some(NOT_TRACKED));
}

#[test]
fn test_expand_or_renew_is_throttled() {
    let world = world();
    let tab = tab(&world, always_tracked, false);

    tab.store.expand_or_renew_session();
    let first = cookie(&world);

    world.event_loop.advance(500);
    tab.store.expand_or_renew_session();
    tab.store.expand_or_renew_session();
    assert_eq!(cookie(&world).expire, first.expire);

    world.event_loop.advance(500);
    let trailing = cookie(&world);
    assert_eq!(trailing.id, first.id);
    assert_eq!(
        trailing.expire,
        Some((NOW + 1_000 + SESSION_EXPIRATION_DELAY).to_string())
    );
    assert_eq!(tab.renewals.get(), 1);
}

#[test]
fn test_expand_session_keeps_identity_and_moves_expire() {
    let world = world();
    let tab = tab(&world, always_tracked, true);
    tab.store.expand_or_renew_session();
    let first = cookie(&world);

    world.clock.advance(5_000);
    tab.store.expand_session();

    let expanded = cookie(&world);
    assert_eq!(expanded.id, first.id);
    assert_eq!(expanded.created, first.created);
    assert_eq!(
        expanded.expire,
        Some((NOW + 5_000 + SESSION_EXPIRATION_DELAY).to_string())
    );
    assert_eq!(tab.store.get_session(), expanded);
    assert_eq!(tab.renewals.get(), 1);
}

#[test]
fn test_expand_session_never_creates_a_session() {
    let world = world();
    let tab = tab(&world, always_tracked, true);

    tab.store.expand_session();

    assert!(world.jar.get(SESSION_COOKIE_NAME).is_none());
    assert!(tab.store.get_session().is_empty());
    assert_eq!(tab.renewals.get(), 0);
}

#[test]
fn test_renewal_by_other_tab_expires_cache_with_diagnostic() {
    let world = world();
    let tab = tab(&world, always_tracked, true);
    tab.store.expand_or_renew_session();
    let first_id = tab.store.get_session().id;

    let expire = NOW + SESSION_EXPIRATION_DELAY;
    write_cookie(
        &world,
        &format!("id=other&created={}&expire={}&logs=1", NOW, expire),
    );
    tab.store.watch_session();

    assert_eq!(tab.expirations.get(), 1);
    assert!(tab.store.get_session().is_empty());

    let messages = tab.monitoring.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message, SESSION_INCONSISTENCIES_MESSAGE);
    let debug = &messages[0].context["debug"];
    assert_eq!(debug["cause"], "different id");
    assert_eq!(debug["productKey"], PRODUCT);
    assert_eq!(debug["cookieSession"]["id"], "other");
    assert_eq!(
        debug["sessionCache"]["id"].as_str(),
        first_id.as_deref()
    );

    // the cookie itself is left to the tab that renewed it
    assert_eq!(cookie(&world).id.as_deref(), Some("other"));
}

#[test]
fn test_tracking_type_change_expires_cache_with_diagnostic() {
    let world = world();
    let tab = tab(&world, always_tracked, false);
    tab.store.expand_or_renew_session();
    let mut changed = cookie(&world);
    changed.set(PRODUCT, NOT_TRACKED);
    write_cookie(&world, &crate::session::codec::encode(&changed));

    tab.store.watch_session();

    assert_eq!(tab.expirations.get(), 1);
    let messages = tab.monitoring.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].context["debug"]["cause"],
        "different tracking type"
    );
}

#[test]
fn test_cleared_cookie_expires_cache_silently() {
    let world = world();
    let tab = tab(&world, always_tracked, true);
    tab.store.expand_or_renew_session();

    world
        .jar
        .set(SESSION_COOKIE_NAME, "", 0, &CookieOptions::default());
    tab.store.watch_session();

    assert_eq!(tab.expirations.get(), 1);
    assert!(tab.monitoring.messages().is_empty());
}

#[test]
fn test_watcher_clears_expired_cookie() {
    let world = world();
    let tab = tab(&world, always_tracked, true);
    tab.store.expand_or_renew_session();

    world.event_loop.advance(SESSION_EXPIRATION_DELAY - 1_000);
    assert_eq!(tab.expirations.get(), 0);
    assert!(cookie(&world).id.is_some());

    world.event_loop.advance(1_000);
    assert_eq!(tab.expirations.get(), 1);
    assert!(world.jar.get(SESSION_COOKIE_NAME).is_none());
    assert!(tab.store.get_session().is_empty());

    world.event_loop.advance(10_000);
    assert_eq!(tab.expirations.get(), 1);
}

#[test]
fn test_watcher_clears_timed_out_session() {
    let world = world();
    let created = NOW - SESSION_TIME_OUT_DELAY + 1_000;
    let expire = NOW + SESSION_EXPIRATION_DELAY;
    write_cookie(
        &world,
        &format!("id=old&created={}&expire={}&logs=1", created, expire),
    );
    let tab = tab(&world, always_tracked, false);
    assert_eq!(tab.store.get_session().id.as_deref(), Some("old"));

    world.event_loop.advance(1_000);

    assert_eq!(tab.expirations.get(), 1);
    assert!(world.jar.get(SESSION_COOKIE_NAME).is_none());
}

#[test]
fn test_new_activity_after_expiry_mints_new_id() {
    let world = world();
    let tab = tab(&world, always_tracked, true);
    tab.store.expand_or_renew_session();
    let first_id = tab.store.get_session().id;

    world
        .jar
        .set(SESSION_COOKIE_NAME, "", 0, &CookieOptions::default());
    world.event_loop.advance(1_000);
    assert_eq!(tab.expirations.get(), 1);

    tab.store.expand_or_renew_session();
    let second_id = tab.store.get_session().id;
    assert!(second_id.is_some());
    assert_ne!(second_id, first_id);
    assert_eq!(tab.renewals.get(), 2);
}

#[test]
fn test_contended_lock_is_retried_until_released() {
    let world = world();
    write_cookie(&world, "lock=someone-else");
    let tab = tab(&world, always_tracked, true);
    assert!(tab.store.get_session().is_empty());

    tab.store.expand_or_renew_session();
    world.event_loop.advance(5);
    assert_eq!(tab.renewals.get(), 0);
    assert_eq!(cookie(&world).lock.as_deref(), Some("someone-else"));

    world
        .jar
        .set(SESSION_COOKIE_NAME, "", 0, &CookieOptions::default());
    world.event_loop.advance(1);

    let stored = cookie(&world);
    assert!(stored.id.is_some());
    assert_eq!(stored.lock, None);
    assert_eq!(tab.renewals.get(), 1);
}

#[test]
fn test_two_tabs_share_one_session() {
    let world = world();
    let first = tab(&world, always_tracked, true);
    let second = tab(&world, always_tracked, true);

    first.store.expand_or_renew_session();
    second.store.expand_or_renew_session();

    let id = cookie(&world).id;
    assert!(id.is_some());
    assert_eq!(first.store.get_session().id, id);
    assert_eq!(second.store.get_session().id, id);
    assert_eq!(first.renewals.get(), 1);
    assert_eq!(second.renewals.get(), 1);

    world.event_loop.advance(5_000);
    assert_eq!(first.expirations.get(), 0);
    assert_eq!(second.expirations.get(), 0);
    assert!(first.monitoring.messages().is_empty());
}

#[test]
fn test_stop_releases_timers_and_subscribers() {
    let world = world();
    let tab = tab(&world, always_tracked, false);
    tab.store.expand_or_renew_session();
    tab.store.expand_or_renew_session();
    assert_eq!(world.event_loop.pending(), 2);

    tab.store.stop();

    assert_eq!(world.event_loop.pending(), 0);
    assert_eq!(tab.store.renew_observable().subscriber_count(), 0);
    assert_eq!(tab.store.expire_observable().subscriber_count(), 0);

    world
        .jar
        .set(SESSION_COOKIE_NAME, "", 0, &CookieOptions::default());
    world.event_loop.advance(5_000);
    assert_eq!(tab.expirations.get(), 0);
    assert!(!tab.store.get_session().is_empty());
}

#[test]
fn test_dropping_store_frees_its_state() {
    let world = world();
    let tab = tab(&world, always_tracked, true);
    tab.store.expand_or_renew_session();
    let inner = Rc::downgrade(&tab.store.inner);

    drop(tab);

    assert!(inner.upgrade().is_none());
    assert_eq!(world.event_loop.pending(), 0);
}

#[test]
fn test_start_rejects_unusable_product_keys() {
    let world = world();
    for key in ["lock", "id", "created", "expire", "", "Logs", "logs2", "my-key"] {
        let result = SessionStore::start(
            SessionStoreOptions {
                cookie: CookieOptions::default(),
                product_key: key.to_string(),
                strategy: Box::new(always_tracked),
                lock_enabled: true,
            },
            SessionEnv {
                jar: Rc::new(world.jar.clone()),
                event_loop: world.event_loop.clone(),
                monitoring: Rc::new(MemorySink::new()),
            },
        );
        assert!(
            matches!(&result, Err(ConfigError::InvalidProductKey { key: rejected }) if rejected == key),
            "key {:?}",
            key
        );
    }

    assert_eq!(world.event_loop.pending(), 0);
    assert!(world.jar.get(SESSION_COOKIE_NAME).is_none());
}
