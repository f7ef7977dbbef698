use super::{find_cookie_value, format_set_cookie, CookieJar, CookieOptions, StoredCookie};
use crate::clock::Clock;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Default)]
struct JarContents {
    cookies: BTreeMap<String, StoredCookie>,
    last_set_cookie: Option<String>,
}

/// In-process cookie jar. Clones share the same cookies, which is how
/// simulated tabs in one process see each other's writes.
#[derive(Clone)]
pub struct MemoryCookieJar {
    contents: Rc<RefCell<JarContents>>,
    clock: Rc<dyn Clock>,
}

impl MemoryCookieJar {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            contents: Rc::new(RefCell::new(JarContents::default())),
            clock,
        }
    }

    /// The `Cookie` header a request would carry right now.
    pub fn cookie_header(&self) -> String {
        let now = self.clock.now_ms();
        self.contents
            .borrow()
            .cookies
            .iter()
            .filter(|(_, cookie)| cookie.is_live(now))
            .map(|(name, cookie)| format!("{}={}", name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// The `Set-Cookie` string produced by the most recent write.
    pub fn last_set_cookie(&self) -> Option<String> {
        self.contents.borrow().last_set_cookie.clone()
    }

    pub fn stored(&self, name: &str) -> Option<StoredCookie> {
        self.contents.borrow().cookies.get(name).cloned()
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        find_cookie_value(&self.cookie_header(), name)
    }

    fn set(&self, name: &str, value: &str, max_age_ms: u64, options: &CookieOptions) {
        let now = self.clock.now_ms();
        let mut contents = self.contents.borrow_mut();
        contents.last_set_cookie = Some(format_set_cookie(name, value, now, max_age_ms, options));
        if max_age_ms == 0 || value.is_empty() {
            contents.cookies.remove(name);
        } else {
            contents
                .cookies
                .insert(name.to_string(), StoredCookie::new(value, now, max_age_ms, options));
        }
    }
}
