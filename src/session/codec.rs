//! Cookie value codec: `key1=value1&key2=value2`.
//!
//! Decoding is permissive. Foreign or truncated cookie values never fail,
//! unmatched segments are dropped and anything implausible decodes to the
//! empty state.

use super::state::SessionState;
use regex::Regex;
use std::sync::OnceLock;

const SESSION_ENTRY_SEPARATOR: char = '&';

fn entry_regex() -> &'static Regex {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    ENTRY.get_or_init(|| Regex::new(r"^([a-z]+)=([a-z0-9-]+)$").expect("valid entry regex"))
}

pub fn encode(state: &SessionState) -> String {
    state
        .entries()
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn decode(raw: Option<&str>) -> SessionState {
    let mut state = SessionState::default();
    let Some(raw) = raw.filter(|raw| is_plausible_session_string(raw)) else {
        return state;
    };

    for entry in raw.split(SESSION_ENTRY_SEPARATOR) {
        if let Some(captures) = entry_regex().captures(entry) {
            state.set(&captures[1], &captures[2]);
        }
    }
    state
}

fn is_plausible_session_string(raw: &str) -> bool {
    raw.contains(SESSION_ENTRY_SEPARATOR) || entry_regex().is_match(raw)
}
