//! Lock-protected access to the session cookie.
//!
//! Cookies have no compare-and-swap, so tabs cooperate through an advisory
//! `lock` field: write a fresh token, read it back, and only act while the
//! cookie still carries that token. Losing a race is not an error. The whole
//! operation is rescheduled after [`LOCK_RETRY_DELAY`] with the same
//! closures, as many times as it takes.

use super::codec::{decode, encode};
use super::state::{
    SessionState, LOCK_RETRY_DELAY, SESSION_COOKIE_NAME, SESSION_EXPIRATION_DELAY,
};
use crate::cookie::{CookieJar, CookieOptions};
use crate::event_loop::EventLoop;
use std::rc::Rc;

pub type ProcessFn = Box<dyn FnMut(SessionState) -> Option<SessionState>>;
pub type AfterFn = Box<dyn FnMut(SessionState)>;

/// A read-modify-write of the session cookie.
///
/// `process` returns the replacement state, or `None` to leave the cookie
/// untouched. `after` receives whichever state is authoritative once the
/// operation completes.
pub struct SessionOperation {
    process: ProcessFn,
    after: Option<AfterFn>,
    attempts: u32,
}

impl SessionOperation {
    pub fn new(process: impl FnMut(SessionState) -> Option<SessionState> + 'static) -> Self {
        Self {
            process: Box::new(process),
            after: None,
            attempts: 0,
        }
    }

    pub fn with_after(mut self, after: impl FnMut(SessionState) + 'static) -> Self {
        self.after = Some(Box::new(after));
        self
    }

    /// Number of attempts started so far, including the current one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Progress of one locked access attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPhase {
    /// Nothing written yet; checking that nobody holds the lock.
    Idle,
    /// Our token was written; checking it survived.
    AcquireAttempted,
    /// The lock is ours; `process` runs next.
    Acquired,
    /// `process` ran; checking the lock was not taken meanwhile.
    Processing,
    /// Writing the processed state.
    Persisting,
    /// Checking the lock once more, then writing the unlocked state.
    Releasing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// `after` has run with this state.
    Completed(SessionState),
    /// A conflict was detected during the given phase; a retry is scheduled.
    Postponed(LockPhase),
}

enum Step {
    Next(LockPhase),
    Postpone,
    Done(SessionState),
}

/// One pass through the lock protocol.
struct LockAttempt<'a> {
    store: &'a SessionCookieStore,
    phase: LockPhase,
    token: String,
    current: SessionState,
    processed: Option<SessionState>,
}

impl LockAttempt<'_> {
    fn run(&mut self, operation: &mut SessionOperation) -> LockOutcome {
        loop {
            match self.step(operation) {
                Step::Next(phase) => {
                    tracing::trace!(from = ?self.phase, to = ?phase, "session lock transition");
                    self.phase = phase;
                }
                Step::Postpone => return LockOutcome::Postponed(self.phase),
                Step::Done(state) => return LockOutcome::Completed(state),
            }
        }
    }

    fn holds_lock(&self, state: &SessionState) -> bool {
        state.lock.as_deref() == Some(self.token.as_str())
    }

    fn step(&mut self, operation: &mut SessionOperation) -> Step {
        match self.phase {
            LockPhase::Idle => {
                self.current = self.store.retrieve_session();
                if self.current.lock.is_some() {
                    return Step::Postpone;
                }
                self.token = uuid::Uuid::new_v4().to_string();
                self.current.lock = Some(self.token.clone());
                self.store.write_session(&self.current);
                Step::Next(LockPhase::AcquireAttempted)
            }
            LockPhase::AcquireAttempted => {
                self.current = self.store.retrieve_session();
                if !self.holds_lock(&self.current) {
                    return Step::Postpone;
                }
                Step::Next(LockPhase::Acquired)
            }
            LockPhase::Acquired => {
                self.processed = (operation.process)(self.current.clone());
                Step::Next(LockPhase::Processing)
            }
            LockPhase::Processing => {
                self.current = self.store.retrieve_session();
                if !self.holds_lock(&self.current) {
                    return Step::Postpone;
                }
                Step::Next(LockPhase::Persisting)
            }
            LockPhase::Persisting => match self.processed.take() {
                Some(processed) if processed.is_empty() => {
                    Step::Done(self.store.persist_session(processed))
                }
                Some(processed) => {
                    self.store.persist_session(processed);
                    Step::Next(LockPhase::Releasing)
                }
                None => Step::Next(LockPhase::Releasing),
            },
            LockPhase::Releasing => {
                self.current = self.store.retrieve_session();
                if !self.holds_lock(&self.current) {
                    return Step::Postpone;
                }
                let released = self.current.unlocked();
                self.store.write_session(&released);
                Step::Done(released)
            }
        }
    }
}

/// Session cookie access for one tab.
#[derive(Clone)]
pub struct SessionCookieStore {
    jar: Rc<dyn CookieJar>,
    options: CookieOptions,
    event_loop: EventLoop,
    lock_enabled: bool,
}

impl SessionCookieStore {
    pub fn new(
        jar: Rc<dyn CookieJar>,
        options: CookieOptions,
        event_loop: EventLoop,
        lock_enabled: bool,
    ) -> Self {
        Self {
            jar,
            options,
            event_loop,
            lock_enabled,
        }
    }

    pub fn is_lock_enabled(&self) -> bool {
        self.lock_enabled
    }

    pub fn now_ms(&self) -> u64 {
        self.event_loop.now_ms()
    }

    /// Current cookie content, no locking.
    pub fn retrieve_session(&self) -> SessionState {
        decode(self.jar.get(SESSION_COOKIE_NAME).as_deref())
    }

    /// Unconditional write. The empty state clears the cookie, anything else
    /// gets a fresh `expire` deadline. Returns what was written.
    pub fn persist_session(&self, mut state: SessionState) -> SessionState {
        if state.is_empty() {
            self.jar.set(SESSION_COOKIE_NAME, "", 0, &self.options);
            return state;
        }
        state.expire = Some((self.now_ms() + SESSION_EXPIRATION_DELAY).to_string());
        self.write_session(&state);
        state
    }

    fn write_session(&self, state: &SessionState) {
        self.jar.set(
            SESSION_COOKIE_NAME,
            &encode(state),
            SESSION_EXPIRATION_DELAY,
            &self.options,
        );
    }

    /// The only safe read-modify-write of the session cookie.
    pub fn with_locked_access(&self, mut operation: SessionOperation) -> LockOutcome {
        operation.attempts += 1;
        if !self.lock_enabled {
            return self.run_unlocked(operation);
        }

        let mut attempt = LockAttempt {
            store: self,
            phase: LockPhase::Idle,
            token: String::new(),
            current: SessionState::default(),
            processed: None,
        };
        let outcome = attempt.run(&mut operation);
        match &outcome {
            LockOutcome::Completed(state) => {
                if let Some(after) = operation.after.as_mut() {
                    after(state.clone());
                }
            }
            LockOutcome::Postponed(phase) => {
                tracing::debug!(
                    phase = ?phase,
                    attempt = operation.attempts,
                    "session cookie lock contended, retrying"
                );
                self.postpone(operation);
            }
        }
        outcome
    }

    fn run_unlocked(&self, mut operation: SessionOperation) -> LockOutcome {
        let current = self.retrieve_session();
        let state = match (operation.process)(current.clone()) {
            Some(processed) => self.persist_session(processed),
            None => current,
        };
        if let Some(after) = operation.after.as_mut() {
            after(state.clone());
        }
        LockOutcome::Completed(state)
    }

    fn postpone(&self, operation: SessionOperation) {
        let store = self.clone();
        self.event_loop.set_timeout(LOCK_RETRY_DELAY, move || {
            store.with_locked_access(operation);
        });
    }
}

#[cfg(test)]
#[path = "tests/cookie_store_tests.rs"]
mod tests;
