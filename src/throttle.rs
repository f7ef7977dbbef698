//! Leading and trailing edge throttling on the event loop.

use crate::event_loop::{EventLoop, TimerId};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
struct ThrottleState {
    window: Option<TimerId>,
    pending: bool,
}

/// Collapses bursts of calls to at most one execution per `wait_ms`.
///
/// The first call runs immediately and opens a window. Calls made while the
/// window is open are remembered, and one trailing execution runs when the
/// window closes (opening a new window).
#[derive(Clone)]
pub struct Throttle {
    event_loop: EventLoop,
    wait_ms: u64,
    action: Rc<dyn Fn()>,
    state: Rc<RefCell<ThrottleState>>,
}

impl Throttle {
    pub fn new(event_loop: EventLoop, wait_ms: u64, action: impl Fn() + 'static) -> Self {
        Self {
            event_loop,
            wait_ms,
            action: Rc::new(action),
            state: Rc::new(RefCell::new(ThrottleState::default())),
        }
    }

    pub fn call(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.window.is_some() {
                state.pending = true;
                return;
            }
        }
        self.open_window();
        (self.action)();
    }

    /// Drops any pending trailing execution and closes the window.
    pub fn cancel(&self) {
        let mut state = self.state.borrow_mut();
        if let Some(window) = state.window.take() {
            self.event_loop.clear(window);
        }
        state.pending = false;
    }

    fn open_window(&self) {
        let this = self.clone();
        let window = self
            .event_loop
            .set_timeout(self.wait_ms, move || this.close_window());
        self.state.borrow_mut().window = Some(window);
    }

    fn close_window(&self) {
        let run_trailing = {
            let mut state = self.state.borrow_mut();
            state.window = None;
            std::mem::take(&mut state.pending)
        };
        if run_trailing {
            self.open_window();
            (self.action)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::Cell;

    fn counting_throttle(wait_ms: u64) -> (Throttle, EventLoop, Rc<Cell<u32>>) {
        let clock = Rc::new(ManualClock::new(0));
        let event_loop = EventLoop::with_manual_clock(clock);
        let count = Rc::new(Cell::new(0));
        let counter = count.clone();
        let throttle = Throttle::new(event_loop.clone(), wait_ms, move || {
            counter.set(counter.get() + 1)
        });
        (throttle, event_loop, count)
    }

    #[test]
    fn test_first_call_runs_immediately() {
        let (throttle, _event_loop, count) = counting_throttle(1_000);
        throttle.call();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_burst_collapses_to_one_trailing_call() {
        let (throttle, event_loop, count) = counting_throttle(1_000);
        for _ in 0..10 {
            throttle.call();
        }
        assert_eq!(count.get(), 1);

        event_loop.advance(1_000);
        assert_eq!(count.get(), 2);

        // No further calls: the trailing window closes without running.
        event_loop.advance(5_000);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_call_after_quiet_window_runs_immediately() {
        let (throttle, event_loop, count) = counting_throttle(1_000);
        throttle.call();
        event_loop.advance(1_500);
        throttle.call();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_cancel_drops_trailing_call() {
        let (throttle, event_loop, count) = counting_throttle(1_000);
        throttle.call();
        throttle.call();
        throttle.cancel();
        event_loop.advance(2_000);
        assert_eq!(count.get(), 1);
        assert_eq!(event_loop.pending(), 0);
    }
}
