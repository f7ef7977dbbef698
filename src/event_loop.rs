//! Single-threaded cooperative event loop.
//!
//! Every tab owns one loop. Timers run in deadline order, FIFO among equal
//! deadlines, and never while the loop's own state is borrowed, so a task
//! may freely schedule or cancel other timers (including itself).
//!
//! The loop never sleeps. Callers drive it: tests move a [`ManualClock`] with
//! [`EventLoop::advance`], the binary sleeps on tokio until
//! [`EventLoop::next_deadline`] and then calls [`EventLoop::run_due`].

use crate::clock::{Clock, ManualClock};
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

/// Handle to a scheduled timeout or interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type RepeatCallback = Rc<RefCell<Box<dyn FnMut()>>>;

enum TimerTask {
    Once(Box<dyn FnOnce()>),
    Repeat {
        period_ms: u64,
        callback: RepeatCallback,
    },
}

enum Job {
    Once(Box<dyn FnOnce()>),
    Repeat(RepeatCallback),
}

#[derive(Default)]
struct Timers {
    next_id: u64,
    next_seq: u64,
    /// (deadline, insertion sequence, timer id)
    queue: BinaryHeap<Reverse<(u64, u64, u64)>>,
    tasks: HashMap<u64, TimerTask>,
}

impl Timers {
    fn push(&mut self, deadline: u64, id: u64) {
        self.next_seq += 1;
        self.queue.push(Reverse((deadline, self.next_seq, id)));
    }

    fn insert(&mut self, deadline: u64, task: TimerTask) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        self.tasks.insert(id, task);
        self.push(deadline, id);
        TimerId(id)
    }

    /// Drops queue entries whose timer was cancelled and returns the head.
    fn head(&mut self) -> Option<(u64, u64)> {
        loop {
            let Reverse((deadline, _, id)) = *self.queue.peek()?;
            if self.tasks.contains_key(&id) {
                return Some((deadline, id));
            }
            self.queue.pop();
        }
    }

    fn take_due(&mut self, now: u64) -> Option<Job> {
        let (deadline, id) = self.head()?;
        if deadline > now {
            return None;
        }
        self.queue.pop();
        match self.tasks.remove(&id)? {
            TimerTask::Once(task) => Some(Job::Once(task)),
            TimerTask::Repeat {
                period_ms,
                callback,
            } => {
                let job = Job::Repeat(Rc::clone(&callback));
                self.tasks.insert(
                    id,
                    TimerTask::Repeat {
                        period_ms,
                        callback,
                    },
                );
                // A late wake-up skips the missed periods instead of replaying them.
                let next = deadline + period_ms;
                self.push(if next <= now { now + period_ms } else { next }, id);
                Some(job)
            }
        }
    }
}

/// Cloneable handle to a tab's event loop.
#[derive(Clone)]
pub struct EventLoop {
    timers: Rc<RefCell<Timers>>,
    clock: Rc<dyn Clock>,
    manual: Option<Rc<ManualClock>>,
}

impl EventLoop {
    /// Creates a loop reading time from `clock`.
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            timers: Rc::new(RefCell::new(Timers::default())),
            clock,
            manual: None,
        }
    }

    /// Creates a loop whose time only moves through [`EventLoop::advance`].
    pub fn with_manual_clock(clock: Rc<ManualClock>) -> Self {
        let as_clock: Rc<dyn Clock> = clock.clone();
        Self {
            timers: Rc::new(RefCell::new(Timers::default())),
            clock: as_clock,
            manual: Some(clock),
        }
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.clock)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Runs `task` once, `delay_ms` from now.
    pub fn set_timeout(&self, delay_ms: u64, task: impl FnOnce() + 'static) -> TimerId {
        let deadline = self.now_ms() + delay_ms;
        self.timers
            .borrow_mut()
            .insert(deadline, TimerTask::Once(Box::new(task)))
    }

    /// Runs `task` every `period_ms` until cleared. A zero period is treated as 1ms.
    pub fn set_interval(&self, period_ms: u64, task: impl FnMut() + 'static) -> TimerId {
        let period_ms = period_ms.max(1);
        let deadline = self.now_ms() + period_ms;
        self.timers.borrow_mut().insert(
            deadline,
            TimerTask::Repeat {
                period_ms,
                callback: Rc::new(RefCell::new(Box::new(task))),
            },
        )
    }

    /// Cancels a timeout or interval. Unknown or already fired ids are ignored.
    pub fn clear(&self, id: TimerId) {
        self.timers.borrow_mut().tasks.remove(&id.0);
    }

    /// Number of live timers.
    pub fn pending(&self) -> usize {
        self.timers.borrow().tasks.len()
    }

    /// Deadline of the earliest live timer.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.borrow_mut().head().map(|(deadline, _)| deadline)
    }

    /// Runs every task that is due at the current time and returns how many ran.
    ///
    /// Tasks scheduled by a running task with zero delay run in the same call.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        loop {
            let now = self.now_ms();
            let job = self.timers.borrow_mut().take_due(now);
            match job {
                Some(Job::Once(task)) => task(),
                Some(Job::Repeat(callback)) => {
                    let mut guard = callback.borrow_mut();
                    (*guard)()
                }
                None => break,
            }
            ran += 1;
        }
        ran
    }

    /// Moves a manual clock forward by `delta_ms`, firing timers at their own
    /// deadlines along the way. On a loop without a manual clock this only
    /// runs the tasks that are already due.
    pub fn advance(&self, delta_ms: u64) -> usize {
        let Some(manual) = &self.manual else {
            return self.run_due();
        };
        let target = manual.now_ms() + delta_ms;
        let mut ran = 0;
        while let Some(deadline) = self.next_deadline() {
            if deadline > target {
                break;
            }
            if deadline > manual.now_ms() {
                manual.set(deadline);
            }
            ran += self.run_due();
        }
        manual.set(target);
        ran + self.run_due()
    }
}

#[cfg(test)]
#[path = "tests/event_loop_tests.rs"]
mod tests;
