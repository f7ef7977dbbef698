use super::*;
use std::cell::Cell;

fn manual_loop() -> (EventLoop, Rc<ManualClock>) {
    let clock = Rc::new(ManualClock::new(10_000));
    (EventLoop::with_manual_clock(clock.clone()), clock)
}

#[test]
fn test_timeouts_run_in_deadline_order() {
    let (event_loop, _clock) = manual_loop();
    let order = Rc::new(RefCell::new(Vec::new()));

    for (delay, label) in [(30, "c"), (10, "a"), (20, "b"), (10, "a2")] {
        let order = order.clone();
        event_loop.set_timeout(delay, move || order.borrow_mut().push(label));
    }

    assert_eq!(event_loop.advance(30), 4);
    assert_eq!(*order.borrow(), vec!["a", "a2", "b", "c"]);
    assert_eq!(event_loop.pending(), 0);
}

#[test]
fn test_timeout_not_run_before_deadline() {
    let (event_loop, clock) = manual_loop();
    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    event_loop.set_timeout(5, move || flag.set(true));

    event_loop.advance(4);
    assert!(!fired.get());
    event_loop.advance(1);
    assert!(fired.get());
    assert_eq!(clock.now_ms(), 10_005);
}

#[test]
fn test_cleared_timeout_never_runs() {
    let (event_loop, _clock) = manual_loop();
    let fired = Rc::new(Cell::new(false));
    let flag = fired.clone();
    let id = event_loop.set_timeout(5, move || flag.set(true));

    event_loop.clear(id);
    event_loop.advance(100);
    assert!(!fired.get());
    assert_eq!(event_loop.next_deadline(), None);
}

#[test]
fn test_interval_fires_each_period_until_cleared() {
    let (event_loop, _clock) = manual_loop();
    let count = Rc::new(Cell::new(0));
    let counter = count.clone();
    let id = event_loop.set_interval(1_000, move || counter.set(counter.get() + 1));

    event_loop.advance(3_500);
    assert_eq!(count.get(), 3);

    event_loop.clear(id);
    event_loop.advance(5_000);
    assert_eq!(count.get(), 3);
}

#[test]
fn test_task_can_schedule_follow_up() {
    let (event_loop, clock) = manual_loop();
    let seen_at = Rc::new(Cell::new(0));

    let inner_loop = event_loop.clone();
    let seen = seen_at.clone();
    let inner_clock = clock.clone();
    event_loop.set_timeout(10, move || {
        inner_loop.set_timeout(1, move || seen.set(inner_clock.now_ms()));
    });

    event_loop.advance(50);
    assert_eq!(seen_at.get(), 10_011);
}

#[test]
fn test_interval_can_clear_itself() {
    let (event_loop, _clock) = manual_loop();
    let count = Rc::new(Cell::new(0));
    let own_id: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));

    let inner_loop = event_loop.clone();
    let counter = count.clone();
    let id_slot = own_id.clone();
    let id = event_loop.set_interval(10, move || {
        counter.set(counter.get() + 1);
        if let Some(id) = id_slot.get() {
            inner_loop.clear(id);
        }
    });
    own_id.set(Some(id));

    event_loop.advance(100);
    assert_eq!(count.get(), 1);
}

#[test]
fn test_run_due_without_manual_clock_only_runs_due_tasks() {
    let clock = Rc::new(ManualClock::new(0));
    let event_loop = EventLoop::new(clock.clone());
    let fired = Rc::new(Cell::new(0));

    let flag = fired.clone();
    event_loop.set_timeout(0, move || flag.set(flag.get() + 1));
    let flag = fired.clone();
    event_loop.set_timeout(10, move || flag.set(flag.get() + 1));

    assert_eq!(event_loop.advance(1_000), 1);
    clock.advance(10);
    assert_eq!(event_loop.run_due(), 1);
    assert_eq!(fired.get(), 2);
}

#[test]
fn test_late_wake_up_runs_interval_once() {
    let clock = Rc::new(ManualClock::new(0));
    let event_loop = EventLoop::new(clock.clone());
    let count = Rc::new(Cell::new(0));
    let counter = count.clone();
    event_loop.set_interval(1_000, move || counter.set(counter.get() + 1));

    clock.advance(3_600_000);
    assert_eq!(event_loop.run_due(), 1);
    assert_eq!(count.get(), 1);
    assert_eq!(event_loop.next_deadline(), Some(3_601_000));

    clock.advance(1_000);
    assert_eq!(event_loop.run_due(), 1);
    assert_eq!(event_loop.next_deadline(), Some(3_602_000));
}
