//! Minimal publish/subscribe for same-thread listeners.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

type Listener<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Observers<T: 'static> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
}

/// A stream of notifications delivered synchronously to every subscriber.
pub struct Observable<T: 'static> {
    observers: Rc<RefCell<Observers<T>>>,
}

impl<T: 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            observers: Rc::clone(&self.observers),
        }
    }
}

impl<T: 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Observable<T> {
    pub fn new() -> Self {
        Self {
            observers: Rc::new(RefCell::new(Observers {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Registers `listener` until the returned [`Subscription`] is unsubscribed
    /// or [`Observable::unsubscribe_all`] is called.
    pub fn subscribe(&self, listener: impl FnMut(&T) + 'static) -> Subscription {
        let id = {
            let mut observers = self.observers.borrow_mut();
            observers.next_id += 1;
            let id = observers.next_id;
            let listener: Listener<T> = Rc::new(RefCell::new(listener));
            observers.listeners.push((id, listener));
            id
        };

        let weak: Weak<RefCell<Observers<T>>> = Rc::downgrade(&self.observers);
        Subscription {
            unsubscribe: Box::new(move || {
                if let Some(observers) = weak.upgrade() {
                    observers
                        .borrow_mut()
                        .listeners
                        .retain(|(listener_id, _)| *listener_id != id);
                }
            }),
        }
    }

    /// Delivers `value` to the listeners registered when the call starts.
    ///
    /// A listener that notifies the same observable from inside its own
    /// callback does not receive the nested notification.
    pub fn notify(&self, value: &T) {
        let listeners: Vec<Listener<T>> = self
            .observers
            .borrow()
            .listeners
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();

        for listener in listeners {
            if let Ok(mut callback) = listener.try_borrow_mut() {
                (*callback)(value);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers.borrow().listeners.len()
    }

    pub fn unsubscribe_all(&self) {
        self.observers.borrow_mut().listeners.clear();
    }
}

/// Keeps a listener registered. Dropping it does not unsubscribe.
pub struct Subscription {
    unsubscribe: Box<dyn FnOnce()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        (self.unsubscribe)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_notify_reaches_every_subscriber() {
        let observable = Observable::<()>::new();
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));

        let counter = first.clone();
        let _a = observable.subscribe(move |_| counter.set(counter.get() + 1));
        let counter = second.clone();
        let _b = observable.subscribe(move |_| counter.set(counter.get() + 1));

        observable.notify(&());
        observable.notify(&());

        assert_eq!(first.get(), 2);
        assert_eq!(second.get(), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let observable = Observable::<u32>::new();
        let received = Rc::new(RefCell::new(Vec::new()));

        let sink = received.clone();
        let subscription = observable.subscribe(move |value| sink.borrow_mut().push(*value));

        observable.notify(&1);
        subscription.unsubscribe();
        observable.notify(&2);

        assert_eq!(*received.borrow(), vec![1]);
        assert_eq!(observable.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_all_clears_listeners() {
        let observable = Observable::<()>::new();
        let _a = observable.subscribe(|_| {});
        let _b = observable.subscribe(|_| {});
        assert_eq!(observable.subscriber_count(), 2);

        observable.unsubscribe_all();
        assert_eq!(observable.subscriber_count(), 0);
    }

    #[test]
    fn test_listener_may_subscribe_during_notify() {
        let observable = Observable::<()>::new();
        let inner = observable.clone();
        let _a = observable.subscribe(move |_| {
            let _ = inner.subscribe(|_| {});
        });

        observable.notify(&());
        assert_eq!(observable.subscriber_count(), 2);
    }
}
