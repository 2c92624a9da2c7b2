// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A bounded, blocking producer/consumer queue.
//!
//! Unlike a lock-free ring buffer that drops data when full, this queue's
//! producer blocks until there is room and its consumer blocks until there
//! is an item, exactly the semantics the buffered-filter data path needs.
//! `set_active(false)` wakes every blocked waiter so shutdown never hangs
//! on an empty/full queue.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// `items` and `active` are guarded by the same mutex so a `set_active`
/// flip and the condvar notify it issues are serialized against any waiter
/// that's checking both under one lock; splitting them across two mutexes
/// lets a waiter observe a stale `active` and sleep through a wakeup meant
/// for it.
struct State<T> {
    items: VecDeque<T>,
    active: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

/// The producer half of a [`bounded`] queue.
pub struct Writer<T> {
    shared: Arc<Shared<T>>,
}

/// The consumer half of a [`bounded`] queue.
pub struct Reader<T> {
    shared: Arc<Shared<T>>,
}

/// Create a bounded queue of `capacity` slots, returning its writer and
/// reader halves. `capacity` of zero means unbounded (the writer never
/// blocks), matching `VecDeque`'s own behavior rather than being treated as
/// a special case.
pub fn bounded<T>(capacity: usize) -> (Writer<T>, Reader<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::new(),
            active: true,
        }),
        capacity,
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
    });
    (
        Writer {
            shared: shared.clone(),
        },
        Reader { shared },
    )
}

impl<T> Writer<T> {
    /// Push `item`, blocking while the queue is full and active. Returns
    /// `Err(item)` if the queue was deactivated before room appeared.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.shared.state.lock();
        loop {
            if !state.active {
                return Err(item);
            }
            if self.shared.capacity == 0 || state.items.len() < self.shared.capacity {
                state.items.push_back(item);
                self.shared.not_empty.notify_one();
                return Ok(());
            }
            self.shared.not_full.wait(&mut state);
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Reader<T> {
    /// Pop the next item, blocking while the queue is empty and active.
    /// Returns `None` once the queue is deactivated and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.shared.not_full.notify_one();
                return Some(item);
            }
            if !state.active {
                return None;
            }
            self.shared.not_empty.wait(&mut state);
        }
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Either half can deactivate the queue; deactivation wakes every blocked
/// `push`/`pop` so none of them wait forever.
pub trait Deactivate {
    fn set_active(&self, active: bool);
}

impl<T> Deactivate for Writer<T> {
    fn set_active(&self, active: bool) {
        self.shared.state.lock().active = active;
        self.shared.not_full.notify_all();
        self.shared.not_empty.notify_all();
    }
}

impl<T> Deactivate for Reader<T> {
    fn set_active(&self, active: bool) {
        self.shared.state.lock().active = active;
        self.shared.not_full.notify_all();
        self.shared.not_empty.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_then_pop_roundtrips() {
        let (writer, reader) = bounded::<u32>(4);
        writer.push(7).unwrap();
        assert_eq!(reader.pop(), Some(7));
    }

    #[test]
    fn push_blocks_until_consumer_makes_room() {
        let (writer, reader) = bounded::<u32>(1);
        writer.push(1).unwrap();

        let writer2 = Writer {
            shared: writer.shared.clone(),
        };
        let handle = thread::spawn(move || writer2.push(2));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(reader.pop(), Some(1));
        assert!(handle.join().unwrap().is_ok());
        assert_eq!(reader.pop(), Some(2));
    }

    #[test]
    fn deactivate_wakes_blocked_pop() {
        let (writer, reader) = bounded::<u32>(4);
        let reader_shared = Reader {
            shared: reader.shared.clone(),
        };
        let handle = thread::spawn(move || reader_shared.pop());

        thread::sleep(Duration::from_millis(20));
        writer.set_active(false);
        assert_eq!(handle.join().unwrap(), None);
    }
}
