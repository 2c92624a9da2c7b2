// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `Synchronizer`: turns the state machine's asynchronous job queue into a
//! blocking call for callers that used `send_event` rather than
//! `send_event_async`.
//!
//! Each in-flight synchronous call registers a slot keyed by a caller-chosen
//! id (the state machine uses a monotonically increasing sequence number);
//! the worker thread that eventually processes the job calls
//! [`Synchronizer::complete`], waking the blocked caller. A call that never
//! completes within the configured timeout returns `ErrorCode::Timeout`
//! rather than hanging forever.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{ErrorCode, HsResult};

struct Slot {
    result: Mutex<Option<HsResult<()>>>,
    ready: Condvar,
}

/// Keyed rendezvous point between a blocking caller and the thread that
/// eventually produces its result.
pub struct Synchronizer {
    slots: Mutex<HashMap<u64, Arc<Slot>>>,
    default_timeout: Duration,
}

impl Synchronizer {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Register `id` as awaited, then block until [`Synchronizer::complete`]
    /// is called with the same id or `timeout` (falling back to the
    /// configured default) elapses.
    pub fn wait(&self, id: u64, timeout: Option<Duration>) -> HsResult<()> {
        let slot = Arc::new(Slot {
            result: Mutex::new(None),
            ready: Condvar::new(),
        });
        self.slots.lock().insert(id, slot.clone());

        let mut result = slot.result.lock();
        let budget = timeout.unwrap_or(self.default_timeout);
        if result.is_none() {
            let timed_out = slot.ready.wait_for(&mut result, budget).timed_out();
            if timed_out && result.is_none() {
                self.slots.lock().remove(&id);
                return Err(ErrorCode::Timeout);
            }
        }
        self.slots.lock().remove(&id);
        result.take().unwrap_or(Err(ErrorCode::Timeout))
    }

    /// Deliver `outcome` to whoever is waiting on `id`, if anyone is. A
    /// completion with no matching waiter (the caller used
    /// `send_event_async` and never calls `wait`) is simply dropped.
    pub fn complete(&self, id: u64, outcome: HsResult<()>) {
        if let Some(slot) = self.slots.lock().get(&id).cloned() {
            *slot.result.lock() = Some(outcome);
            slot.ready.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn complete_before_wait_observed_is_still_delivered() {
        let sync = Arc::new(Synchronizer::new(Duration::from_secs(5)));
        let sync2 = sync.clone();
        let handle = thread::spawn(move || sync2.wait(1, None));

        thread::sleep(Duration::from_millis(10));
        sync.complete(1, Ok(()));

        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn wait_times_out_if_never_completed() {
        let sync = Synchronizer::new(Duration::from_millis(20));
        assert_eq!(sync.wait(42, None), Err(ErrorCode::Timeout));
    }

    #[test]
    fn explicit_timeout_overrides_default() {
        let sync = Synchronizer::new(Duration::from_secs(30));
        let start = std::time::Instant::now();
        let result = sync.wait(7, Some(Duration::from_millis(20)));
        assert_eq!(result, Err(ErrorCode::Timeout));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
