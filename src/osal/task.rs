// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `Task`: a single named worker thread that repeatedly runs a closure
//! until stopped.
//!
//! This is the primitive the state machine's job-processing thread and any
//! future filter-owned worker threads are built on; it owns exactly one
//! `std::thread::JoinHandle` and a run flag, nothing more.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A loop body run on a dedicated thread until the task is stopped. Returns
/// whether the thread should keep looping; returning `false` ends the
/// thread without waiting for `Task::stop`.
pub trait TaskBody: Send + 'static {
    fn run_once(&mut self) -> bool;
}

impl<F: FnMut() -> bool + Send + 'static> TaskBody for F {
    fn run_once(&mut self) -> bool {
        self()
    }
}

/// A named background thread running `body.run_once()` in a loop.
pub struct Task {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Task {
    /// Spawn `body` on a new thread named `name`. The thread calls
    /// `run_once` repeatedly until it returns `false` or [`Task::stop`] is
    /// called.
    pub fn spawn(name: impl Into<String>, mut body: impl TaskBody) -> Self {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                while thread_running.load(Ordering::Acquire) {
                    if !body.run_once() {
                        break;
                    }
                }
            })
            .expect("failed to spawn task thread");

        Self {
            name,
            running,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task is still expected to be looping.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the task to stop and block until its thread has exited. A task
    /// whose `run_once` blocks indefinitely (e.g. on a queue pop) must be
    /// unblocked some other way before calling this, or `stop` itself
    /// blocks — callers pair this with deactivating whatever queue the
    /// body waits on.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn task_runs_body_repeatedly_until_stopped() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let mut task = Task::spawn("counter", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
            true
        });
        std::thread::sleep(Duration::from_millis(20));
        task.stop();
        assert!(counter.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn body_returning_false_ends_task_on_its_own() {
        let mut task = Task::spawn("one-shot", || false);
        std::thread::sleep(Duration::from_millis(20));
        task.stop();
    }
}
