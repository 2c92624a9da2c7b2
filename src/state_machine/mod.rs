// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `StateMachine`: the single worker thread that serializes every intent
//! dispatched to the player.
//!
//! Intents arrive through a queue rather than being dispatched inline by
//! the caller's own thread, so `Player` methods can be called from any
//! thread without the states themselves needing to be reentrant. A intent
//! that can't be handled yet (`Play` while still `Preparing`) is parked on
//! a pending list and retried after every state transition, which is what
//! lets `OnReady` wake up a `Play` that arrived too early.

mod states;

pub use states::{Action, DispatchResult, InitState, Intent, PauseState, PlayingState, PreparingState, ReadyState, State, StateId};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::HsResult;
use crate::executor::PlayExecutor;
use crate::osal::queue::{self, Deactivate, Writer};
use crate::osal::{Synchronizer, Task};

fn make_state(id: StateId) -> Box<dyn State> {
    match id {
        StateId::Init => Box::new(InitState),
        StateId::Preparing => Box::new(PreparingState),
        StateId::Ready => Box::new(ReadyState),
        StateId::Playing => Box::new(PlayingState),
        StateId::Pause => Box::new(PauseState),
    }
}

struct Job {
    intent: Intent,
    sync_id: Option<u64>,
}

struct Inner {
    current: Mutex<Box<dyn State>>,
    executor: Arc<dyn PlayExecutor>,
    synchronizer: Synchronizer,
    pending: Mutex<VecDeque<Job>>,
}

impl Inner {
    fn process_job(&self, job: Job) {
        let (result, action) = {
            let current = self.current.lock();
            current.dispatch(self.executor.as_ref(), &job.intent)
        };

        if action == Action::Pending {
            debug!(intent = ?job.intent, "intent pending, parked for retry");
            self.pending.lock().push_back(job);
            return;
        }

        if let Action::TransitionTo(next) = action {
            self.transition_to(next, Some(&job.intent));
        }

        if let Some(id) = job.sync_id {
            self.synchronizer.complete(id, result);
        }

        if matches!(action, Action::TransitionTo(_)) {
            self.retry_pending();
        }
    }

    fn transition_to(&self, next: StateId, entry_intent: Option<&Intent>) {
        let mut current = self.current.lock();
        let _ = current.exit(self.executor.as_ref());
        let from = current.id();
        *current = make_state(next);
        let _ = current.enter(self.executor.as_ref(), entry_intent);
        debug!(?from, ?next, "state transition");
    }

    fn retry_pending(&self) {
        let jobs: Vec<Job> = self.pending.lock().drain(..).collect();
        for job in jobs {
            self.process_job(job);
        }
    }
}

/// The player's intent dispatcher: one background thread, a queue of jobs,
/// and a list of intents parked until a state transition unblocks them.
pub struct StateMachine {
    inner: Arc<Inner>,
    jobs: Writer<Job>,
    worker: Mutex<Option<Task>>,
    next_sync_id: AtomicU64,
}

impl StateMachine {
    /// Build a state machine starting in `Init`, driving `executor`, with
    /// `default_timeout` applied to every `send_event` call that doesn't
    /// specify its own.
    pub fn new(executor: Arc<dyn PlayExecutor>, default_timeout: Duration) -> Self {
        let (writer, reader) = queue::bounded(0);
        let inner = Arc::new(Inner {
            current: Mutex::new(Box::new(InitState)),
            executor,
            synchronizer: Synchronizer::new(default_timeout),
            pending: Mutex::new(VecDeque::new()),
        });

        let worker_inner = inner.clone();
        let task = Task::spawn("histreamer-state-machine", move || match reader.pop() {
            Some(job) => {
                worker_inner.process_job(job);
                true
            }
            None => false,
        });

        Self {
            inner,
            jobs: writer,
            worker: Mutex::new(Some(task)),
            next_sync_id: AtomicU64::new(1),
        }
    }

    /// Current state id. Racy by nature (another thread's job may be
    /// processing right now) but useful for tests and diagnostics.
    pub fn state(&self) -> StateId {
        self.inner.current.lock().id()
    }

    /// Enqueue `intent` and return immediately.
    pub fn send_event_async(&self, intent: Intent) {
        let _ = self.jobs.push(Job {
            intent,
            sync_id: None,
        });
    }

    /// Enqueue `intent` and block until it has been dispatched (including
    /// any retries caused by `Action::Pending`), or until `timeout`
    /// (falling back to the machine's default) elapses.
    pub fn send_event(&self, intent: Intent, timeout: Option<Duration>) -> HsResult<()> {
        let id = self.next_sync_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.jobs.push(Job {
            intent,
            sync_id: Some(id),
        });
        self.inner.synchronizer.wait(id, timeout)
    }

    /// Stop the worker thread. Safe to call more than once.
    pub fn shutdown(&self) {
        self.jobs.set_active(false);
        if let Some(mut task) = self.worker.lock().take() {
            task.stop();
        }
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::executor::PipelineExecutor;
    use crate::pipeline::Pipeline;
    use crate::source::SourceDescriptor;
    use std::time::Duration;

    fn machine() -> StateMachine {
        let registry = Arc::new(crate::plugin::PluginRegistry::new());
        crate::filters::builtin::register_builtins(&registry);
        let executor = Arc::new(PipelineExecutor::new(Arc::new(Pipeline::new()), registry));
        StateMachine::new(executor, Duration::from_secs(5))
    }

    #[test]
    fn starts_in_init() {
        let sm = machine();
        assert_eq!(sm.state(), StateId::Init);
    }

    #[test]
    fn set_source_transitions_to_preparing() {
        let sm = machine();
        sm.send_event(
            Intent::SetSource(SourceDescriptor::parse("test://clip")),
            None,
        )
        .unwrap();
        assert_eq!(sm.state(), StateId::Preparing);
    }

    #[test]
    fn happy_path_reaches_playing() {
        let sm = machine();
        sm.send_event(Intent::SetSource(SourceDescriptor::parse("test://clip")), None)
            .unwrap();
        assert_eq!(sm.state(), StateId::Preparing);

        // This test's pipeline has no filters wired in, so nothing emits
        // Ready on its own; drive it the way the pipeline's event receiver
        // would once a real filter chain is attached.
        sm.send_event_async(Intent::OnReady);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sm.state(), StateId::Ready);

        sm.send_event(Intent::Play, None).unwrap();
        assert_eq!(sm.state(), StateId::Playing);
    }

    #[test]
    fn play_while_preparing_is_pending_until_ready() {
        let sm = machine();
        sm.send_event(Intent::SetSource(SourceDescriptor::parse("test://clip")), None)
            .unwrap();
        assert_eq!(sm.state(), StateId::Preparing);

        // Play arrives before Ready: queued as pending, no immediate error.
        sm.send_event_async(Intent::Play);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sm.state(), StateId::Preparing);

        sm.send_event_async(Intent::OnReady);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sm.state(), StateId::Playing);
    }

    #[test]
    fn play_from_init_is_rejected() {
        let sm = machine();
        assert_eq!(sm.send_event(Intent::Play, None), Err(ErrorCode::InvalidOperation));
    }

    #[test]
    fn error_from_any_state_falls_back_to_init() {
        let sm = machine();
        sm.send_event(Intent::SetSource(SourceDescriptor::parse("test://clip")), None)
            .unwrap();
        sm.send_event(Intent::OnError(ErrorCode::Unknown), None).unwrap();
        assert_eq!(sm.state(), StateId::Init);
    }
}
