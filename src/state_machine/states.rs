// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The five player states and the intents dispatched to them.
//!
//! Every state shares the same shape: `dispatch` routes an [`Intent`] to a
//! per-intent handler, each handler defaulting to "not valid right now"
//! unless a concrete state overrides it. `OnError` is handled once, at the
//! `dispatch` level, the same way in every state: run the executor's error
//! hook and fall back to `Init`.

use crate::error::{ErrorCode, HsResult};
use crate::executor::PlayExecutor;
use crate::meta::TagValue;
use crate::source::SourceDescriptor;

/// Which of the five player states is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateId {
    Init,
    Preparing,
    Ready,
    Playing,
    Pause,
}

/// A request dispatched to the current state. `OnReady`/`OnComplete`/
/// `OnError` are internal notifications raised by the pipeline rather than
/// calls a `Player` user makes directly.
#[derive(Debug, Clone)]
pub enum Intent {
    SetSource(SourceDescriptor),
    Prepare,
    Play,
    Pause,
    Resume,
    Stop,
    Seek(i64),
    SetAttribute(String, TagValue),
    OnReady,
    OnComplete,
    OnError(ErrorCode),
}

/// What the state machine should do after a state handles an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stay in the current state.
    None,
    /// The intent can't be serviced yet (e.g. `Play` while still
    /// `Preparing`); the state machine re-queues it and retries once the
    /// blocking condition clears.
    Pending,
    /// Transition to the named state, running `exit`/`enter` hooks.
    TransitionTo(StateId),
}

/// Outcome of dispatching one intent: whether it succeeded, and what the
/// state machine should do next.
pub type DispatchResult = (HsResult<()>, Action);

fn not_valid_now() -> DispatchResult {
    (Err(ErrorCode::InvalidOperation), Action::None)
}

/// Behavior shared by every player state. Concrete states override only the
/// handlers relevant to them; everything else falls back to "not valid in
/// this state."
pub trait State: Send + Sync {
    fn id(&self) -> StateId;

    /// Run once, right after the state machine transitions into this
    /// state. `entry_intent` is the intent whose handling caused the
    /// transition, when there was one (e.g. `Playing::enter` checks
    /// whether it arrived via `Resume` or `Play` to decide whether to call
    /// `do_resume` or `do_play`).
    fn enter(&self, _executor: &dyn PlayExecutor, _entry_intent: Option<&Intent>) -> HsResult<()> {
        Ok(())
    }

    /// Run once, right before the state machine leaves this state.
    fn exit(&self, _executor: &dyn PlayExecutor) -> HsResult<()> {
        Ok(())
    }

    /// Route `intent` to its handler. `OnError` is handled uniformly here
    /// rather than per-state, matching the base dispatcher.
    fn dispatch(&self, executor: &dyn PlayExecutor, intent: &Intent) -> DispatchResult {
        match intent {
            Intent::SetSource(source) => self.set_source(executor, source),
            Intent::Prepare => self.prepare(executor),
            Intent::Play => self.play(executor),
            Intent::Pause => self.pause(executor),
            Intent::Resume => self.resume(executor),
            Intent::Stop => self.stop(executor),
            Intent::Seek(position_ms) => self.seek(executor, *position_ms),
            Intent::SetAttribute(tag, value) => self.set_attribute(executor, tag, value),
            Intent::OnReady => self.on_ready(executor),
            Intent::OnComplete => self.on_complete(executor),
            Intent::OnError(err) => {
                executor.do_on_error(*err);
                (Ok(()), Action::TransitionTo(StateId::Init))
            }
        }
    }

    fn set_source(&self, _executor: &dyn PlayExecutor, _source: &SourceDescriptor) -> DispatchResult {
        not_valid_now()
    }

    fn prepare(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        not_valid_now()
    }

    fn play(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        not_valid_now()
    }

    fn pause(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        not_valid_now()
    }

    fn resume(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        not_valid_now()
    }

    fn stop(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        not_valid_now()
    }

    fn seek(&self, _executor: &dyn PlayExecutor, _position_ms: i64) -> DispatchResult {
        not_valid_now()
    }

    /// Attributes such as volume can be applied in any state; only the
    /// lifecycle-shaping intents above are state-gated.
    fn set_attribute(&self, executor: &dyn PlayExecutor, tag: &str, value: &TagValue) -> DispatchResult {
        match executor.do_set_attribute(tag, value) {
            Ok(()) => (Ok(()), Action::None),
            Err(e) => (Err(e), Action::None),
        }
    }

    fn on_ready(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::None)
    }

    fn on_complete(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::None)
    }
}

/// `Created`-ish resting state: no source, or stopped back to the top.
pub struct InitState;

impl State for InitState {
    fn id(&self) -> StateId {
        StateId::Init
    }

    fn enter(&self, executor: &dyn PlayExecutor, _entry_intent: Option<&Intent>) -> HsResult<()> {
        executor.do_stop()
    }

    fn set_source(&self, executor: &dyn PlayExecutor, source: &SourceDescriptor) -> DispatchResult {
        match executor.do_set_source(source) {
            Ok(()) => (Ok(()), Action::TransitionTo(StateId::Preparing)),
            Err(e) => (Err(e), Action::None),
        }
    }

    fn stop(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Init))
    }
}

/// Building the filter chain and waiting for every filter to report Ready.
pub struct PreparingState;

impl State for PreparingState {
    fn id(&self) -> StateId {
        StateId::Preparing
    }

    fn enter(&self, executor: &dyn PlayExecutor, _entry_intent: Option<&Intent>) -> HsResult<()> {
        executor.prepare_filters()
    }

    fn play(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        // Filters aren't ready yet; retried once `OnReady` arrives.
        (Ok(()), Action::Pending)
    }

    fn seek(&self, executor: &dyn PlayExecutor, position_ms: i64) -> DispatchResult {
        match executor.do_seek(position_ms, true) {
            Ok(()) => (Ok(()), Action::None),
            Err(e) => (Err(e), Action::None),
        }
    }

    fn stop(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Init))
    }

    fn on_ready(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Ready))
    }
}

/// Filters are ready; playback has not started.
pub struct ReadyState;

impl State for ReadyState {
    fn id(&self) -> StateId {
        StateId::Ready
    }

    fn enter(&self, executor: &dyn PlayExecutor, _entry_intent: Option<&Intent>) -> HsResult<()> {
        executor.do_on_ready()
    }

    fn play(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Playing))
    }

    fn seek(&self, executor: &dyn PlayExecutor, position_ms: i64) -> DispatchResult {
        match executor.do_seek(position_ms, true) {
            Ok(()) => (Ok(()), Action::None),
            Err(e) => (Err(e), Action::None),
        }
    }

    fn stop(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Init))
    }
}

/// Actively playing.
pub struct PlayingState;

impl State for PlayingState {
    fn id(&self) -> StateId {
        StateId::Playing
    }

    fn enter(&self, executor: &dyn PlayExecutor, entry_intent: Option<&Intent>) -> HsResult<()> {
        if matches!(entry_intent, Some(Intent::Resume)) {
            executor.do_resume()
        } else {
            executor.do_play()
        }
    }

    fn play(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        // Already playing: idempotent no-op.
        (Ok(()), Action::None)
    }

    fn pause(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Pause))
    }

    fn stop(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Init))
    }

    fn on_complete(&self, executor: &dyn PlayExecutor) -> DispatchResult {
        match executor.do_on_complete() {
            Ok(()) => {
                if executor.is_looping() {
                    let _ = executor.do_seek(0, false);
                    (Ok(()), Action::None)
                } else {
                    (Ok(()), Action::TransitionTo(StateId::Init))
                }
            }
            Err(e) => (Err(e), Action::TransitionTo(StateId::Init)),
        }
    }
}

/// Paused mid-playback.
pub struct PauseState;

impl State for PauseState {
    fn id(&self) -> StateId {
        StateId::Pause
    }

    fn enter(&self, executor: &dyn PlayExecutor, _entry_intent: Option<&Intent>) -> HsResult<()> {
        executor.do_pause()
    }

    fn play(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Playing))
    }

    fn resume(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Playing))
    }

    fn seek(&self, executor: &dyn PlayExecutor, position_ms: i64) -> DispatchResult {
        match executor.do_seek(position_ms, true) {
            Ok(()) => (Ok(()), Action::None),
            Err(e) => (Err(e), Action::None),
        }
    }

    fn stop(&self, _executor: &dyn PlayExecutor) -> DispatchResult {
        (Ok(()), Action::TransitionTo(StateId::Init))
    }
}
