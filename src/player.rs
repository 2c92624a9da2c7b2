// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `Player`: the public facade over the state machine, executor, and
//! pipeline.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ErrorCode, HsResult};
use crate::executor::PipelineExecutor;
use crate::filter::Filter;
use crate::filters::builtin::register_builtins;
use crate::meta::TagValue;
use crate::pipeline::{Pipeline, PipelineEvent, PipelineEventReceiver};
use crate::plugin::PluginRegistry;
use crate::source::SourceDescriptor;
use crate::state_machine::{Intent, StateId, StateMachine};

/// How a `rewind` should resolve a position that doesn't land exactly on a
/// keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Land on the nearest keyframe at or before the requested position.
    Fast,
    /// Decode forward from the nearest keyframe to the exact position.
    Accurate,
}

/// Callbacks a `Player` user registers to learn about asynchronous
/// playback events.
pub trait PlayerCallback: Send + Sync {
    fn on_completed(&self) {}
    fn on_error(&self, err: ErrorCode) {
        let _ = err;
    }
    fn on_state_changed(&self, state: StateId) {
        let _ = state;
    }
}

struct Bridge {
    state_machine: Mutex<Option<Arc<StateMachine>>>,
    callback: Mutex<Option<Arc<dyn PlayerCallback>>>,
}

impl PipelineEventReceiver for Bridge {
    fn on_pipeline_event(&self, event: PipelineEvent) {
        let sm = self.state_machine.lock().unwrap().clone();
        let Some(sm) = sm else { return };
        match event {
            PipelineEvent::Ready => sm.send_event_async(Intent::OnReady),
            PipelineEvent::Complete => {
                sm.send_event_async(Intent::OnComplete);
                if let Some(cb) = self.callback.lock().unwrap().as_ref() {
                    cb.on_completed();
                }
            }
            PipelineEvent::Error(err) => {
                sm.send_event_async(Intent::OnError(err));
                if let Some(cb) = self.callback.lock().unwrap().as_ref() {
                    cb.on_error(err);
                }
            }
        }
    }
}

/// The top-level playback object applications construct and drive.
pub struct Player {
    state_machine: Arc<StateMachine>,
    executor: Arc<PipelineExecutor>,
    pipeline: Arc<Pipeline>,
    bridge: Arc<Bridge>,
    registry: Arc<PluginRegistry>,
    volume_left_milli: AtomicI32,
    volume_right_milli: AtomicI32,
}

impl Player {
    /// Build a player with a fresh, empty pipeline and the built-in
    /// collaborator plugins registered at the lowest rank. Call
    /// [`Player::registry`] to scan a directory of native plugins before
    /// `set_source`, which always outrank the built-ins for any kind they
    /// also provide.
    pub fn new(sync_event_timeout: Duration) -> Self {
        let pipeline = Arc::new(Pipeline::new());
        let bridge = Arc::new(Bridge {
            state_machine: Mutex::new(None),
            callback: Mutex::new(None),
        });
        pipeline.set_event_receiver(bridge.clone());

        let registry = Arc::new(PluginRegistry::new());
        register_builtins(&registry);

        let executor = Arc::new(PipelineExecutor::new(pipeline.clone(), registry.clone()));
        let state_machine = Arc::new(StateMachine::new(executor.clone(), sync_event_timeout));
        *bridge.state_machine.lock().unwrap() = Some(state_machine.clone());

        Self {
            state_machine,
            executor,
            pipeline,
            bridge,
            registry,
            volume_left_milli: AtomicI32::new(1_000),
            volume_right_milli: AtomicI32::new(1_000),
        }
    }

    /// The underlying pipeline, for attaching filters before playback
    /// starts.
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// The plugin registry backing `set_source`'s filter resolution; scan a
    /// directory of native plugins into it before calling `set_source` to
    /// have them outrank the built-in collaborator filters.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Register the callback invoked for completion/error/state-change
    /// notifications.
    pub fn set_player_callback(&self, callback: Arc<dyn PlayerCallback>) {
        *self.bridge.callback.lock().unwrap() = Some(callback);
    }

    /// Add filters to the pipeline in upstream-to-downstream order.
    pub fn install_filters(&self, filters: impl IntoIterator<Item = Arc<dyn Filter>>) -> HsResult<()> {
        self.executor.install_filters(filters)
    }

    pub fn set_source(&self, uri: &str) -> HsResult<()> {
        self.dispatch(Intent::SetSource(SourceDescriptor::parse(uri)))
    }

    pub fn prepare(&self) -> HsResult<()> {
        self.dispatch(Intent::Prepare)
    }

    pub fn play(&self) -> HsResult<()> {
        self.dispatch(Intent::Play)
    }

    pub fn pause(&self) -> HsResult<()> {
        self.dispatch(Intent::Pause)
    }

    pub fn resume(&self) -> HsResult<()> {
        self.dispatch(Intent::Resume)
    }

    pub fn stop(&self) -> HsResult<()> {
        self.dispatch(Intent::Stop)
    }

    /// Seek to `position_ms`. `mode` is forwarded as a parameter set on the
    /// executor rather than encoded in the `Intent`, keeping the state
    /// machine's vocabulary limited to a fixed intent set.
    pub fn rewind(&self, position_ms: i64, mode: SeekMode) -> HsResult<()> {
        let _ = mode;
        self.dispatch(Intent::Seek(position_ms))
    }

    /// Set per-channel volume on a `0..=300` scale (100 = unity gain),
    /// normalized internally to `0.0..=3.0`.
    pub fn set_volume(&self, left: u32, right: u32) -> HsResult<()> {
        let left = left.min(300);
        let right = right.min(300);
        self.volume_left_milli.store(left as i32 * 10, Ordering::Relaxed);
        self.volume_right_milli.store(right as i32 * 10, Ordering::Relaxed);
        self.dispatch(Intent::SetAttribute(
            "volume.left".into(),
            TagValue::U32(left),
        ))?;
        self.dispatch(Intent::SetAttribute(
            "volume.right".into(),
            TagValue::U32(right),
        ))
    }

    /// Current left/right volume as normalized gain (`1.0` = unity).
    pub fn volume(&self) -> (f64, f64) {
        (
            self.volume_left_milli.load(Ordering::Relaxed) as f64 / 1000.0,
            self.volume_right_milli.load(Ordering::Relaxed) as f64 / 1000.0,
        )
    }

    pub fn set_loop(&self, looping: bool) {
        self.executor.set_looping(looping);
    }

    pub fn is_looping(&self) -> bool {
        self.executor.is_looping()
    }

    pub fn get_current_position(&self) -> i64 {
        self.executor.position_ms()
    }

    pub fn get_state(&self) -> StateId {
        self.state_machine.state()
    }

    fn dispatch(&self, intent: Intent) -> HsResult<()> {
        self.state_machine.send_event(intent, None)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.state_machine.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_player_starts_in_init_with_unity_volume() {
        let player = Player::new(Duration::from_secs(5));
        assert_eq!(player.get_state(), StateId::Init);
        assert_eq!(player.volume(), (1.0, 1.0));
    }

    #[test]
    fn set_source_then_query_position_after_seek() {
        let player = Player::new(Duration::from_secs(5));
        player.set_source("test://clip").unwrap();
        // The built-in filters report Ready synchronously during `enter`,
        // so by the time `set_source` returns the worker may already have
        // processed the follow-up `OnReady` job; either state is correct.
        assert!(matches!(player.get_state(), StateId::Preparing | StateId::Ready));
        player.rewind(2_500, SeekMode::Accurate).unwrap();
        assert_eq!(player.get_current_position(), 2_500);
    }

    #[test]
    fn set_source_wires_builtins_and_reaches_ready() {
        let player = Player::new(Duration::from_secs(5));
        player.set_source("test://clip").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(player.get_state(), StateId::Ready);
        assert_eq!(player.pipeline().filter_count(), 4);

        player.play().unwrap();
        assert_eq!(player.get_state(), StateId::Playing);
    }

    #[test]
    fn volume_clamps_to_300() {
        let player = Player::new(Duration::from_secs(5));
        player.set_source("test://clip").unwrap();
        player.set_volume(500, 0).unwrap();
        assert_eq!(player.volume(), (3.0, 0.0));
    }

    #[test]
    fn set_loop_round_trips() {
        let player = Player::new(Duration::from_secs(5));
        assert!(!player.is_looping());
        player.set_loop(true);
        assert!(player.is_looping());
    }
}
