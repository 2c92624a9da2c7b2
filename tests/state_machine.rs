// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end scenarios for the player state machine.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use abi_stable::sabi_trait::TD_Opaque;
use histreamer::error::{ErrorCode, HsResult};
use histreamer::executor::PlayExecutor;
use histreamer::meta::Meta;
use histreamer::plugin::PluginRegistry;
use histreamer::source::SourceDescriptor;
use histreamer::state_machine::{Intent, StateId, StateMachine};
use histreamer::Player;
use histreamer_plugin_api::{PluginBox, PluginDefBase, PluginInstance, PluginInstance_TO, PluginKind};

/// A `PlayExecutor` standing in for a real filter pipeline: rejects an
/// empty source, and records seeks/completion behavior for assertions.
struct FakeExecutor {
    looping: AtomicBool,
    last_seek_ms: AtomicI64,
}

impl FakeExecutor {
    fn new() -> Self {
        Self {
            looping: AtomicBool::new(false),
            last_seek_ms: AtomicI64::new(-1),
        }
    }
}

impl PlayExecutor for FakeExecutor {
    fn do_set_source(&self, source: &SourceDescriptor) -> HsResult<()> {
        if source.uri().is_empty() {
            Err(ErrorCode::InvalidSource)
        } else {
            Ok(())
        }
    }

    fn do_seek(&self, position_ms: i64, _sync: bool) -> HsResult<()> {
        self.last_seek_ms.store(position_ms, Ordering::SeqCst);
        Ok(())
    }

    fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }
}

fn settle() {
    std::thread::sleep(Duration::from_millis(30));
}

#[test]
fn s1_init_rejects_invalid_source() {
    let executor = Arc::new(FakeExecutor::new());
    let sm = StateMachine::new(executor, Duration::from_secs(5));

    let result = sm.send_event(Intent::SetSource(SourceDescriptor::parse("")), None);
    assert_eq!(result, Err(ErrorCode::InvalidSource));
    assert_eq!(sm.state(), StateId::Init);
}

#[test]
fn s2_happy_path_start() {
    let executor = Arc::new(FakeExecutor::new());
    let sm = StateMachine::new(executor, Duration::from_secs(5));

    sm.send_event(Intent::SetSource(SourceDescriptor::parse("FakeUri")), None)
        .unwrap();
    assert_eq!(sm.state(), StateId::Preparing);

    // Stand-in pipeline has no real filters, so Ready is driven manually
    // the way the real pipeline's event bridge would.
    sm.send_event(Intent::OnReady, None).unwrap();
    assert_eq!(sm.state(), StateId::Ready);

    sm.send_event(Intent::Play, None).unwrap();
    assert_eq!(sm.state(), StateId::Playing);
}

#[test]
fn s3_play_pending_during_preparing() {
    let executor = Arc::new(FakeExecutor::new());
    let sm = StateMachine::new(executor, Duration::from_secs(5));

    sm.send_event(Intent::SetSource(SourceDescriptor::parse("FakeUri")), None)
        .unwrap();
    assert_eq!(sm.state(), StateId::Preparing);

    sm.send_event_async(Intent::Play);
    settle();
    assert_eq!(sm.state(), StateId::Preparing, "Play must wait for Ready");

    sm.send_event_async(Intent::OnReady);
    settle();
    assert_eq!(sm.state(), StateId::Playing);
}

#[test]
fn s4_non_looping_completion_stops() {
    let executor = Arc::new(FakeExecutor::new());
    let sm = StateMachine::new(executor, Duration::from_secs(5));

    sm.send_event(Intent::SetSource(SourceDescriptor::parse("FakeUri")), None)
        .unwrap();
    sm.send_event(Intent::OnReady, None).unwrap();
    sm.send_event(Intent::Play, None).unwrap();
    assert_eq!(sm.state(), StateId::Playing);

    sm.send_event(Intent::OnComplete, None).unwrap();
    assert_eq!(sm.state(), StateId::Init);
}

#[test]
fn s5_looping_completion_restarts_at_zero() {
    let executor = Arc::new(FakeExecutor::new());
    executor.looping.store(true, Ordering::SeqCst);
    let sm = StateMachine::new(executor.clone(), Duration::from_secs(5));

    sm.send_event(Intent::SetSource(SourceDescriptor::parse("FakeUri")), None)
        .unwrap();
    sm.send_event(Intent::OnReady, None).unwrap();
    sm.send_event(Intent::Play, None).unwrap();

    sm.send_event(Intent::OnComplete, None).unwrap();
    assert_eq!(sm.state(), StateId::Playing);
    assert_eq!(executor.last_seek_ms.load(Ordering::SeqCst), 0);
}

#[derive(Default)]
struct StubAudioCodec;

impl PluginInstance for StubAudioCodec {
    fn def(&self) -> PluginDefBase {
        PluginDefBase::new("stub.codec", PluginKind::Codec)
    }
}

fn make_codec() -> PluginBox {
    PluginInstance_TO::from_value(StubAudioCodec, TD_Opaque)
}

#[test]
fn s6_capability_selection_picks_highest_rank() {
    let registry = PluginRegistry::new();
    registry.register_builtin(
        PluginDefBase::new("codec-80", PluginKind::Codec).with_rank(80),
        make_codec,
    );
    registry.register_builtin(
        PluginDefBase::new("codec-90", PluginKind::Codec).with_rank(90),
        make_codec,
    );

    let factory = registry
        .find_best(PluginKind::Codec, &Meta::new())
        .expect("at least one codec registered");
    let instance = factory();
    assert_eq!(instance.def().name.as_str(), "codec-90");
}

/// Unlike `s1`-`s6` (which exercise `StateMachine` against a
/// `FakeExecutor` standing in for a pipeline), this drives a real
/// `Player` through its built-in source/demuxer/codec/sink chain: an
/// empty `MemorySourcePlugin` is immediately at EOS, so the pipeline
/// should flow that EOS buffer all the way to the ring-buffer sink,
/// which reports completion and drops the player back to `Init`.
#[test]
fn s7_real_pipeline_drives_an_empty_source_to_completion() {
    let player = Player::new(Duration::from_secs(5));
    player.set_source("test://clip").unwrap();
    settle();
    assert_eq!(player.get_state(), StateId::Ready);
    assert_eq!(player.pipeline().filter_count(), 4);

    player.play().unwrap();
    // The source's pump thread may race this assertion to EOS and all the
    // way through to completion on its own, so either observation is
    // correct right after `play` returns; `settle` below is what pins
    // down the final state.
    assert!(matches!(player.get_state(), StateId::Playing | StateId::Init));

    settle();
    assert_eq!(player.get_state(), StateId::Init);
}
