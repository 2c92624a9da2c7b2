// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Built-in collaborator plugins: a source that replays an in-memory byte
//! sequence, a passthrough demuxer/codec pair, and a ring-buffer sink.
//!
//! These exist so the engine can build a working default pipeline (and the
//! integration tests can exercise real dataflow) without a native plugin
//! directory on disk. They register at the lowest rank so any real scanned
//! plugin of the same kind always outranks them.

use std::collections::VecDeque;

use abi_stable::std_types::RResult;
use histreamer_plugin_api::{AbiBuffer, PluginBox, PluginDefBase, PluginErrorAbi, PluginInstance, PluginInstance_TO, PluginKind};

use crate::plugin::registry::PluginRegistry;

/// Rank built-ins register at; any scanned or user-registered plugin of the
/// same kind with a higher rank wins `PluginRegistry::find_best`.
const BUILTIN_RANK: u8 = 1;

/// A source that replays a fixed sequence of byte chunks, then reports
/// end-of-stream. An empty sequence (the default) is a source that is
/// immediately at EOS, useful as a minimal working default pipeline.
#[derive(Default, Clone)]
pub struct MemorySourcePlugin {
    chunks: VecDeque<Vec<u8>>,
}

impl MemorySourcePlugin {
    /// A source that replays `chunks` in order before reporting EOS.
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }
}

impl PluginInstance for MemorySourcePlugin {
    fn def(&self) -> PluginDefBase {
        PluginDefBase::new("builtin.source.memory", PluginKind::Source)
            .with_rank(BUILTIN_RANK)
            .with_description("replays an in-memory byte sequence")
    }

    fn pull(&mut self, _offset: u64, _size: u64) -> RResult<AbiBuffer, PluginErrorAbi> {
        match self.chunks.pop_front() {
            Some(data) => RResult::ROk(AbiBuffer {
                data: data.into(),
                stream_id: 0,
                pts: i64::MIN,
                dts: i64::MIN,
                flags: 0,
            }),
            None => RResult::RErr(PluginErrorAbi::EndOfStream),
        }
    }
}

/// A demuxer or codec that hands every buffer it receives straight through,
/// unchanged. One struct covers both kinds; only `def()` differs.
#[derive(Clone)]
pub struct PassthroughPlugin {
    kind: PluginKind,
    pending: Option<AbiBuffer>,
}

impl PassthroughPlugin {
    pub fn demuxer() -> Self {
        Self {
            kind: PluginKind::Demuxer,
            pending: None,
        }
    }

    pub fn codec() -> Self {
        Self {
            kind: PluginKind::Codec,
            pending: None,
        }
    }
}

impl PluginInstance for PassthroughPlugin {
    fn def(&self) -> PluginDefBase {
        let name = match self.kind {
            PluginKind::Demuxer => "builtin.demuxer.passthrough",
            PluginKind::Codec => "builtin.codec.passthrough",
            _ => "builtin.passthrough",
        };
        PluginDefBase::new(name, self.kind)
            .with_rank(BUILTIN_RANK)
            .with_description("forwards every buffer unchanged")
    }

    fn push(&mut self, buf: AbiBuffer) -> RResult<(), PluginErrorAbi> {
        self.pending = Some(buf);
        RResult::ROk(())
    }

    fn pull(&mut self, _offset: u64, _size: u64) -> RResult<AbiBuffer, PluginErrorAbi> {
        match self.pending.take() {
            Some(buf) => RResult::ROk(buf),
            None => RResult::RErr(PluginErrorAbi::Again),
        }
    }
}

/// A sink that keeps the last `capacity` pushed buffers, dropping the
/// oldest once full, rather than rendering to any real device.
pub struct RingBufferSinkPlugin {
    kind: PluginKind,
    capacity: usize,
    buffered: VecDeque<Vec<u8>>,
}

impl RingBufferSinkPlugin {
    const DEFAULT_CAPACITY: usize = 64;

    pub fn audio() -> Self {
        Self {
            kind: PluginKind::AudioSink,
            capacity: Self::DEFAULT_CAPACITY,
            buffered: VecDeque::new(),
        }
    }

    pub fn video() -> Self {
        Self {
            kind: PluginKind::VideoSink,
            capacity: Self::DEFAULT_CAPACITY,
            buffered: VecDeque::new(),
        }
    }

    /// Number of buffers currently retained.
    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }
}

impl PluginInstance for RingBufferSinkPlugin {
    fn def(&self) -> PluginDefBase {
        let name = match self.kind {
            PluginKind::AudioSink => "builtin.sink.ringbuffer.audio",
            PluginKind::VideoSink => "builtin.sink.ringbuffer.video",
            _ => "builtin.sink.ringbuffer",
        };
        PluginDefBase::new(name, self.kind)
            .with_rank(BUILTIN_RANK)
            .with_description("retains the last N pushed buffers in a ring")
    }

    fn push(&mut self, buf: AbiBuffer) -> RResult<(), PluginErrorAbi> {
        if self.buffered.len() >= self.capacity {
            self.buffered.pop_front();
        }
        self.buffered.push_back(buf.data.to_vec());
        RResult::ROk(())
    }
}

fn to_plugin_box<T: PluginInstance + 'static>(plugin: T) -> PluginBox {
    PluginInstance_TO::from_value(plugin, abi_stable::sabi_trait::TD_Opaque)
}

/// Register every built-in collaborator filter with `registry`, at the
/// lowest rank, so a real scanned plugin for the same kind always wins.
pub fn register_builtins(registry: &PluginRegistry) {
    registry.register_builtin(MemorySourcePlugin::default().def(), || {
        to_plugin_box(MemorySourcePlugin::default())
    });
    registry.register_builtin(PassthroughPlugin::demuxer().def(), || {
        to_plugin_box(PassthroughPlugin::demuxer())
    });
    registry.register_builtin(PassthroughPlugin::codec().def(), || {
        to_plugin_box(PassthroughPlugin::codec())
    });
    registry.register_builtin(RingBufferSinkPlugin::audio().def(), || {
        to_plugin_box(RingBufferSinkPlugin::audio())
    });
    registry.register_builtin(RingBufferSinkPlugin::video().def(), || {
        to_plugin_box(RingBufferSinkPlugin::video())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_replays_chunks_then_eos() {
        let mut source = MemorySourcePlugin::with_chunks(vec![vec![1, 2, 3]]);
        match source.pull(0, 0) {
            RResult::ROk(buf) => assert_eq!(buf.data.as_slice(), &[1, 2, 3]),
            RResult::RErr(e) => panic!("expected data, got {e:?}"),
        }
        assert_eq!(source.pull(0, 0).err(), Some(PluginErrorAbi::EndOfStream));
    }

    #[test]
    fn empty_memory_source_is_immediately_at_eos() {
        let mut source = MemorySourcePlugin::default();
        assert_eq!(source.pull(0, 0).err(), Some(PluginErrorAbi::EndOfStream));
    }

    #[test]
    fn passthrough_forwards_pushed_buffer_unchanged() {
        let mut demuxer = PassthroughPlugin::demuxer();
        let buf = AbiBuffer {
            data: vec![9, 8, 7].into(),
            stream_id: 1,
            pts: 100,
            dts: 100,
            flags: 0,
        };
        demuxer.push(buf.clone()).unwrap();
        let out = demuxer.pull(0, 0).unwrap();
        assert_eq!(out.data.as_slice(), buf.data.as_slice());
        assert_eq!(out.stream_id, buf.stream_id);
    }

    #[test]
    fn ring_buffer_sink_drops_oldest_when_full() {
        let mut sink = RingBufferSinkPlugin::audio();
        sink.capacity = 2;
        for i in 0..3u8 {
            sink.push(AbiBuffer {
                data: vec![i].into(),
                stream_id: 0,
                pts: i64::MIN,
                dts: i64::MIN,
                flags: 0,
            })
            .unwrap();
        }
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn register_builtins_populates_every_kind() {
        let registry = PluginRegistry::new();
        register_builtins(&registry);
        assert_eq!(registry.descriptors_of_kind(PluginKind::Source).len(), 1);
        assert_eq!(registry.descriptors_of_kind(PluginKind::Demuxer).len(), 1);
        assert_eq!(registry.descriptors_of_kind(PluginKind::Codec).len(), 1);
        assert_eq!(registry.descriptors_of_kind(PluginKind::AudioSink).len(), 1);
        assert_eq!(registry.descriptors_of_kind(PluginKind::VideoSink).len(), 1);
    }
}
