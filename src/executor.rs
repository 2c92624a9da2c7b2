// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `PlayExecutor`: the seam between the player state machine and the filter
//! pipeline.
//!
//! Every `Do*` method defaults to a no-op success, matching the base
//! executor's defaults; a concrete executor only overrides what actually
//! needs pipeline work. [`PipelineExecutor`] is the one shipped with this
//! crate, wiring a single [`Pipeline`] of source/demux/decode/sink filters.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{ErrorCode, HsResult};
use crate::filter::Filter;
use crate::filters::PluginFilter;
use crate::meta::{Meta, TagValue, TypedMeta};
use crate::pipeline::Pipeline;
use crate::plugin::PluginRegistry;
use crate::port::WorkMode;
use crate::source::SourceDescriptor;
use histreamer_plugin_api::PluginKind;

/// Hooks the state machine calls when dispatching an intent that requires
/// touching the pipeline. Overriding a method opts a concrete executor into
/// real behavior for that action; the unoverridden defaults are all no-ops.
pub trait PlayExecutor: Send + Sync {
    /// Build out the filter chain once a source is known. Called on entry
    /// to `Preparing`.
    fn prepare_filters(&self) -> HsResult<()> {
        Ok(())
    }

    /// Record the source to play and validate it eagerly enough to reject
    /// obviously bad input before `Preparing` begins.
    fn do_set_source(&self, source: &SourceDescriptor) -> HsResult<()> {
        let _ = source;
        Ok(())
    }

    fn do_play(&self) -> HsResult<()> {
        Ok(())
    }

    fn do_pause(&self) -> HsResult<()> {
        Ok(())
    }

    fn do_resume(&self) -> HsResult<()> {
        Ok(())
    }

    fn do_stop(&self) -> HsResult<()> {
        Ok(())
    }

    /// Seek to `position_ms` milliseconds; `sync` mirrors the original
    /// distinction between a user-initiated seek (which blocks until the
    /// pipeline confirms) and an internal loop-restart seek.
    fn do_seek(&self, position_ms: i64, sync: bool) -> HsResult<()> {
        let _ = (position_ms, sync);
        Ok(())
    }

    fn do_on_ready(&self) -> HsResult<()> {
        Ok(())
    }

    /// Apply a runtime attribute such as volume.
    /// Unrecognized tags are accepted and ignored by default; a concrete
    /// executor overrides this to forward tags its filters understand.
    fn do_set_attribute(&self, tag: &str, value: &TagValue) -> HsResult<()> {
        let _ = (tag, value);
        Ok(())
    }

    /// Called when the pipeline reports end-of-stream. Returning `Ok` tells
    /// the caller playback may restart (looping); the executor itself does
    /// not decide whether to loop, the `Playing` state does.
    fn do_on_complete(&self) -> HsResult<()> {
        Ok(())
    }

    fn do_on_error(&self, err: ErrorCode) {
        warn!(error = %err, "pipeline reported an unrecoverable error");
    }

    /// Whether a completed stream should restart at zero rather than stop.
    /// The `Playing` state consults this after `do_on_complete` succeeds;
    /// only `PipelineExecutor` currently makes it configurable.
    fn is_looping(&self) -> bool {
        false
    }
}

/// The concrete executor shipped with the engine: one [`Pipeline`] plus
/// whatever filters `set_source` decides to wire into it.
pub struct PipelineExecutor {
    pipeline: Arc<Pipeline>,
    registry: Arc<PluginRegistry>,
    single_loop: AtomicBool,
    position_ms: AtomicI64,
}

impl PipelineExecutor {
    pub fn new(pipeline: Arc<Pipeline>, registry: Arc<PluginRegistry>) -> Self {
        Self {
            pipeline,
            registry,
            single_loop: AtomicBool::new(false),
            position_ms: AtomicI64::new(0),
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Current loop setting.
    pub fn is_looping(&self) -> bool {
        self.single_loop.load(Ordering::Relaxed)
    }

    pub fn set_looping(&self, looping: bool) {
        self.single_loop.store(looping, Ordering::Relaxed);
    }

    pub fn position_ms(&self) -> i64 {
        self.position_ms.load(Ordering::Relaxed)
    }

    /// Install the filter chain built by the caller (typically `Player`,
    /// which resolves plugins through the registry). Keeping chain
    /// construction outside the executor lets `Player` own plugin
    /// selection while the executor only drives lifecycle.
    pub fn install_filters(&self, filters: impl IntoIterator<Item = Arc<dyn Filter>>) -> HsResult<()> {
        self.pipeline.add_filters(filters)
    }

    fn resolve(&self, kind: PluginKind, meta: &Meta, mode: WorkMode, meta_kind: TypedMeta, name: &str) -> HsResult<Arc<dyn Filter>> {
        let factory = self.registry.find_best(kind, meta).ok_or(ErrorCode::UnsupportedFormat)?;
        let filter: Arc<dyn Filter> = PluginFilter::new(name, factory(), mode, meta_kind);
        Ok(filter)
    }
}

impl PlayExecutor for PipelineExecutor {
    fn prepare_filters(&self) -> HsResult<()> {
        self.pipeline.init()?;
        self.pipeline.prepare()
    }

    /// Resolve a source/demuxer/codec/audio-sink chain from the registry
    /// and wire it into the pipeline. The source's scheme and
    /// the sink kind are the only choices made here; everything else
    /// negotiates by capability, so a placeholder `Meta` that matches any
    /// plugin with no declared input caps is enough to pick the built-ins.
    fn do_set_source(&self, source: &SourceDescriptor) -> HsResult<()> {
        let _ = source;
        let meta = Meta::new();

        let demuxer_source = self.resolve(PluginKind::Source, &meta, WorkMode::Push, TypedMeta::Audio(Default::default()), "source")?;
        let demuxer = self.resolve(PluginKind::Demuxer, &meta, WorkMode::Push, TypedMeta::Audio(Default::default()), "demuxer")?;
        let codec = self.resolve(PluginKind::Codec, &meta, WorkMode::Push, TypedMeta::Audio(Default::default()), "codec")?;
        let sink = self.resolve(PluginKind::AudioSink, &meta, WorkMode::Push, TypedMeta::Audio(Default::default()), "sink")?;

        self.pipeline.add_filters([
            demuxer_source.clone(),
            demuxer.clone(),
            codec.clone(),
            sink.clone(),
        ])?;
        self.pipeline.link_filters(&demuxer_source, &demuxer)?;
        self.pipeline.link_filters(&demuxer, &codec)?;
        self.pipeline.link_filters(&codec, &sink)?;
        Ok(())
    }

    fn do_play(&self) -> HsResult<()> {
        info!("starting pipeline");
        self.pipeline.start()
    }

    fn do_pause(&self) -> HsResult<()> {
        self.pipeline.pause()
    }

    fn do_resume(&self) -> HsResult<()> {
        self.pipeline.resume()
    }

    fn do_stop(&self) -> HsResult<()> {
        self.pipeline.stop()
    }

    /// Flush the pipeline, seek the demuxer, then resume flow:
    /// `flush_start` -> `seek_to` -> `flush_end`. Filters that don't own a
    /// seekable medium report `Unimplemented`, which is expected and
    /// ignored rather than aborting the seek for the whole chain.
    fn do_seek(&self, position_ms: i64, _sync: bool) -> HsResult<()> {
        self.pipeline.flush_start()?;
        for filter in self.pipeline.filters() {
            match filter.seek_to(position_ms) {
                Ok(()) | Err(ErrorCode::Unimplemented) => {}
                Err(e) => return Err(e),
            }
        }
        self.position_ms.store(position_ms, Ordering::Relaxed);
        self.pipeline.flush_end()
    }

    fn do_on_complete(&self) -> HsResult<()> {
        if self.is_looping() {
            self.position_ms.store(0, Ordering::Relaxed);
        }
        Ok(())
    }

    fn is_looping(&self) -> bool {
        PipelineExecutor::is_looping(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_executor_is_not_looping_and_at_zero() {
        let executor = PipelineExecutor::new(Arc::new(Pipeline::new()), Arc::new(PluginRegistry::new()));
        assert!(!executor.is_looping());
        assert_eq!(executor.position_ms(), 0);
    }

    #[test]
    fn seek_updates_position() {
        let executor = PipelineExecutor::new(Arc::new(Pipeline::new()), Arc::new(PluginRegistry::new()));
        executor.do_seek(1_500, true).unwrap();
        assert_eq!(executor.position_ms(), 1_500);
    }

    #[test]
    fn looping_completion_resets_position_to_zero() {
        let executor = PipelineExecutor::new(Arc::new(Pipeline::new()), Arc::new(PluginRegistry::new()));
        executor.set_looping(true);
        executor.do_seek(5_000, true).unwrap();
        executor.do_on_complete().unwrap();
        assert_eq!(executor.position_ms(), 0);
    }

    #[test]
    fn non_looping_completion_keeps_position() {
        let executor = PipelineExecutor::new(Arc::new(Pipeline::new()), Arc::new(PluginRegistry::new()));
        executor.do_seek(5_000, true).unwrap();
        executor.do_on_complete().unwrap();
        assert_eq!(executor.position_ms(), 5_000);
    }

    #[test]
    fn set_source_without_builtins_is_unsupported_format() {
        let executor = PipelineExecutor::new(Arc::new(Pipeline::new()), Arc::new(PluginRegistry::new()));
        let source = SourceDescriptor::parse("/tmp/song.mp3");
        assert_eq!(executor.do_set_source(&source), Err(ErrorCode::UnsupportedFormat));
    }

    #[test]
    fn set_source_with_builtins_wires_four_linked_filters() {
        let registry = Arc::new(PluginRegistry::new());
        crate::filters::builtin::register_builtins(&registry);
        let pipeline = Arc::new(Pipeline::new());
        let executor = PipelineExecutor::new(pipeline.clone(), registry);

        let source = SourceDescriptor::parse("/tmp/song.mp3");
        executor.do_set_source(&source).unwrap();

        assert_eq!(pipeline.filter_count(), 4);
    }
}
