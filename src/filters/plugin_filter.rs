// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `PluginFilter`: the one [`Filter`] implementation that wires a loaded
//! plugin instance into the pipeline.
//!
//! Source, demuxer, codec, and sink filters are all the same shape from the
//! pipeline's point of view — a filter that owns exactly one
//! [`PluginInstance`](histreamer_plugin_api::PluginInstance) and translates
//! buffers/parameters across the ABI boundary — so one wrapper covers all
//! four `PluginKind`s rather than one hand-written filter per kind.
//!
//! Dataflow direction depends on `plugin_type`: a `Source` has no in-port
//! and pumps itself on a background `Task` (nothing upstream calls it); a
//! `Demuxer`/`Codec` has both an in-port and an out-port and forwards
//! whatever `pull` produces after each `push`; an `AudioSink`/`VideoSink`
//! has only an in-port and intercepts end-of-stream there rather than
//! handing it to the plugin's `push`.

use std::sync::{Arc, Weak};

use abi_stable::std_types::{ROption, RResult};
use histreamer_plugin_api::{AbiBuffer, PluginBox, PluginErrorAbi, PluginKind, TagValueAbi};
use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::error::{ErrorCode, HsResult};
use crate::filter::{Filter, FilterCore};
use crate::meta::{CapabilitySet, Meta, TagValue, TypedMeta};
use crate::osal::Task;
use crate::plugin::registry::to_host_capability;
use crate::port::{WorkMode, PORT_NAME_DEFAULT};

fn to_abi_buffer(buf: &Buffer) -> AbiBuffer {
    AbiBuffer {
        data: buf.as_slice().to_vec().into(),
        stream_id: buf.stream_id(),
        pts: buf.pts().unwrap_or(i64::MIN),
        dts: buf.dts().unwrap_or(i64::MIN),
        flags: buf.flags(),
    }
}

fn from_abi_buffer(abi: AbiBuffer, meta_kind: &TypedMeta) -> Buffer {
    let mut buf = Buffer::alloc(abi.data.len(), 0, abi.stream_id, meta_kind.fresh_of_same_kind());
    buf.write(&abi.data, Some(0));
    if abi.pts != i64::MIN {
        buf.set_pts(abi.pts);
    }
    if abi.dts != i64::MIN {
        buf.set_dts(abi.dts);
    }
    buf.set_flags(abi.flags);
    buf
}

fn to_abi_value(value: TagValue) -> HsResult<TagValueAbi> {
    Ok(match value {
        TagValue::Str(s) => TagValueAbi::Str(s.into()),
        TagValue::U32(v) => TagValueAbi::U32(v),
        TagValue::U64(v) => TagValueAbi::U64(v),
        TagValue::I64(v) => TagValueAbi::I64(v),
        TagValue::Bool(v) => TagValueAbi::Bool(v),
        TagValue::Bytes(b) => TagValueAbi::Bytes(b.into()),
        // The ABI has no floating-point tag variant (integer/string/bool/bytes
        // only); float parameters stay host-side.
        TagValue::F64(_) => return Err(ErrorCode::Unimplemented),
    })
}

fn from_abi_value(value: TagValueAbi) -> TagValue {
    match value {
        TagValueAbi::Str(s) => TagValue::Str(s.to_string()),
        TagValueAbi::U32(v) => TagValue::U32(v),
        TagValueAbi::U64(v) => TagValue::U64(v),
        TagValueAbi::I64(v) => TagValue::I64(v),
        TagValueAbi::Bool(v) => TagValue::Bool(v),
        TagValueAbi::Bytes(b) => TagValue::Bytes(b.to_vec()),
    }
}

/// Whether `kind` is driven by pulling (sources pump themselves; everything
/// else is pushed into).
fn is_self_driving(kind: PluginKind) -> bool {
    matches!(kind, PluginKind::Source)
}

fn is_sink(kind: PluginKind) -> bool {
    matches!(kind, PluginKind::AudioSink | PluginKind::VideoSink)
}

/// A filter that owns one plugin instance and forwards lifecycle/data-path
/// calls to it, converting between host and ABI types at the boundary.
pub struct PluginFilter {
    core: FilterCore,
    plugin: Mutex<PluginBox>,
    mode: WorkMode,
    meta_kind: TypedMeta,
    kind: PluginKind,
    pump_task: Mutex<Option<Task>>,
}

impl PluginFilter {
    /// Build a filter around `plugin`, adding the in/out ports its
    /// `plugin_type` calls for: sources produce only, sinks
    /// consume only, demuxers/codecs do both.
    pub fn new(name: impl Into<String>, plugin: PluginBox, mode: WorkMode, meta_kind: TypedMeta) -> Arc<Self> {
        let kind = plugin.def().plugin_type;
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<PluginFilter>| {
            let owner: Weak<dyn Filter> = weak.clone();
            let core = FilterCore::new(name, owner);
            match kind {
                PluginKind::Source => {
                    core.add_out_port(PORT_NAME_DEFAULT);
                }
                PluginKind::AudioSink | PluginKind::VideoSink => {
                    core.add_in_port(PORT_NAME_DEFAULT);
                }
                PluginKind::Demuxer | PluginKind::Codec => {
                    core.add_in_port(PORT_NAME_DEFAULT);
                    core.add_out_port(PORT_NAME_DEFAULT);
                }
                PluginKind::Invalid => {}
            }
            Self {
                core,
                plugin: Mutex::new(plugin),
                mode,
                meta_kind,
                kind,
                pump_task: Mutex::new(None),
            }
        })
    }

    /// Pull one buffer from the plugin and push it out the default out-port,
    /// forwarding end-of-stream rather than treating it as an error. Used by
    /// both the source pump loop and, after a successful push, by
    /// demuxer/codec filters draining whatever that push produced.
    fn pump_once(&self) -> HsResult<bool> {
        let out_port = match self.core().out_port(PORT_NAME_DEFAULT) {
            Some(p) => p,
            None => return Ok(false),
        };
        match self.plugin.lock().pull(0, 0) {
            RResult::ROk(abi) => {
                let eos = abi.is_eos();
                let buf = from_abi_buffer(abi, &self.meta_kind);
                out_port.push_data(buf)?;
                Ok(!eos)
            }
            RResult::RErr(PluginErrorAbi::EndOfStream) => {
                let eos = Buffer::eos(0, self.meta_kind.clone());
                out_port.push_data(eos)?;
                Ok(false)
            }
            RResult::RErr(PluginErrorAbi::Again) => Ok(true),
            RResult::RErr(e) => {
                self.report_error(e.into());
                Ok(false)
            }
        }
    }
}

impl Filter for PluginFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn on_init(&self) -> HsResult<()> {
        match self.plugin.lock().init() {
            RResult::ROk(()) => Ok(()),
            RResult::RErr(e) => Err(e.into()),
        }
    }

    fn on_prepare(&self) -> HsResult<()> {
        match self.plugin.lock().prepare() {
            RResult::ROk(()) => Ok(()),
            RResult::RErr(e) => Err(e.into()),
        }
    }

    fn on_start(&self) -> HsResult<()> {
        match self.plugin.lock().start() {
            RResult::ROk(()) => {}
            RResult::RErr(e) => return Err(e.into()),
        }
        if is_self_driving(self.kind) {
            let owner = self.core().owner();
            let mut task = self.pump_task.lock();
            *task = Some(Task::spawn(format!("pump:{}", self.name()), move || {
                match owner.upgrade() {
                    Some(filter) => filter.pump(),
                    None => false,
                }
            }));
        }
        Ok(())
    }

    fn on_pause(&self) -> HsResult<()> {
        // Pausing keeps the pump thread alive; it simply stops making
        // progress once the plugin itself reports `Again` on every pull,
        // matching how a paused sink stops accepting new pushes downstream.
        match self.plugin.lock().pause() {
            RResult::ROk(()) => Ok(()),
            RResult::RErr(e) => Err(e.into()),
        }
    }

    fn on_stop(&self) -> HsResult<()> {
        if let Some(mut task) = self.pump_task.lock().take() {
            task.stop();
        }
        match self.plugin.lock().stop() {
            RResult::ROk(()) => Ok(()),
            RResult::RErr(e) => Err(e.into()),
        }
    }

    fn pump(&self) -> bool {
        if !is_self_driving(self.kind) {
            return false;
        }
        match self.pump_once() {
            Ok(keep_going) => keep_going,
            Err(e) => {
                self.report_error(e);
                false
            }
        }
    }

    fn push_data(&self, _port_name: &str, buf: Buffer) -> HsResult<()> {
        let was_eos = buf.is_eos();

        if is_sink(self.kind) {
            // A sink never hands EOS to the plugin's `write` path; it
            // reports completion itself instead. A sink is
            // also the only filter in a chain allowed to call
            // `report_complete`, since `ReadyAggregator` forwards every
            // `Complete` event unconditionally rather than counting them.
            if was_eos {
                self.report_complete();
                return Ok(());
            }
            let abi = to_abi_buffer(&buf);
            return match self.plugin.lock().push(abi) {
                RResult::ROk(()) => Ok(()),
                RResult::RErr(e) => Err(e.into()),
            };
        }

        if was_eos {
            // Demuxer/codec filters forward EOS downstream without
            // reporting completion themselves; only the terminal sink does.
            if let Some(out_port) = self.core().out_port(PORT_NAME_DEFAULT) {
                out_port.push_data(buf)?;
            }
            return Ok(());
        }

        let abi = to_abi_buffer(&buf);
        match self.plugin.lock().push(abi) {
            RResult::ROk(()) => self.forward_pulled_output(),
            RResult::RErr(PluginErrorAbi::EndOfStream) => {
                if let Some(out_port) = self.core().out_port(PORT_NAME_DEFAULT) {
                    out_port.push_data(Buffer::eos(0, self.meta_kind.clone()))?;
                }
                Ok(())
            }
            RResult::RErr(e) => Err(e.into()),
        }
    }

    fn pull_data(&self, _port_name: &str, offset: u64, size: usize) -> HsResult<Buffer> {
        match self.plugin.lock().pull(offset, size as u64) {
            RResult::ROk(abi) => {
                let eos = abi.is_eos();
                let buf = from_abi_buffer(abi, &self.meta_kind);
                if eos && is_sink(self.kind) {
                    self.report_complete();
                }
                Ok(buf)
            }
            RResult::RErr(PluginErrorAbi::EndOfStream) => {
                if is_sink(self.kind) {
                    self.report_complete();
                }
                Err(ErrorCode::EndOfStream)
            }
            RResult::RErr(e) => Err(e.into()),
        }
    }

    fn negotiate(&self, _port_name: &str, upstream_meta: &Meta) -> HsResult<CapabilitySet> {
        let accepted = {
            let plugin = self.plugin.lock();
            let def = plugin.def();
            CapabilitySet::from_caps(def.input_caps.iter().map(to_host_capability))
        };
        // No declared input caps means "accepts anything", matching
        // `PluginRegistry::find_best`'s wildcard-match rule for the same
        // empty-set case.
        if accepted.is_empty() {
            let mut set = CapabilitySet::new();
            set.push(crate::meta::Capability::any());
            return Ok(set);
        }
        if !crate::meta::compatible_with_set(&accepted, upstream_meta) {
            return Err(ErrorCode::NegotiationFailed);
        }
        Ok(accepted)
    }

    fn supported_work_modes(&self, _port_name: &str) -> Vec<WorkMode> {
        vec![self.mode]
    }

    fn set_parameter(&self, tag: &str, value: TagValue) -> HsResult<()> {
        let abi_value = to_abi_value(value)?;
        match self.plugin.lock().set_parameter(tag.into(), abi_value) {
            RResult::ROk(()) => Ok(()),
            RResult::RErr(e) => Err(e.into()),
        }
    }

    fn get_parameter(&self, tag: &str) -> HsResult<TagValue> {
        match self.plugin.lock().get_parameter(tag.into()) {
            ROption::RSome(value) => Ok(from_abi_value(value)),
            ROption::RNone => Err(ErrorCode::Unimplemented),
        }
    }

    fn seek_to(&self, position_ms: i64) -> HsResult<()> {
        match self.plugin.lock().seek_to(position_ms) {
            RResult::ROk(()) => Ok(()),
            RResult::RErr(e) => Err(e.into()),
        }
    }
}

impl PluginFilter {
    /// After a successful push into a demuxer/codec plugin, drain whatever
    /// output it produced and forward each buffer out the default out-port.
    /// Demuxers/codecs are assumed to produce zero or more outputs per
    /// input; `Again` means "nothing ready yet", not an error.
    fn forward_pulled_output(&self) -> HsResult<()> {
        let Some(out_port) = self.core().out_port(PORT_NAME_DEFAULT) else {
            return Ok(());
        };
        loop {
            match self.plugin.lock().pull(0, 0) {
                RResult::ROk(abi) => {
                    let eos = abi.is_eos();
                    let buf = from_abi_buffer(abi, &self.meta_kind);
                    out_port.push_data(buf)?;
                    if eos {
                        break;
                    }
                }
                RResult::RErr(PluginErrorAbi::Again) => break,
                RResult::RErr(PluginErrorAbi::EndOfStream) => {
                    out_port.push_data(Buffer::eos(0, self.meta_kind.clone()))?;
                    break;
                }
                RResult::RErr(PluginErrorAbi::Unimplemented) => break,
                RResult::RErr(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi_stable::sabi_trait::TD_Opaque;
    use histreamer_plugin_api::{CapabilityAbi, PluginDefBase, PluginInstance, PluginInstance_TO};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingSink {
        pushes: Arc<AtomicU32>,
    }

    impl PluginInstance for CountingSink {
        fn def(&self) -> PluginDefBase {
            PluginDefBase::new("test.sink", PluginKind::AudioSink)
        }

        fn push(&mut self, buf: AbiBuffer) -> RResult<(), PluginErrorAbi> {
            let _ = buf;
            self.pushes.fetch_add(1, Ordering::SeqCst);
            RResult::ROk(())
        }
    }

    #[test]
    fn sink_intercepts_eos_without_pushing_to_plugin() {
        let pushes = Arc::new(AtomicU32::new(0));
        let plugin = PluginInstance_TO::from_value(
            CountingSink {
                pushes: pushes.clone(),
            },
            TD_Opaque,
        );
        let filter = PluginFilter::new(
            "sink",
            plugin,
            WorkMode::Push,
            TypedMeta::Audio(Default::default()),
        );

        let buf = Buffer::alloc(4, 0, 0, TypedMeta::Audio(Default::default()));
        filter.push_data("default", buf).unwrap();
        assert_eq!(pushes.load(Ordering::SeqCst), 1);

        let eos = Buffer::eos(0, TypedMeta::Audio(Default::default()));
        filter.push_data("default", eos).unwrap();
        // The plugin never sees the EOS buffer; only the non-EOS push above
        // reached it.
        assert_eq!(pushes.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct ConstrainedDemuxer;

    impl PluginInstance for ConstrainedDemuxer {
        fn def(&self) -> PluginDefBase {
            PluginDefBase::new("test.demuxer", PluginKind::Demuxer)
                .with_input_cap(CapabilityAbi::with_mime("video/*"))
        }
    }

    #[test]
    fn negotiate_rejects_incompatible_upstream_meta() {
        let plugin = PluginInstance_TO::from_value(ConstrainedDemuxer, TD_Opaque);
        let filter = PluginFilter::new(
            "demuxer",
            plugin,
            WorkMode::Push,
            TypedMeta::Video(Default::default()),
        );

        let audio_meta = Meta::new().with(crate::meta::tags::MIME, TagValue::Str("audio/raw".into()));
        assert_eq!(
            filter.negotiate("default", &audio_meta),
            Err(ErrorCode::NegotiationFailed)
        );
    }
}
