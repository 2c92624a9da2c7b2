// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `Filter` trait and its shared bookkeeping, `FilterCore`.
//!
//! A filter wraps zero or more plugins behind a small state machine
//! (`Created -> Initialized -> Preparing -> Ready -> Running <-> Paused`,
//! `Stop` always returns to `Initialized`) and a set of named ports. Concrete
//! filters embed a [`FilterCore`] and implement the hook methods; the
//! default-method bodies on [`Filter`] enforce the state machine so every
//! filter gets it for free, matching the base-class pattern the lifecycle
//! headers use.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::error::{ErrorCode, HsResult};
use crate::meta::{CapabilitySet, Meta, TagValue};
use crate::port::{InPort, OutPort, WorkMode};

/// Lifecycle state of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Created,
    Initialized,
    Preparing,
    Ready,
    Running,
    Paused,
}

/// Upward-facing notifications a filter posts to its owning pipeline.
#[derive(Debug, Clone)]
pub enum FilterEvent {
    /// This filter finished preparing and is ready to run.
    Ready,
    /// This filter reached end-of-stream on all its inputs.
    Complete,
    /// An unrecoverable error occurred.
    Error(ErrorCode),
}

/// Sink for [`FilterEvent`]s, implemented by `Pipeline`.
pub trait EventReceiver: Send + Sync {
    fn on_filter_event(&self, filter_name: &str, event: FilterEvent);
}

fn valid_transition(from: FilterState, to: FilterState) -> bool {
    use FilterState::*;
    matches!(
        (from, to),
        (Created, Initialized)
            | (Initialized, Preparing)
            | (Preparing, Ready)
            | (Ready, Running)
            | (Running, Paused)
            | (Paused, Running)
            | (Initialized, Initialized) // Stop from Initialized is a no-op
            | (Preparing, Initialized)
            | (Ready, Initialized)
            | (Running, Initialized)
            | (Paused, Initialized)
    )
}

/// Shared state every concrete filter embeds: name, lifecycle state, ports,
/// the in-port -> out-port routing table used by demuxers, and the upward
/// event sink wired in by the owning pipeline.
///
/// `owner` is a weak back-reference to the `Arc<dyn Filter>` this core is
/// embedded in, needed so ports created through [`FilterCore::add_in_port`]/
/// [`FilterCore::add_out_port`] can hold the filter-owning
/// `Weak<dyn Filter>`/`Arc<dyn Filter>` references the port module's
/// asymmetric-strength design calls for. Since `std::sync::Weak`
/// has no empty constructor for unsized targets, every concrete `Filter`
/// must be built through `Arc::new_cyclic` so a real weak reference exists
/// before `FilterCore::new` runs.
pub struct FilterCore {
    name: String,
    owner: Weak<dyn Filter>,
    state: Mutex<FilterState>,
    pipeline_id: Mutex<Option<u64>>,
    route_map: Mutex<HashMap<String, String>>,
    event_receiver: Mutex<Option<Arc<dyn EventReceiver>>>,
    in_ports: Mutex<Vec<Arc<InPort>>>,
    out_ports: Mutex<Vec<Arc<OutPort>>>,
}

impl FilterCore {
    pub fn new(name: impl Into<String>, owner: Weak<dyn Filter>) -> Self {
        Self {
            name: name.into(),
            owner,
            state: Mutex::new(FilterState::Created),
            pipeline_id: Mutex::new(None),
            route_map: Mutex::new(HashMap::new()),
            event_receiver: Mutex::new(None),
            in_ports: Mutex::new(Vec::new()),
            out_ports: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Weak back-reference to the filter this core is embedded in, used by
    /// anything (a driving `Task`, a new port) that needs to reach the
    /// owning `Arc<dyn Filter>` without holding it alive on its own.
    pub fn owner(&self) -> Weak<dyn Filter> {
        self.owner.clone()
    }

    /// Create and register a named in-port, owned by this filter.
    pub fn add_in_port(&self, name: impl Into<String>) -> Arc<InPort> {
        let port = Arc::new(InPort::new(name, self.owner.clone()));
        self.in_ports.lock().push(port.clone());
        port
    }

    /// Create and register a named out-port, owned by this filter.
    pub fn add_out_port(&self, name: impl Into<String>) -> Arc<OutPort> {
        let port = Arc::new(OutPort::new(name, self.owner.clone()));
        self.out_ports.lock().push(port.clone());
        port
    }

    pub fn in_port(&self, name: &str) -> Option<Arc<InPort>> {
        self.in_ports.lock().iter().find(|p| p.name() == name).cloned()
    }

    pub fn out_port(&self, name: &str) -> Option<Arc<OutPort>> {
        self.out_ports.lock().iter().find(|p| p.name() == name).cloned()
    }

    pub fn in_ports(&self) -> Vec<Arc<InPort>> {
        self.in_ports.lock().clone()
    }

    pub fn out_ports(&self) -> Vec<Arc<OutPort>> {
        self.out_ports.lock().clone()
    }

    pub fn state(&self) -> FilterState {
        *self.state.lock()
    }

    fn transition(&self, to: FilterState) -> HsResult<()> {
        let mut state = self.state.lock();
        if !valid_transition(*state, to) {
            return Err(ErrorCode::InvalidOperation);
        }
        *state = to;
        Ok(())
    }

    pub fn pipeline_id(&self) -> Option<u64> {
        *self.pipeline_id.lock()
    }

    pub fn set_pipeline_id(&self, id: u64) {
        *self.pipeline_id.lock() = Some(id);
    }

    pub fn attach_event_receiver(&self, receiver: Arc<dyn EventReceiver>) {
        *self.event_receiver.lock() = Some(receiver);
    }

    /// Route an in-port name to the out-port that a demuxer-style filter
    /// should forward its output on; used by `Filter::push_data` default
    /// implementations for fan-out filters.
    pub fn set_route(&self, in_port: &str, out_port: &str) {
        self.route_map
            .lock()
            .insert(in_port.to_string(), out_port.to_string());
    }

    pub fn route_for(&self, in_port: &str) -> Option<String> {
        self.route_map.lock().get(in_port).cloned()
    }

    fn notify(&self, event: FilterEvent) {
        if let Some(receiver) = self.event_receiver.lock().as_ref() {
            receiver.on_filter_event(&self.name, event);
        }
    }
}

/// Common behavior of every node in a pipeline graph.
///
/// Concrete filters implement `core()` and override the `on_*` hooks and the
/// data-path methods (`push_data`/`pull_data`/`negotiate`/`configure`); the
/// provided lifecycle methods enforce the state machine and fire
/// [`FilterEvent`]s at the right points.
pub trait Filter: Send + Sync {
    fn core(&self) -> &FilterCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn state(&self) -> FilterState {
        self.core().state()
    }

    fn pipeline_id(&self) -> Option<u64> {
        self.core().pipeline_id()
    }

    fn set_pipeline_id(&self, id: u64) {
        self.core().set_pipeline_id(id);
    }

    fn attach_event_receiver(&self, receiver: Arc<dyn EventReceiver>) {
        self.core().attach_event_receiver(receiver);
    }

    fn in_port(&self, name: &str) -> Option<Arc<InPort>> {
        self.core().in_port(name)
    }

    fn out_port(&self, name: &str) -> Option<Arc<OutPort>> {
        self.core().out_port(name)
    }

    fn in_ports(&self) -> Vec<Arc<InPort>> {
        self.core().in_ports()
    }

    fn out_ports(&self) -> Vec<Arc<OutPort>> {
        self.core().out_ports()
    }

    /// Seek the underlying medium to `position_ms`. Only filters that own a
    /// seekable source (demuxers, in practice) override this; everything
    /// else reports `Unimplemented`, which `PipelineExecutor::do_seek`
    /// tolerates rather than treats as an error.
    fn seek_to(&self, _position_ms: i64) -> HsResult<()> {
        Err(ErrorCode::Unimplemented)
    }

    /// One iteration of self-driven data production, for filters (sources)
    /// that have no upstream to call them. Returns whether the driving loop
    /// should call this again. The default is a no-op that stops
    /// immediately; only self-driving filters override it.
    fn pump(&self) -> bool {
        false
    }

    /// `Created -> Initialized`. Runs once, before any capability
    /// negotiation.
    fn init(&self) -> HsResult<()> {
        self.core().transition(FilterState::Initialized)?;
        self.on_init()
    }

    /// `Initialized -> Preparing -> Ready`, firing `FilterEvent::Ready` on
    /// success. A filter that needs an asynchronous readiness signal (a
    /// plugin warming up on another thread) should override `on_prepare`
    /// to return `Err(ErrorCode::Again)` and call back later via its own
    /// event receiver; this default assumes synchronous preparation.
    fn prepare(&self) -> HsResult<()> {
        self.core().transition(FilterState::Preparing)?;
        match self.on_prepare() {
            Ok(()) => {
                self.core().transition(FilterState::Ready)?;
                self.core().notify(FilterEvent::Ready);
                Ok(())
            }
            Err(e) => {
                self.core().notify(FilterEvent::Error(e));
                Err(e)
            }
        }
    }

    /// `Ready|Paused -> Running`.
    fn start(&self) -> HsResult<()> {
        self.core().transition(FilterState::Running)?;
        self.on_start()
    }

    /// `Running -> Paused`.
    fn pause(&self) -> HsResult<()> {
        self.core().transition(FilterState::Paused)?;
        self.on_pause()
    }

    /// `Paused -> Running`, resuming where playback left off.
    fn resume(&self) -> HsResult<()> {
        self.start()
    }

    /// Any state `-> Initialized`.
    fn stop(&self) -> HsResult<()> {
        self.core().transition(FilterState::Initialized)?;
        self.on_stop()
    }

    /// Discard any buffered data without changing lifecycle state. No-op by
    /// default; sources and queued filters override it.
    fn flush_start(&self) -> HsResult<()> {
        Ok(())
    }

    /// Resume normal flow after `flush_start`. No-op by default.
    fn flush_end(&self) -> HsResult<()> {
        Ok(())
    }

    fn on_init(&self) -> HsResult<()> {
        Ok(())
    }

    fn on_prepare(&self) -> HsResult<()> {
        Ok(())
    }

    fn on_start(&self) -> HsResult<()> {
        Ok(())
    }

    fn on_pause(&self) -> HsResult<()> {
        Ok(())
    }

    fn on_stop(&self) -> HsResult<()> {
        Ok(())
    }

    /// Report this filter reached end-of-stream; pipelines call this from
    /// the data path rather than firing it automatically, since only the
    /// filter knows when all of its inputs are drained.
    fn report_complete(&self) {
        self.core().notify(FilterEvent::Complete);
    }

    fn report_error(&self, err: ErrorCode) {
        self.core().notify(FilterEvent::Error(err));
    }

    /// Receive a buffer pushed into `port_name`. The default rejects all
    /// input, so every filter that accepts push-mode data must override
    /// this.
    fn push_data(&self, _port_name: &str, _buf: Buffer) -> HsResult<()> {
        Err(ErrorCode::Unimplemented)
    }

    /// Produce up to `size` bytes for a pull-mode consumer reading from
    /// `port_name` at byte `offset`.
    fn pull_data(&self, _port_name: &str, _offset: u64, _size: usize) -> HsResult<Buffer> {
        Err(ErrorCode::Unimplemented)
    }

    /// Compute the capability set this filter can accept on `port_name`
    /// given what upstream is offering.
    fn negotiate(&self, _port_name: &str, _upstream_meta: &Meta) -> HsResult<CapabilitySet> {
        Err(ErrorCode::Unimplemented)
    }

    /// Apply concrete parameters now that negotiation settled on a Meta.
    fn configure(&self, _port_name: &str, _upstream_meta: &Meta) -> HsResult<()> {
        Ok(())
    }

    /// Work modes `port_name` can operate in; used during link activation.
    fn supported_work_modes(&self, _port_name: &str) -> Vec<WorkMode> {
        vec![WorkMode::Push]
    }

    fn set_parameter(&self, _tag: &str, _value: TagValue) -> HsResult<()> {
        Err(ErrorCode::Unimplemented)
    }

    fn get_parameter(&self, _tag: &str) -> HsResult<TagValue> {
        Err(ErrorCode::Unimplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopFilter {
        core: FilterCore,
    }

    impl Filter for NoopFilter {
        fn core(&self) -> &FilterCore {
            &self.core
        }
    }

    fn noop() -> Arc<NoopFilter> {
        Arc::new_cyclic(|weak: &Weak<NoopFilter>| {
            let owner: Weak<dyn Filter> = weak.clone();
            NoopFilter {
                core: FilterCore::new("noop", owner),
            }
        })
    }

    #[test]
    fn lifecycle_happy_path_reaches_running() {
        let f = noop();
        f.init().unwrap();
        f.prepare().unwrap();
        f.start().unwrap();
        assert_eq!(f.state(), FilterState::Running);
    }

    #[test]
    fn pause_then_resume_returns_to_running() {
        let f = noop();
        f.init().unwrap();
        f.prepare().unwrap();
        f.start().unwrap();
        f.pause().unwrap();
        assert_eq!(f.state(), FilterState::Paused);
        f.resume().unwrap();
        assert_eq!(f.state(), FilterState::Running);
    }

    #[test]
    fn stop_from_any_state_returns_to_initialized() {
        let f = noop();
        f.init().unwrap();
        f.prepare().unwrap();
        f.start().unwrap();
        f.stop().unwrap();
        assert_eq!(f.state(), FilterState::Initialized);
    }

    #[test]
    fn prepare_before_init_is_rejected() {
        let f = noop();
        assert_eq!(f.prepare(), Err(ErrorCode::InvalidOperation));
    }

    #[test]
    fn push_data_without_override_is_unimplemented() {
        let f = noop();
        let buf = Buffer::alloc(1, 0, 0, crate::meta::TypedMeta::Audio(Default::default()));
        assert_eq!(f.push_data("default", buf), Err(ErrorCode::Unimplemented));
    }

    #[test]
    fn ready_notification_reaches_event_receiver() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct Recorder(Arc<AtomicBool>);
        impl EventReceiver for Recorder {
            fn on_filter_event(&self, _name: &str, event: FilterEvent) {
                if matches!(event, FilterEvent::Ready) {
                    self.0.store(true, Ordering::SeqCst);
                }
            }
        }

        let f = noop();
        let saw_ready = Arc::new(AtomicBool::new(false));
        f.attach_event_receiver(Arc::new(Recorder(saw_ready.clone())));
        f.init().unwrap();
        f.prepare().unwrap();
        assert!(saw_ready.load(Ordering::SeqCst));
    }
}
