// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `Pipeline`: an ordered filter graph that fans lifecycle calls out to its
//! members and aggregates their `Ready` events into a single upward
//! notification.
//!
//! Filters are driven in reverse-topological order on the way down
//! (`prepare`/`start`/`pause`/`resume` walk the graph from sinks back to
//! sources) and in forward order on teardown, matching the ordering the
//! pipeline-core lifecycle uses: a sink must be ready to receive before its
//! upstream starts producing.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ErrorCode, HsResult};
use crate::filter::{EventReceiver, Filter, FilterEvent};
use crate::port::PORT_NAME_DEFAULT;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Notifications a `Pipeline` forwards to whoever embeds it (the state
/// machine's executor).
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Every filter in the pipeline reported `Ready`.
    Ready,
    /// A filter reached end-of-stream.
    Complete,
    /// A filter reported an unrecoverable error.
    Error(ErrorCode),
}

/// Sink for [`PipelineEvent`]s.
pub trait PipelineEventReceiver: Send + Sync {
    fn on_pipeline_event(&self, event: PipelineEvent);
}

struct ReadyAggregator {
    expected: AtomicU32,
    seen: AtomicU32,
    upward: Mutex<Option<Arc<dyn PipelineEventReceiver>>>,
}

impl ReadyAggregator {
    fn new() -> Self {
        Self {
            expected: AtomicU32::new(0),
            seen: AtomicU32::new(0),
            upward: Mutex::new(None),
        }
    }

    fn reset(&self, expected: u32) {
        self.expected.store(expected, Ordering::SeqCst);
        self.seen.store(0, Ordering::SeqCst);
    }
}

impl EventReceiver for ReadyAggregator {
    fn on_filter_event(&self, filter_name: &str, event: FilterEvent) {
        match event {
            FilterEvent::Ready => {
                let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
                let expected = self.expected.load(Ordering::SeqCst);
                debug!(filter = filter_name, seen, expected, "filter ready");
                if seen == expected {
                    self.seen.store(0, Ordering::SeqCst);
                    if let Some(upward) = self.upward.lock().as_ref() {
                        upward.on_pipeline_event(PipelineEvent::Ready);
                    }
                }
            }
            FilterEvent::Complete => {
                if let Some(upward) = self.upward.lock().as_ref() {
                    upward.on_pipeline_event(PipelineEvent::Complete);
                }
            }
            FilterEvent::Error(e) => {
                warn!(filter = filter_name, error = %e, "filter error");
                if let Some(upward) = self.upward.lock().as_ref() {
                    upward.on_pipeline_event(PipelineEvent::Error(e));
                }
            }
        }
    }
}

/// A linear-ish filter graph (sources, demuxers, codecs, sinks) driven as a
/// unit by the player's executor.
pub struct Pipeline {
    id: u64,
    filters: Mutex<Vec<Arc<dyn Filter>>>,
    aggregator: Arc<ReadyAggregator>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
            filters: Mutex::new(Vec::new()),
            aggregator: Arc::new(ReadyAggregator::new()),
        }
    }

    /// Set where pipeline-level events get forwarded.
    pub fn set_event_receiver(&self, receiver: Arc<dyn PipelineEventReceiver>) {
        *self.aggregator.upward.lock() = Some(receiver);
    }

    /// Add filters to the graph in upstream-to-downstream order, stamping
    /// each with this pipeline's id (so `Port::connect` rejects links
    /// across pipelines) and wiring the Ready aggregator. Rejects a filter
    /// already present in this graph (by `Arc` identity) with
    /// `AlreadyExists` rather than silently duplicating it.
    pub fn add_filters(&self, filters: impl IntoIterator<Item = Arc<dyn Filter>>) -> HsResult<()> {
        let mut guard = self.filters.lock();
        for filter in filters {
            if guard.iter().any(|existing| Arc::ptr_eq(existing, &filter)) {
                return Err(ErrorCode::AlreadyExists);
            }
            filter.set_pipeline_id(self.id);
            filter.attach_event_receiver(self.aggregator.clone());
            guard.push(filter);
        }
        self.aggregator.reset(guard.len() as u32);
        Ok(())
    }

    /// Connect `upstream`'s default out-port to `downstream`'s default
    /// in-port. Either side failing to connect
    /// rolls the other side back rather than leaving a half-made link.
    pub fn link_filters(&self, upstream: &Arc<dyn Filter>, downstream: &Arc<dyn Filter>) -> HsResult<()> {
        self.link_ports(upstream, PORT_NAME_DEFAULT, downstream, PORT_NAME_DEFAULT)
    }

    /// Connect a named out-port on `upstream` to a named in-port on
    /// `downstream`.
    pub fn link_ports(
        &self,
        upstream: &Arc<dyn Filter>,
        out_port_name: &str,
        downstream: &Arc<dyn Filter>,
        in_port_name: &str,
    ) -> HsResult<()> {
        let out_port = upstream.out_port(out_port_name).ok_or(ErrorCode::InvalidParameter)?;
        let in_port = downstream.in_port(in_port_name).ok_or(ErrorCode::InvalidParameter)?;

        out_port.connect(downstream, in_port_name)?;
        if let Err(e) = in_port.connect(upstream, out_port_name) {
            out_port.disconnect();
            return Err(e);
        }
        Ok(())
    }

    /// Number of filters currently in the graph.
    pub fn filter_count(&self) -> usize {
        self.filters.lock().len()
    }

    /// A snapshot of the filters currently in the graph, in
    /// upstream-to-downstream order. Used by the executor to drive
    /// per-filter operations (like seeking a demuxer) that aren't part of
    /// the lifecycle fan-out.
    pub fn filters(&self) -> Vec<Arc<dyn Filter>> {
        self.snapshot()
    }

    /// Remove a filter chain starting at `name`, stopping it first. Only
    /// the named filter is removed; callers that want to drop a whole
    /// downstream run call this once per filter; removal stays
    /// simple rather than modeling sub-chains.
    pub fn remove_filter_chain(&self, name: &str) -> HsResult<()> {
        let mut guard = self.filters.lock();
        let idx = guard
            .iter()
            .position(|f| f.name() == name)
            .ok_or(ErrorCode::InvalidParameter)?;
        let filter = guard.remove(idx);
        self.aggregator.reset(guard.len() as u32);
        drop(guard);
        filter.stop()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Filter>> {
        self.filters.lock().clone()
    }

    fn fan_out_downstream_first(&self, step: impl Fn(&Arc<dyn Filter>) -> HsResult<()>) -> HsResult<()> {
        // Sinks first: a sink unprepared for data must not see one of its
        // upstream filters transition first.
        for filter in self.snapshot().iter().rev() {
            step(filter)?;
        }
        Ok(())
    }

    fn fan_out_upstream_first(&self, step: impl Fn(&Arc<dyn Filter>) -> HsResult<()>) -> HsResult<()> {
        for filter in self.snapshot().iter() {
            step(filter)?;
        }
        Ok(())
    }

    pub fn init(&self) -> HsResult<()> {
        self.aggregator.reset(self.filter_count() as u32);
        self.fan_out_upstream_first(|f| f.init())
    }

    /// Start preparing every filter; the aggregator forwards exactly one
    /// `PipelineEvent::Ready` once all of them report in.
    pub fn prepare(&self) -> HsResult<()> {
        self.aggregator.reset(self.filter_count() as u32);
        self.fan_out_downstream_first(|f| f.prepare())
    }

    pub fn start(&self) -> HsResult<()> {
        self.fan_out_downstream_first(|f| f.start())
    }

    pub fn pause(&self) -> HsResult<()> {
        self.fan_out_upstream_first(|f| f.pause())
    }

    pub fn resume(&self) -> HsResult<()> {
        self.fan_out_downstream_first(|f| f.resume())
    }

    pub fn stop(&self) -> HsResult<()> {
        self.fan_out_upstream_first(|f| f.stop())
    }

    pub fn flush_start(&self) -> HsResult<()> {
        self.fan_out_upstream_first(|f| f.flush_start())
    }

    pub fn flush_end(&self) -> HsResult<()> {
        self.fan_out_downstream_first(|f| f.flush_end())
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterCore;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Weak;

    struct CountingFilter {
        core: FilterCore,
    }

    impl Filter for CountingFilter {
        fn core(&self) -> &FilterCore {
            &self.core
        }
    }

    fn filter(name: &str) -> Arc<dyn Filter> {
        let name = name.to_string();
        Arc::new_cyclic(|weak: &Weak<CountingFilter>| {
            let owner: Weak<dyn Filter> = weak.clone();
            CountingFilter {
                core: FilterCore::new(name, owner),
            }
        })
    }

    struct Recorder {
        ready_count: AtomicUsize,
    }

    impl PipelineEventReceiver for Recorder {
        fn on_pipeline_event(&self, event: PipelineEvent) {
            if matches!(event, PipelineEvent::Ready) {
                self.ready_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn ready_fires_once_after_all_filters_ready() {
        let pipeline = Pipeline::new();
        let recorder = Arc::new(Recorder {
            ready_count: AtomicUsize::new(0),
        });
        pipeline.set_event_receiver(recorder.clone());
        pipeline.add_filters([filter("source"), filter("sink")]).unwrap();

        pipeline.init().unwrap();
        pipeline.prepare().unwrap();

        assert_eq!(recorder.ready_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_unknown_filter_is_an_error() {
        let pipeline = Pipeline::new();
        pipeline.add_filters([filter("source")]).unwrap();
        assert_eq!(
            pipeline.remove_filter_chain("nope"),
            Err(ErrorCode::InvalidParameter)
        );
    }

    #[test]
    fn filters_added_share_pipeline_id() {
        let pipeline = Pipeline::new();
        let a = filter("a");
        let b = filter("b");
        pipeline.add_filters([a.clone(), b.clone()]).unwrap();
        assert_eq!(a.pipeline_id(), b.pipeline_id());
        assert!(a.pipeline_id().is_some());
    }
}
