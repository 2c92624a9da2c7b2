// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Port & Link: the typed connection points on a filter.
//!
//! A port holds its owning filter by a non-owning (weak) back-reference and
//! its peer by a reference whose strength depends on direction: an
//! `OutPort`'s peer is strong (the producer keeps its consumer alive), an
//! `InPort`'s peer is weak (upstream may vanish during shutdown).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::error::{ErrorCode, HsResult};
use crate::filter::Filter;
use crate::meta::{CapabilitySet, Meta};

/// Default port name used by single-in/single-out filters and by
/// `Pipeline::link_filters`.
pub const PORT_NAME_DEFAULT: &str = "default";

/// Data-transport mode negotiated at link-activation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkMode {
    /// The producer calls into the consumer.
    Push,
    /// The consumer calls into the producer.
    Pull,
}

/// Strength of a port's reference to its peer filter, see module docs.
enum PeerFilterRef {
    Strong(Arc<dyn Filter>),
    Weak(Weak<dyn Filter>),
}

impl PeerFilterRef {
    fn upgrade(&self) -> Option<Arc<dyn Filter>> {
        match self {
            PeerFilterRef::Strong(f) => Some(f.clone()),
            PeerFilterRef::Weak(f) => f.upgrade(),
        }
    }
}

struct Peer {
    filter: PeerFilterRef,
    port_name: String,
}

/// An in-direction endpoint on a filter. Its peer is an [`OutPort`] on the
/// upstream filter, referenced weakly.
pub struct InPort {
    name: String,
    owner: Weak<dyn Filter>,
    peer: Mutex<Option<Peer>>,
    mode: Mutex<WorkMode>,
}

/// An out-direction endpoint on a filter. Its peer is an [`InPort`] on the
/// downstream filter, referenced strongly.
pub struct OutPort {
    name: String,
    owner: Weak<dyn Filter>,
    peer: Mutex<Option<Peer>>,
    mode: Mutex<WorkMode>,
}

fn same_pipeline(a: &Arc<dyn Filter>, b: &Arc<dyn Filter>) -> bool {
    match (a.pipeline_id(), b.pipeline_id()) {
        (Some(x), Some(y)) => x == y,
        // Filters not yet attached to a pipeline are assumed compatible;
        // `Pipeline::add_filters` is what actually stamps the id.
        _ => true,
    }
}

impl InPort {
    /// Create a detached in-port named `name`, owned by `owner`.
    pub fn new(name: impl Into<String>, owner: Weak<dyn Filter>) -> Self {
        Self {
            name: name.into(),
            owner,
            peer: Mutex::new(None),
            mode: Mutex::new(WorkMode::Push),
        }
    }

    /// Port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a peer is connected.
    pub fn is_connected(&self) -> bool {
        self.peer.lock().is_some()
    }

    /// Connect to an out-port on `peer_filter`. Refuses to connect ports
    /// whose owning filters do not share a pipeline, preventing
    /// cross-pipeline loops.
    pub fn connect(&self, peer_filter: &Arc<dyn Filter>, peer_port_name: &str) -> HsResult<()> {
        let Some(owner) = self.owner.upgrade() else {
            return Err(ErrorCode::NullPointer);
        };
        if !same_pipeline(&owner, peer_filter) {
            return Err(ErrorCode::InvalidOperation);
        }
        *self.peer.lock() = Some(Peer {
            filter: PeerFilterRef::Weak(Arc::downgrade(peer_filter)),
            port_name: peer_port_name.to_string(),
        });
        Ok(())
    }

    /// Disconnect from any peer.
    pub fn disconnect(&self) {
        *self.peer.lock() = None;
    }

    /// Currently negotiated work mode.
    pub fn work_mode(&self) -> WorkMode {
        *self.mode.lock()
    }

    /// Activate this in-port: ask the peer out-port which modes it
    /// supports and pick the first entry of `preferred` that appears in
    /// that set.
    pub fn activate(&self, preferred: &[WorkMode]) -> HsResult<WorkMode> {
        let peer = self.peer.lock();
        let Some(peer) = peer.as_ref() else {
            return Err(ErrorCode::NegotiationFailed);
        };
        let Some(peer_filter) = peer.filter.upgrade() else {
            return Err(ErrorCode::NegotiationFailed);
        };
        let supported = peer_filter.supported_work_modes(&peer.port_name);
        let chosen = preferred
            .iter()
            .find(|m| supported.contains(m))
            .copied()
            .ok_or(ErrorCode::NegotiationFailed)?;
        *self.mode.lock() = chosen;
        Ok(chosen)
    }

    /// Forward a negotiation request to the owning filter, which computes
    /// its accepted capability set (possibly after recursing into its own
    /// downstream).
    pub fn negotiate(&self, upstream_meta: &Meta) -> HsResult<CapabilitySet> {
        let owner = self.owner.upgrade().ok_or(ErrorCode::NullPointer)?;
        owner.negotiate(&self.name, upstream_meta)
    }

    /// Second negotiation pass: let the owning filter apply concrete
    /// parameters now that capabilities are settled.
    pub fn configure(&self, upstream_meta: &Meta) -> HsResult<()> {
        let owner = self.owner.upgrade().ok_or(ErrorCode::NullPointer)?;
        owner.configure(&self.name, upstream_meta)
    }

    /// Push-mode entry point: forward to the owning filter's `push_data`.
    pub fn push_data(&self, buf: Buffer) -> HsResult<()> {
        let owner = self.owner.upgrade().ok_or(ErrorCode::NullPointer)?;
        owner.push_data(&self.name, buf)
    }

    /// Pull-mode entry point: forward the request across the link to the
    /// producing out-port.
    pub fn pull_data(&self, offset: u64, size: usize) -> HsResult<Buffer> {
        let peer = self.peer.lock();
        let peer = peer.as_ref().ok_or(ErrorCode::NullPointer)?;
        let peer_filter = peer.filter.upgrade().ok_or(ErrorCode::NullPointer)?;
        peer_filter.pull_data(&peer.port_name, offset, size)
    }
}

impl OutPort {
    /// Create a detached out-port named `name`, owned by `owner`.
    pub fn new(name: impl Into<String>, owner: Weak<dyn Filter>) -> Self {
        Self {
            name: name.into(),
            owner,
            peer: Mutex::new(None),
            mode: Mutex::new(WorkMode::Push),
        }
    }

    /// Port name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a peer is connected.
    pub fn is_connected(&self) -> bool {
        self.peer.lock().is_some()
    }

    /// Connect to an in-port on `peer_filter`.
    pub fn connect(&self, peer_filter: &Arc<dyn Filter>, peer_port_name: &str) -> HsResult<()> {
        let Some(owner) = self.owner.upgrade() else {
            return Err(ErrorCode::NullPointer);
        };
        if !same_pipeline(&owner, peer_filter) {
            return Err(ErrorCode::InvalidOperation);
        }
        *self.peer.lock() = Some(Peer {
            filter: PeerFilterRef::Strong(peer_filter.clone()),
            port_name: peer_port_name.to_string(),
        });
        Ok(())
    }

    /// Disconnect from any peer.
    pub fn disconnect(&self) {
        *self.peer.lock() = None;
    }

    /// Currently negotiated work mode.
    pub fn work_mode(&self) -> WorkMode {
        *self.mode.lock()
    }

    /// Activate this out-port against `preferred` modes, same rule as
    /// [`InPort::activate`].
    pub fn activate(&self, preferred: &[WorkMode]) -> HsResult<WorkMode> {
        let owner = self.owner.upgrade().ok_or(ErrorCode::NullPointer)?;
        let supported = owner.supported_work_modes(&self.name);
        let chosen = preferred
            .iter()
            .find(|m| supported.contains(m))
            .copied()
            .ok_or(ErrorCode::NegotiationFailed)?;
        *self.mode.lock() = chosen;
        Ok(chosen)
    }

    /// Negotiation step 1: forward `upstream_meta` to the peer in-port.
    pub fn negotiate(&self, upstream_meta: &Meta) -> HsResult<CapabilitySet> {
        let peer = self.peer.lock();
        let peer = peer.as_ref().ok_or(ErrorCode::NegotiationFailed)?;
        let peer_filter = peer.filter.upgrade().ok_or(ErrorCode::NegotiationFailed)?;
        let accepted = peer_filter.negotiate(&peer.port_name, upstream_meta)?;
        if accepted.is_empty() {
            return Err(ErrorCode::NegotiationFailed);
        }
        Ok(accepted)
    }

    /// Negotiation step 4: run the configure pass across the link.
    pub fn configure(&self, upstream_meta: &Meta) -> HsResult<()> {
        let peer = self.peer.lock();
        let peer = peer.as_ref().ok_or(ErrorCode::NegotiationFailed)?;
        let peer_filter = peer.filter.upgrade().ok_or(ErrorCode::NegotiationFailed)?;
        peer_filter.configure(&peer.port_name, upstream_meta)
    }

    /// Push-mode entry point: synchronously forward to the peer in-port.
    pub fn push_data(&self, buf: Buffer) -> HsResult<()> {
        let peer = self.peer.lock();
        let peer = peer.as_ref().ok_or(ErrorCode::NullPointer)?;
        let peer_filter = peer.filter.upgrade().ok_or(ErrorCode::NullPointer)?;
        peer_filter.push_data(&peer.port_name, buf)
    }

    /// Pull-mode entry point: forward to the owning filter (typically the
    /// source, which pulls from its underlying plugin/medium).
    pub fn pull_data(&self, offset: u64, size: usize) -> HsResult<Buffer> {
        let owner = self.owner.upgrade().ok_or(ErrorCode::NullPointer)?;
        owner.pull_data(&self.name, offset, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterCore;
    use crate::meta::TypedMeta;
    use std::sync::Arc;

    struct StubFilter {
        core: FilterCore,
    }

    impl Filter for StubFilter {
        fn core(&self) -> &FilterCore {
            &self.core
        }

        fn push_data(&self, _port_name: &str, _buf: Buffer) -> HsResult<()> {
            Ok(())
        }
    }

    fn stub() -> Arc<dyn Filter> {
        Arc::new_cyclic(|weak: &Weak<StubFilter>| {
            let owner: Weak<dyn Filter> = weak.clone();
            StubFilter {
                core: FilterCore::new("stub", owner),
            }
        })
    }

    #[test]
    fn unconnected_in_port_rejects_push() {
        let owner: Arc<dyn Filter> = stub();
        let port = InPort::new(PORT_NAME_DEFAULT, Arc::downgrade(&owner));
        let buf = Buffer::alloc(4, 0, 0, TypedMeta::Audio(Default::default()));
        // push_data forwards to owner, whose StubFilter::push_data succeeds
        // regardless of connection state (push is in-port -> owner, not
        // peer-mediated); pull, by contrast, requires a peer.
        assert!(port.push_data(buf).is_ok());
        assert!(matches!(port.pull_data(0, 4), Err(ErrorCode::NullPointer)));
    }

    #[test]
    fn activate_fails_without_peer() {
        let owner: Arc<dyn Filter> = stub();
        let port = InPort::new(PORT_NAME_DEFAULT, Arc::downgrade(&owner));
        assert_eq!(
            port.activate(&[WorkMode::Push]),
            Err(ErrorCode::NegotiationFailed)
        );
    }

    #[test]
    fn connect_refuses_cross_pipeline_ports() {
        let a: Arc<dyn Filter> = stub();
        let b: Arc<dyn Filter> = stub();
        a.set_pipeline_id(1);
        b.set_pipeline_id(2);
        let out = OutPort::new(PORT_NAME_DEFAULT, Arc::downgrade(&a));
        assert_eq!(out.connect(&b, PORT_NAME_DEFAULT), Err(ErrorCode::InvalidOperation));
        assert!(!out.is_connected());
    }
}
