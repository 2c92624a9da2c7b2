// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! OS abstraction layer: worker threads, bounded queues, and the
//! synchronous-call rendezvous used by the state machine.

pub mod queue;
pub mod sync;
pub mod task;

pub use queue::{bounded, Deactivate, Reader, Writer};
pub use sync::Synchronizer;
pub use task::{Task, TaskBody};
