// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! HiStreamer: a modular media-playback pipeline engine.
//!
//! A [`Player`] drives a single [`state_machine::StateMachine`], which in
//! turn drives a [`pipeline::Pipeline`] of [`filter::Filter`]s resolved from
//! native plugins through a [`plugin::PluginRegistry`]. See `DESIGN.md`
//! for the module-by-module design.

pub mod buffer;
pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod filters;
pub mod meta;
pub mod osal;
pub mod pipeline;
pub mod player;
pub mod plugin;
pub mod port;
pub mod source;
pub mod state_machine;

pub use buffer::Buffer;
pub use config::EngineConfig;
pub use error::{ErrorCode, HsResult};
pub use executor::{PipelineExecutor, PlayExecutor};
pub use filter::{Filter, FilterCore, FilterEvent, FilterState};
pub use pipeline::{Pipeline, PipelineEvent, PipelineEventReceiver};
pub use player::{Player, PlayerCallback, SeekMode};
pub use plugin::{LoadedPlugin, PluginRegistry, RejectedPlugin};
pub use source::SourceDescriptor;
pub use state_machine::{Intent, StateId, StateMachine};
