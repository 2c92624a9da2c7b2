// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! HiStreamer Plugin API
//!
//! Stable cross-`cdylib` ABI for source, demuxer, codec, and sink plugins.
//! A plugin links only against this crate (not against `histreamer` itself),
//! so the host and the plugin can be built with different compiler versions
//! as long as both agree on [`API_VERSION_MAJOR`].
//!
//! # Example Plugin
//!
//! ```ignore
//! use histreamer_plugin_api::*;
//!
//! #[derive(Default)]
//! pub struct PassthroughSink;
//!
//! impl PluginInstance for PassthroughSink {
//!     fn def(&self) -> PluginDefBase {
//!         PluginDefBase::new("builtin.sink.passthrough", PluginKind::AudioSink)
//!     }
//!     fn start(&mut self) -> RResult<(), PluginErrorAbi> { ROk(()) }
//!     fn stop(&mut self) -> RResult<(), PluginErrorAbi> { ROk(()) }
//!     fn push(&mut self, buf: AbiBuffer) -> RResult<(), PluginErrorAbi> {
//!         let _ = buf;
//!         ROk(())
//!     }
//! }
//!
//! declare_plugin!(PassthroughSink);
//! ```

#![warn(missing_docs)]
#![allow(non_local_definitions)]

use abi_stable::{
    sabi_trait,
    std_types::{RBox, ROption, RResult, RString, RVec},
    StableAbi,
};
use serde::{Deserialize, Serialize};

/// API major version. Plugins whose major version does not match the core's
/// are rejected at registration.
pub const API_VERSION_MAJOR: u32 = 1;
/// API minor version. Additive/backwards-compatible changes bump this.
pub const API_VERSION_MINOR: u32 = 0;

// ============================================================================
// Plugin kind & descriptor
// ============================================================================

/// The role a plugin fills in the pipeline.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StableAbi, Serialize, Deserialize)]
pub enum PluginKind {
    /// Reads bytes from a URI (file, fd, application-pushed stream).
    Source,
    /// Demultiplexes a byte stream into elementary streams.
    Demuxer,
    /// Decodes (or encodes) one elementary stream.
    Codec,
    /// Renders decoded audio samples.
    AudioSink,
    /// Renders decoded video frames.
    VideoSink,
    /// Sentinel used to reject a malformed descriptor at registration; no
    /// real plugin declares this as its kind.
    Invalid,
}

/// A tagged scalar value, the closed sum type used for Meta/Capability
/// values and parameters that cross the plugin boundary. Heterogeneous
/// value bags are best expressed as a closed tagged union rather than a
/// runtime-typed `Any`.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, StableAbi, Serialize, Deserialize)]
pub enum TagValueAbi {
    /// UTF-8 string value (e.g. mime type, language).
    Str(RString),
    /// Unsigned 32-bit value (e.g. channel count, sample rate).
    U32(u32),
    /// Unsigned 64-bit value (e.g. duration, file size).
    U64(u64),
    /// Signed 64-bit value (e.g. bitrate, timestamps).
    I64(i64),
    /// Boolean flag.
    Bool(bool),
    /// Opaque byte payload (e.g. codec-config blob).
    Bytes(RVec<u8>),
}

/// One constraint on a tag within a [`CapabilityAbi`].
#[repr(C)]
#[derive(Debug, Clone, PartialEq, StableAbi, Serialize, Deserialize)]
pub enum ConstraintAbi {
    /// The tag must hold exactly this value.
    Fixed(TagValueAbi),
    /// The tag must hold a numeric value within `[lo, hi]` (order-independent).
    Interval(TagValueAbi, TagValueAbi),
    /// The tag must hold one of these values.
    Discrete(RVec<TagValueAbi>),
}

/// A single named constraint: `(tag name, constraint)`.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, StableAbi, Serialize, Deserialize)]
pub struct TagConstraintAbi {
    /// Tag identifier, e.g. `"audio.channels"`.
    pub tag: RString,
    /// The constraint placed on that tag's value.
    pub constraint: ConstraintAbi,
}

/// Predicate over a Meta: a mime pattern plus per-tag constraints.
/// ABI-stable mirror of the host's `Capability` (see `histreamer::meta`).
#[repr(C)]
#[derive(Debug, Clone, PartialEq, StableAbi, Serialize, Deserialize)]
pub struct CapabilityAbi {
    /// Mime pattern: `"*"`, `"audio/*"`, or `"audio/raw"`.
    pub mime: RString,
    /// Constraints that must hold for every tag they name, if present.
    pub constraints: RVec<TagConstraintAbi>,
}

impl CapabilityAbi {
    /// A capability that accepts any mime with no further constraints.
    pub fn any() -> Self {
        Self {
            mime: "*".into(),
            constraints: RVec::new(),
        }
    }

    /// Builder: start a capability for an exact or wildcard mime.
    pub fn with_mime(mime: &str) -> Self {
        Self {
            mime: mime.into(),
            constraints: RVec::new(),
        }
    }

    /// Builder: append a fixed-value constraint.
    pub fn append_fixed(mut self, tag: &str, value: TagValueAbi) -> Self {
        self.constraints.push(TagConstraintAbi {
            tag: tag.into(),
            constraint: ConstraintAbi::Fixed(value),
        });
        self
    }

    /// Builder: append an interval constraint.
    pub fn append_interval(mut self, tag: &str, lo: TagValueAbi, hi: TagValueAbi) -> Self {
        self.constraints.push(TagConstraintAbi {
            tag: tag.into(),
            constraint: ConstraintAbi::Interval(lo, hi),
        });
        self
    }

    /// Builder: append a discrete-set constraint.
    pub fn append_discrete(mut self, tag: &str, values: Vec<TagValueAbi>) -> Self {
        self.constraints.push(TagConstraintAbi {
            tag: tag.into(),
            constraint: ConstraintAbi::Discrete(values.into()),
        });
        self
    }
}

/// Descriptor every plugin registers with: name, rank, declared API version,
/// and the capabilities it accepts/produces.
#[repr(C)]
#[derive(Debug, Clone, StableAbi)]
pub struct PluginDefBase {
    /// Unique name, e.g. `"builtin.source.file"`.
    pub name: RString,
    /// Short human-readable description.
    pub description: RString,
    /// Plugin role.
    pub plugin_type: PluginKind,
    /// Selection priority, `0..=100`; higher wins when multiple plugins match.
    pub rank: u8,
    /// API major version this plugin was built against.
    pub api_version_major: u32,
    /// API minor version this plugin was built against.
    pub api_version_minor: u32,
    /// License identifier, e.g. `"MPL-2.0"`.
    pub license: RString,
    /// Capabilities this plugin accepts on its input side.
    pub input_caps: RVec<CapabilityAbi>,
    /// Capabilities this plugin produces on its output side (empty for sinks).
    pub output_caps: RVec<CapabilityAbi>,
    /// Source plugins only: the URI scheme this plugin handles (e.g. `"file"`).
    pub protocol: RString,
}

impl PluginDefBase {
    /// Construct a descriptor with sensible defaults (rank 50, current API
    /// version, no capability constraints).
    pub fn new(name: &str, plugin_type: PluginKind) -> Self {
        Self {
            name: name.into(),
            description: RString::new(),
            plugin_type,
            rank: 50,
            api_version_major: API_VERSION_MAJOR,
            api_version_minor: API_VERSION_MINOR,
            license: "Unlicensed".into(),
            input_caps: RVec::new(),
            output_caps: RVec::new(),
            protocol: RString::new(),
        }
    }

    /// Builder: set the rank, clamped to `0..=100`.
    pub fn with_rank(mut self, rank: u8) -> Self {
        self.rank = rank.min(100);
        self
    }

    /// Builder: set the description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set the license identifier.
    pub fn with_license(mut self, license: &str) -> Self {
        self.license = license.into();
        self
    }

    /// Builder: append an input capability.
    pub fn with_input_cap(mut self, cap: CapabilityAbi) -> Self {
        self.input_caps.push(cap);
        self
    }

    /// Builder: append an output capability.
    pub fn with_output_cap(mut self, cap: CapabilityAbi) -> Self {
        self.output_caps.push(cap);
        self
    }

    /// Builder: set the URI protocol this source plugin handles.
    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.into();
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// ABI-stable mirror of the host's `ErrorCode` (see `histreamer::error`).
/// Kept as a flat, non-exhaustive-free enum since it crosses the FFI
/// boundary and must never observe a field the host doesn't know about.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, StableAbi, thiserror::Error)]
pub enum PluginErrorAbi {
    /// Source/demuxer exhausted; propagate as an EOS-flagged buffer.
    #[error("end of stream")]
    EndOfStream,
    /// The requested operation needs more time; caller may retry.
    #[error("transient back-pressure, retry")]
    Again,
    /// Plugin method invoked while it was in a state that forbids it.
    #[error("plugin in wrong state for this call")]
    WrongState,
    /// Parameter value or type was invalid.
    #[error("invalid parameter")]
    InvalidParameter,
    /// Plugin does not implement this optional method.
    #[error("not implemented")]
    Unimplemented,
    /// Allocation failed inside the plugin.
    #[error("out of memory")]
    NoMemory,
    /// Unspecified failure; message is not carried across the ABI boundary.
    #[error("plugin error")]
    Other,
}

// ============================================================================
// Buffers
// ============================================================================

/// End-of-stream flag for [`AbiBuffer::flags`].
pub const BUFFER_FLAG_EOS: u32 = 1 << 0;

/// ABI-stable mirror of the host's `Buffer` payload, flattened to a single
/// contiguous region for the FFI boundary (the host's internal `Buffer` may
/// hold several `Memory` regions; plugins only ever see one at a time).
#[repr(C)]
#[derive(Debug, Clone, StableAbi)]
pub struct AbiBuffer {
    /// Payload bytes.
    pub data: RVec<u8>,
    /// Elementary stream this buffer belongs to.
    pub stream_id: u32,
    /// Presentation timestamp in microseconds; `i64::MIN` means "unknown".
    pub pts: i64,
    /// Decode timestamp in microseconds; `i64::MIN` means "unknown".
    pub dts: i64,
    /// Bitfield, see `BUFFER_FLAG_*`.
    pub flags: u32,
}

impl AbiBuffer {
    /// A buffer carrying no payload with the EOS flag set.
    pub fn eos(stream_id: u32) -> Self {
        Self {
            data: RVec::new(),
            stream_id,
            pts: i64::MIN,
            dts: i64::MIN,
            flags: BUFFER_FLAG_EOS,
        }
    }

    /// Whether the end-of-stream flag is set.
    pub fn is_eos(&self) -> bool {
        self.flags & BUFFER_FLAG_EOS != 0
    }
}

// ============================================================================
// Plugin instance trait
// ============================================================================

/// The trait every loaded plugin instance implements.
///
/// This single trait serves all five [`PluginKind`]s: source, demuxer,
/// codec, and sink plugins all obey the same `Created -> Initialized ->
/// Prepared -> Running <-> Paused -> ... -> Destroyed` lifecycle, and all
/// move data through the same `push`/`pull` work-mode shape. Kind-specific
/// behavior is selected by the host via `def().plugin_type`.
#[sabi_trait]
pub trait PluginInstance: Send + Sync {
    /// Static descriptor for this plugin.
    fn def(&self) -> PluginDefBase;

    /// `Created -> Initialized`. Called once, before any other method.
    fn init(&mut self) -> RResult<(), PluginErrorAbi> {
        RResult::ROk(())
    }

    /// `Initialized -> Prepared`.
    fn prepare(&mut self) -> RResult<(), PluginErrorAbi> {
        RResult::ROk(())
    }

    /// `Prepared/Paused -> Running`.
    fn start(&mut self) -> RResult<(), PluginErrorAbi> {
        RResult::ROk(())
    }

    /// `Running -> Paused`.
    fn pause(&mut self) -> RResult<(), PluginErrorAbi> {
        RResult::ROk(())
    }

    /// `Running/Paused/Prepared -> Initialized`. Idempotent.
    fn stop(&mut self) -> RResult<(), PluginErrorAbi> {
        RResult::ROk(())
    }

    /// `Running/Paused/Prepared -> Initialized`, discarding any buffered
    /// state (distinct from `stop` only in that callers use it to signal
    /// "keep the instance, forget its progress").
    fn reset(&mut self) -> RResult<(), PluginErrorAbi> {
        RResult::ROk(())
    }

    /// Any state `-> Destroyed`. No further calls are made after this.
    fn deinit(&mut self) {}

    /// Push one buffer into the plugin (producer -> this plugin). Used by
    /// sinks (`write`) and by codecs/demuxers accepting input.
    fn push(&mut self, buf: AbiBuffer) -> RResult<(), PluginErrorAbi> {
        let _ = buf;
        RResult::RErr(PluginErrorAbi::Unimplemented)
    }

    /// Pull one buffer out of the plugin (this plugin -> consumer). Used by
    /// sources/demuxers/codecs producing output. `offset`/`size` are used
    /// only in pull-mode byte reads; frame-oriented producers ignore them.
    fn pull(&mut self, offset: u64, size: u64) -> RResult<AbiBuffer, PluginErrorAbi> {
        let _ = (offset, size);
        RResult::RErr(PluginErrorAbi::Unimplemented)
    }

    /// Seek to a byte offset or timestamp, depending on plugin kind.
    fn seek_to(&mut self, position: i64) -> RResult<(), PluginErrorAbi> {
        let _ = position;
        RResult::RErr(PluginErrorAbi::Unimplemented)
    }

    /// Whether this plugin instance supports `seek_to`.
    fn is_seekable(&self) -> bool {
        false
    }

    /// Get a named parameter's current value, if supported.
    fn get_parameter(&self, tag: RString) -> ROption<TagValueAbi> {
        let _ = tag;
        ROption::RNone
    }

    /// Set a named parameter's value, if supported.
    fn set_parameter(&mut self, tag: RString, value: TagValueAbi) -> RResult<(), PluginErrorAbi> {
        let _ = (tag, value);
        RResult::RErr(PluginErrorAbi::Unimplemented)
    }
}

/// Type alias for a boxed plugin instance crossing the ABI boundary.
pub type PluginBox = PluginInstance_TO<'static, RBox<()>>;

// ============================================================================
// Entry point
// ============================================================================

/// Factory function type for creating plugin instances.
pub type PluginFactoryFn = extern "C" fn() -> PluginBox;

/// What a dynamic plugin library exports under a fixed symbol name.
///
/// Not `StableAbi` itself (function pointers are handled separately); ABI
/// stability comes from `#[repr(C)]` layout plus [`PluginBox`] being
/// `StableAbi`, with the version fields checked before `create` is ever
/// called.
#[repr(C)]
pub struct PluginEntry {
    /// API major version this plugin was built against.
    pub api_version_major: u32,
    /// API minor version this plugin was built against.
    pub api_version_minor: u32,
    /// Factory function to create plugin instances.
    pub create: PluginFactoryFn,
}

/// Fixed symbol name every dynamic plugin library must export.
pub const ENTRY_POINT_NAME: &[u8] = b"histreamer_plugin_entry\0";

/// Declare a native plugin entry point for a `Default`-constructible type.
#[macro_export]
macro_rules! declare_plugin {
    ($plugin_type:ty) => {
        #[no_mangle]
        pub extern "C" fn histreamer_plugin_entry() -> $crate::PluginEntry {
            extern "C" fn create() -> $crate::PluginBox {
                let plugin = <$plugin_type as ::std::default::Default>::default();
                $crate::PluginInstance_TO::from_value(plugin, ::abi_stable::sabi_trait::TD_Opaque)
            }

            $crate::PluginEntry {
                api_version_major: $crate::API_VERSION_MAJOR,
                api_version_minor: $crate::API_VERSION_MINOR,
                create,
            }
        }
    };

    ($plugin_type:ty, $constructor:expr) => {
        #[no_mangle]
        pub extern "C" fn histreamer_plugin_entry() -> $crate::PluginEntry {
            extern "C" fn create() -> $crate::PluginBox {
                let plugin = $constructor;
                $crate::PluginInstance_TO::from_value(plugin, ::abi_stable::sabi_trait::TD_Opaque)
            }

            $crate::PluginEntry {
                api_version_major: $crate::API_VERSION_MAJOR,
                api_version_minor: $crate::API_VERSION_MINOR,
                create,
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_builder_roundtrip() {
        let cap = CapabilityAbi::with_mime("audio/raw")
            .append_fixed("audio.sample_rate", TagValueAbi::U32(48_000))
            .append_interval(
                "audio.channels",
                TagValueAbi::U32(2),
                TagValueAbi::U32(5),
            );
        assert_eq!(cap.mime.as_str(), "audio/raw");
        assert_eq!(cap.constraints.len(), 2);
    }

    #[test]
    fn plugin_def_defaults_to_current_api_version() {
        let def = PluginDefBase::new("builtin.sink.null", PluginKind::AudioSink).with_rank(200);
        assert_eq!(def.api_version_major, API_VERSION_MAJOR);
        assert_eq!(def.rank, 100, "rank must clamp to 100");
    }

    #[test]
    fn eos_buffer_reports_eos() {
        let buf = AbiBuffer::eos(0);
        assert!(buf.is_eos());
        assert!(buf.data.is_empty());
    }
}
