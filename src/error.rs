// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The single error taxonomy used end-to-end by the pipeline runtime.

/// Every fallible operation in the crate returns this alias.
pub type HsResult<T> = Result<T, ErrorCode>;

/// The engine's error taxonomy. Filters translate plugin
/// failures into this set through one fixed translation table rather than
/// each module growing its own error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorCode {
    /// Source/demuxer exhausted; propagates as an EOS-flagged buffer and is
    /// converted by the pipeline into a `Complete` event.
    #[error("end of stream")]
    EndOfStream,

    /// A synchronous `send_event` exceeded its 5 second budget, or a plugin
    /// queue wait expired. The operation may still complete later.
    #[error("operation timed out")]
    Timeout,

    /// `set_source` was called with a null/malformed source.
    #[error("invalid source")]
    InvalidSource,

    /// A parameter had the wrong type or an out-of-range value.
    #[error("invalid parameter")]
    InvalidParameter,

    /// The requested intent is not permitted in the current state.
    #[error("invalid operation for current state")]
    InvalidOperation,

    /// Alias of `InvalidOperation` used where the source names the state
    /// explicitly (kept distinct from `InvalidOperation` in the taxonomy,
    /// collapsed to the same wire value here since both are "not now").
    #[error("wrong state")]
    WrongState,

    /// No registered plugin's capability set matches the negotiated Meta.
    #[error("unsupported format")]
    UnsupportedFormat,

    /// A link's capability intersection was empty.
    #[error("negotiation failed")]
    NegotiationFailed,

    /// `Pipeline::add_filters`/`PluginRegistry::register_builtin` was asked
    /// to add something that's already present (by identity or by name).
    #[error("already exists")]
    AlreadyExists,

    /// A required pointer/handle was absent.
    #[error("null pointer")]
    NullPointer,

    /// Allocation failed.
    #[error("out of memory")]
    NoMemory,

    /// Transient back-pressure; the caller should retry.
    #[error("would block, retry")]
    Again,

    /// The callee does not implement this optional behavior.
    #[error("not implemented")]
    Unimplemented,

    /// Anything not covered above.
    #[error("unknown error")]
    Unknown,
}

impl ErrorCode {
    /// Whether this error is transient and conventionally retried locally
    /// rather than posted upward as `Event::Error`.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorCode::Again | ErrorCode::Timeout)
    }
}

impl From<histreamer_plugin_api::PluginErrorAbi> for ErrorCode {
    fn from(e: histreamer_plugin_api::PluginErrorAbi) -> Self {
        use histreamer_plugin_api::PluginErrorAbi as P;
        match e {
            P::EndOfStream => ErrorCode::EndOfStream,
            P::Again => ErrorCode::Again,
            P::WrongState => ErrorCode::WrongState,
            P::InvalidParameter => ErrorCode::InvalidParameter,
            P::Unimplemented => ErrorCode::Unimplemented,
            P::NoMemory => ErrorCode::NoMemory,
            P::Other => ErrorCode::Unknown,
        }
    }
}
