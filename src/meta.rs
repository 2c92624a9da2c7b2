// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Meta (tagged key→value map describing a stream) and Capability (the
//! predicate counterpart a plugin advertises), plus the `CompatibleWith`
//! check that is the sole authority for "can plugin P handle stream S?"

use std::collections::BTreeMap;
use std::fmt;

/// A closed tagged union over the concrete value types the engine uses.
/// A tagged sum is preferred over a runtime-typed `Any` for static
/// exhaustiveness.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// UTF-8 string (mime, language, title, ...).
    Str(String),
    /// Unsigned 32-bit (channel count, sample rate, width, height, ...).
    U32(u32),
    /// Unsigned 64-bit (duration, file size, ...).
    U64(u64),
    /// Signed 64-bit (bitrate, stream position, ...).
    I64(i64),
    /// Floating point.
    F64(f64),
    /// Boolean flag.
    Bool(bool),
    /// Opaque byte payload (codec-config blob, ...).
    Bytes(Vec<u8>),
}

impl TagValue {
    /// Numeric comparison used by `Interval` constraints. Returns `None`
    /// for non-numeric variants, since string tags never match `Interval`.
    fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::U32(v) => Some(*v as f64),
            TagValue::U64(v) => Some(*v as f64),
            TagValue::I64(v) => Some(*v as f64),
            TagValue::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Str(s) => write!(f, "{s}"),
            TagValue::U32(v) => write!(f, "{v}"),
            TagValue::U64(v) => write!(f, "{v}"),
            TagValue::I64(v) => write!(f, "{v}"),
            TagValue::F64(v) => write!(f, "{v}"),
            TagValue::Bool(v) => write!(f, "{v}"),
            TagValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Well-known tag identifiers. Meta is not restricted to these — any
/// string key may be set — but these are the ones `CompatibleWith` and the
/// built-in filters know how to interpret.
pub mod tags {
    /// Mime type, e.g. `"audio/raw"`. Required on every Meta that
    /// participates in negotiation.
    pub const MIME: &str = "mime";
    /// `STREAM_INDEX` — which elementary stream this Meta describes.
    pub const STREAM_INDEX: &str = "stream_index";
    /// Channel count.
    pub const AUDIO_CHANNELS: &str = "audio.channels";
    /// Named channel layout, e.g. `"stereo"`.
    pub const AUDIO_CHANNEL_LAYOUT: &str = "audio.channel_layout";
    /// Sample rate in Hz.
    pub const AUDIO_SAMPLE_RATE: &str = "audio.sample_rate";
    /// Sample format, e.g. `"s16le"`.
    pub const AUDIO_SAMPLE_FORMAT: &str = "audio.sample_format";
    /// Frame width in pixels.
    pub const VIDEO_WIDTH: &str = "video.width";
    /// Frame height in pixels.
    pub const VIDEO_HEIGHT: &str = "video.height";
    /// Codec-specific configuration blob (e.g. AAC `AudioSpecificConfig`).
    pub const MEDIA_CODEC_CONFIG: &str = "media.codec_config";
    /// Stream duration in microseconds.
    pub const MEDIA_DURATION: &str = "media.duration";
    /// Average bitrate.
    pub const MEDIA_BITRATE: &str = "media.bitrate";
}

/// A mapping from tag name to value. Meta is purely descriptive and, once
/// attached to a stream description, conceptually immutable (callers clone
/// rather than mutate a shared Meta in place).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    values: BTreeMap<String, TagValue>,
}

impl Meta {
    /// An empty Meta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag. Any previous value for the same key is replaced.
    pub fn set(&mut self, tag: impl Into<String>, value: TagValue) -> &mut Self {
        self.values.insert(tag.into(), value);
        self
    }

    /// Builder-style `set`.
    pub fn with(mut self, tag: impl Into<String>, value: TagValue) -> Self {
        self.set(tag, value);
        self
    }

    /// Look up a tag's value, regardless of type.
    pub fn get(&self, tag: &str) -> Option<&TagValue> {
        self.values.get(tag)
    }

    /// Whether a tag is present.
    pub fn contains(&self, tag: &str) -> bool {
        self.values.contains_key(tag)
    }

    /// Convenience accessor for the `MIME` tag.
    pub fn mime(&self) -> Option<&str> {
        match self.get(tags::MIME) {
            Some(TagValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Merge `other` over `self`, key-wise; last writer (here, `other`)
    /// wins per key.
    pub fn update(&mut self, other: &Meta) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// Iterate all tags.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// One constraint placed on a tag within a [`Capability`].
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// The tag must hold exactly this value.
    Fixed(TagValue),
    /// The tag, if numeric, must fall within `[min(lo,hi), max(lo,hi)]`.
    Interval(TagValue, TagValue),
    /// The tag must hold one of these values.
    Discrete(Vec<TagValue>),
}

/// A predicate over Meta: a mime pattern plus a set of per-tag constraints
/// describing what a Meta must satisfy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capability {
    mime: String,
    constraints: Vec<(String, Constraint)>,
}

impl Capability {
    /// Start building a capability for the given mime pattern (`"*"`,
    /// `"audio/*"`, or an exact `"type/subtype"`).
    pub fn with_mime(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            constraints: Vec::new(),
        }
    }

    /// A capability accepting any well-formed mime with no further
    /// constraints.
    pub fn any() -> Self {
        Self::with_mime("*")
    }

    /// Append a fixed-value constraint.
    pub fn append_fixed(mut self, tag: impl Into<String>, value: TagValue) -> Self {
        self.constraints.push((tag.into(), Constraint::Fixed(value)));
        self
    }

    /// Append an interval constraint.
    pub fn append_interval(mut self, tag: impl Into<String>, lo: TagValue, hi: TagValue) -> Self {
        self.constraints
            .push((tag.into(), Constraint::Interval(lo, hi)));
        self
    }

    /// Append a discrete-set constraint.
    pub fn append_discrete(mut self, tag: impl Into<String>, values: Vec<TagValue>) -> Self {
        self.constraints
            .push((tag.into(), Constraint::Discrete(values)));
        self
    }

    /// The mime pattern this capability matches against.
    pub fn mime(&self) -> &str {
        &self.mime
    }
}

fn mime_matches(pattern: &str, actual: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let (Some((p_type, p_sub)), Some((a_type, a_sub))) =
        (pattern.split_once('/'), actual.split_once('/'))
    else {
        return false;
    };
    if !p_type.eq_ignore_ascii_case(a_type) {
        return false;
    }
    p_sub == "*" || p_sub.eq_ignore_ascii_case(a_sub)
}

fn constraint_matches(constraint: &Constraint, value: &TagValue) -> bool {
    match constraint {
        Constraint::Fixed(v) => v == value,
        Constraint::Interval(lo, hi) => {
            let (Some(lo), Some(hi), Some(x)) = (lo.as_f64(), hi.as_f64(), value.as_f64()) else {
                return false;
            };
            let (min, max) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            min <= x && x <= max
        }
        Constraint::Discrete(values) => values.contains(value),
    }
}

/// Whether a tag name is known to the compatibility checker. Unknown
/// constrained tags cause the whole capability to be rejected (fail-closed).
fn is_checkable_tag(tag: &str) -> bool {
    matches!(
        tag,
        tags::AUDIO_CHANNELS
            | tags::AUDIO_CHANNEL_LAYOUT
            | tags::AUDIO_SAMPLE_RATE
            | tags::AUDIO_SAMPLE_FORMAT
            | tags::VIDEO_WIDTH
            | tags::VIDEO_HEIGHT
            | tags::MEDIA_BITRATE
    )
}

/// `CompatibleWith(cap, meta)`: the sole authority for "can plugin P handle
/// stream S?"
///
/// A Meta matches iff the mime pattern matches and, for every constrained
/// tag in `cap`, either the Meta lacks that tag or the Meta's value
/// satisfies the constraint. Absence is treated as vacuously satisfied; see
/// DESIGN.md for the reasoning behind that choice.
pub fn compatible_with(cap: &Capability, meta: &Meta) -> bool {
    let Some(mime) = meta.mime() else {
        return false;
    };
    if !mime_matches(&cap.mime, mime) {
        return false;
    }
    for (tag, constraint) in &cap.constraints {
        if !is_checkable_tag(tag) {
            return false;
        }
        if let Some(value) = meta.get(tag) {
            if !constraint_matches(constraint, value) {
                return false;
            }
        }
    }
    true
}

/// A set of capabilities; matches iff any member matches.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySet {
    members: Vec<Capability>,
}

impl CapabilitySet {
    /// An empty set (matches nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from an iterator of capabilities.
    pub fn from_caps(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            members: caps.into_iter().collect(),
        }
    }

    /// Add a capability to the set.
    pub fn push(&mut self, cap: Capability) {
        self.members.push(cap);
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Iterate member capabilities.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.members.iter()
    }
}

/// `CompatibleWith(CapabilitySet, meta) == exists c in set. CompatibleWith(c, meta)`.
pub fn compatible_with_set(set: &CapabilitySet, meta: &Meta) -> bool {
    set.members.iter().any(|cap| compatible_with(cap, meta))
}

// ---------------------------------------------------------------------------
// Per-buffer typed meta: a Buffer carries exactly one typed meta (Audio
// or Video) describing layout.
// ---------------------------------------------------------------------------

/// Audio layout fields carried directly on a Buffer, for the hot path where
/// consulting a full [`Meta`] map would be wasteful.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBufferMeta {
    /// Channel count.
    pub channels: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Video layout fields carried directly on a Buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoBufferMeta {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

/// The type-stable tagged meta attached to a Buffer. An audio buffer stays
/// audio for its lifetime; `reset()` replaces the payload with
/// a fresh instance of the same variant, never switches variants.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedMeta {
    /// Audio layout.
    Audio(AudioBufferMeta),
    /// Video layout.
    Video(VideoBufferMeta),
}

impl TypedMeta {
    /// A default-valued instance of the same variant as `self`.
    pub fn fresh_of_same_kind(&self) -> Self {
        match self {
            TypedMeta::Audio(_) => TypedMeta::Audio(AudioBufferMeta::default()),
            TypedMeta::Video(_) => TypedMeta::Video(VideoBufferMeta::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_meta(channels: u32, sample_rate: u32) -> Meta {
        Meta::new()
            .with(tags::MIME, TagValue::Str("audio/raw".into()))
            .with(tags::AUDIO_CHANNELS, TagValue::U32(channels))
            .with(tags::AUDIO_SAMPLE_RATE, TagValue::U32(sample_rate))
    }

    #[test]
    fn wildcard_mime_matches_anything_well_formed() {
        let cap = Capability::any();
        assert!(compatible_with(&cap, &stereo_meta(2, 48_000)));
    }

    #[test]
    fn missing_mime_never_matches() {
        let cap = Capability::any();
        let meta = Meta::new();
        assert!(!compatible_with(&cap, &meta));
    }

    #[test]
    fn type_wildcard_is_case_insensitive() {
        let cap = Capability::with_mime("AUDIO/*");
        assert!(compatible_with(&cap, &stereo_meta(2, 48_000)));
    }

    #[test]
    fn absent_constrained_tag_is_vacuously_satisfied() {
        // cap constrains sample_rate but meta doesn't carry it at all.
        let cap = Capability::with_mime("audio/raw")
            .append_fixed(tags::AUDIO_SAMPLE_RATE, TagValue::U32(48_000));
        let meta = Meta::new().with(tags::MIME, TagValue::Str("audio/raw".into()));
        assert!(compatible_with(&cap, &meta));
    }

    #[test]
    fn unknown_constrained_tag_fails_closed() {
        let cap = Capability::with_mime("audio/raw")
            .append_fixed("totally.unknown.tag", TagValue::U32(1));
        assert!(!compatible_with(&cap, &stereo_meta(2, 48_000)));
    }

    #[test]
    fn interval_never_matches_string_tag() {
        let cap = Capability::with_mime("audio/raw").append_interval(
            tags::AUDIO_CHANNEL_LAYOUT,
            TagValue::U32(0),
            TagValue::U32(5),
        );
        let meta = stereo_meta(2, 48_000)
            .with(tags::AUDIO_CHANNEL_LAYOUT, TagValue::Str("stereo".into()));
        assert!(!compatible_with(&cap, &meta));
    }

    #[test]
    fn capability_set_matches_if_any_member_matches() {
        let set = CapabilitySet::from_caps([
            Capability::with_mime("video/*"),
            Capability::with_mime("audio/raw"),
        ]);
        assert!(compatible_with_set(&set, &stereo_meta(2, 48_000)));
    }

    #[test]
    fn compatibility_boundary_scenario() {
        // Boundary scenario: absent tag is vacuously satisfied.
        let cap = Capability::with_mime("audio/raw")
            .append_discrete(
                tags::AUDIO_CHANNEL_LAYOUT,
                vec![TagValue::Str("stereo".into()), TagValue::Str("surround".into())],
            )
            .append_interval(tags::AUDIO_CHANNELS, TagValue::U32(2), TagValue::U32(5))
            .append_fixed(tags::AUDIO_SAMPLE_RATE, TagValue::U32(48_000));

        let m1 = stereo_meta(3, 48_000).with(tags::AUDIO_CHANNEL_LAYOUT, TagValue::Str("stereo".into()));
        let m2 = stereo_meta(3, 44_100).with(tags::AUDIO_CHANNEL_LAYOUT, TagValue::Str("stereo".into()));
        let m3 = stereo_meta(3, 48_000).with(tags::AUDIO_CHANNEL_LAYOUT, TagValue::Str("ch2_1".into()));

        assert!(compatible_with(&cap, &m1));
        assert!(!compatible_with(&cap, &m2));
        assert!(!compatible_with(&cap, &m3));
    }
}
