// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `SourceDescriptor`: what `Player::set_source` accepts, and the URI
//! scheme dispatch used to pick a source plugin.

/// A media source identified by URI. The scheme (`file`, `http`, ...)
/// selects which registered `Source` plugin handles it; a URI with no
/// scheme is treated as a bare filesystem path (`file`), matching the
/// convention most command-line tools use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    uri: String,
    scheme: String,
}

impl SourceDescriptor {
    /// Parse `uri`, defaulting to the `file` scheme when none is present.
    pub fn parse(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_else(|| "file".to_string());
        Self { uri, scheme }
    }

    /// Full original URI as given to `set_source`.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Scheme used to select a `Source` plugin, e.g. `"file"`, `"http"`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_path_defaults_to_file_scheme() {
        let src = SourceDescriptor::parse("/home/user/song.mp3");
        assert_eq!(src.scheme(), "file");
        assert_eq!(src.uri(), "/home/user/song.mp3");
    }

    #[test]
    fn explicit_scheme_is_lowercased() {
        let src = SourceDescriptor::parse("HTTP://example.com/song.mp3");
        assert_eq!(src.scheme(), "http");
    }
}
