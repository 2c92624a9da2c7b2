// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Native `cdylib` plugin loading via `libloading`.
//!
//! A plugin is one shared object exporting a single `histreamer_plugin_entry`
//! symbol of type `PluginEntry`. Before that symbol is ever called,
//! the file is checked for world-writable permissions (a plugin directory an
//! unprivileged user could tamper with is not trusted) and its declared API
//! major version is compared against ours.

use std::fs;
use std::path::Path;

use histreamer_plugin_api::{PluginBox, PluginEntry, API_VERSION_MAJOR, API_VERSION_MINOR, ENTRY_POINT_NAME};
use libloading::{Library, Symbol};
use tracing::{info, warn};

use crate::error::{ErrorCode, HsResult};

/// A plugin library kept alive for as long as instances created from it are
/// in use; dropping it unloads the shared object.
pub struct LoadedPlugin {
    _library: Library,
    pub create: extern "C" fn() -> PluginBox,
    pub api_version_major: u32,
    pub api_version_minor: u32,
}

#[cfg(unix)]
fn reject_if_world_writable(path: &Path) -> HsResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let check = |p: &Path| -> HsResult<()> {
        let meta = fs::metadata(p).map_err(|_| ErrorCode::InvalidSource)?;
        if meta.permissions().mode() & 0o022 != 0 {
            warn!(path = %p.display(), "refusing to load plugin: world- or group-writable");
            return Err(ErrorCode::InvalidOperation);
        }
        Ok(())
    };
    check(path)?;
    if let Some(parent) = path.parent() {
        check(parent)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn reject_if_world_writable(_path: &Path) -> HsResult<()> {
    Ok(())
}

/// Load a native plugin shared object from `path`, verifying file
/// permissions and API compatibility before returning a usable factory.
///
/// # Safety
///
/// Loading a shared library runs its initializers and later calls into
/// arbitrary foreign code through the exported entry point. Callers must
/// only pass paths to trusted plugin files.
pub unsafe fn load_plugin_library(path: &Path) -> HsResult<LoadedPlugin> {
    reject_if_world_writable(path)?;

    let library = unsafe { Library::new(path).map_err(|_| ErrorCode::InvalidSource)? };
    let entry_fn: Symbol<unsafe extern "C" fn() -> PluginEntry> =
        unsafe { library.get(ENTRY_POINT_NAME).map_err(|_| ErrorCode::InvalidSource)? };
    let entry = unsafe { entry_fn() };

    if entry.api_version_major != API_VERSION_MAJOR {
        warn!(
            path = %path.display(),
            plugin_major = entry.api_version_major,
            core_major = API_VERSION_MAJOR,
            "rejecting plugin: API major version mismatch"
        );
        return Err(ErrorCode::UnsupportedFormat);
    }

    if entry.api_version_minor > API_VERSION_MINOR {
        warn!(
            path = %path.display(),
            plugin_minor = entry.api_version_minor,
            core_minor = API_VERSION_MINOR,
            "rejecting plugin: API minor version newer than core"
        );
        return Err(ErrorCode::UnsupportedFormat);
    }

    info!(
        path = %path.display(),
        major = entry.api_version_major,
        minor = entry.api_version_minor,
        "loaded plugin library"
    );

    Ok(LoadedPlugin {
        _library: library,
        create: entry.create,
        api_version_major: entry.api_version_major,
        api_version_minor: entry.api_version_minor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_invalid_source() {
        let result = unsafe { load_plugin_library(Path::new("/nonexistent/path/plugin.so")) };
        assert_eq!(result.err(), Some(ErrorCode::InvalidSource));
    }
}
