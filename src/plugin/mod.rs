// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plugin discovery, loading, and selection.

mod loader;
pub(crate) mod registry;

pub use loader::{load_plugin_library, LoadedPlugin};
pub use registry::{PluginRegistry, RejectedPlugin};
