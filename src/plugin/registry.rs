// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `PluginRegistry`: discovers, validates, and ranks available plugins.
//!
//! Registration failures (bad permissions, version mismatch, missing entry
//! point) are non-fatal: the offending file is recorded in
//! [`PluginRegistry::rejected`] and scanning continues, so one broken
//! third-party plugin never prevents the engine from starting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use histreamer_plugin_api::{PluginBox, PluginDefBase, PluginKind};
use parking_lot::Mutex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ErrorCode;
use crate::meta::{compatible_with_set, CapabilitySet, Meta};

use super::loader::{load_plugin_library, LoadedPlugin};

/// One entry successfully registered: its descriptor plus however the host
/// creates an instance from it.
struct Entry {
    def: PluginDefBase,
    factory: Arc<dyn Fn() -> PluginBox + Send + Sync>,
}

/// A plugin file or static registration that failed validation.
#[derive(Debug, Clone)]
pub struct RejectedPlugin {
    pub path: Option<PathBuf>,
    pub name: String,
    pub reason: ErrorCode,
}

/// Holds every successfully validated plugin descriptor and lets callers
/// pick the best match for a given kind and Meta.
#[derive(Default)]
pub struct PluginRegistry {
    entries: Mutex<Vec<Entry>>,
    rejected: Mutex<Vec<RejectedPlugin>>,
    // Keeps loaded libraries alive for the registry's lifetime.
    loaded: Mutex<Vec<LoadedPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin directly from an in-process factory, bypassing
    /// `libloading` entirely. Used for built-in collaborator filters
    /// which are not shipped as separate `cdylib`s.
    ///
    /// Validates the descriptor the same way `try_register_file` does
    /// (rank in range, a real `plugin_type`, API version in bounds) and
    /// rejects a malformed one instead of registering it.
    pub fn register_builtin(
        &self,
        def: PluginDefBase,
        factory: impl Fn() -> PluginBox + Send + Sync + 'static,
    ) {
        if let Err(reason) = validate_def(&def) {
            warn!(name = %def.name, ?reason, "rejecting built-in plugin registration");
            self.rejected.lock().push(RejectedPlugin {
                path: None,
                name: def.name.to_string(),
                reason,
            });
            return;
        }
        debug!(name = %def.name, "registering built-in plugin");
        self.register_validated(def, Arc::new(factory));
    }

    /// Insert a validated entry, replacing any existing entry of the same
    /// `(plugin_type, name)` only if the new one strictly outranks it
    /// newer replaces older only if strictly higher rank.
    fn register_validated(&self, def: PluginDefBase, factory: Arc<dyn Fn() -> PluginBox + Send + Sync>) {
        let mut guard = self.entries.lock();
        if let Some(existing) = guard
            .iter_mut()
            .find(|e| e.def.plugin_type == def.plugin_type && e.def.name == def.name)
        {
            if def.rank > existing.def.rank {
                existing.def = def;
                existing.factory = factory;
            }
            return;
        }
        guard.push(Entry { def, factory });
    }

    /// Recursively scan `dir` for native plugin libraries (`.so`/`.dll`/
    /// `.dylib`) and register every one that passes validation.
    pub fn scan_directory(&self, dir: &Path) {
        let extensions: &[&str] = if cfg!(target_os = "windows") {
            &["dll"]
        } else if cfg!(target_os = "macos") {
            &["dylib"]
        } else {
            &["so"]
        };

        for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !extensions.contains(&ext) {
                continue;
            }
            self.try_register_file(path);
        }
    }

    fn try_register_file(&self, path: &Path) {
        // SAFETY: `load_plugin_library` validates file permissions and API
        // version before the entry point is ever called.
        let loaded = match unsafe { load_plugin_library(path) } {
            Ok(loaded) => loaded,
            Err(reason) => {
                warn!(path = %path.display(), ?reason, "plugin registration failed");
                self.rejected.lock().push(RejectedPlugin {
                    path: Some(path.to_path_buf()),
                    name: path.display().to_string(),
                    reason,
                });
                return;
            }
        };

        let create = loaded.create;
        let def = create().def();
        let name = def.name.to_string();

        if let Err(reason) = validate_def(&def) {
            warn!(path = %path.display(), name, ?reason, "plugin registration failed");
            self.rejected.lock().push(RejectedPlugin {
                path: Some(path.to_path_buf()),
                name,
                reason,
            });
            return;
        }

        self.register_validated(def, Arc::new(move || create()));
        self.loaded.lock().push(loaded);
        debug!(name, "registered native plugin");
    }

    /// Record a rejection that happened outside the scan path (e.g. a
    /// static registration call with a malformed descriptor).
    pub fn reject(&self, name: impl Into<String>, reason: ErrorCode) {
        self.rejected.lock().push(RejectedPlugin {
            path: None,
            name: name.into(),
            reason,
        });
    }

    /// Plugins that failed validation, most-recent first is not guaranteed;
    /// order matches registration order.
    pub fn rejected(&self) -> Vec<RejectedPlugin> {
        self.rejected.lock().clone()
    }

    /// All registered descriptors of a given kind.
    pub fn descriptors_of_kind(&self, kind: PluginKind) -> Vec<PluginDefBase> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.def.plugin_type == kind)
            .map(|e| e.def.clone())
            .collect()
    }

    /// Among plugins of `kind` whose advertised input capabilities match
    /// `meta`, return the instance factory of the highest-ranked one
    /// (ties broken by registration order).
    pub fn find_best(&self, kind: PluginKind, meta: &Meta) -> Option<Arc<dyn Fn() -> PluginBox + Send + Sync>> {
        let guard = self.entries.lock();
        guard
            .iter()
            .filter(|e| e.def.plugin_type == kind)
            .filter(|e| {
                let caps = CapabilitySet::from_caps(e.def.input_caps.iter().map(to_host_capability));
                caps.is_empty() || compatible_with_set(&caps, meta)
            })
            .max_by_key(|e| e.def.rank)
            .map(|e| e.factory.clone())
    }

    /// Create an instance of `name` regardless of ranking, used when the
    /// caller already decided which plugin it wants (e.g. user override).
    pub fn create_named(&self, name: &str) -> Option<PluginBox> {
        let guard = self.entries.lock();
        guard
            .iter()
            .find(|e| e.def.name.as_str() == name)
            .map(|e| (e.factory)())
    }
}

/// Validate a descriptor before it ever enters `entries`:
/// `rank` must be in `0..=100` (the ABI's `u8` rank can't exceed 100 in
/// practice since `with_rank` clamps it, but a hand-built `PluginDefBase`
/// bypassing the builder could), `plugin_type` must be a real kind, and
/// the declared API version must be one this core accepts.
fn validate_def(def: &PluginDefBase) -> Result<(), ErrorCode> {
    if def.rank > 100 {
        return Err(ErrorCode::InvalidParameter);
    }
    if def.plugin_type == PluginKind::Invalid {
        return Err(ErrorCode::InvalidParameter);
    }
    if def.api_version_major != histreamer_plugin_api::API_VERSION_MAJOR {
        return Err(ErrorCode::UnsupportedFormat);
    }
    if def.api_version_minor > histreamer_plugin_api::API_VERSION_MINOR {
        return Err(ErrorCode::UnsupportedFormat);
    }
    Ok(())
}

pub(crate) fn to_host_capability(abi: &histreamer_plugin_api::CapabilityAbi) -> crate::meta::Capability {
    use crate::meta::TagValue;
    use histreamer_plugin_api::{ConstraintAbi, TagValueAbi};

    fn to_host_value(v: &TagValueAbi) -> TagValue {
        match v {
            TagValueAbi::Str(s) => TagValue::Str(s.to_string()),
            TagValueAbi::U32(v) => TagValue::U32(*v),
            TagValueAbi::U64(v) => TagValue::U64(*v),
            TagValueAbi::I64(v) => TagValue::I64(*v),
            TagValueAbi::Bool(b) => TagValue::Bool(*b),
            TagValueAbi::Bytes(b) => TagValue::Bytes(b.to_vec()),
        }
    }

    let mut cap = crate::meta::Capability::with_mime(abi.mime.as_str());
    for c in abi.constraints.iter() {
        cap = match &c.constraint {
            ConstraintAbi::Fixed(v) => cap.append_fixed(c.tag.as_str(), to_host_value(v)),
            ConstraintAbi::Interval(lo, hi) => {
                cap.append_interval(c.tag.as_str(), to_host_value(lo), to_host_value(hi))
            }
            ConstraintAbi::Discrete(values) => {
                cap.append_discrete(c.tag.as_str(), values.iter().map(to_host_value).collect())
            }
        };
    }
    cap
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi_stable::sabi_trait::TD_Opaque;
    use histreamer_plugin_api::PluginInstance_TO;

    #[derive(Default)]
    struct StubSink;

    impl histreamer_plugin_api::PluginInstance for StubSink {
        fn def(&self) -> PluginDefBase {
            PluginDefBase::new("builtin.sink.stub", PluginKind::AudioSink)
        }
    }

    fn make_stub() -> PluginBox {
        PluginInstance_TO::from_value(StubSink, TD_Opaque)
    }

    #[test]
    fn rank_selects_highest_ranked_match() {
        let registry = PluginRegistry::new();
        registry.register_builtin(
            PluginDefBase::new("low", PluginKind::AudioSink).with_rank(10),
            make_stub,
        );
        registry.register_builtin(
            PluginDefBase::new("high", PluginKind::AudioSink).with_rank(90),
            make_stub,
        );

        let factory = registry
            .find_best(PluginKind::AudioSink, &Meta::new())
            .expect("at least one sink registered");
        let instance = factory();
        assert_eq!(instance.def().name.as_str(), "high");
    }

    #[test]
    fn missing_directory_rejects_nothing_but_registers_nothing() {
        let registry = PluginRegistry::new();
        registry.scan_directory(Path::new("/nonexistent/plugins"));
        assert!(registry.rejected().is_empty());
        assert!(registry.descriptors_of_kind(PluginKind::Source).is_empty());
    }
}
