// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! histreamerd - minimal command-line driver for the HiStreamer engine.
//!
//! Loads configuration, scans plugin directories, and plays one source to
//! completion. Intended as a smoke test and usage example, not a full
//! media player.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use histreamer::{EngineConfig, ErrorCode, Player, PlayerCallback, StateId};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

struct LoggingCallback;

impl PlayerCallback for LoggingCallback {
    fn on_completed(&self) {
        info!("playback completed");
    }

    fn on_error(&self, err: ErrorCode) {
        error!(error = %err, "playback failed");
    }

    fn on_state_changed(&self, state: StateId) {
        info!(?state, "state changed");
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("histreamer=info".parse().unwrap()))
        .init();

    let Some(uri) = env::args().nth(1) else {
        eprintln!("usage: histreamerd <uri>");
        return ExitCode::FAILURE;
    };

    let config = match EngineConfig::load_default() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let player = Player::new(config.sync_event_timeout());
    player.set_player_callback(Arc::new(LoggingCallback));
    player.set_loop(config.default_looping);

    for dir in &config.plugin_search_paths {
        info!(dir = %dir.display(), "scanning for plugins");
        player.registry().scan_directory(dir);
    }
    for rejected in player.registry().rejected() {
        error!(name = %rejected.name, reason = %rejected.reason, "plugin rejected");
    }

    if let Err(e) = player.set_source(&uri) {
        error!(error = %e, uri, "set_source failed");
        return ExitCode::FAILURE;
    }

    if let Err(e) = player.play() {
        error!(error = %e, "play failed");
        return ExitCode::FAILURE;
    }

    while player.get_state() != StateId::Init {
        std::thread::sleep(Duration::from_millis(100));
    }

    ExitCode::SUCCESS
}
