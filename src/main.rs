//! KhanitraIO - safety controller daemon for the tracked excavator rig
//!
//! ## Protocol Architecture
//!
//! - **TCP (port 5580)**: Commands (reliable, bidirectional, per-command replies)
//! - **TCP (port 5581)**: Telemetry broadcast (obstacle events and distance reports)
//!
//! Obstacle monitoring runs regardless of client connections: a reading
//! inside the threshold stops the arm and turret motors even with no
//! dispatcher attached.

use khanitra_io::app::RigApp;
use khanitra_io::config::Config;
use khanitra_io::error::{Error, Result};
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Parse config path from command line arguments.
///
/// Supports:
/// - `khanitra-io <path>` (positional)
/// - `khanitra-io --config <path>` (flag-based)
/// - `khanitra-io -c <path>` (short flag)
///
/// Defaults to `/etc/khanitra.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/khanitra.toml".to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("KhanitraIO v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = parse_config_path();
    log::info!("Using config: {config_path}");
    let config = Config::from_file(&config_path)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {e}")))?;

    let app = RigApp::start(&config, Arc::clone(&running))?;
    log::info!("KhanitraIO running. Press Ctrl-C to stop.");
    app.run();
    app.shutdown();

    log::info!("KhanitraIO stopped");
    Ok(())
}
