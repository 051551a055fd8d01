//! Structured logging for the coordinator.
//!
//! Every component logs through `tracing` macros. This module only installs
//! the subscriber:
//! - ERROR: a task or probe failed in a way the caller will see
//! - WARN: a system degraded, a fallback marker was recorded, a scale signal fired
//! - INFO: admission, dispatch, completion, registration
//! - DEBUG: routing candidates, per-call timings, queue movement
//! - TRACE: individual load adjustments and probe results
//!
//! Debug mode can be enabled with `init_with_debug(true)` or `SWITCHBOARD_DEBUG=1`.
//! `RUST_LOG` overrides the computed filter when set.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once, OnceLock};

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Environment variable that switches on debug output.
pub const DEBUG_ENV: &str = "SWITCHBOARD_DEBUG";

/// Initialize logging to ~/.switchboard/switchboard.log
pub fn init() {
    init_with_debug(false);
}

/// Initialize logging with explicit debug mode setting.
///
/// Only the first call has any effect. Later calls neither reopen (and so
/// truncate) the log file nor change the debug setting.
pub fn init_with_debug(debug: bool) {
    install(dirs::home_dir().map(|home| home.join(".switchboard")), debug);
}

fn install(log_dir: Option<PathBuf>, debug: bool) {
    INIT.call_once(|| {
        let debug_enabled = debug || env_debug();
        DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);
        install_subscriber(log_dir, debug_enabled);
    });
}

fn install_subscriber(log_dir: Option<PathBuf>, debug_enabled: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    match log_dir.and_then(open_log_file) {
        Some((path, file)) => {
            LOG_PATH.set(path).ok();
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .try_init();
        }
    }
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Path of the active log file, if file logging was set up.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "info,switchboard=debug"
    } else {
        "warn,switchboard=info"
    }
}

fn open_log_file(dir: PathBuf) -> Option<(PathBuf, File)> {
    std::fs::create_dir_all(&dir).ok()?;
    let path = dir.join("switchboard.log");
    // Truncate file on startup
    let file = File::create(&path).ok()?;
    Some((path, file))
}
