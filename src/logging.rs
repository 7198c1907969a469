use log::{debug, info, log_enabled, Level};

use crate::util::hex::format_hex_compact;

/// Initializes the logger with the `env_logger` crate.
///
/// The level is taken from `RUST_LOG`; frame dumps are logged at `debug`.
pub fn init_logger() {
    env_logger::init();
}

/// Initializes the logger with a default filter, still honouring `RUST_LOG`.
///
/// Returns an error message if a global logger was already installed.
pub fn init_logger_with_filter(default_filter: &str) -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .try_init()
        .map_err(|e| e.to_string())
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}

/// Logs raw frame bytes at debug level, e.g. `SEND 10 5B 01 5C 16`.
pub fn log_frame(direction: &str, bytes: &[u8]) {
    if log_enabled!(Level::Debug) {
        debug!("{direction} {}", format_hex_compact(bytes));
    }
}
