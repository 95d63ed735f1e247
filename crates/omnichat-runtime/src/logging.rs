//! Console logging setup

use omnichat_core::LogLevel;
use tracing::Level;

/// Map the SDK log level onto tracing's
pub fn tracing_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

/// Install a global fmt subscriber at `level`
///
/// Returns false when a subscriber was already installed, in which case the
/// existing one stays in place.
pub fn init_console_logging(level: LogLevel) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(tracing_level(level))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .is_ok()
}
