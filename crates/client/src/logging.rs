//! Logging macros for the realtime client.
//!
//! Everything is routed through `tracing` under the `bms_realtime` target so
//! applications can filter the socket chatter with
//! `RUST_LOG=bms_realtime=debug`.

#[doc(hidden)]
pub fn log_info_impl(msg: &str) {
    tracing::info!(target: "bms_realtime", "{}", msg);
}

#[doc(hidden)]
pub fn log_error_impl(msg: &str) {
    tracing::error!(target: "bms_realtime", "{}", msg);
}

#[doc(hidden)]
pub fn log_warn_impl(msg: &str) {
    tracing::warn!(target: "bms_realtime", "{}", msg);
}

#[doc(hidden)]
pub fn log_debug_impl(msg: &str) {
    tracing::debug!(target: "bms_realtime", "{}", msg);
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
