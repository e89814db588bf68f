//! Logging macros that set target to "guacgate" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "guacgate::server::tunnel"), which makes RUST_LOG filters and log
//! shippers needlessly fiddly. These macros pin every log line from this
//! crate to a single "guacgate" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "guacgate", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "guacgate", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "guacgate", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "guacgate", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "guacgate", $($arg)*) };
}
