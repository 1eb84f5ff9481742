//! Internal logging helpers for structured cloud-layer events.

/// Single logging target for the crate.
pub(crate) const LOG_TARGET: &str = "cirrusdb";

macro_rules! cirrus_log {
    ($level:expr, $event:expr, $fmt:expr $(, $args:expr)* $(,)?) => {{
        if log::log_enabled!($level) {
            log::log!(
                target: crate::logging::LOG_TARGET,
                $level,
                "event={} {}",
                $event,
                format_args!($fmt $(, $args)*)
            );
        }
    }};
}

pub(crate) use cirrus_log;
