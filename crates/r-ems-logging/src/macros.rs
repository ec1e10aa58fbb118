//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus-scoped logging macros."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
/// Emit an informational log enriched with bus context.
#[macro_export]
macro_rules! ems_info {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::INFO,
            bus = ctx.bus.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            sim_time = ctx.sim_time.unwrap_or(""),
            node = ctx.node.map(|n| n as i64).unwrap_or(-1),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ems_info!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a warning enriched with bus context.
#[macro_export]
macro_rules! ems_warn {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::WARN,
            bus = ctx.bus.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            sim_time = ctx.sim_time.unwrap_or(""),
            node = ctx.node.map(|n| n as i64).unwrap_or(-1),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ems_warn!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit a debug log enriched with bus context.
#[macro_export]
macro_rules! ems_debug {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::DEBUG,
            bus = ctx.bus.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            sim_time = ctx.sim_time.unwrap_or(""),
            node = ctx.node.map(|n| n as i64).unwrap_or(-1),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ems_debug!(context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an error log enriched with bus context.
#[macro_export]
macro_rules! ems_error {
    (context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            tracing::Level::ERROR,
            bus = ctx.bus.unwrap_or(""),
            phase = ctx.phase.unwrap_or(""),
            sim_time = ctx.sim_time.unwrap_or(""),
            node = ctx.node.map(|n| n as i64).unwrap_or(-1),
            message = %format_args!($($arg)+)
        );
    }};
    ($($arg:tt)+) => {{
        $crate::ems_error!(context = $crate::LogContext::default(), $($arg)+)
    }};
}
