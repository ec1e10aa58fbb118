//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters and debug sinks for buses."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Bus-scoped structured logging and the debug sink collaborator.
#![warn(missing_docs)]

use tracing::Level;

pub mod debug;
pub mod macros;

pub use debug::{ConsoleDebugSink, DebugSink, FileDebugSink, NoopDebugSink, SharedDebugSink};

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Label of the bus emitting the event.
    pub bus: Option<&'a str>,
    /// Transaction phase in progress.
    pub phase: Option<&'a str>,
    /// Simulated time rendered as text.
    pub sim_time: Option<&'a str>,
    /// Child index inside a multi-node bus.
    pub node: Option<usize>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a bus label.
    pub fn with_bus(mut self, bus: &'a str) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Attach a transaction phase.
    pub fn with_phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Attach a simulated time.
    pub fn with_sim_time(mut self, sim_time: &'a str) -> Self {
        self.sim_time = Some(sim_time);
        self
    }

    /// Attach a child index.
    pub fn with_node(mut self, node: usize) -> Self {
        self.node = Some(node);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation degraded but the bus keeps running.
    Degraded,
    /// The operation failed or was aborted.
    Fault,
}

impl BusEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            BusEventOutcome::Success => "success",
            BusEventOutcome::Degraded => "degraded",
            BusEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized bus lifecycle event (start, stop, connect).
pub fn log_bus_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: BusEventOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                bus = ctx.bus.unwrap_or(""),
                phase = ctx.phase.unwrap_or(""),
                sim_time = ctx.sim_time.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        BusEventOutcome::Success => emit!(Level::INFO),
        BusEventOutcome::Degraded => emit!(Level::WARN),
        BusEventOutcome::Fault => emit!(Level::ERROR),
    }
}
