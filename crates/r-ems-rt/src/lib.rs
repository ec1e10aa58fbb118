//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers for interleaving events with bus steps."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Deterministic event scheduling for the co-simulation runtime.

pub mod scheduling;

pub use scheduling::{Event, EventPriority, EventScheduler, FnEvent, SchedulingError};
