//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives for the co-simulation bus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the co-simulation bus workspace.
//! This crate exposes the simulated clock, typed bus configuration and the
//! tracing bootstrap consumed by the rest of the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    BusConfig, BusVariantConfig, CommonBusConfig, ConfigError, ConstantBusConfig, DebugArgs,
    DebugKind, FileBusConfig, LoadedBusConfig, LoggingConfig, MultiNodeBusConfig, NodeSpec,
    OutputSpec, SimulatorBusConfig, StartupConfig, TranslatorKind, DEFAULT_BUS_FILE,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{format_timestamp, parse_timestamp, TimeError, TimeModel};
