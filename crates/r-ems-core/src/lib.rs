//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus transaction protocol, variants, loader and set-point controller."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Co-simulation bus core.
//!
//! A caller loads a [`Bus`] with [`BusLoader`], starts it, repeatedly runs
//! [`Bus::transaction`] until the bus reports finished, then stops it. The
//! [`SetpointController`] interleaves scheduled set-points with those steps.

pub mod bus;
pub mod controller;
pub mod errors;
pub mod loader;
pub mod translator;

pub use bus::{
    build_debug_sink, drive_transaction, get_properties, Bus, BusCore, ConstantBus, FileBus,
    MultiNodeBus, SimulatorBus, TransactionPhase, TransactionRequest,
};
pub use controller::{load_setpoints, SetpointController, SetpointEvent, SetpointRecord};
pub use errors::{BusError, Result};
pub use loader::{build_bus, BusLoader, FallbackFactory};
pub use translator::{
    expand_composites, positive_sequence_to_phase, translator_for, AggregatorTranslator,
    IdentityTranslator, Translator,
};
