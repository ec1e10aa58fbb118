//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Recorded series replay module exports."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Recorded time series backing the file-replay bus.

pub mod replay;
pub mod timeseries;

pub use replay::{load_series, parse_series_value, ReplayError};
pub use timeseries::TimeSeries;
