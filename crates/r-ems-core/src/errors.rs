//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error type shared by every bus variant."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use r_ems_common::ConfigError;
use r_ems_msg::{ArithmeticError, LookupError};
use r_ems_net::ChannelError;
use r_ems_rt::SchedulingError;
use r_ems_sim::ReplayError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("bus {bus} used before start")]
    NotStarted { bus: String },
    #[error("output {output} has no backing series file")]
    MissingSeries { output: String },
    #[error("unable to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to record inputs to {path}: {source}")]
    Recording {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("invalid set-point file {path} at '{field}': {message}")]
    Setpoints {
        path: PathBuf,
        field: String,
        message: String,
    },
    #[error("fallback bus factory failed: {0}")]
    Fallback(#[source] anyhow::Error),
}
