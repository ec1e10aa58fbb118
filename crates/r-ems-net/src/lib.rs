//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulator control channel: protocol, transport and process supervision."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Control channel to the external power-flow simulator.
//!
//! The simulator runs as a child process serving a small HTTP control
//! interface. [`protocol`] shapes the requests, [`process`] launches and
//! supervises the child, and [`client::ControlChannel`] ties both together.

pub mod client;
#[cfg(any(test, feature = "fake-simulator"))]
pub mod fake;
pub mod process;
pub mod protocol;

use std::path::PathBuf;

use thiserror::Error;

/// Failures while building a channel or preparing a launch.
///
/// Request failures are not errors; they mark the channel disconnected.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("unable to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to spawn simulator {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub use client::{ChannelState, ControlChannel};
pub use process::{install_exit_hooks, kill_all, live_children, spawn_signal_cleanup};
