//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus serving fixed configured values."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use chrono::NaiveDateTime;
use r_ems_common::config::{CommonBusConfig, ConstantBusConfig};
use r_ems_msg::ParameterSet;
use tracing::warn;

use super::{Bus, BusCore};
use crate::errors::Result;

/// Returns the configured output values on every transaction. Inputs are
/// discarded.
#[derive(Debug)]
pub struct ConstantBus {
    core: BusCore,
}

impl ConstantBus {
    pub fn new(common: &CommonBusConfig, _config: ConstantBusConfig) -> Result<Self> {
        Ok(Self {
            core: BusCore::from_config(common)?,
        })
    }
}

#[async_trait]
impl Bus for ConstantBus {
    fn type_name(&self) -> &'static str {
        "ConstantBus"
    }

    fn core(&self) -> &BusCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BusCore {
        &mut self.core
    }

    async fn start(&mut self) -> Result<()> {
        if self.core.is_started() {
            warn!(bus = %self.core.label(), "bus already started");
            return Ok(());
        }
        self.core.begin();
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.core.end();
        Ok(())
    }

    async fn send(&mut self, _inputs: &ParameterSet) -> Result<()> {
        Ok(())
    }

    async fn run_to(&mut self, _ts: NaiveDateTime) -> Result<()> {
        Ok(())
    }

    async fn recv(&mut self, _requested: &ParameterSet) -> Result<ParameterSet> {
        Ok(self.core.outputs().clone())
    }

    fn accepts_extra_outputs(&self) -> bool {
        false
    }
}
