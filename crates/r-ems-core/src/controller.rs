//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Set-point injection interleaved with bus transactions."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Set-point controller.
//!
//! Set-points are scheduled as events on an [`EventScheduler`] whose epoch
//! is the bus start time. Each [`SetpointController::step`] moves the bus
//! either to the next due set-point or by one regular step, whichever comes
//! first, so the scheduler stays sequential while the bus does the blocking
//! work.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use r_ems_common::config::timestamp;
use r_ems_msg::{ParamValue, Parameter, ParameterSet, TransactionEnvelope};
use r_ems_rt::{Event, EventPriority, EventScheduler};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bus::{Bus, TransactionPhase, TransactionRequest};
use crate::errors::{BusError, Result};

/// Writes one value into the pending input set when executed.
#[derive(Debug, Clone)]
pub struct SetpointEvent {
    pub object: String,
    pub property: Option<String>,
    pub value: ParamValue,
    pub unit: Option<String>,
    pub priority: EventPriority,
}

impl SetpointEvent {
    fn parameter(&self) -> Parameter {
        let mut param = Parameter::new(self.object.clone(), self.property.as_deref(), self.value.clone());
        param.unit = self.unit.clone();
        param
    }
}

impl Event<ParameterSet> for SetpointEvent {
    fn priority(&self) -> EventPriority {
        self.priority
    }

    fn label(&self) -> String {
        match &self.property {
            Some(property) => format!("setpoint {}.{}", self.object, property),
            None => format!("setpoint {}", self.object),
        }
    }

    fn execute(self: Box<Self>, at: NaiveDateTime, pending: &mut ParameterSet) -> anyhow::Result<()> {
        let param = self.parameter();
        debug!(at = %at, param = %param, "set-point applied");
        pending.add(param);
        Ok(())
    }
}

/// One entry of a set-point file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetpointRecord {
    #[serde(with = "timestamp")]
    pub time: NaiveDateTime,
    pub name: String,
    #[serde(default)]
    pub param: Option<String>,
    pub value: ParamValue,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub priority: EventPriority,
}

impl SetpointRecord {
    pub fn to_event(&self) -> SetpointEvent {
        SetpointEvent {
            object: self.name.clone(),
            property: self.param.clone(),
            value: self.value.clone(),
            unit: self.unit.clone(),
            priority: self.priority,
        }
    }
}

/// Read a JSON list of set-points.
pub fn load_setpoints(path: impl AsRef<Path>) -> Result<Vec<SetpointRecord>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| BusError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut de = serde_json::Deserializer::from_str(&contents);
    serde_path_to_error::deserialize(&mut de).map_err(|err| BusError::Setpoints {
        path: PathBuf::from(path),
        field: err.path().to_string(),
        message: err.inner().to_string(),
    })
}

/// Drives a bus while injecting scheduled set-points.
#[derive(Debug)]
pub struct SetpointController {
    scheduler: EventScheduler<ParameterSet>,
    pending: ParameterSet,
}

impl SetpointController {
    /// Controller whose scheduler epoch is `epoch`, normally the bus start.
    pub fn new(epoch: NaiveDateTime) -> Self {
        Self {
            scheduler: EventScheduler::new(epoch),
            pending: ParameterSet::new(),
        }
    }

    pub fn for_bus(bus: &dyn Bus) -> Self {
        Self::new(bus.core().time().start())
    }

    pub fn schedule(&mut self, record: &SetpointRecord) -> Result<()> {
        self.scheduler
            .schedule_absolute(Box::new(record.to_event()), record.time)?;
        Ok(())
    }

    pub fn schedule_all<'a>(&mut self, records: impl IntoIterator<Item = &'a SetpointRecord>) -> Result<()> {
        for record in records {
            self.schedule(record)?;
        }
        Ok(())
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.len()
    }

    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.scheduler.next_due()
    }

    /// Advance `bus` to the next set-point or the next step, whichever is
    /// sooner, and return the outputs of that transaction.
    ///
    /// Set-points are written with [`Bus::send`] after the bus reached their
    /// time, so they take effect from the following transaction on.
    pub async fn step(&mut self, bus: &mut dyn Bus) -> Result<TransactionEnvelope> {
        let now = bus.core().current_time();
        let next_step = bus.core().time().next_step_time();
        let Some(due) = self.scheduler.next_due().filter(|due| *due <= next_step) else {
            return bus.transaction(TransactionRequest::new()).await;
        };

        let envelope = if due > now {
            bus.transaction(TransactionRequest::new().at(due)).await?
        } else {
            bus.transaction(TransactionRequest::only(TransactionPhase::Outputs))
                .await?
        };
        let applied = self.scheduler.run_until(due, &mut self.pending)?;
        let setpoints = std::mem::take(&mut self.pending);
        info!(at = %due, events = applied, parameters = setpoints.len(), "set-points due");
        bus.send(&setpoints).await?;
        Ok(envelope)
    }
}
