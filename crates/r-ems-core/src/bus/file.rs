//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus replaying recorded series instead of a live backend."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! File-replay bus.
//!
//! Every configured output is backed by a series file loaded once at start.
//! Reads return the latest sample at or before the current simulated time.
//! Inputs never reach a backend; they are optionally appended to a CSV
//! recording.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use r_ems_common::config::{CommonBusConfig, FileBusConfig};
use r_ems_common::time::format_timestamp;
use r_ems_logging::{ems_warn, LogContext};
use r_ems_msg::{render_value, ParamId, ParamValue, ParameterSet};
use r_ems_sim::{load_series, TimeSeries};
use serde::Serialize;
use tracing::{debug, warn};

use super::{Bus, BusCore};
use crate::errors::{BusError, Result};

#[derive(Debug, Serialize)]
struct RecordedInput<'a> {
    timestamp: String,
    object: &'a str,
    property: &'a str,
    value: String,
    unit: &'a str,
}

#[derive(Debug)]
pub struct FileBus {
    core: BusCore,
    config: FileBusConfig,
    series: IndexMap<ParamId, TimeSeries>,
    recorder: Option<csv::Writer<File>>,
}

impl FileBus {
    pub fn new(common: &CommonBusConfig, config: FileBusConfig) -> Result<Self> {
        Ok(Self {
            core: BusCore::from_config(common)?,
            config,
            series: IndexMap::new(),
            recorder: None,
        })
    }

    fn recording_path(&self) -> PathBuf {
        if self.config.save_input_file.is_absolute() {
            self.config.save_input_file.clone()
        } else {
            self.core.folder().join(&self.config.save_input_file)
        }
    }

    fn open_recorder(&self) -> Result<csv::Writer<File>> {
        let path = self.recording_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| BusError::Io {
                path: path.clone(),
                source,
            })?;
        let fresh = file
            .metadata()
            .map(|meta| meta.len() == 0)
            .map_err(|source| BusError::Io {
                path: path.clone(),
                source,
            })?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            writer
                .write_record(["timestamp", "object", "property", "value", "unit"])
                .map_err(|source| BusError::Recording { path, source })?;
        }
        Ok(writer)
    }

    fn flush_recorder(&mut self) -> Result<()> {
        let path = self.recording_path();
        if let Some(recorder) = self.recorder.as_mut() {
            recorder
                .flush()
                .map_err(|source| BusError::Io { path, source })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Bus for FileBus {
    fn type_name(&self) -> &'static str {
        "FileBus"
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
        let mut series = IndexMap::new();
        for output in self.core.outputs().iter() {
            let Some(file) = &output.source_file else {
                return Err(BusError::MissingSeries {
                    output: output.id().to_string(),
                });
            };
            let path = if file.is_absolute() {
                file.clone()
            } else {
                self.core.folder().join(file)
            };
            series.insert(output.id(), load_series(&path)?);
        }
        self.series = series;
        if self.config.save_input {
            self.recorder = Some(self.open_recorder()?);
        }
        self.core.begin();
        debug!(bus = %self.core.label(), series = self.series.len(), "file bus started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.core.is_started() {
            warn!(bus = %self.core.label(), "bus already stopped");
            return Ok(());
        }
        self.flush_recorder()?;
        self.recorder = None;
        self.core.end();
        Ok(())
    }

    async fn send(&mut self, inputs: &ParameterSet) -> Result<()> {
        let path = self.recording_path();
        let Some(recorder) = self.recorder.as_mut() else {
            return Ok(());
        };
        let timestamp = format_timestamp(self.core.current_time(), self.core.time().timezone());
        for param in inputs.iter() {
            let row = RecordedInput {
                timestamp: timestamp.clone(),
                object: &param.object,
                property: param.property.as_deref().unwrap_or(""),
                value: render_value(&param.value),
                unit: param.unit.as_deref().unwrap_or(""),
            };
            if let Err(source) = recorder.serialize(row) {
                return Err(BusError::Recording { path, source });
            }
        }
        self.flush_recorder()
    }

    async fn run_to(&mut self, _ts: NaiveDateTime) -> Result<()> {
        Ok(())
    }

    async fn recv(&mut self, requested: &ParameterSet) -> Result<ParameterSet> {
        let now = self.core.current_time();
        let mut received = ParameterSet::new();
        for param in requested.iter() {
            let mut result = param.clone();
            match self.series.get(&param.id()).and_then(|series| series.value_at(now)) {
                Some(value) => result.set_value(value.clone()),
                None => {
                    let rendered = now.to_string();
                    let ctx = LogContext::new()
                        .with_bus(self.core.label())
                        .with_phase("outputs")
                        .with_sim_time(&rendered);
                    ems_warn!(context = ctx, "no sample for {} at or before this time", param.id());
                    result.set_value(ParamValue::Null);
                }
            }
            received.add(result);
        }
        Ok(received)
    }

    fn accepts_extra_outputs(&self) -> bool {
        false
    }
}
