//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus contract, shared bus state and the transaction state machine."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The bus contract.
//!
//! Every bus runs the same four-phase transaction: push inputs, run the
//! backend to the new simulated time, wait for it to arrive, read outputs.
//! Variants implement the backend hooks of [`Bus`]; the phase sequencing,
//! translation and clock handling live in [`drive_transaction`] and
//! [`BusCore`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use r_ems_common::config::{CommonBusConfig, DebugKind};
use r_ems_common::time::{format_timestamp, TimeModel};
use r_ems_logging::debug::{self, ConsoleDebugSink, FileDebugSink, SharedDebugSink, DEFAULT_DEBUG_FILE};
use r_ems_logging::{ems_debug, LogContext};
use r_ems_msg::{ParameterSet, TransactionEnvelope};
use tracing::warn;

use crate::errors::{BusError, Result};
use crate::translator::{expand_composites, translator_for, Translator};

pub mod constant;
pub mod file;
pub mod multi;
pub mod simulator;

pub use constant::ConstantBus;
pub use file::FileBus;
pub use multi::MultiNodeBus;
pub use simulator::SimulatorBus;

/// One step of a transaction, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransactionPhase {
    Inputs,
    RunTo,
    RunToPoll,
    Outputs,
}

impl TransactionPhase {
    pub const ALL: [TransactionPhase; 4] = [
        TransactionPhase::Inputs,
        TransactionPhase::RunTo,
        TransactionPhase::RunToPoll,
        TransactionPhase::Outputs,
    ];
}

/// Arguments of one transaction.
///
/// The default request is a full step: no inputs, clock advanced by one
/// step, configured outputs returned.
#[derive(Debug, Clone, Default)]
pub struct TransactionRequest {
    pub inputs: Option<ParameterSet>,
    /// Explicit target time; `None` steps the clock.
    pub timestamp: Option<NaiveDateTime>,
    /// Extra outputs, appended to the configured ones unless `overwrite`.
    pub outputs: Option<ParameterSet>,
    pub overwrite: bool,
    /// Restrict the transaction to a single phase.
    pub phase: Option<TransactionPhase>,
}

impl TransactionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn only(phase: TransactionPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Self::default()
        }
    }

    pub fn with_inputs(mut self, inputs: ParameterSet) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn at(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_outputs(mut self, outputs: ParameterSet, overwrite: bool) -> Self {
        self.outputs = Some(outputs);
        self.overwrite = overwrite;
        self
    }

    pub fn runs(&self, phase: TransactionPhase) -> bool {
        self.phase.map_or(true, |only| only == phase)
    }

    pub fn phases(&self) -> Vec<TransactionPhase> {
        TransactionPhase::ALL
            .into_iter()
            .filter(|phase| self.runs(*phase))
            .collect()
    }
}

/// Build the debug sink selected by a bus configuration.
///
/// File sinks default to `debug.log` inside the bus folder.
pub fn build_debug_sink(common: &CommonBusConfig) -> SharedDebugSink {
    match common.effective_debug() {
        DebugKind::None => debug::noop(),
        DebugKind::Console => debug::shared(ConsoleDebugSink::new()),
        DebugKind::File => {
            let file = common
                .debug_args
                .output_filename
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEBUG_FILE));
            let path = if file.is_absolute() {
                file
            } else {
                common.folder.join(file)
            };
            debug::shared(FileDebugSink::new(path, common.debug_args.print_output))
        }
    }
}

/// State every bus variant carries.
#[derive(Debug)]
pub struct BusCore {
    label: String,
    folder: PathBuf,
    time: TimeModel,
    outputs: ParameterSet,
    translator: Box<dyn Translator>,
    composite_node: String,
    debug: SharedDebugSink,
    debug_enabled: bool,
    started: bool,
}

impl BusCore {
    pub fn from_config(common: &CommonBusConfig) -> Result<Self> {
        let time = common
            .time_info
            .to_time_model()
            .map_err(|err| BusError::Config(err.into()))?;
        let label = common
            .folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| common.folder.display().to_string());
        Ok(Self {
            label,
            folder: common.folder.clone(),
            time,
            outputs: common.output_template(),
            translator: translator_for(common.io_translator, common.base_kv),
            composite_node: common.composite_node.clone(),
            debug: build_debug_sink(common),
            debug_enabled: common.effective_debug() != DebugKind::None,
            started: false,
        })
    }

    /// Short name used in logs, derived from the bus folder.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn time(&self) -> &TimeModel {
        &self.time
    }

    pub fn current_time(&self) -> NaiveDateTime {
        self.time.current()
    }

    pub fn is_finished(&self) -> bool {
        self.time.is_finished()
    }

    /// Configured output template.
    pub fn outputs(&self) -> &ParameterSet {
        &self.outputs
    }

    pub fn translator(&self) -> &dyn Translator {
        self.translator.as_ref()
    }

    pub fn debug_sink(&self) -> SharedDebugSink {
        self.debug.clone()
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_enabled
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn ensure_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(BusError::NotStarted {
                bus: self.label.clone(),
            })
        }
    }

    /// Open the debug sink and mark the bus running.
    pub fn begin(&mut self) {
        if let Err(err) = self.debug.lock().open() {
            warn!(bus = %self.label, error = %err, "unable to open debug sink");
        }
        self.trace(
            &format!(
                "Running {} with pid {}",
                self.folder.display(),
                std::process::id()
            ),
            "",
        );
        self.started = true;
    }

    /// Close the debug sink and mark the bus stopped.
    pub fn end(&mut self) {
        self.debug.lock().close();
        self.started = false;
    }

    pub fn trace(&self, message: &str, label: &str) {
        self.debug.lock().write(message, label);
    }

    /// Move the clock: to `ts` when given, otherwise one step.
    pub fn advance(&mut self, ts: Option<NaiveDateTime>) {
        match ts {
            Some(ts) => {
                if ts <= self.time.current() {
                    self.trace(
                        &format!(
                            "WARNING: provided time {} is not after current time {}",
                            format_timestamp(ts, None),
                            self.time
                        ),
                        &self.label,
                    );
                }
                self.time.set_current(ts);
            }
            None => {
                self.time.advance();
            }
        }
    }

    /// Translate caller inputs and expand composite parameters.
    pub fn prepare_inputs(&self, envelope: TransactionEnvelope) -> TransactionEnvelope {
        let translated = self.translator.translate_inputs(envelope);
        TransactionEnvelope {
            parameters: expand_composites(translated.parameters, &self.composite_node),
            timestamp: translated.timestamp,
        }
    }

    /// Configured outputs combined with caller supplied ones.
    pub fn effective_outputs(&self, extra: Option<&ParameterSet>, overwrite: bool) -> ParameterSet {
        self.outputs.merged(extra, overwrite)
    }

    /// Stamp outputs with the current time and translate them.
    pub fn finish_outputs(&self, received: ParameterSet) -> TransactionEnvelope {
        self.translator
            .translate_outputs(TransactionEnvelope::at(received, self.time.current()))
    }

    pub fn trace_params(&self, params: &ParameterSet, direction: &str) {
        let now = self.time.to_string();
        for param in params.iter() {
            self.trace(&format!("[{direction}]: {now}\t{param}"), &self.label);
        }
    }
}

impl std::fmt::Debug for dyn Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.type_name()).finish_non_exhaustive()
    }
}

/// Uniform transaction-oriented facade over one simulation endpoint.
#[async_trait]
pub trait Bus: Send {
    /// Configuration name of the variant, e.g. `GridlabBus`.
    fn type_name(&self) -> &'static str;

    fn core(&self) -> &BusCore;

    fn core_mut(&mut self) -> &mut BusCore;

    /// Bring the backend up. Failing to reach a live backend is not an
    /// error; the bus keeps running on zero outputs.
    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// Write already translated parameters straight to the backend.
    async fn send(&mut self, inputs: &ParameterSet) -> Result<()>;

    /// Ask the backend to run to `ts`.
    async fn run_to(&mut self, ts: NaiveDateTime) -> Result<()>;

    /// Wait until the backend reports it reached `ts`.
    async fn run_to_poll(&mut self, _ts: NaiveDateTime) -> Result<()> {
        Ok(())
    }

    /// Read `requested` back from the backend, untranslated.
    async fn recv(&mut self, requested: &ParameterSet) -> Result<ParameterSet>;

    /// Whether outputs come from a live backend rather than zero fill.
    fn is_connected(&self) -> bool {
        true
    }

    /// Whether callers may request outputs beyond the configured ones.
    fn accepts_extra_outputs(&self) -> bool {
        true
    }

    /// Point the bus at a different simulator executable.
    fn set_executable(&mut self, _path: &Path) {}

    /// Translate and expand inputs before they reach [`Bus::send`].
    fn prepare_inputs(&self, envelope: TransactionEnvelope) -> TransactionEnvelope {
        self.core().prepare_inputs(envelope)
    }

    /// Run a transaction, or the single phase the request names.
    async fn transaction(&mut self, request: TransactionRequest) -> Result<TransactionEnvelope> {
        drive_transaction(self, request).await
    }
}

/// The four-phase transaction shared by the single-backend variants.
///
/// The inputs phase moves the clock before calling [`Bus::send`], so the
/// backend sees inputs already stamped with the new time; a file bus records
/// them at that time too. Phases other than outputs produce an empty
/// parameter set.
pub async fn drive_transaction<B: Bus + ?Sized>(
    bus: &mut B,
    request: TransactionRequest,
) -> Result<TransactionEnvelope> {
    bus.core().ensure_started()?;
    let TransactionRequest {
        inputs,
        timestamp,
        outputs,
        overwrite,
        phase,
    } = request;
    let runs = |candidate: TransactionPhase| phase.map_or(true, |only| only == candidate);

    if runs(TransactionPhase::Inputs) {
        let envelope = match inputs {
            Some(parameters) => bus.prepare_inputs(TransactionEnvelope {
                parameters,
                timestamp,
            }),
            None => TransactionEnvelope {
                parameters: ParameterSet::new(),
                timestamp,
            },
        };
        bus.core_mut().advance(envelope.timestamp);
        bus.core().trace_params(&envelope.parameters, "SEND");
        bus.send(&envelope.parameters).await?;
    }

    let now = bus.core().current_time();
    if runs(TransactionPhase::RunTo) {
        bus.run_to(now).await?;
    }
    if runs(TransactionPhase::RunToPoll) {
        bus.run_to_poll(now).await?;
    }

    if runs(TransactionPhase::Outputs) {
        let requested = if bus.accepts_extra_outputs() {
            bus.core().effective_outputs(outputs.as_ref(), overwrite)
        } else {
            if outputs.is_some() {
                let rendered = now.to_string();
                let ctx = LogContext::new()
                    .with_bus(bus.core().label())
                    .with_phase("outputs")
                    .with_sim_time(&rendered);
                ems_debug!(
                    context = ctx,
                    "{} ignores additional outputs",
                    bus.type_name()
                );
            }
            bus.core().outputs().clone()
        };
        let received = bus.recv(&requested).await?;
        let envelope = bus.core().finish_outputs(received);
        bus.core().trace_params(&envelope.parameters, "RECV");
        return Ok(envelope);
    }

    Ok(TransactionEnvelope::at(ParameterSet::new(), now))
}

/// Read `params` from a running bus without advancing it.
pub async fn get_properties(bus: &mut dyn Bus, params: ParameterSet) -> Result<ParameterSet> {
    let envelope = bus
        .transaction(TransactionRequest::only(TransactionPhase::Outputs).with_outputs(params, true))
        .await?;
    Ok(envelope.parameters)
}
