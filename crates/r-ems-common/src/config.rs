//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed bus configuration records, loading and validation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use path_absolutize::Absolutize;
use r_ems_msg::{ActionKind, ParamId, ParamValue, Parameter, ParameterSet, ScanMode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, DurationSecondsWithFrac};
use thiserror::Error;
use tracing::debug;

use crate::logging::LogFormat;
use crate::time::{format_timestamp, parse_timestamp_strict, TimeError, TimeModel};

/// File name looked up when a bus is loaded from a directory.
pub const DEFAULT_BUS_FILE: &str = "bus.json";

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {origin} at '{field}': {message}")]
    Parse {
        origin: String,
        field: String,
        message: String,
    },
    #[error("invalid bus config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Time(#[from] TimeError),
}

fn default_folder() -> PathBuf {
    PathBuf::from(".")
}

fn default_base_kv() -> f64 {
    138.0
}

fn default_composite_node() -> String {
    "network_node".to_owned()
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_poll() -> Duration {
    Duration::from_millis(50)
}

fn default_executable() -> PathBuf {
    PathBuf::from("gridlabd")
}

fn default_launch() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retries() -> u32 {
    10
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_check_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_loop_pause() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_spawn_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_port_min() -> u16 {
    25_000
}

fn default_port_max() -> u16 {
    60_000
}

fn default_save_input_file() -> PathBuf {
    PathBuf::from("bus_inputs.csv")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Serde adapter for timestamps in `YYYY-MM-DD HH:MM:SS` form.
pub mod timestamp {
    use super::*;

    pub fn serialize<S: Serializer>(
        ts: &NaiveDateTime,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(*ts, None))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp_strict(&raw).map_err(serde::de::Error::custom)
    }
}

/// `-1` (or absence) selects an automatic port.
fn deserialize_port<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u16>, D::Error> {
    let raw = Option::<i64>::deserialize(deserializer)?;
    match raw {
        None | Some(-1) => Ok(None),
        Some(port) => u16::try_from(port)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("port {port} out of range"))),
    }
}

/// Debug sink flavour selected by `debug_type`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DebugKind {
    #[serde(rename = "dFile")]
    File,
    #[serde(rename = "dConsole")]
    Console,
    #[default]
    #[serde(rename = "dNone")]
    None,
}

/// Constructor arguments for the debug sink.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DebugArgs {
    #[serde(default)]
    pub output_filename: Option<PathBuf>,
    #[serde(default)]
    pub print_output: bool,
}

/// Translator applied at the bus boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TranslatorKind {
    #[serde(rename = "BusTranslator")]
    Identity,
    #[serde(rename = "AggregatorBusTranslator")]
    Aggregator,
}

/// One requested output parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    /// Fixed value served by constant buses.
    #[serde(default)]
    pub value: Option<ParamValue>,
    /// Backing series for file-replay buses.
    #[serde(default)]
    pub filename: Option<PathBuf>,
}

impl OutputSpec {
    pub fn id(&self) -> ParamId {
        ParamId::new(self.name.clone(), self.param.as_deref())
    }

    /// Build the parameter template this spec describes.
    pub fn to_parameter(&self) -> Parameter {
        let mut param = Parameter::new(
            self.name.clone(),
            self.param.as_deref(),
            self.value.clone().unwrap_or_default(),
        );
        param.unit = self.unit.clone();
        param.source_file = self.filename.clone();
        param
    }
}

/// Simulated time window of a bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeWindowConfig {
    #[serde(with = "timestamp")]
    pub start: NaiveDateTime,
    #[serde(with = "timestamp")]
    pub end: NaiveDateTime,
    #[serde(default)]
    pub timezone: Option<String>,
    /// Step size in seconds.
    pub delta: f64,
}

impl TimeWindowConfig {
    pub fn to_time_model(&self) -> std::result::Result<TimeModel, TimeError> {
        TimeModel::new(self.start, self.end, self.delta, self.timezone.clone())
    }
}

/// Keys shared by every bus variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommonBusConfig {
    #[serde(default = "default_folder")]
    pub folder: PathBuf,
    #[serde(default)]
    pub output: Vec<OutputSpec>,
    pub time_info: TimeWindowConfig,
    #[serde(default)]
    pub io_translator: Option<TranslatorKind>,
    #[serde(default = "default_base_kv")]
    pub base_kv: f64,
    /// Object receiving expanded phase voltages.
    #[serde(default = "default_composite_node")]
    pub composite_node: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub debug_type: DebugKind,
    #[serde(default)]
    pub debug_args: DebugArgs,
}

impl CommonBusConfig {
    /// Requested outputs as a parameter template.
    pub fn output_template(&self) -> ParameterSet {
        self.output.iter().map(OutputSpec::to_parameter).collect()
    }

    /// Debug sink kind after applying the `debug` master switch.
    pub fn effective_debug(&self) -> DebugKind {
        if self.debug {
            self.debug_type
        } else {
            DebugKind::None
        }
    }
}

/// Subprocess start-up tuning for the simulator channel.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartupConfig {
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_startup_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub timeout: Duration,
    #[serde(default = "default_check_delay")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub check_delay: Duration,
    #[serde(default = "default_loop_pause")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub loop_pause: Duration,
    #[serde(default = "default_shutdown_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub shutdown_timeout: Duration,
    /// Upper bound of the random pause after a failed launch.
    #[serde(default = "default_spawn_backoff")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub spawn_backoff: Duration,
    /// Range random ports are drawn from, `port_min..port_max`.
    #[serde(default = "default_port_min")]
    pub port_min: u16,
    #[serde(default = "default_port_max")]
    pub port_max: u16,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            timeout: default_startup_timeout(),
            check_delay: default_check_delay(),
            loop_pause: default_loop_pause(),
            shutdown_timeout: default_shutdown_timeout(),
            spawn_backoff: default_spawn_backoff(),
            port_min: default_port_min(),
            port_max: default_port_max(),
        }
    }
}

/// Bus driven through a live simulator subprocess.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulatorBusConfig {
    /// Model file handed to the simulator.
    pub filename: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<u16>,
    /// Extra command line arguments; later keys override the defaults.
    #[serde(default, alias = "extra_args")]
    pub gld_args: IndexMap<String, Option<String>>,
    #[serde(default = "default_poll")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub poll: Duration,
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// When false the bus attaches to an already running simulator.
    #[serde(default = "default_launch")]
    pub launch: bool,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub request_timeout: Duration,
    #[serde(default)]
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub poll_timeout: Option<Duration>,
}

/// Bus replaying recorded series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileBusConfig {
    #[serde(default)]
    pub save_input: bool,
    #[serde(default = "default_save_input_file")]
    pub save_input_file: PathBuf,
}

/// Bus returning fixed values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConstantBusConfig {}

/// Child of a multi-node bus: inline or a reference to another file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum NodeSpec {
    File {
        #[serde(rename = "__bus_file")]
        bus_file: PathBuf,
    },
    Inline(Box<BusConfig>),
}

/// Operand of an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectorSpec {
    pub name: String,
    #[serde(default)]
    pub param: Option<String>,
}

/// Combinator declared on a multi-node bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionSpec {
    pub name: String,
    pub action: ActionKind,
    #[serde(rename = "action-list")]
    pub selectors: Vec<SelectorSpec>,
    #[serde(default)]
    pub scan: ScanMode,
}

impl ActionSpec {
    pub fn selector_ids(&self) -> Vec<ParamId> {
        self.selectors
            .iter()
            .map(|s| ParamId::new(s.name.clone(), s.param.as_deref()))
            .collect()
    }
}

/// Aggregate of child buses folded through actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiNodeBusConfig {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    /// Drive children one after another instead of phase by phase.
    #[serde(default)]
    pub serial: bool,
}

/// Variant-specific keys, selected by `bus_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "bus_type")]
pub enum BusVariantConfig {
    #[serde(rename = "GridlabBus", alias = "SimulatorBus")]
    Simulator(SimulatorBusConfig),
    #[serde(rename = "FileBus")]
    File(FileBusConfig),
    #[serde(rename = "ConstantBus")]
    Constant(ConstantBusConfig),
    #[serde(rename = "MultiNodeBus")]
    MultiNode(MultiNodeBusConfig),
}

impl BusVariantConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            BusVariantConfig::Simulator(_) => "GridlabBus",
            BusVariantConfig::File(_) => "FileBus",
            BusVariantConfig::Constant(_) => "ConstantBus",
            BusVariantConfig::MultiNode(_) => "MultiNodeBus",
        }
    }
}

/// Complete, validated configuration of one bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusConfig {
    #[serde(flatten)]
    pub common: CommonBusConfig,
    #[serde(flatten)]
    pub variant: BusVariantConfig,
}

/// A [`BusConfig`] together with the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedBusConfig {
    pub config: BusConfig,
    pub source: PathBuf,
}

impl BusConfig {
    /// Load a bus file, or `bus.json` inside a directory, resolving relative
    /// paths against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<LoadedBusConfig> {
        let mut source = path.as_ref().to_path_buf();
        if source.is_dir() {
            source.push(DEFAULT_BUS_FILE);
        }
        debug!(config_path = %source.display(), "loading bus configuration");
        let contents = fs::read_to_string(&source).map_err(|source_err| ConfigError::Io {
            path: source.clone(),
            source: source_err,
        })?;
        let mut config = Self::parse(&contents, &source.display().to_string())?;
        let source = source
            .absolutize()
            .map(|resolved| resolved.into_owned())
            .map_err(|source_err| ConfigError::Io {
                path: source.clone(),
                source: source_err,
            })?;
        let base = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(default_folder);
        config.resolve_paths(&base)?;
        config.validate()?;
        Ok(LoadedBusConfig { config, source })
    }

    fn parse(contents: &str, origin: &str) -> Result<Self> {
        let mut de = serde_json::Deserializer::from_str(contents);
        serde_path_to_error::deserialize(&mut de).map_err(|err| ConfigError::Parse {
            origin: origin.to_owned(),
            field: err.path().to_string(),
            message: err.inner().to_string(),
        })
    }

    /// Make `folder` absolute against `base`, then model, series and
    /// inline-node paths absolute against that folder.
    pub fn resolve_paths(&mut self, base: &Path) -> Result<()> {
        let folder = absolutize(&self.common.folder, base)?;
        for output in &mut self.common.output {
            if let Some(file) = &output.filename {
                output.filename = Some(absolutize(file, &folder)?);
            }
        }
        match &mut self.variant {
            BusVariantConfig::Simulator(sim) => {
                sim.filename = absolutize(&sim.filename, &folder)?;
            }
            BusVariantConfig::File(file) => {
                file.save_input_file = absolutize(&file.save_input_file, &folder)?;
            }
            BusVariantConfig::Constant(_) => {}
            BusVariantConfig::MultiNode(multi) => {
                for node in &mut multi.nodes {
                    match node {
                        NodeSpec::File { bus_file } => *bus_file = absolutize(bus_file, &folder)?,
                        NodeSpec::Inline(child) => child.resolve_paths(&folder)?,
                    }
                }
            }
        }
        self.common.folder = folder;
        Ok(())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.common.time_info.to_time_model()?;
        if !self.common.base_kv.is_finite() || self.common.base_kv <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "base_kv must be positive, got {}",
                self.common.base_kv
            )));
        }
        match &self.variant {
            BusVariantConfig::Simulator(sim) => {
                if sim.filename.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "GridlabBus requires a model filename".into(),
                    ));
                }
                if sim.poll.is_zero() {
                    return Err(ConfigError::Invalid("poll interval must be positive".into()));
                }
                if sim.startup.port_min >= sim.startup.port_max {
                    return Err(ConfigError::Invalid(format!(
                        "empty port range {}..{}",
                        sim.startup.port_min, sim.startup.port_max
                    )));
                }
            }
            BusVariantConfig::File(_) => {
                if let Some(output) = self.common.output.iter().find(|o| o.filename.is_none()) {
                    return Err(ConfigError::Invalid(format!(
                        "FileBus output {} has no filename",
                        output.id()
                    )));
                }
            }
            BusVariantConfig::Constant(_) => {}
            BusVariantConfig::MultiNode(multi) => {
                if multi.nodes.is_empty() {
                    return Err(ConfigError::Invalid(
                        "MultiNodeBus requires at least one node".into(),
                    ));
                }
                for node in &multi.nodes {
                    if let NodeSpec::Inline(child) = node {
                        child.validate()?;
                    }
                }
                if let Some(action) = multi.actions.iter().find(|a| a.selectors.is_empty()) {
                    return Err(ConfigError::Invalid(format!(
                        "action '{}' has an empty action-list",
                        action.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for BusConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self> {
        let config = Self::parse(content, "bus configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn absolutize(path: &Path, base: &Path) -> Result<PathBuf> {
    path.absolutize_from(base)
        .map(|resolved| resolved.into_owned())
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Destination and format of the tracing subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
