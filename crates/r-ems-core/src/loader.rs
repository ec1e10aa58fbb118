//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Builds buses from configuration with an optional fallback factory."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Bus construction.
//!
//! [`build_bus`] dispatches over the closed set of variants, recursing into
//! multi-node children. [`BusLoader`] adds file loading and the host
//! supplied fallback used when a configuration cannot be read.

use std::fmt;
use std::path::Path;

use r_ems_common::config::{BusConfig, BusVariantConfig, NodeSpec};
use r_ems_logging::{log_bus_event, BusEventOutcome, LogContext};
use tracing::{debug, info};

use crate::bus::{Bus, ConstantBus, FileBus, MultiNodeBus, SimulatorBus};
use crate::errors::{BusError, Result};

/// Produces the bus used when loading fails.
pub type FallbackFactory = Box<dyn Fn() -> anyhow::Result<Box<dyn Bus>> + Send + Sync>;

/// Construct an unstarted bus for a validated configuration.
pub fn build_bus(config: BusConfig) -> Result<Box<dyn Bus>> {
    let BusConfig { common, variant } = config;
    debug!(bus_type = variant.type_name(), folder = %common.folder.display(), "building bus");
    let bus: Box<dyn Bus> = match variant {
        BusVariantConfig::Simulator(sim) => Box::new(SimulatorBus::new(&common, sim)?),
        BusVariantConfig::File(file) => Box::new(FileBus::new(&common, file)?),
        BusVariantConfig::Constant(constant) => Box::new(ConstantBus::new(&common, constant)?),
        BusVariantConfig::MultiNode(multi) => {
            let mut children = Vec::with_capacity(multi.nodes.len());
            for node in &multi.nodes {
                let child = match node {
                    NodeSpec::File { bus_file } => BusConfig::load(bus_file)?.config,
                    NodeSpec::Inline(child) => child.as_ref().clone(),
                };
                children.push(build_bus(child)?);
            }
            Box::new(MultiNodeBus::new(&common, &multi, children)?)
        }
    };
    Ok(bus)
}

/// Loads buses from configuration files.
#[derive(Default)]
pub struct BusLoader {
    fallback: Option<FallbackFactory>,
}

impl fmt::Debug for BusLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusLoader")
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl BusLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `factory` whenever a configuration is missing or invalid.
    pub fn with_fallback<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Bus>> + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(factory));
        self
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Build the bus described by `path`, a file or a directory holding
    /// `bus.json`. Without a fallback, configuration errors are returned.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Box<dyn Bus>> {
        let path = path.as_ref();
        match BusConfig::load(path) {
            Ok(loaded) => {
                info!(
                    config_path = %loaded.source.display(),
                    bus_type = loaded.config.variant.type_name(),
                    "bus configuration loaded"
                );
                build_bus(loaded.config)
            }
            Err(err) => {
                let Some(factory) = &self.fallback else {
                    return Err(err.into());
                };
                let ctx = LogContext::new().with_phase("load");
                let message = format!("{}: {err}; using fallback bus", path.display());
                log_bus_event(Some(&ctx), "bus.load", &message, BusEventOutcome::Degraded);
                factory().map_err(BusError::Fallback)
            }
        }
    }

    /// Load and start a bus.
    pub async fn open(&self, path: impl AsRef<Path>) -> Result<Box<dyn Bus>> {
        let mut bus = self.load(path)?;
        bus.start().await?;
        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::TransactionRequest;
    use r_ems_common::config::ConfigError;
    use r_ems_msg::ParamValue;
    use std::fs;
    use std::str::FromStr;

    const CHILD: &str = r#"{
        "bus_type": "ConstantBus",
        "output": [{"name": "node_2", "param": "measured_current_A", "value": 12}],
        "time_info": {"start": "2020-06-01 00:00:00", "end": "2020-06-01 00:01:00", "delta": 30}
    }"#;

    const PARENT: &str = r#"{
        "bus_type": "MultiNodeBus",
        "time_info": {"start": "2020-06-01 00:00:00", "end": "2020-06-01 00:01:00", "delta": 30},
        "nodes": [
            {"bus_type": "ConstantBus", "output": [{"name": "node_1", "param": "measured_current_A", "value": 10}],
             "time_info": {"start": "2020-06-01 00:00:00", "end": "2020-06-01 00:01:00", "delta": 30}},
            {"__bus_file": "child"}
        ],
        "actions": [{"name": "total", "action": "sum",
                     "action-list": [{"name": "node_1", "param": "measured_current_A"},
                                     {"name": "node_2", "param": "measured_current_A"}]}]
    }"#;

    #[tokio::test]
    async fn loads_nested_configuration_from_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("child")).unwrap();
        fs::write(dir.path().join("child").join("bus.json"), CHILD).unwrap();
        fs::write(dir.path().join("bus.json"), PARENT).unwrap();

        let mut bus = BusLoader::new().open(dir.path()).await.unwrap();
        assert_eq!(bus.type_name(), "MultiNodeBus");
        let out = bus.transaction(TransactionRequest::new()).await.unwrap();
        assert_eq!(out.parameters.get("total", None).unwrap().value, ParamValue::Int(22));
        bus.stop().await.unwrap();
    }

    #[test]
    fn missing_configuration_without_fallback_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = BusLoader::new().load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, BusError::Config(ConfigError::Io { .. })));
    }

    #[test]
    fn fallback_replaces_missing_or_invalid_configuration() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{\"bus_type\": \"ConstantBus\"}").unwrap();
        let loader = BusLoader::new().with_fallback(|| build_bus(BusConfig::from_str(CHILD)?).map_err(Into::into));
        assert!(loader.has_fallback());

        let bus = loader.load(dir.path().join("absent.json")).unwrap();
        assert_eq!(bus.type_name(), "ConstantBus");
        let bus = loader.load(dir.path().join("broken.json")).unwrap();
        assert_eq!(bus.type_name(), "ConstantBus");
    }

    #[test]
    fn failing_fallback_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let loader = BusLoader::new().with_fallback(|| Err(anyhow::anyhow!("no default bus")));
        let err = loader.load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, BusError::Fallback(_)));
    }
}
