//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bus backed by a live GridLAB-D simulator."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use r_ems_common::config::{CommonBusConfig, SimulatorBusConfig};
use r_ems_logging::{ems_debug, ems_warn, log_bus_event, BusEventOutcome, LogContext};
use r_ems_msg::ParameterSet;
use r_ems_net::ControlChannel;
use tracing::warn;

use super::{Bus, BusCore};
use crate::errors::Result;

/// Drives a simulator over its HTTP control server.
///
/// A simulator that never becomes ready leaves the bus running
/// disconnected: sends are dropped, the clock is not steered and every
/// read returns zeros.
#[derive(Debug)]
pub struct SimulatorBus {
    core: BusCore,
    config: SimulatorBusConfig,
    channel: Option<ControlChannel>,
    executable: Option<PathBuf>,
    warned_disconnected: bool,
}

impl SimulatorBus {
    pub fn new(common: &CommonBusConfig, config: SimulatorBusConfig) -> Result<Self> {
        Ok(Self {
            core: BusCore::from_config(common)?,
            config,
            channel: None,
            executable: None,
            warned_disconnected: false,
        })
    }

    pub fn config(&self) -> &SimulatorBusConfig {
        &self.config
    }

    /// Port of the live session, if any.
    pub fn port(&self) -> Option<u16> {
        self.channel.as_ref().and_then(ControlChannel::port)
    }

    fn warn_disconnected(&mut self) {
        if self.warned_disconnected {
            return;
        }
        self.warned_disconnected = true;
        let ctx = LogContext::new().with_bus(self.core.label());
        ems_warn!(context = ctx, "simulator not connected; outputs are zero");
    }
}

#[async_trait]
impl Bus for SimulatorBus {
    fn type_name(&self) -> &'static str {
        "GridlabBus"
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
        let mut channel = ControlChannel::new(self.config.clone(), self.core.folder())?
            .with_debug(self.core.debug_sink())
            .with_quiet(!self.core.debug_enabled());
        if let Some(executable) = &self.executable {
            channel.set_executable(executable.clone());
        }
        self.core.begin();

        let time = self.core.time();
        let ready = channel.open(time.start(), time.timezone()).await;
        let ctx = LogContext::new().with_bus(self.core.label()).with_phase("start");
        if ready {
            let message = format!("simulator ready on port {}", channel.port().unwrap_or_default());
            log_bus_event(Some(&ctx), "bus.start", &message, BusEventOutcome::Success);
        } else {
            log_bus_event(
                Some(&ctx),
                "bus.start",
                "simulator never became ready; continuing disconnected",
                BusEventOutcome::Degraded,
            );
        }
        self.warned_disconnected = false;
        self.channel = Some(channel);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.core.is_started() {
            warn!(bus = %self.core.label(), "bus already stopped");
            return Ok(());
        }
        if let Some(mut channel) = self.channel.take() {
            channel.shutdown(true).await;
        }
        self.core.end();
        let ctx = LogContext::new().with_bus(self.core.label()).with_phase("stop");
        log_bus_event(Some(&ctx), "bus.stop", "simulator released", BusEventOutcome::Success);
        Ok(())
    }

    async fn send(&mut self, inputs: &ParameterSet) -> Result<()> {
        match self.channel.as_mut() {
            Some(channel) if channel.is_connected() => channel.send(inputs).await,
            _ if inputs.is_empty() => {}
            _ => self.warn_disconnected(),
        }
        Ok(())
    }

    async fn run_to(&mut self, ts: NaiveDateTime) -> Result<()> {
        let timezone = self.core.time().timezone().map(str::to_owned);
        if let Some(channel) = self.channel.as_mut() {
            channel.run_to_time(ts, timezone.as_deref()).await;
        }
        Ok(())
    }

    async fn run_to_poll(&mut self, ts: NaiveDateTime) -> Result<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };
        if !channel.is_connected() {
            return Ok(());
        }
        if !channel.poll_until_reached(ts).await {
            let rendered = ts.to_string();
            let ctx = LogContext::new()
                .with_bus(self.core.label())
                .with_phase("run_to_poll")
                .with_sim_time(&rendered);
            ems_debug!(context = ctx, "simulator did not confirm target time");
        }
        Ok(())
    }

    async fn recv(&mut self, requested: &ParameterSet) -> Result<ParameterSet> {
        let connected = self.is_connected();
        match self.channel.as_mut() {
            Some(channel) if connected => Ok(channel.recv(requested).await),
            _ => {
                self.warn_disconnected();
                Ok(requested.zeroed())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(ControlChannel::is_connected)
    }

    fn set_executable(&mut self, path: &Path) {
        if let Some(channel) = self.channel.as_mut() {
            channel.set_executable(path);
        }
        self.executable = Some(path.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{get_properties, TransactionPhase, TransactionRequest};
    use r_ems_common::config::{BusConfig, BusVariantConfig};
    use r_ems_common::time::parse_timestamp;
    use r_ems_msg::{Complex64, ParamValue, Parameter};
    use r_ems_net::fake::FakeSimulator;
    use serde_json::json;
    use std::str::FromStr;

    fn bus_for(port: u16, folder: &Path) -> SimulatorBus {
        let raw = json!({
            "bus_type": "GridlabBus",
            "folder": folder,
            "filename": "model.glm",
            "host": "127.0.0.1",
            "port": port,
            "launch": false,
            "poll": 0.01,
            "poll_timeout": 0.3,
            "startup": {"timeout": 0.4, "loop_pause": 0.02, "shutdown_timeout": 0.1},
            "output": [{"name": "network_node", "param": "measured_power", "unit": "VA"}],
            "time_info": {"start": "2020-06-01 00:00:00", "end": "2020-06-01 00:01:00", "delta": 30}
        })
        .to_string();
        let config = BusConfig::from_str(&raw).unwrap();
        let BusVariantConfig::Simulator(sim) = config.variant else {
            panic!("expected simulator variant");
        };
        SimulatorBus::new(&config.common, sim).unwrap()
    }

    #[tokio::test]
    async fn transaction_pushes_inputs_steers_clock_and_reads_outputs() {
        let fake = FakeSimulator::spawn().await.unwrap();
        let start = parse_timestamp("2020-06-01 00:00:00").unwrap();
        fake.set_clock(start, None);
        fake.set_property("network_node", Some("measured_power"), "+1500-250j VA");
        let dir = tempfile::tempdir().unwrap();
        let mut bus = bus_for(fake.port(), dir.path());

        bus.start().await.unwrap();
        assert!(bus.is_connected());

        let mut inputs = ParameterSet::new();
        inputs.add(Parameter::new("load_1", Some("constant_power_A"), 1000.0));
        let out = bus
            .transaction(TransactionRequest::new().with_inputs(inputs))
            .await
            .unwrap();

        let next = parse_timestamp("2020-06-01 00:00:30").unwrap();
        assert_eq!(out.timestamp, Some(next));
        assert_eq!(fake.clock(), Some(next));
        assert_eq!(fake.property("load_1", Some("constant_power_A")).as_deref(), Some("1000"));
        let power = out.parameters.get("network_node", Some("measured_power")).unwrap();
        assert_eq!(power.value, ParamValue::Complex(Complex64::new(1500.0, -250.0)));

        bus.stop().await.unwrap();
        assert!(fake.requests().contains(&"/control/resume".to_owned()));
        fake.shutdown().await;
    }

    #[tokio::test]
    async fn single_phase_requests_only_touch_that_phase() {
        let fake = FakeSimulator::spawn().await.unwrap();
        let start = parse_timestamp("2020-06-01 00:00:00").unwrap();
        fake.set_clock(start, None);
        fake.set_property("house", Some("air_temperature"), "72.5 degF");
        let dir = tempfile::tempdir().unwrap();
        let mut bus = bus_for(fake.port(), dir.path());
        bus.start().await.unwrap();

        let before = fake.requests().len();
        bus.transaction(TransactionRequest::only(TransactionPhase::Inputs))
            .await
            .unwrap();
        assert_eq!(bus.core().current_time(), parse_timestamp("2020-06-01 00:00:30").unwrap());
        assert_eq!(fake.requests().len(), before);
        assert_eq!(fake.clock(), Some(start));

        let mut extra = ParameterSet::new();
        extra.add(Parameter::request("house", Some("air_temperature")));
        let props = get_properties(&mut bus, extra).await.unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(
            props.get("house", Some("air_temperature")).unwrap().value,
            ParamValue::Complex(Complex64::new(72.5, 0.0))
        );

        bus.stop().await.unwrap();
        fake.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_simulator_yields_zero_outputs() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let dir = tempfile::tempdir().unwrap();
        let mut bus = bus_for(port, dir.path());

        bus.start().await.unwrap();
        assert!(!bus.is_connected());
        let out = bus.transaction(TransactionRequest::new()).await.unwrap();
        assert_eq!(
            out.parameters.get("network_node", Some("measured_power")).unwrap().value,
            ParamValue::zero()
        );
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn transaction_before_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut bus = bus_for(1, dir.path());
        let err = bus.transaction(TransactionRequest::new()).await.unwrap_err();
        assert!(matches!(err, crate::errors::BusError::NotStarted { .. }));
    }
}
