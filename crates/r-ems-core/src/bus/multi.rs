//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Aggregate bus fanning transactions out to child buses."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Multi-node composition.
//!
//! A [`MultiNodeBus`] drives its children phase by phase: every child runs
//! its inputs phase, then every child runs to the new time, then every child
//! confirms it, then every child reports outputs. The outputs are collected
//! in declaration order behind the staged inputs and folded through the
//! configured actions. Only the action results leave the bus.
//!
//! With `serial` set, children instead run one complete transaction each,
//! one after another. Both paths feed the actions the same ordered list.

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use r_ems_common::config::{ActionSpec, CommonBusConfig, MultiNodeBusConfig};
use r_ems_logging::{ems_debug, ems_warn, log_bus_event, BusEventOutcome, LogContext};
use r_ems_msg::{ActionCombinator, ParameterSet, TransactionEnvelope};
use tracing::warn;

use super::{Bus, BusCore, TransactionPhase, TransactionRequest};
use crate::errors::Result;

pub struct MultiNodeBus {
    core: BusCore,
    children: Vec<Box<dyn Bus>>,
    actions: Vec<ActionCombinator>,
    serial: bool,
    staged: ParameterSet,
}

impl std::fmt::Debug for MultiNodeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiNodeBus")
            .field("label", &self.core.label())
            .field("children", &self.children.len())
            .field("actions", &self.actions)
            .field("serial", &self.serial)
            .finish()
    }
}

fn combinator(spec: &ActionSpec) -> ActionCombinator {
    ActionCombinator::new(spec.name.clone(), spec.action, spec.selector_ids()).with_scan(spec.scan)
}

impl MultiNodeBus {
    /// Build an aggregate over already constructed children.
    pub fn new(
        common: &CommonBusConfig,
        config: &MultiNodeBusConfig,
        children: Vec<Box<dyn Bus>>,
    ) -> Result<Self> {
        let core = BusCore::from_config(common)?;
        if config.actions.is_empty() {
            let ctx = LogContext::new().with_bus(core.label());
            ems_warn!(context = ctx, "multi-node bus has no actions; outputs will be empty");
        }
        Ok(Self {
            core,
            children,
            actions: config.actions.iter().map(combinator).collect(),
            serial: config.serial,
            staged: ParameterSet::new(),
        })
    }

    pub fn children(&self) -> &[Box<dyn Bus>] {
        &self.children
    }

    pub fn is_serial(&self) -> bool {
        self.serial
    }

    /// Inputs staged by the latest inputs phase, before any child saw them.
    pub fn staged_inputs(&self) -> &ParameterSet {
        &self.staged
    }

    /// Run every action over `[staged, child outputs.., results]`, each
    /// result landing in the trailing set so later actions can reference it.
    fn fold_actions(&self, mut sets: Vec<ParameterSet>) -> Result<ParameterSet> {
        sets.push(ParameterSet::new());
        for action in &self.actions {
            let output = action.execute(&sets)?;
            if let Some(results) = sets.last_mut() {
                results.add(output);
            }
        }
        Ok(sets.pop().unwrap_or_default())
    }

    fn stage_inputs(&mut self, inputs: Option<ParameterSet>, timestamp: Option<NaiveDateTime>) {
        let envelope = self.core.translator().translate_inputs(TransactionEnvelope {
            parameters: inputs.unwrap_or_default(),
            timestamp,
        });
        self.core.advance(envelope.timestamp);
        self.core.trace_params(&envelope.parameters, "SEND");
        self.staged = envelope.parameters;
    }

    /// Request for one child: the configured outputs of this bus, combined
    /// with the caller's extras, are asked of every child alongside its own.
    fn child_request(
        &self,
        phase: Option<TransactionPhase>,
        outputs: Option<&ParameterSet>,
        overwrite: bool,
    ) -> TransactionRequest {
        let request = match phase {
            Some(phase) => TransactionRequest::only(phase),
            None => TransactionRequest::new(),
        };
        let wanted = self.core.effective_outputs(outputs, overwrite);
        if wanted.is_empty() {
            request
        } else {
            request.with_outputs(wanted, overwrite)
        }
    }

    async fn fan_out(&mut self, phase: TransactionPhase) -> Result<()> {
        let now = self.core.current_time();
        for (index, child) in self.children.iter_mut().enumerate() {
            let request = match phase {
                TransactionPhase::Inputs => TransactionRequest::only(phase)
                    .with_inputs(self.staged.clone())
                    .at(now),
                _ => TransactionRequest::only(phase),
            };
            let rendered = now.to_string();
            let phase_name = phase.to_string();
            let ctx = LogContext::new()
                .with_bus(self.core.label())
                .with_phase(&phase_name)
                .with_sim_time(&rendered)
                .with_node(index);
            ems_debug!(context = ctx, "driving {}", child.core().label());
            child.transaction(request).await?;
        }
        Ok(())
    }

    async fn collect_outputs(
        &mut self,
        outputs: Option<&ParameterSet>,
        overwrite: bool,
    ) -> Result<Vec<ParameterSet>> {
        let request = self.child_request(Some(TransactionPhase::Outputs), outputs, overwrite);
        let mut sets = Vec::with_capacity(self.children.len() + 1);
        sets.push(self.staged.clone());
        for child in self.children.iter_mut() {
            sets.push(child.transaction(request.clone()).await?.parameters);
        }
        Ok(sets)
    }

    async fn serial_transaction(
        &mut self,
        outputs: Option<&ParameterSet>,
        overwrite: bool,
    ) -> Result<Vec<ParameterSet>> {
        let request = self
            .child_request(None, outputs, overwrite)
            .with_inputs(self.staged.clone())
            .at(self.core.current_time());
        let mut sets = Vec::with_capacity(self.children.len() + 1);
        sets.push(self.staged.clone());
        for child in self.children.iter_mut() {
            sets.push(child.transaction(request.clone()).await?.parameters);
        }
        Ok(sets)
    }

    fn finish(&self, sets: Vec<ParameterSet>) -> Result<TransactionEnvelope> {
        let folded = self.fold_actions(sets)?;
        let envelope = self.core.finish_outputs(folded);
        self.core.trace_params(&envelope.parameters, "RECV");
        Ok(envelope)
    }
}

#[async_trait]
impl Bus for MultiNodeBus {
    fn type_name(&self) -> &'static str {
        "MultiNodeBus"
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
        for child in self.children.iter_mut() {
            child.start().await?;
        }
        self.core.begin();
        let ctx = LogContext::new().with_bus(self.core.label()).with_phase("start");
        let message = format!("{} children started", self.children.len());
        log_bus_event(Some(&ctx), "bus.start", &message, BusEventOutcome::Success);
        Ok(())
    }

    /// Stops every child even when one of them fails; the first failure is
    /// returned.
    async fn stop(&mut self) -> Result<()> {
        let mut first_error = None;
        for child in self.children.iter_mut() {
            if let Err(err) = child.stop().await {
                warn!(child = %child.core().label(), error = %err, "child failed to stop");
                first_error.get_or_insert(err);
            }
        }
        self.core.end();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn send(&mut self, inputs: &ParameterSet) -> Result<()> {
        for child in self.children.iter_mut() {
            child.send(inputs).await?;
        }
        Ok(())
    }

    async fn run_to(&mut self, ts: NaiveDateTime) -> Result<()> {
        for child in self.children.iter_mut() {
            child.run_to(ts).await?;
        }
        Ok(())
    }

    async fn run_to_poll(&mut self, ts: NaiveDateTime) -> Result<()> {
        for child in self.children.iter_mut() {
            child.run_to_poll(ts).await?;
        }
        Ok(())
    }

    async fn recv(&mut self, requested: &ParameterSet) -> Result<ParameterSet> {
        let mut sets = Vec::with_capacity(self.children.len() + 1);
        sets.push(self.staged.clone());
        for child in self.children.iter_mut() {
            let wanted = if child.accepts_extra_outputs() {
                child.core().effective_outputs(Some(requested), false)
            } else {
                child.core().outputs().clone()
            };
            sets.push(child.recv(&wanted).await?);
        }
        self.fold_actions(sets)
    }

    fn is_connected(&self) -> bool {
        self.children.iter().all(|child| child.is_connected())
    }

    fn set_executable(&mut self, path: &Path) {
        for child in self.children.iter_mut() {
            child.set_executable(path);
        }
    }

    async fn transaction(&mut self, request: TransactionRequest) -> Result<TransactionEnvelope> {
        self.core.ensure_started()?;
        let TransactionRequest {
            inputs,
            timestamp,
            outputs,
            overwrite,
            phase,
        } = request;

        if self.serial && phase.is_none() {
            self.stage_inputs(inputs, timestamp);
            let sets = self.serial_transaction(outputs.as_ref(), overwrite).await?;
            return self.finish(sets);
        }

        let runs = |candidate: TransactionPhase| phase.map_or(true, |only| only == candidate);
        if runs(TransactionPhase::Inputs) {
            self.stage_inputs(inputs, timestamp);
            self.fan_out(TransactionPhase::Inputs).await?;
        }
        if runs(TransactionPhase::RunTo) {
            self.fan_out(TransactionPhase::RunTo).await?;
        }
        if runs(TransactionPhase::RunToPoll) {
            self.fan_out(TransactionPhase::RunToPoll).await?;
        }
        if runs(TransactionPhase::Outputs) {
            let sets = self.collect_outputs(outputs.as_ref(), overwrite).await?;
            return self.finish(sets);
        }
        Ok(TransactionEnvelope::at(
            ParameterSet::new(),
            self.core.current_time(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ConstantBus;
    use crate::errors::BusError;
    use r_ems_common::config::{BusConfig, BusVariantConfig};
    use r_ems_msg::{ArithmeticError, ParamValue, Parameter};
    use serde_json::json;
    use std::str::FromStr;

    const WINDOW: &str = r#"{"start": "2020-06-01 00:00:00", "end": "2020-06-01 00:02:00", "delta": 60}"#;

    fn constant(object: &str, value: f64) -> Box<dyn Bus> {
        let raw = json!({
            "bus_type": "ConstantBus",
            "folder": object,
            "output": [{"name": object, "param": "measured_current_A", "value": value}],
            "time_info": serde_json::from_str::<serde_json::Value>(WINDOW).unwrap()
        })
        .to_string();
        let config = BusConfig::from_str(&raw).unwrap();
        let BusVariantConfig::Constant(constant) = config.variant else {
            panic!("expected constant variant");
        };
        Box::new(ConstantBus::new(&config.common, constant).unwrap())
    }

    fn multi(actions: serde_json::Value, serial: bool, children: Vec<Box<dyn Bus>>) -> MultiNodeBus {
        let raw = json!({
            "bus_type": "MultiNodeBus",
            "nodes": [{"__bus_file": "unused.json"}],
            "actions": actions,
            "serial": serial,
            "time_info": serde_json::from_str::<serde_json::Value>(WINDOW).unwrap()
        })
        .to_string();
        let config = BusConfig::from_str(&raw).unwrap();
        let BusVariantConfig::MultiNode(multi) = &config.variant else {
            panic!("expected multi-node variant");
        };
        MultiNodeBus::new(&config.common, multi, children).unwrap()
    }

    fn feeders() -> Vec<Box<dyn Bus>> {
        vec![
            constant("node_1", 10.0),
            constant("node_2", 12.0),
            constant("node_3", 8.0),
        ]
    }

    fn selector(object: &str) -> serde_json::Value {
        json!({"name": object, "param": "measured_current_A"})
    }

    fn real(envelope: &TransactionEnvelope, name: &str) -> ParamValue {
        envelope.parameters.get(name, None).unwrap().value.clone()
    }

    #[tokio::test]
    async fn sums_child_outputs() {
        let actions = json!([{
            "name": "total_current",
            "action": "sum",
            "action-list": [selector("node_1"), selector("node_2"), selector("node_3")]
        }]);
        let mut bus = multi(actions, false, feeders());
        bus.start().await.unwrap();

        let out = bus.transaction(TransactionRequest::new()).await.unwrap();
        assert_eq!(real(&out, "total_current"), ParamValue::Real(30.0));
        assert_eq!(out.parameters.len(), 1);
        for child in bus.children() {
            assert_eq!(child.core().current_time(), bus.core().current_time());
        }
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn difference_follows_selector_order_and_sees_earlier_results() {
        let actions = json!([
            {"name": "forward", "action": "difference", "action-list": [selector("node_2"), selector("node_3")]},
            {"name": "backward", "action": "difference", "action-list": [selector("node_3"), selector("node_2")]},
            {"name": "spread", "action": "difference", "action-list": [{"name": "forward"}, {"name": "backward"}]}
        ]);
        let mut bus = multi(actions, false, feeders());
        bus.start().await.unwrap();

        let out = bus.transaction(TransactionRequest::new()).await.unwrap();
        assert_eq!(real(&out, "forward"), ParamValue::Real(4.0));
        assert_eq!(real(&out, "backward"), ParamValue::Real(-4.0));
        assert_eq!(real(&out, "spread"), ParamValue::Real(8.0));
    }

    #[tokio::test]
    async fn staged_inputs_are_visible_to_actions() {
        let actions = json!([
            {"name": "echo", "action": "sum", "action-list": [{"name": "setpoint"}]},
            {"name": "absent", "action": "sum", "action-list": [{"name": "nowhere", "param": "x"}]}
        ]);
        let mut bus = multi(actions, false, feeders());
        bus.start().await.unwrap();

        let mut inputs = ParameterSet::new();
        inputs.add(Parameter::global("setpoint", 4.5));
        let out = bus
            .transaction(TransactionRequest::new().with_inputs(inputs))
            .await
            .unwrap();
        assert_eq!(real(&out, "echo"), ParamValue::Real(4.5));
        assert!(real(&out, "absent").is_null());
        assert!(bus.staged_inputs().contains("setpoint", None));
    }

    #[tokio::test]
    async fn serial_mode_matches_phase_interleaved_result() {
        let actions = json!([{
            "name": "total_current",
            "action": "sum",
            "action-list": [selector("node_1"), selector("node_2"), selector("node_3")]
        }]);
        let mut bus = multi(actions, true, feeders());
        assert!(bus.is_serial());
        bus.start().await.unwrap();
        let out = bus.transaction(TransactionRequest::new()).await.unwrap();
        assert_eq!(real(&out, "total_current"), ParamValue::Real(30.0));
    }

    #[tokio::test]
    async fn nested_multi_node_buses_compose() {
        let inner_actions = json!([{
            "name": "inner_total",
            "action": "sum",
            "action-list": [selector("node_1"), selector("node_2")]
        }]);
        let inner = multi(inner_actions, false, vec![constant("node_1", 10.0), constant("node_2", 12.0)]);
        let outer_actions = json!([{
            "name": "grand_total",
            "action": "product",
            "action-list": [{"name": "inner_total"}, selector("node_3")]
        }]);
        let mut outer = multi(outer_actions, false, vec![Box::new(inner), constant("node_3", 8.0)]);
        outer.start().await.unwrap();

        let out = outer.transaction(TransactionRequest::new()).await.unwrap();
        assert_eq!(real(&out, "grand_total"), ParamValue::Real(176.0));
        outer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn division_by_zero_propagates() {
        let actions = json!([{
            "name": "ratio",
            "action": "quotient",
            "action-list": [selector("node_1"), selector("node_2")]
        }]);
        let mut bus = multi(actions, false, vec![constant("node_1", 10.0), constant("node_2", 0.0)]);
        bus.start().await.unwrap();
        let err = bus.transaction(TransactionRequest::new()).await.unwrap_err();
        assert!(matches!(
            err,
            BusError::Arithmetic(ArithmeticError::DivisionByZero { .. })
        ));
    }

    #[tokio::test]
    async fn no_actions_yield_empty_outputs() {
        let mut bus = multi(json!([]), false, feeders());
        bus.start().await.unwrap();
        let out = bus.transaction(TransactionRequest::new()).await.unwrap();
        assert!(out.parameters.is_empty());
        assert!(out.timestamp.is_some());
    }
}
