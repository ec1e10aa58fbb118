//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Multi-node composition and file replay loaded from bus files."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use r_ems_common::time::parse_timestamp;
use r_ems_core::{build_bus, Bus, BusError, BusLoader, TransactionRequest};
use r_ems_msg::{ParamValue, Parameter, ParameterSet};
use serde_json::{json, Value};

const WINDOW: &str = r#"{"start": "2020-06-01 00:00:00", "end": "2020-06-01 00:02:00", "delta": 30}"#;

fn window() -> Value {
    serde_json::from_str(WINDOW).expect("window literal")
}

fn write_json(path: &Path, value: &Value) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, serde_json::to_string_pretty(value).unwrap())
        .unwrap_or_else(|err| panic!("failed to write {}: {}", path.display(), err));
}

fn constant_child(object: &str, current: i64) -> Value {
    json!({
        "bus_type": "ConstantBus",
        "output": [{"name": object, "param": "measured_current_A", "value": current, "unit": "A"}],
        "time_info": window()
    })
}

fn selector(object: &str) -> Value {
    json!({"name": object, "param": "measured_current_A"})
}

fn value(params: &ParameterSet, name: &str) -> ParamValue {
    params
        .get(name, None)
        .unwrap_or_else(|err| panic!("missing {name}: {err}"))
        .value
        .clone()
}

fn feeder_dir(actions: Value) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_json(&dir.path().join("node_1").join("bus.json"), &constant_child("node_1", 10));
    write_json(&dir.path().join("node_3.json"), &constant_child("node_3", 8));
    write_json(
        &dir.path().join("bus.json"),
        &json!({
            "bus_type": "MultiNodeBus",
            "time_info": window(),
            "nodes": [
                {"__bus_file": "node_1"},
                constant_child("node_2", 12),
                {"__bus_file": "node_3.json"}
            ],
            "actions": actions
        }),
    );
    dir
}

#[tokio::test]
async fn three_feeders_sum_to_thirty_every_step() {
    let dir = feeder_dir(json!([{
        "name": "total_current",
        "action": "sum",
        "action-list": [selector("node_1"), selector("node_2"), selector("node_3")]
    }]));
    let mut bus = BusLoader::new().open(dir.path()).await.unwrap();

    let mut steps = 0;
    while !bus.core().is_finished() {
        let out = bus.transaction(TransactionRequest::new()).await.unwrap();
        steps += 1;
        let total = out.parameters.get("total_current", None).unwrap();
        assert_eq!(total.value, ParamValue::Int(30), "step {steps}");
        assert_eq!(total.unit.as_deref(), Some("A"), "unit follows the first operand");
    }
    assert_eq!(steps, 4, "a two minute window at 30 s has four steps");
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn difference_depends_on_selector_order() {
    let dir = feeder_dir(json!([
        {"name": "forward", "action": "difference", "action-list": [selector("node_1"), selector("node_3")]},
        {"name": "reverse", "action": "difference", "action-list": [selector("node_3"), selector("node_1")]}
    ]));
    let mut bus = BusLoader::new().open(dir.path()).await.unwrap();

    let out = bus.transaction(TransactionRequest::new()).await.unwrap();
    assert_eq!(value(&out.parameters, "forward"), ParamValue::Int(2));
    assert_eq!(value(&out.parameters, "reverse"), ParamValue::Int(-2));
}

#[tokio::test]
async fn replayed_series_steps_from_five_to_eight() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("power.player"),
        "2020-06-01 00:00:00,5\n2020-06-01 00:01:00,8\n",
    )
    .unwrap();
    write_json(
        &dir.path().join("bus.json"),
        &json!({
            "bus_type": "FileBus",
            "output": [{"name": "meter", "param": "measured_real_power", "filename": "power.player"}],
            "time_info": {"start": "2020-06-01 00:00:00", "end": "2020-06-01 00:03:00", "delta": 15}
        }),
    );
    let mut bus = BusLoader::new().open(dir.path()).await.unwrap();
    let switch = parse_timestamp("2020-06-01 00:01:00").unwrap();

    while !bus.core().is_finished() {
        let out = bus.transaction(TransactionRequest::new()).await.unwrap();
        let at = out.timestamp.unwrap();
        let replayed = out
            .parameters
            .get("meter", Some("measured_real_power"))
            .unwrap()
            .value
            .clone();
        let expected = if at < switch { 5.0 } else { 8.0 };
        assert_eq!(replayed, ParamValue::Real(expected), "at {at}");
    }
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn file_replay_feeds_multi_node_actions() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("pv.csv"), "timestamp,value\n2020-06-01 00:00:00,2.5\n").unwrap();
    write_json(
        &dir.path().join("bus.json"),
        &json!({
            "bus_type": "MultiNodeBus",
            "time_info": window(),
            "nodes": [
                {"bus_type": "FileBus", "time_info": window(),
                 "output": [{"name": "pv", "param": "measured_real_power", "filename": "pv.csv"}]},
                constant_child("node_1", 10)
            ],
            "actions": [
                {"name": "net", "action": "difference",
                 "action-list": [selector("node_1"), {"name": "pv", "param": "measured_real_power"}]},
                {"name": "scaled", "action": "product",
                 "action-list": [{"name": "net"}, {"name": "gain"}]}
            ]
        }),
    );
    let mut bus = BusLoader::new().open(dir.path()).await.unwrap();

    let mut inputs = ParameterSet::new();
    inputs.add(Parameter::global("gain", 2.0));
    let out = bus
        .transaction(TransactionRequest::new().with_inputs(inputs))
        .await
        .unwrap();
    assert_eq!(value(&out.parameters, "net"), ParamValue::Real(7.5));
    assert_eq!(value(&out.parameters, "scaled"), ParamValue::Real(15.0));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn fallback_bus_covers_a_broken_configuration() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bus.json"), "{ not json").unwrap();
    let fallback = constant_child("fallback", 1);

    let strict = BusLoader::new();
    assert!(matches!(
        strict.load(dir.path()).unwrap_err(),
        BusError::Config(_)
    ));

    let loader = BusLoader::new().with_fallback(move || {
        let config = serde_json::from_value(fallback.clone())?;
        Ok(build_bus(config)?)
    });
    let mut bus = loader.open(dir.path()).await.unwrap();
    assert_eq!(bus.type_name(), "ConstantBus");
    let out = bus.transaction(TransactionRequest::new()).await.unwrap();
    assert_eq!(
        out.parameters.get("fallback", Some("measured_current_A")).unwrap().value,
        ParamValue::Int(1)
    );
}
