//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Scheduled set-points interleaved with simulator steps."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;

use chrono::NaiveDateTime;
use r_ems_common::time::parse_timestamp;
use r_ems_core::{load_setpoints, Bus, BusLoader, SetpointController};
use r_ems_net::fake::FakeSimulator;
use serde_json::json;

fn ts(raw: &str) -> NaiveDateTime {
    parse_timestamp(raw).unwrap_or_else(|| panic!("bad timestamp {raw}"))
}

#[tokio::test]
async fn setpoints_reach_the_simulator_at_their_due_time() {
    let fake = FakeSimulator::spawn().await.expect("fake simulator");
    fake.set_clock(ts("2020-06-01 00:00:00"), None);
    fake.set_property("meter_1", Some("measured_real_power"), "800 W");

    let dir = tempfile::tempdir().unwrap();
    let config = json!({
        "bus_type": "GridlabBus",
        "filename": "feeder.glm",
        "host": "127.0.0.1",
        "port": fake.port(),
        "launch": false,
        "poll": 0.01,
        "poll_timeout": 0.5,
        "startup": {"timeout": 0.5, "loop_pause": 0.02, "shutdown_timeout": 0.1},
        "output": [{"name": "meter_1", "param": "measured_real_power"}],
        "time_info": {"start": "2020-06-01 00:00:00", "end": "2020-06-01 00:02:00", "delta": 30}
    });
    fs::write(dir.path().join("bus.json"), config.to_string()).unwrap();
    fs::write(
        dir.path().join("setpoints.json"),
        json!([
            {"time": "2020-06-01 00:00:45", "name": "load_1", "param": "base_power", "value": 2.5, "unit": "kW"},
            {"time": "2020-06-01 00:01:30", "name": "switch_3", "param": "status", "value": "OPEN"}
        ])
        .to_string(),
    )
    .unwrap();

    let mut bus = BusLoader::new().open(dir.path()).await.unwrap();
    let mut controller = SetpointController::for_bus(&*bus);
    controller
        .schedule_all(&load_setpoints(dir.path().join("setpoints.json")).unwrap())
        .unwrap();

    let out = controller.step(bus.as_mut()).await.unwrap();
    assert_eq!(out.timestamp, Some(ts("2020-06-01 00:00:30")));
    assert!(fake.property("load_1", Some("base_power")).is_none());

    let out = controller.step(bus.as_mut()).await.unwrap();
    assert_eq!(out.timestamp, Some(ts("2020-06-01 00:00:45")));
    assert_eq!(fake.clock(), Some(ts("2020-06-01 00:00:45")));
    assert_eq!(fake.property("load_1", Some("base_power")).as_deref(), Some("2.5 kW"));
    assert!(fake.property("switch_3", Some("status")).is_none());

    let mut times = vec![out.timestamp.unwrap()];
    while !bus.core().is_finished() {
        times.push(controller.step(bus.as_mut()).await.unwrap().timestamp.unwrap());
    }
    assert_eq!(
        times,
        vec![
            ts("2020-06-01 00:00:45"),
            ts("2020-06-01 00:01:15"),
            ts("2020-06-01 00:01:30"),
            ts("2020-06-01 00:02:00"),
        ]
    );
    assert_eq!(fake.property("switch_3", Some("status")).as_deref(), Some("OPEN"));
    assert_eq!(controller.pending_events(), 0);

    bus.stop().await.unwrap();
    fake.shutdown().await;
}
