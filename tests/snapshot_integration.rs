//! End-to-end tests of the snapshot/delta engine and the config loader.

mod common;

use datahub_rs::{
    config, AdminService, DataType, Hub, IoService, QueryService, SnapshotFormat,
    SnapshotOptions,
};

fn take_json_snapshot(hub: &mut Hub, options: &SnapshotOptions) -> serde_json::Value {
    let mut out = Vec::new();
    QueryService::new(hub).snapshot(options, &mut out).unwrap();
    serde_json::from_slice(&out).unwrap()
}

#[test]
fn snapshot_reports_deletion_then_forgets_it() {
    common::init_tracing();
    let mut hub = Hub::default();
    AdminService::new(&mut hub).set_deletion_tracking(true);
    {
        let mut io = IoService::new(&mut hub, "x").unwrap();
        io.create_input("a", DataType::Numeric, "").unwrap();
        io.create_input("b", DataType::Numeric, "").unwrap();
        io.push_numeric("a", 100.0, 1.0).unwrap();
        io.push_numeric("b", 100.0, 1.0).unwrap();
    }

    // Baseline scan: both resources present, newness cleared.
    let doc = take_json_snapshot(&mut hub, &SnapshotOptions::default());
    let x = &doc["children"]["app"]["children"]["x"]["children"];
    assert!(x.get("a").is_some());
    assert!(x.get("b").is_some());

    // Delete one input; the next snapshot carries its tombstone.
    IoService::new(&mut hub, "x").unwrap().delete_resource("a").unwrap();
    let doc = take_json_snapshot(
        &mut hub,
        &SnapshotOptions {
            flush_deletions: true,
            ..SnapshotOptions::default()
        },
    );
    let x = &doc["children"]["app"]["children"]["x"]["children"];
    assert_eq!(x["a"]["deleted"], true);
    assert_eq!(x["b"]["kind"], "input");

    // The flush released the tombstone: the deletion is no longer
    // reported.
    let doc = take_json_snapshot(&mut hub, &SnapshotOptions::default());
    let x = &doc["children"]["app"]["children"]["x"]["children"];
    assert!(x.get("a").is_none());
}

#[test]
fn delta_snapshot_contains_only_changes() {
    common::init_tracing();
    let mut hub = Hub::default();
    {
        let mut io = IoService::new(&mut hub, "x").unwrap();
        io.create_input("a", DataType::Numeric, "").unwrap();
        io.create_input("b", DataType::Numeric, "").unwrap();
        io.push_numeric("a", 100.0, 1.0).unwrap();
        io.push_numeric("b", 100.0, 1.0).unwrap();
    }
    take_json_snapshot(&mut hub, &SnapshotOptions::default());

    IoService::new(&mut hub, "x")
        .unwrap()
        .push_numeric("a", 500.0, 2.0)
        .unwrap();

    let doc = take_json_snapshot(
        &mut hub,
        &SnapshotOptions {
            since: 200.0,
            ..SnapshotOptions::default()
        },
    );
    let x = &doc["children"]["app"]["children"]["x"]["children"];
    assert_eq!(x["a"]["value"]["v"], 2.0);
    assert!(x.get("b").is_none());
}

#[test]
fn snapshot_subtree_root() {
    common::init_tracing();
    let mut hub = Hub::default();
    {
        let mut io = IoService::new(&mut hub, "x").unwrap();
        io.create_input("a", DataType::Numeric, "").unwrap();
    }
    {
        let mut io = IoService::new(&mut hub, "y").unwrap();
        io.create_input("other", DataType::Numeric, "").unwrap();
    }

    let doc = take_json_snapshot(
        &mut hub,
        &SnapshotOptions {
            root: "/app/x".to_string(),
            ..SnapshotOptions::default()
        },
    );
    assert_eq!(doc["children"]["a"]["kind"], "input");
    assert!(doc["children"].get("other").is_none());
}

#[test]
fn octave_snapshot_lists_resources() {
    common::init_tracing();
    let mut hub = Hub::default();
    {
        let mut io = IoService::new(&mut hub, "x").unwrap();
        io.create_input("a", DataType::Numeric, "V").unwrap();
        io.push_numeric("a", 7.0, 1.25).unwrap();
    }

    let mut out = Vec::new();
    QueryService::new(&mut hub)
        .snapshot(
            &SnapshotOptions {
                format: SnapshotFormat::Octave,
                ..SnapshotOptions::default()
            },
            &mut out,
        )
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("/app/x/a input numeric 7 1.250000"));
}

#[test]
fn config_route_comes_alive_when_producer_appears() {
    common::init_tracing();
    let mut hub = Hub::default();

    // Configuration arrives before the producing app does.
    config::apply(
        &mut hub,
        r#"{
            "o": {
                "room": {
                    "r": "/app/sensor/temp",
                    "b": 8,
                    "st": 0.5
                }
            }
        }"#,
    )
    .unwrap();

    // The producer shows up: the placeholder is promoted and the admin
    // settings (the route) survive.
    {
        let mut io = IoService::new(&mut hub, "sensor").unwrap();
        io.create_input("temp", DataType::Numeric, "degC").unwrap();
        io.push_numeric("temp", 50.0, 20.0).unwrap();
        io.push_numeric("temp", 51.0, 20.1).unwrap(); // within change-by
        io.push_numeric("temp", 52.0, 21.0).unwrap();
    }

    let obs = hub.find_absolute("/obs/room").unwrap();
    assert_eq!(hub.get_numeric(obs).unwrap(), 21.0);

    let query = QueryService::new(&mut hub);
    let mut out = Vec::new();
    query.read_buffer_json("/obs/room", f64::NAN, &mut out).unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let values: Vec<f64> = doc
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["v"].as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![20.0, 21.0]);
}
