//! End-to-end tests of the push pipeline: coercion, handler dispatch,
//! routing and the update barrier.

mod common;

use datahub_rs::{
    AdminService, DataSample, DataType, Hub, HubError, IoService, Value,
};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn trigger_push_reaches_numeric_handler_as_nan() {
    common::init_tracing();
    let mut hub = Hub::default();
    let mut io = IoService::new(&mut hub, "a").unwrap();
    io.create_input("t", DataType::Trigger, "").unwrap();

    let calls: Rc<RefCell<Vec<(f64, f64)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    io.add_numeric_push_handler("t", move |ts, v| {
        sink.borrow_mut().push((ts, v));
    })
    .unwrap();

    io.push_trigger("t", 1000.0).unwrap();

    let calls = calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, 1000.0);
    assert!(calls[0].1.is_nan());
}

#[test]
fn source_replacement_reroutes_observation() {
    common::init_tracing();
    let mut hub = Hub::default();
    {
        let mut io = IoService::new(&mut hub, "a").unwrap();
        io.create_input("temp", DataType::Numeric, "degC").unwrap();
    }
    {
        let mut io = IoService::new(&mut hub, "b").unwrap();
        io.create_input("temp", DataType::Numeric, "degF").unwrap();
    }
    {
        let mut admin = AdminService::new(&mut hub);
        admin.create_observation("o1").unwrap();
        admin.set_source("o1", Some("/app/a/temp")).unwrap();
        admin.set_source("o1", Some("/app/b/temp")).unwrap();
    }

    {
        let mut io = IoService::new(&mut hub, "b").unwrap();
        io.push_numeric("temp", 10.0, 42.0).unwrap();
    }
    let obs = hub.find_absolute("/obs/o1").unwrap();
    assert_eq!(hub.get_numeric(obs).unwrap(), 42.0);

    // Pushes to the replaced source no longer reach the observation.
    {
        let mut io = IoService::new(&mut hub, "a").unwrap();
        io.push_numeric("temp", 20.0, -1.0).unwrap();
    }
    assert_eq!(hub.get_numeric(obs).unwrap(), 42.0);
}

#[test]
fn cycle_rejection_keeps_chain_intact() {
    common::init_tracing();
    let mut hub = Hub::default();
    let mut admin = AdminService::new(&mut hub);
    for name in ["a", "b", "c"] {
        admin.create_observation(name).unwrap();
    }

    admin.set_source("b", Some("/obs/a")).unwrap();
    admin.set_source("c", Some("/obs/b")).unwrap();
    assert!(matches!(
        admin.set_source("a", Some("/obs/c")),
        Err(HubError::Duplicate(_))
    ));

    assert_eq!(admin.get_source("b").unwrap(), Some("/obs/a".to_string()));
    assert_eq!(admin.get_source("c").unwrap(), Some("/obs/b".to_string()));
    assert_eq!(admin.get_source("a").unwrap(), None);
}

#[test]
fn coercion_matrix_preserves_declared_type_and_timestamp() {
    common::init_tracing();
    let declared = [
        DataType::Trigger,
        DataType::Boolean,
        DataType::Numeric,
        DataType::String,
        DataType::Json,
    ];

    for to in declared {
        let mut hub = Hub::default();
        let input = hub
            .create_input(hub.root(), "app/a/x", to, "")
            .unwrap();

        let samples = [
            (DataType::Trigger, DataSample::trigger(42.0)),
            (DataType::Boolean, DataSample::boolean(42.0, true)),
            (DataType::Numeric, DataSample::numeric(42.0, 7.5)),
            (DataType::String, DataSample::string(42.0, "hey").unwrap()),
            (DataType::Json, DataSample::json(42.0, "[1,2]").unwrap()),
        ];
        for (from, sample) in samples {
            hub.push(input, from, sample).unwrap();
            let (current_type, current) = hub.current_value(input).unwrap();
            assert_eq!(current_type, to, "push {} into {}", from.name(), to.name());
            assert_eq!(current.timestamp(), 42.0);
        }
    }
}

#[test]
fn handler_registered_after_value_replays_once() {
    common::init_tracing();
    let mut hub = Hub::default();
    let mut io = IoService::new(&mut hub, "a").unwrap();
    io.create_input("n", DataType::Numeric, "").unwrap();
    io.push_numeric("n", 123.0, 4.5).unwrap();

    let calls: Rc<RefCell<Vec<(f64, f64)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    io.add_numeric_push_handler("n", move |ts, v| {
        sink.borrow_mut().push((ts, v));
    })
    .unwrap();

    // Invoked exactly once, synchronously, with the current value.
    assert_eq!(*calls.borrow(), vec![(123.0, 4.5)]);
}

#[test]
fn delete_without_settings_then_recreate_is_clean() {
    common::init_tracing();
    let mut hub = Hub::default();
    let mut io = IoService::new(&mut hub, "a").unwrap();
    io.create_input("x", DataType::Numeric, "").unwrap();
    io.push_numeric("x", 1.0, 9.0).unwrap();
    io.delete_resource("x").unwrap();

    io.create_input("x", DataType::Numeric, "").unwrap();
    assert!(matches!(io.get_numeric("x"), Err(HubError::Unavailable)));
    assert!(matches!(
        io.get_timestamp("x"),
        Err(HubError::Unavailable)
    ));
}

#[test]
fn update_barrier_collapses_to_latest_sample() {
    common::init_tracing();
    let mut hub = Hub::default();
    {
        let mut admin = AdminService::new(&mut hub);
        admin.create_observation("o").unwrap();
    }
    let obs = hub.find_absolute("/obs/o").unwrap();

    let deliveries: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&deliveries);
    hub.add_push_handler(
        obs,
        DataType::Numeric,
        Box::new(move |_, value| {
            if let Value::Numeric(v) = value {
                sink.borrow_mut().push(*v);
            }
        }),
    )
    .unwrap();

    {
        let mut admin = AdminService::new(&mut hub);
        admin.start_update();
        // Touching a filter setting marks the observation as affected.
        admin.set_change_by("o", 0.0).unwrap();
    }
    for i in 1..=10 {
        hub.push(
            obs,
            DataType::Numeric,
            DataSample::numeric(i as f64, i as f64 * 10.0),
        )
        .unwrap();
    }
    assert!(deliveries.borrow().is_empty());

    AdminService::new(&mut hub).end_update();
    assert_eq!(*deliveries.borrow(), vec![100.0]);
}

#[test]
fn update_start_end_handlers_fire_once_per_transition() {
    common::init_tracing();
    let mut hub = Hub::default();
    let transitions: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&transitions);
    {
        let mut io = IoService::new(&mut hub, "a").unwrap();
        io.add_update_start_end_handler(move |starting| {
            sink.borrow_mut().push(starting);
        });
    }

    let mut admin = AdminService::new(&mut hub);
    admin.start_update();
    admin.start_update();
    admin.end_update();
    assert_eq!(*transitions.borrow(), vec![true, false]);
}

#[test]
fn output_chain_propagates_through_observation() {
    common::init_tracing();
    let mut hub = Hub::default();
    {
        let mut io = IoService::new(&mut hub, "sensor").unwrap();
        io.create_input("temp", DataType::Numeric, "degC").unwrap();
    }
    {
        let mut io = IoService::new(&mut hub, "display").unwrap();
        io.create_output("reading", DataType::String, "").unwrap();
    }
    {
        let mut admin = AdminService::new(&mut hub);
        admin.create_observation("filtered").unwrap();
        admin.set_source("filtered", Some("/app/sensor/temp")).unwrap();
        admin
            .set_source("/app/display/reading", Some("/obs/filtered"))
            .unwrap();
    }

    let calls: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&calls);
    {
        let mut io = IoService::new(&mut hub, "display").unwrap();
        io.add_string_push_handler("reading", move |_, s| {
            sink.borrow_mut().push(s.to_string());
        })
        .unwrap();
    }

    {
        let mut io = IoService::new(&mut hub, "sensor").unwrap();
        io.push_numeric("temp", 5.0, 19.25).unwrap();
    }

    // Propagated input -> observation -> output, coerced to the output's
    // declared string type, before the push returned.
    assert_eq!(*calls.borrow(), vec!["19.250000".to_string()]);
}

#[test]
fn mandatory_and_optional_outputs() {
    common::init_tracing();
    let mut hub = Hub::default();
    let mut io = IoService::new(&mut hub, "a").unwrap();
    io.create_output("must", DataType::Numeric, "").unwrap();
    io.create_output("may", DataType::Numeric, "").unwrap();
    io.mark_optional("may").unwrap();

    let must = hub.find_absolute("/app/a/must").unwrap();
    let may = hub.find_absolute("/app/a/may").unwrap();
    assert!(hub.is_mandatory(must));
    assert!(!hub.is_mandatory(may));
}
