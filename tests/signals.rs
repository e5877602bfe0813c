use std::sync::{Arc, Mutex};

use fragment_engine::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Sensor(u32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Relay(u32);

fn setup() -> EntityManager {
    register_fragment::<Sensor>();
    register_fragment::<Relay>();
    EntityManager::new()
}

#[test]
fn subscriber_drains_only_its_query_set() {
    let mut world = setup();

    let mut sensor = Bundle::new();
    sensor.insert(Sensor(1));
    let watched = world.create_entity(sensor).unwrap();

    let mut relay = Bundle::new();
    relay.insert(Relay(1));
    let unrelated = world.create_entity(relay).unwrap();

    let token = world.signals().subscribe("ping");
    world.signal_entities("ping", &[watched, unrelated]);

    // the consumer's result set contains only Sensor entities
    let drained = world
        .signals()
        .drain(token, |entity| world.has_fragment::<Sensor>(entity));
    assert_eq!(drained, vec![watched]);

    // the non-matching entry stays pending for other subscribers this cycle
    assert_eq!(world.signals().pending_len("ping"), 1);
}

#[test]
fn undrained_signals_are_discarded_at_cycle_end() {
    let mut world = setup();

    let mut bundle = Bundle::new();
    bundle.insert(Sensor(1));
    let entity = world.create_entity(bundle).unwrap();

    world.signal_entities("ping", &[entity]);
    assert_eq!(world.signals().pending_len("ping"), 1);

    world.signals().end_cycle();
    assert_eq!(world.signals().pending_len("ping"), 0);
}

#[test]
fn signals_flow_between_phases_and_die_after_the_run() {
    let mut world = setup();
    let entities = world
        .create_entities(3, |i| {
            let mut bundle = Bundle::new();
            bundle.insert(Sensor(i as u32));
            bundle
        })
        .unwrap();
    let token = world.signals().subscribe("alert");
    let engine = Engine::new(world);

    let received = Arc::new(Mutex::new(Vec::new()));

    let produce_query = Query::builder().read::<Sensor>().unwrap().build().unwrap();
    let consume_query = Query::builder().read::<Sensor>().unwrap().build().unwrap();

    let mut schedule = Schedule::new();
    let sense = schedule.add_phase("sense");
    let react = schedule.add_phase("react");

    let signalled = entities.clone();
    schedule.add_processor(
        sense,
        FnProcessor::new(
            "raise",
            ProcessorAccess::from_query(&produce_query),
            move |world, _| {
                world.data().signal_entities("alert", &signalled);
                Ok(())
            },
        ),
    );

    let received_in = received.clone();
    schedule.add_processor(
        react,
        FnProcessor::new(
            "handle",
            ProcessorAccess::from_query(&consume_query),
            move |world, _| {
                let drained = world
                    .data()
                    .signals()
                    .drain(token, |entity| world.data().is_entity_valid(entity));
                received_in.lock().unwrap().extend(drained);
                Ok(())
            },
        ),
    );

    schedule.build(&ResourceRegistry::new()).unwrap();
    schedule.run(&engine).unwrap();

    assert_eq!(*received.lock().unwrap(), entities);
    // nothing pending survives the run
    assert_eq!(engine.world_ref().data().signals().pending_len("alert"), 0);
}
