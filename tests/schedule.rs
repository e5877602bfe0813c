use std::sync::{Arc, Mutex};

use fragment_engine::prelude::*;
use fragment_engine::{EngineError, ScheduleError};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Heat(f32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Fuel(f32);

fn setup() -> EntityManager {
    register_fragment::<Heat>();
    register_fragment::<Fuel>();
    EntityManager::new()
}

fn access_writing<T: Fragment>() -> ProcessorAccess {
    let query = Query::builder().write::<T>().unwrap().build().unwrap();
    ProcessorAccess::from_query(&query)
}

fn access_reading<T: Fragment>() -> ProcessorAccess {
    let query = Query::builder().read::<T>().unwrap().build().unwrap();
    ProcessorAccess::from_query(&query)
}

#[test]
fn conflicting_writers_are_layered_apart() {
    let _ = setup();
    let mut schedule = Schedule::new();
    let phase = schedule.add_phase("update");

    schedule.add_processor(
        phase,
        FnProcessor::new("burn", access_writing::<Heat>(), |_, _| Ok(())),
    );
    schedule.add_processor(
        phase,
        FnProcessor::new("vent", access_writing::<Heat>(), |_, _| Ok(())),
    );
    schedule.build(&ResourceRegistry::new()).unwrap();
    assert_eq!(schedule.phase_layers(phase), 2);
}

#[test]
fn disjoint_writers_share_a_layer() {
    let _ = setup();
    let mut schedule = Schedule::new();
    let phase = schedule.add_phase("update");

    schedule.add_processor(
        phase,
        FnProcessor::new("burn", access_writing::<Heat>(), |_, _| Ok(())),
    );
    schedule.add_processor(
        phase,
        FnProcessor::new("refuel", access_writing::<Fuel>(), |_, _| Ok(())),
    );
    schedule.build(&ResourceRegistry::new()).unwrap();
    assert_eq!(schedule.phase_layers(phase), 1);
}

#[test]
fn shared_resource_serializes_processors() {
    let _ = setup();
    let mut resources = ResourceRegistry::new();
    resources.register("terrain");

    let mut schedule = Schedule::new();
    let phase = schedule.add_phase("update");

    let make_access = |resources: &ResourceRegistry| {
        let query = Query::builder()
            .read::<Heat>().unwrap()
            .resource(resources, "terrain").unwrap()
            .build()
            .unwrap();
        ProcessorAccess::from_query(&query)
    };

    schedule.add_processor(
        phase,
        FnProcessor::new("erode", make_access(&resources), |_, _| Ok(())),
    );
    schedule.add_processor(
        phase,
        FnProcessor::new("deposit", make_access(&resources), |_, _| Ok(())),
    );
    schedule.build(&resources).unwrap();
    assert_eq!(schedule.phase_layers(phase), 2);
}

#[test]
fn explicit_ordering_is_respected() {
    let _ = setup();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut schedule = Schedule::new();
    let phase = schedule.add_phase("update");

    let order_a = order.clone();
    schedule.add_processor(
        phase,
        FnProcessor::new("late", access_reading::<Heat>(), move |_, _| {
            order_a.lock().unwrap().push("late");
            Ok(())
        })
        .run_after("early"),
    );
    let order_b = order.clone();
    schedule.add_processor(
        phase,
        FnProcessor::new("early", access_reading::<Fuel>(), move |_, _| {
            order_b.lock().unwrap().push("early");
            Ok(())
        }),
    );

    let engine = Engine::new(EntityManager::new());
    schedule.build(&ResourceRegistry::new()).unwrap();
    schedule.run(&engine).unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["early", "late"]);
}

#[test]
fn ordering_cycle_is_a_build_error() {
    let _ = setup();
    let mut schedule = Schedule::new();
    let phase = schedule.add_phase("update");

    schedule.add_processor(
        phase,
        FnProcessor::new("a", access_reading::<Heat>(), |_, _| Ok(())).run_before("b"),
    );
    schedule.add_processor(
        phase,
        FnProcessor::new("b", access_reading::<Fuel>(), |_, _| Ok(())).run_before("a"),
    );

    let err = schedule.build(&ResourceRegistry::new()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Schedule(ScheduleError::OrderingCycle { .. })
    ));
}

#[test]
fn unknown_ordering_target_is_a_build_error() {
    let _ = setup();
    let mut schedule = Schedule::new();
    let phase = schedule.add_phase("update");

    schedule.add_processor(
        phase,
        FnProcessor::new("a", access_reading::<Heat>(), |_, _| Ok(())).run_before("ghost"),
    );

    let err = schedule.build(&ResourceRegistry::new()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Schedule(ScheduleError::UnknownProcessor { .. })
    ));
}

#[test]
fn commands_apply_at_the_phase_barrier() {
    let mut world = setup();
    world
        .create_entities(4, |i| {
            let mut bundle = Bundle::new();
            bundle.insert(Heat(i as f32));
            bundle
        })
        .unwrap();
    let engine = Engine::new(world);

    let spawn_query = Query::builder().read::<Heat>().unwrap().build().unwrap();
    let mut schedule = Schedule::new();
    let phase = schedule.add_phase("update");

    // every hot entity spawns an ember through the buffer; the spawn is not
    // visible until the phase barrier has replayed it
    schedule.add_processor(
        phase,
        FnProcessor::new("ignite", ProcessorAccess::from_query(&spawn_query), move |world, ctx| {
            let mut hot = 0usize;
            world.for_each_read::<Heat, _>(&spawn_query, |heat| {
                if heat.0 >= 2.0 {
                    hot += 1;
                }
            });
            for _ in 0..hot {
                let mut bundle = Bundle::new();
                bundle.insert(Fuel(1.0));
                ctx.commands().create(bundle);
            }
            assert_eq!(world.data().live_count(), 4, "creation must be deferred");
            Ok(())
        }),
    );

    schedule.build(&ResourceRegistry::new()).unwrap();
    schedule.run(&engine).unwrap();

    assert_eq!(engine.world_ref().data().live_count(), 6);
}

#[test]
fn parallel_layer_runs_all_processors() {
    let mut world = setup();
    world
        .create_entities(64, |_| {
            let mut bundle = Bundle::new();
            bundle.insert(Heat(1.0));
            bundle.insert(Fuel(1.0));
            bundle
        })
        .unwrap();
    let engine = Engine::new(world);

    let heat_query = Query::builder().write::<Heat>().unwrap().build().unwrap();
    let fuel_query = Query::builder().write::<Fuel>().unwrap().build().unwrap();

    let mut schedule = Schedule::new();
    let phase = schedule.add_phase("update");
    let heat_access = ProcessorAccess::from_query(&heat_query);
    let fuel_access = ProcessorAccess::from_query(&fuel_query);

    schedule.add_processor(
        phase,
        FnProcessor::new("warm", heat_access, move |world, _| {
            world.for_each_write::<Heat, _>(&heat_query, |heat| heat.0 += 1.0);
            Ok(())
        }),
    );
    schedule.add_processor(
        phase,
        FnProcessor::new("spend", fuel_access, move |world, _| {
            world.for_each_write::<Fuel, _>(&fuel_query, |fuel| fuel.0 -= 0.5);
            Ok(())
        }),
    );

    schedule.build(&ResourceRegistry::new()).unwrap();
    schedule.run(&engine).unwrap();
    schedule.run(&engine).unwrap();

    let world = engine.world_ref();
    let check = Query::builder()
        .read::<Heat>().unwrap()
        .read::<Fuel>().unwrap()
        .build()
        .unwrap();
    let mut rows = 0usize;
    world.for_each_read2::<Heat, Fuel, _>(&check, |heat, fuel| {
        assert_eq!(heat.0, 3.0);
        assert_eq!(fuel.0, 0.0);
        rows += 1;
    });
    assert_eq!(rows, 64);
}
