use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fragment_engine::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Hull(u32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Shield(u32);

#[derive(Clone, Copy)]
struct Derelict;

fn setup() -> EntityManager {
    register_fragment::<Hull>();
    register_fragment::<Shield>();
    register_fragment::<Derelict>();
    EntityManager::new()
}

fn spawn_hull(world: &mut EntityManager, hull: u32) -> Entity {
    let mut bundle = Bundle::new();
    bundle.insert(Hull(hull));
    world.create_entity(bundle).unwrap()
}

#[test]
fn replay_applies_in_recorded_order() {
    let mut world = setup();
    let entity = spawn_hull(&mut world, 1);

    let mut buffer = CommandBuffer::new();
    buffer.add_fragment(entity, Shield(10));
    buffer.remove_fragment::<Shield>(entity);
    buffer.add_fragment(entity, Shield(20));
    buffer.flush(&mut world).unwrap();

    assert_eq!(world.get_fragment::<Shield>(entity), Some(&Shield(20)));
}

#[test]
fn destroy_wins_over_later_ops() {
    let mut world = setup();
    let entity = spawn_hull(&mut world, 1);

    let mut buffer = CommandBuffer::new();
    buffer.add_fragment(entity, Shield(5));
    buffer.destroy(entity);
    buffer.add_fragment(entity, Shield(50));
    buffer.add_tag::<Derelict>(entity);
    buffer.destroy(entity); // double destroy in the same pass
    buffer.flush(&mut world).unwrap();

    assert!(!world.is_entity_valid(entity));
}

#[test]
fn pending_entities_are_valid_targets_in_the_same_buffer() {
    let mut world = setup();

    let mut buffer = CommandBuffer::new();
    let mut bundle = Bundle::new();
    bundle.insert(Hull(3));
    let pending = buffer.create(bundle);
    buffer.add_fragment(pending, Shield(7));
    buffer.add_tag::<Derelict>(pending);
    buffer.flush(&mut world).unwrap();

    assert_eq!(world.live_count(), 1);
    let query = Query::builder().read::<Hull>().unwrap().build().unwrap();
    let mut found = Vec::new();
    query.for_each_chunk(&mut world, |view| {
        found.extend_from_slice(view.entities());
    });
    assert_eq!(found.len(), 1);
    let entity = found[0];
    assert_eq!(world.get_fragment::<Hull>(entity), Some(&Hull(3)));
    assert_eq!(world.get_fragment::<Shield>(entity), Some(&Shield(7)));
    assert!(world.has_fragment::<Derelict>(entity));
}

#[test]
fn destroyed_pending_entity_drops_remaining_ops() {
    let mut world = setup();

    let mut buffer = CommandBuffer::new();
    let mut bundle = Bundle::new();
    bundle.insert(Hull(1));
    let pending = buffer.create(bundle);
    buffer.destroy(pending);
    buffer.add_fragment(pending, Shield(99));
    buffer.flush(&mut world).unwrap();

    assert_eq!(world.live_count(), 0);
}

#[test]
fn observers_fire_once_per_pass_with_all_affected_entities() {
    let mut world = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let calls_in = calls.clone();
    let total_in = total.clone();
    world.observe::<Shield>(FragmentOp::Added, move |entities| {
        calls_in.fetch_add(1, Ordering::SeqCst);
        total_in.fetch_add(entities.len(), Ordering::SeqCst);
    });

    let a = spawn_hull(&mut world, 1);
    let b = spawn_hull(&mut world, 2);
    let c = spawn_hull(&mut world, 3);

    let mut buffer = CommandBuffer::new();
    buffer.add_fragment(a, Shield(1));
    buffer.add_fragment(b, Shield(2));
    buffer.add_fragment(c, Shield(3));
    buffer.flush(&mut world).unwrap();

    // batched once per (type, operation) pair, covering all three entities
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(total.load(Ordering::SeqCst), 3);
}

#[test]
fn remove_observer_fires_after_replay() {
    let mut world = setup();
    let removed = Arc::new(AtomicUsize::new(0));

    let removed_in = removed.clone();
    world.observe::<Shield>(FragmentOp::Removed, move |entities| {
        removed_in.fetch_add(entities.len(), Ordering::SeqCst);
    });

    let entity = spawn_hull(&mut world, 1);
    world.add_fragment_with(entity, Shield(4)).unwrap();

    let mut buffer = CommandBuffer::new();
    buffer.remove_fragment::<Shield>(entity);
    buffer.flush(&mut world).unwrap();

    assert_eq!(removed.load(Ordering::SeqCst), 1);
    assert!(!world.has_fragment::<Shield>(entity));
}

#[test]
fn merged_buffers_preserve_per_buffer_order() {
    let mut world = setup();
    let entity = spawn_hull(&mut world, 1);

    let mut first = CommandBuffer::new();
    first.add_fragment(entity, Shield(1));

    let mut second = CommandBuffer::new();
    let mut bundle = Bundle::new();
    bundle.insert(Hull(2));
    let pending = second.create(bundle);
    second.add_fragment(pending, Shield(2));

    let mut merged = CommandBuffer::new();
    merged.append(first);
    merged.append(second);
    merged.flush(&mut world).unwrap();

    assert_eq!(world.get_fragment::<Shield>(entity), Some(&Shield(1)));
    assert_eq!(world.live_count(), 2);
}
