use fragment_engine::prelude::*;
use fragment_engine::ChunkPolicy;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Mass(f32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Charge(f32);

fn setup(max_rows: usize) -> EntityManager {
    register_fragment::<Mass>();
    register_fragment::<Charge>();
    EntityManager::with_policy(ChunkPolicy { max_rows, ..ChunkPolicy::default() })
}

fn spawn_pair(world: &mut EntityManager, mass: f32, charge: f32) -> Entity {
    let mut bundle = Bundle::new();
    bundle.insert(Mass(mass));
    bundle.insert(Charge(charge));
    world.create_entity(bundle).unwrap()
}

#[test]
fn destroy_preserves_every_other_entity() {
    let mut world = setup(4096);

    let entities: Vec<Entity> = (0..10).map(|i| spawn_pair(&mut world, i as f32, -(i as f32))).collect();

    assert!(world.destroy_entity(entities[3]));
    assert!(!world.is_entity_valid(entities[3]));

    for (i, &entity) in entities.iter().enumerate() {
        if i == 3 {
            continue;
        }
        assert_eq!(world.get_fragment::<Mass>(entity), Some(&Mass(i as f32)));
        assert_eq!(world.get_fragment::<Charge>(entity), Some(&Charge(-(i as f32))));
    }
}

#[test]
fn destroyed_index_is_reused_with_bumped_generation() {
    let mut world = setup(4096);

    let first = spawn_pair(&mut world, 1.0, 1.0);
    assert!(world.destroy_entity(first));
    let second = spawn_pair(&mut world, 2.0, 2.0);

    assert_eq!(second.index(), first.index());
    assert_eq!(second.generation(), first.generation().wrapping_add(1));
    assert!(!world.is_entity_valid(first));
    assert!(world.is_entity_valid(second));
}

#[test]
fn chunk_growth_and_swap_remove_stay_within_chunks() {
    // capacity clamps to 128 rows for this archetype
    let mut world = setup(128);

    let entities = world
        .create_entities(300, |i| {
            let mut bundle = Bundle::new();
            bundle.insert(Mass(i as f32));
            bundle.insert(Charge(0.0));
            bundle
        })
        .unwrap();

    let archetype_id = world.location(entities[0]).unwrap().archetype;
    let archetype = world.archetypes().archetype(archetype_id).unwrap();
    assert_eq!(archetype.chunk_capacity(), 128);
    assert_eq!(archetype.chunk_count(), 3);
    let occupancies: Vec<usize> = archetype.chunks().iter().map(|c| c.len()).collect();
    assert_eq!(occupancies, vec![128, 128, 44]);

    // entities 0..50 all sit in chunk 0
    for &entity in &entities[..50] {
        assert_eq!(world.location(entity).unwrap().chunk, 0);
    }
    for &entity in &entities[..50] {
        assert!(world.destroy_entity(entity));
    }

    // chunk 0 compacts from its own tail; other chunks are untouched
    let archetype = world.archetypes().archetype(archetype_id).unwrap();
    let occupancies: Vec<usize> = archetype.chunks().iter().map(|c| c.len()).collect();
    assert_eq!(occupancies, vec![78, 128, 44]);

    // every surviving entity still resolves and kept its value
    for &entity in &entities[50..] {
        let mass = world.get_fragment::<Mass>(entity).unwrap();
        assert!(mass.0 >= 50.0);
    }
}

#[test]
fn batch_creation_preallocates_exact_chunks() {
    let mut world = setup(128);

    world
        .create_entities(256, |_| {
            let mut bundle = Bundle::new();
            bundle.insert(Mass(0.0));
            bundle.insert(Charge(0.0));
            bundle
        })
        .unwrap();

    let archetype = world.archetypes().archetypes().last().unwrap();
    assert_eq!(archetype.chunk_count(), 2);
    assert_eq!(archetype.len(), 256);
}

#[test]
fn emptied_chunk_is_pooled_and_reused() {
    let mut world = setup(128);

    let entities = world
        .create_entities(128, |_| {
            let mut bundle = Bundle::new();
            bundle.insert(Mass(1.0));
            bundle.insert(Charge(1.0));
            bundle
        })
        .unwrap();

    let archetype_id = world.location(entities[0]).unwrap().archetype;
    assert_eq!(world.archetypes().archetype(archetype_id).unwrap().chunk_count(), 1);

    for &entity in &entities {
        world.destroy_entity(entity);
    }
    assert_eq!(world.archetypes().archetype(archetype_id).unwrap().len(), 0);

    // the emptied chunk is reused; no net chunk-count growth
    spawn_pair(&mut world, 2.0, 2.0);
    let archetype = world.archetypes().archetype(archetype_id).unwrap();
    assert_eq!(archetype.chunk_count(), 1);
    assert_eq!(archetype.len(), 1);
}

#[test]
fn stale_handles_are_silent_noops() {
    let mut world = setup(4096);

    let entity = spawn_pair(&mut world, 1.0, 1.0);
    assert!(world.destroy_entity(entity));

    assert!(!world.is_entity_valid(entity));
    assert!(!world.destroy_entity(entity));
    assert_eq!(world.get_fragment::<Mass>(entity), None);
    assert_eq!(world.get_fragment_mut::<Charge>(entity), None);
    assert!(!world.add_fragment_with(entity, Mass(5.0)).unwrap());
    assert!(!world.remove_fragment::<Mass>(entity).unwrap());
    assert!(world.location(entity).is_none());
}
