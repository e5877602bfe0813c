use fragment_engine::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Unit(u32);

#[derive(Clone, Debug, PartialEq)]
struct Faction(String);

fn setup() -> EntityManager {
    register_fragment::<Unit>();
    register_shared_fragment::<Faction>();
    EntityManager::new()
}

fn spawn_unit(world: &mut EntityManager, id: u32) -> Entity {
    let mut bundle = Bundle::new();
    bundle.insert(Unit(id));
    world.create_entity(bundle).unwrap()
}

#[test]
fn shared_values_do_not_split_archetypes() {
    let mut world = setup();

    let red = spawn_unit(&mut world, 1);
    let blue = spawn_unit(&mut world, 2);

    world.set_shared_fragment(red, Faction("red".into())).unwrap();
    world.set_shared_fragment(blue, Faction("blue".into())).unwrap();

    // distinct shared values, one signature, one archetype
    let red_arch = world.location(red).unwrap().archetype;
    let blue_arch = world.location(blue).unwrap().archetype;
    assert_eq!(red_arch, blue_arch);

    assert_eq!(world.shared_value_of::<Faction>(red), Some(&Faction("red".into())));
    assert_eq!(world.shared_value_of::<Faction>(blue), Some(&Faction("blue".into())));
}

#[test]
fn groups_are_reference_counted_and_released_at_zero() {
    let mut world = setup();

    let a = spawn_unit(&mut world, 1);
    let b = spawn_unit(&mut world, 2);

    let key = world.insert_shared_value(Faction("green".into()));
    world.assign_shared_key(a, key).unwrap();
    world.assign_shared_key(b, key).unwrap();

    assert_eq!(world.shared().ref_count(key), 2);
    assert_eq!(world.shared_value_of::<Faction>(a), world.shared_value_of::<Faction>(b));

    world.destroy_entity(a);
    assert_eq!(world.shared().ref_count(key), 1);

    world.destroy_entity(b);
    assert!(!world.shared().is_live(key));
}

#[test]
fn replace_commits_the_whole_value() {
    let mut world = setup();

    let a = spawn_unit(&mut world, 1);
    let b = spawn_unit(&mut world, 2);

    let key = world.insert_shared_value(Faction("old".into()));
    world.assign_shared_key(a, key).unwrap();
    world.assign_shared_key(b, key).unwrap();

    assert!(world.replace_shared_value(key, Faction("new".into())));

    // both group members observe the committed replacement
    assert_eq!(world.shared_value_of::<Faction>(a), Some(&Faction("new".into())));
    assert_eq!(world.shared_value_of::<Faction>(b), Some(&Faction("new".into())));
}

#[test]
fn queries_can_require_shared_membership() {
    let mut world = setup();

    let grouped = spawn_unit(&mut world, 1);
    spawn_unit(&mut world, 2); // never grouped

    world.set_shared_fragment(grouped, Faction("red".into())).unwrap();

    let query = Query::builder()
        .read::<Unit>().unwrap()
        .shared::<Faction>().unwrap()
        .build()
        .unwrap();

    let mut matched = Vec::new();
    query.for_each_chunk(&mut world, |view| {
        matched.extend_from_slice(view.entities());
    });
    assert_eq!(matched, vec![grouped]);
}

#[test]
fn removing_shared_fragment_releases_the_group() {
    let mut world = setup();

    let a = spawn_unit(&mut world, 1);
    let key = world.insert_shared_value(Faction("solo".into()));
    world.assign_shared_key(a, key).unwrap();
    assert_eq!(world.shared().ref_count(key), 1);

    world.remove_fragment::<Faction>(a).unwrap();

    assert!(!world.has_fragment::<Faction>(a));
    assert!(!world.shared().is_live(key));
    assert_eq!(world.shared_value_of::<Faction>(a), None);
}
