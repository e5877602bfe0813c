#![allow(dead_code)]

use fragment_engine::prelude::*;

pub const AGENTS_SMALL: usize = 100_000;
pub const AGENTS_MED: usize = 1_000_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}

pub fn init_fragments() {
    register_fragment::<Position>();
    register_fragment::<Velocity>();
    register_fragment::<Wealth>();
}

pub fn make_world(agents: usize) -> Engine {
    let mut world = EntityManager::new();
    world
        .create_entities(agents, |i| {
            let mut bundle = Bundle::new();
            bundle.insert(Position { x: i as f32, y: 0.0 });
            bundle.insert(Velocity { dx: 1.0, dy: 0.5 });
            bundle.insert(Wealth { value: 100.0 });
            bundle
        })
        .expect("world population failed");
    Engine::new(world)
}
