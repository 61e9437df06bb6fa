//! Physics facade: a steppable world of circle bodies.
//!
//! The simulation consumes physics through this boundary only: body
//! creation/destruction, velocity writes, a fixed-step `step` that returns
//! begin-contact events, and nothing else. Filtering is delegated to the
//! pure [`crate::game::entity::should_collide`] predicate so the rules stay
//! testable without a world.
//!
//! Positional correction is tuned per pair: pairs involving loot are pushed
//! apart by a small fraction of their overlap each step so fresh drops
//! spread out over a few ticks, while player/obstacle pairs are separated
//! fully to keep movement against walls stable. Bullet pairs only report
//! contacts; bullets never get pushed.

use std::collections::{HashMap, HashSet};

use crate::game::entity::{should_collide, BodyTag, EntityKind, Layer};
use crate::util::math::Vec2;

/// Handle to a body inside the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(u32);

/// Fraction of the overlap resolved per step for pairs involving loot
const LOOT_CORRECTION: f32 = 0.055;

#[derive(Debug, Clone)]
pub struct Body {
    pub tag: BodyTag,
    pub pos: Vec2,
    pub vel: Vec2,
    pub radius: f32,
    /// Static bodies never move and never get corrected
    pub dynamic: bool,
}

/// A fixture pair that began touching during the last step
#[derive(Debug, Clone)]
pub struct ContactEvent {
    pub a: BodyTag,
    pub b: BodyTag,
    pub point: Vec2,
}

#[derive(Debug, Default)]
pub struct PhysicsWorld {
    bodies: HashMap<BodyId, Body>,
    next_id: u32,
    /// Pairs overlapping after the previous step; used to emit begin-contact
    /// exactly once per touch
    touching: HashSet<(BodyId, BodyId)>,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_body(&mut self, tag: BodyTag, pos: Vec2, radius: f32, dynamic: bool) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.bodies.insert(
            id,
            Body {
                tag,
                pos,
                vel: Vec2::ZERO,
                radius,
                dynamic,
            },
        );
        id
    }

    pub fn remove_body(&mut self, id: BodyId) {
        self.bodies.remove(&id);
        self.touching.retain(|(a, b)| *a != id && *b != id);
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.bodies.get_mut(&id)
    }

    pub fn position(&self, id: BodyId) -> Option<Vec2> {
        self.bodies.get(&id).map(|b| b.pos)
    }

    pub fn set_velocity(&mut self, id: BodyId, vel: Vec2) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.vel = vel;
        }
    }

    pub fn set_position(&mut self, id: BodyId, pos: Vec2) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.pos = pos;
        }
    }

    /// Keep a body's filter tag in sync with its entity (layer changes,
    /// projectile arc height)
    pub fn set_layer(&mut self, id: BodyId, layer: Layer) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.tag.layer = layer;
        }
    }

    pub fn set_z_pos(&mut self, id: BodyId, z_pos: f32) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.tag.z_pos = z_pos;
        }
    }

    /// Apply an instantaneous velocity change (explosion knockback)
    pub fn apply_impulse(&mut self, id: BodyId, impulse: Vec2) {
        if let Some(body) = self.bodies.get_mut(&id) {
            body.vel = body.vel.add(impulse);
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Advance the world by one fixed sub-step.
    ///
    /// Integrates dynamic bodies, resolves overlap for filtered pairs and
    /// returns the pairs that began touching during this step.
    pub fn step(&mut self, dt: f32) -> Vec<ContactEvent> {
        for body in self.bodies.values_mut() {
            if body.dynamic {
                body.pos = body.pos.add(body.vel.scale(dt));
            }
        }

        // Sorted ids keep pair iteration order stable across runs
        let mut ids: Vec<BodyId> = self.bodies.keys().copied().collect();
        ids.sort_unstable();

        let mut events = Vec::new();
        let mut now_touching = HashSet::new();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (id_a, id_b) = (ids[i], ids[j]);
                let (tag_a, tag_b, overlap, normal, mid) = {
                    let a = &self.bodies[&id_a];
                    let b = &self.bodies[&id_b];
                    if !should_collide(&a.tag, &b.tag) {
                        continue;
                    }
                    let delta = b.pos.sub(a.pos);
                    let dist = delta.length();
                    let overlap = a.radius + b.radius - dist;
                    if overlap <= 0.0 {
                        continue;
                    }
                    let normal = if dist < 1e-6 {
                        Vec2::new(1.0, 0.0)
                    } else {
                        delta.scale(1.0 / dist)
                    };
                    let mid = a.pos.add(delta.scale(0.5));
                    (a.tag, b.tag, overlap, normal, mid)
                };

                now_touching.insert((id_a, id_b));
                if !self.touching.contains(&(id_a, id_b)) {
                    events.push(ContactEvent {
                        a: tag_a,
                        b: tag_b,
                        point: mid,
                    });
                }

                // Bullets are sensors: contact only, no push
                if tag_a.kind == EntityKind::Bullet || tag_b.kind == EntityKind::Bullet {
                    continue;
                }

                let factor = if tag_a.kind == EntityKind::Loot || tag_b.kind == EntityKind::Loot {
                    LOOT_CORRECTION
                } else {
                    1.0
                };
                self.separate(id_a, id_b, normal, overlap * factor);
            }
        }

        self.touching = now_touching;
        events
    }

    /// Push a pair apart along the contact normal. Static bodies absorb
    /// nothing; two dynamic bodies split the push.
    fn separate(&mut self, id_a: BodyId, id_b: BodyId, normal: Vec2, push: f32) {
        let a_dynamic = self.bodies[&id_a].dynamic;
        let b_dynamic = self.bodies[&id_b].dynamic;

        match (a_dynamic, b_dynamic) {
            (true, true) => {
                let half = push * 0.5;
                if let Some(a) = self.bodies.get_mut(&id_a) {
                    a.pos = a.pos.sub(normal.scale(half));
                }
                if let Some(b) = self.bodies.get_mut(&id_b) {
                    b.pos = b.pos.add(normal.scale(half));
                }
            }
            (true, false) => {
                if let Some(a) = self.bodies.get_mut(&id_a) {
                    a.pos = a.pos.sub(normal.scale(push));
                }
            }
            (false, true) => {
                if let Some(b) = self.bodies.get_mut(&id_b) {
                    b.pos = b.pos.add(normal.scale(push));
                }
            }
            (false, false) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::EntityId;

    fn tag(id: u32, kind: EntityKind) -> BodyTag {
        BodyTag::new(EntityId(id), kind, Layer::GROUND)
    }

    #[test]
    fn begin_contact_fires_once_per_touch() {
        let mut world = PhysicsWorld::new();
        let bullet = world.add_body(tag(1, EntityKind::Bullet), Vec2::new(0.0, 0.0), 0.1, true);
        world.set_velocity(bullet, Vec2::new(10.0, 0.0));
        world.add_body(tag(2, EntityKind::Obstacle), Vec2::new(0.5, 0.0), 0.5, false);

        let first = world.step(0.05);
        assert_eq!(first.len(), 1);

        // still overlapping next step: no duplicate event
        let second = world.step(0.0);
        assert!(second.is_empty());
    }

    #[test]
    fn filtered_pairs_produce_no_contact() {
        let mut world = PhysicsWorld::new();
        world.add_body(tag(1, EntityKind::Player), Vec2::ZERO, 1.0, true);
        world.add_body(tag(2, EntityKind::Player), Vec2::new(0.5, 0.0), 1.0, true);
        assert!(world.step(0.01).is_empty());
    }

    #[test]
    fn player_is_pushed_fully_out_of_obstacles() {
        let mut world = PhysicsWorld::new();
        let player = world.add_body(tag(1, EntityKind::Player), Vec2::new(0.0, 0.0), 1.0, true);
        world.add_body(tag(2, EntityKind::Obstacle), Vec2::new(1.5, 0.0), 1.0, false);

        world.step(0.0);
        let pos = world.position(player).unwrap();
        let dist = pos.distance_to(Vec2::new(1.5, 0.0));
        assert!(dist >= 2.0 - 1e-4, "player still inside obstacle: {dist}");
    }

    #[test]
    fn loot_separates_gradually() {
        let mut world = PhysicsWorld::new();
        let a = world.add_body(tag(1, EntityKind::Loot), Vec2::new(0.0, 0.0), 0.5, true);
        let b = world.add_body(tag(2, EntityKind::Loot), Vec2::new(0.2, 0.0), 0.5, true);

        world.step(0.0);
        let gap_one = world.position(b).unwrap().x - world.position(a).unwrap().x;
        assert!(gap_one > 0.2, "loot did not move apart");
        assert!(gap_one < 1.0, "loot snapped apart in a single step");

        // repeated steps keep spreading them
        for _ in 0..200 {
            world.step(0.0);
        }
        let gap_final = world.position(b).unwrap().x - world.position(a).unwrap().x;
        assert!(gap_final >= 1.0 - 1e-3);
    }

    #[test]
    fn static_obstacles_never_move() {
        let mut world = PhysicsWorld::new();
        let rock = world.add_body(tag(1, EntityKind::Obstacle), Vec2::ZERO, 1.0, false);
        let player = world.add_body(tag(2, EntityKind::Player), Vec2::new(0.5, 0.0), 1.0, true);
        let _ = player;
        world.step(0.01);
        assert_eq!(world.position(rock).unwrap(), Vec2::ZERO);
    }

    #[test]
    fn removing_a_body_clears_its_touch_state() {
        let mut world = PhysicsWorld::new();
        let bullet = world.add_body(tag(1, EntityKind::Bullet), Vec2::ZERO, 0.1, true);
        world.add_body(tag(2, EntityKind::Obstacle), Vec2::new(0.05, 0.0), 0.5, false);
        assert_eq!(world.step(0.0).len(), 1);
        world.remove_body(bullet);
        assert_eq!(world.body_count(), 1);
        assert!(world.step(0.0).is_empty());
    }
}
