//! Map generation and spawn placement.
//!
//! The simulation consumes the map through a narrow surface: obstacle
//! blueprints to instantiate at match start, stair and building regions
//! queried per tick, and `random_position_for`, which hands out spawn
//! coordinates by entity kind, layer and team group. Picking a coordinate
//! outside the gas is the caller's job; the map knows nothing about the
//! zone.

use std::collections::HashMap;

use rand::Rng;

use crate::game::data::{Ammo, Item, Weapon};
use crate::game::entity::{EntityId, EntityKind, Layer};
use crate::game::physics::BodyId;
use crate::util::math::{Rect, Vec2};

/// World edge padding for spawns
const SPAWN_MARGIN: f32 = 24.0;
/// Teammates spawn within this radius of their group anchor
const GROUP_SPAWN_RADIUS: f32 = 12.0;

/// Obstacle type keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    Tree,
    Rock,
    Crate,
    BunkerWall,
}

#[derive(Debug, Clone, Copy)]
pub struct ObstacleDef {
    pub radius: f32,
    pub health: f32,
    pub destructible: bool,
    /// Height used by the projectile over-cover gate
    pub height: f32,
    pub bunker_wall: bool,
    /// Destroyed crates spill loot
    pub drops_loot: bool,
}

impl ObstacleKind {
    pub fn def(self) -> &'static ObstacleDef {
        match self {
            ObstacleKind::Tree => &ObstacleDef {
                radius: 1.6,
                health: 150.0,
                destructible: true,
                height: 10.0,
                bunker_wall: false,
                drops_loot: false,
            },
            ObstacleKind::Rock => &ObstacleDef {
                radius: 1.9,
                health: 250.0,
                destructible: true,
                height: 0.5,
                bunker_wall: false,
                drops_loot: false,
            },
            ObstacleKind::Crate => &ObstacleDef {
                radius: 2.25,
                health: 75.0,
                destructible: true,
                height: 0.5,
                bunker_wall: false,
                drops_loot: true,
            },
            ObstacleKind::BunkerWall => &ObstacleDef {
                radius: 2.0,
                health: 100.0,
                destructible: false,
                height: 10.0,
                bunker_wall: true,
                drops_loot: false,
            },
        }
    }
}

/// A placed obstacle entity
#[derive(Debug)]
pub struct Obstacle {
    pub id: EntityId,
    pub body: BodyId,
    pub kind: ObstacleKind,
    pub pos: Vec2,
    pub layer: Layer,
    pub health: f32,
    pub dead: bool,
}

impl Obstacle {
    pub fn damageable(&self) -> bool {
        self.kind.def().destructible && !self.dead
    }
}

/// What a loot pile contains
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "what")]
pub enum LootItem {
    Weapon(Weapon),
    Ammo(Ammo),
    Item(Item),
}

/// A loot pile on the ground
#[derive(Debug)]
pub struct Loot {
    pub id: EntityId,
    pub body: BodyId,
    pub item: LootItem,
    pub count: u32,
    pub layer: Layer,
    /// Position after the previous physics step, used for dirty tracking
    pub old_pos: Vec2,
}

pub const LOOT_RADIUS: f32 = 0.6;

/// A stair region transferring entities between layers
#[derive(Debug, Clone)]
pub struct Stair {
    pub region: Rect,
    /// Layer an entity takes while inside the region
    pub layer: Layer,
}

impl Stair {
    pub fn check(&self, pos: Vec2) -> bool {
        self.region.contains(pos)
    }
}

/// A building with an interior zoom region
#[derive(Debug, Clone)]
pub struct Building {
    pub region: Rect,
    pub layer: Layer,
    /// Zoom level forced while inside; 0 means none
    pub zoom: u8,
}

impl Building {
    /// Zoom override for a player standing at `pos`, or 0
    pub fn zoom_at(&self, pos: Vec2, layer: Layer) -> u8 {
        if self.layer.same_as(layer) && self.region.contains(pos) {
            self.zoom
        } else {
            0
        }
    }
}

/// Blueprint the match instantiates into obstacle entities
#[derive(Debug, Clone, Copy)]
pub struct ObstaclePlacement {
    pub kind: ObstacleKind,
    pub pos: Vec2,
    pub layer: Layer,
}

pub struct GameMap {
    pub width: f32,
    pub height: f32,
    pub obstacles: Vec<ObstaclePlacement>,
    pub stairs: Vec<Stair>,
    pub buildings: Vec<Building>,
    /// One spawn anchor per team group so squads land together
    group_anchors: HashMap<u32, Vec2>,
}

impl GameMap {
    /// Generate the standard map: scattered cover plus one bunker
    pub fn generate<R: Rng>(rng: &mut R, width: f32, height: f32) -> Self {
        let mut obstacles = Vec::new();

        let mut scatter = |rng: &mut R, kind: ObstacleKind, count: usize, out: &mut Vec<ObstaclePlacement>| {
            for _ in 0..count {
                let pos = Vec2::new(
                    rng.gen_range(SPAWN_MARGIN..width - SPAWN_MARGIN),
                    rng.gen_range(SPAWN_MARGIN..height - SPAWN_MARGIN),
                );
                out.push(ObstaclePlacement {
                    kind,
                    pos,
                    layer: Layer::GROUND,
                });
            }
        };

        scatter(rng, ObstacleKind::Tree, 220, &mut obstacles);
        scatter(rng, ObstacleKind::Rock, 90, &mut obstacles);
        scatter(rng, ObstacleKind::Crate, 140, &mut obstacles);

        // One bunker near the middle: entrance walls on the ground layer,
        // a stairwell, and an interior room below
        let bunker = Vec2::new(width * 0.5, height * 0.5);
        for offset in [
            Vec2::new(-4.0, -2.0),
            Vec2::new(-4.0, 2.0),
            Vec2::new(4.0, -2.0),
            Vec2::new(4.0, 2.0),
        ] {
            obstacles.push(ObstaclePlacement {
                kind: ObstacleKind::BunkerWall,
                pos: bunker.add(offset),
                layer: Layer::GROUND,
            });
        }

        let stairs = vec![Stair {
            region: Rect::from_center(bunker, 3.0, 2.0),
            layer: Layer::GROUND_STAIR,
        }];

        let buildings = vec![Building {
            region: Rect::from_center(bunker, 14.0, 10.0),
            layer: Layer::BUNKER,
            zoom: 1,
        }];

        Self {
            width,
            height,
            obstacles,
            stairs,
            buildings,
            group_anchors: HashMap::new(),
        }
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.width * 0.5, self.height * 0.5)
    }

    /// A spawn coordinate for the given entity kind.
    ///
    /// Players of the same group cluster around a shared anchor; loot and
    /// other kinds scatter freely. The caller validates the coordinate
    /// against the gas and retries if needed.
    pub fn random_position_for<R: Rng>(
        &mut self,
        kind: EntityKind,
        _layer: Layer,
        group: Option<u32>,
        rng: &mut R,
    ) -> Vec2 {
        if kind == EntityKind::Player {
            if let Some(group_id) = group {
                let (width, height) = (self.width, self.height);
                let anchor = *self.group_anchors.entry(group_id).or_insert_with(|| {
                    Vec2::new(
                        rng.gen_range(SPAWN_MARGIN..width - SPAWN_MARGIN),
                        rng.gen_range(SPAWN_MARGIN..height - SPAWN_MARGIN),
                    )
                });
                let jitter = Vec2::new(
                    rng.gen_range(-GROUP_SPAWN_RADIUS..GROUP_SPAWN_RADIUS),
                    rng.gen_range(-GROUP_SPAWN_RADIUS..GROUP_SPAWN_RADIUS),
                );
                return self.clamp_to_bounds(anchor.add(jitter));
            }
        }

        Vec2::new(
            rng.gen_range(SPAWN_MARGIN..self.width - SPAWN_MARGIN),
            rng.gen_range(SPAWN_MARGIN..self.height - SPAWN_MARGIN),
        )
    }

    fn clamp_to_bounds(&self, pos: Vec2) -> Vec2 {
        Vec2::new(
            pos.x.clamp(SPAWN_MARGIN, self.width - SPAWN_MARGIN),
            pos.y.clamp(SPAWN_MARGIN, self.height - SPAWN_MARGIN),
        )
    }

    /// Stair layer for a position, if any stair region contains it
    pub fn stair_layer_at(&self, pos: Vec2) -> Option<Layer> {
        self.stairs.iter().find(|s| s.check(pos)).map(|s| s.layer)
    }

    /// Interior zoom override for a position, or 0
    pub fn building_zoom_at(&self, pos: Vec2, layer: Layer) -> u8 {
        self.buildings
            .iter()
            .map(|b| b.zoom_at(pos, layer))
            .find(|z| *z != 0)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn generated_map_has_bunker_furniture() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let map = GameMap::generate(&mut rng, 720.0, 720.0);
        assert!(map
            .obstacles
            .iter()
            .any(|o| o.kind == ObstacleKind::BunkerWall));
        assert_eq!(map.stairs.len(), 1);
        assert_eq!(map.buildings.len(), 1);
    }

    #[test]
    fn spawns_stay_inside_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut map = GameMap::generate(&mut rng, 720.0, 720.0);
        for _ in 0..200 {
            let p = map.random_position_for(EntityKind::Player, Layer::GROUND, None, &mut rng);
            assert!(p.x >= SPAWN_MARGIN && p.x <= 720.0 - SPAWN_MARGIN);
            assert!(p.y >= SPAWN_MARGIN && p.y <= 720.0 - SPAWN_MARGIN);
        }
    }

    #[test]
    fn group_members_spawn_near_each_other() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut map = GameMap::generate(&mut rng, 720.0, 720.0);
        let a = map.random_position_for(EntityKind::Player, Layer::GROUND, Some(7), &mut rng);
        let b = map.random_position_for(EntityKind::Player, Layer::GROUND, Some(7), &mut rng);
        // both jittered around the same anchor
        assert!(a.distance_to(b) <= GROUP_SPAWN_RADIUS * 2.0 * std::f32::consts::SQRT_2 + 1e-3);
    }

    #[test]
    fn stair_region_reports_its_layer() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let map = GameMap::generate(&mut rng, 720.0, 720.0);
        let stair = &map.stairs[0];
        let inside = stair.region.min.add(
            stair.region.max.sub(stair.region.min).scale(0.5),
        );
        assert_eq!(map.stair_layer_at(inside), Some(Layer::GROUND_STAIR));
        assert_eq!(map.stair_layer_at(Vec2::new(1.0, 1.0)), None);
    }
}
