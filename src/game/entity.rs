//! Entity identity, layers and the collision-filter matrix.
//!
//! Every simulation object gets a stable `EntityId` unique within its match.
//! Cross-references between entities (shooter on a bullet, spectate targets,
//! the kill leader) are stored as ids and resolved through the match
//! collections at use time, so a reference to a removed entity simply fails
//! to resolve instead of dangling.

use serde::{Deserialize, Serialize};

/// Stable per-match entity identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Simulation object variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Loot,
    Bullet,
    Projectile,
    Explosion,
    Obstacle,
}

/// Allocates entity and group ids for one match
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_object: u32,
    next_group: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_object_id(&mut self) -> EntityId {
        let id = EntityId(self.next_object);
        self.next_object += 1;
        id
    }

    pub fn next_group_id(&mut self) -> u32 {
        let id = self.next_group;
        self.next_group += 1;
        id
    }
}

/// Cross-level plane bitmask.
///
/// Bit 0 selects the plane (ground or bunker interior), bit 1 marks a stair
/// transition where both planes are active at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Layer(pub u8);

impl Layer {
    pub const GROUND: Self = Self(0);
    pub const BUNKER: Self = Self(1);
    pub const GROUND_STAIR: Self = Self(2);
    pub const BUNKER_STAIR: Self = Self(3);

    /// Two layers interact when their planes match or both are on a stair
    pub fn same_as(self, other: Self) -> bool {
        (self.0 & 0x1) == (other.0 & 0x1) || (self.0 & 0x2 != 0 && other.0 & 0x2 != 0)
    }

    pub fn on_stair(self) -> bool {
        self.0 & 0x2 != 0
    }

    /// A layer off its stair decays back to its plain plane
    pub fn off_stair(self) -> Self {
        Self(self.0 & 0x1)
    }
}

/// Everything the collision filter needs to know about a physics body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyTag {
    pub id: EntityId,
    pub kind: EntityKind,
    pub layer: Layer,
    /// Invisible bunker entrance walls; ignored by players inside the stairwell
    pub bunker_wall: bool,
    /// Obstacle height, used to gate thrown projectiles flying over cover
    pub height: f32,
    /// Current altitude of a thrown projectile
    pub z_pos: f32,
}

impl BodyTag {
    pub fn new(id: EntityId, kind: EntityKind, layer: Layer) -> Self {
        Self {
            id,
            kind,
            layer,
            bunker_wall: false,
            height: f32::MAX,
            z_pos: 0.0,
        }
    }
}

/// What a given entity kind is willing to collide with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollidesWith {
    pub player: bool,
    pub obstacle: bool,
    pub bullet: bool,
    pub loot: bool,
    pub projectile: bool,
}

impl CollidesWith {
    pub const NONE: Self = Self {
        player: false,
        obstacle: false,
        bullet: false,
        loot: false,
        projectile: false,
    };

    pub fn allows(self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Player => self.player,
            EntityKind::Obstacle => self.obstacle,
            EntityKind::Bullet => self.bullet,
            EntityKind::Loot => self.loot,
            EntityKind::Projectile => self.projectile,
            EntityKind::Explosion => false,
        }
    }
}

/// Role-based collidability per entity kind.
///
/// Players collide with obstacles but not with each other or with loot.
/// Bullets hit players and obstacles only. Loot piles up against obstacles
/// and other loot. Thrown projectiles bounce off obstacles and players,
/// subject to the height gate below.
pub fn collides_with(kind: EntityKind) -> CollidesWith {
    match kind {
        EntityKind::Player => CollidesWith {
            player: false,
            obstacle: true,
            bullet: true,
            loot: false,
            projectile: true,
        },
        EntityKind::Obstacle => CollidesWith {
            player: true,
            obstacle: false,
            bullet: true,
            loot: true,
            projectile: true,
        },
        EntityKind::Bullet => CollidesWith {
            player: true,
            obstacle: true,
            bullet: false,
            loot: false,
            projectile: false,
        },
        EntityKind::Loot => CollidesWith {
            player: false,
            obstacle: true,
            bullet: false,
            loot: true,
            projectile: false,
        },
        EntityKind::Projectile => CollidesWith {
            player: true,
            obstacle: true,
            bullet: false,
            loot: false,
            projectile: false,
        },
        EntityKind::Explosion => CollidesWith::NONE,
    }
}

/// The collision-filter predicate consulted for every candidate fixture pair.
///
/// Pure function of the two body tags, so the rules are testable without a
/// physics world.
pub fn should_collide(a: &BodyTag, b: &BodyTag) -> bool {
    if !a.layer.same_as(b.layer) {
        return false;
    }

    // Players inside a stairwell pass through the invisible bunker walls
    if a.kind == EntityKind::Player && b.kind == EntityKind::Obstacle && a.layer.on_stair() && b.bunker_wall {
        return false;
    }
    if b.kind == EntityKind::Player && a.kind == EntityKind::Obstacle && b.layer.on_stair() && a.bunker_wall {
        return false;
    }

    // Thrown projectiles clear anything shorter than their current arc
    if a.kind == EntityKind::Projectile && collides_with(b.kind).projectile {
        return a.z_pos < b.height;
    }
    if b.kind == EntityKind::Projectile && collides_with(a.kind).projectile {
        return b.z_pos < a.height;
    }

    collides_with(b.kind).allows(a.kind) && collides_with(a.kind).allows(b.kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(kind: EntityKind, layer: Layer) -> BodyTag {
        BodyTag::new(EntityId(0), kind, layer)
    }

    #[test]
    fn same_layer_rules() {
        assert!(Layer::GROUND.same_as(Layer::GROUND));
        assert!(!Layer::GROUND.same_as(Layer::BUNKER));
        // both on stairs interact regardless of plane
        assert!(Layer::GROUND_STAIR.same_as(Layer::BUNKER_STAIR));
        // stair layers still interact with their own plane
        assert!(Layer::GROUND_STAIR.same_as(Layer::GROUND));
        assert!(!Layer::GROUND_STAIR.same_as(Layer::BUNKER));
    }

    #[test]
    fn collision_matrix_truth_table() {
        use EntityKind::*;
        let expect = [
            (Player, Player, false),
            (Player, Obstacle, true),
            (Player, Loot, false),
            (Player, Bullet, true),
            (Bullet, Obstacle, true),
            (Bullet, Bullet, false),
            (Bullet, Loot, false),
            (Loot, Loot, true),
            (Loot, Obstacle, true),
            (Projectile, Obstacle, true),
            (Projectile, Loot, false),
        ];
        for (a, b, want) in expect {
            let got = should_collide(&tag(a, Layer::GROUND), &tag(b, Layer::GROUND));
            assert_eq!(got, want, "{a:?} vs {b:?}");
            let sym = should_collide(&tag(b, Layer::GROUND), &tag(a, Layer::GROUND));
            assert_eq!(got, sym, "matrix must be symmetric for {a:?}/{b:?}");
        }
    }

    #[test]
    fn cross_layer_never_collides() {
        let player = tag(EntityKind::Player, Layer::GROUND);
        let obstacle = tag(EntityKind::Obstacle, Layer::BUNKER);
        assert!(!should_collide(&player, &obstacle));
    }

    #[test]
    fn stairwell_player_ignores_bunker_walls() {
        let player = tag(EntityKind::Player, Layer::GROUND_STAIR);
        let mut wall = tag(EntityKind::Obstacle, Layer::GROUND_STAIR);
        wall.bunker_wall = true;
        assert!(!should_collide(&player, &wall));
        assert!(!should_collide(&wall, &player));

        // normal obstacles still block
        let rock = tag(EntityKind::Obstacle, Layer::GROUND_STAIR);
        assert!(should_collide(&player, &rock));
    }

    #[test]
    fn projectile_clears_low_cover() {
        let mut nade = tag(EntityKind::Projectile, Layer::GROUND);
        nade.z_pos = 1.2;
        let mut low_wall = tag(EntityKind::Obstacle, Layer::GROUND);
        low_wall.height = 0.8;
        assert!(!should_collide(&nade, &low_wall));

        let mut tall_wall = tag(EntityKind::Obstacle, Layer::GROUND);
        tall_wall.height = 2.0;
        assert!(should_collide(&nade, &tall_wall));
    }

    #[test]
    fn id_allocator_is_monotonic() {
        let mut alloc = IdAllocator::new();
        let a = alloc.next_object_id();
        let b = alloc.next_object_id();
        assert!(b > a);
        assert_ne!(alloc.next_group_id(), alloc.next_group_id());
    }
}
