//! Combat resolution: bullets, damage records and explosions.
//!
//! Physics contacts only *queue* damage. A bullet is marked consumed the
//! moment its first contact is seen, so duplicate contact callbacks within
//! a tick can never apply damage twice; the queued records are flushed once
//! per tick at the tick boundary.

use rand::Rng;

use crate::game::data::{Ammo, BulletKind, Explosive, Item, Weapon, WeaponKind};
use crate::game::entity::{BodyTag, EntityId, EntityKind, Layer};
use crate::game::map::LootItem;
use crate::game::physics::{BodyId, ContactEvent};
use crate::game::player::SLOT_THROWABLE;
use crate::game::r#match::MatchState;
use crate::util::math::{random_point_inside_circle, Vec2};
use crate::ws::protocol::{ExplosionMsg, KillCause};

/// Initial speed of a thrown projectile at full charge
const THROW_SPEED: f32 = 18.0;
/// Projectile velocity decay per tick (rolling friction)
const PROJECTILE_DRAG: f32 = 0.985;
/// Starting arc height of a thrown projectile
const THROW_ARC_HEIGHT: f32 = 1.1;
/// Arc height lost per tick
const ARC_FALL_RATE: f32 = 0.006;

/// A bullet in flight
#[derive(Debug)]
pub struct Bullet {
    pub id: EntityId,
    pub body: BodyId,
    pub kind: BulletKind,
    /// Weak reference; the shooter may die mid-flight
    pub shooter: Option<EntityId>,
    pub source_weapon: Weapon,
    pub origin: Vec2,
    pub direction: Vec2,
    pub max_distance: f32,
    pub layer: Layer,
    /// Set on first contact; a consumed bullet can never damage again
    pub consumed: bool,
}

/// A thrown explosive rolling toward its fuse
#[derive(Debug)]
pub struct Projectile {
    pub id: EntityId,
    pub body: BodyId,
    pub weapon: Weapon,
    pub shooter: Option<EntityId>,
    pub layer: Layer,
    pub z_pos: f32,
    pub fuse_ticks_left: u32,
}

/// An explosion awaiting resolution this tick
#[derive(Debug)]
pub struct Explosion {
    pub id: EntityId,
    pub kind: Explosive,
    pub pos: Vec2,
    pub layer: Layer,
    pub source: Option<EntityId>,
}

/// Links a damaged entity, the damaging actor and the bullet, for one tick
#[derive(Debug)]
pub struct DamageRecord {
    pub target: BodyTag,
    pub damager: Option<EntityId>,
    pub bullet: EntityId,
}

impl MatchState {
    /// Spawn one bullet. Gun logic handles pellets by calling this per pellet.
    pub fn spawn_bullet(
        &mut self,
        shooter: EntityId,
        weapon: Weapon,
        kind: BulletKind,
        pos: Vec2,
        direction: Vec2,
        layer: Layer,
    ) -> EntityId {
        let def = kind.def();
        let id = self.ids.next_object_id();
        let tag = BodyTag::new(id, EntityKind::Bullet, layer);
        let body = self.world.add_body(tag, pos, def.radius, true);
        self.world.set_velocity(body, direction.scale(def.speed));

        self.bullets.insert(
            id,
            Bullet {
                id,
                body,
                kind,
                shooter: Some(shooter),
                source_weapon: weapon,
                origin: pos,
                direction,
                max_distance: def.max_distance,
                layer,
                consumed: false,
            },
        );
        self.new_bullets.push(id);
        id
    }

    /// Remove bullets that have traveled their full range. Types with an
    /// on-hit effect detonate at the terminal point instead of vanishing.
    pub fn expire_bullets(&mut self) {
        let mut expired: Vec<EntityId> = Vec::new();
        for bullet in self.bullets.values() {
            if bullet.consumed {
                // already owned by a damage record this tick
                continue;
            }
            let Some(pos) = self.world.position(bullet.body) else {
                expired.push(bullet.id);
                continue;
            };
            if pos.distance_to(bullet.origin) >= bullet.max_distance {
                expired.push(bullet.id);
            }
        }

        for id in expired {
            let Some(bullet) = self.bullets.remove(&id) else {
                continue;
            };
            if let Some(explosive) = bullet.kind.def().on_hit {
                let terminal = bullet
                    .origin
                    .add(bullet.direction.scale(bullet.max_distance));
                self.spawn_explosion(explosive, terminal, bullet.layer, bullet.shooter);
            }
            self.world.remove_body(bullet.body);
        }
    }

    /// Turn this step's begin-contact events into damage records.
    ///
    /// The consumed flag is taken here, immediately, so a second contact
    /// event for the same bullet in the same step is ignored.
    pub fn handle_contacts(&mut self, events: Vec<ContactEvent>) {
        for event in events {
            for (bullet_tag, other_tag) in [(event.a, event.b), (event.b, event.a)] {
                if bullet_tag.kind != EntityKind::Bullet {
                    continue;
                }
                let Some(bullet) = self.bullets.get_mut(&bullet_tag.id) else {
                    continue;
                };
                if bullet.consumed {
                    continue;
                }
                let traveled = self
                    .world
                    .position(bullet.body)
                    .map(|p| p.distance_to(bullet.origin))
                    .unwrap_or(f32::MAX);
                if traveled > bullet.max_distance {
                    continue;
                }
                bullet.consumed = true;
                self.damage_records.push(DamageRecord {
                    target: other_tag,
                    damager: bullet.shooter,
                    bullet: bullet_tag.id,
                });
            }
        }
    }

    /// Flush all damage records queued this tick, then clear the set.
    pub fn flush_damage_records(&mut self) {
        let records = std::mem::take(&mut self.damage_records);
        for record in records {
            let Some(bullet) = self.bullets.remove(&record.bullet) else {
                continue;
            };
            let def = bullet.kind.def();

            if let Some(explosive) = def.on_hit {
                let point = self
                    .world
                    .position(bullet.body)
                    .unwrap_or(bullet.origin);
                self.spawn_explosion(explosive, point, bullet.layer, bullet.shooter);
            }

            match record.target.kind {
                EntityKind::Player => {
                    self.damage_player(
                        record.target.id,
                        def.damage,
                        record.damager,
                        KillCause::Gun,
                    );
                }
                EntityKind::Obstacle => {
                    self.damage_obstacle(record.target.id, def.damage * def.obstacle_damage_mult);
                }
                _ => {}
            }

            self.world.remove_body(bullet.body);
        }
    }

    /// Advance thrown projectiles: drag, arc decay, fuse countdown.
    pub fn update_projectiles(&mut self) {
        let ids: Vec<EntityId> = self.projectiles.keys().copied().collect();
        let mut detonated: Vec<(EntityId, Vec2)> = Vec::new();

        for id in ids {
            let proj = match self.projectiles.get_mut(&id) {
                Some(p) => p,
                None => continue,
            };
            if let Some(body) = self.world.body_mut(proj.body) {
                body.vel = body.vel.scale(PROJECTILE_DRAG);
            }
            proj.z_pos = (proj.z_pos - ARC_FALL_RATE).max(0.0);
            let body = proj.body;
            let z = proj.z_pos;
            self.world.set_z_pos(body, z);

            if proj.fuse_ticks_left == 0 {
                let pos = self.world.position(body).unwrap_or(Vec2::ZERO);
                detonated.push((id, pos));
            } else {
                proj.fuse_ticks_left -= 1;
                self.partial_dirty.insert(id);
            }
        }

        for (id, pos) in detonated {
            let Some(proj) = self.projectiles.remove(&id) else {
                continue;
            };
            if let Some(explosive) = proj.weapon.def().explosive {
                self.spawn_explosion(explosive, pos, proj.layer, proj.shooter);
            }
            self.world.remove_body(proj.body);
            self.deleted_entities.insert(id);
        }
    }

    /// Queue an explosion for resolution later this same tick.
    pub fn spawn_explosion(
        &mut self,
        kind: Explosive,
        pos: Vec2,
        layer: Layer,
        source: Option<EntityId>,
    ) {
        let id = self.ids.next_object_id();
        self.explosions.push(Explosion {
            id,
            kind,
            pos,
            layer,
            source,
        });
    }

    /// Resolve every explosion created this tick, including chains spawned
    /// during resolution. Nothing is deferred to the next tick.
    pub fn resolve_explosions(&mut self) {
        while !self.explosions.is_empty() {
            let batch = std::mem::take(&mut self.explosions);
            for explosion in batch {
                self.explode(explosion);
            }
        }
    }

    fn explode(&mut self, explosion: Explosion) {
        let def = explosion.kind.def();

        self.explosion_events.push(ExplosionMsg {
            id: explosion.id.0,
            kind: explosion.kind,
            pos: [explosion.pos.x, explosion.pos.y],
            layer: explosion.layer,
        });

        // players: radial damage with falloff plus knockback
        let player_hits: Vec<(EntityId, Vec2, f32)> = self
            .players
            .values()
            .filter(|p| !p.dead && p.layer.same_as(explosion.layer))
            .filter_map(|p| {
                let pos = self.world.position(p.body)?;
                let dist = pos.distance_to(explosion.pos);
                (dist <= def.outer_radius).then_some((p.id, pos, dist))
            })
            .collect();

        for (pid, pos, dist) in player_hits {
            let damage = falloff_damage(def.max_damage, def.min_damage, def.inner_radius, def.outer_radius, dist);
            let away = pos.sub(explosion.pos).normalized();
            if let Some(player) = self.players.get(&pid) {
                self.world
                    .apply_impulse(player.body, away.scale(def.knockback));
            }
            self.damage_player(pid, damage, explosion.source, KillCause::Explosion);
        }

        // obstacles on the same layer
        let obstacle_hits: Vec<(EntityId, f32)> = self
            .obstacles
            .values()
            .filter(|o| o.damageable() && o.layer.same_as(explosion.layer))
            .filter_map(|o| {
                let dist = o.pos.distance_to(explosion.pos);
                (dist <= def.outer_radius).then_some((o.id, dist))
            })
            .collect();
        for (oid, dist) in obstacle_hits {
            let damage = falloff_damage(def.max_damage, def.min_damage, def.inner_radius, def.outer_radius, dist)
                * def.obstacle_damage_mult;
            self.damage_obstacle(oid, damage);
        }

        if let Some(chain) = def.chain {
            for _ in 0..chain.count {
                let child_pos =
                    random_point_inside_circle(&mut self.rng, explosion.pos, chain.spread_radius);
                self.spawn_explosion(chain.kind, child_pos, explosion.layer, explosion.source);
            }
        }
    }

    /// Apply damage to an obstacle; destroyed crates spill loot.
    pub fn damage_obstacle(&mut self, id: EntityId, amount: f32) {
        let Some(obstacle) = self.obstacles.get_mut(&id) else {
            return;
        };
        if !obstacle.damageable() {
            return;
        }
        obstacle.health -= amount;
        if obstacle.health > 0.0 {
            self.partial_dirty.insert(id);
            return;
        }

        obstacle.dead = true;
        obstacle.health = 0.0;
        let kind = obstacle.kind;
        let pos = obstacle.pos;
        let layer = obstacle.layer;
        let body = obstacle.body;
        self.world.remove_body(body);
        self.full_dirty.insert(id);
        self.update_objects = true;

        if kind.def().drops_loot {
            self.spill_crate_loot(pos, layer);
        }
    }

    fn spill_crate_loot(&mut self, pos: Vec2, layer: Layer) {
        let roll: u8 = self.rng.gen_range(0..4);
        let item = match roll {
            0 => LootItem::Weapon(random_gun(&mut self.rng)),
            1 => LootItem::Item(Item::Bandage),
            2 => LootItem::Ammo(Ammo::NineMm),
            _ => LootItem::Ammo(Ammo::FiveFiveSix),
        };
        let count = match item {
            LootItem::Weapon(_) => 1,
            LootItem::Item(_) => 3,
            LootItem::Ammo(_) => 30,
        };
        self.spawn_loot(item, count, pos, layer);
    }

    /// Melee swing: nearest damageable target inside the weapon arc.
    pub fn use_melee(&mut self, pid: EntityId) {
        let Some(player) = self.players.get(&pid) else {
            return;
        };
        let def = player.active_weapon().def();
        if def.kind != WeaponKind::Melee {
            return;
        }
        let Some(origin) = self.world.position(player.body) else {
            return;
        };
        let aim = player.aim_dir;
        let layer = player.layer;
        let reach = origin.add(aim.scale(def.melee_range * 0.5));
        let range = def.melee_range;
        let damage = def.melee_damage;

        // nearest player first, else nearest obstacle
        let victim = self
            .players
            .values()
            .filter(|p| p.id != pid && !p.dead && p.layer.same_as(layer))
            .filter_map(|p| {
                let pos = self.world.position(p.body)?;
                let dist = pos.distance_to(reach);
                (dist <= range).then_some((p.id, dist))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((victim_id, _)) = victim {
            self.damage_player(victim_id, damage, Some(pid), KillCause::Melee);
            return;
        }

        let obstacle = self
            .obstacles
            .values()
            .filter(|o| o.damageable() && o.layer.same_as(layer))
            .filter_map(|o| {
                let dist = o.pos.distance_to(reach);
                (dist <= range + o.kind.def().radius).then_some((o.id, dist))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((oid, _)) = obstacle {
            self.damage_obstacle(oid, damage);
        }
    }

    /// Release a cooked throwable. Cook time already burned comes off the fuse.
    pub fn throw_projectile(&mut self, pid: EntityId, cook_ticks: u32) {
        let Some(player) = self.players.get(&pid) else {
            return;
        };
        let Some(weapon) = player.weapons[SLOT_THROWABLE].weapon else {
            return;
        };
        let def = weapon.def();
        if def.kind != WeaponKind::Throwable {
            return;
        }
        let Some(origin) = self.world.position(player.body) else {
            return;
        };
        let aim = player.aim_dir;
        let layer = player.layer;

        let fuse_total = (def.fuse_time * crate::util::time::SIMULATION_TPS as f32) as u32;
        let fuse_left = fuse_total.saturating_sub(cook_ticks);

        let id = self.ids.next_object_id();
        let mut tag = BodyTag::new(id, EntityKind::Projectile, layer);
        tag.z_pos = THROW_ARC_HEIGHT;
        let body = self.world.add_body(tag, origin.add(aim.scale(1.0)), 0.35, true);
        self.world.set_velocity(body, aim.scale(THROW_SPEED));

        self.projectiles.insert(
            id,
            Projectile {
                id,
                body,
                weapon,
                shooter: Some(pid),
                layer,
                z_pos: THROW_ARC_HEIGHT,
                fuse_ticks_left: fuse_left,
            },
        );
        self.full_dirty.insert(id);
        self.update_objects = true;
    }
}

/// Linear falloff between the inner and outer blast radius
fn falloff_damage(max: f32, min: f32, inner: f32, outer: f32, dist: f32) -> f32 {
    if dist <= inner {
        max
    } else if dist >= outer {
        min
    } else {
        let t = (dist - inner) / (outer - inner);
        max + (min - max) * t
    }
}

fn random_gun<R: Rng>(rng: &mut R) -> Weapon {
    const GUNS: [Weapon; 6] = [
        Weapon::Pistol,
        Weapon::Smg,
        Weapon::AssaultRifle,
        Weapon::BurstRifle,
        Weapon::PumpShotgun,
        Weapon::BoltRifle,
    ];
    GUNS[rng.gen_range(0..GUNS.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falloff_is_linear_between_radii() {
        assert_eq!(falloff_damage(100.0, 20.0, 2.0, 6.0, 1.0), 100.0);
        assert_eq!(falloff_damage(100.0, 20.0, 2.0, 6.0, 6.0), 20.0);
        assert_eq!(falloff_damage(100.0, 20.0, 2.0, 6.0, 10.0), 20.0);
        let mid = falloff_damage(100.0, 20.0, 2.0, 6.0, 4.0);
        assert!((mid - 60.0).abs() < 1e-4);
    }
}
