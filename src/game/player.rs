//! Player state and the per-player action state machine.
//!
//! Each living player is advanced once per tick: movement intent, loot
//! pickup, health and boost regeneration, the timed action (item use,
//! reload, revive), weapon fire and throwable cooking, animation timers,
//! stair transitions and building zoom. Every block is independent; a
//! player that cannot complete one step never blocks the others.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::data::{
    boost_heal_rate, Ammo, FireMode, Item, ItemEffect, Weapon, WeaponKind,
};
use crate::game::entity::{EntityId, Layer};
use crate::game::map::{LootItem, LOOT_RADIUS};
use crate::game::physics::BodyId;
use crate::game::r#match::MatchState;
use crate::game::PlayerSocket;
use crate::util::math::Vec2;
use crate::util::time::{tick_delta, SIMULATION_TPS};
use crate::ws::protocol::KillCause;

pub const MAX_HEALTH: f32 = 100.0;
pub const MAX_BOOST: f32 = 100.0;
pub const PLAYER_RADIUS: f32 = 1.0;
pub const BASE_SPEED: f32 = 12.0;
const DOWNED_SPEED: f32 = 4.0;
/// Speed multiplier while using an item or cooking a throwable
const BUSY_SPEED_MULT: f32 = 0.5;
/// Boost drained per second
const BOOST_DECAY: f32 = 0.5;
/// Health lost per second while downed and not being revived
const DOWNED_BLEED: f32 = 2.0;

pub const REVIVE_HEALTH: f32 = 24.0;
pub const REVIVE_RANGE: f32 = 5.0;
pub const REVIVE_DURATION: f32 = 8.0;

/// Loot is picked up within this distance beyond the player's own radius
const PICKUP_RANGE: f32 = 1.5;

/// Inventory keys: ammunition and consumables share one map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "what")]
pub enum InvKey {
    Ammo(Ammo),
    Item(Item),
}

impl InvKey {
    pub fn max_stack(self) -> u32 {
        match self {
            InvKey::Ammo(a) => a.def().max_stack,
            InvKey::Item(i) => i.def().max_stack,
        }
    }
}

/// One of the four weapon slots
#[derive(Debug, Clone, Copy)]
pub struct WeaponSlot {
    pub weapon: Option<Weapon>,
    /// Rounds in the clip; meaningless for melee and throwables
    pub clip: u32,
    pub cooldown_until: Instant,
}

impl WeaponSlot {
    fn empty(now: Instant) -> Self {
        Self {
            weapon: None,
            clip: 0,
            cooldown_until: now,
        }
    }
}

pub const SLOT_PRIMARY: usize = 0;
pub const SLOT_SECONDARY: usize = 1;
pub const SLOT_MELEE: usize = 2;
pub const SLOT_THROWABLE: usize = 3;

/// The timed action a player is committed to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    None,
    UseItem { item: Item, until: Instant },
    Reload { until: Instant },
    Revive { target: EntityId, until: Instant },
}

impl Action {
    pub fn is_none(&self) -> bool {
        matches!(self, Action::None)
    }

    fn deadline(&self) -> Option<Instant> {
        match self {
            Action::None => None,
            Action::UseItem { until, .. } | Action::Reload { until } | Action::Revive { until, .. } => {
                Some(*until)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimKind {
    None,
    Cook,
    Melee,
}

/// Visible animation state, driven by tick counters
#[derive(Debug, Clone, Copy)]
pub struct Anim {
    pub active: bool,
    pub kind: AnimKind,
    pub seq: u8,
    pub time: i32,
    pub duration: u32,
}

impl Anim {
    pub fn idle() -> Self {
        Self {
            active: false,
            kind: AnimKind::None,
            seq: 0,
            time: -1,
            duration: 0,
        }
    }
}

/// Movement intent decoded from the latest input message
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveIntent {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    /// Analog vector from touch clients; overrides the digital flags
    pub touch_dir: Option<Vec2>,
}

impl MoveIntent {
    pub fn direction(&self) -> Vec2 {
        if let Some(dir) = self.touch_dir {
            return dir.normalized();
        }
        let mut d = Vec2::ZERO;
        if self.left {
            d.x -= 1.0;
        }
        if self.right {
            d.x += 1.0;
        }
        if self.up {
            d.y -= 1.0;
        }
        if self.down {
            d.y += 1.0;
        }
        d.normalized()
    }
}

pub struct Player {
    pub id: EntityId,
    pub body: BodyId,
    pub conn: Uuid,
    pub name: String,
    pub outfit: String,
    pub group: Option<u32>,
    pub layer: Layer,

    pub health: f32,
    pub boost: f32,
    pub dead: bool,
    pub downed: bool,
    pub disconnected: bool,

    pub inventory: HashMap<InvKey, u32>,
    pub weapons: [WeaponSlot; 4],
    pub active_slot: usize,

    pub action: Action,
    pub action_seq: u8,
    /// Reload continues next cycle when the per-cycle cap truncated it
    pub perform_action_again: bool,
    /// Set while a teammate is actively reviving this player
    pub being_revived_by: Option<EntityId>,

    pub anim: Anim,
    /// Ticks since the cook animation started; -1 when not cooking
    pub cook_ticks: i32,

    pub move_intent: MoveIntent,
    pub aim_dir: Vec2,
    pub shoot_start: bool,
    pub shoot_hold: bool,
    pub last_input_seq: u32,

    pub speed: f32,
    pub building_zoom: u8,

    pub visible: HashSet<EntityId>,
    pub full_dirty: HashSet<EntityId>,
    pub partial_dirty: HashSet<EntityId>,
    pub deleted: HashSet<EntityId>,
    pub moves_since_update: u32,
    pub last_pos: Vec2,
    pub inventory_dirty: bool,
    pub weapons_dirty: bool,
    pub stats_dirty: bool,

    pub is_spectator: bool,
    pub spectating: Option<EntityId>,
    pub spectators: HashSet<EntityId>,
    pub spectate_begin: bool,
    pub spectate_next: bool,
    pub spectate_prev: bool,
    pub killed_by: Option<EntityId>,

    pub kills: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
    pub is_kill_leader: bool,

    pub socket: PlayerSocket,
}

impl Player {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: EntityId,
        body: BodyId,
        conn: Uuid,
        name: String,
        outfit: String,
        group: Option<u32>,
        spawn: Vec2,
        socket: PlayerSocket,
        now: Instant,
    ) -> Self {
        let mut weapons = [WeaponSlot::empty(now); 4];
        weapons[SLOT_MELEE].weapon = Some(Weapon::Fists);

        Self {
            id,
            body,
            conn,
            name,
            outfit,
            group,
            layer: Layer::GROUND,
            health: MAX_HEALTH,
            boost: 0.0,
            dead: false,
            downed: false,
            disconnected: false,
            inventory: HashMap::new(),
            weapons,
            active_slot: SLOT_MELEE,
            action: Action::None,
            action_seq: 0,
            perform_action_again: false,
            being_revived_by: None,
            anim: Anim::idle(),
            cook_ticks: -1,
            move_intent: MoveIntent::default(),
            aim_dir: Vec2::new(1.0, 0.0),
            shoot_start: false,
            shoot_hold: false,
            last_input_seq: 0,
            speed: BASE_SPEED,
            building_zoom: 0,
            visible: HashSet::new(),
            full_dirty: HashSet::new(),
            partial_dirty: HashSet::new(),
            deleted: HashSet::new(),
            moves_since_update: 0,
            last_pos: spawn,
            inventory_dirty: true,
            weapons_dirty: true,
            stats_dirty: false,
            is_spectator: false,
            spectating: None,
            spectators: HashSet::new(),
            spectate_begin: false,
            spectate_next: false,
            spectate_prev: false,
            killed_by: None,
            kills: 0,
            damage_dealt: 0.0,
            damage_taken: 0.0,
            is_kill_leader: false,
            socket,
        }
    }

    pub fn active_weapon(&self) -> Weapon {
        self.weapons[self.active_slot].weapon.unwrap_or(Weapon::Fists)
    }

    pub fn weapon_cooldown_over(&self, now: Instant) -> bool {
        now >= self.weapons[self.active_slot].cooldown_until
    }

    pub fn recalculate_speed(&mut self) {
        let mut speed = if self.downed { DOWNED_SPEED } else { BASE_SPEED };
        let busy = matches!(self.action, Action::UseItem { .. }) || self.cook_ticks >= 0;
        if busy {
            speed *= BUSY_SPEED_MULT;
        }
        self.speed = speed;
    }

    /// Add to an inventory stack, respecting the per-type cap.
    /// Returns how many were actually taken.
    pub fn add_to_inventory(&mut self, key: InvKey, count: u32) -> u32 {
        let current = self.inventory.entry(key).or_insert(0);
        let space = key.max_stack().saturating_sub(*current);
        let taken = count.min(space);
        *current += taken;
        if taken > 0 {
            self.inventory_dirty = true;
        }
        taken
    }

    pub fn inventory_count(&self, key: InvKey) -> u32 {
        self.inventory.get(&key).copied().unwrap_or(0)
    }

    /// View radius used for visibility; buildings force a tighter view
    pub fn view_radius(&self) -> f32 {
        if self.building_zoom != 0 {
            16.0
        } else {
            28.0
        }
    }

    pub fn clear_tick_state(&mut self) {
        self.full_dirty.clear();
        self.partial_dirty.clear();
        self.deleted.clear();
        self.inventory_dirty = false;
        self.weapons_dirty = false;
        self.stats_dirty = false;
    }
}

impl MatchState {
    /// Advance one living player by one tick. Stage order inside matches the
    /// flow of the loop: movement, pickup, regen, revive range check, timed
    /// action, weapons, animation, stairs, zoom.
    pub fn update_player(&mut self, pid: EntityId, now: Instant) {
        // the player may have died earlier in this tick's loop
        let active = self
            .players
            .get(&pid)
            .map(|p| !p.dead && !p.disconnected)
            .unwrap_or(false);
        if !active {
            return;
        }

        self.apply_movement(pid);
        self.pickup_nearby_loot(pid);
        self.update_health_and_boost(pid);
        self.check_revive_range(pid);
        self.repeat_pending_action(pid, now);
        self.finish_due_action(pid, now);
        self.update_weapon_state(pid, now);
        self.advance_animation(pid);
        self.update_stairs(pid);
        self.update_building_zoom(pid);
    }

    fn apply_movement(&mut self, pid: EntityId) {
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        let dir = player.move_intent.direction();
        let vel = dir.scale(player.speed);
        let body = player.body;
        self.world.set_velocity(body, vel);

        if let Some(pos) = self.world.position(body) {
            if pos.distance_to(player.last_pos) > 1e-4 {
                player.last_pos = pos;
                player.moves_since_update += 1;
                self.partial_dirty.insert(pid);
            }
        }
    }

    /// Auto-pickup of nearby eligible loot. Guns need a free gun slot;
    /// stacks take only what fits.
    fn pickup_nearby_loot(&mut self, pid: EntityId) {
        let (player_pos, player_layer) = {
            let Some(player) = self.players.get(&pid) else {
                return;
            };
            let Some(pos) = self.world.position(player.body) else {
                return;
            };
            (pos, player.layer)
        };

        let candidates: Vec<EntityId> = self
            .loot
            .iter()
            .filter(|(_, l)| l.layer.same_as(player_layer))
            .filter(|(_, l)| {
                self.world
                    .position(l.body)
                    .map(|p| p.distance_to(player_pos) <= PLAYER_RADIUS + LOOT_RADIUS + PICKUP_RANGE)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        for loot_id in candidates {
            self.interact_with_loot(pid, loot_id);
        }
    }

    /// Try to transfer a loot pile to a player. Removes the pile when fully
    /// taken, updates its count when partially taken.
    pub fn interact_with_loot(&mut self, pid: EntityId, loot_id: EntityId) {
        let Some(loot) = self.loot.get(&loot_id) else {
            return;
        };
        let item = loot.item;
        let count = loot.count;

        let taken = match item {
            LootItem::Weapon(weapon) => {
                let Some(player) = self.players.get_mut(&pid) else {
                    return;
                };
                if equip_gun(player, weapon) {
                    count
                } else {
                    0
                }
            }
            LootItem::Ammo(ammo) => {
                let Some(player) = self.players.get_mut(&pid) else {
                    return;
                };
                let taken = player.add_to_inventory(InvKey::Ammo(ammo), count);
                if taken > 0 {
                    refresh_throwable_slot(player);
                }
                taken
            }
            LootItem::Item(item) => {
                let Some(player) = self.players.get_mut(&pid) else {
                    return;
                };
                player.add_to_inventory(InvKey::Item(item), count)
            }
        };

        if taken == 0 {
            return;
        }

        if taken >= count {
            if let Some(loot) = self.loot.remove(&loot_id) {
                self.world.remove_body(loot.body);
            }
            self.deleted_entities.insert(loot_id);
        } else if let Some(loot) = self.loot.get_mut(&loot_id) {
            loot.count -= taken;
            self.partial_dirty.insert(loot_id);
        }
    }

    /// Boost drains into passive healing; downed players bleed out instead.
    fn update_health_and_boost(&mut self, pid: EntityId) {
        // regen only runs once the real game has started
        if !self.regen_active() {
            return;
        }
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        let dt = tick_delta();

        if player.downed {
            if player.being_revived_by.is_none() {
                let health = (player.health - DOWNED_BLEED * dt).max(0.0);
                if health != player.health {
                    player.health = health;
                    player.stats_dirty = true;
                }
                if player.health <= 0.0 {
                    self.kill_player(pid, None, KillCause::Bleedout);
                }
            }
            return;
        }

        if player.boost > 0.0 {
            player.boost = (player.boost - BOOST_DECAY * dt).max(0.0);
            let heal = boost_heal_rate(player.boost) * dt;
            if heal > 0.0 && player.health < MAX_HEALTH {
                player.health = (player.health + heal).min(MAX_HEALTH);
            }
            player.stats_dirty = true;
        }
    }

    /// A revive breaks as soon as the pair drifts out of range.
    fn check_revive_range(&mut self, pid: EntityId) {
        let Some(player) = self.players.get(&pid) else {
            return;
        };
        let Action::Revive { target, .. } = player.action else {
            return;
        };
        let actor_pos = self.world.position(player.body);
        let target_pos = self
            .players
            .get(&target)
            .and_then(|t| self.world.position(t.body));

        let out_of_range = match (actor_pos, target_pos) {
            (Some(a), Some(t)) => a.distance_to(t) > REVIVE_RANGE,
            _ => true,
        };
        if out_of_range {
            self.cancel_action(pid);
        }
    }

    /// Restart the action the last cycle asked to repeat (chained reloads).
    fn repeat_pending_action(&mut self, pid: EntityId, now: Instant) {
        let Some(player) = self.players.get(&pid) else {
            return;
        };
        if player.perform_action_again && player.action.is_none() {
            if let Some(p) = self.players.get_mut(&pid) {
                p.perform_action_again = false;
            }
            self.start_reload(pid, now);
        }
    }

    /// Complete the current action once its deadline has elapsed.
    fn finish_due_action(&mut self, pid: EntityId, now: Instant) {
        let action = {
            let Some(player) = self.players.get(&pid) else {
                return;
            };
            match player.action.deadline() {
                Some(deadline) if now >= deadline => player.action,
                _ => return,
            }
        };

        match action {
            Action::None => {}
            Action::UseItem { item, .. } => self.complete_item_use(pid, item),
            Action::Reload { .. } => self.complete_reload(pid),
            Action::Revive { target, .. } => self.complete_revive(pid, target),
        }
        self.cancel_action(pid);
    }

    fn complete_item_use(&mut self, pid: EntityId, item: Item) {
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        let key = InvKey::Item(item);
        if player.inventory_count(key) == 0 {
            return;
        }
        match item.def().effect {
            ItemEffect::Heal(amount) => {
                player.health = (player.health + amount).min(MAX_HEALTH);
            }
            ItemEffect::FullHeal => player.health = MAX_HEALTH,
            ItemEffect::Boost(amount) => {
                player.boost = (player.boost + amount).min(MAX_BOOST);
            }
        }
        if let Some(count) = player.inventory.get_mut(&key) {
            *count = count.saturating_sub(1);
        }
        player.inventory_dirty = true;
        player.stats_dirty = true;
    }

    /// Transfer ammunition from inventory into the active clip.
    ///
    /// The transfer is capped per cycle; a truncated transfer sets the
    /// repeat flag so the reload continues next cycle. A weapon with the
    /// full-refill rule ignores the cap when its clip is completely empty.
    fn complete_reload(&mut self, pid: EntityId) {
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        let slot = player.active_slot;
        let Some(weapon) = player.weapons[slot].weapon else {
            return;
        };
        let def = weapon.def();
        let Some(ammo) = def.ammo else {
            return;
        };

        let key = InvKey::Ammo(ammo);
        let available = player.inventory_count(key);
        let clip = player.weapons[slot].clip;
        let missing = def.clip.saturating_sub(clip);
        let mut transfer = available.min(missing);

        let full_refill = def.full_reload_when_empty && clip == 0;
        if !full_refill && transfer > def.max_reload {
            transfer = def.max_reload;
            player.perform_action_again = true;
        }

        if transfer == 0 {
            return;
        }
        player.weapons[slot].clip += transfer;
        if let Some(count) = player.inventory.get_mut(&key) {
            *count -= transfer;
        }
        // a clip that is still short keeps the cycle going even when the
        // cap was not the limiter (single-shell loaders)
        if player.weapons[slot].clip < def.clip && player.inventory_count(key) > 0 {
            player.perform_action_again = true;
        }
        player.weapons_dirty = true;
        player.inventory_dirty = true;
    }

    fn complete_revive(&mut self, pid: EntityId, target: EntityId) {
        let Some(target_player) = self.players.get_mut(&target) else {
            return;
        };
        if !target_player.downed || target_player.dead {
            return;
        }
        target_player.downed = false;
        target_player.health = REVIVE_HEALTH;
        target_player.being_revived_by = None;
        target_player.recalculate_speed();
        target_player.full_dirty.insert(target);
        self.full_dirty.insert(target);
        let _ = pid;
    }

    /// Drop the current action. A cancelled revive also releases its target.
    pub fn cancel_action(&mut self, pid: EntityId) {
        let revive_target = {
            let Some(player) = self.players.get_mut(&pid) else {
                return;
            };
            let target = match player.action {
                Action::Revive { target, .. } => Some(target),
                _ => None,
            };
            player.action = Action::None;
            player.action_seq = player.action_seq.wrapping_add(1);
            player.recalculate_speed();
            player.stats_dirty = true;
            target
        };
        if let Some(target) = revive_target {
            if let Some(t) = self.players.get_mut(&target) {
                if t.being_revived_by == Some(pid) {
                    t.being_revived_by = None;
                }
            }
        }
    }

    /// Start a timed action if the player is free and the weapon cooldown
    /// has elapsed.
    fn try_start_action(&mut self, pid: EntityId, action: Action, now: Instant) -> bool {
        let Some(player) = self.players.get_mut(&pid) else {
            return false;
        };
        if player.dead || !player.action.is_none() || !player.weapon_cooldown_over(now) {
            return false;
        }
        player.action = action;
        player.action_seq = player.action_seq.wrapping_add(1);
        player.recalculate_speed();
        player.stats_dirty = true;
        self.full_dirty.insert(pid);
        true
    }

    pub fn start_item_use(&mut self, pid: EntityId, item: Item, now: Instant) {
        let has_item = self
            .players
            .get(&pid)
            .map(|p| !p.downed && p.inventory_count(InvKey::Item(item)) > 0)
            .unwrap_or(false);
        if !has_item {
            return;
        }
        let until = now + Duration::from_secs_f32(item.def().use_time);
        self.try_start_action(pid, Action::UseItem { item, until }, now);
    }

    pub fn start_reload(&mut self, pid: EntityId, now: Instant) {
        let reload_needed = {
            let Some(player) = self.players.get(&pid) else {
                return;
            };
            if player.downed {
                return;
            }
            let slot = player.active_slot;
            match player.weapons[slot].weapon {
                Some(weapon) => {
                    let def = weapon.def();
                    def.kind == WeaponKind::Gun
                        && player.weapons[slot].clip < def.clip
                        && def
                            .ammo
                            .map(|a| player.inventory_count(InvKey::Ammo(a)) > 0)
                            .unwrap_or(false)
                }
                None => false,
            }
        };
        if !reload_needed {
            return;
        }
        let reload_time = {
            let player = &self.players[&pid];
            player.active_weapon().def().reload_time
        };
        let until = now + Duration::from_secs_f32(reload_time);
        self.try_start_action(pid, Action::Reload { until }, now);
    }

    /// Begin reviving the nearest downed teammate in range.
    pub fn start_revive(&mut self, pid: EntityId, now: Instant) {
        let target = {
            let Some(player) = self.players.get(&pid) else {
                return;
            };
            if player.downed || player.group.is_none() {
                return;
            }
            let Some(pos) = self.world.position(player.body) else {
                return;
            };
            let group = player.group;
            self.players
                .values()
                .filter(|t| {
                    t.id != pid
                        && !t.dead
                        && t.downed
                        && t.group == group
                        && t.being_revived_by.is_none()
                })
                .filter_map(|t| {
                    let tpos = self.world.position(t.body)?;
                    let dist = tpos.distance_to(pos);
                    (dist <= REVIVE_RANGE).then_some((t.id, dist))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| id)
        };
        let Some(target) = target else {
            return;
        };

        let until = now + Duration::from_secs_f32(REVIVE_DURATION);
        if self.try_start_action(pid, Action::Revive { target, until }, now) {
            if let Some(t) = self.players.get_mut(&target) {
                t.being_revived_by = Some(pid);
            }
        }
    }

    /// Trigger handling: press, hold, cook and release.
    fn update_weapon_state(&mut self, pid: EntityId, now: Instant) {
        let Some(player) = self.players.get(&pid) else {
            return;
        };
        if player.downed {
            return;
        }
        let weapon = player.active_weapon();
        let def = weapon.def();
        let shoot_start = player.shoot_start;
        let shoot_hold = player.shoot_hold;
        let cook_ticks = player.cook_ticks;
        let cooldown_over = player.weapon_cooldown_over(now);
        let anim_active = player.anim.active;
        let fuse_bound = (def.fuse_time * SIMULATION_TPS as f32) as i32;

        if shoot_start {
            if let Some(p) = self.players.get_mut(&pid) {
                p.shoot_start = false;
            }
            if cooldown_over {
                match def.kind {
                    WeaponKind::Throwable => {
                        if !anim_active {
                            self.cancel_action(pid);
                            self.start_cook(pid, fuse_bound as u32);
                        }
                        if let Some(p) = self.players.get_mut(&pid) {
                            p.cook_ticks = 0;
                        }
                    }
                    WeaponKind::Melee => {
                        self.set_active_cooldown(pid, now, def.fire_delay);
                        self.start_melee_anim(pid);
                        self.use_melee(pid);
                    }
                    WeaponKind::Gun => {
                        self.fire_gun(pid, now);
                    }
                }
            }
        } else if shoot_hold
            && def.kind == WeaponKind::Gun
            && matches!(def.fire_mode, FireMode::Auto | FireMode::Burst)
        {
            if cooldown_over {
                self.fire_gun(pid, now);
            }
        } else if shoot_hold && def.kind == WeaponKind::Throwable && cook_ticks >= 0 {
            // holding the cook: advance toward the fuse bound, then the
            // throw happens whether or not the trigger is still held
            if cook_ticks < fuse_bound {
                if anim_active {
                    if let Some(p) = self.players.get_mut(&pid) {
                        p.cook_ticks += 1;
                    }
                }
            } else {
                self.release_throwable(pid, now);
            }
        } else if cook_ticks >= 0 {
            self.release_throwable(pid, now);
        }
    }

    fn start_cook(&mut self, pid: EntityId, fuse_ticks: u32) {
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        if player.inventory_count(InvKey::Ammo(throwable_ammo(player))) == 0 {
            return;
        }
        player.anim = Anim {
            active: true,
            kind: AnimKind::Cook,
            seq: player.anim.seq.wrapping_add(1),
            time: 0,
            duration: fuse_ticks,
        };
        player.recalculate_speed();
        player.full_dirty.insert(pid);
        self.full_dirty.insert(pid);
    }

    fn start_melee_anim(&mut self, pid: EntityId) {
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        player.anim = Anim {
            active: true,
            kind: AnimKind::Melee,
            seq: player.anim.seq.wrapping_add(1),
            time: 0,
            duration: SIMULATION_TPS / 4,
        };
        self.full_dirty.insert(pid);
    }

    /// Throw the cooked projectile and reset all cook state.
    fn release_throwable(&mut self, pid: EntityId, now: Instant) {
        let (cook_ticks, throwable, cooldown_until) = {
            let Some(player) = self.players.get(&pid) else {
                return;
            };
            let weapon = player.weapons[SLOT_THROWABLE].weapon;
            (player.cook_ticks, weapon, player.weapons[SLOT_THROWABLE].cooldown_until)
        };
        let Some(weapon) = throwable else {
            self.reset_cook_state(pid);
            return;
        };
        if now < cooldown_until {
            self.reset_cook_state(pid);
            return;
        }

        let ammo = match weapon.def().ammo {
            Some(a) => a,
            None => {
                self.reset_cook_state(pid);
                return;
            }
        };

        let has_ammo = {
            let Some(player) = self.players.get_mut(&pid) else {
                return;
            };
            let key = InvKey::Ammo(ammo);
            if player.inventory_count(key) == 0 {
                false
            } else {
                if let Some(count) = player.inventory.get_mut(&key) {
                    *count -= 1;
                }
                player.inventory_dirty = true;
                true
            }
        };

        if has_ammo {
            let delay = weapon.def().fire_delay;
            if let Some(player) = self.players.get_mut(&pid) {
                player.weapons[SLOT_THROWABLE].cooldown_until =
                    now + Duration::from_secs_f32(delay);
            }
            self.throw_projectile(pid, cook_ticks.max(0) as u32);
        }

        if let Some(player) = self.players.get_mut(&pid) {
            if player.inventory_count(InvKey::Ammo(ammo)) == 0 {
                player.weapons[SLOT_THROWABLE].weapon = None;
                if player.active_slot == SLOT_THROWABLE {
                    player.active_slot = SLOT_MELEE;
                }
                player.weapons_dirty = true;
            }
        }
        self.reset_cook_state(pid);
    }

    fn reset_cook_state(&mut self, pid: EntityId) {
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        if player.cook_ticks < 0 && !player.anim.active {
            return;
        }
        player.cook_ticks = -1;
        player.anim = Anim::idle();
        player.recalculate_speed();
        player.full_dirty.insert(pid);
        self.full_dirty.insert(pid);
    }

    fn set_active_cooldown(&mut self, pid: EntityId, now: Instant, delay: f32) {
        if let Some(player) = self.players.get_mut(&pid) {
            let slot = player.active_slot;
            player.weapons[slot].cooldown_until = now + Duration::from_secs_f32(delay);
        }
    }

    /// Fire the active gun: spend one round, spawn pellets with spread.
    /// An empty clip turns the trigger pull into a reload.
    fn fire_gun(&mut self, pid: EntityId, now: Instant) {
        let fire = {
            let Some(player) = self.players.get_mut(&pid) else {
                return;
            };
            let slot = player.active_slot;
            let Some(weapon) = player.weapons[slot].weapon else {
                return;
            };
            let def = weapon.def();
            if def.kind != WeaponKind::Gun {
                return;
            }
            if player.weapons[slot].clip == 0 {
                None
            } else {
                player.weapons[slot].clip -= 1;
                player.weapons[slot].cooldown_until = now + Duration::from_secs_f32(def.fire_delay);
                player.weapons_dirty = true;
                let pos = self.world.position(player.body);
                pos.map(|p| (weapon, *def, p, player.aim_dir, player.layer))
            }
        };

        match fire {
            None => self.start_reload(pid, now),
            Some((weapon, def, pos, aim, layer)) => {
                let Some(bullet_kind) = def.bullet else {
                    return;
                };
                let aim = aim.normalized();
                let muzzle = pos.add(aim.scale(PLAYER_RADIUS + 0.7));
                for _ in 0..def.bullets_per_shot {
                    let jitter: f32 = if def.spread > 0.0 {
                        use rand::Rng;
                        self.rng.gen_range(-def.spread..def.spread)
                    } else {
                        0.0
                    };
                    let dir = aim.rotated(jitter);
                    self.spawn_bullet(pid, weapon, bullet_kind, muzzle, dir, layer);
                }
            }
        }
    }

    fn advance_animation(&mut self, pid: EntityId) {
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        if player.anim.active {
            player.anim.time += 1;
        }
        if player.anim.active && player.anim.time > player.anim.duration as i32 {
            // cook animations are closed by the throw path, others just end
            if player.anim.kind != AnimKind::Cook {
                player.anim = Anim::idle();
                player.full_dirty.insert(pid);
                self.full_dirty.insert(pid);
            }
        }
    }

    /// Stair regions put a player on the transition layer; leaving decays
    /// the layer back to its plain plane.
    fn update_stairs(&mut self, pid: EntityId) {
        let Some(player) = self.players.get(&pid) else {
            return;
        };
        let Some(pos) = self.world.position(player.body) else {
            return;
        };
        let original = player.layer;
        let new_layer = match self.map.stair_layer_at(pos) {
            Some(stair_layer) => stair_layer,
            None => original.off_stair(),
        };
        if new_layer != original {
            if let Some(p) = self.players.get_mut(&pid) {
                p.layer = new_layer;
                let body = p.body;
                self.world.set_layer(body, new_layer);
                p.full_dirty.insert(pid);
            }
            self.full_dirty.insert(pid);
        }
    }

    fn update_building_zoom(&mut self, pid: EntityId) {
        let Some(player) = self.players.get(&pid) else {
            return;
        };
        let Some(pos) = self.world.position(player.body) else {
            return;
        };
        let zoom = self.map.building_zoom_at(pos, player.layer);
        if let Some(p) = self.players.get_mut(&pid) {
            if p.building_zoom != zoom {
                p.building_zoom = zoom;
                p.stats_dirty = true;
            }
        }
    }

    /// Apply damage to a player. Health never leaves [0, 100]; reaching 0
    /// downs a player with living teammates and kills otherwise, exactly
    /// once.
    pub fn damage_player(
        &mut self,
        target: EntityId,
        amount: f32,
        damager: Option<EntityId>,
        cause: KillCause,
    ) {
        let (went_down, died) = {
            let Some(player) = self.players.get_mut(&target) else {
                return;
            };
            if player.dead {
                return;
            }
            player.damage_taken += amount;
            player.health = (player.health - amount).max(0.0);
            player.stats_dirty = true;

            if player.health > 0.0 {
                (false, false)
            } else if !player.downed && cause != KillCause::Bleedout {
                (true, false)
            } else {
                (false, true)
            }
        };

        if let Some(damager_id) = damager {
            if damager_id != target {
                if let Some(d) = self.players.get_mut(&damager_id) {
                    d.damage_dealt += amount;
                }
            }
        }

        if went_down {
            if self.has_living_teammate(target) {
                self.down_player(target);
            } else {
                self.kill_player(target, damager, cause);
            }
        } else if died {
            self.kill_player(target, damager, cause);
        }
    }

    fn has_living_teammate(&self, pid: EntityId) -> bool {
        let Some(player) = self.players.get(&pid) else {
            return false;
        };
        let Some(group) = player.group else {
            return false;
        };
        self.players
            .values()
            .any(|p| p.id != pid && !p.dead && !p.downed && p.group == Some(group))
    }

    fn down_player(&mut self, pid: EntityId) {
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        player.downed = true;
        player.health = MAX_HEALTH;
        player.recalculate_speed();
        player.stats_dirty = true;
        self.cancel_action(pid);
        self.full_dirty.insert(pid);
    }
}

/// Equip a gun into a free slot. Returns false when both gun slots are taken.
fn equip_gun(player: &mut Player, weapon: Weapon) -> bool {
    let def = weapon.def();
    if def.kind != WeaponKind::Gun {
        return false;
    }
    let slot = if player.weapons[SLOT_PRIMARY].weapon.is_none() {
        SLOT_PRIMARY
    } else if player.weapons[SLOT_SECONDARY].weapon.is_none() {
        SLOT_SECONDARY
    } else {
        return false;
    };
    player.weapons[slot].weapon = Some(weapon);
    player.weapons[slot].clip = def.clip;
    player.weapons_dirty = true;
    true
}

/// Keep the throwable slot in sync with grenade ammo in the inventory.
fn refresh_throwable_slot(player: &mut Player) {
    if player.weapons[SLOT_THROWABLE].weapon.is_some() {
        return;
    }
    for (weapon, ammo) in [
        (Weapon::FragGrenade, Ammo::Frag),
        (Weapon::MirvGrenade, Ammo::Mirv),
    ] {
        if player.inventory_count(InvKey::Ammo(ammo)) > 0 {
            player.weapons[SLOT_THROWABLE].weapon = Some(weapon);
            player.weapons_dirty = true;
            return;
        }
    }
}

fn throwable_ammo(player: &Player) -> Ammo {
    player.weapons[SLOT_THROWABLE]
        .weapon
        .and_then(|w| w.def().ammo)
        .unwrap_or(Ammo::Frag)
}
