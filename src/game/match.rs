//! Match state and authoritative tick loop

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::combat::{Bullet, DamageRecord, Explosion, Projectile};
use crate::game::data::{Ammo, GameMode, Item, Weapon, WeaponKind};
use crate::game::entity::{BodyTag, EntityId, EntityKind, IdAllocator, Layer};
use crate::game::map::{GameMap, Loot, LootItem, Obstacle, ObstaclePlacement, LOOT_RADIUS};
use crate::game::packet::encode_frame;
use crate::game::physics::PhysicsWorld;
use crate::game::player::{InvKey, Player, PLAYER_RADIUS, SLOT_MELEE};
use crate::game::zone::{ZoneState, GAS_DAMAGE_INTERVAL_TICKS};
use crate::game::{MatchCommand, PlayerSocket};
use crate::util::math::Vec2;
use crate::util::time::{next_tick_delay, tick_delta, TICK_DURATION, TICK_SAMPLE_SIZE};
use crate::ws::protocol::{
    ClientMsg, EmoteMsg, JoinedMsg, KillCause, KillMsg, PlayerStatsMsg, Role, RoleAnnouncementMsg,
    ServerMsg,
};

/// World edge length in units
pub const MAP_SIZE: f32 = 720.0;
/// Players sharing an outfit team up, capped at this size
pub const MAX_TEAMMATES: u32 = 2;
/// Spawn attempts before falling back to the safe-zone center
pub const SPAWN_RETRIES: u32 = 32;
/// Hard cap on players in one match
pub const MAX_PLAYERS: usize = 80;

/// Rolling mean of tick durations, exposed through the match handle
#[derive(Debug, Default, Clone, Copy)]
pub struct TickStats {
    pub mean_tick_micros: u64,
    pub sample_count: u64,
}

struct GroupSlot {
    id: u32,
    members: u32,
}

/// Match state (owned by the match task)
pub struct MatchState {
    pub id: Uuid,
    pub mode: GameMode,
    pub world: PhysicsWorld,
    pub map: GameMap,
    pub zone: ZoneState,
    pub rng: ChaCha8Rng,
    pub ids: IdAllocator,
    pub tick: u64,

    pub players: HashMap<EntityId, Player>,
    pub loot: HashMap<EntityId, Loot>,
    pub bullets: HashMap<EntityId, Bullet>,
    pub projectiles: HashMap<EntityId, Projectile>,
    pub obstacles: HashMap<EntityId, Obstacle>,

    pub conn_index: HashMap<Uuid, EntityId>,
    /// Ordered list used for spectate navigation
    pub spectatable: Vec<EntityId>,
    groups: HashMap<String, GroupSlot>,

    // per-tick ephemeral collections; cleared unconditionally at tick end
    pub damage_records: Vec<DamageRecord>,
    pub explosions: Vec<Explosion>,
    pub explosion_events: Vec<crate::ws::protocol::ExplosionMsg>,
    pub new_bullets: Vec<EntityId>,
    pub emotes: Vec<EmoteMsg>,
    pub kills: Vec<KillMsg>,
    pub role_announcements: Vec<RoleAnnouncementMsg>,

    pub full_dirty: HashSet<EntityId>,
    pub partial_dirty: HashSet<EntityId>,
    pub deleted_entities: HashSet<EntityId>,
    /// Forces visible-set recomputation for everyone this tick
    pub update_objects: bool,
    pub alive_count_dirty: bool,

    pub kill_leader: Option<EntityId>,
    pub started: bool,
    pub over: bool,
    pub allow_join: bool,
    pub lobby_start: Option<Instant>,
    pub join_window: Duration,
    /// Late joiners start with ammo and healing items
    pub spawn_with_goodies: bool,
    ticks_since_gas_damage: u32,
}

impl MatchState {
    pub fn new(id: Uuid, mode: GameMode, seed: u64, join_window: Duration) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let map = GameMap::generate(&mut rng, MAP_SIZE, MAP_SIZE);
        let zone = ZoneState::new(map.center(), MAP_SIZE);

        let mut state = Self {
            id,
            mode,
            world: PhysicsWorld::new(),
            map,
            zone,
            rng,
            ids: IdAllocator::new(),
            tick: 0,
            players: HashMap::new(),
            loot: HashMap::new(),
            bullets: HashMap::new(),
            projectiles: HashMap::new(),
            obstacles: HashMap::new(),
            conn_index: HashMap::new(),
            spectatable: Vec::new(),
            groups: HashMap::new(),
            damage_records: Vec::new(),
            explosions: Vec::new(),
            explosion_events: Vec::new(),
            new_bullets: Vec::new(),
            emotes: Vec::new(),
            kills: Vec::new(),
            role_announcements: Vec::new(),
            full_dirty: HashSet::new(),
            partial_dirty: HashSet::new(),
            deleted_entities: HashSet::new(),
            update_objects: false,
            alive_count_dirty: false,
            kill_leader: None,
            started: false,
            over: false,
            allow_join: true,
            lobby_start: None,
            join_window,
            spawn_with_goodies: false,
            ticks_since_gas_damage: 0,
        };

        let placements: Vec<ObstaclePlacement> = state.map.obstacles.clone();
        for placement in placements {
            state.spawn_obstacle(placement);
        }
        state
    }

    fn spawn_obstacle(&mut self, placement: ObstaclePlacement) -> EntityId {
        let def = placement.kind.def();
        let id = self.ids.next_object_id();
        let mut tag = BodyTag::new(id, EntityKind::Obstacle, placement.layer);
        tag.bunker_wall = def.bunker_wall;
        tag.height = def.height;
        let body = self.world.add_body(tag, placement.pos, def.radius, false);
        self.obstacles.insert(
            id,
            Obstacle {
                id,
                body,
                kind: placement.kind,
                pos: placement.pos,
                layer: placement.layer,
                health: def.health,
                dead: false,
            },
        );
        id
    }

    pub fn alive_count(&self) -> usize {
        self.players
            .values()
            .filter(|p| !p.dead && !p.disconnected)
            .count()
    }

    /// Health and boost regeneration only run once the real game is on
    pub fn regen_active(&self) -> bool {
        match self.mode {
            GameMode::DeathMatch => true,
            GameMode::BattleRoyale => !self.allow_join,
        }
    }

    pub fn random_living_player(&mut self) -> Option<EntityId> {
        let living: Vec<EntityId> = self
            .players
            .values()
            .filter(|p| !p.dead && !p.disconnected)
            .map(|p| p.id)
            .collect();
        if living.is_empty() {
            return None;
        }
        Some(living[self.rng.gen_range(0..living.len())])
    }

    /// Drop a loot pile. Fresh piles get a small velocity nudge so stacks
    /// spread apart over the next few ticks.
    pub fn spawn_loot(&mut self, item: LootItem, count: u32, pos: Vec2, layer: Layer) -> EntityId {
        let id = self.ids.next_object_id();
        let tag = BodyTag::new(id, EntityKind::Loot, layer);
        let body = self.world.add_body(tag, pos, LOOT_RADIUS, true);
        let nudge = Vec2::new(
            self.rng.gen_range(-1.0..1.0),
            self.rng.gen_range(-1.0..1.0),
        );
        self.world.set_velocity(body, nudge);

        self.loot.insert(
            id,
            Loot {
                id,
                body,
                item,
                count,
                layer,
                old_pos: pos,
            },
        );
        self.full_dirty.insert(id);
        self.update_objects = true;
        id
    }

    /// Spawn search with a bounded retry budget; a map that keeps handing
    /// out gassed coordinates falls back to the safe-zone center.
    pub fn find_safe_spawn(&mut self, kind: EntityKind, layer: Layer, group: Option<u32>) -> Vec2 {
        for _ in 0..SPAWN_RETRIES {
            let pos = self
                .map
                .random_position_for(kind, layer, group, &mut self.rng);
            if !self.zone.is_unsafe(pos) {
                return pos;
            }
        }
        warn!(match_id = %self.id, "spawn search exhausted retries, using zone center");
        self.zone.current_pos
    }

    /// Join surface. Spawns a player, assigns its team group (falling back
    /// past the cap), seeds starter loot while joining is open, and sends
    /// the initial full snapshot.
    pub fn add_player(
        &mut self,
        conn: Uuid,
        name: String,
        outfit: String,
        socket: PlayerSocket,
        now: Instant,
    ) -> EntityId {
        let group = self.assign_group(&outfit);

        let spawn = if self.allow_join {
            self.find_safe_spawn(EntityKind::Player, Layer::GROUND, group)
        } else {
            self.map.center()
        };

        let id = self.ids.next_object_id();
        let tag = BodyTag::new(id, EntityKind::Player, Layer::GROUND);
        let body = self.world.add_body(tag, spawn, PLAYER_RADIUS, true);
        let mut player = Player::new(id, body, conn, name, outfit, group, spawn, socket, now);

        let spectating = if self.allow_join {
            None
        } else {
            // joined after the window closed: watch someone instead
            player.dead = true;
            player.is_spectator = true;
            self.world.remove_body(body);
            self.random_living_player()
        };

        self.players.insert(id, player);
        self.conn_index.insert(conn, id);
        self.alive_count_dirty = true;
        self.update_objects = true;

        if let Some(target) = spectating {
            self.spectate(id, target);
        } else {
            self.spectatable.push(id);
            self.full_dirty.insert(id);
            self.seed_starter_loot(id, spawn);
        }

        let joined = ServerMsg::Joined(JoinedMsg {
            match_id: self.id,
            player_id: id.0,
            game_mode: self.mode,
            map_width: self.map.width,
            map_height: self.map.height,
            allow_join: self.allow_join,
            spectating: spectating.map(|s| s.0),
        });
        self.send_to_player(id, &joined);

        // initial full snapshot: everything currently visible
        self.update_visible_objects(id);
        if let Some(update) = self.build_update_msg(id) {
            self.send_to_player(id, &ServerMsg::Update(update));
        }
        if let Some(p) = self.players.get_mut(&id) {
            p.clear_tick_state();
        }

        info!(
            match_id = %self.id,
            player_id = %id,
            player_count = self.players.len(),
            spectator = spectating.is_some(),
            "Player joined match"
        );

        if self.alive_count() > 1 && !self.started {
            self.started = true;
            self.lobby_start = Some(now);
            self.zone.advance_stage(self.mode, &mut self.rng, now);
            info!(match_id = %self.id, "Lobby started, zone schedule armed");
        }

        id
    }

    /// Team group for an outfit. A full team overflows to the default
    /// (ungrouped) slot instead.
    fn assign_group(&mut self, outfit: &str) -> Option<u32> {
        if outfit.is_empty() {
            return None;
        }
        let next_id = self.ids.next_group_id();
        let slot = self.groups.entry(outfit.to_string()).or_insert(GroupSlot {
            id: next_id,
            members: 0,
        });
        if slot.members >= MAX_TEAMMATES {
            return None;
        }
        slot.members += 1;
        Some(slot.id)
    }

    /// Starter guns drop next to the spawn so the player picks a kit;
    /// late-game joins also get consumables straight into the inventory.
    fn seed_starter_loot(&mut self, pid: EntityId, spawn: Vec2) {
        for weapon in [Weapon::PumpShotgun, Weapon::AssaultRifle, Weapon::BoltRifle] {
            self.spawn_loot(LootItem::Weapon(weapon), 1, spawn, Layer::GROUND);
        }
        self.spawn_loot(LootItem::Ammo(Ammo::TwelveGauge), 10, spawn, Layer::GROUND);
        self.spawn_loot(LootItem::Ammo(Ammo::FiveFiveSix), 60, spawn, Layer::GROUND);

        if self.spawn_with_goodies {
            if let Some(player) = self.players.get_mut(&pid) {
                player.add_to_inventory(InvKey::Ammo(Ammo::SevenSixTwo), 20);
                player.add_to_inventory(InvKey::Item(Item::Bandage), 5);
                player.add_to_inventory(InvKey::Item(Item::Soda), 2);
            }
        }
    }

    /// Leave surface. Spectators of this player move to a random living
    /// player; unless the match already ended the player is marked
    /// disconnected and gets one final full broadcast.
    pub fn remove_player(&mut self, pid: EntityId) {
        let spectators: Vec<EntityId> = match self.players.get(&pid) {
            Some(p) => p.spectators.iter().copied().collect(),
            None => return,
        };

        // hand this player's spectators to someone still in the fight
        let candidates: Vec<EntityId> = self
            .players
            .values()
            .filter(|p| !p.dead && !p.disconnected && p.id != pid)
            .map(|p| p.id)
            .collect();
        if !candidates.is_empty() {
            let target = candidates[self.rng.gen_range(0..candidates.len())];
            for spectator in spectators {
                if spectator != target {
                    self.spectate(spectator, target);
                }
            }
        }

        let old_target = self.players.get(&pid).and_then(|p| p.spectating);
        if let Some(target) = old_target {
            if let Some(t) = self.players.get_mut(&target) {
                t.spectators.remove(&pid);
            }
        }

        self.cancel_action(pid);
        let was_downed = {
            let Some(player) = self.players.get_mut(&pid) else {
                return;
            };
            player.spectators.clear();
            player.move_intent = Default::default();
            player.shoot_start = false;
            player.shoot_hold = false;
            player.is_spectator = false;
            player.spectating = None;
            player.anim = crate::game::player::Anim::idle();
            player.downed && !player.dead
        };
        self.spectatable.retain(|id| *id != pid);

        let still_alive = self
            .players
            .get(&pid)
            .map(|p| !p.dead)
            .unwrap_or(false);
        if still_alive && !self.over {
            if let Some(player) = self.players.get_mut(&pid) {
                player.disconnected = true;
            }
            if was_downed {
                // a downed player with nobody left to revive them bleeds out
                self.kill_player(pid, None, KillCause::Bleedout);
            }
            self.alive_count_dirty = true;
            self.full_dirty.insert(pid);
        }

        if let Some(player) = self.players.get(&pid) {
            self.conn_index.remove(&player.conn);
        }

        info!(match_id = %self.id, player_id = %pid, "Player left match");

        if self.alive_count() == 0 && self.started {
            self.end();
        }
    }

    /// Point one player's camera at another
    pub fn spectate(&mut self, pid: EntityId, target: EntityId) {
        if pid == target {
            return;
        }
        let old = self.players.get(&pid).and_then(|p| p.spectating);
        if let Some(old_target) = old {
            if let Some(t) = self.players.get_mut(&old_target) {
                t.spectators.remove(&pid);
            }
        }
        if let Some(t) = self.players.get_mut(&target) {
            t.spectators.insert(pid);
        }
        if let Some(p) = self.players.get_mut(&pid) {
            p.spectating = Some(target);
        }
    }

    /// Kill a player. Runs at most once per player; drops their loadout as
    /// loot and updates the kill feed and kill leader.
    pub fn kill_player(&mut self, pid: EntityId, damager: Option<EntityId>, cause: KillCause) {
        let pos = {
            let Some(player) = self.players.get_mut(&pid) else {
                return;
            };
            if player.dead {
                return;
            }
            player.dead = true;
            player.downed = false;
            player.health = 0.0;
            player.stats_dirty = true;
            player.killed_by = damager;
            if !player.disconnected {
                player.spectate_begin = true;
            }
            self.world.position(player.body)
        };

        self.cancel_action(pid);
        self.alive_count_dirty = true;
        self.spectatable.retain(|id| *id != pid);
        self.full_dirty.insert(pid);
        self.update_objects = true;

        if let Some(pos) = pos {
            self.drop_death_loot(pid, pos);
        }
        if let Some(player) = self.players.get(&pid) {
            self.world.remove_body(player.body);
        }

        let killer_kills = damager
            .filter(|d| *d != pid)
            .and_then(|d| {
                let player = self.players.get_mut(&d)?;
                if player.dead {
                    return None;
                }
                player.kills += 1;
                player.stats_dirty = true;
                Some((d, player.kills))
            });

        self.kills.push(KillMsg {
            killer_id: killer_kills.map(|(d, _)| d.0),
            victim_id: pid.0,
            cause,
            killer_kills: killer_kills.map(|(_, k)| k).unwrap_or(0),
        });

        if let Some((killer, _)) = killer_kills {
            self.maybe_assign_kill_leader(killer);
        }
        if self.kill_leader == Some(pid) {
            self.clear_kill_leader(pid);
        }

        debug!(match_id = %self.id, victim = %pid, ?cause, "Player killed");
    }

    fn drop_death_loot(&mut self, pid: EntityId, pos: Vec2) {
        let (layer, weapons, inventory) = {
            let Some(player) = self.players.get_mut(&pid) else {
                return;
            };
            let weapons: Vec<Weapon> = player
                .weapons
                .iter()
                .filter_map(|slot| slot.weapon)
                .filter(|w| w.def().kind == WeaponKind::Gun)
                .collect();
            let inventory: Vec<(InvKey, u32)> = player
                .inventory
                .drain()
                .filter(|(_, count)| *count > 0)
                .collect();
            for slot in player.weapons.iter_mut() {
                slot.weapon = None;
                slot.clip = 0;
            }
            player.weapons[SLOT_MELEE].weapon = Some(Weapon::Fists);
            (player.layer, weapons, inventory)
        };

        for weapon in weapons {
            self.spawn_loot(LootItem::Weapon(weapon), 1, pos, layer);
        }
        for (key, count) in inventory {
            let item = match key {
                InvKey::Ammo(a) => LootItem::Ammo(a),
                InvKey::Item(i) => LootItem::Item(i),
            };
            self.spawn_loot(item, count, pos, layer);
        }
    }

    /// Promote a player to kill leader when they pass the current holder
    fn maybe_assign_kill_leader(&mut self, pid: EntityId) {
        let challenger_kills = match self.players.get(&pid) {
            Some(p) if !p.dead => p.kills,
            _ => return,
        };
        let current_kills = self
            .kill_leader
            .and_then(|id| self.players.get(&id))
            .map(|p| p.kills)
            .unwrap_or(0);

        if self.kill_leader == Some(pid) || challenger_kills <= current_kills {
            return;
        }

        if let Some(old) = self.kill_leader.take() {
            self.clear_kill_leader(old);
        }
        if let Some(p) = self.players.get_mut(&pid) {
            p.is_kill_leader = true;
        }
        self.kill_leader = Some(pid);
        self.role_announcements.push(RoleAnnouncementMsg {
            player_id: pid.0,
            role: Role::KillLeader,
            assigned: true,
        });
    }

    fn clear_kill_leader(&mut self, pid: EntityId) {
        if self.kill_leader == Some(pid) {
            self.kill_leader = None;
        }
        if let Some(p) = self.players.get_mut(&pid) {
            if p.is_kill_leader {
                p.is_kill_leader = false;
                self.role_announcements.push(RoleAnnouncementMsg {
                    player_id: pid.0,
                    role: Role::KillLeader,
                    assigned: false,
                });
            }
        }
    }

    /// Handle one control message from a connection
    pub fn handle_client_msg(&mut self, conn: Uuid, msg: ClientMsg, now: Instant) {
        let Some(&pid) = self.conn_index.get(&conn) else {
            return;
        };

        match msg {
            ClientMsg::Join { .. } => {
                warn!(match_id = %self.id, player_id = %pid, "Duplicate join ignored");
            }
            ClientMsg::Input {
                seq,
                move_left,
                move_right,
                move_up,
                move_down,
                touch_move_dir,
                aim,
                shoot_start,
                shoot_hold,
            } => {
                let Some(player) = self.players.get_mut(&pid) else {
                    return;
                };
                if player.dead {
                    return;
                }
                // stale inputs are dropped; seq 0 resets after reconnect
                if seq != 0 && seq <= player.last_input_seq {
                    return;
                }
                player.last_input_seq = seq;
                player.move_intent.left = move_left;
                player.move_intent.right = move_right;
                player.move_intent.up = move_up;
                player.move_intent.down = move_down;
                player.move_intent.touch_dir =
                    touch_move_dir.map(|d| Vec2::new(d[0], d[1]));
                let aim = Vec2::new(aim[0], aim[1]).normalized();
                if aim != Vec2::ZERO {
                    player.aim_dir = aim;
                }
                if shoot_start {
                    player.shoot_start = true;
                }
                player.shoot_hold = shoot_hold;
            }
            ClientMsg::SwitchSlot { slot } => {
                let slot = slot as usize;
                if slot >= 4 {
                    return;
                }
                self.cancel_action(pid);
                if let Some(player) = self.players.get_mut(&pid) {
                    if player.weapons[slot].weapon.is_some() && player.active_slot != slot {
                        player.active_slot = slot;
                        player.weapons_dirty = true;
                        player.full_dirty.insert(pid);
                    }
                }
                self.full_dirty.insert(pid);
            }
            ClientMsg::UseItem { item } => self.start_item_use(pid, item, now),
            ClientMsg::Reload => self.start_reload(pid, now),
            ClientMsg::CancelAction => self.cancel_action(pid),
            ClientMsg::Interact => self.start_revive(pid, now),
            ClientMsg::Emote { emote, is_ping, pos } => {
                let alive = self
                    .players
                    .get(&pid)
                    .map(|p| !p.dead)
                    .unwrap_or(false);
                if alive {
                    self.emotes.push(EmoteMsg {
                        player_id: pid.0,
                        emote,
                        is_ping,
                        pos,
                    });
                }
            }
            ClientMsg::SpectateNext => {
                if let Some(player) = self.players.get_mut(&pid) {
                    if player.spectating.is_some() {
                        player.spectate_next = true;
                    }
                }
            }
            ClientMsg::SpectatePrev => {
                if let Some(player) = self.players.get_mut(&pid) {
                    if player.spectating.is_some() {
                        player.spectate_prev = true;
                    }
                }
            }
            ClientMsg::Ping { t } => {
                self.send_to_player(pid, &ServerMsg::Pong { t });
            }
            ClientMsg::Leave => self.remove_player(pid),
        }
    }

    /// Serialize and transmit one message to one player; send failures are
    /// ignored so an unresponsive socket cannot stall the match.
    pub fn send_to_player(&self, pid: EntityId, msg: &ServerMsg) {
        let Some(player) = self.players.get(&pid) else {
            return;
        };
        match encode_frame(msg) {
            Ok(frame) => player.socket.send(frame),
            Err(e) => debug!(match_id = %self.id, error = %e, "Frame encode failed"),
        }
    }

    /// One simulation tick. Stage order is load-bearing: later stages read
    /// state written by earlier ones.
    pub fn tick_once(&mut self, now: Instant) {
        self.tick += 1;

        // the join window closes a fixed period after the lobby starts
        if self.allow_join {
            if let Some(lobby_start) = self.lobby_start {
                if now.duration_since(lobby_start) >= self.join_window {
                    self.allow_join = false;
                    self.spawn_with_goodies = true;
                    info!(match_id = %self.id, "Join window closed");
                }
            }
        }

        // 1. physics
        let contacts = self.world.step(tick_delta());
        self.handle_contacts(contacts);

        // loot that drifted since last tick needs a partial update
        let moved_loot: Vec<(EntityId, Vec2)> = self
            .loot
            .values()
            .filter_map(|l| {
                let pos = self.world.position(l.body)?;
                (pos.distance_to(l.old_pos) > 1e-4).then_some((l.id, pos))
            })
            .collect();
        for (id, pos) in moved_loot {
            if let Some(l) = self.loot.get_mut(&id) {
                l.old_pos = pos;
            }
            self.partial_dirty.insert(id);
        }

        // 2. bullets at end of range
        self.expire_bullets();

        // 3. queued contact damage
        self.flush_damage_records();

        // 4. gas geometry and damage cadence
        self.ticks_since_gas_damage += 1;
        let gas_tick = if self.ticks_since_gas_damage >= GAS_DAMAGE_INTERVAL_TICKS {
            self.ticks_since_gas_damage = 0;
            self.zone.refresh_geometry(now);
            true
        } else {
            false
        };

        // 5. per-player simulation; each player's block is independent
        let living: Vec<EntityId> = self
            .players
            .values()
            .filter(|p| !p.dead && !p.disconnected)
            .map(|p| p.id)
            .collect();
        for pid in living {
            if gas_tick {
                let unsafe_pos = self
                    .players
                    .get(&pid)
                    .and_then(|p| self.world.position(p.body))
                    .map(|pos| self.zone.is_unsafe(pos))
                    .unwrap_or(false);
                if unsafe_pos {
                    self.damage_player(pid, self.zone.damage, None, KillCause::Gas);
                }
            }
            self.update_player(pid, now);
        }

        // 6. projectiles and explosions, chains included, same tick
        self.update_projectiles();
        self.resolve_explosions();

        // 7. visibility, spectate navigation, payload flush
        self.flush_updates();

        self.check_game_over();

        // 8. reset all per-tick state
        self.reset_tick_state();
    }

    /// Stage 7: per connected player, refresh visibility, resolve spectate
    /// requests, merge dirty sets and transmit the update payload (shared
    /// verbatim with that player's spectators) plus pending notifications.
    fn flush_updates(&mut self) {
        let connected: Vec<EntityId> = self
            .players
            .values()
            .filter(|p| !p.disconnected)
            .map(|p| p.id)
            .collect();

        for pid in connected.iter().copied() {
            self.refresh_visibility(pid);
            self.resolve_spectate(pid);
            self.merge_dirty_for(pid);
        }

        let kills = self.kills.clone();
        let role_announcements = self.role_announcements.clone();

        for pid in connected {
            let is_spectator = self
                .players
                .get(&pid)
                .map(|p| p.is_spectator)
                .unwrap_or(true);

            if !is_spectator {
                if let Some(update) = self.build_update_msg(pid) {
                    let msg = ServerMsg::Update(update);
                    if let Ok(frame) = encode_frame(&msg) {
                        if let Some(player) = self.players.get(&pid) {
                            player.socket.send(frame.clone());
                            for spectator in &player.spectators {
                                if let Some(s) = self.players.get(spectator) {
                                    s.socket.send(frame.clone());
                                }
                            }
                        }
                    }
                }
            }

            if self.alive_count_dirty {
                self.send_to_player(
                    pid,
                    &ServerMsg::AliveCounts {
                        alive: self.alive_count() as u32,
                    },
                );
            }
            for kill in &kills {
                self.send_to_player(pid, &ServerMsg::Kill(kill.clone()));
            }
            for announcement in &role_announcements {
                self.send_to_player(pid, &ServerMsg::RoleAnnouncement(announcement.clone()));
            }
        }
    }

    /// Resolve spectate-begin and navigation requests for one player
    fn resolve_spectate(&mut self, pid: EntityId) {
        let (begin, next, prev, killed_by, spectating) = {
            let Some(player) = self.players.get_mut(&pid) else {
                return;
            };
            let flags = (
                player.spectate_begin,
                player.spectate_next,
                player.spectate_prev,
                player.killed_by,
                player.spectating,
            );
            player.spectate_begin = false;
            player.spectate_next = false;
            player.spectate_prev = false;
            flags
        };

        if begin {
            let target = killed_by
                .filter(|k| self.players.get(k).map(|p| !p.dead).unwrap_or(false))
                .or_else(|| self.random_living_player());
            if let Some(target) = target {
                if let Some(p) = self.players.get_mut(&pid) {
                    p.is_spectator = true;
                }
                self.spectate(pid, target);
            }
        } else if next || prev {
            let Some(current) = spectating else {
                return;
            };
            if self.spectatable.is_empty() {
                return;
            }
            let len = self.spectatable.len() as i64;
            let index = self
                .spectatable
                .iter()
                .position(|id| *id == current)
                .map(|i| i as i64)
                .unwrap_or(0);
            let step = if next { 1 } else { -1 };
            let target = self.spectatable[((index + step).rem_euclid(len)) as usize];
            self.spectate(pid, target);
        }
    }

    /// A battle-royale match ends with a winner once one team remains;
    /// any match ends when nobody is left.
    fn check_game_over(&mut self) {
        if self.over || !self.started {
            return;
        }
        let alive = self.alive_count();
        let game_over = match self.mode {
            GameMode::BattleRoyale => !self.allow_join && alive <= 1,
            GameMode::DeathMatch => alive == 0,
        };
        if !game_over {
            return;
        }

        let winners: Vec<u32> = self
            .players
            .values()
            .filter(|p| !p.dead && !p.disconnected)
            .map(|p| p.id.0)
            .collect();
        let mut stats: Vec<PlayerStatsMsg> = self
            .players
            .values()
            .map(|p| PlayerStatsMsg {
                player_id: p.id.0,
                name: p.name.clone(),
                kills: p.kills,
                damage_dealt: p.damage_dealt,
                damage_taken: p.damage_taken,
                alive: !p.dead && !p.disconnected,
            })
            .collect();
        stats.sort_by(|a, b| b.kills.cmp(&a.kills));
        let msg = ServerMsg::GameOver {
            winners: winners.clone(),
            stats,
        };
        let connected: Vec<EntityId> = self
            .players
            .values()
            .filter(|p| !p.disconnected)
            .map(|p| p.id)
            .collect();
        for pid in connected {
            self.send_to_player(pid, &msg);
        }
        info!(match_id = %self.id, ?winners, "Match over");
        self.over = true;
    }

    /// External stop signal; the loop exits at the end of the current tick
    pub fn end(&mut self) {
        self.over = true;
    }

    /// Clear every per-tick collection and dirty flag. Containers are
    /// reused; nothing reallocates in the hot loop.
    fn reset_tick_state(&mut self) {
        self.full_dirty.clear();
        self.partial_dirty.clear();
        self.deleted_entities.clear();
        self.new_bullets.clear();
        self.explosion_events.clear();
        self.emotes.clear();
        self.kills.clear();
        self.role_announcements.clear();
        self.damage_records.clear();
        self.zone.clear_dirty();
        self.alive_count_dirty = false;
        self.update_objects = false;

        for player in self.players.values_mut() {
            player.clear_tick_state();
        }
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub cmd_tx: mpsc::Sender<MatchCommand>,
    pub player_count: Arc<AtomicUsize>,
    pub tick_stats: Arc<RwLock<TickStats>>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// True once the match task has exited
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.iter().filter(|m| !m.value().is_closed()).count()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().player_count()).sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match task
pub struct GameMatch {
    state: MatchState,
    cmd_rx: mpsc::Receiver<MatchCommand>,
    player_count: Arc<AtomicUsize>,
    tick_stats: Arc<RwLock<TickStats>>,
    tick_times: Vec<Duration>,
}

impl GameMatch {
    pub fn new(
        id: Uuid,
        mode: GameMode,
        seed: u64,
        join_window: Duration,
    ) -> (Self, MatchHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));
        let tick_stats = Arc::new(RwLock::new(TickStats::default()));

        let handle = MatchHandle {
            id,
            cmd_tx,
            player_count: player_count.clone(),
            tick_stats: tick_stats.clone(),
        };

        let game_match = Self {
            state: MatchState::new(id, mode, seed, join_window),
            cmd_rx,
            player_count,
            tick_stats,
            tick_times: Vec::with_capacity(TICK_SAMPLE_SIZE),
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until the match ends.
    ///
    /// Two timers drive the loop: the drift-compensated tick timer and the
    /// one-shot zone stage deadline. Both fire on this task only, so every
    /// mutation of match state is serialized.
    pub async fn run(mut self) {
        info!(match_id = %self.state.id, mode = ?self.state.mode, "Match started");

        let far_future = Duration::from_secs(86_400);
        let mut next_tick = Instant::now() + TICK_DURATION;

        loop {
            let zone_deadline = self.state.zone.deadline();
            let zone_at = zone_deadline.unwrap_or(next_tick + far_future);

            tokio::select! {
                _ = tokio::time::sleep_until(next_tick.into()) => {
                    let tick_start = Instant::now();
                    self.drain_commands(tick_start);
                    self.state.tick_once(tick_start);
                    self.player_count
                        .store(self.state.conn_index.len(), Ordering::Relaxed);

                    let elapsed = tick_start.elapsed();
                    self.record_tick_time(elapsed);

                    if self.state.over {
                        break;
                    }
                    // schedule relative to this tick's cost so overruns
                    // degrade instead of queueing
                    next_tick = Instant::now() + next_tick_delay(elapsed);
                }
                _ = tokio::time::sleep_until(zone_at.into()), if zone_deadline.is_some() => {
                    let now = Instant::now();
                    self.state.zone.advance_stage(self.state.mode, &mut self.state.rng, now);
                }
            }
        }

        info!(match_id = %self.state.id, final_tick = self.state.tick, "Match ended");
    }

    /// Drain queued commands from the socket layer before the tick runs
    fn drain_commands(&mut self, now: Instant) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                MatchCommand::Join {
                    conn,
                    name,
                    outfit,
                    socket,
                } => {
                    if self.state.conn_index.len() >= MAX_PLAYERS {
                        let msg = ServerMsg::Error {
                            code: "match_full".to_string(),
                            message: "Match is full".to_string(),
                        };
                        if let Ok(frame) = encode_frame(&msg) {
                            socket.send(frame);
                        }
                        continue;
                    }
                    self.state.add_player(conn, name, outfit, socket, now);
                }
                MatchCommand::Client { conn, msg } => {
                    self.state.handle_client_msg(conn, msg, now);
                }
                MatchCommand::Disconnect { conn } => {
                    if let Some(&pid) = self.state.conn_index.get(&conn) {
                        self.state.remove_player(pid);
                    }
                }
                MatchCommand::Stop => {
                    info!(match_id = %self.state.id, "Stop requested");
                    self.state.end();
                }
            }
        }
    }

    /// Rolling tick-duration sample; reports the mean and feeds the stats
    /// cell behind the health endpoint.
    fn record_tick_time(&mut self, elapsed: Duration) {
        self.tick_times.push(elapsed);
        if self.tick_times.len() >= TICK_SAMPLE_SIZE {
            let total: Duration = self.tick_times.iter().sum();
            let mean = total / self.tick_times.len() as u32;
            info!(
                match_id = %self.state.id,
                mean_tick_micros = mean.as_micros() as u64,
                "Tick timing report"
            );
            let mut stats = self.tick_stats.write();
            stats.mean_tick_micros = mean.as_micros() as u64;
            stats.sample_count += self.tick_times.len() as u64;
            self.tick_times.clear();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub fn test_state() -> MatchState {
        MatchState::new(
            Uuid::new_v4(),
            GameMode::BattleRoyale,
            42,
            Duration::from_secs(330),
        )
    }

    /// Insert a living player at a fixed position, bypassing spawn search
    pub fn add_test_player(state: &mut MatchState, pos: Vec2) -> EntityId {
        let conn = Uuid::new_v4();
        let id = state.ids.next_object_id();
        let tag = BodyTag::new(id, EntityKind::Player, Layer::GROUND);
        let body = state.world.add_body(tag, pos, PLAYER_RADIUS, true);
        let player = Player::new(
            id,
            body,
            conn,
            format!("player_{}", id.0),
            String::new(),
            None,
            pos,
            PlayerSocket::closed(),
            Instant::now(),
        );
        state.players.insert(id, player);
        state.conn_index.insert(conn, id);
        state.spectatable.push(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::{add_test_player, test_state};
    use super::*;
    use crate::game::data::BulletKind;
    use crate::game::physics::ContactEvent;

    fn now() -> Instant {
        Instant::now()
    }

    #[test]
    fn zone_damage_kills_at_the_fourth_tick_never_negative() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));

        for _ in 0..4 {
            state.damage_player(pid, 30.0, None, KillCause::Gas);
            assert!(state.players[&pid].health >= 0.0);
        }
        let player = &state.players[&pid];
        assert!(player.dead);
        assert_eq!(player.health, 0.0);
    }

    #[test]
    fn a_player_dies_exactly_once() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));

        state.damage_player(pid, 500.0, None, KillCause::Gas);
        let kill_count = state.kills.len();
        state.damage_player(pid, 500.0, None, KillCause::Gas);
        assert_eq!(state.kills.len(), kill_count, "second death emitted a kill");
    }

    #[test]
    fn bullet_is_consumed_by_at_most_one_damage_record() {
        let mut state = test_state();
        let shooter = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        let victim = add_test_player(&mut state, Vec2::new(103.0, 100.0));

        let bullet_id = state.spawn_bullet(
            shooter,
            Weapon::Pistol,
            BulletKind::NineMm,
            Vec2::new(101.5, 100.0),
            Vec2::new(1.0, 0.0),
            Layer::GROUND,
        );
        let bullet_tag = BodyTag::new(bullet_id, EntityKind::Bullet, Layer::GROUND);
        let victim_tag = BodyTag::new(victim, EntityKind::Player, Layer::GROUND);

        // duplicate contact events for the same bullet in one tick
        state.handle_contacts(vec![
            ContactEvent { a: bullet_tag, b: victim_tag, point: Vec2::new(102.0, 100.0) },
            ContactEvent { a: victim_tag, b: bullet_tag, point: Vec2::new(102.0, 100.0) },
        ]);
        assert_eq!(state.damage_records.len(), 1);

        let health_before = state.players[&victim].health;
        state.flush_damage_records();
        let expected = health_before - BulletKind::NineMm.def().damage;
        assert!((state.players[&victim].health - expected).abs() < 1e-4);
        assert!(state.bullets.is_empty());
    }

    #[test]
    fn expired_bullet_with_on_hit_effect_detonates_once() {
        let mut state = test_state();
        let shooter = add_test_player(&mut state, Vec2::new(100.0, 100.0));

        let def = BulletKind::FlareRound.def();
        let bullet_id = state.spawn_bullet(
            shooter,
            Weapon::FlareGun,
            BulletKind::FlareRound,
            Vec2::new(100.0, 100.0),
            Vec2::new(1.0, 0.0),
            Layer::GROUND,
        );
        // push the bullet past its range bound
        let body = state.bullets[&bullet_id].body;
        state
            .world
            .set_position(body, Vec2::new(100.0 + def.max_distance + 1.0, 100.0));

        state.expire_bullets();
        assert!(!state.bullets.contains_key(&bullet_id));
        assert_eq!(state.explosions.len(), 1);

        state.resolve_explosions();
        assert_eq!(state.explosion_events.len(), 1);
        assert!(state.explosions.is_empty());
    }

    #[test]
    fn reload_respects_clip_capacity_and_inventory() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        {
            let player = state.players.get_mut(&pid).unwrap();
            player.weapons[0].weapon = Some(Weapon::Smg);
            player.weapons[0].clip = 25;
            player.active_slot = 0;
            player.inventory.insert(InvKey::Ammo(Ammo::NineMm), 3);
            player.action = crate::game::player::Action::Reload { until: now() };
        }

        state.update_player(pid, now() + Duration::from_secs(5));
        let player = &state.players[&pid];
        // only 3 rounds available even though 5 were missing
        assert_eq!(player.weapons[0].clip, 28);
        assert_eq!(player.inventory_count(InvKey::Ammo(Ammo::NineMm)), 0);
    }

    #[test]
    fn shotgun_reload_is_capped_per_cycle_and_repeats() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        {
            let player = state.players.get_mut(&pid).unwrap();
            player.weapons[0].weapon = Some(Weapon::PumpShotgun);
            player.weapons[0].clip = 0;
            player.active_slot = 0;
            player.inventory.insert(InvKey::Ammo(Ammo::TwelveGauge), 10);
            player.action = crate::game::player::Action::Reload { until: now() };
        }

        state.update_player(pid, now() + Duration::from_secs(5));
        let player = &state.players[&pid];
        assert_eq!(player.weapons[0].clip, 1, "per-cycle cap ignored");
        assert_eq!(player.inventory_count(InvKey::Ammo(Ammo::TwelveGauge)), 9);
        assert!(player.perform_action_again, "reload should auto-continue");
    }

    #[test]
    fn empty_bolt_rifle_refills_in_one_cycle() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        {
            let player = state.players.get_mut(&pid).unwrap();
            player.weapons[0].weapon = Some(Weapon::BoltRifle);
            player.weapons[0].clip = 0;
            player.active_slot = 0;
            player.inventory.insert(InvKey::Ammo(Ammo::SevenSixTwo), 20);
            player.action = crate::game::player::Action::Reload { until: now() };
        }

        state.update_player(pid, now() + Duration::from_secs(5));
        let player = &state.players[&pid];
        assert_eq!(player.weapons[0].clip, 5, "full-refill rule not applied");
        assert_eq!(player.inventory_count(InvKey::Ammo(Ammo::SevenSixTwo)), 15);
        assert!(!player.perform_action_again);
    }

    #[test]
    fn revive_cancels_when_the_pair_separates() {
        let mut state = test_state();
        let actor = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        let target = add_test_player(&mut state, Vec2::new(102.0, 100.0));
        {
            let group = Some(77);
            state.players.get_mut(&actor).unwrap().group = group;
            let t = state.players.get_mut(&target).unwrap();
            t.group = group;
            t.downed = true;
        }

        state.start_revive(actor, now());
        assert!(matches!(
            state.players[&actor].action,
            crate::game::player::Action::Revive { .. }
        ));
        assert_eq!(state.players[&target].being_revived_by, Some(actor));

        // drag the target out of range mid-revive
        let target_body = state.players[&target].body;
        state
            .world
            .set_position(target_body, Vec2::new(200.0, 100.0));
        state.update_player(actor, now());

        assert!(state.players[&actor].action.is_none(), "revive survived range break");
        assert_eq!(state.players[&target].being_revived_by, None);
        // the target stays downed; a cancelled revive cannot complete
        assert!(state.players[&target].downed);
    }

    #[test]
    fn third_teammate_overflows_to_the_default_group() {
        let mut state = test_state();
        let sock = PlayerSocket::closed;
        let a = state.add_player(Uuid::new_v4(), "a".into(), "red".into(), sock(), now());
        let b = state.add_player(Uuid::new_v4(), "b".into(), "red".into(), sock(), now());
        let c = state.add_player(Uuid::new_v4(), "c".into(), "red".into(), sock(), now());

        let ga = state.players[&a].group;
        let gb = state.players[&b].group;
        let gc = state.players[&c].group;
        assert!(ga.is_some());
        assert_eq!(ga, gb);
        assert_eq!(gc, None, "third teammate should fall back");
    }

    #[test]
    fn late_join_becomes_spectator_of_a_living_player() {
        let mut state = test_state();
        let sock = PlayerSocket::closed;
        let a = state.add_player(Uuid::new_v4(), "a".into(), "red".into(), sock(), now());
        let _b = state.add_player(Uuid::new_v4(), "b".into(), "blue".into(), sock(), now());

        state.allow_join = false;
        let late = state.add_player(Uuid::new_v4(), "late".into(), "green".into(), sock(), now());

        let player = &state.players[&late];
        assert!(player.dead);
        assert!(player.is_spectator);
        assert!(player.spectating.is_some());
        assert_eq!(state.alive_count(), 2);
        let _ = a;
    }

    #[test]
    fn joining_seeds_starter_loot_near_the_spawn() {
        let mut state = test_state();
        let pid = state.add_player(
            Uuid::new_v4(),
            "a".into(),
            "red".into(),
            PlayerSocket::closed(),
            now(),
        );
        let spawn = state.players[&pid].last_pos;
        let near_spawn = state
            .loot
            .values()
            .filter(|l| {
                state
                    .world
                    .position(l.body)
                    .map(|p| p.distance_to(spawn) < 10.0)
                    .unwrap_or(false)
            })
            .count();
        assert!(near_spawn >= 5, "expected a starter kit, found {near_spawn}");
    }

    #[test]
    fn removing_a_player_reassigns_its_spectators() {
        let mut state = test_state();
        let sock = PlayerSocket::closed;
        let a = state.add_player(Uuid::new_v4(), "a".into(), "red".into(), sock(), now());
        let b = state.add_player(Uuid::new_v4(), "b".into(), "blue".into(), sock(), now());
        let c = state.add_player(Uuid::new_v4(), "c".into(), "green".into(), sock(), now());

        // c died and is watching a
        state.kill_player(c, None, KillCause::Gas);
        state.players.get_mut(&c).unwrap().is_spectator = true;
        state.spectate(c, a);
        assert!(state.players[&a].spectators.contains(&c));

        state.remove_player(a);
        assert_eq!(state.players[&c].spectating, Some(b));
        assert!(state.players[&a].disconnected);
    }

    #[test]
    fn kill_leader_changes_hands_with_announcements() {
        let mut state = test_state();
        let a = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        let b = add_test_player(&mut state, Vec2::new(120.0, 100.0));
        state.players.get_mut(&a).unwrap().kills = 3;
        state.players.get_mut(&b).unwrap().kills = 2;

        state.maybe_assign_kill_leader(a);
        assert_eq!(state.kill_leader, Some(a));
        assert_eq!(state.role_announcements.len(), 1);

        // b passes a
        state.players.get_mut(&b).unwrap().kills = 4;
        state.maybe_assign_kill_leader(b);
        assert_eq!(state.kill_leader, Some(b));
        // one loss announcement for a, one assignment for b
        assert_eq!(state.role_announcements.len(), 3);

        // leader death clears the role
        state.kill_player(b, Some(a), KillCause::Gun);
        assert_eq!(state.kill_leader, None);
    }

    #[test]
    fn holding_the_trigger_only_refires_automatic_weapons() {
        let mut state = test_state();
        let auto = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        let single = add_test_player(&mut state, Vec2::new(200.0, 200.0));
        {
            let p = state.players.get_mut(&auto).unwrap();
            p.weapons[0].weapon = Some(Weapon::Smg);
            p.weapons[0].clip = 5;
            p.active_slot = 0;
            p.shoot_hold = true;
        }
        {
            let p = state.players.get_mut(&single).unwrap();
            p.weapons[0].weapon = Some(Weapon::Pistol);
            p.weapons[0].clip = 5;
            p.active_slot = 0;
            p.shoot_hold = true;
        }

        state.update_player(auto, now());
        state.update_player(single, now());

        assert_eq!(state.players[&auto].weapons[0].clip, 4, "auto should fire on hold");
        assert_eq!(state.players[&single].weapons[0].clip, 5, "single must not fire on hold");
        assert_eq!(state.new_bullets.len(), 1);
    }

    #[test]
    fn cook_counts_ticks_and_the_fuse_bound_forces_the_throw() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        {
            let p = state.players.get_mut(&pid).unwrap();
            p.weapons[3].weapon = Some(Weapon::FragGrenade);
            p.active_slot = 3;
            p.inventory.insert(InvKey::Ammo(Ammo::Frag), 1);
            p.shoot_start = true;
            p.shoot_hold = true;
        }

        // press starts the cook animation
        state.update_player(pid, now());
        {
            let p = &state.players[&pid];
            assert!(p.anim.active);
            assert_eq!(p.cook_ticks, 0);
        }

        // holding advances the cook counter
        state.update_player(pid, now());
        state.update_player(pid, now());
        assert_eq!(state.players[&pid].cook_ticks, 2);

        // at the fuse bound the throw happens even while still holding
        let fuse_bound =
            (Weapon::FragGrenade.def().fuse_time * crate::util::time::SIMULATION_TPS as f32) as i32;
        state.players.get_mut(&pid).unwrap().cook_ticks = fuse_bound;
        state.update_player(pid, now());

        assert_eq!(state.projectiles.len(), 1, "fuse bound did not force the throw");
        let p = &state.players[&pid];
        assert_eq!(p.cook_ticks, -1);
        assert!(!p.anim.active);
        assert_eq!(p.inventory_count(InvKey::Ammo(Ammo::Frag)), 0);
        // out of grenades: the slot empties and the hands fall back to melee
        assert!(p.weapons[3].weapon.is_none());
        assert_eq!(p.active_slot, crate::game::player::SLOT_MELEE);
        // a fully cooked grenade has no fuse left
        assert_eq!(state.projectiles.values().next().unwrap().fuse_ticks_left, 0);
    }

    #[test]
    fn dirty_sets_clear_unconditionally_at_tick_end() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        state.full_dirty.insert(pid);
        state.partial_dirty.insert(pid);
        state.deleted_entities.insert(pid);
        state.alive_count_dirty = true;

        state.tick_once(now());

        assert!(state.full_dirty.is_empty());
        assert!(state.partial_dirty.is_empty());
        assert!(state.deleted_entities.is_empty());
        assert!(!state.alive_count_dirty);
        assert!(state.emotes.is_empty());
        assert!(state.damage_records.is_empty());
    }

    #[test]
    fn match_ends_when_one_player_remains_after_join_window() {
        let mut state = test_state();
        let sock = PlayerSocket::closed;
        let a = state.add_player(Uuid::new_v4(), "a".into(), "red".into(), sock(), now());
        let b = state.add_player(Uuid::new_v4(), "b".into(), "blue".into(), sock(), now());
        assert!(state.started);

        state.allow_join = false;
        state.kill_player(b, Some(a), KillCause::Gun);
        state.tick_once(now());
        assert!(state.over);
    }

    #[test]
    fn spawn_search_falls_back_to_zone_center() {
        let mut state = test_state();
        // shrink the safe circle to nothing so every candidate is gassed
        state.zone.mode = crate::game::zone::ZoneMode::Waiting;
        state.zone.current_rad = 0.0;
        state.zone.current_pos = Vec2::new(360.0, 360.0);

        let pos = state.find_safe_spawn(EntityKind::Player, Layer::GROUND, None);
        assert_eq!(pos, Vec2::new(360.0, 360.0));
    }
}
