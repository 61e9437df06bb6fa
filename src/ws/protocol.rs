//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Control messages travel as JSON text frames. Per-tick update payloads are
//! serialized through the packet codec into length-prefixed binary frames;
//! the tick loop treats the result as an opaque buffer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::data::{BulletKind, Explosive, GameMode, Item, Weapon};
use crate::game::entity::Layer;
use crate::game::map::{LootItem, ObstacleKind};
use crate::game::player::{AnimKind, InvKey};
use crate::game::zone::ZoneMode;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Request to join the match
    Join {
        name: String,
        /// Outfit key; players sharing an outfit form a team
        outfit: String,
    },

    /// Player input state; resent whenever it changes
    Input {
        /// Sequence number, stale inputs are dropped
        seq: u32,
        move_left: bool,
        move_right: bool,
        move_up: bool,
        move_down: bool,
        /// Analog movement from touch clients
        touch_move_dir: Option<[f32; 2]>,
        /// Aim direction
        aim: [f32; 2],
        /// Trigger pressed this frame
        shoot_start: bool,
        /// Trigger currently held
        shoot_hold: bool,
    },

    /// Switch the active weapon slot (0-3)
    SwitchSlot { slot: u8 },

    /// Start using a consumable
    UseItem { item: Item },

    /// Start reloading the active weapon
    Reload,

    /// Cancel the action in progress
    CancelAction,

    /// Context interaction; used to start reviving a downed teammate
    Interact,

    /// Emote or map ping
    Emote {
        emote: u32,
        is_ping: bool,
        pos: Option<[f32; 2]>,
    },

    /// Spectate navigation
    SpectateNext,
    SpectatePrev,

    /// Ping for latency measurement
    Ping { t: u64 },

    /// Leave the match
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { conn_id: Uuid, server_time: u64 },

    /// Confirmation of match join
    Joined(JoinedMsg),

    /// Per-tick state delta scoped to this client
    Update(UpdateMsg),

    /// Living player count changed
    AliveCounts { alive: u32 },

    /// A kill happened this tick
    Kill(KillMsg),

    /// Role assignment broadcast (kill leader)
    RoleAnnouncement(RoleAnnouncementMsg),

    /// Match has ended
    GameOver {
        winners: Vec<u32>,
        stats: Vec<PlayerStatsMsg>,
    },

    /// Pong response
    Pong { t: u64 },

    /// Error message
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedMsg {
    pub match_id: Uuid,
    pub player_id: u32,
    pub game_mode: GameMode,
    pub map_width: f32,
    pub map_height: f32,
    /// False when the join window has closed; the client starts spectating
    pub allow_join: bool,
    pub spectating: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillMsg {
    pub killer_id: Option<u32>,
    pub victim_id: u32,
    pub cause: KillCause,
    /// Killer's kill count after this kill
    pub killer_kills: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillCause {
    Gun,
    Melee,
    Explosion,
    Gas,
    Bleedout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    KillLeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAnnouncementMsg {
    pub player_id: u32,
    pub role: Role,
    /// True on assignment, false when the role is lost
    pub assigned: bool,
}

/// End-of-match scoreboard entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStatsMsg {
    pub player_id: u32,
    pub name: String,
    pub kills: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
    pub alive: bool,
}

/// One tick's delta for one client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMsg {
    pub tick: u64,
    pub full: Vec<FullObject>,
    pub partial: Vec<PartialObject>,
    pub deleted: Vec<u32>,
    /// Bullets created this tick
    pub bullets: Vec<BulletMsg>,
    pub explosions: Vec<ExplosionMsg>,
    pub emotes: Vec<EmoteMsg>,
    /// Full gas state; present only on stage changes
    pub gas: Option<GasMsg>,
    /// Interpolated circle; present when it moved
    pub gas_circle: Option<GasCircleMsg>,
    pub alive_count: Option<u32>,
    /// Receiving player's own stats, when dirty
    pub local: Option<LocalPlayerMsg>,
}

/// Entire entity state, sent when an object appears or changes shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FullObject {
    Player {
        id: u32,
        pos: [f32; 2],
        dir: [f32; 2],
        layer: Layer,
        downed: bool,
        dead: bool,
        anim_kind: AnimKind,
        anim_seq: u8,
        action_seq: u8,
        name: String,
        outfit: String,
    },
    Loot {
        id: u32,
        pos: [f32; 2],
        item: LootItem,
        count: u32,
        layer: Layer,
    },
    Obstacle {
        id: u32,
        pos: [f32; 2],
        // Wire key disambiguated from the enum's internal `kind` tag; the Rust
        // field name is unchanged.
        #[serde(rename = "obstacle_kind")]
        kind: ObstacleKind,
        layer: Layer,
        health_frac: f32,
        dead: bool,
    },
    Projectile {
        id: u32,
        pos: [f32; 2],
        z_pos: f32,
        weapon: Weapon,
        layer: Layer,
    },
}

/// Only the frequently-changing fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartialObject {
    Player { id: u32, pos: [f32; 2], dir: [f32; 2] },
    Loot { id: u32, pos: [f32; 2] },
    Obstacle { id: u32, health_frac: f32 },
    Projectile { id: u32, pos: [f32; 2], z_pos: f32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletMsg {
    pub id: u32,
    pub pos: [f32; 2],
    pub dir: [f32; 2],
    pub bullet: BulletKind,
    pub shooter_id: Option<u32>,
    pub layer: Layer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplosionMsg {
    pub id: u32,
    pub kind: Explosive,
    pub pos: [f32; 2],
    pub layer: Layer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmoteMsg {
    pub player_id: u32,
    pub emote: u32,
    pub is_ping: bool,
    pub pos: Option<[f32; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasMsg {
    pub mode: ZoneMode,
    pub stage: u32,
    pub pos_old: [f32; 2],
    pub pos_new: [f32; 2],
    pub rad_old: f32,
    pub rad_new: f32,
    pub duration: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasCircleMsg {
    pub pos: [f32; 2],
    pub rad: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvEntry {
    pub key: InvKey,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponSlotMsg {
    pub weapon: Option<Weapon>,
    pub clip: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPlayerMsg {
    pub health: f32,
    pub boost: f32,
    pub downed: bool,
    pub zoom: u8,
    pub inventory: Vec<InvEntry>,
    pub weapons: Vec<WeaponSlotMsg>,
    pub active_slot: u8,
    pub action_seq: u8,
}
