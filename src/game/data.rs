//! Static game-balance tables: weapons, ammunition, items, explosions and
//! the per-mode zone schedule. Everything here is read-only and looked up
//! by typed key.

use serde::{Deserialize, Serialize};

/// Game modes hosted by this server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    DeathMatch,
    BattleRoyale,
}

impl std::str::FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deathmatch" | "death_match" => Ok(Self::DeathMatch),
            "battle_royale" | "br" => Ok(Self::BattleRoyale),
            other => Err(format!("unknown game mode: {other}")),
        }
    }
}

/// Trigger behavior for guns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireMode {
    /// One shot per trigger press
    Single,
    /// Re-fires while the trigger is held and the cooldown has elapsed
    Auto,
    /// Held trigger fires short bursts
    Burst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    Gun,
    Melee,
    Throwable,
}

/// Weapon type keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weapon {
    Fists,
    Pistol,
    Smg,
    AssaultRifle,
    BurstRifle,
    PumpShotgun,
    BoltRifle,
    FlareGun,
    FragGrenade,
    MirvGrenade,
}

/// Ammunition inventory keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ammo {
    NineMm,
    FiveFiveSix,
    SevenSixTwo,
    TwelveGauge,
    Flare,
    Frag,
    Mirv,
}

/// Consumable item keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Item {
    Bandage,
    Healthkit,
    Soda,
    Painkiller,
}

/// Bullet type keys (what actually flies and hits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletKind {
    NineMm,
    FiveFiveSix,
    SevenSixTwo,
    Shell,
    FlareRound,
}

/// Explosion type keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Explosive {
    Frag,
    Mirv,
    MirvMini,
    Flare,
}

#[derive(Debug, Clone, Copy)]
pub struct WeaponDef {
    pub name: &'static str,
    pub kind: WeaponKind,
    pub fire_mode: FireMode,
    pub ammo: Option<Ammo>,
    pub bullet: Option<BulletKind>,
    /// Clip capacity; reload never pushes the clip above this
    pub clip: u32,
    /// Maximum rounds transferred per reload cycle
    pub max_reload: u32,
    /// Seconds a reload cycle takes
    pub reload_time: f32,
    /// Seconds between shots
    pub fire_delay: f32,
    /// Pellets per trigger pull
    pub bullets_per_shot: u32,
    /// Maximum angular deviation per bullet, radians
    pub spread: f32,
    /// Seconds a cooked throwable survives before detonating
    pub fuse_time: f32,
    /// Detonation effect for throwables
    pub explosive: Option<Explosive>,
    /// When the clip is fully empty the per-cycle reload cap is waived
    pub full_reload_when_empty: bool,
    pub melee_damage: f32,
    pub melee_range: f32,
}

const WEAPON_DEFAULT: WeaponDef = WeaponDef {
    name: "",
    kind: WeaponKind::Gun,
    fire_mode: FireMode::Single,
    ammo: None,
    bullet: None,
    clip: 0,
    max_reload: 0,
    reload_time: 0.0,
    fire_delay: 0.0,
    bullets_per_shot: 1,
    spread: 0.0,
    fuse_time: 0.0,
    explosive: None,
    full_reload_when_empty: false,
    melee_damage: 0.0,
    melee_range: 0.0,
};

impl Weapon {
    pub fn def(self) -> &'static WeaponDef {
        match self {
            Weapon::Fists => &FISTS,
            Weapon::Pistol => &PISTOL,
            Weapon::Smg => &SMG,
            Weapon::AssaultRifle => &ASSAULT_RIFLE,
            Weapon::BurstRifle => &BURST_RIFLE,
            Weapon::PumpShotgun => &PUMP_SHOTGUN,
            Weapon::BoltRifle => &BOLT_RIFLE,
            Weapon::FlareGun => &FLARE_GUN,
            Weapon::FragGrenade => &FRAG_GRENADE,
            Weapon::MirvGrenade => &MIRV_GRENADE,
        }
    }
}

const FISTS: WeaponDef = WeaponDef {
    name: "Fists",
    kind: WeaponKind::Melee,
    fire_delay: 0.25,
    melee_damage: 24.0,
    melee_range: 1.75,
    ..WEAPON_DEFAULT
};

const PISTOL: WeaponDef = WeaponDef {
    name: "P92",
    ammo: Some(Ammo::NineMm),
    bullet: Some(BulletKind::NineMm),
    clip: 15,
    max_reload: 15,
    reload_time: 1.1,
    fire_delay: 0.18,
    spread: 0.07,
    ..WEAPON_DEFAULT
};

const SMG: WeaponDef = WeaponDef {
    name: "MP5",
    fire_mode: FireMode::Auto,
    ammo: Some(Ammo::NineMm),
    bullet: Some(BulletKind::NineMm),
    clip: 30,
    max_reload: 30,
    reload_time: 1.7,
    fire_delay: 0.09,
    spread: 0.09,
    ..WEAPON_DEFAULT
};

const ASSAULT_RIFLE: WeaponDef = WeaponDef {
    name: "M4A1-S",
    fire_mode: FireMode::Auto,
    ammo: Some(Ammo::FiveFiveSix),
    bullet: Some(BulletKind::FiveFiveSix),
    clip: 30,
    max_reload: 30,
    reload_time: 2.1,
    fire_delay: 0.1,
    spread: 0.05,
    ..WEAPON_DEFAULT
};

const BURST_RIFLE: WeaponDef = WeaponDef {
    name: "M93R",
    fire_mode: FireMode::Burst,
    ammo: Some(Ammo::FiveFiveSix),
    bullet: Some(BulletKind::FiveFiveSix),
    clip: 25,
    max_reload: 25,
    reload_time: 2.0,
    fire_delay: 0.24,
    bullets_per_shot: 3,
    spread: 0.06,
    ..WEAPON_DEFAULT
};

const PUMP_SHOTGUN: WeaponDef = WeaponDef {
    name: "M870",
    ammo: Some(Ammo::TwelveGauge),
    bullet: Some(BulletKind::Shell),
    clip: 5,
    // shells load one at a time; reload repeats until full
    max_reload: 1,
    reload_time: 0.75,
    fire_delay: 0.9,
    bullets_per_shot: 9,
    spread: 0.18,
    ..WEAPON_DEFAULT
};

const BOLT_RIFLE: WeaponDef = WeaponDef {
    name: "Mosin-Nagant",
    ammo: Some(Ammo::SevenSixTwo),
    bullet: Some(BulletKind::SevenSixTwo),
    clip: 5,
    max_reload: 1,
    reload_time: 0.9,
    fire_delay: 1.75,
    spread: 0.01,
    // stripper clip: an empty rifle refills in one cycle
    full_reload_when_empty: true,
    ..WEAPON_DEFAULT
};

const FLARE_GUN: WeaponDef = WeaponDef {
    name: "Flare Gun",
    ammo: Some(Ammo::Flare),
    bullet: Some(BulletKind::FlareRound),
    clip: 1,
    max_reload: 1,
    reload_time: 1.3,
    fire_delay: 1.0,
    spread: 0.02,
    ..WEAPON_DEFAULT
};

const FRAG_GRENADE: WeaponDef = WeaponDef {
    name: "Frag Grenade",
    kind: WeaponKind::Throwable,
    ammo: Some(Ammo::Frag),
    fire_delay: 0.5,
    fuse_time: 4.0,
    explosive: Some(Explosive::Frag),
    ..WEAPON_DEFAULT
};

const MIRV_GRENADE: WeaponDef = WeaponDef {
    name: "MIRV Grenade",
    kind: WeaponKind::Throwable,
    ammo: Some(Ammo::Mirv),
    fire_delay: 0.5,
    fuse_time: 4.0,
    explosive: Some(Explosive::Mirv),
    ..WEAPON_DEFAULT
};

#[derive(Debug, Clone, Copy)]
pub struct BulletDef {
    pub damage: f32,
    /// World units per second
    pub speed: f32,
    /// Despawn bound; some types detonate here instead of vanishing
    pub max_distance: f32,
    /// Damage multiplier against non-player obstacles
    pub obstacle_damage_mult: f32,
    /// Effect spawned at the impact (or expiry) point
    pub on_hit: Option<Explosive>,
    pub radius: f32,
}

impl BulletKind {
    pub fn def(self) -> &'static BulletDef {
        match self {
            BulletKind::NineMm => &BulletDef {
                damage: 12.0,
                speed: 85.0,
                max_distance: 100.0,
                obstacle_damage_mult: 1.0,
                on_hit: None,
                radius: 0.12,
            },
            BulletKind::FiveFiveSix => &BulletDef {
                damage: 14.0,
                speed: 105.0,
                max_distance: 180.0,
                obstacle_damage_mult: 1.0,
                on_hit: None,
                radius: 0.12,
            },
            BulletKind::SevenSixTwo => &BulletDef {
                damage: 72.0,
                speed: 120.0,
                max_distance: 250.0,
                obstacle_damage_mult: 1.5,
                on_hit: None,
                radius: 0.14,
            },
            BulletKind::Shell => &BulletDef {
                damage: 12.5,
                speed: 66.0,
                max_distance: 27.0,
                obstacle_damage_mult: 1.0,
                on_hit: None,
                radius: 0.16,
            },
            BulletKind::FlareRound => &BulletDef {
                damage: 8.0,
                speed: 30.0,
                max_distance: 48.0,
                obstacle_damage_mult: 1.0,
                on_hit: Some(Explosive::Flare),
                radius: 0.25,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AmmoDef {
    /// Inventory cap per ammo type
    pub max_stack: u32,
}

impl Ammo {
    pub fn def(self) -> &'static AmmoDef {
        match self {
            Ammo::NineMm => &AmmoDef { max_stack: 240 },
            Ammo::FiveFiveSix => &AmmoDef { max_stack: 240 },
            Ammo::SevenSixTwo => &AmmoDef { max_stack: 90 },
            Ammo::TwelveGauge => &AmmoDef { max_stack: 60 },
            Ammo::Flare => &AmmoDef { max_stack: 6 },
            Ammo::Frag => &AmmoDef { max_stack: 12 },
            Ammo::Mirv => &AmmoDef { max_stack: 4 },
        }
    }
}

/// What a completed item use does to the user
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemEffect {
    Heal(f32),
    FullHeal,
    Boost(f32),
}

#[derive(Debug, Clone, Copy)]
pub struct ItemDef {
    pub effect: ItemEffect,
    /// Seconds the use action takes
    pub use_time: f32,
    pub max_stack: u32,
}

impl Item {
    pub fn def(self) -> &'static ItemDef {
        match self {
            Item::Bandage => &ItemDef {
                effect: ItemEffect::Heal(15.0),
                use_time: 3.0,
                max_stack: 30,
            },
            Item::Healthkit => &ItemDef {
                effect: ItemEffect::FullHeal,
                use_time: 6.0,
                max_stack: 4,
            },
            Item::Soda => &ItemDef {
                effect: ItemEffect::Boost(25.0),
                use_time: 3.0,
                max_stack: 15,
            },
            Item::Painkiller => &ItemDef {
                effect: ItemEffect::Boost(50.0),
                use_time: 5.0,
                max_stack: 4,
            },
        }
    }
}

/// Follow-up explosions spawned when a parent explosion resolves
#[derive(Debug, Clone, Copy)]
pub struct ChainedExplosion {
    pub kind: Explosive,
    pub count: u32,
    /// Children scatter uniformly within this radius of the parent
    pub spread_radius: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ExplosionDef {
    /// Full damage inside this radius
    pub inner_radius: f32,
    /// Damage falls off linearly to `min_damage` at this radius
    pub outer_radius: f32,
    pub max_damage: f32,
    pub min_damage: f32,
    pub obstacle_damage_mult: f32,
    /// Impulse applied to players near the blast
    pub knockback: f32,
    pub chain: Option<ChainedExplosion>,
}

impl Explosive {
    pub fn def(self) -> &'static ExplosionDef {
        match self {
            Explosive::Frag => &ExplosionDef {
                inner_radius: 3.0,
                outer_radius: 6.5,
                max_damage: 125.0,
                min_damage: 30.0,
                obstacle_damage_mult: 1.25,
                knockback: 14.0,
                chain: None,
            },
            Explosive::Mirv => &ExplosionDef {
                inner_radius: 3.0,
                outer_radius: 6.5,
                max_damage: 125.0,
                min_damage: 30.0,
                obstacle_damage_mult: 1.25,
                knockback: 14.0,
                chain: Some(ChainedExplosion {
                    kind: Explosive::MirvMini,
                    count: 6,
                    spread_radius: 4.5,
                }),
            },
            Explosive::MirvMini => &ExplosionDef {
                inner_radius: 1.5,
                outer_radius: 3.5,
                max_damage: 40.0,
                min_damage: 12.0,
                obstacle_damage_mult: 1.0,
                knockback: 6.0,
                chain: None,
            },
            Explosive::Flare => &ExplosionDef {
                inner_radius: 1.0,
                outer_radius: 2.5,
                max_damage: 18.0,
                min_damage: 6.0,
                obstacle_damage_mult: 0.5,
                knockback: 3.0,
                chain: None,
            },
        }
    }
}

/// Zone stage phases alternate between holding and closing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneStageMode {
    Waiting,
    Shrinking,
}

#[derive(Debug, Clone, Copy)]
pub struct ZoneStage {
    pub mode: ZoneStageMode,
    /// Seconds until the next stage fires; 0 marks the terminal stage
    pub duration: f32,
    pub rad_old: f32,
    pub rad_new: f32,
    /// Damage per gas damage tick while outside the safe circle
    pub damage: f32,
}

const BATTLE_ROYALE_STAGES: &[ZoneStage] = &[
    ZoneStage { mode: ZoneStageMode::Waiting, duration: 80.0, rad_old: 512.0, rad_new: 340.0, damage: 1.4 },
    ZoneStage { mode: ZoneStageMode::Shrinking, duration: 30.0, rad_old: 512.0, rad_new: 340.0, damage: 1.4 },
    ZoneStage { mode: ZoneStageMode::Waiting, duration: 50.0, rad_old: 340.0, rad_new: 225.0, damage: 2.2 },
    ZoneStage { mode: ZoneStageMode::Shrinking, duration: 25.0, rad_old: 340.0, rad_new: 225.0, damage: 2.2 },
    ZoneStage { mode: ZoneStageMode::Waiting, duration: 40.0, rad_old: 225.0, rad_new: 120.0, damage: 3.5 },
    ZoneStage { mode: ZoneStageMode::Shrinking, duration: 20.0, rad_old: 225.0, rad_new: 120.0, damage: 3.5 },
    ZoneStage { mode: ZoneStageMode::Waiting, duration: 30.0, rad_old: 120.0, rad_new: 60.0, damage: 7.5 },
    ZoneStage { mode: ZoneStageMode::Shrinking, duration: 15.0, rad_old: 120.0, rad_new: 60.0, damage: 7.5 },
    ZoneStage { mode: ZoneStageMode::Waiting, duration: 20.0, rad_old: 60.0, rad_new: 0.0, damage: 10.0 },
    ZoneStage { mode: ZoneStageMode::Shrinking, duration: 10.0, rad_old: 60.0, rad_new: 0.0, damage: 10.0 },
    ZoneStage { mode: ZoneStageMode::Waiting, duration: 0.0, rad_old: 0.0, rad_new: 0.0, damage: 12.0 },
];

const DEATH_MATCH_STAGES: &[ZoneStage] = &[
    ZoneStage { mode: ZoneStageMode::Waiting, duration: 120.0, rad_old: 512.0, rad_new: 225.0, damage: 2.2 },
    ZoneStage { mode: ZoneStageMode::Shrinking, duration: 40.0, rad_old: 512.0, rad_new: 225.0, damage: 2.2 },
    ZoneStage { mode: ZoneStageMode::Waiting, duration: 60.0, rad_old: 225.0, rad_new: 60.0, damage: 7.5 },
    ZoneStage { mode: ZoneStageMode::Shrinking, duration: 20.0, rad_old: 225.0, rad_new: 60.0, damage: 7.5 },
    ZoneStage { mode: ZoneStageMode::Waiting, duration: 0.0, rad_old: 60.0, rad_new: 60.0, damage: 10.0 },
];

/// Zone schedule for a game mode
pub fn zone_stages(mode: GameMode) -> &'static [ZoneStage] {
    match mode {
        GameMode::BattleRoyale => BATTLE_ROYALE_STAGES,
        GameMode::DeathMatch => DEATH_MATCH_STAGES,
    }
}

/// Passive healing rate in health per second for a given boost level
pub fn boost_heal_rate(boost: f32) -> f32 {
    if boost <= 0.0 {
        0.0
    } else if boost <= 25.0 {
        0.5
    } else if boost <= 50.0 {
        1.25
    } else if boost <= 87.5 {
        1.5
    } else {
        1.75
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_schedules_end_with_terminal_stage() {
        for mode in [GameMode::BattleRoyale, GameMode::DeathMatch] {
            let stages = zone_stages(mode);
            assert!(!stages.is_empty());
            assert_eq!(stages.last().unwrap().duration, 0.0);
        }
    }

    #[test]
    fn shrink_stages_never_grow_the_circle() {
        for stage in zone_stages(GameMode::BattleRoyale) {
            assert!(stage.rad_new <= stage.rad_old);
        }
    }

    #[test]
    fn guns_always_define_ammo_and_bullet() {
        let guns = [
            Weapon::Pistol,
            Weapon::Smg,
            Weapon::AssaultRifle,
            Weapon::BurstRifle,
            Weapon::PumpShotgun,
            Weapon::BoltRifle,
            Weapon::FlareGun,
        ];
        for gun in guns {
            let def = gun.def();
            assert_eq!(def.kind, WeaponKind::Gun);
            assert!(def.ammo.is_some(), "{} has no ammo type", def.name);
            assert!(def.bullet.is_some(), "{} has no bullet type", def.name);
            assert!(def.max_reload <= def.clip);
        }
    }

    #[test]
    fn throwables_define_fuse_and_explosive() {
        for nade in [Weapon::FragGrenade, Weapon::MirvGrenade] {
            let def = nade.def();
            assert_eq!(def.kind, WeaponKind::Throwable);
            assert!(def.fuse_time > 0.0);
            assert!(def.explosive.is_some());
        }
    }

    #[test]
    fn boost_heal_rate_is_monotonic() {
        let mut last = 0.0;
        for boost in [0.0, 10.0, 30.0, 60.0, 95.0] {
            let rate = boost_heal_rate(boost);
            assert!(rate >= last);
            last = rate;
        }
    }
}
