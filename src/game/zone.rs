//! The shrinking gas zone.
//!
//! Stage advancement is driven by a one-shot deadline owned by the match
//! task, independent of the tick cadence. Geometry interpolation and damage
//! application both read the *current* interpolated circle, never the stage
//! endpoints.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::game::data::{zone_stages, GameMode, ZoneStageMode};
use crate::util::math::{lerp, random_point_inside_circle, vec_lerp, Vec2};

/// Gas damage is applied (and the circle refreshed) every this many ticks
pub const GAS_DAMAGE_INTERVAL_TICKS: u32 = 67;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneMode {
    /// Pre-match, no gas anywhere
    Idle,
    /// Countdown before the next shrink; the circle holds still
    Waiting,
    /// Geometry interpolates from the old circle to the new one
    Shrinking,
}

#[derive(Debug, Clone)]
pub struct ZoneState {
    /// Stages consumed from the schedule so far
    pub stage: usize,
    pub mode: ZoneMode,
    pub pos_old: Vec2,
    pub pos_new: Vec2,
    pub rad_old: f32,
    pub rad_new: f32,
    stage_start: Instant,
    stage_duration: f32,
    /// Interpolated circle used for every hit test
    pub current_pos: Vec2,
    pub current_rad: f32,
    /// Damage per gas damage tick
    pub damage: f32,
    /// Set exactly once per stage change, cleared after broadcast
    pub gas_dirty: bool,
    /// Set whenever the interpolated circle moved
    pub gas_circle_dirty: bool,
    deadline: Option<Instant>,
}

impl ZoneState {
    /// Idle zone covering the whole map
    pub fn new(map_center: Vec2, map_width: f32) -> Self {
        Self {
            stage: 0,
            mode: ZoneMode::Idle,
            pos_old: map_center,
            pos_new: map_center,
            rad_old: map_width,
            rad_new: map_width,
            stage_start: Instant::now(),
            stage_duration: 0.0,
            current_pos: map_center,
            current_rad: map_width,
            damage: 0.0,
            gas_dirty: false,
            gas_circle_dirty: false,
            deadline: None,
        }
    }

    /// When the next stage fires, if the schedule has not run out
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Length of the current stage in seconds
    pub fn stage_duration(&self) -> f32 {
        self.stage_duration
    }

    /// Advance to the next stage of the schedule.
    ///
    /// On a waiting stage the new target circle is chosen: a random point
    /// inside the sub-disc around the previous target, sized by the radius
    /// delta. Returns false once the schedule is exhausted.
    pub fn advance_stage<R: Rng>(&mut self, mode: GameMode, rng: &mut R, now: Instant) -> bool {
        let stages = zone_stages(mode);
        let Some(stage) = stages.get(self.stage) else {
            self.deadline = None;
            return false;
        };

        self.stage += 1;
        self.mode = match stage.mode {
            ZoneStageMode::Waiting => ZoneMode::Waiting,
            ZoneStageMode::Shrinking => ZoneMode::Shrinking,
        };

        if stage.mode == ZoneStageMode::Waiting {
            self.pos_old = self.pos_new;
            if stage.rad_new != 0.0 {
                self.pos_new = random_point_inside_circle(
                    rng,
                    self.pos_old,
                    (stage.rad_old - stage.rad_new) / 4.0,
                );
            } else {
                self.pos_new = self.pos_old;
            }
            self.current_pos = self.pos_old;
            self.current_rad = stage.rad_old;
        }

        self.rad_old = stage.rad_old;
        self.rad_new = stage.rad_new;
        self.damage = stage.damage;
        self.stage_start = now;
        self.stage_duration = stage.duration;
        self.gas_dirty = true;
        self.gas_circle_dirty = true;

        self.deadline = if stage.duration > 0.0 {
            Some(now + Duration::from_secs_f32(stage.duration))
        } else {
            None
        };

        true
    }

    /// Recompute the interpolated circle. Called on the gas damage cadence
    /// rather than every tick to bound cost.
    pub fn refresh_geometry(&mut self, now: Instant) {
        if self.mode != ZoneMode::Shrinking || self.stage_duration <= 0.0 {
            return;
        }
        let t = now.duration_since(self.stage_start).as_secs_f32() / self.stage_duration;
        self.current_pos = vec_lerp(t, self.pos_old, self.pos_new);
        // never grows within a stage, even if the clock misbehaves
        self.current_rad = self.current_rad.min(lerp(t, self.rad_old, self.rad_new));
        self.gas_circle_dirty = true;
    }

    /// Is this position currently taking gas damage
    pub fn is_unsafe(&self, pos: Vec2) -> bool {
        if self.mode == ZoneMode::Idle {
            return false;
        }
        pos.distance_to(self.current_pos) >= self.current_rad
    }

    pub fn clear_dirty(&mut self) {
        self.gas_dirty = false;
        self.gas_circle_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn fresh_zone() -> ZoneState {
        ZoneState::new(Vec2::new(360.0, 360.0), 720.0)
    }

    #[test]
    fn idle_zone_damages_nobody() {
        let zone = fresh_zone();
        assert!(!zone.is_unsafe(Vec2::new(0.0, 0.0)));
        assert!(!zone.is_unsafe(Vec2::new(10_000.0, 10_000.0)));
    }

    #[test]
    fn advance_walks_the_schedule_and_exhausts() {
        let mut zone = fresh_zone();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let now = Instant::now();

        let total = zone_stages(GameMode::BattleRoyale).len();
        for _ in 0..total {
            assert!(zone.advance_stage(GameMode::BattleRoyale, &mut rng, now));
        }
        // terminal stage has no deadline; a further advance is a no-op
        assert!(zone.deadline().is_none());
        assert!(!zone.advance_stage(GameMode::BattleRoyale, &mut rng, now));
    }

    #[test]
    fn stage_change_marks_gas_dirty_once() {
        let mut zone = fresh_zone();
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        zone.advance_stage(GameMode::BattleRoyale, &mut rng, Instant::now());
        assert!(zone.gas_dirty);
        zone.clear_dirty();
        assert!(!zone.gas_dirty);
    }

    #[test]
    fn new_target_stays_inside_bounded_subdisc() {
        for seed in 0..50u64 {
            let mut zone = fresh_zone();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            zone.advance_stage(GameMode::BattleRoyale, &mut rng, Instant::now());
            let bound = (zone.rad_old - zone.rad_new) / 4.0;
            assert!(zone.pos_new.distance_to(zone.pos_old) <= bound + 1e-3);
        }
    }

    #[test]
    fn radius_is_non_increasing_through_a_shrink_stage() {
        let mut zone = fresh_zone();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let start = Instant::now();

        // waiting stage picks the target, shrink stage interpolates
        zone.advance_stage(GameMode::BattleRoyale, &mut rng, start);
        zone.advance_stage(GameMode::BattleRoyale, &mut rng, start);
        assert_eq!(zone.mode, ZoneMode::Shrinking);

        let mut last = zone.current_rad;
        for step in 1..=40u64 {
            zone.refresh_geometry(start + Duration::from_millis(step * 1_000));
            assert!(zone.current_rad <= last + 1e-4, "radius grew mid-stage");
            last = zone.current_rad;
        }
        assert!((last - zone.rad_new).abs() < 1.0);
    }

    #[test]
    fn hit_test_uses_interpolated_circle() {
        let mut zone = fresh_zone();
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let start = Instant::now();
        zone.advance_stage(GameMode::BattleRoyale, &mut rng, start);

        // just inside the old radius is safe, just outside is not
        let inside = zone.current_pos.add(Vec2::new(zone.current_rad - 1.0, 0.0));
        let outside = zone.current_pos.add(Vec2::new(zone.current_rad + 1.0, 0.0));
        assert!(!zone.is_unsafe(inside));
        assert!(zone.is_unsafe(outside));
    }
}
