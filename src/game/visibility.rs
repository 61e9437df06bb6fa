//! Per-player visibility and dirty-set merging.
//!
//! Each connected player carries a visible-object set, recomputed only when
//! the player has moved enough since the last recomputation or when the
//! match forces a refresh (joins, obstacle destruction). The match-level
//! full/partial/deleted sets are filtered against that visible set before
//! they reach a player, so an update payload can never leak entities the
//! player cannot observe, and its size is bounded by the view, not by the
//! match population.

use crate::game::entity::EntityId;
use crate::game::r#match::MatchState;
use crate::util::math::Vec2;

/// Movement samples a player accumulates before its visible set is rebuilt
pub const MOVES_BEFORE_REFRESH: u32 = 8;

impl MatchState {
    /// Rebuild the player's visible set if it moved past the threshold or a
    /// global refresh is pending.
    pub fn refresh_visibility(&mut self, pid: EntityId) {
        let needs_update = self
            .players
            .get(&pid)
            .map(|p| p.moves_since_update > MOVES_BEFORE_REFRESH || self.update_objects)
            .unwrap_or(false);
        if needs_update {
            self.update_visible_objects(pid);
        }
    }

    /// Recompute which entities the player can currently observe.
    ///
    /// Entities entering the view are queued as full updates for this
    /// player; entities leaving it are queued as deletions.
    pub fn update_visible_objects(&mut self, pid: EntityId) {
        let (center, layer, radius) = {
            let Some(player) = self.players.get(&pid) else {
                return;
            };
            let center = self.world.position(player.body).unwrap_or(player.last_pos);
            (center, player.layer, player.view_radius())
        };

        let mut visible = std::collections::HashSet::new();

        let in_view = |pos: Vec2| pos.distance_to(center) <= radius;

        for other in self.players.values() {
            if other.id == pid {
                visible.insert(other.id);
                continue;
            }
            if other.disconnected && other.dead {
                continue;
            }
            if let Some(pos) = self.world.position(other.body) {
                if in_view(pos) {
                    visible.insert(other.id);
                }
            }
        }
        for loot in self.loot.values() {
            if loot.layer.same_as(layer) {
                if let Some(pos) = self.world.position(loot.body) {
                    if in_view(pos) {
                        visible.insert(loot.id);
                    }
                }
            }
        }
        for obstacle in self.obstacles.values() {
            if !obstacle.dead && in_view(obstacle.pos) {
                visible.insert(obstacle.id);
            }
        }
        for projectile in self.projectiles.values() {
            if let Some(pos) = self.world.position(projectile.body) {
                if in_view(pos) {
                    visible.insert(projectile.id);
                }
            }
        }

        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };
        let old = std::mem::replace(&mut player.visible, visible);

        // queue transitions against the fresh set
        let freshly_visible: Vec<EntityId> = player
            .visible
            .iter()
            .filter(|id| !old.contains(id))
            .copied()
            .collect();
        let gone: Vec<EntityId> = old
            .iter()
            .filter(|id| !player.visible.contains(id))
            .copied()
            .collect();

        for id in freshly_visible {
            player.full_dirty.insert(id);
        }
        for id in gone {
            if id != pid {
                player.deleted.insert(id);
            }
        }
        player.moves_since_update = 0;
    }

    /// Merge this tick's match-level dirty sets into the player's local
    /// sets, scoped to its visible set. An object queued full is never also
    /// queued partial.
    pub fn merge_dirty_for(&mut self, pid: EntityId) {
        let Some(player) = self.players.get_mut(&pid) else {
            return;
        };

        for id in &self.full_dirty {
            if player.visible.contains(id) && !player.full_dirty.contains(id) {
                player.full_dirty.insert(*id);
            }
        }
        for id in &self.partial_dirty {
            if player.visible.contains(id) && !player.full_dirty.contains(id) {
                player.partial_dirty.insert(*id);
            }
        }
        for id in &self.deleted_entities {
            if *id != pid {
                player.deleted.insert(*id);
                player.full_dirty.remove(id);
                player.partial_dirty.remove(id);
            }
        }

        // never both classes for the same object
        let fulls: Vec<EntityId> = player.full_dirty.iter().copied().collect();
        for id in fulls {
            player.partial_dirty.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::r#match::tests_support::{add_test_player, test_state};
    use crate::game::map::LootItem;
    use crate::game::data::Item;
    use crate::game::entity::Layer;

    #[test]
    fn visible_set_contains_nearby_not_far() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        let near = add_test_player(&mut state, Vec2::new(110.0, 100.0));
        let far = add_test_player(&mut state, Vec2::new(400.0, 400.0));

        state.update_visible_objects(pid);
        let player = &state.players[&pid];
        assert!(player.visible.contains(&near));
        assert!(!player.visible.contains(&far));
        assert!(player.visible.contains(&pid));
    }

    #[test]
    fn dirty_merge_is_a_subset_of_visibility() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        let near = add_test_player(&mut state, Vec2::new(110.0, 100.0));
        let far = add_test_player(&mut state, Vec2::new(400.0, 400.0));
        state.update_visible_objects(pid);

        state.full_dirty.insert(near);
        state.full_dirty.insert(far);
        state.partial_dirty.insert(near);
        state.partial_dirty.insert(far);

        state.merge_dirty_for(pid);
        let player = &state.players[&pid];
        for id in player.full_dirty.iter().chain(player.partial_dirty.iter()) {
            assert!(
                player.visible.contains(id),
                "dirty entry {id} leaked past visibility"
            );
        }
        assert!(!player.full_dirty.contains(&far));
    }

    #[test]
    fn full_update_suppresses_partial() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        let other = add_test_player(&mut state, Vec2::new(105.0, 100.0));
        state.update_visible_objects(pid);

        state.full_dirty.insert(other);
        state.partial_dirty.insert(other);
        state.merge_dirty_for(pid);

        let player = &state.players[&pid];
        assert!(player.full_dirty.contains(&other));
        assert!(!player.partial_dirty.contains(&other));
    }

    #[test]
    fn leaving_view_queues_deletion() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        let loot_id = state.spawn_loot(
            LootItem::Item(Item::Bandage),
            1,
            Vec2::new(105.0, 100.0),
            Layer::GROUND,
        );
        state.update_visible_objects(pid);
        assert!(state.players[&pid].visible.contains(&loot_id));

        // move the loot far out of view and rebuild
        if let Some(loot) = state.loot.get(&loot_id) {
            let body = loot.body;
            state.world.set_position(body, Vec2::new(500.0, 500.0));
        }
        state.players.get_mut(&pid).unwrap().clear_tick_state();
        state.update_visible_objects(pid);
        assert!(!state.players[&pid].visible.contains(&loot_id));
        assert!(state.players[&pid].deleted.contains(&loot_id));
    }

    #[test]
    fn deletions_always_propagate_except_self() {
        let mut state = test_state();
        let pid = add_test_player(&mut state, Vec2::new(100.0, 100.0));
        state.update_visible_objects(pid);

        state.deleted_entities.insert(pid);
        let ghost = crate::game::entity::EntityId(9999);
        state.deleted_entities.insert(ghost);
        state.merge_dirty_for(pid);

        let player = &state.players[&pid];
        assert!(player.deleted.contains(&ghost));
        assert!(!player.deleted.contains(&pid));
    }
}
