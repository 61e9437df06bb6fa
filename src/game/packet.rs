//! Update packet building and framing.
//!
//! The codec boundary: given a player whose dirty sets have been resolved
//! for this tick, produce one length-prefixed binary buffer. Callers treat
//! the result as opaque bytes; nothing outside this module depends on the
//! encoding.

use bytes::{BufMut, Bytes, BytesMut};

use crate::game::entity::EntityId;
use crate::game::r#match::MatchState;
use crate::ws::protocol::{
    BulletMsg, FullObject, GasCircleMsg, GasMsg, InvEntry, LocalPlayerMsg, PartialObject,
    ServerMsg, UpdateMsg, WeaponSlotMsg,
};

/// Serialize a server message into a length-prefixed frame.
///
/// Layout: 4-byte little-endian payload length, then the payload.
pub fn encode_frame(msg: &ServerMsg) -> Result<Bytes, serde_json::Error> {
    let payload = serde_json::to_vec(msg)?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Split one frame off the front of a buffer, if complete.
pub fn decode_frame(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < 4 {
        return None;
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return None;
    }
    let _ = buf.split_to(4);
    Some(buf.split_to(len).freeze())
}

impl MatchState {
    /// Assemble the update payload for one player from its resolved dirty
    /// sets. Read-only; the dirty sets are cleared by the tick reset.
    pub fn build_update_msg(&self, pid: EntityId) -> Option<UpdateMsg> {
        let player = self.players.get(&pid)?;

        let mut full: Vec<FullObject> = player
            .full_dirty
            .iter()
            .filter_map(|id| self.full_object(*id))
            .collect();
        full.sort_by_key(full_object_id);

        let mut partial: Vec<PartialObject> = player
            .partial_dirty
            .iter()
            .filter_map(|id| self.partial_object(*id))
            .collect();
        partial.sort_by_key(partial_object_id);

        let mut deleted: Vec<u32> = player.deleted.iter().map(|id| id.0).collect();
        deleted.sort_unstable();

        let bullets: Vec<BulletMsg> = self
            .new_bullets
            .iter()
            .filter_map(|id| {
                let bullet = self.bullets.get(id)?;
                let pos = self.world.position(bullet.body)?;
                Some(BulletMsg {
                    id: bullet.id.0,
                    pos: [pos.x, pos.y],
                    dir: [bullet.direction.x, bullet.direction.y],
                    bullet: bullet.kind,
                    shooter_id: bullet.shooter.map(|s| s.0),
                    layer: bullet.layer,
                })
            })
            .collect();

        let emotes = self
            .emotes
            .iter()
            .filter(|e| !e.is_ping || e.player_id == pid.0)
            .cloned()
            .collect();

        let gas = self.zone.gas_dirty.then(|| GasMsg {
            mode: self.zone.mode,
            stage: self.zone.stage as u32,
            pos_old: [self.zone.pos_old.x, self.zone.pos_old.y],
            pos_new: [self.zone.pos_new.x, self.zone.pos_new.y],
            rad_old: self.zone.rad_old,
            rad_new: self.zone.rad_new,
            duration: self.zone.stage_duration(),
        });
        let gas_circle = self.zone.gas_circle_dirty.then(|| GasCircleMsg {
            pos: [self.zone.current_pos.x, self.zone.current_pos.y],
            rad: self.zone.current_rad,
        });

        let alive_count = self.alive_count_dirty.then(|| self.alive_count() as u32);

        let local = (player.stats_dirty || player.inventory_dirty || player.weapons_dirty).then(|| {
            let mut inventory: Vec<InvEntry> = player
                .inventory
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(key, count)| InvEntry {
                    key: *key,
                    count: *count,
                })
                .collect();
            inventory.sort_by_key(|e| format!("{:?}", e.key));

            LocalPlayerMsg {
                health: player.health,
                boost: player.boost,
                downed: player.downed,
                zoom: player.building_zoom,
                inventory,
                weapons: player
                    .weapons
                    .iter()
                    .map(|slot| WeaponSlotMsg {
                        weapon: slot.weapon,
                        clip: slot.clip,
                    })
                    .collect(),
                active_slot: player.active_slot as u8,
                action_seq: player.action_seq,
            }
        });

        Some(UpdateMsg {
            tick: self.tick,
            full,
            partial,
            deleted,
            bullets,
            explosions: self.explosion_events.clone(),
            emotes,
            gas,
            gas_circle,
            alive_count,
            local,
        })
    }

    fn full_object(&self, id: EntityId) -> Option<FullObject> {
        if let Some(p) = self.players.get(&id) {
            let pos = self.world.position(p.body).unwrap_or(p.last_pos);
            return Some(FullObject::Player {
                id: id.0,
                pos: [pos.x, pos.y],
                dir: [p.aim_dir.x, p.aim_dir.y],
                layer: p.layer,
                downed: p.downed,
                dead: p.dead,
                anim_kind: p.anim.kind,
                anim_seq: p.anim.seq,
                action_seq: p.action_seq,
                name: p.name.clone(),
                outfit: p.outfit.clone(),
            });
        }
        if let Some(l) = self.loot.get(&id) {
            let pos = self.world.position(l.body)?;
            return Some(FullObject::Loot {
                id: id.0,
                pos: [pos.x, pos.y],
                item: l.item,
                count: l.count,
                layer: l.layer,
            });
        }
        if let Some(o) = self.obstacles.get(&id) {
            let max_health = o.kind.def().health;
            return Some(FullObject::Obstacle {
                id: id.0,
                pos: [o.pos.x, o.pos.y],
                kind: o.kind,
                layer: o.layer,
                health_frac: if max_health > 0.0 { o.health / max_health } else { 0.0 },
                dead: o.dead,
            });
        }
        if let Some(proj) = self.projectiles.get(&id) {
            let pos = self.world.position(proj.body)?;
            return Some(FullObject::Projectile {
                id: id.0,
                pos: [pos.x, pos.y],
                z_pos: proj.z_pos,
                weapon: proj.weapon,
                layer: proj.layer,
            });
        }
        None
    }

    fn partial_object(&self, id: EntityId) -> Option<PartialObject> {
        if let Some(p) = self.players.get(&id) {
            let pos = self.world.position(p.body).unwrap_or(p.last_pos);
            return Some(PartialObject::Player {
                id: id.0,
                pos: [pos.x, pos.y],
                dir: [p.aim_dir.x, p.aim_dir.y],
            });
        }
        if let Some(l) = self.loot.get(&id) {
            let pos = self.world.position(l.body)?;
            return Some(PartialObject::Loot {
                id: id.0,
                pos: [pos.x, pos.y],
            });
        }
        if let Some(o) = self.obstacles.get(&id) {
            let max_health = o.kind.def().health;
            return Some(PartialObject::Obstacle {
                id: id.0,
                health_frac: if max_health > 0.0 { o.health / max_health } else { 0.0 },
            });
        }
        if let Some(proj) = self.projectiles.get(&id) {
            let pos = self.world.position(proj.body)?;
            return Some(PartialObject::Projectile {
                id: id.0,
                pos: [pos.x, pos.y],
                z_pos: proj.z_pos,
            });
        }
        None
    }
}

fn full_object_id(obj: &FullObject) -> u32 {
    match obj {
        FullObject::Player { id, .. }
        | FullObject::Loot { id, .. }
        | FullObject::Obstacle { id, .. }
        | FullObject::Projectile { id, .. } => *id,
    }
}

fn partial_object_id(obj: &PartialObject) -> u32 {
    match obj {
        PartialObject::Player { id, .. }
        | PartialObject::Loot { id, .. }
        | PartialObject::Obstacle { id, .. }
        | PartialObject::Projectile { id, .. } => *id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let msg = ServerMsg::Pong { t: 12345 };
        let frame = encode_frame(&msg).unwrap();
        assert!(frame.len() > 4);

        let mut buf = BytesMut::from(&frame[..]);
        let payload = decode_frame(&mut buf).unwrap();
        assert!(buf.is_empty());

        let decoded: ServerMsg = serde_json::from_slice(&payload).unwrap();
        match decoded {
            ServerMsg::Pong { t } => assert_eq!(t, 12345),
            other => panic!("wrong message decoded: {other:?}"),
        }
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let msg = ServerMsg::Pong { t: 7 };
        let frame = encode_frame(&msg).unwrap();

        let mut buf = BytesMut::from(&frame[..frame.len() - 1]);
        assert!(decode_frame(&mut buf).is_none());

        buf.extend_from_slice(&frame[frame.len() - 1..]);
        assert!(decode_frame(&mut buf).is_some());
    }

    #[test]
    fn two_frames_split_cleanly() {
        let a = encode_frame(&ServerMsg::Pong { t: 1 }).unwrap();
        let b = encode_frame(&ServerMsg::Pong { t: 2 }).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a);
        buf.extend_from_slice(&b);

        let first = decode_frame(&mut buf).unwrap();
        let second = decode_frame(&mut buf).unwrap();
        assert!(decode_frame(&mut buf).is_none());

        let first: ServerMsg = serde_json::from_slice(&first).unwrap();
        let second: ServerMsg = serde_json::from_slice(&second).unwrap();
        assert!(matches!(first, ServerMsg::Pong { t: 1 }));
        assert!(matches!(second, ServerMsg::Pong { t: 2 }));
    }
}
