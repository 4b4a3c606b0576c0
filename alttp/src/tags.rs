//! Room-tag replay: after a start state synthesizes the avatar's position,
//! the game's own tag handler runs and may mutate the tile grid (open
//! doors, drain water, resolve push-block puzzles, clear kill rooms).

use crate::coord::MapCoord;
use crate::emu::{self, wram, Emulator};
use crate::room::Room;
use crate::stubs::Stubs;
use failure::Error;
use log::debug;

/// Replay the room's tag routine with the avatar standing at `at`.
/// Returns whether the routine actually ran; on success the room's tile
/// grid and direction masks reflect the mutated WRAM.
pub fn replay<E: Emulator>(
    room: &mut Room,
    e: &mut E,
    stubs: &Stubs,
    at: MapCoord,
) -> Result<bool, Error> {
    // no tags armed in this room, nothing to replay
    let armed =
        emu::read8(&room.wram[..], wram::TAGS) != 0 || emu::read8(&room.wram[..], wram::TAGS + 1) != 0;
    if !armed {
        return Ok(false);
    }

    e.wram_mut().copy_from_slice(&room.wram[..]);

    // synthesize the avatar at the current coordinate, plus the camera, so
    // quadrant-triggered tags see the right position
    let (sx, sy) = room.supertile.abs_top_left();
    let (layer, row, col) = at.row_col();
    let x = sx + (col << 3);
    let y = sy + (row << 3);
    {
        let w = e.wram_mut();
        emu::write16(w, 0x0022, x);
        emu::write16(w, 0x0020, y);
        emu::write16(w, 0x00EE, layer);
        emu::write16(w, 0x00E2, x);
        emu::write16(w, 0x00E8, y);
    }

    e.exec_at(stubs.handle_room_tags_pc, stubs.done_pc)?;

    room.wram.copy_from_slice(e.wram());
    room.adopt_tiles_from_wram();
    room.derive_allow_dir();
    debug!("{}: tag replay at {}", room.supertile, at);
    Ok(true)
}

/// KillRoom side effect: zero every enemy's active-AI slot so "kill all
/// enemies" tags fire, leaving enemies with the persist bit alone.
pub fn kill_enemies(room: &mut Room) {
    let w = &mut room.wram[..];
    for j in 0..16u32 {
        if emu::read8(w, 0x0DD0 + j) == 0 {
            continue;
        }
        if emu::read8(w, 0x0E40 + j) & 0x80 != 0 {
            continue;
        }
        emu::write8(w, 0x0DD0 + j, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testemu::FakeEmulator;
    use crate::Supertile;

    #[test]
    fn replay_skips_when_no_tags_armed() {
        let mut room = Room::new(Supertile(0x12), 0);
        let mut e = FakeEmulator::new();
        let stubs = Stubs::default();
        let ran = replay(&mut room, &mut e, &stubs, MapCoord::new(0, 8, 8)).unwrap();
        assert!(!ran);
        assert!(e.exec_log.is_empty());
    }

    #[test]
    fn replay_adopts_mutated_tiles() {
        let mut room = Room::new(Supertile(0x12), 0);
        room.sync_tiles_to_wram();
        room.wram[wram::TAGS as usize] = 0x1C; // moving wall tag armed
        let target = MapCoord::new(0, 0x18, 0x20);

        let mut e = FakeEmulator::new();
        e.patch_tile_on_tags(target.index(), 0x00);
        let mut stubs = Stubs::default();
        stubs.handle_room_tags_pc = 0x00_5300;

        let before = room.hash_tiles();
        let ran = replay(&mut room, &mut e, &stubs, MapCoord::new(0, 8, 8)).unwrap();
        assert!(ran);
        assert_eq!(room.tiles[target.index()], 0x00);
        assert_ne!(room.hash_tiles(), before);
        assert_eq!(room.tiles[MapCoord::new(0, 0, 0).index()], 0x01);
        // the avatar was synthesized at the replay coordinate: supertile
        // $012 sits at absolute (0x400, 0x200)
        assert_eq!(emu::read16(e.wram(), 0x0022), 0x400 + (8 << 3));
        assert_eq!(emu::read16(e.wram(), 0x0020), 0x200 + (8 << 3));
    }

    #[test]
    fn kill_enemies_respects_persist_bit() {
        let mut room = Room::new(Supertile(0), 0);
        room.wram[0x0DD0] = 0x09; // live enemy
        room.wram[0x0DD1] = 0x09; // live, persistent enemy
        room.wram[0x0E41] = 0x80;
        kill_enemies(&mut room);
        assert_eq!(room.wram[0x0DD0], 0);
        assert_eq!(room.wram[0x0DD1], 0x09);
    }
}
