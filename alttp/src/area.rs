//! Per-overworld-area state: the map16 -> map8 -> tile-type decode
//! pipeline, entrance discovery, and the edge/warp geometry the overworld
//! flood fill runs on.

use crate::coord::{map16_to_ow_coord, OwCoord};
use crate::emu::{self, Emulator, Vram, Wram, VRAM_LEN, WRAM_LEN};
use crate::rom::RomPointers;
use crate::tile;
use crate::{AreaId, Direction, DARK_WORLD_BIT};
use failure::Error;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Up to 128x128 8x8 tiles per area.
pub const AREA_TILES_LEN: usize = 0x4000;

/// The pit-destination table stores map16 positions one screen-row early;
/// the game compensates with this constant and so do we.
pub const PIT_DEST_MAP16_BIAS: u16 = 0x400;

#[derive(Clone, Copy, Debug)]
pub struct AreaEntrance {
    pub pos: OwCoord,
    pub entrance_id: u8,
    pub is_pit: bool,
    /// Set once to dedupe entrance-follow tasks.
    pub used: bool,
}

pub struct Area {
    pub id: AreaId,
    /// Width/height in 8x8 tiles; 64 or 128 per axis.
    pub width: u16,
    pub height: u16,
    pub is_loaded: bool,

    /// Presentation tiles (map8 words) on a fixed 128-wide grid.
    pub map8: Box<[u16; AREA_TILES_LEN]>,
    /// Raw map16 block indices, 64 per row.
    pub map16: Box<[u16; 0x1000]>,
    /// Semantic tile types after translation.
    pub tiles: Box<[u8; AREA_TILES_LEN]>,
    pub reachable: Box<[u8; AREA_TILES_LEN]>,
    pub hookshot: Box<[u8; AREA_TILES_LEN]>,
    pub allow_dir: Box<[u8; AREA_TILES_LEN]>,

    pub entrances: Vec<AreaEntrance>,
    tile_entrance: HashMap<OwCoord, usize>,
    visited: HashSet<OwCoord>,

    pub wram_after_load: Arc<Wram>,
    pub vram_after_load: Arc<Vram>,
    pub vram_tileset: Box<[u8; 0x4000]>,
}

impl Area {
    pub fn with_size(id: AreaId, width: u16, height: u16) -> Area {
        Area {
            id,
            width,
            height,
            is_loaded: true,
            map8: Box::new([0; AREA_TILES_LEN]),
            map16: Box::new([0; 0x1000]),
            tiles: Box::new([0x01; AREA_TILES_LEN]),
            reachable: Box::new([0x01; AREA_TILES_LEN]),
            hookshot: Box::new([0; AREA_TILES_LEN]),
            allow_dir: Box::new([0; AREA_TILES_LEN]),
            entrances: Vec::new(),
            tile_entrance: HashMap::new(),
            visited: HashSet::new(),
            wram_after_load: Arc::new([0; WRAM_LEN]),
            vram_after_load: Arc::new([0; VRAM_LEN]),
            vram_tileset: Box::new([0; 0x4000]),
        }
    }

    /// A placeholder for a load that trapped; flood fills skip it.
    pub fn failed(id: AreaId) -> Area {
        let mut a = Area::with_size(id, 0x40, 0x40);
        a.is_loaded = false;
        a
    }

    /// Build an Area from a system that has just settled on the overworld
    /// module.
    pub fn from_load<E: Emulator>(id: AreaId, e: &mut E, p: &RomPointers) -> Result<Area, Error> {
        let mut a = Area::with_size(id, 0, 0);

        {
            let mut w: Box<Wram> = Box::new([0; WRAM_LEN]);
            w.copy_from_slice(e.wram());
            a.wram_after_load = Arc::from(w);
            let mut v: Box<Vram> = Box::new([0; VRAM_LEN]);
            v.copy_from_slice(e.vram());
            a.vram_after_load = Arc::from(v);
        }
        a.vram_tileset.copy_from_slice(&e.vram()[0x4000..0x8000]);

        // area extents in tiles
        let w = e.wram();
        a.height = (emu::read16(w, 0x070A) + 0x10) >> 3;
        a.width = emu::read16(w, 0x070E) + 0x02;
        if a.width as usize > 0x80 || a.height as usize > 0x80 || a.width == 0 || a.height == 0 {
            return Err(failure::format_err!(
                "{}: implausible extents {}x{}",
                id,
                a.width,
                a.height
            ));
        }

        // working copy of the map16 screen at $7E2000
        let mut m16buf = [0u8; 0x2000];
        m16buf.copy_from_slice(&e.wram()[0x2000..0x4000]);

        a.reveal_secrets(e, p, &mut m16buf);
        a.decode_map16(e, p, &m16buf);
        a.discover_entrances(e, p);
        a.discover_pit_entrances(e, p);
        a.open_compound_structures();

        for i in 0..AREA_TILES_LEN {
            a.allow_dir[i] = tile::tile_allow_dir(a.tiles[i]);
        }

        debug!("{}: loaded {}x{}, {} entrances", id, a.width, a.height, a.entrances.len());
        Ok(a)
    }

    /// Replace map16 blocks revealed by the hidden-items list, except the
    /// stairs type the table is known to get wrong.
    fn reveal_secrets<E: Emulator>(&mut self, e: &mut E, p: &RomPointers, m16buf: &mut [u8]) {
        let ptr = e.read16(p.overworld_data_hidden_items + ((self.id.0 as u32) << 1));
        if ptr == 0 {
            return;
        }
        let mut j = 0x1B_0000 | ptr as u32;
        for _ in 0..0x100 {
            let m16 = e.read16(j);
            if m16 == 0xFFFF {
                return;
            }
            let v = e.read8(j + 2);
            j += 3;
            if v < 0x80 {
                // not a tile replacement
                continue;
            }
            if v == 0x84 {
                // stairs are broken in this lookup
                continue;
            }
            let t16 = e.read16(p.overworld_secret_tile_type + (v & 0x0F) as u32);
            if (m16 as usize) + 1 < m16buf.len() {
                debug!("{}: secret reveal at {:04X}: {:04X}", self.id, m16, t16);
                emu::write16(m16buf, m16 as u32, t16);
            }
        }
        warn!("{}: hidden-items list never terminated", self.id);
    }

    /// Decode every 2x2 map16 block into four map8 entries, then translate
    /// each into a semantic tile type.
    fn decode_map16<E: Emulator>(&mut self, e: &mut E, p: &RomPointers, m16buf: &[u8]) {
        for row in (0..self.height as u32).step_by(2) {
            for col in (0..self.width as u32).step_by(2) {
                let block = (row >> 1) as usize * 0x40 + (col >> 1) as usize;
                let m16 = emu::read16(m16buf, row * 0x40 + col);
                self.map16[block] = m16;

                let df = [
                    e.read16(p.map16_definitions + ((m16 as u32) << 3)),
                    e.read16(p.map16_definitions + ((m16 as u32) << 3) + 2),
                    e.read16(p.map16_definitions + ((m16 as u32) << 3) + 4),
                    e.read16(p.map16_definitions + ((m16 as u32) << 3) + 6),
                ];

                let at = |r: u32, c: u32| (r * 0x80 + c) as usize;
                self.map8[at(row, col)] = df[0];
                self.map8[at(row, col + 1)] = df[1];
                self.map8[at(row + 1, col)] = df[2];
                self.map8[at(row + 1, col + 1)] = df[3];

                self.tiles[at(row, col)] =
                    e.read8(p.overworld_tile_types + (df[0] & 0x01FF) as u32);
                self.tiles[at(row, col + 1)] =
                    e.read8(p.overworld_tile_types + (df[1] & 0x01FF) as u32);
                self.tiles[at(row + 1, col)] =
                    e.read8(p.overworld_tile_types + (df[2] & 0x01FF) as u32);
                self.tiles[at(row + 1, col + 1)] =
                    e.read8(p.overworld_tile_types + (df[3] & 0x01FF) as u32);
            }
        }
    }

    /// Standard entrances carry a 4x4 footprint in `tile_entrance`.
    fn discover_entrances<E: Emulator>(&mut self, e: &mut E, p: &RomPointers) {
        let ec = p.overworld_entrance_count;
        for j in 0..ec {
            let aid = e.read16(p.overworld_entrance_screens + (j << 1)) as u8;
            if aid != self.id.0 {
                continue;
            }
            let m16pos = e.read16(p.overworld_entrance_screens + (ec << 1) + (j << 1));
            let entrance_id = e.read8(p.overworld_entrance_screens + (ec << 2) + j);
            let pos = map16_to_ow_coord(m16pos);
            info!(
                "{}: entrance {:02X} at map16={:04X} -> {}",
                self.id, entrance_id, m16pos, pos
            );
            self.push_entrance(
                AreaEntrance {
                    pos,
                    entrance_id,
                    is_pit: false,
                    used: false,
                },
                4,
            );
        }
    }

    fn discover_pit_entrances<E: Emulator>(&mut self, e: &mut E, p: &RomPointers) {
        for j in 0..p.overworld_pit_destination_count {
            let aid = e.read16(p.overworld_pit_destination_screen + (j << 1)) as u8;
            if aid != self.id.0 {
                continue;
            }
            let m16pos =
                e.read16(p.overworld_pit_destination_map16 + (j << 1)) + PIT_DEST_MAP16_BIAS;
            let entrance_id = e.read8(p.overworld_pit_destination_entrance + j);
            let pos = OwCoord((m16pos & 0x7F) | ((m16pos >> 7) << 8));
            info!(
                "{}: pit entrance {:02X} at map16={:04X} -> {}",
                self.id, entrance_id, m16pos, pos
            );
            self.push_entrance(
                AreaEntrance {
                    pos,
                    entrance_id,
                    is_pit: true,
                    used: false,
                },
                2,
            );
        }
    }

    fn push_entrance(&mut self, ent: AreaEntrance, footprint: u16) {
        self.entrances.push(ent);
        let i = self.entrances.len() - 1;
        for dy in 0..footprint {
            for dx in 0..footprint {
                let c = OwCoord(ent.pos.0.wrapping_add(dy << 7).wrapping_add(dx));
                self.tile_entrance.insert(c, i);
            }
        }
    }

    /// Open compound structures the tile-type table keeps closed: the
    /// castle door, village house doors, and hammer pegs.
    fn open_compound_structures(&mut self) {
        for i in 0..AREA_TILES_LEN {
            let c = OwCoord(i as u16);
            let (row, col) = c.row_col();
            if col >= self.width.saturating_sub(4) || row >= self.height.saturating_sub(4) {
                continue;
            }

            let m = |o: usize| self.map8[i + o] & 0x41FF;
            let v00 = m(0);
            let v01 = m(1);
            let v02 = m(2);
            let v03 = m(3);

            if v00 == 0x0148 && v01 == 0x0149 && v02 == 0x4149 && v03 == 0x4148 {
                // castle door
                for j in 0..4usize {
                    self.tiles[i + j] = 0x00;
                    self.tiles[i + 0x080 + j] = 0x00;
                    self.tiles[i + 0x100 + j] = 0x00;
                }
            }
            if v00 == 0x00E8 && v01 == 0x00E9 && v02 == 0x40E9 && v03 == 0x40E8 {
                // top of a regular house door
                for j in 0..2usize {
                    self.tiles[i + 0x001 + j] = 0x00;
                    self.tiles[i + 0x081 + j] = 0x00;
                }
            }

            let v10 = self.map8[i + 0x80] & 0x41FF;
            let v11 = self.map8[i + 0x81] & 0x41FF;
            if v00 == 0x01A0 && v01 == 0x41A0 && v10 == 0x01B0 && v11 == 0x41B0 {
                // hammer pegs become the manipulable peg type
                for j in 0..2usize {
                    self.tiles[i + j] = 0x70;
                    self.tiles[i + 0x080 + j] = 0x70;
                }
            }
        }
    }

    /// One step with the outer-edge rule: no movement parallel to the edge
    /// line on the outermost rows/cols, which prevents the fill leaking
    /// through the 3-tile gutter between areas.
    pub fn traverse(&self, c: OwCoord, d: Direction, inc: u16) -> Option<OwCoord> {
        let (row, col) = c.row_col();
        if (col <= 1 || col >= self.width - 1)
            && d != Direction::East
            && d != Direction::West
        {
            return None;
        }
        if (row <= 1 || row >= self.height - 1)
            && d != Direction::North
            && d != Direction::South
        {
            return None;
        }
        match d {
            Direction::North => {
                if row >= inc {
                    Some(OwCoord(c.0 - (inc << 7)))
                } else {
                    None
                }
            }
            Direction::South => {
                if row + inc < self.height {
                    Some(OwCoord(c.0 + (inc << 7)))
                } else {
                    None
                }
            }
            Direction::West => {
                if col >= inc {
                    Some(OwCoord(c.0 - inc))
                } else {
                    None
                }
            }
            Direction::East => {
                if col + inc < self.width {
                    Some(OwCoord(c.0 + inc))
                } else {
                    None
                }
            }
        }
    }

    /// Does a step off this area's edge exist, and where does it land?
    /// Returns absolute tile coordinates (past the 3-tile gutter) and the
    /// nominal neighbor area.
    pub fn neighbor_edge(&self, c: OwCoord, d: Direction) -> Option<(u16, u16, AreaId)> {
        let (row, col) = c.row_col();
        let leaving = match d {
            Direction::North => row <= 1,
            Direction::South => row >= self.height - 2,
            Direction::West => col <= 1,
            Direction::East => col >= self.width - 2,
        };
        if !leaving {
            return None;
        }

        let (bx, by) = self.id.abs_tile_top_left();
        let mut ax = (bx + col) as i32;
        let mut ay = (by + row) as i32;
        match d {
            Direction::North => ay -= 3,
            Direction::South => ay += 3,
            Direction::West => ax -= 3,
            Direction::East => ax += 3,
        }
        if ax < 0 || ay < 0 || ax >= 0x200 || ay >= 0x200 {
            return None;
        }

        let na = AreaId(
            ((((ay as u16) >> 6) << 3) | ((ax as u16) >> 6)) as u8 | (self.id.0 & DARK_WORLD_BIT),
        );
        Some((ax as u16, ay as u16, na))
    }

    /// Normalize an absolute tile coordinate into this area's local space.
    pub fn local_from_abs(&self, abs_x: u16, abs_y: u16) -> OwCoord {
        let (bx, by) = self.id.abs_tile_top_left();
        let col = abs_x.wrapping_sub(bx) & (self.width - 1);
        let row = abs_y.wrapping_sub(by) & (self.height - 1);
        OwCoord::new(row, col)
    }

    pub fn map16_at(&self, c: OwCoord) -> u16 {
        let (row, col) = c.row_col();
        self.map16[((row >> 1) as usize) * 0x40 + (col >> 1) as usize]
    }

    /// Renderer interface: 256 BGR15 palette words from the CGRAM shadow.
    pub fn palette_words(&self) -> Vec<u16> {
        (0..256)
            .map(|i| emu::read16(&self.wram_after_load[..], 0xC300 + ((i as u32) << 1)))
            .collect()
    }

    pub fn entrance_at(&self, c: OwCoord) -> Option<usize> {
        self.tile_entrance.get(&c).copied()
    }

    pub fn is_visited(&self, c: OwCoord) -> bool {
        self.visited.contains(&c)
    }

    pub fn mark_visited(&mut self, c: OwCoord) {
        self.visited.insert(c);
    }

    #[cfg(test)]
    pub fn insert_test_entrance(&mut self, ent: AreaEntrance, footprint: u16) {
        self.push_entrance(ent, footprint);
    }
}

/// The nominal-to-actual screen correction for large areas, read once at
/// startup (it is a read-only 8x8 grid per world).
pub struct ActualScreens([u8; 0x40]);

impl ActualScreens {
    pub fn identity() -> ActualScreens {
        let mut t = [0u8; 0x40];
        for (i, v) in t.iter_mut().enumerate() {
            *v = i as u8;
        }
        ActualScreens(t)
    }

    pub fn load<E: Emulator>(e: &mut E, p: &RomPointers) -> ActualScreens {
        let mut t = [0u8; 0x40];
        for (i, v) in t.iter_mut().enumerate() {
            *v = e.read8(p.overworld_actual_screen_id + i as u32);
        }
        ActualScreens(t)
    }

    pub fn correct(&self, nominal: AreaId) -> AreaId {
        AreaId(self.0[(nominal.0 & 0x3F) as usize] | (nominal.0 & DARK_WORLD_BIT))
    }
}

pub type SharedArea = Arc<Mutex<Area>>;

/// Map of area id to Area with the same locking discipline as the room
/// cache.
pub struct AreaCache {
    areas: Mutex<HashMap<u8, SharedArea>>,
}

impl AreaCache {
    pub fn new() -> AreaCache {
        AreaCache {
            areas: Mutex::new(HashMap::with_capacity(0x80)),
        }
    }

    pub fn get(&self, id: AreaId) -> Option<SharedArea> {
        self.areas.lock().get(&id.0).cloned()
    }

    pub fn contains(&self, id: AreaId) -> bool {
        self.areas.lock().contains_key(&id.0)
    }

    pub fn get_or_create_with<F>(&self, id: AreaId, create: F) -> SharedArea
    where
        F: FnOnce() -> Area,
    {
        let mut areas = self.areas.lock();
        areas
            .entry(id.0)
            .or_insert_with(|| Arc::new(Mutex::new(create())))
            .clone()
    }

    pub fn all(&self) -> Vec<SharedArea> {
        self.areas.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.areas.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.lock().is_empty()
    }
}

impl Default for AreaCache {
    fn default() -> AreaCache {
        AreaCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::{pointers_for, Region};
    use crate::testemu::FakeEmulator;

    #[test]
    fn traverse_edge_rules() {
        let a = Area::with_size(AreaId(0x30), 0x40, 0x40);
        // perpendicular movement along the outer cols is blocked:
        assert!(a.traverse(OwCoord::new(0x10, 0x01), Direction::North, 1).is_none());
        assert!(a.traverse(OwCoord::new(0x10, 0x01), Direction::East, 1).is_some());
        // and along the outer rows:
        assert!(a.traverse(OwCoord::new(0x3F, 0x10), Direction::East, 1).is_none());
        assert!(a.traverse(OwCoord::new(0x3F, 0x10), Direction::North, 1).is_some());
        // interior movement is free:
        assert_eq!(
            a.traverse(OwCoord::new(0x10, 0x10), Direction::South, 2),
            Some(OwCoord::new(0x12, 0x10))
        );
    }

    #[test]
    fn neighbor_edge_south() {
        let a = Area::with_size(AreaId(0x30), 0x40, 0x40);
        let (ax, ay, na) = a
            .neighbor_edge(OwCoord::new(0x3E, 0x10), Direction::South)
            .unwrap();
        assert_eq!((ax, ay), (0x10, 0x1C1));
        assert_eq!(na, AreaId(0x38));
        // normalization into the neighbor's local space:
        let n = Area::with_size(AreaId(0x38), 0x40, 0x40);
        assert_eq!(n.local_from_abs(ax, ay), OwCoord::new(0x01, 0x10));
        // interior coords report no edge:
        assert!(a.neighbor_edge(OwCoord::new(0x20, 0x10), Direction::South).is_none());
    }

    #[test]
    fn neighbor_edge_keeps_world_bit() {
        let a = Area::with_size(AreaId(0x70), 0x40, 0x40);
        let (_, _, na) = a
            .neighbor_edge(OwCoord::new(0x3E, 0x10), Direction::South)
            .unwrap();
        assert_eq!(na, AreaId(0x78));
    }

    #[test]
    fn map16_decode_pipeline() {
        let p = pointers_for(Region::Japan);
        let mut e = FakeEmulator::new();
        // extents: 64x64 tiles
        emu::write16(&mut e.wram[..], 0x070A, (0x40 << 3) - 0x10);
        emu::write16(&mut e.wram[..], 0x070E, 0x40 - 0x02);
        // block (0,0) uses map16 definition 5
        emu::write16(&mut e.wram[..], 0x2000, 5);
        // definition 5 -> four map8 refs
        e.set_bus16(p.map16_definitions + (5 << 3), 0x0010);
        e.set_bus16(p.map16_definitions + (5 << 3) + 2, 0x0011);
        e.set_bus16(p.map16_definitions + (5 << 3) + 4, 0x4012);
        e.set_bus16(p.map16_definitions + (5 << 3) + 6, 0x0013);
        // tile types for those map8 values
        e.set_bus8(p.overworld_tile_types + 0x10, 0x00);
        e.set_bus8(p.overworld_tile_types + 0x11, 0x20);
        e.set_bus8(p.overworld_tile_types + 0x12, 0x08);
        e.set_bus8(p.overworld_tile_types + 0x13, 0x01);

        let a = Area::from_load(AreaId(0x30), &mut e, &p).unwrap();
        assert_eq!((a.width, a.height), (0x40, 0x40));
        assert_eq!(a.map8[0], 0x0010);
        assert_eq!(a.map8[1], 0x0011);
        assert_eq!(a.map8[0x80], 0x4012);
        assert_eq!(a.tiles[0], 0x00);
        assert_eq!(a.tiles[1], 0x20);
        // the flip bits are masked off before the type lookup:
        assert_eq!(a.tiles[0x80], 0x08);
        assert_eq!(a.tiles[0x81], 0x01);
        assert_eq!(a.map16_at(OwCoord::new(0, 1)), 5);
    }

    #[test]
    fn hammer_pegs_become_manipulables() {
        let mut a = Area::with_size(AreaId(0x30), 0x40, 0x40);
        let i = OwCoord::new(0x10, 0x10).index();
        a.map8[i] = 0x01A0;
        a.map8[i + 1] = 0x41A0;
        a.map8[i + 0x80] = 0x01B0;
        a.map8[i + 0x81] = 0x41B0;
        a.open_compound_structures();
        assert_eq!(a.tiles[i], 0x70);
        assert_eq!(a.tiles[i + 1], 0x70);
        assert_eq!(a.tiles[i + 0x80], 0x70);
        assert_eq!(a.tiles[i + 0x81], 0x70);
    }

    #[test]
    fn screen_correction_preserves_world() {
        let screens = ActualScreens::identity();
        assert_eq!(screens.correct(AreaId(0x38)), AreaId(0x38));
        assert_eq!(screens.correct(AreaId(0x78)), AreaId(0x78));
        let mut t = [0u8; 0x40];
        for (i, v) in t.iter_mut().enumerate() {
            *v = i as u8;
        }
        t[0x31] = 0x30; // a large area swallows its east screen
        let screens = ActualScreens(t);
        assert_eq!(screens.correct(AreaId(0x71)), AreaId(0x70));
    }
}
