//! Per-supertile state: the tile-type grid and its derived direction masks,
//! door preprocessing, and the per-tile-grid-hash visited sets the flood
//! fill relies on across tag-induced mutations.

use crate::coord::MapCoord;
use crate::door::{Door, DoorKind};
use crate::emu::{self, wram, Emulator, Vram, Wram, VRAM_LEN, WRAM_LEN};
use crate::tile;
use crate::{Direction, Supertile};
use log::debug;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use std::sync::Arc;

/// Two stacked 64x64 layers of 8x8 tiles.
pub const TILES_LEN: usize = 0x2000;

pub struct Room {
    pub supertile: Supertile,
    pub entrance_id: u8,
    pub is_loaded: bool,

    /// Tile-type grid; mutated by door preprocessing and tag replays.
    pub tiles: Box<[u8; TILES_LEN]>,
    /// 4-bit direction mask per tile; re-derived whenever `tiles` changes.
    pub allow_dir: Box<[u8; TILES_LEN]>,
    /// 0x01 means "not proven reachable"; otherwise the tile-type value the
    /// engine reached the cell with.
    pub reachable: Box<[u8; TILES_LEN]>,
    /// Direction bits of hookshot chains that passed over each cell.
    pub hookshot: Box<[u8; TILES_LEN]>,

    pub doors: Vec<Door>,
    pub stairs: Vec<MapCoord>,
    /// Cells that flip the walking layer when stepped over (layer-swap door
    /// footprints).
    pub swap_layers: HashSet<MapCoord>,
    /// Doorway strip cells of edge doorways, keyed back to their door.
    pub edge_door_tile: HashMap<MapCoord, usize>,
    // allow-dir overrides written by door preprocessing
    door_allow: HashMap<MapCoord, u8>,

    pub stair_exit_to: [Supertile; 4],
    pub stair_target_layer: [u16; 4],
    pub warp_exit_to: Supertile,
    pub warp_exit_layer: u16,

    pub has_reachable_pit: bool,

    visited_by_hash: HashMap<u64, HashSet<MapCoord>>,
    current_hash: u64,
    /// One-shot latches so a star/push/lift footprint only ever spawns one
    /// replay per room.
    pub fired_star: HashSet<MapCoord>,
    pub fired_push: HashSet<MapCoord>,
    pub fired_lift: HashSet<MapCoord>,

    /// Working WRAM image for this room's flood fill and tag replays.
    pub wram: Box<Wram>,
    /// Post-load, post-preprocessing baseline; also the WRAM donor for
    /// overworld-exit tasks spawned out of this room.
    pub wram_after_load: Arc<Wram>,
    pub vram_after_load: Arc<Vram>,
    pub vram_tileset: Box<[u8; 0x4000]>,
}

impl Room {
    pub fn new(supertile: Supertile, entrance_id: u8) -> Room {
        Room {
            supertile,
            entrance_id,
            is_loaded: true,
            tiles: Box::new([0x01; TILES_LEN]),
            allow_dir: Box::new([0; TILES_LEN]),
            reachable: Box::new([0x01; TILES_LEN]),
            hookshot: Box::new([0; TILES_LEN]),
            doors: Vec::new(),
            stairs: Vec::new(),
            swap_layers: HashSet::new(),
            edge_door_tile: HashMap::new(),
            door_allow: HashMap::new(),
            stair_exit_to: [Supertile(0); 4],
            stair_target_layer: [0; 4],
            warp_exit_to: Supertile(0),
            warp_exit_layer: 0,
            has_reachable_pit: false,
            visited_by_hash: HashMap::new(),
            current_hash: 0,
            fired_star: HashSet::new(),
            fired_push: HashSet::new(),
            fired_lift: HashSet::new(),
            wram: Box::new([0; WRAM_LEN]),
            wram_after_load: Arc::new([0; WRAM_LEN]),
            vram_after_load: Arc::new([0; VRAM_LEN]),
            vram_tileset: Box::new([0; 0x4000]),
        }
    }

    /// Build a Room from a system that has just run the supertile loader.
    pub fn from_load<E: Emulator>(supertile: Supertile, entrance_id: u8, e: &E) -> Room {
        let mut room = Room::new(supertile, entrance_id);
        room.wram.copy_from_slice(e.wram());
        room.tiles
            .copy_from_slice(&e.wram()[wram::TILES..wram::TILES + wram::TILES_LEN]);
        room.vram_tileset.copy_from_slice(&e.vram()[0x4000..0x8000]);
        {
            let mut v: Box<Vram> = Box::new([0; VRAM_LEN]);
            v.copy_from_slice(e.vram());
            room.vram_after_load = Arc::from(v);
        }

        room.read_exits();
        room.read_doors();
        room.is_loaded = true;
        room.preprocess();

        room.wram_after_load = Arc::from(room.wram.clone());
        room.install_visited();
        debug!(
            "{}: loaded, {} doors, warp {}",
            supertile,
            room.doors.len(),
            room.warp_exit_to
        );
        room
    }

    fn read_exits(&mut self) {
        let w = &self.wram[..];
        self.warp_exit_to = Supertile(emu::read8(w, wram::WARP_EXIT_ROOM) as u16);
        self.warp_exit_layer = if emu::read8(w, wram::WARP_EXIT_PLANE) & 1 != 0 {
            crate::coord::LAYER_BIT
        } else {
            0
        };
        for i in 0..4 {
            self.stair_exit_to[i] =
                Supertile(emu::read8(w, wram::STAIR_EXIT_ROOMS + i as u32) as u16);
            self.stair_target_layer[i] =
                if emu::read8(w, wram::STAIR_TARGET_PLANES + i as u32) & 1 != 0 {
                    crate::coord::LAYER_BIT
                } else {
                    0
                };
        }
    }

    /// The door tables are refreshed by the room loader and immutable
    /// afterwards; read all 16 slots once.
    fn read_doors(&mut self) {
        let w = &self.wram[..];
        for i in 0..16u32 {
            let pos16 = emu::read16(w, wram::DOOR_POS + i * 2);
            if pos16 == 0 {
                break;
            }
            let kind = DoorKind(emu::read16(w, wram::DOOR_KINDS + i * 2) as u8);
            let dir = Direction::from_game(emu::read16(w, wram::DOOR_DIRS + i * 2) as u8);
            let mut pos = MapCoord(((pos16 & 0x1FFF) >> 1) as u16);
            if kind.is_layer2() {
                pos = pos.to_layer2();
            }

            // the exit list points back at door positions
            let mut is_exit = false;
            for j in 0..16u32 {
                let x = emu::read16(w, wram::DOOR_EXITS + j * 2);
                if x == 0 {
                    break;
                }
                if x == pos16 {
                    is_exit = true;
                    break;
                }
            }

            if kind.is_stairwell() {
                self.stairs.push(pos);
            }
            if kind.is_layer_swap() {
                for dy in 0..4 {
                    for dx in 0..4 {
                        if let Some(c) = pos
                            .move_by(Direction::South, dy)
                            .and_then(|c| c.move_by(Direction::East, dx))
                        {
                            self.swap_layers.insert(c);
                            self.swap_layers.insert(c.flip_layer());
                        }
                    }
                }
            }

            self.doors.push(Door {
                kind,
                pos,
                dir,
                is_exit,
            });
        }
    }

    /// First-time room work: open locked cells, clear door strips, carve
    /// exploding walls, then derive the direction masks.
    pub fn preprocess(&mut self) {
        self.open_locked_cells();
        for di in 0..self.doors.len() {
            self.preprocess_door(di);
        }
        self.derive_allow_dir();
        self.sync_tiles_to_wram();
        self.install_visited();
    }

    /// Up to six (tile, key-index) pairs; bit 15 marks a locked cell door
    /// whose 2x2 footprint opens on both layers.
    fn open_locked_cells(&mut self) {
        for i in 0..6u32 {
            let gt = emu::read16(&self.wram[..], wram::LOCKED_CELLS + (i << 1));
            if gt == 0 {
                break;
            }
            if gt & 0x8000 == 0 {
                continue;
            }
            let t = ((gt & 0x7FFF) >> 1) as usize & 0x0FFF;
            if t + 0x41 >= 0x1000 {
                continue;
            }
            let v = 0x58 + i as u8;
            for &base in &[t, t | 0x1000] {
                if self.tiles[base] == v {
                    self.tiles[base] = 0x00;
                    self.tiles[base + 0x01] = 0x00;
                    self.tiles[base + 0x40] = 0x00;
                    self.tiles[base + 0x41] = 0x00;
                }
            }
        }
    }

    fn preprocess_door(&mut self, di: usize) {
        let door = self.doors[di];

        if door.kind.is_exploding_wall() {
            self.carve_exploding_wall(door.pos);
            return;
        }

        // the doorway footprint is 2 tiles wide perpendicular to its
        // direction
        let perp = match door.dir {
            Direction::North | Direction::South => Direction::East,
            Direction::West | Direction::East => Direction::South,
        };

        let entry_only = {
            let v = self.tiles[door.pos.index()];
            v == 0x8E || v == 0x8F || door.kind.is_entry_only()
        };
        let mask = if entry_only {
            door.dir.opposite().mask()
        } else {
            door.dir.mask() | door.dir.opposite().mask()
        };
        // exit doorways are recorded too so the fill can route them to the
        // overworld handoff instead of a neighbor supertile
        let record_edge = if door.is_exit {
            door.kind.is_overworld_exit()
        } else {
            door.kind.is_edge_doorway_to_neighbor()
        };
        let v0 = self.tiles[door.pos.index()];

        let mut c = door.pos;
        for count in 0..16 {
            let v = self.tiles[c.index()];
            // an interior wall ends the walk once a full doorway has been
            // covered
            if v == 0x02 && count >= 8 {
                break;
            }
            // matched-pair doorways end on their twin tile
            if v0 & 0xF0 == 0xF0 && count > 0 && (v == (v0 ^ 8) || !tile::is_collision(v)) {
                break;
            }

            let mut strip = vec![c];
            if let Some(cp) = c.move_by(perp, 1) {
                strip.push(cp);
            }
            for &sc in &strip {
                if tile::is_collision(self.tiles[sc.index()]) {
                    self.tiles[sc.index()] = 0x00;
                }
                self.door_allow.insert(sc, mask);
                if record_edge {
                    self.edge_door_tile.insert(sc, di);
                }
            }

            match c.move_by(door.dir, 1) {
                Some(cn) => c = cn,
                None => break,
            }
        }
    }

    /// DoorKind $30: the tag routine blows an 11x12 hole in the wall; clear
    /// the same rectangle up front so the fill can walk it.
    fn carve_exploding_wall(&mut self, pos: MapCoord) {
        let (layer, row, col) = pos.row_col();
        for r in row.saturating_sub(6)..=(row + 5).min(0x3F) {
            for cc in col.saturating_sub(5)..=(col + 5).min(0x3F) {
                self.tiles[MapCoord::new(layer, r, cc).index()] = 0x00;
            }
        }
    }

    /// `allow_dir` is a pure function of `tiles` plus the door-clearing
    /// overrides; call after every tile mutation.
    pub fn derive_allow_dir(&mut self) {
        for i in 0..TILES_LEN {
            self.allow_dir[i] = tile::tile_allow_dir(self.tiles[i]);
        }
        // only movement perpendicular to the edge line survives on the
        // outermost two rows/cols
        for layer in 0..2 {
            for row in 0..0x40u16 {
                for col in 0..0x40u16 {
                    let i = MapCoord::new(layer, row, col).index();
                    if row <= 1 || row >= 0x3E {
                        self.allow_dir[i] &= tile::DIR_MASK_NS;
                    }
                    if col <= 1 || col >= 0x3E {
                        self.allow_dir[i] &= tile::DIR_MASK_EW;
                    }
                }
            }
        }
        for (c, m) in &self.door_allow {
            self.allow_dir[c.index()] = *m;
        }
    }

    pub fn sync_tiles_to_wram(&mut self) {
        self.wram[wram::TILES..wram::TILES + wram::TILES_LEN].copy_from_slice(&self.tiles[..]);
    }

    pub fn adopt_tiles_from_wram(&mut self) {
        let mut tiles = [0u8; TILES_LEN];
        tiles.copy_from_slice(&self.wram[wram::TILES..wram::TILES + wram::TILES_LEN]);
        self.tiles.copy_from_slice(&tiles);
    }

    pub fn hash_tiles(&self) -> u64 {
        let mut h = DefaultHasher::new();
        h.write(&self.tiles[..]);
        h.finish()
    }

    /// Bind the visited set matching the current tile grid, creating an
    /// empty one for unseen grids. The same cell may be revisited after a
    /// tag replay mutates the grid.
    pub fn install_visited(&mut self) {
        self.current_hash = self.hash_tiles();
        self.visited_by_hash
            .entry(self.current_hash)
            .or_insert_with(HashSet::new);
    }

    pub fn is_visited(&self, c: MapCoord) -> bool {
        self.visited_by_hash
            .get(&self.current_hash)
            .map(|s| s.contains(&c))
            .unwrap_or(false)
    }

    pub fn mark_visited(&mut self, c: MapCoord) {
        if let Some(s) = self.visited_by_hash.get_mut(&self.current_hash) {
            s.insert(c);
        }
    }

    pub fn unmark_visited(&mut self, c: MapCoord) {
        if let Some(s) = self.visited_by_hash.get_mut(&self.current_hash) {
            s.remove(&c);
        }
    }

    pub fn distinct_tile_states(&self) -> usize {
        self.visited_by_hash.len()
    }

    /// Renderer interface: 256 BGR15 palette words from the CGRAM shadow.
    pub fn palette_words(&self) -> Vec<u16> {
        (0..256)
            .map(|i| emu::read16(&self.wram_after_load[..], 0xC300 + ((i as u32) << 1)))
            .collect()
    }

    /// Renderer interface: the 64x64 BG1 tilemap words.
    pub fn bg1_tilemap(&self) -> Vec<u16> {
        (0..0x1000)
            .map(|i| emu::read16(&self.wram_after_load[..], 0x4000 + ((i as u32) << 1)))
            .collect()
    }

    /// Renderer interface: the 64x64 BG2 tilemap words.
    pub fn bg2_tilemap(&self) -> Vec<u16> {
        (0..0x1000)
            .map(|i| emu::read16(&self.wram_after_load[..], 0x2000 + ((i as u32) << 1)))
            .collect()
    }

    /// The door whose 4x4 footprint covers `c`, if any.
    pub fn door_containing(&self, c: MapCoord) -> Option<&Door> {
        self.doors.iter().find(|d| d.contains(c))
    }

    /// One engine step: the current tile must allow `d` and the move must
    /// stay on the grid.
    pub fn attempt_traversal(&self, c: MapCoord, d: Direction, inc: u16) -> Option<MapCoord> {
        if self.allow_dir[c.index()] & d.mask() == 0 {
            return None;
        }
        c.move_by(d, inc)
    }
}

pub type SharedRoom = Arc<Mutex<Room>>;

/// Map of supertile id to Room behind a single map-level lock. Element
/// contents are guarded by each Room's own mutex; loading happens under the
/// map lock so two tasks can't both load the same supertile.
pub struct RoomCache {
    rooms: Mutex<HashMap<u16, SharedRoom>>,
}

impl RoomCache {
    pub fn new() -> RoomCache {
        RoomCache {
            rooms: Mutex::new(HashMap::with_capacity(0x128)),
        }
    }

    pub fn get(&self, st: Supertile) -> Option<SharedRoom> {
        self.rooms.lock().get(&st.0).cloned()
    }

    pub fn get_or_create_with<F>(&self, st: Supertile, create: F) -> SharedRoom
    where
        F: FnOnce() -> Room,
    {
        let mut rooms = self.rooms.lock();
        rooms
            .entry(st.0)
            .or_insert_with(|| Arc::new(Mutex::new(create())))
            .clone()
    }

    pub fn all(&self) -> Vec<SharedRoom> {
        self.rooms.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.lock().is_empty()
    }
}

impl Default for RoomCache {
    fn default() -> RoomCache {
        RoomCache::new()
    }
}
