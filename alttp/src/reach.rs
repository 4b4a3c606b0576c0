//! The underworld flood fill: a stateful LIFO graph search over a Room's
//! tile grid whose traversal rules encode the game's movement primitives.
//! Outbound work (neighbor edges, stairs, pits, warps, overworld exits) is
//! returned as explicit edges for the task layer to submit.

use crate::coord::MapCoord;
use crate::emu::{self, wram, Emulator, Wram};
use crate::pits::PitTables;
use crate::room::Room;
use crate::rom::RomPointers;
use crate::stubs::Stubs;
use crate::tags;
use crate::tile;
use crate::{Direction, Supertile};
use log::{debug, info, warn};

/// Per-tile scan modes; the snapshot-carrying start kinds live in
/// `StartKind`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Walk,
    Doorway,
    Somaria,
    Pipe,
    Swim,
}

/// Start states replayed between walk passes. Star-tile and push-block
/// starts carry the WRAM snapshot captured when their trigger was stepped
/// on; this is why the mode is a tagged enum and not a bare integer.
pub enum StartKind {
    Walk,
    KillRoom,
    StarTiles { wram: Box<Wram> },
    PushBlock { wram: Box<Wram> },
    PickUpBlock { quad: MapCoord },
}

struct StartState {
    c: MapCoord,
    d: Direction,
    kind: StartKind,
}

#[derive(Clone, Copy, Debug)]
struct ScanState {
    c: MapCoord,
    d: Direction,
    mode: Mode,
}

/// Outbound exploration work produced by one flood fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outbound {
    Underworld {
        supertile: Supertile,
        coord: MapCoord,
        dir: Direction,
    },
    /// An exit door left the underworld; absolute pixel coordinates of the
    /// exit tile.
    OverworldExit { abs_x: u16, abs_y: u16 },
}

/// Everything a flood fill needs besides the Room itself.
pub struct ReachEnv<'a, E: Emulator> {
    pub e: &'a mut E,
    pub stubs: &'a Stubs,
    pub pointers: &'a RomPointers,
    pub pits: &'a PitTables,
}

/// Flood-fill one room from a seed state. The caller holds the Room lock
/// for the duration of the call.
pub fn floodfill<E: Emulator>(
    room: &mut Room,
    seed_c: MapCoord,
    seed_d: Direction,
    env: &mut ReachEnv<E>,
) -> Vec<Outbound> {
    let mut out = Vec::new();
    if !room.is_loaded {
        debug!("{}: skipping flood fill of unloaded room", room.supertile);
        return out;
    }

    // pushed so they pop LIFO: the walk pass first, then the synthetic
    // kill-room pass that lets "kill all enemies" tags open doors
    let mut starts = vec![
        StartState {
            c: seed_c,
            d: seed_d,
            kind: StartKind::KillRoom,
        },
        StartState {
            c: seed_c,
            d: seed_d,
            kind: StartKind::Walk,
        },
    ];

    while let Some(ss) = starts.pop() {
        let replayed = match ss.kind {
            StartKind::Walk => {
                room.wram.copy_from_slice(&room.wram_after_load[..]);
                room.adopt_tiles_from_wram();
                room.derive_allow_dir();
                Ok(false)
            }
            StartKind::KillRoom => {
                tags::kill_enemies(room);
                tags::replay(room, env.e, env.stubs, ss.c)
            }
            StartKind::StarTiles { wram: snap } => {
                room.wram.copy_from_slice(&snap[..]);
                tags::replay(room, env.e, env.stubs, ss.c)
            }
            StartKind::PushBlock { wram: snap } => {
                room.wram.copy_from_slice(&snap[..]);
                // push-block engaged
                emu::write8(&mut room.wram[..], 0x0641, 1);
                tags::replay(room, env.e, env.stubs, ss.c)
            }
            StartKind::PickUpBlock { quad } => {
                let i = quad.index();
                for &o in &[0usize, 1, 0x40, 0x41] {
                    room.tiles[i + o] = 0x20;
                }
                room.sync_tiles_to_wram();
                room.derive_allow_dir();
                Ok(false)
            }
        };
        if let Err(err) = replayed {
            warn!("{}: tag replay failed: {}", room.supertile, err);
            room.is_loaded = false;
            break;
        }

        room.install_visited();
        walk_pass(
            room,
            ScanState {
                c: ss.c,
                d: ss.d,
                mode: Mode::Walk,
            },
            env,
            &mut starts,
            &mut out,
        );
    }

    out
}

fn walk_pass<E: Emulator>(
    room: &mut Room,
    seed: ScanState,
    env: &mut ReachEnv<E>,
    starts: &mut Vec<StartState>,
    out: &mut Vec<Outbound>,
) {
    let mut lifo: Vec<ScanState> = Vec::with_capacity(1024);
    lifo.push(seed);

    while let Some(se) = lifo.pop() {
        match se.mode {
            Mode::Somaria => step_somaria(room, se, &mut lifo),
            Mode::Pipe => step_pipe(room, se, &mut lifo),
            Mode::Swim => step_swim(room, se, &mut lifo),
            Mode::Walk | Mode::Doorway => step_walk(room, se, env, starts, out, &mut lifo),
        }
    }
}

fn step_walk<E: Emulator>(
    room: &mut Room,
    se: ScanState,
    env: &mut ReachEnv<E>,
    starts: &mut Vec<StartState>,
    out: &mut Vec<Outbound>,
    lifo: &mut Vec<ScanState>,
) {
    if room.is_visited(se.c) {
        return;
    }
    room.mark_visited(se.c);

    let idx = se.c.index();
    let v = room.tiles[idx];

    if room.edge_door_tile.contains_key(&se.c) {
        step_edge_doorway(room, se, out, lifo);
        return;
    }

    let mut can_traverse = false;
    let mut can_turn = false;

    match v {
        // doorway and shutter tiles: traversable, no turning; entrance
        // doors stay entry-only through their allow-dir override
        0x80..=0x8F => {
            can_traverse = true;
        }
        // single-layer auto-stairs; a pool past them opens a dive
        0x1D | 0x3D => {
            room.reachable[idx] = v;
            if let Some(cd) = se.c.move_by(se.d, 3) {
                let below = cd.flip_layer();
                if room.tiles[below.index()] == 0x08 {
                    lifo.push(ScanState {
                        c: below,
                        d: se.d,
                        mode: Mode::Swim,
                    });
                }
            }
            if let Some(cn) = se.c.move_by(se.d, 2) {
                lifo.push(ScanState {
                    c: cn,
                    d: se.d,
                    mode: Mode::Walk,
                });
            }
            return;
        }
        // layer-toggle stairs: march two tiles, then flip the layer
        0x1E | 0x1F | 0x3E | 0x3F => {
            room.reachable[idx] = v;
            if let Some(cn) = se.c.move_by(se.d, 2) {
                lifo.push(ScanState {
                    c: cn.flip_layer(),
                    d: se.d,
                    mode: Mode::Walk,
                });
            }
            return;
        }
        // spiral and stepping inter-room stairs
        0x5E | 0x5F | 0x30..=0x37 => {
            room.reachable[idx] = v;
            try_inter_room_stair(room, se, out);
            return;
        }
        // matched-pair doorways may hide a stairwell behind them
        0xF0..=0xFF => {
            if try_inter_room_stair(room, se, out) {
                room.reachable[idx] = v;
                return;
            }
            can_traverse = true;
        }
        // pipe entry
        0xBE => {
            room.reachable[idx] = v;
            if let Some(cn) = se.c.move_by(se.d, 1) {
                lifo.push(ScanState {
                    c: cn,
                    d: se.d,
                    mode: Mode::Pipe,
                });
            }
            return;
        }
        // ledges: a 5-tile jump along the ledge's axis only
        0x28..=0x2B => {
            if let Some(axis) = tile::ledge_axis(v) {
                if axis & se.d.mask() != 0 {
                    room.reachable[idx] = v;
                    if let Some(cl) = se.c.move_by(se.d, 5) {
                        lifo.push(ScanState {
                            c: cl,
                            d: se.d,
                            mode: Mode::Walk,
                        });
                    }
                }
            }
            return;
        }
        // deep water on layer 1: ladder row, two tiles at a time
        0x08 => {
            if !se.c.on_layer2() {
                room.reachable[idx] = v;
                if let Some(cn) = se.c.move_by(se.d, 2) {
                    lifo.push(ScanState {
                        c: cn,
                        d: se.d,
                        mode: Mode::Walk,
                    });
                }
            }
            return;
        }
        // water ladder: swim out on the opposite layer
        0x0A => {
            room.reachable[idx] = v;
            lifo.push(ScanState {
                c: se.c.flip_layer(),
                d: se.d,
                mode: Mode::Swim,
            });
            return;
        }
        // layer passthrough: solid only above a moving floor
        0x1C => {
            if se.c.on_layer2() || room.tiles[se.c.to_layer2().index()] == 0x0C {
                can_traverse = true;
                can_turn = true;
            } else {
                room.reachable[idx] = v;
                lifo.push(ScanState {
                    c: se.c.to_layer2(),
                    d: se.d,
                    mode: Mode::Walk,
                });
                return;
            }
        }
        // pits and bombable floors fall through to the warp target
        0x20 | 0x62 => {
            room.reachable[idx] = v;
            room.has_reachable_pit = true;
            spawn_pit_warp(room, se, env, out);
            // a track end across the pit can still be boarded
            if let Some(ct) = se.c.move_by(se.d, 2) {
                let tv = room.tiles[ct.index()];
                if tv == 0xB6 || tv == 0xBC {
                    lifo.push(ScanState {
                        c: ct,
                        d: se.d,
                        mode: Mode::Somaria,
                    });
                }
            }
            if v == 0x62 {
                // bombable floor carries weight until it is blown open
                can_traverse = true;
                can_turn = true;
            } else {
                return;
            }
        }
        // pots, pegs, blocks
        0x70..=0x7F => {
            can_traverse = true;
            can_turn = true;
        }
        _ => {
            if tile::is_always_walkable(v) || tile::is_maybe_walkable(v) {
                can_traverse = true;
                can_turn = true;
            }
        }
    }

    if !can_traverse {
        return;
    }
    room.reachable[idx] = v;

    // a swimmable pool directly below opens a swim task
    if !se.c.on_layer2() && room.tiles[se.c.to_layer2().index()] == 0x08 {
        lifo.push(ScanState {
            c: se.c.to_layer2(),
            d: se.d,
            mode: Mode::Swim,
        });
    }

    check_hookshot(room, se, lifo);
    check_quads(room, se, env, starts, out);
    check_bonk_jump(room, se, lifo);

    // neighbor supertile across the outermost row/col; tiles inside a
    // door's footprint are the doorway walk's business, not the bare
    // edge's
    if let Some((ed, 0)) = se.c.is_edge() {
        if ed == se.d
            && room.allow_dir[idx] & se.d.mask() != 0
            && room.door_containing(se.c).is_none()
        {
            if let Some(nst) = room.supertile.move_by(se.d) {
                let mut ct = se.c.opposite_edge();
                if room.swap_layers.contains(&se.c) {
                    ct = ct.flip_layer();
                }
                out.push(Outbound::Underworld {
                    supertile: nst,
                    coord: ct,
                    dir: se.d,
                });
            }
        }
    }

    if can_turn {
        for d in [se.d.opposite(), se.d.rotate_cw(), se.d.rotate_ccw()] {
            if let Some(cn) = room.attempt_traversal(se.c, d, 1) {
                lifo.push(ScanState {
                    c: cn,
                    d,
                    mode: Mode::Walk,
                });
            }
        }
    }
    if let Some(cn) = room.attempt_traversal(se.c, se.d, 1) {
        lifo.push(ScanState {
            c: cn,
            d: se.d,
            mode: Mode::Walk,
        });
    }
}

/// Walk an edge doorway strip. Moving with the door's direction carries the
/// fill out of the room; moving against it marks the strip and continues
/// inward.
fn step_edge_doorway(
    room: &mut Room,
    se: ScanState,
    out: &mut Vec<Outbound>,
    lifo: &mut Vec<ScanState>,
) {
    let di = match room.edge_door_tile.get(&se.c) {
        Some(&di) => di,
        None => return,
    };
    let door = room.doors[di];

    if se.d == door.dir {
        // entry-only doorways never let the fill back out
        if room.allow_dir[se.c.index()] & se.d.mask() == 0 {
            return;
        }
        let mut c = se.c;
        let mut layer_swap = false;
        loop {
            room.mark_visited(c);
            room.reachable[c.index()] = room.tiles[c.index()];
            if room.swap_layers.contains(&c) {
                layer_swap = !layer_swap;
            }
            if let Some((ed, 0)) = c.is_edge() {
                if ed == se.d {
                    if door.is_exit && door.kind.is_overworld_exit() {
                        let (sx, sy) = room.supertile.abs_top_left();
                        let (_, row, col) = c.row_col();
                        out.push(Outbound::OverworldExit {
                            abs_x: sx + (col << 3),
                            abs_y: sy + (row << 3),
                        });
                        return;
                    }
                    let target = if door.kind.is_explicit_room_door() {
                        room.stair_exit_to[0]
                    } else {
                        match room.supertile.move_by(se.d) {
                            Some(st) => st,
                            None => return,
                        }
                    };
                    if target.0 != 0 {
                        let mut ct = c.opposite_edge();
                        if layer_swap {
                            ct = ct.flip_layer();
                        }
                        out.push(Outbound::Underworld {
                            supertile: target,
                            coord: ct,
                            dir: se.d,
                        });
                    }
                    return;
                }
            }
            c = match c.move_by(se.d, 1) {
                Some(cn) => cn,
                None => return,
            };
        }
    } else if se.d == door.dir.opposite() {
        // re-entering from the edge simply marks the strip reachable
        room.reachable[se.c.index()] = room.tiles[se.c.index()];
        if let Some(cn) = se.c.move_by(se.d, 1) {
            lifo.push(ScanState {
                c: cn,
                d: se.d,
                mode: Mode::Doorway,
            });
        }
    }
}

fn spawn_pit_warp<E: Emulator>(
    room: &Room,
    se: ScanState,
    env: &ReachEnv<E>,
    out: &mut Vec<Outbound>,
) {
    let st = room.supertile;
    if env.pits.has_pit_damage(st) || env.pits.warp_pit_unreachable(st) {
        info!("{}: pit at {} is not a reachability edge", st, se.c);
        return;
    }
    if room.warp_exit_to.0 == 0 {
        return;
    }
    out.push(Outbound::Underworld {
        supertile: room.warp_exit_to,
        coord: MapCoord((se.c.0 & 0x0FFF) | room.warp_exit_layer),
        dir: se.d,
    });
}

/// Scan up to 4 tiles ahead for an inter-room stair tile; on a hit, compute
/// the landing coordinate in the destination supertile and emit the task.
fn try_inter_room_stair(room: &Room, se: ScanState, out: &mut Vec<Outbound>) -> bool {
    let mut found = None;
    for k in 0..4u16 {
        let c = if k == 0 {
            Some(se.c)
        } else {
            se.c.move_by(se.d, k)
        };
        let c = match c {
            Some(c) => c,
            None => break,
        };
        let tv = room.tiles[c.index()];
        if (0x30..=0x39).contains(&tv) || tv == 0x5E || tv == 0x5F {
            found = Some(tv);
            break;
        }
    }
    let sv = match found {
        Some(sv) => sv,
        None => return false,
    };

    let stair_exit = sv & 0x0F;
    let slot = (stair_exit & 0x03) as usize;
    let target = room.stair_exit_to[slot];
    if target.0 == 0 {
        return false;
    }
    let tl = room.stair_target_layer[slot];
    let going_up = stair_exit & 0x04 != 0;
    let changes_plane = se.c.on_layer2() != (tl != 0);

    let mut ct = (se.c.0 & 0x0FFF) as i32;
    match sv {
        // straight flights land deep on the other side of the room
        0x38 => ct += 0x0D40,
        0x39 => ct -= 0x0D40,
        0x30..=0x37 => {
            // stepping stairs advance one tile onto the target plane
            if let Some(cn) = se.c.move_by(se.d, 1) {
                ct = (cn.0 & 0x0FFF) as i32;
            }
        }
        _ => {} // spiral stairs keep the coordinate
    }
    // a flight that changes planes lands three rows short
    if changes_plane {
        if going_up {
            ct -= 0xC0;
        } else {
            ct += 0xC0;
        }
    }
    let ct = MapCoord((((ct % 0x1000 + 0x1000) % 0x1000) as u16) | tl);
    out.push(Outbound::Underworld {
        supertile: target,
        coord: ct,
        dir: se.d,
    });
    true
}

/// Try a hookshot chain in every direction: 1..16 tiles over hook-through
/// tiles or paired ledges, ending on an anchor, landing two tiles short.
fn check_hookshot(room: &mut Room, se: ScanState, lifo: &mut Vec<ScanState>) {
    for &d in &Direction::ALL {
        let mut crossed_impassable = false;
        let mut ns_ledges = 0u32;
        let mut ew_ledges = 0u32;
        let mut anchor = None;

        let mut c = se.c;
        for k in 1..=16u16 {
            c = match c.move_by(d, 1) {
                Some(c) => c,
                None => break,
            };
            let v = room.tiles[c.index()];
            if tile::is_hookable(v) {
                anchor = Some(k);
                break;
            }
            if let Some(axis) = tile::ledge_axis(v) {
                if axis == tile::DIR_MASK_NS {
                    ns_ledges += 1;
                } else {
                    ew_ledges += 1;
                }
                continue;
            }
            if tile::can_hook_through(v) {
                if !tile::is_always_walkable(v) {
                    crossed_impassable = true;
                }
                continue;
            }
            if tile::is_always_walkable(v) {
                continue;
            }
            break; // a solid wall stops the chain
        }

        let k = match anchor {
            Some(k) => k,
            None => continue,
        };
        if ns_ledges % 2 != 0 || ew_ledges % 2 != 0 {
            continue; // an unpaired ledge derails the chain
        }
        let paired_ledges = ns_ledges >= 2 || ew_ledges >= 2;
        if !crossed_impassable && !paired_ledges {
            continue;
        }
        if k < 3 {
            continue;
        }
        let land = match se.c.move_by(d, k - 2) {
            Some(c) => c,
            None => continue,
        };
        let lv = room.tiles[land.index()];
        // the chain can drop you on open floor or right at a pit lip
        if !(tile::is_always_walkable(lv) || lv == 0x20 || lv == 0x62) {
            continue;
        }
        if room.is_visited(land) {
            continue;
        }

        for j in 1..(k - 2) {
            if let Some(cm) = se.c.move_by(d, j) {
                room.hookshot[cm.index()] |= d.mask();
            }
        }
        lifo.push(ScanState {
            c: land,
            d,
            mode: Mode::Walk,
        });
    }
}

/// Uniform 2x2 footprints trigger star tiles, warp tiles and the two block
/// manipulations.
fn check_quads<E: Emulator>(
    room: &mut Room,
    se: ScanState,
    env: &mut ReachEnv<E>,
    starts: &mut Vec<StartState>,
    out: &mut Vec<Outbound>,
) {
    let quad = match quad_at(room, se.c) {
        Some(v) => v,
        None => return,
    };
    match quad {
        0x3A | 0x3B => {
            if room.fired_star.insert(se.c) {
                debug!("{}: star tiles at {}", room.supertile, se.c);
                starts.push(StartState {
                    c: se.c,
                    d: se.d,
                    kind: StartKind::StarTiles {
                        wram: room.wram.clone(),
                    },
                });
            }
        }
        0x4B => {
            if room.warp_exit_to.0 != 0 {
                out.push(Outbound::Underworld {
                    supertile: room.warp_exit_to,
                    coord: MapCoord(se.c.0 | room.warp_exit_layer),
                    dir: se.d,
                });
            }
        }
        0x70..=0x7F => {
            let j = (quad & 0x0F) as u32;
            let prop = emu::read16(&room.wram[..], wram::BLOCK_PROPS + (j << 1));
            if prop == 0x0000 {
                if room.fired_push.insert(se.c) {
                    debug!("{}: push block at {}", room.supertile, se.c);
                    starts.push(StartState {
                        c: se.c,
                        d: se.d,
                        kind: StartKind::PushBlock {
                            wram: room.wram.clone(),
                        },
                    });
                }
            } else if prop == 0x2020 && room.fired_lift.insert(se.c) {
                // a liftable block hiding a pit carves its footprint open
                if pot_item_is_hole(room, se.c, env) {
                    debug!("{}: lift block over a hole at {}", room.supertile, se.c);
                    starts.push(StartState {
                        c: se.c,
                        d: se.d,
                        kind: StartKind::PickUpBlock { quad: se.c },
                    });
                }
            }
        }
        _ => {}
    }
}

/// Consult the pot-items table for this room: entries are (tilemap word
/// address, item byte) until an $FFFF sentinel; item $80 is a hole.
fn pot_item_is_hole<E: Emulator>(room: &Room, c: MapCoord, env: &mut ReachEnv<E>) -> bool {
    let table = env.pointers.room_data_pot_items_pointers;
    let ptr = env.e.read16(table + (room.supertile.0 as u32) * 2) as u32;
    if ptr == 0 {
        return false;
    }
    let mut addr = 0x01_0000 | ptr;
    for _ in 0..0x100 {
        let pos = env.e.read16(addr);
        if pos == 0xFFFF {
            return false;
        }
        let item = env.e.read8(addr + 2);
        if ((pos & 0x7FFF) >> 1) == (c.0 & 0x0FFF) && item == 0x80 {
            return true;
        }
        addr += 3;
    }
    warn!("{}: pot-items list never terminated", room.supertile);
    false
}

/// Bonking across a pit: two clear tiles, then pits, then a clean landing.
fn check_bonk_jump(room: &Room, se: ScanState, lifo: &mut Vec<ScanState>) {
    if !tile::is_bonkable(room.tiles[se.c.index()]) {
        return;
    }
    for &d in &Direction::ALL {
        let (t1, t2) = match (se.c.move_by(d, 1), se.c.move_by(d, 2)) {
            (Some(a), Some(b)) => (a, b),
            _ => continue,
        };
        let walkable = |c: MapCoord| {
            let tv = room.tiles[c.index()];
            tile::is_always_walkable(tv) || tile::is_maybe_walkable(tv)
        };
        if !walkable(t1) || !walkable(t2) {
            continue;
        }
        let mut saw_pit = false;
        for j in 3..=11u16 {
            let c = match se.c.move_by(d, j) {
                Some(c) => c,
                None => break,
            };
            let tv = room.tiles[c.index()];
            if tv == 0x20 {
                saw_pit = true;
                continue;
            }
            if tile::is_collision(tv) {
                break;
            }
            if saw_pit && !room.is_visited(c) {
                lifo.push(ScanState {
                    c,
                    d,
                    mode: Mode::Walk,
                });
            }
            break;
        }
    }
}

fn quad_at(room: &Room, c: MapCoord) -> Option<u8> {
    let (_, row, col) = c.row_col();
    if row >= 0x3F || col >= 0x3F {
        return None;
    }
    let i = c.index();
    let v = room.tiles[i];
    if room.tiles[i + 1] == v && room.tiles[i + 0x40] == v && room.tiles[i + 0x41] == v {
        Some(v)
    } else {
        None
    }
}

fn step_somaria(room: &mut Room, se: ScanState, lifo: &mut Vec<ScanState>) {
    if room.is_visited(se.c) {
        return;
    }
    room.mark_visited(se.c);

    let v = room.tiles[se.c.index()];
    if !(0xB0..=0xBE).contains(&v) {
        return;
    }
    room.reachable[se.c.index()] = v;

    match v {
        // track end, parallel: the cane throws you 3 tiles onward
        0xB6 => {
            if let Some(cl) = se.c.move_by(se.d, 3) {
                if !tile::is_collision(room.tiles[cl.index()]) {
                    lifo.push(ScanState {
                        c: cl,
                        d: se.d,
                        mode: Mode::Walk,
                    });
                }
            }
            return;
        }
        // track end, perpendicular: dismount to either side
        0xBC => {
            for d in [se.d.rotate_cw(), se.d.rotate_ccw()] {
                if let Some(cl) = se.c.move_by(d, 3) {
                    if !tile::is_collision(room.tiles[cl.index()]) {
                        lifo.push(ScanState {
                            c: cl,
                            d,
                            mode: Mode::Walk,
                        });
                    }
                }
            }
            return;
        }
        // cross-over: the perpendicular run may pass through later
        0xBD => {
            room.unmark_visited(se.c);
            if let Some(cn) = room.attempt_traversal(se.c, se.d, 1) {
                lifo.push(ScanState {
                    c: cn,
                    d: se.d,
                    mode: Mode::Somaria,
                });
            }
            return;
        }
        // pipe exit tile ends the ride
        0xBE => {
            if let Some(cn) = se.c.move_by(se.d, 1) {
                lifo.push(ScanState {
                    c: cn,
                    d: se.d,
                    mode: Mode::Walk,
                });
            }
            return;
        }
        _ => {}
    }

    // corners and junctions turn; the allow-dir mask carries the track
    // geometry
    for d in [se.d.rotate_cw(), se.d.rotate_ccw()] {
        if let Some(cn) = room.attempt_traversal(se.c, d, 1) {
            lifo.push(ScanState {
                c: cn,
                d,
                mode: Mode::Somaria,
            });
        }
    }
    if let Some(cn) = room.attempt_traversal(se.c, se.d, 1) {
        lifo.push(ScanState {
            c: cn,
            d: se.d,
            mode: Mode::Somaria,
        });
    }
}

fn step_pipe(room: &mut Room, se: ScanState, lifo: &mut Vec<ScanState>) {
    if room.is_visited(se.c) {
        return;
    }
    room.mark_visited(se.c);

    let v = room.tiles[se.c.index()];
    let mut d = se.d;
    match v {
        0xB2..=0xB5 => {
            // the corner's input arm determines its output arm
            let arms = match tile::corner_arms(v) {
                Some(arms) => arms,
                None => return,
            };
            let income = se.d.opposite();
            d = if income == arms.0 {
                arms.1
            } else if income == arms.1 {
                arms.0
            } else {
                // derailed; allow re-entry from the proper side
                room.unmark_visited(se.c);
                return;
            };
        }
        // cross-over may be traversed twice
        0xBD => {
            room.unmark_visited(se.c);
        }
        // pipe exit drops back to walking
        0xBE => {
            room.reachable[se.c.index()] = v;
            if let Some(cn) = se.c.move_by(se.d, 1) {
                lifo.push(ScanState {
                    c: cn,
                    d: se.d,
                    mode: Mode::Walk,
                });
            }
            return;
        }
        0xB0 | 0xB1 | 0xB6..=0xBC => {}
        _ => {
            // off the pipe; the opposite end may still be ridden
            room.unmark_visited(se.c);
            return;
        }
    }

    room.reachable[se.c.index()] = v;
    // exactly one forward move per pipe step
    if let Some(cn) = se.c.move_by(d, 1) {
        lifo.push(ScanState {
            c: cn,
            d,
            mode: Mode::Pipe,
        });
    }
}

fn step_swim(room: &mut Room, se: ScanState, lifo: &mut Vec<ScanState>) {
    if room.is_visited(se.c) {
        return;
    }
    room.mark_visited(se.c);

    let v = room.tiles[se.c.index()];
    match v {
        // deep water
        0x08 => {
            room.reachable[se.c.index()] = v;
            for d in [se.d.rotate_cw(), se.d.rotate_ccw(), se.d.opposite(), se.d] {
                if let Some(cn) = se.c.move_by(d, 1) {
                    lifo.push(ScanState {
                        c: cn,
                        d,
                        mode: Mode::Swim,
                    });
                }
            }
        }
        // the water ladder and stairs climb out onto the base layer
        0x0A | 0x1D | 0x3D => {
            room.reachable[se.c.index()] = v;
            lifo.push(ScanState {
                c: se.c.to_layer1(),
                d: se.d,
                mode: Mode::Walk,
            });
        }
        _ => {}
    }
}

/// Auxiliary scan: flood from the 16 live sprite slots in the post-load
/// WRAM and report whether any enemy can reach a pit tile. Uses its own
/// scratch state so it never disturbs the main fill's results.
pub fn enemy_reachable_pits(room: &Room) -> bool {
    use crate::coord::abs_to_map_coord;
    use crate::room::TILES_LEN;

    let w = &room.wram_after_load[..];
    let mut lifo: Vec<MapCoord> = Vec::with_capacity(64);
    for i in 0..16u32 {
        // skip inactive enemies
        if emu::read8(w, 0x0DD0 + i) == 0 {
            continue;
        }
        let y = emu::read8(w, 0x0D00 + i) as u16 | (emu::read8(w, 0x0D20 + i) as u16) << 8;
        let x = emu::read8(w, 0x0D10 + i) as u16 | (emu::read8(w, 0x0D30 + i) as u16) << 8;
        let layer = (emu::read8(w, 0x0F20 + i) & 1) as u16;
        lifo.push(abs_to_map_coord(x, y, layer));
    }

    let mut visited = vec![false; TILES_LEN];
    let mut found = false;
    while let Some(c) = lifo.pop() {
        if visited[c.index()] {
            continue;
        }
        visited[c.index()] = true;
        let v = room.tiles[c.index()];
        if v == 0x20 {
            found = true;
            continue;
        }
        if tile::is_always_walkable(v) || tile::is_maybe_walkable(v) {
            for &d in &Direction::ALL {
                if let Some(cn) = c.move_by(d, 1) {
                    lifo.push(cn);
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pits::PitTables;
    use crate::rom::{pointers_for, Region};
    use crate::testemu::FakeEmulator;

    fn env_parts() -> (FakeEmulator, Stubs, crate::rom::RomPointers, PitTables) {
        let mut stubs = Stubs::default();
        stubs.handle_room_tags_pc = 0x00_5300;
        (
            FakeEmulator::new(),
            stubs,
            pointers_for(Region::Japan),
            PitTables::empty(),
        )
    }

    /// A room whose working WRAM and post-load snapshot match its tiles.
    fn sealed(mut room: Room) -> Room {
        room.derive_allow_dir();
        room.sync_tiles_to_wram();
        room.wram_after_load = std::sync::Arc::from(room.wram.clone());
        room.install_visited();
        room
    }

    fn run(
        room: &mut Room,
        seed_c: MapCoord,
        seed_d: Direction,
        e: &mut FakeEmulator,
        stubs: &Stubs,
        pointers: &crate::rom::RomPointers,
        pits: &PitTables,
    ) -> Vec<Outbound> {
        let mut env = ReachEnv {
            e,
            stubs,
            pointers,
            pits,
        };
        floodfill(room, seed_c, seed_d, &mut env)
    }

    #[test]
    fn corridor_edge_exit() {
        // supertile $002, row $10, cols $1F..$3F open floor
        let mut room = Room::new(Supertile(0x002), 0);
        for col in 0x1F..=0x3Fu16 {
            room.tiles[MapCoord::new(0, 0x10, col).index()] = 0x00;
        }
        let mut room = sealed(room);
        let (mut e, stubs, p, pits) = env_parts();

        let out = run(
            &mut room,
            MapCoord::new(0, 0x10, 0x1F),
            Direction::East,
            &mut e,
            &stubs,
            &p,
            &pits,
        );

        for col in 0x1F..=0x3Fu16 {
            assert_eq!(
                room.reachable[MapCoord::new(0, 0x10, col).index()],
                0x00,
                "col {:#x}",
                col
            );
        }
        assert_eq!(
            out,
            vec![Outbound::Underworld {
                supertile: Supertile(0x003),
                coord: MapCoord::new(0, 0x10, 0x00),
                dir: Direction::East,
            }]
        );
    }

    #[test]
    fn pit_spawns_warp_task() {
        let mut room = Room::new(Supertile(0x07F), 0);
        let c = MapCoord::new(0, 0x20, 0x20);
        room.tiles[c.index()] = 0x20;
        room.warp_exit_to = Supertile(0x010);
        room.warp_exit_layer = 0;
        let mut room = sealed(room);
        let (mut e, stubs, p, pits) = env_parts();

        let out = run(&mut room, c, Direction::South, &mut e, &stubs, &p, &pits);

        assert_eq!(room.reachable[c.index()], 0x20);
        assert!(room.has_reachable_pit);
        assert_eq!(
            out,
            vec![Outbound::Underworld {
                supertile: Supertile(0x010),
                coord: MapCoord(c.0 & 0x0FFF),
                dir: Direction::South,
            }]
        );
    }

    #[test]
    fn pit_damage_rooms_spawn_nothing() {
        let mut room = Room::new(Supertile(0x07F), 0);
        let c = MapCoord::new(0, 0x20, 0x20);
        room.tiles[c.index()] = 0x20;
        room.warp_exit_to = Supertile(0x010);
        let mut room = sealed(room);
        let (mut e, stubs, p, _) = env_parts();
        let pits = PitTables::with_damage(&[0x07F]);

        let out = run(&mut room, c, Direction::South, &mut e, &stubs, &p, &pits);
        assert!(out.is_empty());
        assert!(room.has_reachable_pit);
    }

    #[test]
    fn hookshot_over_pit() {
        // row $10: col 4 floor, cols 5..9 pits, col $A an anchor
        let mut room = Room::new(Supertile(0x055), 0);
        room.tiles[MapCoord::new(0, 0x10, 0x04).index()] = 0x00;
        for col in 0x05..=0x09u16 {
            room.tiles[MapCoord::new(0, 0x10, col).index()] = 0x20;
        }
        room.tiles[MapCoord::new(0, 0x10, 0x0A).index()] = 0x27;
        let mut room = sealed(room);
        let (mut e, stubs, p, pits) = env_parts();

        run(
            &mut room,
            MapCoord::new(0, 0x10, 0x04),
            Direction::East,
            &mut e,
            &stubs,
            &p,
            &pits,
        );

        assert_ne!(room.reachable[MapCoord::new(0, 0x10, 0x04).index()], 0x01);
        assert_ne!(room.reachable[MapCoord::new(0, 0x10, 0x08).index()], 0x01);
        for col in 0x05..=0x07u16 {
            assert_ne!(
                room.hookshot[MapCoord::new(0, 0x10, col).index()] & Direction::East.mask(),
                0,
                "chain must cross col {:#x}",
                col
            );
        }
        assert_eq!(
            room.hookshot[MapCoord::new(0, 0x10, 0x09).index()] & Direction::East.mask(),
            0
        );
    }

    fn star_tile_room() -> Room {
        let mut room = Room::new(Supertile(0x034), 0);
        // a 2x2 star footprint at (8,8)
        for &(r, c) in &[(8u16, 8u16), (8, 9), (9, 8), (9, 9)] {
            room.tiles[MapCoord::new(0, r, c).index()] = 0x3A;
        }
        // corridor from the star eastwards, then down col $20
        for col in 0x0A..=0x20u16 {
            room.tiles[MapCoord::new(0, 8, col).index()] = 0x00;
        }
        for row in 0x09..=0x17u16 {
            room.tiles[MapCoord::new(0, row, 0x20).index()] = 0x00;
        }
        // the blocked doorway cell
        room.tiles[MapCoord::new(0, 0x18, 0x20).index()] = 0xD0;
        // a room tag is armed
        room.wram[wram::TAGS as usize] = 0x17;
        sealed(room)
    }

    #[test]
    fn star_tiles_reveal_tag_mutations() {
        let blocked = MapCoord::new(0, 0x18, 0x20);
        let (mut e, stubs, p, pits) = env_parts();

        // without a tag mutation the doorway stays unreachable
        let mut room = star_tile_room();
        run(
            &mut room,
            MapCoord::new(0, 8, 0x12),
            Direction::West,
            &mut e,
            &stubs,
            &p,
            &pits,
        );
        assert_eq!(room.reachable[blocked.index()], 0x01);

        // the tag routine flips the door tile open
        let mut room = star_tile_room();
        let mut e = FakeEmulator::new();
        e.patch_tile_on_tags(blocked.index(), 0x00);
        run(
            &mut room,
            MapCoord::new(0, 8, 0x12),
            Direction::West,
            &mut e,
            &stubs,
            &p,
            &pits,
        );
        assert_eq!(room.reachable[blocked.index()], 0x00);
        assert_eq!(room.distinct_tile_states(), 2);
    }

    #[test]
    fn water_stairs_open_a_swim_task() {
        let mut room = Room::new(Supertile(0x022), 0);
        for row in 0x11..=0x14u16 {
            room.tiles[MapCoord::new(0, row, 0x10).index()] = 0x00;
        }
        room.tiles[MapCoord::new(0, 0x10, 0x10).index()] = 0x1D;
        room.tiles[MapCoord::new(0, 0x0E, 0x10).index()] = 0x00;
        // the pool on the other layer, three tiles past the stairs
        room.tiles[MapCoord::new(1, 0x0D, 0x10).index()] = 0x08;
        let mut room = sealed(room);
        let (mut e, stubs, p, pits) = env_parts();

        run(
            &mut room,
            MapCoord::new(0, 0x14, 0x10),
            Direction::North,
            &mut e,
            &stubs,
            &p,
            &pits,
        );
        assert_eq!(room.reachable[MapCoord::new(1, 0x0D, 0x10).index()], 0x08);
    }

    #[test]
    fn floodfill_is_idempotent() {
        let build = || {
            let mut room = Room::new(Supertile(0x002), 0);
            for col in 0x1F..=0x3Fu16 {
                room.tiles[MapCoord::new(0, 0x10, col).index()] = 0x00;
            }
            sealed(room)
        };
        let (mut e, stubs, p, pits) = env_parts();
        let seed = MapCoord::new(0, 0x10, 0x1F);

        let mut room = build();
        run(&mut room, seed, Direction::East, &mut e, &stubs, &p, &pits);
        let first_reachable = room.reachable.clone();
        let first_hookshot = room.hookshot.clone();
        let first_pit = room.has_reachable_pit;

        let out = run(&mut room, seed, Direction::East, &mut e, &stubs, &p, &pits);
        assert!(out.is_empty());
        assert_eq!(&room.reachable[..], &first_reachable[..]);
        assert_eq!(&room.hookshot[..], &first_hookshot[..]);
        assert_eq!(room.has_reachable_pit, first_pit);
    }

    #[test]
    fn warp_quad_spawns_task() {
        let mut room = Room::new(Supertile(0x044), 0);
        let c = MapCoord::new(0, 0x20, 0x20);
        let i = c.index();
        for &o in &[0usize, 1, 0x40, 0x41] {
            room.tiles[i + o] = 0x4B;
        }
        room.warp_exit_to = Supertile(0x099);
        room.warp_exit_layer = 0;
        let mut room = sealed(room);
        let (mut e, stubs, p, pits) = env_parts();

        let out = run(&mut room, c, Direction::North, &mut e, &stubs, &p, &pits);
        assert!(out.contains(&Outbound::Underworld {
            supertile: Supertile(0x099),
            coord: c,
            dir: Direction::North,
        }));
    }

    #[test]
    fn enemy_pit_scan() {
        let mut room = Room::new(Supertile(0x01), 0);
        // an open floor area with a pit, enemy standing at its edge
        for col in 0x10..=0x14u16 {
            room.tiles[MapCoord::new(0, 0x10, col).index()] = 0x00;
        }
        room.tiles[MapCoord::new(0, 0x10, 0x15).index()] = 0x20;
        let mut room = sealed(room);
        {
            let mut w: Box<Wram> = Box::new([0; crate::emu::WRAM_LEN]);
            // enemy 0: alive at abs (0x80, 0x80) == tile (0x10, 0x10)
            w[0x0DD0] = 0x09;
            w[0x0D00] = 0x80; // y low
            w[0x0D10] = 0x80; // x low
            room.wram_after_load = std::sync::Arc::from(w);
        }
        assert!(enemy_reachable_pits(&room));
    }
}
