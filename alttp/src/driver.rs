//! Boundary orchestration: the shared run context, the task payloads, and
//! the per-entrance/per-transition workers that fork the emulator, drive
//! the game's own loaders and hand the results to the flood fills.

use crate::area::{ActualScreens, Area, AreaCache, SharedArea};
use crate::coord::{abs_to_map_coord, MapCoord, OwCoord};
use crate::emu::{self, Emulator, Vram, Wram};
use crate::pits::PitTables;
use crate::reach::{self, Outbound, ReachEnv};
use crate::reachow::{self, OwEdge, OwOutbound};
use crate::room::{Room, RoomCache, SharedRoom};
use crate::rom::RomPointers;
use crate::stubs::{self, Stubs};
use crate::taskqueue::Q;
use crate::{AreaId, Direction, Supertile, ATTRACT_ENTRANCES};
use failure::{format_err, Error};
use log::{error, info};
use std::collections::HashSet;
use std::sync::Arc;

/// Everything a worker needs, shared by reference across the pool.
pub struct Ctx<E: Emulator> {
    pub rooms: RoomCache,
    pub areas: AreaCache,
    /// Donor system forked by entrance tasks.
    pub initial: E,
    pub stubs: Stubs,
    pub pointers: RomPointers,
    pub pits: PitTables,
    pub screens: ActualScreens,
    pub exclude_entrances: HashSet<u8>,
}

/// One unit of exploration work. Inter-room and overworld tasks carry the
/// system that discovered them as their fork donor, plus the WRAM/VRAM
/// baselines the destination loader needs.
pub enum ReachTask<E: Emulator> {
    Entrance {
        ctx: Arc<Ctx<E>>,
        entrance_id: u8,
    },
    InterRoom {
        ctx: Arc<Ctx<E>>,
        donor: Arc<E>,
        entrance_id: u8,
        supertile: Supertile,
        coord: MapCoord,
        dir: Direction,
    },
    OverworldExit {
        ctx: Arc<Ctx<E>>,
        donor: Arc<E>,
        abs_x: u16,
        abs_y: u16,
        wram: Arc<Wram>,
        vram: Arc<Vram>,
    },
    OverworldEdge {
        ctx: Arc<Ctx<E>>,
        donor: Arc<E>,
        area: AreaId,
        edges: Vec<OwEdge>,
        wram: Arc<Wram>,
        vram: Arc<Vram>,
    },
    OverworldWarp {
        ctx: Arc<Ctx<E>>,
        donor: Arc<E>,
        area: AreaId,
        warps: Vec<OwCoord>,
        wram: Arc<Wram>,
        vram: Arc<Vram>,
    },
}

pub type ReachQ<E> = Q<ReachTask<E>>;

/// Install the stubs, run the boot block, and read the startup tables.
pub fn init_system<E: Emulator>(
    e: &mut E,
    pointers: &RomPointers,
    fastrom: u32,
) -> Result<(Stubs, ActualScreens), Error> {
    let stubs = stubs::install(e, pointers, fastrom)?;
    stubs::boot(e, &stubs, fastrom)?;
    let screens = ActualScreens::load(e, pointers);
    Ok((stubs, screens))
}

pub fn submit_entrances<E: Emulator>(q: &ReachQ<E>, ctx: &Arc<Ctx<E>>, min: u8, max: u8) {
    for entrance_id in min..=max {
        if ctx.exclude_entrances.contains(&entrance_id) {
            info!("entrance ${:02X} skip (excluded)", entrance_id);
            continue;
        }
        if ATTRACT_ENTRANCES.contains(&entrance_id) {
            info!("entrance ${:02X} skip (attract sequence)", entrance_id);
            continue;
        }
        q.submit(
            ReachTask::Entrance {
                ctx: ctx.clone(),
                entrance_id,
            },
            reach_task_worker,
        );
    }
}

/// The single dispatch point the queue runs every task through.
pub fn reach_task_worker<E: Emulator>(q: &ReachQ<E>, t: ReachTask<E>) {
    let result = match t {
        ReachTask::Entrance { ctx, entrance_id } => entrance_task(q, ctx, entrance_id),
        ReachTask::InterRoom {
            ctx,
            donor,
            entrance_id,
            supertile,
            coord,
            dir,
        } => inter_room_task(q, ctx, donor, entrance_id, supertile, coord, dir),
        ReachTask::OverworldExit {
            ctx,
            donor,
            abs_x,
            abs_y,
            wram,
            vram,
        } => overworld_exit_task(q, ctx, donor, abs_x, abs_y, wram, vram),
        ReachTask::OverworldEdge {
            ctx,
            donor,
            area,
            edges,
            wram,
            vram,
        } => overworld_edge_task(q, ctx, donor, area, edges, wram, vram),
        ReachTask::OverworldWarp {
            ctx,
            donor,
            area,
            warps,
            wram,
            vram,
        } => overworld_warp_task(q, ctx, donor, area, warps, wram, vram),
    };
    if let Err(err) = result {
        error!("reach task failed: {}", err);
    }
}

fn entrance_task<E: Emulator>(
    q: &ReachQ<E>,
    ctx: Arc<Ctx<E>>,
    entrance_id: u8,
) -> Result<(), Error> {
    let mut e = ctx.initial.fork()?;

    // poke the entrance ID into the load stub's LDA operand
    let off = stubs::dyn_offset(ctx.stubs.set_entrance_id_pc);
    e.hwio_dyn_mut()[off] = entrance_id;
    e.exec_at(ctx.stubs.load_entrance_pc, ctx.stubs.done_pc)?;

    let st = Supertile(emu::read16(e.wram(), 0x00A0) & 0x1FF);
    let link_y = emu::read16(e.wram(), 0x0020);
    let link_x = emu::read16(e.wram(), 0x0022);
    let link_l = emu::read16(e.wram(), 0x00EE);
    let start = abs_to_map_coord(link_x, link_y, link_l);
    let dir = Direction::from_link_facing(emu::read8(e.wram(), 0x002F));
    info!("entrance ${:02X} -> {}", entrance_id, st);

    let room = ctx
        .rooms
        .get_or_create_with(st, || Room::from_load(st, entrance_id, &e));
    let out = {
        let mut room = room.lock();
        let mut env = ReachEnv {
            e: &mut e,
            stubs: &ctx.stubs,
            pointers: &ctx.pointers,
            pits: &ctx.pits,
        };
        let out = reach::floodfill(&mut room, start, dir, &mut env);
        // mark the avatar's entry position for the renderer
        room.reachable[start.index()] = 0xFF;
        out
    };

    submit_uw_outbound(q, &ctx, entrance_id, Arc::new(e), &room, out);
    Ok(())
}

fn inter_room_task<E: Emulator>(
    q: &ReachQ<E>,
    ctx: Arc<Ctx<E>>,
    donor: Arc<E>,
    entrance_id: u8,
    st: Supertile,
    coord: MapCoord,
    dir: Direction,
) -> Result<(), Error> {
    let mut e = donor.fork()?;
    {
        let w = e.wram_mut();
        emu::write16(w, 0x00A0, st.0);
        emu::write16(w, 0x048E, st.0);
    }

    let room = match e.exec_at(ctx.stubs.load_supertile_pc, ctx.stubs.done_pc) {
        Ok(()) => ctx
            .rooms
            .get_or_create_with(st, || Room::from_load(st, entrance_id, &e)),
        Err(err) => {
            error!("{}: supertile load failed: {}", st, err);
            ctx.rooms.get_or_create_with(st, || {
                let mut r = Room::new(st, entrance_id);
                r.is_loaded = false;
                r
            })
        }
    };

    let out = {
        let mut room = room.lock();
        let mut env = ReachEnv {
            e: &mut e,
            stubs: &ctx.stubs,
            pointers: &ctx.pointers,
            pits: &ctx.pits,
        };
        reach::floodfill(&mut room, coord, dir, &mut env)
    };

    submit_uw_outbound(q, &ctx, entrance_id, Arc::new(e), &room, out);
    Ok(())
}

fn submit_uw_outbound<E: Emulator>(
    q: &ReachQ<E>,
    ctx: &Arc<Ctx<E>>,
    entrance_id: u8,
    donor: Arc<E>,
    room: &SharedRoom,
    out: Vec<Outbound>,
) {
    if out.is_empty() {
        return;
    }
    let (wram, vram) = {
        let r = room.lock();
        (r.wram_after_load.clone(), r.vram_after_load.clone())
    };
    for ob in out {
        match ob {
            Outbound::Underworld {
                supertile,
                coord,
                dir,
            } => {
                q.submit(
                    ReachTask::InterRoom {
                        ctx: ctx.clone(),
                        donor: donor.clone(),
                        entrance_id,
                        supertile,
                        coord,
                        dir,
                    },
                    reach_task_worker,
                );
            }
            Outbound::OverworldExit { abs_x, abs_y } => {
                q.submit(
                    ReachTask::OverworldExit {
                        ctx: ctx.clone(),
                        donor: donor.clone(),
                        abs_x,
                        abs_y,
                        wram: wram.clone(),
                        vram: vram.clone(),
                    },
                    reach_task_worker,
                );
            }
        }
    }
}

fn submit_ow_outbound<E: Emulator>(
    q: &ReachQ<E>,
    ctx: &Arc<Ctx<E>>,
    donor: Arc<E>,
    area: &SharedArea,
    out: Vec<OwOutbound>,
) {
    if out.is_empty() {
        return;
    }
    let (wram, vram) = {
        let a = area.lock();
        (a.wram_after_load.clone(), a.vram_after_load.clone())
    };
    for ob in out {
        match ob {
            OwOutbound::UnderworldEntrance { entrance_id } => {
                if ctx.exclude_entrances.contains(&entrance_id)
                    || ATTRACT_ENTRANCES.contains(&entrance_id)
                {
                    continue;
                }
                q.submit(
                    ReachTask::Entrance {
                        ctx: ctx.clone(),
                        entrance_id,
                    },
                    reach_task_worker,
                );
            }
            OwOutbound::AreaEdge { area: na, edges } => {
                q.submit(
                    ReachTask::OverworldEdge {
                        ctx: ctx.clone(),
                        donor: donor.clone(),
                        area: na,
                        edges,
                        wram: wram.clone(),
                        vram: vram.clone(),
                    },
                    reach_task_worker,
                );
            }
            OwOutbound::AreaWarp { area: na, warps } => {
                q.submit(
                    ReachTask::OverworldWarp {
                        ctx: ctx.clone(),
                        donor: donor.clone(),
                        area: na,
                        warps,
                        wram: wram.clone(),
                        vram: vram.clone(),
                    },
                    reach_task_worker,
                );
            }
        }
    }
}

/// Run main-loop frames until the game settles back on an overworld
/// module with a clear submodule.
fn run_frames_until_overworld<E: Emulator>(
    e: &mut E,
    frame_pc: u32,
    done_pc: u32,
    max_frames: u32,
) -> Result<(), Error> {
    for _ in 0..max_frames {
        e.exec_at(frame_pc, done_pc)?;
        let m = emu::read8(e.wram(), 0x10);
        if (m == 0x09 || m == 0x0B) && emu::read8(e.wram(), 0x11) == 0x00 {
            return Ok(());
        }
    }
    Err(format_err!("overworld transition never settled"))
}

fn get_or_load_area<E: Emulator>(ctx: &Ctx<E>, aid: AreaId, e: &mut E) -> SharedArea {
    ctx.areas.get_or_create_with(aid, || {
        match Area::from_load(aid, e, &ctx.pointers) {
            Ok(a) => a,
            Err(err) => {
                error!("{}: area load failed: {}", aid, err);
                Area::failed(aid)
            }
        }
    })
}

fn area_abs_pixels(aid: AreaId, c: OwCoord) -> (u16, u16) {
    let (bx, by) = aid.abs_tile_top_left();
    let (row, col) = c.row_col();
    ((bx + col) << 3, (by + row) << 3)
}

/// Follow a dungeon exit: drive the underworld-to-overworld transition
/// module until it settles, then seed the area fill below the exit.
fn overworld_exit_task<E: Emulator>(
    q: &ReachQ<E>,
    ctx: Arc<Ctx<E>>,
    donor: Arc<E>,
    abs_x: u16,
    abs_y: u16,
    wram: Arc<Wram>,
    vram: Arc<Vram>,
) -> Result<(), Error> {
    let mut e = donor.fork()?;
    e.wram_mut().copy_from_slice(&wram[..]);
    e.vram_mut().copy_from_slice(&vram[..]);

    {
        let w = e.wram_mut();
        emu::write8(w, 0x10, 0x08);
        emu::write8(w, 0x11, 0x00);
    }
    run_frames_until_overworld(&mut e, ctx.stubs.run_frame_pc, ctx.stubs.done_pc, 256)?;

    let aid = AreaId(emu::read8(e.wram(), 0x8A) & 0x7F);
    let area = get_or_load_area(&ctx, aid, &mut e);
    let out = {
        let mut a = area.lock();
        if !a.is_loaded {
            return Ok(());
        }
        let w = a.wram_after_load.clone();
        let ax = emu::read16(&w[..], 0x070C) << 3;
        let ay = emu::read16(&w[..], 0x0708);
        info!("{}: exit at abs ({:04X},{:04X})", aid, abs_x, abs_y);
        let row = (abs_y.wrapping_sub(ay) >> 3).wrapping_add(6);
        let col = abs_x.wrapping_sub(ax) >> 3;
        reachow::floodfill_area(&mut a, OwCoord::new(row, col), Direction::South, &ctx.screens)
    };

    submit_ow_outbound(q, &ctx, Arc::new(e), &area, out);
    Ok(())
}

/// Follow edge transitions into a neighboring area: poke the destination
/// id and direction, run the transition loader, then fill from each edge.
fn overworld_edge_task<E: Emulator>(
    q: &ReachQ<E>,
    ctx: Arc<Ctx<E>>,
    donor: Arc<E>,
    aid: AreaId,
    edges: Vec<OwEdge>,
    wram: Arc<Wram>,
    vram: Arc<Vram>,
) -> Result<(), Error> {
    if edges.is_empty() {
        return Ok(());
    }
    let mut e = donor.fork()?;
    e.wram_mut().copy_from_slice(&wram[..]);
    e.vram_mut().copy_from_slice(&vram[..]);

    {
        let w = e.wram_mut();
        emu::write8(w, 0x8A, aid.0);
        emu::write8(w, 0x040A, aid.0);
        // direction as a single bit and as the transition enum
        let d = edges[0].dir.to_game();
        emu::write8(w, 0x0410, 1 << (3 - d));
        emu::write8(w, 0x0416, 1 << (3 - d));
        emu::write8(w, 0x0418, d);
        emu::write8(w, 0x069C, d);
    }
    e.exec_at(ctx.stubs.load_ow_transition_pc, ctx.stubs.done_pc)?;
    run_frames_until_overworld(&mut e, ctx.stubs.run_single_frame_pc, ctx.stubs.done_pc, 256)?;

    let area = get_or_load_area(&ctx, aid, &mut e);
    let out = {
        let mut a = area.lock();
        if !a.is_loaded {
            return Ok(());
        }
        let mut all = Vec::new();
        for ed in &edges {
            let seed = a.local_from_abs(ed.abs_x, ed.abs_y);
            all.extend(reachow::floodfill_area(&mut a, seed, ed.dir, &ctx.screens));
        }
        all
    };

    submit_ow_outbound(q, &ctx, Arc::new(e), &area, out);
    Ok(())
}

/// Follow a world-swap warp: move the avatar onto the warp tile and drive
/// the warp submodule until the destination area loads.
fn overworld_warp_task<E: Emulator>(
    q: &ReachQ<E>,
    ctx: Arc<Ctx<E>>,
    donor: Arc<E>,
    aid: AreaId,
    warps: Vec<OwCoord>,
    wram: Arc<Wram>,
    vram: Arc<Vram>,
) -> Result<(), Error> {
    if warps.is_empty() {
        return Ok(());
    }
    let mut e = donor.fork()?;
    e.wram_mut().copy_from_slice(&wram[..]);
    e.vram_mut().copy_from_slice(&vram[..]);

    if emu::read8(e.wram(), 0x10) != 0x09 {
        return Err(format_err!("{}: expected module $09 before warp", aid));
    }
    {
        let w = e.wram_mut();
        // module $09 submodule $23: the mirror warp
        emu::write8(w, 0x11, 0x23);
        let (x, y) = area_abs_pixels(aid, warps[0]);
        emu::write16(w, 0x22, x);
        emu::write16(w, 0x20, y);
    }
    run_frames_until_overworld(&mut e, ctx.stubs.run_single_frame_pc, ctx.stubs.done_pc, 512)?;

    let got = AreaId(emu::read8(e.wram(), 0x8A) & 0x7F);
    if got != aid {
        return Err(format_err!("expected area {} after warp, got {}", aid, got));
    }

    let area = get_or_load_area(&ctx, aid, &mut e);
    let out = {
        let mut a = area.lock();
        if !a.is_loaded {
            return Ok(());
        }
        let mut all = Vec::new();
        for &c in &warps {
            // direction is arbitrary coming out of a warp
            all.extend(reachow::floodfill_area(&mut a, c, Direction::South, &ctx.screens));
        }
        all
    };

    submit_ow_outbound(q, &ctx, Arc::new(e), &area, out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_pixels_of_area_coords() {
        // area $30 sits at tile (0, 0x180); coord (2,3) is 8px per tile in
        let (x, y) = area_abs_pixels(AreaId(0x30), OwCoord::new(2, 3));
        assert_eq!((x, y), (3 << 3, (0x180 + 2) << 3));
    }
}
