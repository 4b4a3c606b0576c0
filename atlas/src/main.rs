use failure::{format_err, Error};
use log::{info, warn};
use parse_int::parse;
use regex::Regex;
use serde::Serialize;
use serde_hex::{SerHex, StrictPfx};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use structopt::StructOpt;

use alttp::area::AreaCache;
use alttp::driver::{self, Ctx, ReachTask};
use alttp::emu::{Emulator, Vram, Wram, HWIO_DYN_LEN};
use alttp::pits::PitTables;
use alttp::reach;
use alttp::rom::{self, RomImage, RomPointers};
use alttp::room::RoomCache;
use alttp::taskqueue::Q;

mod graph;
mod render;

#[derive(StructOpt, Debug)]
#[structopt(name = "atlas")]
struct Opt {
    /// ROM image to analyze
    #[structopt(long, parse(from_os_str), default_value = "alttp-jp.sfc")]
    rom: PathBuf,

    /// single entrance ID (hex)
    #[structopt(long = "ent")]
    entrance: Option<String>,

    /// entrance ID range minimum (hex)
    #[structopt(long = "entmin", default_value = "0x00")]
    entrance_min: String,

    /// entrance ID range maximum (hex)
    #[structopt(long = "entmax", default_value = "0x84")]
    entrance_max: String,

    /// bad entrance IDs to exclude (hex, comma-delimited)
    #[structopt(long = "entsbad")]
    entrances_bad: Option<String>,

    /// room numbers (hex, comma delimited, ranges with x..y permitted)
    #[structopt(long = "rooms")]
    rooms: Option<String>,

    /// number of parallel workers (0 = CPU count)
    #[structopt(short = "n", long = "workers", default_value = "0")]
    workers: usize,

    /// draw reachability overlays on rendered maps
    #[structopt(long)]
    overlay: bool,

    /// dump the entrance-supertile map as JSON
    #[structopt(long)]
    entrancemap: bool,

    /// create eg1.png
    #[structopt(long)]
    eg1: bool,

    /// create eg2.png
    #[structopt(long)]
    eg2: bool,

    /// create individual room PNGs
    #[structopt(long)]
    roompngs: bool,

    /// use the bsnes gamma ramp
    #[structopt(long)]
    gamma: bool,

    /// emit rooms.dot with the supertile connectivity graph
    #[structopt(long)]
    dotgraph: bool,

    /// report rooms where an enemy can reach a pit
    #[structopt(long)]
    enemypits: bool,
}

/// Placeholder device. The 65C816 interpreter is an external collaborator
/// wired in through `alttp::emu::Emulator`; this build does not bundle one,
/// so the type is uninhabited and `boot_system` reports the gap.
enum NoCore {}

impl Emulator for NoCore {
    fn fork(&self) -> Result<Self, Error> {
        match *self {}
    }
    fn exec_at(&mut self, _: u32, _: u32) -> Result<(), Error> {
        match *self {}
    }
    fn exec_at_until(&mut self, _: u32, _: u32, _: u64) -> Result<(), Error> {
        match *self {}
    }
    fn read8(&mut self, _: u32) -> u8 {
        match *self {}
    }
    fn read16(&mut self, _: u32) -> u16 {
        match *self {}
    }
    fn write8(&mut self, _: u32, _: u8) {
        match *self {}
    }
    fn write16(&mut self, _: u32, _: u16) {
        match *self {}
    }
    fn wram(&self) -> &Wram {
        match *self {}
    }
    fn wram_mut(&mut self) -> &mut Wram {
        match *self {}
    }
    fn vram(&self) -> &Vram {
        match *self {}
    }
    fn vram_mut(&mut self) -> &mut Vram {
        match *self {}
    }
    fn hwio_dyn_mut(&mut self) -> &mut [u8; HWIO_DYN_LEN] {
        match *self {}
    }
}

fn boot_system(_rom: &RomImage) -> Result<NoCore, Error> {
    Err(format_err!(
        "no 65c816 core is linked into this build; provide one through alttp::emu::Emulator"
    ))
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut buffer = Vec::new();
    File::open(&opt.rom)?.read_to_end(&mut buffer)?;
    let mut rom = RomImage::new(buffer)?;

    let mut pointers = rom::pointers_for(rom.region);
    rom::extract_pointers(&rom, &mut pointers);
    rom.apply_engine_patches(&pointers);
    let pits = PitTables::load(&rom);

    let range = entrance_range(&opt)?;
    let exclude = parse_entrance_exclusions(opt.entrances_bad.as_deref())?;
    let rooms_filter = parse_room_list(opt.rooms.as_deref())?;

    let workers = if opt.workers == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    } else {
        opt.workers
    };

    let out_dir = data_dir(&opt.rom);
    std::fs::create_dir_all(&out_dir)?;
    info!("writing into {}", out_dir.display());

    let sys = boot_system(&rom)?;
    run(
        &opt,
        rom,
        pointers,
        pits,
        exclude,
        rooms_filter,
        range,
        workers,
        out_dir,
        sys,
    )
}

fn run<E: Emulator>(
    opt: &Opt,
    rom: RomImage,
    pointers: RomPointers,
    pits: PitTables,
    exclude_entrances: HashSet<u8>,
    rooms_filter: Option<HashSet<u16>>,
    range: (u8, u8),
    workers: usize,
    out_dir: PathBuf,
    mut initial: E,
) -> Result<(), Error> {
    let fastrom = rom.fastrom_bank();
    let (stubs, screens) = driver::init_system(&mut initial, &pointers, fastrom)?;

    let ctx = Arc::new(Ctx {
        rooms: RoomCache::new(),
        areas: AreaCache::new(),
        initial,
        stubs,
        pointers,
        pits,
        screens,
        exclude_entrances,
    });

    let q: Q<ReachTask<E>> = Q::new(workers, 0x2000);
    driver::submit_entrances(&q, &ctx, range.0, range.1);
    info!("wait");
    q.wait();
    info!("close");
    q.close();
    info!(
        "done: {} rooms, {} areas",
        ctx.rooms.len(),
        ctx.areas.len()
    );

    write_outputs(opt, &ctx, &rooms_filter, &out_dir)
}

fn write_outputs<E: Emulator>(
    opt: &Opt,
    ctx: &Ctx<E>,
    rooms_filter: &Option<HashSet<u16>>,
    out_dir: &Path,
) -> Result<(), Error> {
    let rooms = ctx.rooms.all();
    let areas = ctx.areas.all();

    for area in &areas {
        let a = area.lock();
        if !a.is_loaded {
            continue;
        }
        let img = render::area_image(&a, opt.overlay, opt.gamma);
        img.save(out_dir.join(format!("ow{:02X}.png", a.id.0)))?;
    }
    render::save_ow_atlases(&areas, opt.overlay, opt.gamma, out_dir)?;

    if opt.roompngs {
        for room in &rooms {
            let r = room.lock();
            if !r.is_loaded {
                continue;
            }
            let img = render::room_image(&r, opt.overlay, opt.gamma);
            img.save(out_dir.join(format!("{:03X}.png", r.supertile.0)))?;
        }
    }
    if opt.eg1 {
        render::eg_atlas(&rooms, 0x00, 0x10, opt.overlay, opt.gamma)
            .save(out_dir.join("eg1.png"))?;
    }
    if opt.eg2 {
        render::eg_atlas(&rooms, 0x10, 0x03, opt.overlay, opt.gamma)
            .save(out_dir.join("eg2.png"))?;
    }

    if opt.dotgraph {
        graph::write_rooms_dot(&rooms, &out_dir.join("rooms.dot"))?;
    }

    if opt.entrancemap {
        write_entrance_map(&rooms, &out_dir.join("entrances.json"))?;
    }

    if opt.enemypits {
        let mut with_pits = Vec::new();
        for room in &rooms {
            let r = room.lock();
            if let Some(filter) = rooms_filter {
                if !filter.contains(&r.supertile.0) {
                    continue;
                }
            }
            if r.is_loaded && reach::enemy_reachable_pits(&r) {
                with_pits.push(r.supertile);
            }
        }
        with_pits.sort();
        let list: Vec<String> = with_pits.iter().map(|st| st.to_string()).collect();
        info!("rooms with enemy-reachable pits: {}", list.join(","));
    }

    Ok(())
}

#[derive(Serialize)]
struct RoomRef(#[serde(with = "SerHex::<StrictPfx>")] u16);

#[derive(Serialize)]
struct EntranceRooms {
    #[serde(with = "SerHex::<StrictPfx>")]
    entrance: u8,
    rooms: Vec<RoomRef>,
}

fn write_entrance_map(
    rooms: &[alttp::room::SharedRoom],
    path: &Path,
) -> Result<(), Error> {
    let mut by_entrance: HashMap<u8, Vec<u16>> = HashMap::new();
    for room in rooms {
        let r = room.lock();
        by_entrance
            .entry(r.entrance_id)
            .or_insert_with(Vec::new)
            .push(r.supertile.0);
    }

    let mut entries: Vec<EntranceRooms> = by_entrance
        .into_iter()
        .map(|(entrance, mut sts)| {
            sts.sort();
            EntranceRooms {
                entrance,
                rooms: sts.into_iter().map(RoomRef).collect(),
            }
        })
        .collect();
    entries.sort_by_key(|e| e.entrance);

    let f = File::create(path)?;
    serde_json::to_writer_pretty(f, &entries)?;
    Ok(())
}

/// Output directory derived from the ROM filename, `alttp-jp.sfc` becoming
/// `alttp-jp-data/` next to it.
fn data_dir(rom: &Path) -> PathBuf {
    let stem = rom
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rom".to_string());
    rom.with_file_name(format!("{}-data", stem))
}

fn entrance_range(opt: &Opt) -> Result<(u8, u8), Error> {
    if let Some(ent) = &opt.entrance {
        let id: u8 = parse(ent).map_err(|e| format_err!("bad --ent value: {}", e))?;
        return Ok((id, id));
    }
    let mut min: u8 =
        parse(&opt.entrance_min).map_err(|e| format_err!("bad --entmin value: {}", e))?;
    let mut max: u8 =
        parse(&opt.entrance_max).map_err(|e| format_err!("bad --entmax value: {}", e))?;
    if max < min {
        std::mem::swap(&mut min, &mut max);
    }
    let top = alttp::ENTRANCE_COUNT - 1;
    Ok((min.min(top), max.min(top)))
}

fn parse_entrance_exclusions(s: Option<&str>) -> Result<HashSet<u8>, Error> {
    let mut set = HashSet::new();
    if let Some(s) = s {
        for part in s.split(',').filter(|p| !p.is_empty()) {
            let id = u8::from_str_radix(part.trim(), 16)
                .map_err(|e| format_err!("bad --entsbad entry `{}`: {}", part, e))?;
            set.insert(id);
        }
        if !set.is_empty() {
            warn!("excluding {} entrance ids", set.len());
        }
    }
    Ok(set)
}

/// Parse `12,40..43,100` style room lists.
fn parse_room_list(s: Option<&str>) -> Result<Option<HashSet<u16>>, Error> {
    let s = match s {
        Some(s) => s,
        None => return Ok(None),
    };
    let range_re = Regex::new(r"^([0-9a-fA-F]+)\.\.([0-9a-fA-F]+)$").unwrap();
    let mut set = HashSet::new();
    for part in s.split(',').filter(|p| !p.is_empty()) {
        let part = part.trim();
        if let Some(caps) = range_re.captures(part) {
            let lo = u16::from_str_radix(&caps[1], 16)?;
            let hi = u16::from_str_radix(&caps[2], 16)?;
            for st in lo..=hi.max(lo) {
                set.insert(st);
            }
        } else {
            set.insert(u16::from_str_radix(part, 16)?);
        }
    }
    Ok(Some(set))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_list_ranges() {
        let set = parse_room_list(Some("12,40..43,100")).unwrap().unwrap();
        assert!(set.contains(&0x12));
        assert!(set.contains(&0x40));
        assert!(set.contains(&0x43));
        assert!(set.contains(&0x100));
        assert!(!set.contains(&0x44));
        assert_eq!(set.len(), 6);
        assert!(parse_room_list(None).unwrap().is_none());
        assert!(parse_room_list(Some("zz")).is_err());
    }

    #[test]
    fn exclusion_lists() {
        let set = parse_entrance_exclusions(Some("08,2a")).unwrap();
        assert!(set.contains(&0x08));
        assert!(set.contains(&0x2A));
        assert!(parse_entrance_exclusions(None).unwrap().is_empty());
    }

    #[test]
    fn data_dir_naming() {
        assert_eq!(
            data_dir(Path::new("/tmp/alttp-jp.sfc")),
            PathBuf::from("/tmp/alttp-jp-data")
        );
    }
}
