//! The overworld flood fill: a simpler LIFO search over an Area's tile
//! types, probing map16 blocks pairwise, discovering underworld entrances
//! and batching edge/warp transitions per destination area.

use crate::area::{ActualScreens, Area};
use crate::coord::OwCoord;
use crate::tile;
use crate::{AreaId, Direction};
use log::{debug, info};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OwEdge {
    pub abs_x: u16,
    pub abs_y: u16,
    pub dir: Direction,
}

/// Outbound work produced by one area flood fill.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwOutbound {
    UnderworldEntrance { entrance_id: u8 },
    AreaEdge { area: AreaId, edges: Vec<OwEdge> },
    AreaWarp { area: AreaId, warps: Vec<OwCoord> },
}

/// Flood-fill one area from a seed state. The caller holds the Area lock.
pub fn floodfill_area(
    a: &mut Area,
    seed_c: OwCoord,
    seed_d: Direction,
    screens: &ActualScreens,
) -> Vec<OwOutbound> {
    let mut out = Vec::new();
    if !a.is_loaded {
        debug!("{}: skipping flood fill of unloaded area", a.id);
        return out;
    }

    let mut area_edges: HashMap<u8, Vec<OwEdge>> = HashMap::new();
    let mut warps: HashMap<u8, Vec<OwCoord>> = HashMap::new();

    let mut lifo: Vec<(OwCoord, Direction)> = Vec::with_capacity(0x1000);
    lifo.push((seed_c, seed_d));

    while let Some((c, d)) = lifo.pop() {
        if a.is_visited(c) {
            continue;
        }
        a.mark_visited(c);

        // probe the partner tile of the 2x2 map16 block alongside the
        // movement axis
        let cn = match d {
            Direction::North | Direction::South => a.traverse(c, Direction::East, 1),
            Direction::West | Direction::East => a.traverse(c, Direction::South, 1),
        }
        .unwrap_or(c);

        let v = a.tiles[c.index()];
        let vn = a.tiles[cn.index()];

        let mut can_traverse = false;
        let mut can_turn = false;

        if v == 0x20 {
            // pit: mark, never traverse
            a.reachable[c.index()] = v;
            a.reachable[cn.index()] = v;
        } else if v == 0x08 {
            // deep water
            can_traverse = true;
            can_turn = true;
        } else if (0x52..=0x57).contains(&v) {
            // rocks; climb requirements are intentionally relaxed here
            can_traverse = true;
            can_turn = true;
        } else if tile::is_always_walkable(v) && tile::is_always_walkable(vn) {
            can_traverse = true;
            can_turn = true;

            if let Some(ei) = a.entrance_at(c) {
                if !a.entrances[ei].used {
                    a.entrances[ei].used = true;
                    let entrance_id = a.entrances[ei].entrance_id;
                    info!("{}: underworld entrance {:02X} at {}", a.id, entrance_id, c);
                    out.push(OwOutbound::UnderworldEntrance { entrance_id });
                }
            }
        }

        // world-swap warp tiles are only legal from the light world
        if a.map16_at(c) == 0x0212 && !a.id.is_dark() {
            let na = a.id.to_dark();
            warps.entry(na.0).or_insert_with(Vec::new).push(c);
        }

        if !can_traverse {
            continue;
        }
        a.reachable[c.index()] = v;
        a.reachable[cn.index()] = v;

        // transition to the neighboring area at the edges
        if let Some((abs_x, abs_y, na)) = a.neighbor_edge(c, d) {
            let na = screens.correct(na);
            debug!("{}: edge {} {} exit toward {}", a.id, c, d, na);
            area_edges
                .entry(na.0)
                .or_insert_with(Vec::new)
                .push(OwEdge { abs_x, abs_y, dir: d });
            continue;
        }

        if can_turn {
            for dd in [d.rotate_ccw(), d.rotate_cw()] {
                if let Some(cn2) = a.traverse(c, dd, 1) {
                    lifo.push((cn2, dd));
                }
            }
        }
        if let Some(cn2) = a.traverse(c, d, 1) {
            lifo.push((cn2, d));
        }
    }

    // one task per destination area, batching all its edges/warps
    for (na, edges) in area_edges {
        out.push(OwOutbound::AreaEdge {
            area: AreaId(na),
            edges,
        });
    }
    for (na, warps) in warps {
        out.push(OwOutbound::AreaWarp {
            area: AreaId(na),
            warps,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::AreaEntrance;

    fn open(mut a: Area, cells: &[(u16, u16)]) -> Area {
        for &(row, col) in cells {
            a.tiles[OwCoord::new(row, col).index()] = 0x00;
        }
        a
    }

    #[test]
    fn south_edge_crossing() {
        // a walkable 2-wide column reaching the south edge of area $30
        let mut a = Area::with_size(AreaId(0x30), 0x40, 0x40);
        for row in 0x38..=0x3Fu16 {
            a.tiles[OwCoord::new(row, 0x10).index()] = 0x00;
            a.tiles[OwCoord::new(row, 0x11).index()] = 0x00;
        }
        let out = floodfill_area(
            &mut a,
            OwCoord::new(0x38, 0x10),
            Direction::South,
            &ActualScreens::identity(),
        );

        let edges: Vec<_> = out
            .iter()
            .filter_map(|o| match o {
                OwOutbound::AreaEdge { area, edges } => Some((*area, edges.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(edges.len(), 1);
        let (area, edges) = &edges[0];
        assert_eq!(*area, AreaId(0x38));
        assert!(edges
            .iter()
            .any(|e| e.abs_x == 0x10 && e.abs_y == 0x1C1 && e.dir == Direction::South));
        // the landing normalizes to the neighbor's gutter row
        let n = Area::with_size(AreaId(0x38), 0x40, 0x40);
        assert_eq!(n.local_from_abs(0x10, 0x1C1), OwCoord::new(0x01, 0x10));
    }

    #[test]
    fn world_swap_warp_from_light_world() {
        let c = OwCoord::new(0x14, 0x20);
        let mut a = open(
            Area::with_size(AreaId(0x2A), 0x40, 0x40),
            &[(0x14, 0x20), (0x14, 0x21), (0x15, 0x20)],
        );
        a.map16[((0x14 >> 1) * 0x40 + (0x20 >> 1)) as usize] = 0x0212;
        let out = floodfill_area(&mut a, c, Direction::South, &ActualScreens::identity());
        let warp = out
            .iter()
            .find_map(|o| match o {
                OwOutbound::AreaWarp { area, warps } => Some((*area, warps.clone())),
                _ => None,
            })
            .expect("a world-swap warp task");
        assert_eq!(warp.0, AreaId(0x6A));
        assert!(warp.1.contains(&c));
    }

    #[test]
    fn no_world_swap_from_dark_world() {
        let c = OwCoord::new(0x14, 0x20);
        let mut a = open(
            Area::with_size(AreaId(0x6A), 0x40, 0x40),
            &[(0x14, 0x20), (0x14, 0x21), (0x15, 0x20)],
        );
        a.map16[((0x14 >> 1) * 0x40 + (0x20 >> 1)) as usize] = 0x0212;
        let out = floodfill_area(&mut a, c, Direction::South, &ActualScreens::identity());
        assert!(out
            .iter()
            .all(|o| !matches!(o, OwOutbound::AreaWarp { .. })));
    }

    #[test]
    fn entrances_fire_once() {
        let c = OwCoord::new(0x20, 0x20);
        // the whole 2x2 footprint plus a rim is walkable, so several cells
        // qualify; the used flag still dedupes to one task
        let mut a = open(
            Area::with_size(AreaId(0x30), 0x40, 0x40),
            &[
                (0x20, 0x20),
                (0x20, 0x21),
                (0x20, 0x22),
                (0x21, 0x20),
                (0x21, 0x21),
                (0x21, 0x22),
                (0x22, 0x20),
                (0x22, 0x21),
                (0x22, 0x22),
            ],
        );
        a.insert_test_entrance(
            AreaEntrance {
                pos: c,
                entrance_id: 0x08,
                is_pit: false,
                used: false,
            },
            2,
        );

        let out = floodfill_area(&mut a, c, Direction::South, &ActualScreens::identity());
        let fired = out
            .iter()
            .filter(|o| matches!(o, OwOutbound::UnderworldEntrance { entrance_id: 0x08 }))
            .count();
        assert_eq!(fired, 1);
        assert!(a.entrances[0].used);
    }

    #[test]
    fn pits_mark_without_traversal() {
        let c = OwCoord::new(0x10, 0x10);
        let mut a = Area::with_size(AreaId(0x30), 0x40, 0x40);
        a.tiles[c.index()] = 0x20;
        let out = floodfill_area(&mut a, c, Direction::East, &ActualScreens::identity());
        assert!(out.is_empty());
        assert_eq!(a.reachable[c.index()], 0x20);
        // nothing spread beyond the pit
        assert_eq!(a.reachable[OwCoord::new(0x10, 0x12).index()], 0x01);
    }
}
