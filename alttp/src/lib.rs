pub mod area;
pub mod asm;
pub mod coord;
pub mod door;
pub mod driver;
pub mod emu;
#[cfg(feature = "render")]
pub mod graphics;
pub mod pits;
pub mod reach;
pub mod reachow;
pub mod rom;
pub mod room;
pub mod stubs;
pub mod tags;
pub mod taskqueue;
pub mod tile;

#[cfg(test)]
pub(crate) mod testemu;

use serde::Serialize;
use std::fmt;

/// Number of dungeon entrances in the vanilla entrance table.
pub const ENTRANCE_COUNT: u8 = 0x85;

/// Attract-mode cinematic entrances; never worth following.
pub const ATTRACT_ENTRANCES: std::ops::RangeInclusive<u8> = 0x73..=0x75;

/// One 512x512-pixel dungeon room, the underworld's unit of loading.
/// 9 bits; the high bit selects the second extended-game map.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default, Serialize)]
pub struct Supertile(pub u16);

impl Supertile {
    /// Highest valid supertile id.
    pub const MAX: u16 = 0x127;

    pub fn row_col(self) -> (u16, u16) {
        (self.0 >> 4, self.0 & 0xF)
    }

    /// Geometric neighbor on the 16-wide extended-game grid. `None` when the
    /// step leaves the grid or crosses between the two extended-game maps.
    pub fn move_by(self, d: Direction) -> Option<Supertile> {
        let (row, col) = self.row_col();
        let (nrow, ncol) = match d {
            Direction::North => {
                if row == 0 {
                    return None;
                }
                (row - 1, col)
            }
            Direction::South => (row + 1, col),
            Direction::West => {
                if col == 0 {
                    return None;
                }
                (row, col - 1)
            }
            Direction::East => (row, col + 1),
        };
        if ncol > 0xF {
            return None;
        }
        let st = Supertile((nrow << 4) | ncol);
        if st.0 > Self::MAX || (st.0 & 0x100) != (self.0 & 0x100) {
            return None;
        }
        Some(st)
    }

    /// Absolute top-left pixel of this supertile on its extended-game map.
    pub fn abs_top_left(self) -> (u16, u16) {
        let (row, col) = self.row_col();
        (col << 9, (row & 0xF) << 9)
    }
}

impl fmt::Display for Supertile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "${:03X}", self.0)
    }
}

/// One overworld area. 7 bits; bit 6 selects the dark world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Default, Serialize)]
pub struct AreaId(pub u8);

pub const DARK_WORLD_BIT: u8 = 0x40;

impl AreaId {
    pub fn is_dark(self) -> bool {
        self.0 & DARK_WORLD_BIT != 0
    }

    pub fn to_dark(self) -> AreaId {
        AreaId(self.0 | DARK_WORLD_BIT)
    }

    /// Position on the 8x8 area grid of its world.
    pub fn row_col(self) -> (u16, u16) {
        (((self.0 >> 3) & 7) as u16, (self.0 & 7) as u16)
    }

    /// Absolute top-left of the area in 8x8-tile units.
    pub fn abs_tile_top_left(self) -> (u16, u16) {
        let (row, col) = self.row_col();
        (col * 0x40, row * 0x40)
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OW${:02X}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[repr(u8)]
pub enum Direction {
    West = 0,
    East = 1,
    North = 2,
    South = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::West,
        Direction::East,
        Direction::North,
        Direction::South,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::North => Direction::South,
            Direction::South => Direction::North,
        }
    }

    pub fn rotate_cw(self) -> Direction {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    pub fn rotate_ccw(self) -> Direction {
        self.rotate_cw().opposite()
    }

    /// Bit used by the allow-dir and hookshot masks.
    pub fn mask(self) -> u8 {
        1 << self as u8
    }

    /// The game's own direction encoding (up, down, left, right).
    pub fn to_game(self) -> u8 {
        match self {
            Direction::North => 0,
            Direction::South => 1,
            Direction::West => 2,
            Direction::East => 3,
        }
    }

    pub fn from_game(v: u8) -> Direction {
        match v & 3 {
            0 => Direction::North,
            1 => Direction::South,
            2 => Direction::West,
            _ => Direction::East,
        }
    }

    /// Decode the avatar facing byte ($2F holds 0/2/4/6).
    pub fn from_link_facing(v: u8) -> Direction {
        Direction::from_game(v >> 1)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Direction::West => "west",
            Direction::East => "east",
            Direction::North => "north",
            Direction::South => "south",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supertile_neighbors() {
        assert_eq!(
            Supertile(0x002).move_by(Direction::East),
            Some(Supertile(0x003))
        );
        assert_eq!(Supertile(0x00F).move_by(Direction::East), None);
        assert_eq!(Supertile(0x000).move_by(Direction::North), None);
        assert_eq!(
            Supertile(0x012).move_by(Direction::South),
            Some(Supertile(0x022))
        );
        // crossing between the two extended-game maps is not a neighbor:
        assert_eq!(Supertile(0x0FF).move_by(Direction::South), None);
        assert_eq!(Supertile(0x100).move_by(Direction::North), None);
    }

    #[test]
    fn direction_algebra() {
        for &d in &Direction::ALL {
            assert_eq!(d.opposite().opposite(), d);
            assert_eq!(d.rotate_cw().rotate_ccw(), d);
            assert_eq!(Direction::from_game(d.to_game()), d);
        }
        assert_eq!(Direction::North.rotate_cw(), Direction::East);
        assert_eq!(Direction::North.mask(), 0b0100);
        assert_eq!(Direction::West.mask() | Direction::East.mask(), 0b0011);
    }

    #[test]
    fn area_id_grid() {
        let a = AreaId(0x30);
        assert_eq!(a.row_col(), (6, 0));
        assert!(!a.is_dark());
        assert_eq!(a.to_dark(), AreaId(0x70));
        assert_eq!(AreaId(0x2A).to_dark(), AreaId(0x6A));
    }
}
