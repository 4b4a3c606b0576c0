use crate::coord::MapCoord;
use crate::Direction;
use serde::Serialize;
use std::fmt;

/// Raw door type byte as the game stores it at $1980.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize)]
pub struct DoorKind(pub u8);

impl DoorKind {
    /// Doorways that connect to the geometric neighbor supertile across a
    /// room edge. Dungeon exits and stairwell doors do not.
    pub fn is_edge_doorway_to_neighbor(self) -> bool {
        match self.0 {
            // dungeon exits:
            0x04 | 0x06 | 0x0A | 0x0C | 0x0E | 0x10 | 0x12 | 0x2A => false,
            // doors to stairs:
            0x20..=0x27 => false,
            _ => true,
        }
    }

    /// Doors that leave the underworld entirely.
    pub fn is_overworld_exit(self) -> bool {
        match self.0 {
            0x04..=0x06 => true, // exit door
            0x0A..=0x12 => true, // fancy dungeon exits, cave exits, exit marker
            0x2A => true,        // bombable cave exit
            _ => false,
        }
    }

    /// Doors drawn on (and traversed on) the lower layer.
    pub fn is_layer2(self) -> bool {
        match self.0 {
            0x02 | 0x04 | 0x06 | 0x0C | 0x10 => true,
            0x24 | 0x26 => true,
            0x3A | 0x3C | 0x3E | 0x40 | 0x44 => true,
            0x48..=0x66 => true,
            _ => false,
        }
    }

    pub fn is_stairwell(self) -> bool {
        self.0 >= 0x20 && self.0 <= 0x26
    }

    /// Explicit room door: the edge target comes from the stair-exit table
    /// instead of the geometric neighbor.
    pub fn is_explicit_room_door(self) -> bool {
        self.0 == 0x46
    }

    pub fn is_exploding_wall(self) -> bool {
        self.0 == 0x30
    }

    /// Layer swap marker doors flip the layer of anything walking across
    /// their footprint.
    pub fn is_layer_swap(self) -> bool {
        self.0 == 0x16
    }

    /// Entry-only doorways: the engine may come in through them but never
    /// walk out (exits happen through the explicit exit contract).
    pub fn is_entry_only(self) -> bool {
        self.0 == 0x2A
    }
}

impl fmt::Display for DoorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "${:02x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct Door {
    pub kind: DoorKind,  // $1980
    pub pos: MapCoord,   // $19A0
    pub dir: Direction,  // $19C0
    pub is_exit: bool,   // found via the exit list at $19E2
}

impl Door {
    /// A door's footprint is 4x4 tiles from its top-left position.
    pub fn contains(&self, c: MapCoord) -> bool {
        let (dl, dr, dc) = self.pos.row_col();
        let (tl, tr, tc) = c.row_col();
        tl == dl && tr >= dr && tr < dr + 4 && tc >= dc && tc < dc + 4
    }

    /// Whether the door's footprint sits against the room edge on the side
    /// it opens toward.
    pub fn is_edge(&self) -> bool {
        let (_, row, col) = self.pos.row_col();
        match self.dir {
            Direction::North => row < 4,
            Direction::South => row >= 0x3C,
            Direction::West => col < 4,
            Direction::East => col >= 0x3C,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_predicates() {
        assert!(DoorKind(0x00).is_edge_doorway_to_neighbor());
        assert!(!DoorKind(0x0E).is_edge_doorway_to_neighbor());
        assert!(!DoorKind(0x22).is_edge_doorway_to_neighbor());
        assert!(DoorKind(0x0A).is_overworld_exit());
        assert!(DoorKind(0x2A).is_overworld_exit());
        assert!(!DoorKind(0x00).is_overworld_exit());
        assert!(DoorKind(0x44).is_layer2());
        assert!(!DoorKind(0x00).is_layer2());
        assert!(DoorKind(0x22).is_stairwell());
        assert!(DoorKind(0x30).is_exploding_wall());
    }

    #[test]
    fn footprint() {
        let d = Door {
            kind: DoorKind(0x00),
            pos: MapCoord::new(0, 0x10, 0x20),
            dir: Direction::North,
            is_exit: false,
        };
        assert!(d.contains(MapCoord::new(0, 0x10, 0x20)));
        assert!(d.contains(MapCoord::new(0, 0x13, 0x23)));
        assert!(!d.contains(MapCoord::new(0, 0x14, 0x20)));
        assert!(!d.contains(MapCoord::new(1, 0x10, 0x20)));
    }

    #[test]
    fn edge_doors() {
        let d = Door {
            kind: DoorKind(0x00),
            pos: MapCoord::new(0, 0, 0x1E),
            dir: Direction::North,
            is_exit: false,
        };
        assert!(d.is_edge());
        let d = Door {
            pos: MapCoord::new(0, 0x20, 0x1E),
            ..d
        };
        assert!(!d.is_edge());
    }
}
