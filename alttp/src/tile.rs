//! Pure classification of underworld/overworld tile-type bytes.

use crate::Direction;

pub const DIR_MASK_EW: u8 = 0b0011;
pub const DIR_MASK_NS: u8 = 0b1100;
pub const DIR_MASK_ALL: u8 = 0b1111;

/// Tiles the avatar can always stand on.
pub fn is_always_walkable(v: u8) -> bool {
    match v {
        0x00 => true,        // open floor
        0x09 => true,        // shallow water
        0x0D..=0x0F => true, // spike floor, ice floors
        0x22 => true,        // manual stairs
        0x23 | 0x24 | 0x25 => true, // floor switches
        0x3A | 0x3B => true, // star tiles
        0x40 => true,        // thick grass
        0x4B => true,        // warp tile
        0x4C => true,        // dungeon swap door
        0x60 => true,        // rupee floor
        0x68..=0x6B => true, // conveyors
        _ => false,
    }
}

/// Tiles that are walkable until the game removes them: bombable floor,
/// crystal pegs, and the manipulable pot/peg/block family.
pub fn is_maybe_walkable(v: u8) -> bool {
    match v {
        0x62 => true,        // bombable floor
        0x66 | 0x67 => true, // crystal pegs
        _ => v & 0xF0 == 0x70,
    }
}

/// Tiles a hookshot chain may pass over.
pub fn can_hook_through(v: u8) -> bool {
    match v {
        0x08 | 0x09 => true, // water
        0x0C => true,        // moving floor
        0x0D => true,        // spikes
        0x1C => true,        // layer passthrough
        0x1D | 0x3D => true, // auto stairs
        0x1E | 0x1F | 0x3E | 0x3F => true, // layer-toggle stairs
        0x20 => true,        // pit
        0x23 | 0x24 | 0x25 => true, // switches
        0x28..=0x2B => true, // ledges
        0x3A | 0x3B => true, // star tiles
        0x40 => true,        // thick grass
        0x68..=0x6B => true, // conveyors
        0xB0 => true,        // somaria track start
        _ => false,
    }
}

/// Tiles a hookshot chain can anchor on.
pub fn is_hookable(v: u8) -> bool {
    match v {
        0x26 | 0x27 => true, // bonkable anchors
        0x58..=0x5D => true, // chests
        _ => v & 0xF0 == 0x70, // pots, pegs, blocks
    }
}

/// Everything outside the walkable/maybe-walkable/door classes, with
/// explicit exceptions for entrance doors, spiral staircases and the
/// moving-floor pair.
pub fn is_collision(v: u8) -> bool {
    match v {
        0x8E | 0x8F => false, // entrance doors
        0x5E | 0x5F => false, // spiral staircases
        0x0C | 0x1C => false, // moving floor, layer passthrough
        _ => {
            !(is_always_walkable(v)
                || is_maybe_walkable(v)
                || v & 0xF0 == 0x80
                || v & 0xF0 == 0xF0)
        }
    }
}

/// 4-bit allowable-direction mask derived from the tile value alone.
/// Doorway tiles pin movement to the doorway's orientation; somaria track
/// pieces pin it to the track geometry; collision yields no movement at all.
pub fn tile_allow_dir(v: u8) -> u8 {
    match v {
        0x80..=0x8D => {
            if v & 1 == 0 {
                DIR_MASK_NS
            } else {
                DIR_MASK_EW
            }
        }
        0xB0 => DIR_MASK_EW, // straight track, east-west
        0xB1 => DIR_MASK_NS, // straight track, north-south
        0xB2 => Direction::South.mask() | Direction::East.mask(),
        0xB3 => Direction::South.mask() | Direction::West.mask(),
        0xB4 => Direction::North.mask() | Direction::East.mask(),
        0xB5 => Direction::North.mask() | Direction::West.mask(),
        0xB6..=0xBE => DIR_MASK_ALL, // ends, junctions, cross-over, pipe exit
        _ => {
            if is_collision(v) {
                0
            } else {
                DIR_MASK_ALL
            }
        }
    }
}

/// The two arms of a 90-degree somaria/pipe corner, or `None` for
/// non-corner pieces.
pub fn corner_arms(v: u8) -> Option<(Direction, Direction)> {
    match v {
        0xB2 => Some((Direction::South, Direction::East)),
        0xB3 => Some((Direction::South, Direction::West)),
        0xB4 => Some((Direction::North, Direction::East)),
        0xB5 => Some((Direction::North, Direction::West)),
        _ => None,
    }
}

/// Ledge tiles carry the axis the jump happens along.
pub fn ledge_axis(v: u8) -> Option<u8> {
    match v {
        0x28 | 0x29 => Some(DIR_MASK_NS),
        0x2A | 0x2B => Some(DIR_MASK_EW),
        _ => None,
    }
}

/// Tiles the avatar can bonk off of with the pegasus boots.
pub fn is_bonkable(v: u8) -> bool {
    v == 0x27 || v == 0x66 || v == 0x67 || v & 0xF0 == 0x70
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walkable_classes() {
        assert!(is_always_walkable(0x00));
        assert!(is_always_walkable(0x3A));
        assert!(!is_always_walkable(0x20));
        assert!(!is_always_walkable(0x01));
        assert!(is_maybe_walkable(0x62));
        assert!(is_maybe_walkable(0x70));
        assert!(is_maybe_walkable(0x7F));
        assert!(!is_maybe_walkable(0x00));
    }

    #[test]
    fn collision_exceptions() {
        assert!(is_collision(0x01));
        assert!(is_collision(0x02));
        assert!(is_collision(0x20)); // pits block walking
        assert!(!is_collision(0x8E));
        assert!(!is_collision(0x8F));
        assert!(!is_collision(0x5E));
        assert!(!is_collision(0x5F));
        assert!(!is_collision(0x0C));
        assert!(!is_collision(0x1C));
        assert!(!is_collision(0x00));
        assert!(!is_collision(0xF4)); // matched-pair doorway family
    }

    #[test]
    fn hookshot_classes() {
        assert!(can_hook_through(0x20));
        assert!(can_hook_through(0x0C));
        assert!(!can_hook_through(0x01));
        assert!(is_hookable(0x27));
        assert!(is_hookable(0x74));
        assert!(!is_hookable(0x00));
    }

    #[test]
    fn allow_dir_derivation() {
        assert_eq!(tile_allow_dir(0x00), DIR_MASK_ALL);
        assert_eq!(tile_allow_dir(0x01), 0);
        assert_eq!(tile_allow_dir(0x80), DIR_MASK_NS);
        assert_eq!(tile_allow_dir(0x81), DIR_MASK_EW);
        assert_eq!(tile_allow_dir(0xB0), DIR_MASK_EW);
        assert_eq!(
            tile_allow_dir(0xB2),
            Direction::South.mask() | Direction::East.mask()
        );
        assert_eq!(tile_allow_dir(0xBD), DIR_MASK_ALL);
    }

    #[test]
    fn corner_geometry() {
        let (a, b) = corner_arms(0xB2).unwrap();
        assert_eq!((a, b), (Direction::South, Direction::East));
        assert!(corner_arms(0xB0).is_none());
    }
}
