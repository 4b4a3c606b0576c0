//! Pit-related exclusion tables.

use crate::rom::RomImage;
use crate::Supertile;
use std::collections::HashSet;

/// Supertiles where falling into a pit deals damage and warps to a fixed
/// heart-loss room instead of a reachability edge, plus the handful of rooms
/// whose warp pits are decorative and never reachable in play.
#[derive(Clone, Debug, Default)]
pub struct PitTables {
    damage: HashSet<u16>,
    unreachable_warp: HashSet<u16>,
}

impl PitTables {
    pub fn empty() -> PitTables {
        PitTables::default()
    }

    /// Read RoomsWithPitDamage ($00:990C..$00:997C) straight off the ROM.
    pub fn load(rom: &RomImage) -> PitTables {
        let mut t = PitTables::default();
        let mut addr = 0x00_990C;
        while addr <= 0x00_997C {
            t.damage.insert(rom.read16(addr) & 0x1FF);
            addr += 2;
        }
        t.unreachable_warp
            .extend([0x010u16, 0x014, 0x045, 0x061, 0x065, 0x089].iter().copied());
        t
    }

    pub fn has_pit_damage(&self, st: Supertile) -> bool {
        self.damage.contains(&st.0)
    }

    pub fn warp_pit_unreachable(&self, st: Supertile) -> bool {
        self.unreachable_warp.contains(&st.0)
    }

    #[cfg(test)]
    pub fn with_damage(sts: &[u16]) -> PitTables {
        let mut t = PitTables::default();
        t.damage.extend(sts.iter().copied());
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::lorom_file_offset;
    use crate::rom::RomImage;

    #[test]
    fn loads_damage_table() {
        let mut data = vec![0u8; 0x10_0000];
        data[0x7FD5] = 0x20;
        let off = lorom_file_offset(0x00_990C);
        data[off] = 0x4D; // supertile $04D
        data[off + 1] = 0x00;
        let rom = RomImage::new(data).unwrap();
        let t = PitTables::load(&rom);
        assert!(t.has_pit_damage(Supertile(0x04D)));
        assert!(!t.has_pit_damage(Supertile(0x04C)));
        assert!(t.warp_pit_unreachable(Supertile(0x014)));
    }
}
