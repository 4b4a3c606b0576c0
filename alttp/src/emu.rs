//! Narrow contract the reachability engine needs from a CPU emulator, plus
//! byte-grained accessors for the working memories.
//!
//! The 65C816 core itself is an external collaborator: the engine only ever
//! drives it through this trait, forking a fresh system per task and running
//! patched ROM routines between two program-counter sentinels.

use byteorder::{ByteOrder, LittleEndian};
use failure::Error;

pub const WRAM_LEN: usize = 0x2_0000;
pub const VRAM_LEN: usize = 0x1_0000;
pub const HWIO_DYN_LEN: usize = 0x1000;

/// Base bus address of the 4 KiB patch shadow the stubs are assembled into.
pub const HWIO_DYN_BASE: u32 = 0x00_5000;

pub type Wram = [u8; WRAM_LEN];
pub type Vram = [u8; VRAM_LEN];

pub trait Emulator: Sized + Send + Sync + 'static {
    /// Cheap clone of the CPU register file, bus mapping and ROM pointers.
    /// WRAM and VRAM are fresh copies owned by the new system.
    fn fork(&self) -> Result<Self, Error>;

    /// Run until the program counter hits `stop_pc` (an `STP` sentinel).
    fn exec_at(&mut self, entry_pc: u32, stop_pc: u32) -> Result<(), Error>;

    /// Same, but bounded by a cycle budget to catch runaway ROM state.
    fn exec_at_until(&mut self, entry_pc: u32, stop_pc: u32, max_cycles: u64) -> Result<(), Error>;

    /// Bus accesses honoring the ROM's bank mapping.
    fn read8(&mut self, addr: u32) -> u8;
    fn read16(&mut self, addr: u32) -> u16;
    fn write8(&mut self, addr: u32, value: u8);
    fn write16(&mut self, addr: u32, value: u16);

    fn wram(&self) -> &Wram;
    fn wram_mut(&mut self) -> &mut Wram;
    fn vram(&self) -> &Vram;
    fn vram_mut(&mut self) -> &mut Vram;

    /// The writable shadow the engine assembles its stub routines into.
    fn hwio_dyn_mut(&mut self) -> &mut [u8; HWIO_DYN_LEN];
}

/// Named WRAM locations the engine reads and writes. Everything else is
/// poked inline where the game's own semantics make the address obvious.
pub mod wram {
    /// Start of the two stacked 64x64 tile-type layers.
    pub const TILES: usize = 0x1_2000;
    pub const TILES_LEN: usize = 0x2000;

    /// Door tables refreshed by the room loader.
    pub const DOOR_KINDS: u32 = 0x1980;
    pub const DOOR_POS: u32 = 0x19A0;
    pub const DOOR_DIRS: u32 = 0x19C0;
    pub const DOOR_EXITS: u32 = 0x19E2;

    /// Up to six (tile, key-index) pairs; bit 15 marks a locked cell door.
    pub const LOCKED_CELLS: u32 = 0x06E0;

    /// Hole-warp destination room and the four staircase destination rooms.
    pub const WARP_EXIT_ROOM: u32 = 0xC000;
    pub const STAIR_EXIT_ROOMS: u32 = 0xC001;

    /// Per-slot staircase target plane bits, packed below the header copy.
    pub const STAIR_TARGET_PLANES: u32 = 0x0601;
    pub const WARP_EXIT_PLANE: u32 = 0x0600;

    /// Manipulable block property table.
    pub const BLOCK_PROPS: u32 = 0x0500;

    /// Room tag slots; nonzero means a tag routine is armed.
    pub const TAGS: u32 = 0x00AE;
}

/// Read helpers over raw byte buffers (WRAM, ROM slices). The engine never
/// reinterprets a byte buffer as a wider-typed slice; all multi-byte access
/// goes through these, little-endian.
pub fn read8(b: &[u8], addr: u32) -> u8 {
    b[addr as usize]
}

pub fn read16(b: &[u8], addr: u32) -> u16 {
    LittleEndian::read_u16(&b[addr as usize..addr as usize + 2])
}

pub fn write8(b: &mut [u8], addr: u32, value: u8) {
    b[addr as usize] = value;
}

pub fn write16(b: &mut [u8], addr: u32, value: u16) {
    LittleEndian::write_u16(&mut b[addr as usize..addr as usize + 2], value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_round_trip() {
        let mut b = [0u8; 8];
        write16(&mut b, 2, 0xA680);
        assert_eq!(b[2], 0x80);
        assert_eq!(b[3], 0xA6);
        assert_eq!(read16(&b, 2), 0xA680);
        write8(&mut b, 0, 0x7F);
        assert_eq!(read8(&b, 0), 0x7F);
    }
}
