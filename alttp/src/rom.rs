//! ROM image handling: SNES internal header, bus-to-file mapping, the
//! region-specific pointer tables, and the small code patches the engine
//! applies before booting the emulator.

use failure::{format_err, Error};
use log::{info, warn};
use num::FromPrimitive;
use num_derive::FromPrimitive;
use serde::Serialize;

/// Bank mapping from the header's map-mode byte (FastROM bit stripped).
#[derive(Clone, Copy, Debug, FromPrimitive, PartialEq, Serialize)]
#[repr(u8)]
pub enum BusMapping {
    LoRom = 0x20,
    HiRom = 0x21,
    ExLoRom = 0x22,
    ExHiRom = 0x25,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum Region {
    Japan,
    NorthAmerica,
}

/// File offset of a LoROM bus address.
pub fn lorom_file_offset(bus: u32) -> usize {
    let bank = (bus >> 16) & 0x7F;
    ((bank << 15) | (bus & 0x7FFF)) as usize
}

pub struct RomImage {
    pub data: Vec<u8>,
    pub mapping: BusMapping,
    pub fastrom: bool,
    pub region: Region,
}

impl RomImage {
    pub fn new(data: Vec<u8>) -> Result<RomImage, Error> {
        if data.len() < 0x8000 {
            return Err(format_err!("ROM image too small ({} bytes)", data.len()));
        }

        // Internal header sits at $7FB0 for LoROM images.
        let map_mode = data[0x7FD5];
        let mapping = BusMapping::from_u8(map_mode & !0x10)
            .ok_or_else(|| format_err!("unrecognized map mode ${:02X} in ROM header", map_mode))?;
        let fastrom = map_mode & 0x10 != 0;

        let region = match data[0x7FD9] {
            0x00 => Region::Japan,
            0x01 => Region::NorthAmerica,
            d => {
                warn!("unknown destination code ${:02X}, assuming US", d);
                Region::NorthAmerica
            }
        };

        info!(
            "ROM: {:?}, {}, {:?}",
            mapping,
            if fastrom { "FastROM" } else { "SlowROM" },
            region
        );

        Ok(RomImage {
            data,
            mapping,
            fastrom,
            region,
        })
    }

    /// High bank bit the stubs OR into long addresses on FastROM carts.
    pub fn fastrom_bank(&self) -> u32 {
        if self.fastrom {
            0x80_0000
        } else {
            0
        }
    }

    fn file_offset(&self, bus: u32) -> usize {
        match self.mapping {
            BusMapping::LoRom | BusMapping::ExLoRom => lorom_file_offset(bus),
            BusMapping::HiRom | BusMapping::ExHiRom => (bus & 0x3F_FFFF) as usize,
        }
    }

    pub fn read8(&self, bus: u32) -> u8 {
        self.data.get(self.file_offset(bus)).copied().unwrap_or(0)
    }

    pub fn read16(&self, bus: u32) -> u16 {
        self.read8(bus) as u16 | (self.read8(bus + 1) as u16) << 8
    }

    fn write_bytes(&mut self, bus: u32, bytes: &[u8]) {
        let off = self.file_offset(bus);
        self.data[off..off + bytes.len()].copy_from_slice(bytes);
    }

    /// Patch out the handful of game routines that would hang a headless
    /// run: the APU song-bank loads, the HUD rebuild, and the off-screen
    /// sprite check.
    pub fn apply_engine_patches(&mut self, p: &RomPointers) {
        // JSR Underworld_LoadSongBankIfNeeded -> JMP .exit (SEP #$20 : RTL)
        self.write_bytes(
            p.patch_jsr_underworld_load_song_bank,
            &[
                0x4C,
                p.patch_sep_20_rtl as u8,
                (p.patch_sep_20_rtl >> 8) as u8,
            ],
        );
        // RebuildHUD_Keys -> RTL
        self.write_bytes(p.patch_rebuild_hud_keys, &[0x6B]);
        // Sprite_PrepOAMCoord: INC $0F00,X -> STZ $0F00,X so off-screen
        // sprites stay live.
        self.write_bytes(p.patch_sprite_prep_oam_coord, &[0x9E, 0x00, 0x0F]);
        // LoadSongBank -> RTS
        self.write_bytes(p.patch_load_song_bank, &[0x60]);
    }
}

/// Absolute bus addresses of the game routines and data tables the engine
/// drives. Two tables exist because the JP and US builds shuffled several
/// banks; a few entries are re-derived from code at startup to absorb
/// further drift (`extract_pointers`).
#[derive(Clone, Debug)]
pub struct RomPointers {
    pub module_main_routing: u32,
    pub underworld_load_room: u32,
    pub underworld_load_custom_tile_attributes: u32,
    pub underworld_load_attribute_table: u32,
    pub underworld_load_entrance_do_pots_blocks_torches: u32,
    pub module06_underworld_load_after_jsr_load_entrance: u32,
    pub load_default_tile_types: u32,
    pub intro_initialize_default_gfx: u32,
    pub intro_initialize_default_gfx_after_jsl_decompress: u32,
    pub intro_create_text_pointers: u32,
    pub decompress_font_gfx: u32,
    pub load_item_gfx_into_wram: u32,
    pub initialize_save_file: u32,
    pub copy_save_to_wram: u32,
    pub nmi_prepare_sprites: u32,
    pub nmi_do_updates: u32,
    pub nmi_read_joypads: u32,
    pub clear_oam_buffer: u32,
    pub underworld_handle_room_tags: u32,
    pub overworld_load_gfx_and_screen_size: u32,
    pub overworld_handle_transitions_change_palettes: u32,

    pub patch_jsr_underworld_load_song_bank: u32,
    pub patch_sep_20_rtl: u32,
    pub patch_rebuild_hud_keys: u32,
    pub patch_sprite_prep_oam_coord: u32,
    pub patch_load_song_bank: u32,

    pub room_data_pot_items_pointers: u32,

    pub map16_definitions: u32,
    pub overworld_tile_types: u32,
    pub overworld_data_hidden_items: u32,
    pub overworld_secret_tile_type: u32,
    pub overworld_reveal_secret_entry: u32,
    pub overworld_entrance_screens: u32,
    pub overworld_entrance_count: u32,
    pub overworld_pit_destination_screen: u32,
    pub overworld_pit_destination_map16: u32,
    pub overworld_pit_destination_entrance: u32,
    pub overworld_pit_destination_count: u32,
    pub overworld_actual_screen_id: u32,

    pub rooms_with_pit_damage: u32,
}

pub fn pointers_for(region: Region) -> RomPointers {
    match region {
        Region::Japan => RomPointers {
            module_main_routing: 0x00_80B5,
            underworld_load_room: 0x01_873A,
            underworld_load_custom_tile_attributes: 0x0F_FD65,
            underworld_load_attribute_table: 0x01_B8BF,
            underworld_load_entrance_do_pots_blocks_torches: 0x02_D854,
            module06_underworld_load_after_jsr_load_entrance: 0x02_8157,
            load_default_tile_types: 0x0F_FD2A,
            intro_initialize_default_gfx: 0x0C_C208,
            intro_initialize_default_gfx_after_jsl_decompress: 0x0C_C237,
            intro_create_text_pointers: 0x02_8022,
            decompress_font_gfx: 0x0E_F572,
            load_item_gfx_into_wram: 0x00_D271,
            initialize_save_file: 0x0C_DB3E,
            copy_save_to_wram: 0x0C_CEB2,
            nmi_prepare_sprites: 0x00_85FC,
            nmi_do_updates: 0x00_89E0,
            nmi_read_joypads: 0x00_83D1,
            clear_oam_buffer: 0x00_841E,
            underworld_handle_room_tags: 0x01_C2FD,
            overworld_load_gfx_and_screen_size: 0x02_AA07,
            overworld_handle_transitions_change_palettes: 0x02_A9F3,

            patch_jsr_underworld_load_song_bank: 0x02_8293,
            patch_sep_20_rtl: 0x02_82BC,
            patch_rebuild_hud_keys: 0x0D_FA88,
            patch_sprite_prep_oam_coord: 0x06_E48B,
            patch_load_song_bank: 0x00_8888,

            room_data_pot_items_pointers: 0x01_DB67,

            map16_definitions: 0x1B_8000,
            overworld_tile_types: 0x1B_F040,
            overworld_data_hidden_items: 0x1B_C109,
            overworld_secret_tile_type: 0x1B_C89B,
            overworld_reveal_secret_entry: 0x1B_C64B,
            overworld_entrance_screens: 0x1B_B96F,
            overworld_entrance_count: 0x81,
            overworld_pit_destination_screen: 0x01_E6B0,
            overworld_pit_destination_map16: 0x01_E6D6,
            overworld_pit_destination_entrance: 0x01_E6FC,
            overworld_pit_destination_count: 0x13,
            overworld_actual_screen_id: 0x02_A5EC,

            rooms_with_pit_damage: 0x00_990C,
        },
        Region::NorthAmerica => RomPointers {
            module_main_routing: 0x00_80B5,
            underworld_load_room: 0x01_873A,
            underworld_load_custom_tile_attributes: 0x0E_942A,
            underworld_load_attribute_table: 0x01_B8BF,
            underworld_load_entrance_do_pots_blocks_torches: 0x02_DAF0,
            module06_underworld_load_after_jsr_load_entrance: 0x02_824D,
            load_default_tile_types: 0x0E_97D9,
            intro_initialize_default_gfx: 0x0C_C1F9,
            intro_initialize_default_gfx_after_jsl_decompress: 0x0C_C228,
            intro_create_text_pointers: 0x0E_D3EB,
            decompress_font_gfx: 0, // removed in the US build
            load_item_gfx_into_wram: 0x00_D231,
            initialize_save_file: 0x0C_DBDC,
            copy_save_to_wram: 0x0C_CFBB,
            nmi_prepare_sprites: 0x00_85FC,
            nmi_do_updates: 0x00_89E0,
            nmi_read_joypads: 0x00_83D1,
            clear_oam_buffer: 0x00_841E,
            underworld_handle_room_tags: 0x01_C2FD,
            overworld_load_gfx_and_screen_size: 0x02_AA07,
            overworld_handle_transitions_change_palettes: 0x02_A9F3,

            patch_jsr_underworld_load_song_bank: 0x02_8389,
            patch_sep_20_rtl: 0x02_83B2,
            patch_rebuild_hud_keys: 0x0D_FA68,
            patch_sprite_prep_oam_coord: 0x06_E485,
            patch_load_song_bank: 0x00_8888,

            room_data_pot_items_pointers: 0x01_DB69,

            map16_definitions: 0x1B_8000,
            overworld_tile_types: 0x1B_F040,
            overworld_data_hidden_items: 0x1B_C109,
            overworld_secret_tile_type: 0x1B_C89B,
            overworld_reveal_secret_entry: 0x1B_C64B,
            overworld_entrance_screens: 0x1B_B96F,
            overworld_entrance_count: 0x81,
            overworld_pit_destination_screen: 0x01_E6B0,
            overworld_pit_destination_map16: 0x01_E6D6,
            overworld_pit_destination_entrance: 0x01_E6FC,
            overworld_pit_destination_count: 0x13,
            overworld_actual_screen_id: 0x02_A5EC,

            rooms_with_pit_damage: 0x00_990C,
        },
    }
}

/// Re-derive the hidden-items table pointer from the secret-reveal routine
/// itself rather than trusting the static table: the routine starts with a
/// `LDA long,X` whose operand is the table, so romhacks that moved the data
/// still resolve correctly.
pub fn extract_pointers(rom: &RomImage, p: &mut RomPointers) {
    for i in 0..16 {
        let addr = p.overworld_reveal_secret_entry + i;
        if rom.read8(addr) == 0xBF {
            let operand = rom.read8(addr + 1) as u32
                | (rom.read8(addr + 2) as u32) << 8
                | (rom.read8(addr + 3) as u32) << 16;
            if operand != p.overworld_data_hidden_items {
                info!(
                    "hidden-items table moved: ${:06X} -> ${:06X}",
                    p.overworld_data_hidden_items, operand
                );
            }
            p.overworld_data_hidden_items = operand;
            return;
        }
    }
    warn!("secret-reveal signature not found; keeping static hidden-items pointer");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_rom(map_mode: u8, dest: u8) -> Vec<u8> {
        let mut data = vec![0u8; 0x10_0000];
        data[0x7FD5] = map_mode;
        data[0x7FD9] = dest;
        data
    }

    #[test]
    fn lorom_mapping() {
        assert_eq!(lorom_file_offset(0x8F_93FE), 0x793FE);
        // banks below $80 mirror the high half:
        assert_eq!(lorom_file_offset(0x00_990C), 0x190C);
    }

    #[test]
    fn header_parse() {
        let rom = RomImage::new(synthetic_rom(0x20, 0x00)).unwrap();
        assert_eq!(rom.mapping, BusMapping::LoRom);
        assert!(!rom.fastrom);
        assert_eq!(rom.region, Region::Japan);

        let rom = RomImage::new(synthetic_rom(0x31, 0x01)).unwrap();
        assert_eq!(rom.mapping, BusMapping::HiRom);
        assert!(rom.fastrom);
        assert_eq!(rom.region, Region::NorthAmerica);

        assert!(RomImage::new(synthetic_rom(0x77, 0x00)).is_err());
    }

    #[test]
    fn bus_reads() {
        let mut data = synthetic_rom(0x20, 0x00);
        let off = lorom_file_offset(0x8F_93FE);
        data[off] = 0x34;
        data[off + 1] = 0x12;
        let rom = RomImage::new(data).unwrap();
        assert_eq!(rom.read16(0x8F_93FE), 0x1234);
    }

    #[test]
    fn pointer_extraction() {
        let mut data = synthetic_rom(0x20, 0x00);
        let mut p = pointers_for(Region::Japan);
        let off = lorom_file_offset(p.overworld_reveal_secret_entry);
        // SEP #$20 : LDA $1BD000,X
        data[off] = 0xE2;
        data[off + 1] = 0x20;
        data[off + 2] = 0xBF;
        data[off + 3] = 0x00;
        data[off + 4] = 0xD0;
        data[off + 5] = 0x1B;
        let rom = RomImage::new(data).unwrap();
        extract_pointers(&rom, &mut p);
        assert_eq!(p.overworld_data_hidden_items, 0x1B_D000);
    }
}
