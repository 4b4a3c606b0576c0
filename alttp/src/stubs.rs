//! Assembly of the six patched routines the engine drives the game through.
//! All of them live in the HWIO shadow at $xx:5000-$xx:5FFF and end in a
//! `STP` sentinel, so `exec_at` can run them to completion.

use crate::asm::Emitter;
use crate::emu::{write16, Emulator};
use crate::rom::RomPointers;
use failure::Error;

/// Entry points of the installed stubs. The `done_pc` sentinel is shared by
/// every routine in the $00:5000 block.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stubs {
    pub boot_pc: u32,
    pub load_entrance_pc: u32,
    pub set_entrance_id_pc: u32,
    pub run_frame_pc: u32,
    pub load_supertile_pc: u32,
    pub nmi_pc: u32,
    pub done_pc: u32,
    pub load_uw_supertile_pc: u32,
    pub handle_room_tags_pc: u32,
    pub run_single_frame_pc: u32,
    pub load_ow_transition_pc: u32,
}

/// Offset of a stub pc inside the HWIO shadow.
pub fn dyn_offset(pc: u32) -> usize {
    ((pc & 0xFFFF) - 0x5000) as usize
}

pub fn install<E: Emulator>(e: &mut E, p: &RomPointers, fastrom: u32) -> Result<Stubs, Error> {
    let mut stubs = Stubs::default();
    let dyn_buf = e.hwio_dyn_mut();

    // $02:5200: draw a supertile assuming gfx tileset and palettes are
    // already loaded.
    {
        stubs.load_uw_supertile_pc = fastrom | 0x02_5200;
        let off = dyn_offset(stubs.load_uw_supertile_pc);
        let mut a = Emitter::new(&mut dyn_buf[off..off + 0x100], stubs.load_uw_supertile_pc);
        // bank restore back to $00
        a.sep(0x30);
        a.lda_imm8_b(0x00);
        a.pha();
        a.plb();
        // in Underworld_LoadEntrance_DoPotsBlocksTorches at the PHB and bank
        // switch to $7E
        a.jsr_abs((p.underworld_load_entrance_do_pots_blocks_torches & 0xFFFF) as u16);
        // Module06_UnderworldLoad after JSR Underworld_LoadEntrance
        a.jmp_abs((p.module06_underworld_load_after_jsr_load_entrance & 0xFFFF) as u16);
        a.finalize()?;
    }

    // $00:5000: boot block plus the entrance/supertile loaders and the
    // shared frame/NMI tail.
    {
        let mut a = Emitter::new(&mut dyn_buf[..0x200], fastrom | 0x00_5000);
        stubs.boot_pc = a.pc();
        a.sep(0x30);
        a.jsl(fastrom | p.load_default_tile_types);
        a.jsl(p.intro_initialize_default_gfx);
        a.jsl(fastrom | p.intro_create_text_pointers);
        if p.decompress_font_gfx != 0 {
            a.jsl(fastrom | p.decompress_font_gfx);
        }
        a.jsl(fastrom | p.load_item_gfx_into_wram);

        // initialize SRAM save file slot 0
        a.rep(0x10);
        a.ldx_imm16_w(0);
        a.sep(0x10);
        a.jsl(p.initialize_save_file);
        // this also initializes DMA source addresses, eliminating garbage
        // transfers into VRAM[0]
        a.jsl(p.copy_save_to_wram);

        // disable rain
        a.lda_imm8_b(0x02);
        a.sta_long(0x7E_F3C5);
        // no bed cutscene
        a.lda_imm8_b(0x10);
        a.sta_long(0x7E_F3C6);
        // non-zero mirroring skips the message prompt on file load
        a.sta_long(0x7E_C011);
        a.stp();

        // loads a dungeon given an entrance ID
        stubs.load_entrance_pc = a.label("loadEntrance");
        a.sep(0x30);
        // module $06, submodule $00
        a.lda_imm8_b(0x06);
        a.sta_dp(0x10);
        a.stz_dp(0x11);
        a.stz_dp(0xB0);
        // the operand byte of this LDA is the entrance ID; the driver pokes
        // it before each run
        stubs.set_entrance_id_pc = a.label("setEntranceID") + 1;
        a.lda_imm8_b(0x08);
        a.sta_abs(0x010E);

        stubs.run_frame_pc = a.label("mainRouting");
        a.sep(0x30);
        // increment the frame counter for proper animations
        a.inc_dp(0x1A);
        a.jsr_abs((p.clear_oam_buffer & 0xFFFF) as u16);
        a.jsl(fastrom | p.module_main_routing);
        a.bra("updateVRAM");

        stubs.load_supertile_pc = a.label("loadSupertile");
        a.sep(0x30);
        a.inc_abs(0x0710);
        a.jsl(fastrom | p.intro_initialize_default_gfx_after_jsl_decompress);
        a.stz_dp(0x11);
        a.jsl(stubs.load_uw_supertile_pc);
        a.stz_dp(0x11);

        a.label("updateVRAM");
        // sets up the DMA transfer parameters for animated BG tiles
        a.jsr_abs((p.nmi_prepare_sprites & 0xFFFF) as u16);

        stubs.nmi_pc = a.label("NMIRoutine");
        a.lda_imm8_b(0x80);
        a.sta_abs(0x2100); // INIDISP
        a.stz_abs(0x420C); // HDMAEN
        a.jsr_abs((p.nmi_do_updates & 0xFFFF) as u16);
        a.jsr_abs((p.nmi_read_joypads & 0xFFFF) as u16);

        stubs.done_pc = a.label("done");
        a.stp();
        a.finalize()?;
    }

    // $00:5300: replay a room's tag routine until its submodule settles.
    {
        stubs.handle_room_tags_pc = fastrom | 0x00_5300;
        let off = dyn_offset(stubs.handle_room_tags_pc);
        let mut a = Emitter::new(&mut dyn_buf[off..off + 0x100], stubs.handle_room_tags_pc);
        a.sep(0x30);
        // Module07_Underworld
        a.lda_imm8_b(0x07);
        a.sta_dp(0x10);
        a.stz_dp(0x11);
        a.stz_dp(0xB0);
        // no cutscene
        a.stz_abs(0x02E4);
        // enable tags
        a.stz_abs(0x04C7);
        a.jsl(fastrom | p.underworld_handle_room_tags);
        a.lda_dp(0x11);
        a.beq("no_submodule");
        a.label("continue_submodule");
        a.jsl(fastrom | p.module_main_routing);
        a.label("no_submodule");
        a.jsr_abs((p.nmi_prepare_sprites & 0xFFFF) as u16);
        a.jsr_abs((p.nmi_do_updates & 0xFFFF) as u16);
        a.wdm(0xFF);
        a.lda_dp(0x11);
        a.bne("continue_submodule");
        a.stz_dp(0x11);
        a.stp();
        a.finalize()?;
    }

    // $00:5400: run one main-loop frame plus the fake NMI.
    {
        stubs.run_single_frame_pc = fastrom | 0x00_5400;
        let off = dyn_offset(stubs.run_single_frame_pc);
        let mut a = Emitter::new(&mut dyn_buf[off..off + 0x80], stubs.run_single_frame_pc);
        a.sep(0x30);
        a.inc_dp(0x1A);
        a.jsr_abs((p.clear_oam_buffer & 0xFFFF) as u16);
        a.jsl(fastrom | p.module_main_routing);
        a.jsr_abs((p.nmi_prepare_sprites & 0xFFFF) as u16);
        a.jsr_abs((p.nmi_do_updates & 0xFFFF) as u16);
        a.stp();
        a.finalize()?;
    }

    // $02:5500: load an overworld area from an edge transition. $0410 and
    // $0416 must already hold the direction bit, $0418 and $069C the
    // direction enum.
    {
        stubs.load_ow_transition_pc = fastrom | 0x02_5500;
        let off = dyn_offset(stubs.load_ow_transition_pc);
        let mut a = Emitter::new(&mut dyn_buf[off..off + 0x80], stubs.load_ow_transition_pc);
        a.sep(0x30);
        a.lda_imm8_b(0x09);
        a.sta_abs(0x010C);
        a.sta_dp(0x10);
        a.stz_dp(0x11);
        a.inc_dp(0x11);
        a.stz_dp(0xB0);
        a.stz_abs(0x0696);
        a.stz_abs(0x0698);
        a.stz_abs(0x0126);
        a.jsr_abs((p.overworld_load_gfx_and_screen_size & 0xFFFF) as u16);
        a.jsr_abs((p.overworld_handle_transitions_change_palettes & 0xFFFF) as u16);
        a.stp();
        a.finalize()?;
    }

    Ok(stubs)
}

/// Run the game's own early init and then the boot block, leaving the
/// system ready to load entrances.
pub fn boot<E: Emulator>(e: &mut E, stubs: &Stubs, fastrom: u32) -> Result<(), Error> {
    // the init JSR at $00:8029; stopping right after skips the useless
    // memory-zeroing pass
    e.exec_at(fastrom | 0x00_8029, fastrom | 0x00_802C)?;
    e.exec_at(stubs.boot_pc, stubs.done_pc)?;

    let w = e.wram_mut();
    write16(w, 0x0ADC, 0xA680);
    write16(w, 0xC00D, 0x0001);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::{pointers_for, Region};
    use crate::testemu::FakeEmulator;

    #[test]
    fn stubs_assemble_into_their_slots() {
        let mut e = FakeEmulator::new();
        let p = pointers_for(Region::Japan);
        let stubs = install(&mut e, &p, 0).unwrap();

        assert_eq!(stubs.load_uw_supertile_pc, 0x02_5200);
        assert_eq!(stubs.handle_room_tags_pc, 0x00_5300);
        assert_eq!(stubs.run_single_frame_pc, 0x00_5400);
        assert_eq!(stubs.load_ow_transition_pc, 0x02_5500);
        assert!(stubs.load_entrance_pc > stubs.boot_pc);
        assert!(stubs.done_pc > stubs.load_supertile_pc);

        let d = e.hwio_dyn_mut();
        // boot block starts with SEP #$30:
        assert_eq!(&d[0..2], &[0xE2, 0x30]);
        // the supertile renderer slot starts with SEP #$30 as well:
        assert_eq!(&d[0x200..0x202], &[0xE2, 0x30]);
        // every block ends in at least one STP sentinel:
        assert!(d[..0x200].contains(&0xDB));
        assert!(d[0x300..0x400].contains(&0xDB));
    }

    #[test]
    fn entrance_id_operand_is_patchable() {
        let mut e = FakeEmulator::new();
        let p = pointers_for(Region::Japan);
        let stubs = install(&mut e, &p, 0).unwrap();
        let off = dyn_offset(stubs.set_entrance_id_pc);
        // the byte addressed by set_entrance_id_pc is an LDA immediate
        // operand, preceded by the LDA opcode itself:
        assert_eq!(e.hwio_dyn_mut()[off - 1], 0xA9);
        assert_eq!(e.hwio_dyn_mut()[off], 0x08);
    }
}
