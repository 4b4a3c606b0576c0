//! A deliberately tiny 65C816 emitter: just the opcodes the patched stub
//! routines need, with two-pass label fixups for short branches.

use failure::{format_err, Error};
use std::collections::HashMap;

pub struct Emitter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    base: u32,
    labels: HashMap<&'static str, u32>,
    fixups: Vec<Fixup>,
}

struct Fixup {
    // buffer offset of the relative displacement byte
    offset: usize,
    // pc of the instruction following the branch
    after: u32,
    target: &'static str,
}

impl<'a> Emitter<'a> {
    pub fn new(buf: &'a mut [u8], base: u32) -> Emitter<'a> {
        Emitter {
            buf,
            pos: 0,
            base,
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    pub fn pc(&self) -> u32 {
        self.base + self.pos as u32
    }

    /// Record the current pc under `name` and return it.
    pub fn label(&mut self, name: &'static str) -> u32 {
        let pc = self.pc();
        self.labels.insert(name, pc);
        pc
    }

    fn emit(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub fn sep(&mut self, flags: u8) {
        self.emit(&[0xE2, flags]);
    }

    pub fn rep(&mut self, flags: u8) {
        self.emit(&[0xC2, flags]);
    }

    pub fn lda_imm8_b(&mut self, v: u8) {
        self.emit(&[0xA9, v]);
    }

    pub fn lda_imm16_w(&mut self, v: u16) {
        self.emit(&[0xA9, v as u8, (v >> 8) as u8]);
    }

    pub fn lda_dp(&mut self, addr: u8) {
        self.emit(&[0xA5, addr]);
    }

    pub fn ldx_imm16_w(&mut self, v: u16) {
        self.emit(&[0xA2, v as u8, (v >> 8) as u8]);
    }

    pub fn sta_dp(&mut self, addr: u8) {
        self.emit(&[0x85, addr]);
    }

    pub fn sta_abs(&mut self, addr: u16) {
        self.emit(&[0x8D, addr as u8, (addr >> 8) as u8]);
    }

    pub fn sta_long(&mut self, addr: u32) {
        self.emit(&[0x8F, addr as u8, (addr >> 8) as u8, (addr >> 16) as u8]);
    }

    pub fn stz_dp(&mut self, addr: u8) {
        self.emit(&[0x64, addr]);
    }

    pub fn stz_abs(&mut self, addr: u16) {
        self.emit(&[0x9C, addr as u8, (addr >> 8) as u8]);
    }

    pub fn stz_abs_x(&mut self, addr: u16) {
        self.emit(&[0x9E, addr as u8, (addr >> 8) as u8]);
    }

    pub fn inc_dp(&mut self, addr: u8) {
        self.emit(&[0xE6, addr]);
    }

    pub fn inc_abs(&mut self, addr: u16) {
        self.emit(&[0xEE, addr as u8, (addr >> 8) as u8]);
    }

    pub fn jsl(&mut self, addr: u32) {
        self.emit(&[0x22, addr as u8, (addr >> 8) as u8, (addr >> 16) as u8]);
    }

    pub fn jsr_abs(&mut self, addr: u16) {
        self.emit(&[0x20, addr as u8, (addr >> 8) as u8]);
    }

    pub fn jmp_abs(&mut self, addr: u16) {
        self.emit(&[0x4C, addr as u8, (addr >> 8) as u8]);
    }

    pub fn pha(&mut self) {
        self.emit(&[0x48]);
    }

    pub fn plb(&mut self) {
        self.emit(&[0xAB]);
    }

    pub fn wdm(&mut self, v: u8) {
        self.emit(&[0x42, v]);
    }

    pub fn stp(&mut self) {
        self.emit(&[0xDB]);
    }

    pub fn rtl(&mut self) {
        self.emit(&[0x6B]);
    }

    pub fn rts(&mut self) {
        self.emit(&[0x60]);
    }

    pub fn bra(&mut self, target: &'static str) {
        self.branch(0x80, target);
    }

    pub fn beq(&mut self, target: &'static str) {
        self.branch(0xF0, target);
    }

    pub fn bne(&mut self, target: &'static str) {
        self.branch(0xD0, target);
    }

    fn branch(&mut self, op: u8, target: &'static str) {
        self.emit(&[op, 0x00]);
        self.fixups.push(Fixup {
            offset: self.pos - 1,
            after: self.pc(),
            target,
        });
    }

    /// Patch all recorded branch displacements.
    pub fn finalize(self) -> Result<(), Error> {
        for f in &self.fixups {
            let dest = *self
                .labels
                .get(f.target)
                .ok_or_else(|| format_err!("undefined label `{}`", f.target))?;
            let disp = dest as i64 - f.after as i64;
            if disp < -128 || disp > 127 {
                return Err(format_err!(
                    "branch to `{}` out of range ({})",
                    f.target,
                    disp
                ));
            }
            self.buf[f.offset] = disp as i8 as u8;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_expected_bytes() {
        let mut buf = [0u8; 16];
        let mut a = Emitter::new(&mut buf, 0x00_5000);
        a.sep(0x30);
        a.lda_imm8_b(0x07);
        a.sta_dp(0x10);
        a.jsl(0x01_C2FD);
        a.stp();
        assert_eq!(a.pc(), 0x00_500B);
        a.finalize().unwrap();
        assert_eq!(
            &buf[..11],
            &[0xE2, 0x30, 0xA9, 0x07, 0x85, 0x10, 0x22, 0xFD, 0xC2, 0x01, 0xDB]
        );
    }

    #[test]
    fn branch_fixups() {
        let mut buf = [0u8; 16];
        let mut a = Emitter::new(&mut buf, 0x5000);
        a.bne("skip");
        a.inc_dp(0x1A);
        a.label("skip");
        a.stp();
        a.finalize().unwrap();
        // BNE +2 skips the two-byte INC:
        assert_eq!(&buf[..5], &[0xD0, 0x02, 0xE6, 0x1A, 0xDB]);
    }

    #[test]
    fn undefined_label_is_an_error() {
        let mut buf = [0u8; 4];
        let mut a = Emitter::new(&mut buf, 0x5000);
        a.bra("nowhere");
        assert!(a.finalize().is_err());
    }
}
