//! Pixel composition from the Room/Area snapshots: CGRAM palette
//! conversion and 4bpp BG tile drawing. Only compiled with the `render`
//! feature; the byte-level snapshot accessors live on Room/Area and stay
//! feature-free.

use crate::area::Area;
use crate::emu;
use crate::room::Room;
use image::{Rgba, RgbaImage};

pub const TILE_W: usize = 8;
pub const TILE_H: usize = 8;

// bsnes gamma ramp
const GAMMA_RAMP: [u8; 32] = [
    0x00, 0x01, 0x03, 0x06, 0x0A, 0x0F, 0x15, 0x1C, 0x24, 0x2D, 0x37, 0x42, 0x4E, 0x5B, 0x69,
    0x78, 0x88, 0x90, 0x98, 0xA0, 0xA8, 0xB0, 0xB8, 0xC0, 0xC8, 0xD0, 0xD8, 0xE0, 0xE8, 0xF0,
    0xF8, 0xFF,
];

/// Convert a BGR15 color word (MSB unused) to RGBA.
pub fn cgram_rgba(bgr15: u16, gamma: bool) -> Rgba<u8> {
    let b = ((bgr15 & 0x7C00) >> 10) as usize;
    let g = ((bgr15 & 0x03E0) >> 5) as usize;
    let r = (bgr15 & 0x001F) as usize;
    if gamma {
        Rgba([GAMMA_RAMP[r], GAMMA_RAMP[g], GAMMA_RAMP[b], 0xFF])
    } else {
        let x = |v: usize| ((v << 3) | (v >> 2)) as u8;
        Rgba([x(r), x(g), x(b), 0xFF])
    }
}

/// The 256-entry palette from the CGRAM shadow at $C300.
pub fn palette_from_wram(w: &[u8], gamma: bool) -> Vec<Rgba<u8>> {
    (0..256)
        .map(|i| cgram_rgba(emu::read16(w, 0xC300 + ((i as u32) << 1)), gamma))
        .collect()
}

/// Draw one BG tilemap word into the image.
///
/// High     Low          Legend->  c: starting character (tile) number
/// vhopppcc cccccccc               h: horizontal flip  v: vertical flip
///                                 p: palette number   o: priority bit
pub fn draw_bg_tile(
    img: &mut RgbaImage,
    z: u16,
    tileset: &[u8],
    pal: &[Rgba<u8>],
    tx: usize,
    ty: usize,
) {
    let pbase = (((z >> 10) & 7) as usize) << 4;
    let ch = (z & 0x03FF) as usize;
    if (ch << 5) + 31 >= tileset.len() {
        return;
    }
    for y in 0..TILE_H {
        let fy = if z & 0x8000 != 0 { 7 - y } else { y };
        let p0 = tileset[(ch << 5) + (y << 1)];
        let p1 = tileset[(ch << 5) + (y << 1) + 1];
        let p2 = tileset[(ch << 5) + (y << 1) + 16];
        let p3 = tileset[(ch << 5) + (y << 1) + 17];
        for x in 0..TILE_W {
            let fx = if z & 0x4000 == 0 { 7 - x } else { x };
            let i = ((p0 >> x) & 1)
                | (((p1 >> x) & 1) << 1)
                | (((p2 >> x) & 1) << 2)
                | (((p3 >> x) & 1) << 3);
            // color 0 is transparent
            if i == 0 {
                continue;
            }
            let px = (tx * 8 + fx) as u32;
            let py = (ty * 8 + fy) as u32;
            if px < img.width() && py < img.height() {
                *img.get_pixel_mut(px, py) = pal[pbase + i as usize];
            }
        }
    }
}

/// Compose both BG layers of a room, low priority under high.
pub fn render_room(room: &Room, gamma: bool) -> RgbaImage {
    let w = &room.wram_after_load[..];
    let pal = palette_from_wram(w, gamma);
    let mut img = RgbaImage::from_pixel(512, 512, Rgba([0, 0, 0, 0xFF]));

    // BG2 tilemap at $2000, BG1 at $4000
    for &(base, prio) in &[(0x2000u32, 0u16), (0x4000, 0), (0x2000, 1), (0x4000, 1)] {
        for ty in 0..64usize {
            for tx in 0..64usize {
                let z = emu::read16(w, base + (((ty * 64 + tx) as u32) << 1));
                if (z >> 13) & 1 != prio {
                    continue;
                }
                draw_bg_tile(&mut img, z, &room.vram_tileset[..], &pal, tx, ty);
            }
        }
    }
    img
}

/// Compose an area's map8 presentation grid.
pub fn render_area(a: &Area, gamma: bool) -> RgbaImage {
    let w = &a.wram_after_load[..];
    let pal = palette_from_wram(w, gamma);
    let mut img = RgbaImage::from_pixel(
        (a.width as u32) * 8,
        (a.height as u32) * 8,
        Rgba([0, 0, 0, 0xFF]),
    );

    for prio in 0..2u16 {
        for ty in 0..a.height as usize {
            for tx in 0..a.width as usize {
                let z = a.map8[ty * 0x80 + tx];
                if (z >> 13) & 1 != prio {
                    continue;
                }
                draw_bg_tile(&mut img, z, &a.vram_tileset[..], &pal, tx, ty);
            }
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cgram_conversion() {
        // pure white
        assert_eq!(cgram_rgba(0x7FFF, false), Rgba([0xFF, 0xFF, 0xFF, 0xFF]));
        // pure red sits in the low bits
        assert_eq!(cgram_rgba(0x001F, false), Rgba([0xFF, 0x00, 0x00, 0xFF]));
        assert_eq!(cgram_rgba(0x7C00, false), Rgba([0x00, 0x00, 0xFF, 0xFF]));
        // the gamma ramp crushes dark colors
        assert_eq!(cgram_rgba(0x0001, true), Rgba([0x01, 0x00, 0x00, 0xFF]));
    }

    #[test]
    fn tile_drawing_respects_transparency() {
        let mut img = RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 0xFF]));
        let mut tileset = vec![0u8; 0x4000];
        // tile 0, row 0, bitplane 0: leftmost pixel set
        tileset[0] = 0x80;
        let pal: Vec<Rgba<u8>> = (0..256).map(|i| Rgba([i as u8, 0, 0, 0xFF])).collect();
        draw_bg_tile(&mut img, 0x0000, &tileset, &pal, 0, 0);
        // bit 7 with default flip lands at x == 0... the SNES stores the
        // leftmost pixel in the high bit
        assert_eq!(*img.get_pixel(0, 0), Rgba([1, 0, 0, 0xFF]));
        // untouched pixels keep the background
        assert_eq!(*img.get_pixel(1, 1), Rgba([1, 2, 3, 0xFF]));
    }
}
