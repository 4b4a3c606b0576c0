//! Atlas-side rendering: reachability overlays and the big composed maps.

use alttp::area::{Area, SharedArea};
use alttp::graphics;
use alttp::room::{Room, SharedRoom, TILES_LEN};
use failure::Error;
use image::{Rgba, RgbaImage};
use std::path::Path;

const TINT_REACHABLE: Rgba<u8> = Rgba([255, 255, 0, 64]);
const TINT_PIT: Rgba<u8> = Rgba([255, 0, 0, 96]);
const TINT_ENTRY: Rgba<u8> = Rgba([0, 255, 255, 96]);

fn blend(dst: &mut Rgba<u8>, tint: Rgba<u8>) {
    let a = tint.0[3] as u32;
    for i in 0..3 {
        let d = dst.0[i] as u32;
        let t = tint.0[i] as u32;
        dst.0[i] = ((d * (255 - a) + t * a) / 255) as u8;
    }
}

fn tint_tile(img: &mut RgbaImage, tx: u32, ty: u32, tint: Rgba<u8>) {
    for y in ty * 8..ty * 8 + 8 {
        for x in tx * 8..tx * 8 + 8 {
            if x < img.width() && y < img.height() {
                blend(img.get_pixel_mut(x, y), tint);
            }
        }
    }
}

fn tint_for(v: u8) -> Option<Rgba<u8>> {
    match v {
        0x01 => None,
        0x20 | 0x62 => Some(TINT_PIT),
        0xFF => Some(TINT_ENTRY),
        _ => Some(TINT_REACHABLE),
    }
}

pub fn room_image(room: &Room, overlay: bool, gamma: bool) -> RgbaImage {
    let mut img = graphics::render_room(room, gamma);
    if overlay {
        // both layers share the pixel plane; layer 2 wins when both hit
        for i in 0..TILES_LEN {
            if let Some(tint) = tint_for(room.reachable[i]) {
                let tx = (i & 0x3F) as u32;
                let ty = ((i >> 6) & 0x3F) as u32;
                tint_tile(&mut img, tx, ty, tint);
            }
        }
    }
    img
}

pub fn area_image(area: &Area, overlay: bool, gamma: bool) -> RgbaImage {
    let mut img = graphics::render_area(area, gamma);
    if overlay {
        for row in 0..area.height as usize {
            for col in 0..area.width as usize {
                if let Some(tint) = tint_for(area.reachable[row * 0x80 + col]) {
                    tint_tile(&mut img, col as u32, row as u32, tint);
                }
            }
        }
    }
    img
}

fn paste(dst: &mut RgbaImage, src: &RgbaImage, ox: u32, oy: u32) {
    for y in 0..src.height() {
        for x in 0..src.width() {
            if ox + x < dst.width() && oy + y < dst.height() {
                *dst.get_pixel_mut(ox + x, oy + y) = *src.get_pixel(x, y);
            }
        }
    }
}

/// Condense rooms into one extended-game atlas: 16 supertiles per row,
/// `row_count` rows starting at `row_start`.
pub fn eg_atlas(
    rooms: &[SharedRoom],
    row_start: u16,
    row_count: u16,
    overlay: bool,
    gamma: bool,
) -> RgbaImage {
    let mut all = RgbaImage::from_pixel(
        16 * 512,
        row_count as u32 * 512,
        Rgba([0, 0, 0, 255]),
    );
    for room in rooms {
        let r = room.lock();
        if !r.is_loaded {
            continue;
        }
        let (row, col) = r.supertile.row_col();
        if row < row_start || row >= row_start + row_count {
            continue;
        }
        let img = room_image(&r, overlay, gamma);
        paste(
            &mut all,
            &img,
            col as u32 * 512,
            (row - row_start) as u32 * 512,
        );
    }
    all
}

/// The light-world and dark-world overworld atlases; each world is an 8x8
/// grid of areas, 512x512 pixels per nominal screen.
pub fn save_ow_atlases(
    areas: &[SharedArea],
    overlay: bool,
    gamma: bool,
    out_dir: &Path,
) -> Result<(), Error> {
    let mut worlds = [
        RgbaImage::from_pixel(4096, 4096, Rgba([0, 0, 0, 255])),
        RgbaImage::from_pixel(4096, 4096, Rgba([0, 0, 0, 255])),
    ];
    for area in areas {
        let a = area.lock();
        if !a.is_loaded {
            continue;
        }
        let img = area_image(&a, overlay, gamma);
        let (row, col) = a.id.row_col();
        let w = if a.id.is_dark() { 1 } else { 0 };
        paste(
            &mut worlds[w],
            &img,
            col as u32 * 0x40 * 8,
            row as u32 * 0x40 * 8,
        );
    }
    worlds[0].save(out_dir.join("ow-lw.png"))?;
    worlds[1].save(out_dir.join("ow-dw.png"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blending_is_bounded() {
        let mut p = Rgba([0, 0, 0, 255]);
        blend(&mut p, TINT_REACHABLE);
        assert!(p.0[0] > 0 && p.0[0] < 255);
        assert_eq!(p.0[3], 255);
    }

    #[test]
    fn tints_track_reachability_codes() {
        assert_eq!(tint_for(0x01), None);
        assert_eq!(tint_for(0x20), Some(TINT_PIT));
        assert_eq!(tint_for(0xFF), Some(TINT_ENTRY));
        assert_eq!(tint_for(0x00), Some(TINT_REACHABLE));
    }
}
