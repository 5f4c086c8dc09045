//! Palette remapping: recolor an image under an exemplar palette.
//!
//! Both modes find the perceptually nearest entry of the *target*
//! palette for each pixel, then substitute the aligned *source* entry.
//! Resynthesis adds back the pixel's residual against the target entry,
//! preserving local contrast; posterize discards it.
//!
//! Nearest-entry lookups go through a dense 3-D table over a
//! downsampled RGB cube. Above [`LUT_MAX_PALETTE`] entries the table
//! stops paying for itself and the scan runs per pixel instead.

use crate::distance::find_nearest_perceptual;
use crate::error::PtError;
use crate::image::{pack_pixel, unpack_pixel};
use crate::Point;

use rayon::prelude::*;

/// Bits kept per channel when quantizing a pixel into the table.
pub(crate) const LUT_BITS: u32 = 7;
/// Table side length per dimension.
pub(crate) const LUT_DIM: usize = 1 << LUT_BITS;
/// Total table entries (`LUT_DIM`³).
pub(crate) const LUT_SIZE: usize = LUT_DIM * LUT_DIM * LUT_DIM;
/// Channel value represented by one table step.
#[allow(clippy::cast_precision_loss)]
pub(crate) const LUT_SCALE: f32 = 255.0 / (LUT_DIM - 1) as f32;
/// Right shift taking an 8-bit channel to its table coordinate.
pub(crate) const LUT_SHIFT: u32 = 8 - LUT_BITS;
/// Largest palette the table is built for; beyond this the entries
/// outnumber likely queries and the direct scan wins.
pub(crate) const LUT_MAX_PALETTE: usize = 4096;

/// Table slot for a packed pixel. The explicit shift packing is shared
/// with the device kernels and must not change shape.
#[inline]
pub(crate) fn lut_index(pixel: u32) -> usize {
    let r = ((pixel >> 16) & 0xFF) as usize;
    let g = ((pixel >> 8) & 0xFF) as usize;
    let b = (pixel & 0xFF) as usize;
    ((r >> LUT_SHIFT) << (2 * LUT_BITS)) | ((g >> LUT_SHIFT) << LUT_BITS) | (b >> LUT_SHIFT)
}

/// Build the nearest-entry table for `target_palette`.
///
/// Each slot holds the palette index perceptually nearest to the slot's
/// representative color `(r·scale, g·scale, b·scale)`. The table is a
/// pure function of the palette, so rebuilding with the same palette
/// yields the same bytes.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn build_lut(target_palette: &[Point]) -> Result<Vec<u16>, PtError> {
    if target_palette.is_empty() {
        return Err(PtError::EmptyPalette);
    }
    if target_palette.len() > usize::from(u16::MAX) {
        return Err(PtError::PaletteTooLarge);
    }

    let mut lut = Vec::new();
    lut.try_reserve_exact(LUT_SIZE)?;
    lut.extend((0..LUT_SIZE).map(|_| 0u16));

    lut.par_chunks_mut(LUT_DIM * LUT_DIM)
        .enumerate()
        .for_each(|(ri, plane)| {
            let r = ri as f32 * LUT_SCALE;
            for (gi, row) in plane.chunks_mut(LUT_DIM).enumerate() {
                let g = gi as f32 * LUT_SCALE;
                for (bi, slot) in row.iter_mut().enumerate() {
                    let b = bi as f32 * LUT_SCALE;
                    *slot =
                        find_nearest_perceptual(Point::new(r, g, b), target_palette) as u16;
                }
            }
        });

    Ok(lut)
}

/// Compute one output pixel from its matched palette pair.
#[inline]
fn substitute(point: Point, target: Point, source: Point, keep_residual: bool) -> u32 {
    if keep_residual {
        pack_pixel(
            source.c1 + point.c1 - target.c1,
            source.c2 + point.c2 - target.c2,
            source.c3 + point.c3 - target.c3,
        )
    } else {
        pack_pixel(source.c1, source.c2, source.c3)
    }
}

fn remap(
    pixels: &[u32],
    width: usize,
    height: usize,
    target_palette: &[Point],
    source_palette: &[Point],
    keep_residual: bool,
) -> Result<Vec<u32>, PtError> {
    if target_palette.len() != source_palette.len() {
        return Err(PtError::MismatchedPalettes);
    }
    if target_palette.is_empty() {
        return Err(PtError::EmptyPalette);
    }
    if width.checked_mul(height) != Some(pixels.len()) {
        return Err(PtError::MismatchedPixelBuffer);
    }

    let mut output = Vec::new();
    output.try_reserve_exact(pixels.len())?;
    output.extend((0..pixels.len()).map(|_| 0u32));

    if target_palette.len() <= LUT_MAX_PALETTE {
        let lut = build_lut(target_palette)?;
        output
            .par_iter_mut()
            .zip(pixels.par_iter())
            .for_each(|(slot, &pixel)| {
                let index = usize::from(lut[lut_index(pixel)]);
                *slot = substitute(
                    unpack_pixel(pixel),
                    target_palette[index],
                    source_palette[index],
                    keep_residual,
                );
            });
    } else {
        output
            .par_iter_mut()
            .zip(pixels.par_iter())
            .for_each(|(slot, &pixel)| {
                let point = unpack_pixel(pixel);
                let index = find_nearest_perceptual(point, target_palette);
                *slot = substitute(
                    point,
                    target_palette[index],
                    source_palette[index],
                    keep_residual,
                );
            });
    }

    Ok(output)
}

/// Recolor `pixels` under `source_palette`, preserving each pixel's
/// offset from its matched `target_palette` entry.
///
/// The palettes must be aligned pairs of equal length: index `i` of the
/// source corresponds to index `i` of the target.
pub fn resynthesize_image(
    pixels: &[u32],
    width: usize,
    height: usize,
    target_palette: &[Point],
    source_palette: &[Point],
) -> Result<Vec<u32>, PtError> {
    remap(pixels, width, height, target_palette, source_palette, true)
}

/// Replace every pixel with its matched `source_palette` entry exactly,
/// discarding texture.
pub fn posterize_image(
    pixels: &[u32],
    width: usize,
    height: usize,
    target_palette: &[Point],
    source_palette: &[Point],
) -> Result<Vec<u32>, PtError> {
    remap(pixels, width, height, target_palette, source_palette, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::XorShift64;

    // Well-separated integer palette; consecutive entries differ by 16
    // in the red channel alone, so LUT quantization can never flip a
    // nearest-entry decision.
    fn spread_palette(len: usize) -> Vec<Point> {
        (0..len)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                Point::new(
                    (i * 16 + 8) as f32,
                    ((i * 13 + 30) % 256) as f32,
                    ((i * 29) % 256) as f32,
                )
            })
            .collect()
    }

    fn random_pixels(n: usize, seed: u64) -> Vec<u32> {
        let mut rng = XorShift64::new(seed);
        (0..n)
            .map(|_| {
                #[allow(clippy::cast_possible_truncation)]
                let word = (rng.next_u64() & 0x00FF_FFFF) as u32;
                word
            })
            .collect()
    }

    fn channels(pixel: u32) -> [i32; 3] {
        [
            ((pixel >> 16) & 0xFF) as i32,
            ((pixel >> 8) & 0xFF) as i32,
            (pixel & 0xFF) as i32,
        ]
    }

    #[test]
    fn lut_shape_and_determinism() {
        let palette = spread_palette(9);
        let a = build_lut(&palette).unwrap();
        let b = build_lut(&palette).unwrap();
        assert_eq!(a.len(), LUT_SIZE);
        assert_eq!(a, b);
        let max = usize::from(*a.iter().max().unwrap());
        assert!(max < palette.len());
    }

    #[test]
    fn lut_agrees_with_direct_scan_on_grid_colors() {
        // On exact grid colors there is no quantization error, so the
        // table must reproduce the direct scan.
        let palette = spread_palette(12);
        let lut = build_lut(&palette).unwrap();
        for ri in (0..LUT_DIM).step_by(7) {
            for gi in (0..LUT_DIM).step_by(11) {
                for bi in (0..LUT_DIM).step_by(13) {
                    #[allow(clippy::cast_precision_loss)]
                    let point = Point::new(
                        ri as f32 * LUT_SCALE,
                        gi as f32 * LUT_SCALE,
                        bi as f32 * LUT_SCALE,
                    );
                    let direct = find_nearest_perceptual(point, &palette);
                    let slot = (ri << (2 * LUT_BITS)) | (gi << LUT_BITS) | bi;
                    assert_eq!(usize::from(lut[slot]), direct);
                }
            }
        }
    }

    #[test]
    fn empty_and_mismatched_palettes_are_rejected() {
        let pixels = [0u32; 4];
        let palette = spread_palette(2);
        assert!(build_lut(&[]).is_err());
        assert!(resynthesize_image(&pixels, 2, 2, &[], &[]).is_err());
        assert!(resynthesize_image(&pixels, 2, 2, &palette, &palette[..1]).is_err());
        assert!(resynthesize_image(&pixels, 2, 3, &palette, &palette).is_err());
    }

    #[test]
    fn single_color_identity() {
        // An image of one color remapped from [c] to [c] is unchanged.
        let color = 0x00_64_C8_32u32;
        let pixels = vec![color; 64];
        let palette = [Point::new(100.0, 200.0, 50.0)];
        let out = resynthesize_image(&pixels, 8, 8, &palette, &palette).unwrap();
        for &p in &out {
            assert_eq!(p, 0xFF_64_C8_32);
        }
    }

    #[test]
    fn identical_palettes_reproduce_any_image() {
        let pixels = random_pixels(4_096, 77);
        let palette = spread_palette(16);
        let out = resynthesize_image(&pixels, 64, 64, &palette, &palette).unwrap();
        for (&before, &after) in pixels.iter().zip(&out) {
            let b = channels(before);
            let a = channels(after);
            for c in 0..3 {
                assert!((a[c] - b[c]).abs() <= 1, "{before:08x} -> {after:08x}");
            }
        }
    }

    #[test]
    fn posterize_output_is_drawn_from_source_palette() {
        let pixels = random_pixels(1_024, 3);
        let target = spread_palette(8);
        let source: Vec<Point> = target
            .iter()
            .map(|&p| Point::new(255.0 - p.c1, p.c2, p.c3))
            .collect();
        let out = posterize_image(&pixels, 32, 32, &target, &source).unwrap();
        let allowed: Vec<u32> = source
            .iter()
            .map(|&p| pack_pixel(p.c1, p.c2, p.c3))
            .collect();
        for &p in &out {
            assert!(allowed.contains(&p), "{p:08x} not a palette color");
        }
    }

    #[test]
    fn posterize_is_idempotent() {
        let pixels = random_pixels(2_048, 9);
        let target = spread_palette(16);
        let source = spread_palette(16);
        let once = posterize_image(&pixels, 64, 32, &target, &source).unwrap();
        let twice = posterize_image(&once, 64, 32, &source, &source).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn lut_threshold_paths_agree() {
        // 4096 entries uses the table, 4097 scans directly. With the
        // 4097th entry duplicating the first, both palettes describe the
        // same colors, so the outputs must agree to the rounding step.
        let mut rng = XorShift64::new(41);
        let mut target: Vec<Point> = (0..LUT_MAX_PALETTE)
            .map(|_| {
                #[allow(clippy::cast_precision_loss)]
                Point::new(
                    rng.next_below(256) as f32,
                    rng.next_below(256) as f32,
                    rng.next_below(256) as f32,
                )
            })
            .collect();
        let pixels = random_pixels(2_048, 17);

        let with_lut = resynthesize_image(&pixels, 64, 32, &target, &target).unwrap();
        target.push(target[0]);
        let direct = resynthesize_image(&pixels, 64, 32, &target, &target).unwrap();

        for (&a, &b) in with_lut.iter().zip(&direct) {
            let ca = channels(a);
            let cb = channels(b);
            for c in 0..3 {
                assert!((ca[c] - cb[c]).abs() <= 1, "{a:08x} vs {b:08x}");
            }
        }
    }

    #[test]
    fn residual_is_preserved_in_resynthesis() {
        // Pixel sits 10 units redder than the target entry; the output
        // must sit 10 units redder than the source entry.
        let pixels = [0x00_6E_64_64u32]; // (110, 100, 100)
        let target = [Point::new(100.0, 100.0, 100.0)];
        let source = [Point::new(40.0, 60.0, 80.0)];
        let out = resynthesize_image(&pixels, 1, 1, &target, &source).unwrap();
        assert_eq!(channels(out[0]), [50, 60, 80]);
    }
}
