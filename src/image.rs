//! Packed-pixel unpacking and reservoir sampling.
//!
//! Pixels travel as 32-bit words with RGB in the low 24 bits
//! (`R << 16 | G << 8 | B`). The top byte is ignored on input and set to
//! `0xFF` on output so encoders treating the word as ARGB see opaque
//! pixels.

use crate::error::PtError;
use crate::rng::XorShift64;
use crate::Point;

use fxhash::FxHashSet;
use rayon::prelude::*;

/// Alpha tag stamped into the top byte of every packed output pixel.
pub(crate) const ALPHA_OPAQUE: u32 = 0xFF00_0000;

/// Unpack one pixel word into a float triple.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn unpack_pixel(pixel: u32) -> Point {
    Point::new(
        ((pixel >> 16) & 0xFF) as f32,
        ((pixel >> 8) & 0xFF) as f32,
        (pixel & 0xFF) as f32,
    )
}

/// Pack clamped, rounded RGB components into an opaque pixel word.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn pack_pixel(c1: f32, c2: f32, c3: f32) -> u32 {
    let r = (c1 + 0.5).clamp(0.0, 255.0) as u32;
    let g = (c2 + 0.5).clamp(0.0, 255.0) as u32;
    let b = (c3 + 0.5).clamp(0.0, 255.0) as u32;
    ALPHA_OPAQUE | (r << 16) | (g << 8) | b
}

/// Unpack a packed pixel buffer into float points, in parallel.
pub fn extract_pixels(pixels: &[u32]) -> Result<Vec<Point>, PtError> {
    let mut points = Vec::new();
    points.try_reserve_exact(pixels.len())?;
    points.extend((0..pixels.len()).map(|_| Point::default()));
    points
        .par_iter_mut()
        .zip(pixels.par_iter())
        .for_each(|(point, &pixel)| *point = unpack_pixel(pixel));
    Ok(points)
}

/// Reservoir-sample up to `sample_size` points (Vitter's algorithm R).
///
/// Inputs no longer than the sample size are returned as a verbatim
/// copy. Otherwise the first `sample_size` points fill the reservoir and
/// each later point `i` replaces slot `j = draw(0..=i)` when `j` lands
/// inside the reservoir, giving every input index selection probability
/// `sample_size / n`.
pub fn sample_pixels(
    points: &[Point],
    sample_size: usize,
    seed: u64,
) -> Result<Vec<Point>, PtError> {
    let mut sample = Vec::new();
    if points.len() <= sample_size {
        sample.try_reserve_exact(points.len())?;
        sample.extend_from_slice(points);
        return Ok(sample);
    }

    sample.try_reserve_exact(sample_size)?;
    sample.extend_from_slice(&points[..sample_size]);

    let mut rng = XorShift64::new(seed);
    for (i, &point) in points.iter().enumerate().skip(sample_size) {
        let j = rng.next_below(i + 1);
        if j < sample_size {
            sample[j] = point;
        }
    }

    Ok(sample)
}

/// Reservoir-sample directly from packed pixels, fusing the unpack so
/// the full float array is never materialized.
///
/// Draw-for-draw identical to [`extract_pixels`] followed by
/// [`sample_pixels`] with the same seed.
pub fn sample_packed_pixels(
    pixels: &[u32],
    sample_size: usize,
    seed: u64,
) -> Result<Vec<Point>, PtError> {
    let mut sample = Vec::new();
    if pixels.len() <= sample_size {
        sample.try_reserve_exact(pixels.len())?;
        sample.extend(pixels.iter().map(|&p| unpack_pixel(p)));
        return Ok(sample);
    }

    sample.try_reserve_exact(sample_size)?;
    sample.extend(pixels[..sample_size].iter().map(|&p| unpack_pixel(p)));

    let mut rng = XorShift64::new(seed);
    for (i, &pixel) in pixels.iter().enumerate().skip(sample_size) {
        let j = rng.next_below(i + 1);
        if j < sample_size {
            sample[j] = unpack_pixel(pixel);
        }
    }

    Ok(sample)
}

/// Count the distinct colors in a packed pixel buffer, ignoring the
/// alpha byte.
#[must_use]
pub fn count_colors(pixels: &[u32]) -> usize {
    pixels
        .iter()
        .map(|&p| p & 0x00FF_FFFF)
        .collect::<FxHashSet<u32>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_extracts_channels() {
        let p = unpack_pixel(0xFF_12_34_56);
        assert_eq!((p.c1, p.c2, p.c3), (0x12 as f32, 0x34 as f32, 0x56 as f32));
        // Alpha is ignored on input.
        let q = unpack_pixel(0x00_12_34_56);
        assert_eq!((q.c1, q.c2, q.c3), (p.c1, p.c2, p.c3));
    }

    #[test]
    fn pack_rounds_clamps_and_tags_alpha() {
        assert_eq!(pack_pixel(18.0, 52.0, 86.0), 0xFF_12_34_56);
        assert_eq!(pack_pixel(17.6, 52.4, 86.0), 0xFF_12_34_56);
        assert_eq!(pack_pixel(-20.0, 300.0, 0.0), 0xFF_00_FF_00);
    }

    #[test]
    fn extract_matches_unpack() {
        let pixels = [0xFF_00_00_00u32, 0x00_FF_FF_FF, 0xFF_80_40_20];
        let points = extract_pixels(&pixels).unwrap();
        assert_eq!(points.len(), 3);
        for (&pixel, &point) in pixels.iter().zip(&points) {
            let expected = unpack_pixel(pixel);
            assert_eq!((point.c1, point.c2, point.c3), (expected.c1, expected.c2, expected.c3));
        }
    }

    #[test]
    fn short_inputs_are_copied_verbatim() {
        let points = [
            Point::new(1.0, 2.0, 3.0),
            Point::new(4.0, 5.0, 6.0),
        ];
        let sample = sample_pixels(&points, 8, 1).unwrap();
        assert_eq!(sample.len(), 2);
        assert_eq!((sample[1].c1, sample[1].c2, sample[1].c3), (4.0, 5.0, 6.0));
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let points: Vec<Point> = (0..1_000)
            .map(|i| Point::new(i as f32, 0.0, 0.0))
            .collect();
        let a = sample_pixels(&points, 64, 42).unwrap();
        let b = sample_pixels(&points, 64, 42).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.c1, y.c1);
        }
        let c = sample_pixels(&points, 64, 43).unwrap();
        assert!(a.iter().zip(&c).any(|(x, y)| x.c1 != y.c1));
    }

    #[test]
    fn fused_sampling_matches_two_step() {
        let pixels: Vec<u32> = (0..500u32).map(|i| i * 97 % 0x0100_0000).collect();
        let points = extract_pixels(&pixels).unwrap();
        let two_step = sample_pixels(&points, 32, 9).unwrap();
        let fused = sample_packed_pixels(&pixels, 32, 9).unwrap();
        assert_eq!(two_step.len(), fused.len());
        for (a, b) in two_step.iter().zip(&fused) {
            assert_eq!((a.c1, a.c2, a.c3), (b.c1, b.c2, b.c3));
        }
    }

    #[test]
    fn selection_is_roughly_uniform() {
        // Each index should appear with probability sample/n. Run many
        // seeds and check no index is wildly over- or under-selected.
        let n = 200usize;
        let sample_size = 50;
        let runs = 400u64;
        let points: Vec<Point> = (0..n).map(|i| Point::new(i as f32, 0.0, 0.0)).collect();

        let mut hits = vec![0u32; n];
        for seed in 0..runs {
            let sample = sample_pixels(&points, sample_size, seed).unwrap();
            for p in sample {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let idx = p.c1 as usize;
                hits[idx] += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let expected = runs as f64 * sample_size as f64 / n as f64;
        for (i, &h) in hits.iter().enumerate() {
            let ratio = f64::from(h) / expected;
            assert!(
                (0.5..1.5).contains(&ratio),
                "index {i} selected {h} times, expected ~{expected}"
            );
        }
    }

    #[test]
    fn color_counting_ignores_alpha() {
        let pixels = [0xFF_10_20_30u32, 0x00_10_20_30, 0xFF_10_20_31];
        assert_eq!(count_colors(&pixels), 2);
    }
}
