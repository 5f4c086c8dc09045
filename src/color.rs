//! Batch conversion between RGB and CIELAB color spaces.
//!
//! The clustering engine is color-space agnostic; these helpers let a
//! caller run it over CIELAB points (where Euclidean distance tracks
//! perceived difference better) and convert the resulting centroids
//! back. Conversion goes through the `palette` crate with its default
//! D65 reference white.

use crate::Point;

use palette::white_point::D65;
use palette::{FromColor, Lab, Srgb};
use rayon::prelude::*;

/// Inputs below this length are converted serially; spawning workers
/// costs more than the arithmetic.
const PARALLEL_CUTOFF: usize = 1024;

#[inline]
fn rgb_to_lab(p: Point) -> Point {
    let rgb = Srgb::new(p.c1 / 255.0, p.c2 / 255.0, p.c3 / 255.0);
    let lab = Lab::<D65, f32>::from_color(rgb);
    Point::new(lab.l, lab.a, lab.b)
}

#[inline]
fn lab_to_rgb(p: Point) -> Point {
    let lab = Lab::<D65, f32>::new(p.c1, p.c2, p.c3);
    let rgb = Srgb::from_color(lab);
    Point::new(
        (rgb.red * 255.0).clamp(0.0, 255.0),
        (rgb.green * 255.0).clamp(0.0, 255.0),
        (rgb.blue * 255.0).clamp(0.0, 255.0),
    )
}

/// Convert RGB points (components in 0–255) to CIELAB.
#[must_use]
pub fn rgb_to_lab_batch(points: &[Point]) -> Vec<Point> {
    if points.len() < PARALLEL_CUTOFF {
        points.iter().map(|&p| rgb_to_lab(p)).collect()
    } else {
        points.par_iter().map(|&p| rgb_to_lab(p)).collect()
    }
}

/// Convert CIELAB points back to RGB, clamped into the 0–255 gamut.
#[must_use]
pub fn lab_to_rgb_batch(points: &[Point]) -> Vec<Point> {
    if points.len() < PARALLEL_CUTOFF {
        points.iter().map(|&p| lab_to_rgb(p)).collect()
    } else {
        points.par_iter().map(|&p| lab_to_rgb(p)).collect()
    }
}
