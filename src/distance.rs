//! Distance kernels for clustering and palette remapping.
//!
//! Clustering always uses the plain squared Euclidean metric; the
//! perceptually weighted metric exists solely for palette remapping and
//! must never leak into K-Means or DBSCAN.

use crate::Point;

use rayon::prelude::*;

/// Number of centroids processed per iteration of the unrolled
/// nearest-centroid scan.
const LANES: usize = 4;

/// Squared Euclidean distance between two points.
#[inline]
#[must_use]
pub fn distance_squared(a: Point, b: Point) -> f32 {
    let d1 = a.c1 - b.c1;
    let d2 = a.c2 - b.c2;
    let d3 = a.c3 - b.c3;
    d1 * d1 + d2 * d2 + d3 * d3
}

/// Euclidean distance between two points.
#[inline]
#[must_use]
pub fn distance(a: Point, b: Point) -> f32 {
    distance_squared(a, b).sqrt()
}

/// Perceptually weighted squared distance used by palette remapping.
///
/// The channel weights depend on the average red component of the pair:
/// below 128 the weights are `(2, 4, 3)`, otherwise `(3, 4, 2)`. Green is
/// always weighted heaviest, matching human luminance sensitivity.
#[inline]
#[must_use]
pub fn perceptual_distance_squared(a: Point, b: Point) -> f32 {
    let d1 = a.c1 - b.c1;
    let d2 = a.c2 - b.c2;
    let d3 = a.c3 - b.c3;
    let avg_r = (a.c1 + b.c1) * 0.5;
    let (wr, wb) = if avg_r < 128.0 { (2.0, 3.0) } else { (3.0, 2.0) };
    wr * d1 * d1 + 4.0 * d2 * d2 + wb * d3 * d3
}

/// Scan `centroids` for the entry closest to `point` under `metric`.
///
/// Processes [`LANES`] centroids per iteration with a scalar remainder.
/// Ties are broken toward the lower index: the comparison is strictly
/// `<` and lanes are visited in index order.
#[inline]
fn nearest_by<M: Fn(Point, Point) -> f32>(point: Point, centroids: &[Point], metric: M) -> usize {
    let mut nearest = 0;
    let mut min_dist = f32::INFINITY;
    let mut base = 0;

    let mut chunks = centroids.chunks_exact(LANES);
    for chunk in chunks.by_ref() {
        let dists = [
            metric(point, chunk[0]),
            metric(point, chunk[1]),
            metric(point, chunk[2]),
            metric(point, chunk[3]),
        ];
        for (lane, &dist) in dists.iter().enumerate() {
            if dist < min_dist {
                min_dist = dist;
                nearest = base + lane;
            }
        }
        base += LANES;
    }

    for (lane, &centroid) in chunks.remainder().iter().enumerate() {
        let dist = metric(point, centroid);
        if dist < min_dist {
            min_dist = dist;
            nearest = base + lane;
        }
    }

    nearest
}

/// Index of the centroid nearest to `point` under squared Euclidean
/// distance. `centroids` must not be empty.
#[inline]
#[must_use]
pub fn find_nearest(point: Point, centroids: &[Point]) -> usize {
    nearest_by(point, centroids, distance_squared)
}

/// Index of the palette entry nearest to `point` under the perceptually
/// weighted metric. `palette` must not be empty.
#[inline]
#[must_use]
pub fn find_nearest_perceptual(point: Point, palette: &[Point]) -> usize {
    nearest_by(point, palette, perceptual_distance_squared)
}

/// Assign every point to its nearest centroid, in parallel.
///
/// `assignments` is updated in place and must be the same length as
/// `points`. The return value is the number of points whose assignment
/// changed, which the Lloyd loop uses as a convergence signal.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn assign_points_batch(points: &[Point], centroids: &[Point], assignments: &mut [i32]) -> usize {
    points
        .par_iter()
        .zip(assignments.par_iter_mut())
        .map(|(&point, slot)| {
            let nearest = find_nearest(point, centroids) as i32;
            if *slot == nearest {
                0
            } else {
                *slot = nearest;
                1
            }
        })
        .sum()
}
