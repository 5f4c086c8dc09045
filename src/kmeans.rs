//! K-Means clustering over 3-component color points.
//!
//! Centroids are seeded with K-Means++ and refined by Lloyd iteration.
//! Every random draw comes from the caller's seed, so a run is a pure
//! function of `(points, parameters, seed)`.

use crate::distance::{assign_points_batch, distance_squared};
use crate::error::PtError;
use crate::rng::XorShift64;
use crate::Point;

use log::debug;

/// Above this cluster count, K-Means++ switches to strided seeding to cap
/// the O(n·k) initialization cost.
const STRIDED_INIT_THRESHOLD: usize = 64;

/// Result of a K-Means run.
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Final centroids; at most `k` entries, fewer when `k > n`.
    pub centroids: Vec<Point>,
    /// Cluster index per input point, each in `[0, centroids.len())`.
    pub labels: Vec<i32>,
    /// Lloyd iterations performed, counting the terminating sweep.
    /// `0` means the input was empty or `k` was `0`.
    pub iterations: u32,
}

impl KMeansResult {
    const fn empty() -> Self {
        Self {
            centroids: Vec::new(),
            labels: Vec::new(),
            iterations: 0,
        }
    }
}

/// Seed `k` centroids from `points` with K-Means++ D² weighting.
///
/// The first centroid is drawn uniformly. Each subsequent draw weights
/// every point by its squared distance to the nearest centroid chosen so
/// far, favoring spread-out seeds.
///
/// For `k` above [`STRIDED_INIT_THRESHOLD`] the D² pass is replaced by a
/// strided draw (one uniform pick per contiguous stride of the input).
/// This changes the statistical initialization, not the seed discipline:
/// the same seed still yields the same centroids. It is a performance
/// bypass, not a contract.
///
/// `points` must not be empty and `k` must satisfy `1 <= k <= points.len()`.
pub fn init_plusplus(points: &[Point], k: usize, rng: &mut XorShift64) -> Result<Vec<Point>, PtError> {
    let mut centroids = Vec::new();
    centroids.try_reserve_exact(k)?;

    if k > STRIDED_INIT_THRESHOLD {
        let stride = points.len() / k;
        for c in 0..k {
            let start = c * stride;
            let len = if c == k - 1 {
                points.len() - start
            } else {
                stride
            };
            centroids.push(points[start + rng.next_below(len)]);
        }
        return Ok(centroids);
    }

    centroids.push(points[rng.next_below(points.len())]);

    let mut dist_to_nearest = Vec::new();
    dist_to_nearest.try_reserve_exact(points.len())?;
    dist_to_nearest.extend((0..points.len()).map(|_| 0f32));

    for _ in 1..k {
        let mut total = 0f32;
        for (slot, &point) in dist_to_nearest.iter_mut().zip(points) {
            let mut min_dist = f32::INFINITY;
            for &centroid in &centroids {
                let d = distance_squared(point, centroid);
                if d < min_dist {
                    min_dist = d;
                }
            }
            *slot = min_dist;
            total += min_dist;
        }

        // Weighted selection: walk the cumulative distribution and take
        // the first point crossing the threshold. Falls back to the last
        // point if rounding lets the scan run off the end.
        #[allow(clippy::cast_possible_truncation)]
        let threshold = (rng.next_f64() * f64::from(total)) as f32;
        let mut cumulative = 0f32;
        let mut selected = points.len() - 1;
        for (i, &d) in dist_to_nearest.iter().enumerate() {
            cumulative += d;
            if cumulative >= threshold {
                selected = i;
                break;
            }
        }
        centroids.push(points[selected]);
    }

    Ok(centroids)
}

/// Recompute each centroid as the mean of its members and return the
/// largest distance any centroid moved.
///
/// Sums are accumulated in `f64` so clusters larger than 2²⁴ points do
/// not lose counts to float rounding. An empty cluster is repaired by
/// re-seeding it with a random point drawn from `salt`; the Lloyd loop
/// salts with `seed + iteration` so repeated repairs stay deterministic
/// without repeating the same pick.
#[allow(clippy::cast_possible_truncation)]
pub fn update_centroids(
    points: &[Point],
    labels: &[i32],
    centroids: &mut [Point],
    salt: u64,
) -> f32 {
    let k = centroids.len();
    let mut rng = XorShift64::new(salt);
    let mut sums = vec![[0f64; 3]; k];
    let mut counts = vec![0u64; k];

    for (&point, &label) in points.iter().zip(labels) {
        if let Ok(cluster) = usize::try_from(label) {
            if cluster < k {
                sums[cluster][0] += f64::from(point.c1);
                sums[cluster][1] += f64::from(point.c2);
                sums[cluster][2] += f64::from(point.c3);
                counts[cluster] += 1;
            }
        }
    }

    let mut max_movement = 0f32;
    for (cluster, centroid) in centroids.iter_mut().enumerate() {
        let updated = if counts[cluster] > 0 {
            #[allow(clippy::cast_precision_loss)]
            let inv = 1.0 / counts[cluster] as f64;
            Point::new(
                (sums[cluster][0] * inv) as f32,
                (sums[cluster][1] * inv) as f32,
                (sums[cluster][2] * inv) as f32,
            )
        } else {
            points[rng.next_below(points.len())]
        };

        let movement = distance_squared(*centroid, updated);
        if movement > max_movement {
            max_movement = movement;
        }
        *centroid = updated;
    }

    max_movement.sqrt()
}

/// Cluster `points` into `k` groups.
///
/// Iterates until the largest centroid movement drops below `threshold`,
/// no assignment changes, or `max_iter` sweeps have run. `k` is reduced
/// to `points.len()` when it exceeds the input size. An empty input or
/// `k == 0` yields an empty result with `iterations == 0`.
pub fn kmeans_cluster(
    points: &[Point],
    k: usize,
    max_iter: u32,
    threshold: f32,
    seed: u64,
) -> Result<KMeansResult, PtError> {
    if points.is_empty() || k == 0 {
        return Ok(KMeansResult::empty());
    }
    let k = k.min(points.len());

    let mut rng = XorShift64::new(seed);
    let mut centroids = init_plusplus(points, k, &mut rng)?;

    let mut labels = Vec::new();
    labels.try_reserve_exact(points.len())?;
    labels.extend((0..points.len()).map(|_| 0i32));

    let mut iterations = 0;
    for iter in 0..max_iter {
        let changed = assign_points_batch(points, &centroids, &mut labels);
        let movement = update_centroids(points, &labels, &mut centroids, seed + u64::from(iter));
        iterations = iter + 1;
        if movement < threshold || changed == 0 {
            debug!("k-means converged after {iterations} of {max_iter} iterations");
            break;
        }
    }

    Ok(KMeansResult {
        centroids,
        labels,
        iterations,
    })
}
