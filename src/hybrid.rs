//! Hybrid density/centroid clustering for palette extraction.
//!
//! The input is partitioned into contiguous blocks; DBSCAN condenses each
//! block into representatives (cluster centroids plus verbatim noise
//! points), then K-Means over the representatives produces the final
//! palette. Blocks are small enough that the quadratic within-block
//! DBSCAN beats building a spatial grid per block.

use crate::dbscan::Label;
use crate::distance::{distance, distance_squared};
use crate::error::PtError;
use crate::kmeans::kmeans_cluster;
use crate::rng::XorShift64;
use crate::Point;

use log::debug;
use rayon::prelude::*;

/// Iteration budgets that replace the caller's `max_iter` above these
/// palette sizes.
const MAX_ITER_ABOVE_100: u32 = 20;
const MAX_ITER_ABOVE_32: u32 = 30;

/// Block-median epsilon estimates are clamped to this range.
const BLOCK_EPS_MIN: f32 = 8.0;
const BLOCK_EPS_MAX: f32 = 30.0;

/// Epsilon fallback when the input is too small to sample blocks.
const BLOCK_EPS_DEFAULT: f32 = 15.0;

/// Blocks sampled by the epsilon estimator.
const EPS_SAMPLE_BLOCKS: usize = 10;

/// Points sampled per block by the epsilon estimator.
const EPS_SAMPLES_PER_BLOCK: usize = 20;

/// Result of a hybrid clustering run.
#[derive(Debug, Clone)]
pub struct HybridResult {
    /// Final palette centroids; at most `k` entries.
    pub centroids: Vec<Point>,
    /// K-Means iterations performed in the second stage.
    pub iterations: u32,
}

/// Count the points of `block` within `eps` of `block[idx]`, itself
/// included.
fn count_neighbors(block: &[Point], idx: usize, eps_sq: f32) -> usize {
    let p = block[idx];
    block
        .iter()
        .filter(|&&q| distance_squared(p, q) <= eps_sq)
        .count()
}

/// Quadratic DBSCAN over one block, reduced to representatives: the
/// centroid of every cluster in cluster order, then every noise point
/// verbatim in index order.
#[allow(clippy::cast_possible_truncation)]
fn block_representatives(block: &[Point], eps: f32, min_pts: usize) -> Vec<Point> {
    if block.is_empty() {
        return Vec::new();
    }

    let eps_sq = eps * eps;
    let mut labels = vec![Label::Unclassified; block.len()];
    let mut queue: Vec<u32> = Vec::new();
    let mut clusters = 0u32;

    for i in 0..block.len() {
        if labels[i] != Label::Unclassified {
            continue;
        }

        if count_neighbors(block, i, eps_sq) < min_pts {
            labels[i] = Label::Noise;
            continue;
        }

        labels[i] = Label::Cluster(clusters);
        queue.clear();
        let pi = block[i];
        for (j, &q) in block.iter().enumerate() {
            if j != i
                && labels[j] == Label::Unclassified
                && distance_squared(pi, q) <= eps_sq
            {
                labels[j] = Label::Queued;
                queue.push(j as u32);
            }
        }

        let mut head = 0;
        while head < queue.len() {
            let q = queue[head] as usize;
            head += 1;

            if labels[q] == Label::Noise {
                labels[q] = Label::Cluster(clusters);
                continue;
            }
            labels[q] = Label::Cluster(clusters);

            if count_neighbors(block, q, eps_sq) >= min_pts {
                let pq = block[q];
                for (j, &p) in block.iter().enumerate() {
                    if labels[j] == Label::Unclassified && distance_squared(pq, p) <= eps_sq {
                        labels[j] = Label::Queued;
                        queue.push(j as u32);
                    }
                }
            }
        }

        clusters += 1;
    }

    let mut representatives = Vec::new();
    for c in 0..clusters {
        let mut sum = [0f64; 3];
        let mut count = 0u64;
        for (&point, &label) in block.iter().zip(&labels) {
            if label == Label::Cluster(c) {
                sum[0] += f64::from(point.c1);
                sum[1] += f64::from(point.c2);
                sum[2] += f64::from(point.c3);
                count += 1;
            }
        }
        if count > 0 {
            #[allow(clippy::cast_precision_loss)]
            let inv = 1.0 / count as f64;
            representatives.push(Point::new(
                (sum[0] * inv) as f32,
                (sum[1] * inv) as f32,
                (sum[2] * inv) as f32,
            ));
        }
    }
    for (&point, &label) in block.iter().zip(&labels) {
        if label == Label::Noise {
            representatives.push(point);
        }
    }

    representatives
}

/// Extract a `k`-color palette from `points`.
///
/// For inputs no larger than two blocks the representative stage is
/// skipped and K-Means runs directly. Otherwise each `block_size` chunk
/// is condensed by DBSCAN in parallel, representatives are concatenated
/// in block order, padded with seed-driven uniform draws from the input
/// when fewer than `k` remain, and clustered.
///
/// The caller's `max_iter` is overridden to 20 sweeps for `k > 100` and
/// to 30 for `k > 32`.
pub fn hybrid_cluster(
    points: &[Point],
    k: usize,
    block_size: usize,
    eps: f32,
    min_pts: usize,
    max_iter: u32,
    threshold: f32,
    seed: u64,
) -> Result<HybridResult, PtError> {
    if points.is_empty() || k == 0 {
        return Ok(HybridResult {
            centroids: Vec::new(),
            iterations: 0,
        });
    }
    if block_size == 0 {
        return Err(PtError::ZeroBlockSize);
    }
    if !eps.is_finite() || eps <= 0.0 {
        return Err(PtError::NonPositiveEpsilon);
    }
    let k = k.min(points.len());

    let max_iter = if k > 100 {
        MAX_ITER_ABOVE_100
    } else if k > 32 {
        MAX_ITER_ABOVE_32
    } else {
        max_iter
    };

    if points.len() <= block_size.saturating_mul(2) {
        let result = kmeans_cluster(points, k, max_iter, threshold, seed)?;
        return Ok(HybridResult {
            centroids: result.centroids,
            iterations: result.iterations,
        });
    }

    // Per-block results are collected into pre-ordered slots, so the
    // concatenation below is deterministic regardless of which worker
    // finishes first.
    let per_block: Vec<Vec<Point>> = points
        .par_chunks(block_size)
        .map(|block| block_representatives(block, eps, min_pts))
        .collect();

    let total: usize = per_block.iter().map(Vec::len).sum();
    debug!(
        "condensed {} points into {total} representatives across {} blocks",
        points.len(),
        per_block.len()
    );
    let mut representatives = Vec::new();
    representatives.try_reserve_exact(total.max(k))?;
    for block in per_block {
        representatives.extend(block);
    }

    if representatives.len() < k {
        let mut rng = XorShift64::new(seed);
        while representatives.len() < k {
            representatives.push(points[rng.next_below(points.len())]);
        }
    }

    let result = kmeans_cluster(&representatives, k, max_iter, threshold, seed)?;
    Ok(HybridResult {
        centroids: result.centroids,
        iterations: result.iterations,
    })
}

/// Estimate a DBSCAN radius for [`hybrid_cluster`] from the data.
///
/// Samples up to ten random blocks; within each, the median `k`-distance
/// over up to twenty random points stands in for the block's density.
/// The block medians are averaged and clamped to `[8, 30]`. Inputs no
/// larger than one block fall back to `15.0`.
#[allow(clippy::cast_precision_loss)]
pub fn calculate_block_eps(
    points: &[Point],
    block_size: usize,
    min_pts: usize,
    seed: u64,
) -> f32 {
    if block_size == 0 || points.len() <= block_size {
        return BLOCK_EPS_DEFAULT;
    }

    let mut rng = XorShift64::new(seed);
    let num_blocks = (points.len() + block_size - 1) / block_size;
    let sample_blocks = num_blocks.min(EPS_SAMPLE_BLOCKS);

    let mut total = 0f32;
    let mut distances = Vec::new();
    let mut k_distances = Vec::new();

    for _ in 0..sample_blocks {
        let block_idx = rng.next_below(num_blocks);
        let start = block_idx * block_size;
        let end = (start + block_size).min(points.len());
        let block = &points[start..end];

        if block.len() <= min_pts || block.len() < 2 {
            total += BLOCK_EPS_DEFAULT;
            continue;
        }

        let k = min_pts.saturating_sub(1).clamp(1, block.len() - 1);
        let samples = block.len().min(EPS_SAMPLES_PER_BLOCK);

        k_distances.clear();
        for _ in 0..samples {
            let center = block[rng.next_below(block.len())];
            distances.clear();
            distances.extend(block.iter().map(|&p| distance(center, p)));

            for rank in 0..=k {
                let mut min_idx = rank;
                for j in (rank + 1)..distances.len() {
                    if distances[j] < distances[min_idx] {
                        min_idx = j;
                    }
                }
                distances.swap(rank, min_idx);
            }
            k_distances.push(distances[k]);
        }

        k_distances.sort_unstable_by(f32::total_cmp);
        total += k_distances[k_distances.len() / 2];
    }

    (total / sample_blocks as f32).clamp(BLOCK_EPS_MIN, BLOCK_EPS_MAX)
}
