//! Grid-accelerated DBSCAN over 3-component color points.
//!
//! Follows the seed-queue formulation of "DBSCAN Revisited, Revisited"
//! (Schubert et al., 2017) with a uniform spatial grid whose cell side
//! equals the neighborhood radius, so a range query only ever inspects
//! the 3x3x3 cell neighborhood.
//!
//! Cluster identifiers reflect the ascending scan order of seed points,
//! and range queries emit neighbors in cell-loop-then-insertion order.
//! Both orderings are stable contracts relied on for reproducibility.

use crate::distance::distance_squared;
use crate::error::PtError;
use crate::rng::XorShift64;
use crate::Point;

use num_traits::ToPrimitive;

/// Public label for points that belong to no cluster.
pub const NOISE: i32 = -1;
/// Public label for points the scan has not reached. Never present in the
/// output of a completed run.
pub const UNCLASSIFIED: i32 = -2;

/// Per-dimension cell count cap; bounds the dense grid at 16M cells.
const MAX_GRID_DIM: usize = 256;

/// Neutral gray used for clusters that end up with no members.
const EMPTY_CLUSTER_GRAY: f32 = 127.5;

/// Epsilon estimates are clamped to this range, in RGB channel units.
const EPS_MIN: f32 = 5.0;
const EPS_MAX: f32 = 100.0;

/// Fallback epsilon when there is nothing to sample.
const EPS_DEFAULT: f32 = 15.0;

/// Internal tagged label; collapsed to the `i32` sentinel encoding only
/// at the public boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Label {
    /// Not yet visited by the scan.
    Unclassified,
    /// Visited and found to be neither core nor reachable (so far).
    Noise,
    /// Sitting in the expansion queue of the block-local variant.
    Queued,
    /// Member of the cluster with this index.
    Cluster(u32),
}

/// Result of a DBSCAN run.
#[derive(Debug, Clone)]
pub struct DbscanResult {
    /// Label per point: [`NOISE`] or a cluster index in `[0, clusters)`.
    pub labels: Vec<i32>,
    /// Number of clusters found.
    pub clusters: usize,
}

/// Dense uniform 3-D grid with cells of side `eps`.
///
/// The origin is padded by one epsilon below the bounding box minimum and
/// coordinates are clamped into `[0, dims)`, so every point lands in
/// exactly one cell. Occupants are stored in a compact slab: `starts`
/// holds per-cell offsets into `indices`, sized exactly by a counting
/// pass before the fill pass.
struct SpatialGrid {
    origin: Point,
    cell_size: f32,
    dims: usize,
    starts: Vec<u32>,
    indices: Vec<u32>,
}

impl SpatialGrid {
    fn build(points: &[Point], eps: f32) -> Result<Self, PtError> {
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for p in points {
            min[0] = min[0].min(p.c1);
            min[1] = min[1].min(p.c2);
            min[2] = min[2].min(p.c3);
            max[0] = max[0].max(p.c1);
            max[1] = max[1].max(p.c2);
            max[2] = max[2].max(p.c3);
        }

        let max_range = (max[0] - min[0])
            .max(max[1] - min[1])
            .max(max[2] - min[2]);
        let dims = (max_range / eps)
            .ceil()
            .to_usize()
            .unwrap_or(MAX_GRID_DIM)
            .clamp(1, MAX_GRID_DIM);

        let mut grid = Self {
            origin: Point::new(min[0] - eps, min[1] - eps, min[2] - eps),
            cell_size: eps,
            dims,
            starts: Vec::new(),
            indices: Vec::new(),
        };

        let cell_count = dims * dims * dims;
        grid.starts.try_reserve_exact(cell_count + 1)?;
        grid.starts.extend((0..=cell_count).map(|_| 0u32));
        grid.indices.try_reserve_exact(points.len())?;
        grid.indices.extend((0..points.len()).map(|_| 0u32));

        // Counting pass, then prefix sums so starts[c] is the begin
        // offset of cell c.
        for p in points {
            let cell = grid.cell_index(*p);
            grid.starts[cell + 1] += 1;
        }
        for c in 0..cell_count {
            grid.starts[c + 1] += grid.starts[c];
        }

        // Fill pass reuses starts[c] as a write cursor; afterwards each
        // entry holds its cell's end offset, which is the next cell's
        // begin, so one backward shift restores the begin offsets.
        #[allow(clippy::cast_possible_truncation)]
        for (i, p) in points.iter().enumerate() {
            let cell = grid.cell_index(*p);
            let slot = grid.starts[cell] as usize;
            grid.indices[slot] = i as u32;
            grid.starts[cell] += 1;
        }
        for c in (1..=cell_count).rev() {
            grid.starts[c] = grid.starts[c - 1];
        }
        grid.starts[0] = 0;

        Ok(grid)
    }

    #[inline]
    fn axis_coord(&self, component: f32, origin: f32) -> usize {
        ((component - origin) / self.cell_size)
            .to_usize()
            .map_or(0, |c| c.min(self.dims - 1))
    }

    #[inline]
    fn cell_coords(&self, p: Point) -> (usize, usize, usize) {
        (
            self.axis_coord(p.c1, self.origin.c1),
            self.axis_coord(p.c2, self.origin.c2),
            self.axis_coord(p.c3, self.origin.c3),
        )
    }

    #[inline]
    fn cell_index(&self, p: Point) -> usize {
        let (x, y, z) = self.cell_coords(p);
        (x * self.dims + y) * self.dims + z
    }

    #[inline]
    fn cell_occupants(&self, x: usize, y: usize, z: usize) -> &[u32] {
        let cell = (x * self.dims + y) * self.dims + z;
        let begin = self.starts[cell] as usize;
        let end = self.starts[cell + 1] as usize;
        &self.indices[begin..end]
    }

    /// Collect every point within `eps` of point `center` (itself
    /// included) into `out`, in cell-loop-then-insertion order.
    ///
    /// Exact because the cell side equals epsilon: a matching point can
    /// only sit in the 27-cell neighborhood.
    fn neighbors_within(&self, points: &[Point], center: usize, eps_sq: f32, out: &mut Vec<u32>) {
        out.clear();
        let p = points[center];
        let (cx, cy, cz) = self.cell_coords(p);

        for dx in -1i64..=1 {
            let Some(x) = cx.checked_add_signed(dx as isize).filter(|&x| x < self.dims) else {
                continue;
            };
            for dy in -1i64..=1 {
                let Some(y) = cy.checked_add_signed(dy as isize).filter(|&y| y < self.dims)
                else {
                    continue;
                };
                for dz in -1i64..=1 {
                    let Some(z) = cz.checked_add_signed(dz as isize).filter(|&z| z < self.dims)
                    else {
                        continue;
                    };
                    for &j in self.cell_occupants(x, y, z) {
                        if distance_squared(p, points[j as usize]) <= eps_sq {
                            out.push(j);
                        }
                    }
                }
            }
        }
    }
}

/// Bit set over point indices that remembers which bits it touched, so a
/// reset after each cluster expansion clears only those instead of the
/// whole backing array.
struct TouchedBits {
    words: Vec<u64>,
    touched: Vec<u32>,
}

impl TouchedBits {
    fn with_capacity(len: usize) -> Result<Self, PtError> {
        let word_count = len / 64 + 1;
        let mut words = Vec::new();
        words.try_reserve_exact(word_count)?;
        words.extend((0..word_count).map(|_| 0u64));
        Ok(Self {
            words,
            touched: Vec::new(),
        })
    }

    /// Set bit `index`; returns `false` if it was already set.
    #[inline]
    fn insert(&mut self, index: u32) -> bool {
        let word = (index / 64) as usize;
        let mask = 1u64 << (index % 64);
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.touched.push(index);
        true
    }

    #[inline]
    fn reset(&mut self) {
        for &index in &self.touched {
            self.words[(index / 64) as usize] &= !(1u64 << (index % 64));
        }
        self.touched.clear();
    }
}

/// Cluster `points` with neighborhood radius `eps` and core threshold
/// `min_pts` (a point's own membership counts toward the threshold).
///
/// Seed points are visited in ascending index order and cluster
/// identifiers are assigned in that order, so the labeling is fully
/// deterministic. Border points reachable from a core point are promoted
/// out of noise into that core's cluster.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn dbscan_cluster(points: &[Point], eps: f32, min_pts: usize) -> Result<DbscanResult, PtError> {
    if points.is_empty() {
        return Ok(DbscanResult {
            labels: Vec::new(),
            clusters: 0,
        });
    }
    if !eps.is_finite() || eps <= 0.0 {
        return Err(PtError::NonPositiveEpsilon);
    }

    let grid = SpatialGrid::build(points, eps)?;
    let eps_sq = eps * eps;

    let mut labels = Vec::new();
    labels.try_reserve_exact(points.len())?;
    labels.extend((0..points.len()).map(|_| Label::Unclassified));

    let mut in_queue = TouchedBits::with_capacity(points.len())?;
    let mut queue = std::collections::VecDeque::new();
    let mut neighbors = Vec::new();
    let mut cluster = 0u32;

    for i in 0..points.len() {
        if labels[i] != Label::Unclassified {
            continue;
        }

        grid.neighbors_within(points, i, eps_sq, &mut neighbors);
        if neighbors.len() < min_pts {
            labels[i] = Label::Noise;
            continue;
        }

        labels[i] = Label::Cluster(cluster);
        queue.clear();
        for &j in &neighbors {
            if j as usize != i && in_queue.insert(j) {
                queue.push_back(j);
            }
        }

        while let Some(q) = queue.pop_front() {
            let q = q as usize;
            match labels[q] {
                Label::Noise => {
                    // Border point: joins the cluster but never expands.
                    labels[q] = Label::Cluster(cluster);
                }
                Label::Unclassified => {
                    labels[q] = Label::Cluster(cluster);
                    grid.neighbors_within(points, q, eps_sq, &mut neighbors);
                    if neighbors.len() >= min_pts {
                        for &j in &neighbors {
                            if matches!(
                                labels[j as usize],
                                Label::Unclassified | Label::Noise
                            ) && in_queue.insert(j)
                            {
                                queue.push_back(j);
                            }
                        }
                    }
                }
                Label::Queued | Label::Cluster(_) => {}
            }
        }

        in_queue.reset();
        cluster += 1;
    }

    let labels = labels
        .into_iter()
        .map(|label| match label {
            Label::Noise => NOISE,
            Label::Cluster(c) => c as i32,
            Label::Unclassified | Label::Queued => UNCLASSIFIED,
        })
        .collect();

    Ok(DbscanResult {
        labels,
        clusters: cluster as usize,
    })
}

/// Estimate a neighborhood radius from the k-distance elbow.
///
/// Samples up to `sample_size` random points, computes each one's exact
/// `k`-th nearest-neighbor distance with `k = max(1, min_pts - 1)` (the
/// point itself occupies rank 0, so this deviates from the canonical
/// `min_pts`-th distance by one on purpose), sorts the sampled distances
/// and returns the 0.85 quantile clamped to `[5, 100]` RGB units.
///
/// Falls back to `15.0` when there is nothing to sample.
pub fn calculate_eps(
    points: &[Point],
    min_pts: usize,
    sample_size: usize,
    seed: u64,
) -> Result<f32, PtError> {
    let samples = sample_size.min(points.len());
    if samples == 0 || points.len() < 2 {
        return Ok(EPS_DEFAULT);
    }

    let k = min_pts.saturating_sub(1).clamp(1, points.len() - 1);
    let mut rng = XorShift64::new(seed);

    let mut distances = Vec::new();
    distances.try_reserve_exact(points.len())?;
    let mut k_distances = Vec::new();
    k_distances.try_reserve_exact(samples)?;

    for _ in 0..samples {
        let center = points[rng.next_below(points.len())];
        distances.clear();
        distances.extend(points.iter().map(|&p| distance_squared(center, p)));

        // Partial selection of the k+1 smallest; rank 0 is the sampled
        // point itself at distance zero.
        for rank in 0..=k {
            let mut min_idx = rank;
            for j in (rank + 1)..distances.len() {
                if distances[j] < distances[min_idx] {
                    min_idx = j;
                }
            }
            distances.swap(rank, min_idx);
        }
        k_distances.push(distances[k].sqrt());
    }

    k_distances.sort_unstable_by(f32::total_cmp);
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
    let elbow = (0.85 * k_distances.len() as f64) as usize;
    Ok(k_distances[elbow.min(k_distances.len() - 1)].clamp(EPS_MIN, EPS_MAX))
}

/// Reduce labeled points to one centroid per cluster.
///
/// Component sums are accumulated in `f64`. A cluster with no members
/// maps to neutral gray `(127.5, 127.5, 127.5)` so the output is always
/// well-formed.
#[allow(clippy::cast_possible_truncation)]
pub fn calculate_centroids(
    points: &[Point],
    labels: &[i32],
    num_clusters: usize,
) -> Result<Vec<Point>, PtError> {
    let mut sums = Vec::new();
    sums.try_reserve_exact(num_clusters)?;
    sums.extend((0..num_clusters).map(|_| [0f64; 3]));
    let mut counts = Vec::new();
    counts.try_reserve_exact(num_clusters)?;
    counts.extend((0..num_clusters).map(|_| 0u64));

    for (&point, &label) in points.iter().zip(labels) {
        if let Ok(cluster) = usize::try_from(label) {
            if cluster < num_clusters {
                sums[cluster][0] += f64::from(point.c1);
                sums[cluster][1] += f64::from(point.c2);
                sums[cluster][2] += f64::from(point.c3);
                counts[cluster] += 1;
            }
        }
    }

    Ok(sums
        .iter()
        .zip(&counts)
        .map(|(sum, &count)| {
            if count == 0 {
                Point::new(EMPTY_CLUSTER_GRAY, EMPTY_CLUSTER_GRAY, EMPTY_CLUSTER_GRAY)
            } else {
                #[allow(clippy::cast_precision_loss)]
                let inv = 1.0 / count as f64;
                Point::new(
                    (sum[0] * inv) as f32,
                    (sum[1] * inv) as f32,
                    (sum[2] * inv) as f32,
                )
            }
        })
        .collect())
}
