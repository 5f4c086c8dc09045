//! Color palette extraction and image recoloring.
//!
//! The crate derives a representative palette from an image with a
//! hybrid clustering pipeline (per-block DBSCAN condensing pixels into
//! representatives, K-Means over the representatives) and applies one
//! image's palette to another under a perceptually weighted
//! nearest-color metric, accelerated by a precomputed lookup table.
//!
//! Every stochastic stage takes a 64-bit seed and is deterministic for
//! a given `(input, seed)` pair.
//!
//! ## Usage
//!
//! Extract a palette from packed pixels and posterize with it:
//!
//! ```
//! use palette_transfer::{extract_pixels, hybrid_cluster, posterize_image};
//!
//! # fn main() -> Result<(), palette_transfer::error::PtError> {
//! // A 2x2 image: two reds, two blues.
//! let pixels = [0xFFD0_2020u32, 0xFFD0_2020, 0xFF20_30C0, 0xFF20_30C0];
//! let points = extract_pixels(&pixels)?;
//! let palette = hybrid_cluster(&points, 2, 256, 10.0, 4, 50, 0.1, 7)?.centroids;
//! let out = posterize_image(&pixels, 2, 2, &palette, &palette)?;
//! assert_eq!(out.len(), 4);
//! # Ok(())
//! # }
//! ```
//!
//! Transfer one palette onto another image, preserving texture:
//!
//! ```
//! use palette_transfer::{resynthesize_image, Point};
//!
//! # fn main() -> Result<(), palette_transfer::error::PtError> {
//! let image = [0xFF64_6464u32; 9];
//! let target = [Point::new(100.0, 100.0, 100.0)];
//! let source = [Point::new(180.0, 140.0, 60.0)];
//! let recolored = resynthesize_image(&image, 3, 3, &target, &source)?;
//! assert_eq!(recolored[0], 0xFFB4_8C3C);
//! # Ok(())
//! # }
//! ```
#![forbid(
    absolute_paths_not_starting_with_crate,
    missing_docs,
    non_ascii_idents,
    noop_method_call,
    unused_results
)]
#![deny(unsafe_code)]
#![warn(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

pub mod color;
pub mod dbscan;
pub mod distance;
pub mod error;
pub mod hybrid;
pub mod image;
pub mod kmeans;
#[cfg(feature = "opencl")]
#[allow(unsafe_code)]
pub mod opencl;
pub mod remap;
pub mod rng;

pub use dbscan::{dbscan_cluster, DbscanResult};
pub use hybrid::{hybrid_cluster, HybridResult};
pub use image::{extract_pixels, sample_pixels};
pub use kmeans::{kmeans_cluster, KMeansResult};
pub use remap::{posterize_image, resynthesize_image};

/// A point in a 3-component color space.
///
/// Components are interpreted as RGB in the 0–255 range or as CIELAB;
/// the clustering engine treats both uniformly.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    /// First component, `R` or `L*`.
    pub c1: f32,
    /// Second component, `G` or `a*`.
    pub c2: f32,
    /// Third component, `B` or `b*`.
    pub c3: f32,
}

impl Point {
    /// Create a point from its three components.
    #[inline]
    #[must_use]
    pub const fn new(c1: f32, c2: f32, c3: f32) -> Self {
        Self { c1, c2, c3 }
    }
}

/// Crate version string.
#[must_use]
pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::rng::XorShift64;
    use crate::Point;

    /// Deterministic pseudo-Gaussian blobs around the given means; each
    /// component sums twelve uniform draws (central limit), scaled to
    /// `sigma`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn gaussian_blobs(
        means: &[(f32, f32, f32)],
        per_blob: usize,
        sigma: f32,
        seed: u64,
    ) -> Vec<Point> {
        let mut rng = XorShift64::new(seed);
        let mut gauss = |mean: f32| {
            let mut sum = 0f64;
            for _ in 0..12 {
                sum += rng.next_f64();
            }
            mean + sigma * ((sum - 6.0) as f32)
        };
        let mut points = Vec::with_capacity(means.len() * per_blob);
        for &(c1, c2, c3) in means {
            for _ in 0..per_blob {
                let p = Point::new(gauss(c1), gauss(c2), gauss(c3));
                points.push(p);
            }
        }
        points
    }

    /// True when some centroid lies within `tol` of `target`.
    pub fn match_centroids(centroids: &[Point], target: Point, tol: f32) -> bool {
        centroids
            .iter()
            .any(|&c| crate::distance::distance(c, target) <= tol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::match_centroids;

    // Full pipeline: sample one image, cluster both palettes, remap.
    #[test]
    fn palette_transfer_end_to_end() {
        // "Photo" dominated by greens, "exemplar" dominated by reds.
        let greens: Vec<u32> = (0..4_096u32)
            .map(|i| {
                let g = 150 + (i * 7) % 60;
                let r = 20 + (i * 3) % 30;
                let b = 30 + (i * 5) % 40;
                0xFF00_0000 | (r << 16) | (g << 8) | b
            })
            .collect();
        let reds: Vec<u32> = (0..4_096u32)
            .map(|i| {
                let r = 170 + (i * 7) % 50;
                let g = 30 + (i * 3) % 30;
                let b = 25 + (i * 5) % 30;
                0xFF00_0000 | (r << 16) | (g << 8) | b
            })
            .collect();

        let photo = crate::image::sample_packed_pixels(&greens, 2_048, 11).unwrap();
        let exemplar = crate::image::sample_packed_pixels(&reds, 2_048, 11).unwrap();

        let target = hybrid_cluster(&photo, 4, 256, 12.0, 4, 50, 0.1, 3).unwrap().centroids;
        let source = hybrid_cluster(&exemplar, 4, 256, 12.0, 4, 50, 0.1, 3)
            .unwrap()
            .centroids;
        assert_eq!(target.len(), source.len());

        let out = resynthesize_image(&greens, 64, 64, &target, &source).unwrap();

        // The recolored image should be red-dominant like the exemplar.
        let mean_channel = |pixels: &[u32], shift: u32| -> f64 {
            let total: u64 = pixels.iter().map(|&p| u64::from((p >> shift) & 0xFF)).sum();
            #[allow(clippy::cast_precision_loss)]
            let mean = total as f64 / pixels.len() as f64;
            mean
        };
        assert!(mean_channel(&out, 16) > mean_channel(&out, 8) + 50.0);
    }

    #[test]
    fn lab_space_clustering_round_trips() {
        let pixels: Vec<u32> = (0..1_024u32)
            .map(|i| 0xFF00_0000 | ((i % 200) << 16) | (((i * 3) % 200) << 8) | ((i * 7) % 200))
            .collect();
        let rgb = extract_pixels(&pixels).unwrap();
        let lab = color::rgb_to_lab_batch(&rgb);
        let result = kmeans_cluster(&lab, 5, 30, 0.05, 9).unwrap();
        let back = color::lab_to_rgb_batch(&result.centroids);
        assert_eq!(back.len(), 5);
        for p in &back {
            assert!((0.0..=255.0).contains(&p.c1));
            assert!((0.0..=255.0).contains(&p.c2));
            assert!((0.0..=255.0).contains(&p.c3));
        }
    }

    #[test]
    fn distinct_inputs_survive_as_palette() {
        let points = [
            Point::new(10.0, 10.0, 10.0),
            Point::new(240.0, 240.0, 240.0),
        ];
        let result = hybrid_cluster(&points, 5, 256, 10.0, 4, 50, 0.1, 1).unwrap();
        assert_eq!(result.centroids.len(), 2);
        for &p in &points {
            assert!(match_centroids(&result.centroids, p, 1e-3));
        }
    }

    #[test]
    fn version_is_nonempty() {
        assert!(!version().is_empty());
    }
}
