//! Clustering traits and types.
//!
//! Cluster extraction itself lives outside this crate. The pipeline only
//! talks to it through [`ClusterExtractor`].

use crate::suppression::SuppressedImage;
use crate::Result;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pixel coordinate on the rebinned grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelCoord {
    /// X coordinate (column).
    pub x: u32,
    /// Y coordinate (row).
    pub y: u32,
}

impl PixelCoord {
    /// Creates a new pixel coordinate.
    #[inline]
    #[must_use]
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A closed polygon; the last vertex connects back to the first.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Contour {
    /// Vertices in counter-clockwise order, in pixel-edge coordinates.
    pub vertices: Vec<(f64, f64)>,
}

impl Contour {
    /// Enclosed area (shoelace formula).
    #[must_use]
    pub fn area(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let twice: f64 = (0..n)
            .map(|i| {
                let (x0, y0) = self.vertices[i];
                let (x1, y1) = self.vertices[(i + 1) % n];
                x0 * y1 - x1 * y0
            })
            .sum();
        twice.abs() / 2.0
    }

    /// Perimeter length, including the closing edge.
    #[must_use]
    pub fn perimeter(&self) -> f64 {
        let n = self.vertices.len();
        if n < 2 {
            return 0.0;
        }
        (0..n)
            .map(|i| {
                let (x0, y0) = self.vertices[i];
                let (x1, y1) = self.vertices[(i + 1) % n];
                (x1 - x0).hypot(y1 - y0)
            })
            .sum()
    }
}

/// A connected region of suppressed signal.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Cluster {
    /// Member pixels.
    pub pixels: Vec<PixelCoord>,
    /// Closed outline of the region.
    pub contour: Contour,
}

impl Cluster {
    /// Returns the number of pixels in the cluster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Returns true if the cluster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Per-cluster summary produced by [`ClusterExtractor::measure`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClusterMeasurement {
    /// Number of member pixels.
    pub size: usize,
    /// Summed signal.
    pub integral: f64,
    /// Signal-weighted centroid (pixel centers at `i + 0.5`).
    pub centroid_x: f64,
    pub centroid_y: f64,
    /// Inclusive pixel bounding box `(min_x, min_y, max_x, max_y)`.
    pub bbox: (u32, u32, u32, u32),
    /// Area enclosed by the contour.
    pub contour_area: f64,
}

/// Configuration for clustering algorithms.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusteringConfig {
    /// Minimum number of pixels to form a valid cluster.
    pub min_cluster_size: usize,
    /// Maximum number of pixels in a cluster (for filtering large artifacts).
    pub max_cluster_size: Option<usize>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 1,
            max_cluster_size: None,
        }
    }
}

impl ClusteringConfig {
    /// Creates a new clustering configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum cluster size.
    #[must_use]
    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    /// Sets the maximum cluster size.
    #[must_use]
    pub fn with_max_cluster_size(mut self, size: usize) -> Self {
        self.max_cluster_size = Some(size);
        self
    }

    /// Whether a cluster of `size` pixels passes the size filters.
    #[must_use]
    pub fn accepts_size(&self, size: usize) -> bool {
        size >= self.min_cluster_size && self.max_cluster_size.is_none_or(|max| size <= max)
    }
}

/// Extracts clusters from suppressed frames.
///
/// The pipeline calls, per frame and in this order: `extract_clusters`,
/// `render`, `measure`.
pub trait ClusterExtractor {
    /// Finds the clusters in `image`.
    ///
    /// `iterations` is a refinement budget for iterative (active-contour)
    /// algorithms. Single-pass implementations may ignore it.
    ///
    /// # Errors
    /// Implementation-defined.
    fn extract_clusters(
        &mut self,
        image: &SuppressedImage,
        name: &str,
        iterations: usize,
    ) -> Result<Vec<Cluster>>;

    /// Side-effecting visualization hook. Does nothing by default.
    ///
    /// # Errors
    /// Implementation-defined.
    fn render(&mut self, _image: &SuppressedImage, _name: &str, _clusters: &[Cluster]) -> Result<()> {
        Ok(())
    }

    /// Measures every cluster, in order.
    ///
    /// # Errors
    /// Implementation-defined.
    fn measure(
        &mut self,
        image: &SuppressedImage,
        name: &str,
        clusters: &[Cluster],
    ) -> Result<Vec<ClusterMeasurement>>;

    /// Returns the name of the algorithm.
    fn name(&self) -> &'static str;
}
