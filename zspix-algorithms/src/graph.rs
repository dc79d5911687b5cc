//! Graph-based cluster extraction.
//!
//! Uses a union-find data structure to find the 8-connected components of
//! the non-zero pixels of a suppressed frame.

use crate::hull::convex_hull;
use rayon::prelude::*;
use zspix_core::{
    Cluster, ClusterExtractor, ClusterMeasurement, ClusteringConfig, PixelCoord, Result,
    SuppressedImage,
};

/// Connected-component clustering with convex-hull contours.
///
/// Single pass: the iteration budget handed to
/// [`ClusterExtractor::extract_clusters`] is accepted and ignored.
#[derive(Debug, Clone, Default)]
pub struct ContourClustering {
    config: ClusteringConfig,
}

impl ContourClustering {
    /// Creates a new contour clustering instance.
    #[must_use]
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Returns the clustering configuration.
    #[must_use]
    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Groups active pixels into components, ordered by their first pixel in
    /// row-major order. Pixels within a component are row-major too.
    fn components(image: &SuppressedImage) -> Vec<Vec<PixelCoord>> {
        let (width, height) = image.dims();
        let active: Vec<(usize, usize)> = image.iter_active().map(|(x, y, _)| (x, y)).collect();
        if active.is_empty() {
            return Vec::new();
        }

        // Grid cell -> index into `active`.
        let mut slot = vec![None; width * height];
        for (i, &(x, y)) in active.iter().enumerate() {
            slot[y * width + x] = Some(i);
        }

        let mut uf = UnionFind::new(active.len());
        for (i, &(x, y)) in active.iter().enumerate() {
            // Neighbors already visited in row-major order.
            let left = (x > 0).then(|| (x - 1, y));
            let up_left = (x > 0 && y > 0).then(|| (x - 1, y - 1));
            let up = (y > 0).then(|| (x, y - 1));
            let up_right = (y > 0 && x + 1 < width).then(|| (x + 1, y - 1));
            for (nx, ny) in [left, up_left, up, up_right].into_iter().flatten() {
                if let Some(j) = slot[ny * width + nx] {
                    uf.union(i, j);
                }
            }
        }

        let mut order: Vec<Option<usize>> = vec![None; active.len()];
        let mut groups: Vec<Vec<PixelCoord>> = Vec::new();
        for (i, &(x, y)) in active.iter().enumerate() {
            let root = uf.find(i);
            let group = *order[root].get_or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(pixel(x, y));
        }
        groups
    }
}

#[allow(clippy::cast_possible_truncation)]
fn pixel(x: usize, y: usize) -> PixelCoord {
    PixelCoord::new(x as u32, y as u32)
}

/// Union-Find data structure for connected component detection.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, x: usize, y: usize) {
        let px = self.find(x);
        let py = self.find(y);

        if px == py {
            return;
        }

        match self.rank[px].cmp(&self.rank[py]) {
            std::cmp::Ordering::Less => self.parent[px] = py,
            std::cmp::Ordering::Greater => self.parent[py] = px,
            std::cmp::Ordering::Equal => {
                self.parent[py] = px;
                self.rank[px] += 1;
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn measure_cluster(image: &SuppressedImage, cluster: &Cluster) -> ClusterMeasurement {
    let mut integral = 0.0;
    let mut wx = 0.0;
    let mut wy = 0.0;
    let mut bbox = (u32::MAX, u32::MAX, 0, 0);
    for p in &cluster.pixels {
        let v = image.signal(p.x as usize, p.y as usize);
        let cx = f64::from(p.x) + 0.5;
        let cy = f64::from(p.y) + 0.5;
        integral += v;
        wx += v * cx;
        wy += v * cy;
        bbox = (
            bbox.0.min(p.x),
            bbox.1.min(p.y),
            bbox.2.max(p.x),
            bbox.3.max(p.y),
        );
    }

    let size = cluster.len();
    let (centroid_x, centroid_y) = if integral > 0.0 {
        (wx / integral, wy / integral)
    } else if size > 0 {
        // No signal to weight by: fall back to the geometric center.
        let n = size as f64;
        (
            cluster.pixels.iter().map(|p| f64::from(p.x) + 0.5).sum::<f64>() / n,
            cluster.pixels.iter().map(|p| f64::from(p.y) + 0.5).sum::<f64>() / n,
        )
    } else {
        (0.0, 0.0)
    };
    if size == 0 {
        bbox = (0, 0, 0, 0);
    }

    ClusterMeasurement {
        size,
        integral,
        centroid_x,
        centroid_y,
        bbox,
        contour_area: cluster.contour.area(),
    }
}

impl ClusterExtractor for ContourClustering {
    fn extract_clusters(
        &mut self,
        image: &SuppressedImage,
        name: &str,
        _iterations: usize,
    ) -> Result<Vec<Cluster>> {
        let clusters: Vec<Cluster> = Self::components(image)
            .into_iter()
            .filter(|pixels| self.config.accepts_size(pixels.len()))
            .map(|pixels| {
                let contour = convex_hull(&pixels);
                Cluster { pixels, contour }
            })
            .collect();
        log::debug!("{name}: {} clusters", clusters.len());
        Ok(clusters)
    }

    fn measure(
        &mut self,
        image: &SuppressedImage,
        _name: &str,
        clusters: &[Cluster],
    ) -> Result<Vec<ClusterMeasurement>> {
        Ok(clusters
            .par_iter()
            .map(|cluster| measure_cluster(image, cluster))
            .collect())
    }

    fn name(&self) -> &'static str {
        "Contour"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use zspix_core::Image;

    fn frame(width: usize, height: usize, active: &[(usize, usize, f64)]) -> SuppressedImage {
        let mut image = Image::zeros(width, height);
        for &(x, y, v) in active {
            image.set(x, y, v);
        }
        SuppressedImage::from_image(image)
    }

    #[test]
    fn test_diagonal_neighbors_connect() {
        let image = frame(4, 4, &[(0, 0, 1.0), (1, 1, 1.0), (2, 2, 1.0)]);
        let mut algo = ContourClustering::default();
        let clusters = algo.extract_clusters(&image, "f", 100).unwrap();

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
    }

    #[test]
    fn test_separate_clusters_in_scan_order() {
        let image = frame(
            8,
            8,
            &[(6, 0, 2.0), (7, 0, 2.0), (0, 5, 1.0), (0, 6, 1.0), (1, 6, 1.0)],
        );
        let mut algo = ContourClustering::default();
        let clusters = algo.extract_clusters(&image, "f", 0).unwrap();

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].pixels[0], PixelCoord::new(6, 0));
        assert_eq!(clusters[1].len(), 3);
    }

    #[test]
    fn test_u_shape_merges_late() {
        // Two arms that only meet on the bottom row.
        let image = frame(
            3,
            3,
            &[
                (0, 0, 1.0),
                (2, 0, 1.0),
                (0, 1, 1.0),
                (2, 1, 1.0),
                (0, 2, 1.0),
                (1, 2, 1.0),
                (2, 2, 1.0),
            ],
        );
        let clusters = ContourClustering::default()
            .extract_clusters(&image, "u", 1)
            .unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 7);
    }

    #[test]
    fn test_min_cluster_size_filter() {
        let image = frame(6, 1, &[(0, 0, 1.0), (2, 0, 1.0), (3, 0, 1.0)]);
        let mut algo = ContourClustering::new(ClusteringConfig::new().with_min_cluster_size(2));
        let clusters = algo.extract_clusters(&image, "f", 100).unwrap();

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
    }

    #[test]
    fn test_empty_frame() {
        let image = frame(4, 4, &[]);
        let mut algo = ContourClustering::default();
        assert!(algo.extract_clusters(&image, "f", 100).unwrap().is_empty());
    }

    #[test]
    fn test_measure() {
        let image = frame(4, 4, &[(1, 1, 3.0), (2, 1, 1.0)]);
        let mut algo = ContourClustering::default();
        let clusters = algo.extract_clusters(&image, "f", 100).unwrap();
        let m = algo.measure(&image, "f", &clusters).unwrap();

        assert_eq!(m.len(), 1);
        assert_eq!(m[0].size, 2);
        assert_relative_eq!(m[0].integral, 4.0);
        assert_relative_eq!(m[0].centroid_x, (3.0 * 1.5 + 2.5) / 4.0);
        assert_relative_eq!(m[0].centroid_y, 1.5);
        assert_eq!(m[0].bbox, (1, 1, 2, 1));
        assert_relative_eq!(m[0].contour_area, 2.0);
    }

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(2, 3);
        uf.union(1, 2);

        assert_eq!(uf.find(0), uf.find(3));
        assert_ne!(uf.find(0), uf.find(4));
    }
}
