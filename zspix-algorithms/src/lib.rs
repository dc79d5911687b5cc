//! zspix-algorithms: Cluster extraction for zero-suppressed frames.
//!
//! - **Contour** - 8-connected components via union-find, outlined by the
//!   convex hull of their pixels
//!
#![warn(missing_docs)]

mod graph;
mod hull;

pub use graph::ContourClustering;
pub use hull::convex_hull;

// Re-export core clustering traits
pub use zspix_core::clustering::{
    Cluster, ClusterExtractor, ClusterMeasurement, ClusteringConfig, Contour, PixelCoord,
};
