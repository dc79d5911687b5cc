//! Clustering of frames that went through rebinning and zero suppression.

use approx::assert_relative_eq;
use zspix_algorithms::{ClusterExtractor, ClusteringConfig, ContourClustering};
use zspix_core::{
    rebin_normalized, Image, PedestalAccumulator, RebinFactor, SensorGeometry, ZeroSuppressor,
};

/// Calibration frames alternating 98/102 around a pedestal of 100.
fn pedestal(geometry: SensorGeometry, rebin: RebinFactor) -> zspix_core::PedestalMap {
    let mut acc = PedestalAccumulator::for_geometry(geometry, rebin);
    for i in 0..20 {
        let level = if i % 2 == 0 { 98.0 } else { 102.0 };
        let raw = Image::filled(geometry.width, geometry.height, level);
        acc.push(&zspix_core::rebin(&raw, rebin)).unwrap();
    }
    acc.finalize().unwrap()
}

#[test]
fn test_two_spots_after_suppression() {
    let geometry = SensorGeometry::square(32);
    let rebin = RebinFactor::new(2).unwrap();
    let map = pedestal(geometry, rebin);
    assert_relative_eq!(map.mean(0, 0).unwrap(), 100.0, epsilon = 1e-9);
    assert_relative_eq!(map.stddev(0, 0).unwrap(), 2.0, epsilon = 1e-9);

    // Raw 2x2 blocks at 150 land as 150 after normalization: 50 above the
    // pedestal, well over 5 sigma.
    let raw = Image::from_fn(32, 32, |x, y| {
        let spot_a = (4..8).contains(&x) && (4..6).contains(&y);
        let spot_b = (20..22).contains(&x) && (24..26).contains(&y);
        if spot_a || spot_b {
            150.0
        } else {
            100.0
        }
    });
    let frame = rebin_normalized(&raw, rebin);
    let suppressed = ZeroSuppressor::default().suppress(&frame, &map).unwrap();
    assert_eq!(suppressed.active_pixels(), 3);

    let mut algo = ContourClustering::new(ClusteringConfig::default());
    let clusters = algo.extract_clusters(&suppressed, "frame_0", 100).unwrap();
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].len(), 2);
    assert_eq!(clusters[1].len(), 1);

    let measurements = algo.measure(&suppressed, "frame_0", &clusters).unwrap();
    assert_relative_eq!(measurements[0].integral, 100.0, epsilon = 1e-9);
    assert_relative_eq!(measurements[0].centroid_x, 3.0, epsilon = 1e-9);
    assert_relative_eq!(measurements[1].integral, 50.0, epsilon = 1e-9);
    assert_eq!(measurements[1].bbox, (10, 12, 10, 12));
}

#[test]
fn test_quiet_frame_has_no_clusters() {
    let geometry = SensorGeometry::square(16);
    let rebin = RebinFactor::ONE;
    let map = pedestal(geometry, rebin);

    let frame = Image::filled(16, 16, 109.0);
    let suppressed = ZeroSuppressor::default().suppress(&frame, &map).unwrap();
    let clusters = ContourClustering::default()
        .extract_clusters(&suppressed, "quiet", 100)
        .unwrap();
    assert!(clusters.is_empty());
}
