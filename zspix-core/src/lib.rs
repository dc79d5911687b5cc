//! zspix-core: Core types and algorithms for sensor image zero suppression.
//!
//! This crate provides rebinning, streaming per-pixel pedestal estimation,
//! channel quality classification and zero suppression, plus the
//! clustering interface the data pass hands suppressed frames to.
//!

pub mod clustering;
pub mod config;
pub mod error;
pub mod histogram;
pub mod image;
pub mod pedestal;
pub mod quality;
pub mod rebin;
pub mod record;
pub mod suppression;

pub use clustering::{
    Cluster, ClusterExtractor, ClusterMeasurement, ClusteringConfig, Contour, PixelCoord,
};
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use histogram::{Histogram1D, HistogramAxis, HistogramConfig};
pub use image::{Frame, Image, SensorGeometry};
pub use pedestal::{PedestalAccumulator, PedestalEstimator, PedestalHistograms, PedestalMap};
pub use quality::{ChannelClassifier, ChannelQualityConfig};
pub use rebin::{rebin, rebin_normalized, RebinFactor, RebinPlan};
pub use record::{ArchivePass, RecordKind, RecordPayload, RecordRole, TaggedRecord};
pub use suppression::{SuppressedImage, SuppressionConfig, ZeroSuppressor};
