//! Load-or-compute pedestal handling and the frame-processing loop.
//!
//! A [`Pipeline`] moves through [`PipelineState`] in one direction:
//!
//! ```text
//! NeedPedestal -> PedestalReady -> Streaming -> Done
//! ```
//!
//! The pedestal pass and the data pass each open the archive, walk it in
//! archive order and drop the handle when their loop ends.

use crate::archive::open_archive;
use crate::store::{load_matching, pedestal_store_path, PedestalStore};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use zspix_core::{
    rebin_normalized, ArchivePass, ChannelClassifier, Cluster, ClusterExtractor,
    ClusterMeasurement, PedestalEstimator, PedestalMap, PipelineConfig, RebinFactor, RebinPlan,
    SuppressedImage, ZeroSuppressor,
};

/// Where the pedestal map comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PedestalSource {
    /// Compute from the archive and write the store.
    FreshCompute,
    /// Load a previously written store.
    LoadFrom(PathBuf),
    /// Compute and overwrite the store even if one exists.
    ForceRecompute,
}

impl PedestalSource {
    /// Picks the source for `archive` rebinned by `rebin`.
    ///
    /// Without `force`, an existing store at the deterministic path is
    /// loaded; a missing one is reported and computed fresh.
    #[must_use]
    pub fn resolve(archive: &Path, rebin: RebinFactor, force: bool) -> Self {
        if force {
            return Self::ForceRecompute;
        }
        let path = pedestal_store_path(archive, rebin);
        if path.is_file() {
            Self::LoadFrom(path)
        } else {
            log::warn!(
                "Pedestal store {} not found, computing a new one",
                path.display()
            );
            Self::FreshCompute
        }
    }
}

/// Lifecycle of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NeedPedestal,
    PedestalReady,
    Streaming,
    Done,
}

/// Per-frame results handed to the sink of [`Pipeline::run`].
#[derive(Debug)]
pub struct FrameOutput<'a> {
    pub name: &'a str,
    pub index: usize,
    pub suppressed: &'a SuppressedImage,
    pub clusters: &'a [Cluster],
    pub measurements: &'a [ClusterMeasurement],
}

/// Counters for one data pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records read before the pass ended.
    pub records: usize,
    /// Frames suppressed and clustered.
    pub frames: usize,
    /// Records skipped (not data images, or wrong shape).
    pub skipped: usize,
    /// Clusters found across all frames.
    pub clusters: usize,
    /// Whether `max_entries` ended the pass.
    pub capped: bool,
}

/// Drives rebin, scale, suppress and cluster extraction over an archive.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    archive: PathBuf,
    store_path: PathBuf,
    state: PipelineState,
    store: Option<PedestalStore>,
}

impl Pipeline {
    /// Creates a pipeline over `archive`.
    ///
    /// [`PedestalSource::LoadFrom`] loads the store right away and leaves
    /// the pipeline in [`PipelineState::PedestalReady`]; the computing
    /// sources leave it in [`PipelineState::NeedPedestal`].
    ///
    /// # Errors
    /// Returns an error for an invalid configuration, or if a store to load
    /// cannot be read or does not match the configured grid.
    pub fn new<P: Into<PathBuf>>(
        archive: P,
        config: PipelineConfig,
        source: PedestalSource,
    ) -> Result<Self> {
        config.validate()?;
        let archive = archive.into();

        let plan = rebin_plan(&config);
        if !plan.is_lossless() {
            log::warn!(
                "Rebin factor {} does not divide the {}x{} sensor: dropping {} columns and {} rows",
                config.rebin,
                config.geometry.width,
                config.geometry.height,
                plan.dropped_columns,
                plan.dropped_rows
            );
        }

        let mut pipeline = Self {
            store_path: pedestal_store_path(&archive, config.rebin),
            config,
            archive,
            state: PipelineState::NeedPedestal,
            store: None,
        };

        if let PedestalSource::LoadFrom(path) = source {
            let store = load_matching(&path, pipeline.config.rebin, pipeline.config.rebinned_dims())?;
            log::info!("Loaded pedestal store {}", path.display());
            log_summary(&store);
            pipeline.store_path = path;
            pipeline.store = Some(store);
            pipeline.state = PipelineState::PedestalReady;
        }
        Ok(pipeline)
    }

    /// [`Self::new`] followed by [`Self::compute_pedestal`] when needed.
    ///
    /// # Errors
    /// Any error from either step.
    pub fn prepare<P: Into<PathBuf>>(
        archive: P,
        config: PipelineConfig,
        source: PedestalSource,
    ) -> Result<Self> {
        let mut pipeline = Self::new(archive, config, source)?;
        if pipeline.state == PipelineState::NeedPedestal {
            pipeline.compute_pedestal()?;
        }
        Ok(pipeline)
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// How the configured rebin factor maps the sensor onto the working grid.
    #[must_use]
    pub fn rebin_plan(&self) -> RebinPlan {
        rebin_plan(&self.config)
    }

    /// Location the store is read from or written to.
    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// The pedestal store, once available.
    #[must_use]
    pub fn store(&self) -> Option<&PedestalStore> {
        self.store.as_ref()
    }

    /// The pedestal map, once available.
    #[must_use]
    pub fn pedestal(&self) -> Option<&PedestalMap> {
        self.store.as_ref().map(|store| &store.map)
    }

    /// Runs the pedestal pass and writes the store.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the pipeline is in
    /// [`PipelineState::NeedPedestal`], and any archive, estimation or
    /// store-writing error.
    pub fn compute_pedestal(&mut self) -> Result<&PedestalStore> {
        self.expect_state(PipelineState::NeedPedestal, "compute_pedestal")?;
        self.build_store()
    }

    /// Replaces the current map and store with a freshly computed one.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the pipeline is in
    /// [`PipelineState::PedestalReady`], and any error from the pass.
    pub fn recompute_pedestal(&mut self) -> Result<&PedestalStore> {
        self.expect_state(PipelineState::PedestalReady, "recompute_pedestal")?;
        self.store_path = pedestal_store_path(&self.archive, self.config.rebin);
        self.build_store()
    }

    /// Streams the data pass, calling `sink` once per processed frame.
    ///
    /// Every record is read in archive order. Records that are not data
    /// images, or whose shape differs from the sensor geometry, are skipped.
    /// The pass stops once the record index reaches `max_entries`. The
    /// pipeline ends in [`PipelineState::Done`] whether or not the pass
    /// succeeds.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the pipeline is in
    /// [`PipelineState::PedestalReady`], and the first archive, extractor or
    /// sink error otherwise.
    pub fn run<C, F>(&mut self, extractor: &mut C, mut sink: F) -> Result<RunSummary>
    where
        C: ClusterExtractor + ?Sized,
        F: FnMut(FrameOutput<'_>) -> Result<()>,
    {
        self.expect_state(PipelineState::PedestalReady, "run")?;
        self.state = PipelineState::Streaming;
        let result = self.stream(extractor, &mut sink);
        self.state = PipelineState::Done;

        if let Ok(summary) = &result {
            log::info!(
                "Processed {} frames ({} records, {} skipped), {} clusters",
                summary.frames,
                summary.records,
                summary.skipped,
                summary.clusters
            );
        }
        result
    }

    fn stream<C, F>(&self, extractor: &mut C, sink: &mut F) -> Result<RunSummary>
    where
        C: ClusterExtractor + ?Sized,
        F: FnMut(FrameOutput<'_>) -> Result<()>,
    {
        let Some(store) = &self.store else {
            return Err(Error::InvalidState("no pedestal map loaded".to_string()));
        };
        let map = &store.map;
        let config = &self.config;
        let suppressor = ZeroSuppressor::new(config.suppression, ChannelClassifier::new(config.quality));

        let archive = open_archive(&self.archive)?;
        let mut summary = RunSummary::default();
        for record in archive.records(ArchivePass::Data) {
            let record = record?;
            if let Some(max) = config.max_entries.filter(|&max| record.index >= max) {
                log::info!("Reached max entries ({max})");
                summary.capped = true;
                break;
            }
            summary.records += 1;

            let label = record.kind_label();
            let Some(frame) = record.into_data() else {
                log::debug!("Skipping {label} record");
                summary.skipped += 1;
                continue;
            };
            if !frame.image.matches(config.geometry) {
                log::warn!(
                    "Skipping frame {}: {}x{} does not match sensor {}x{}",
                    frame.name,
                    frame.image.width(),
                    frame.image.height(),
                    config.geometry.width,
                    config.geometry.height
                );
                summary.skipped += 1;
                continue;
            }

            log::info!("Processing frame: {}", frame.name);
            let scaled = rebin_normalized(&frame.image, config.rebin);
            let suppressed = suppressor.suppress(&scaled, map)?;
            let clusters =
                extractor.extract_clusters(&suppressed, &frame.name, config.cluster_iterations)?;
            extractor.render(&suppressed, &frame.name, &clusters)?;
            let measurements = extractor.measure(&suppressed, &frame.name, &clusters)?;

            summary.frames += 1;
            summary.clusters += clusters.len();
            sink(FrameOutput {
                name: &frame.name,
                index: frame.index,
                suppressed: &suppressed,
                clusters: &clusters,
                measurements: &measurements,
            })?;
        }
        Ok(summary)
    }

    fn build_store(&mut self) -> Result<&PedestalStore> {
        let config = &self.config;
        log::info!(
            "Computing pedestal from {} (rebin {})",
            self.archive.display(),
            config.rebin
        );
        let archive = open_archive(&self.archive)?;
        let map = PedestalEstimator::new(config.geometry, config.rebin)
            .with_max_frames(config.max_calibration_frames)
            .estimate(archive.records(ArchivePass::Calibration))?;
        drop(archive);

        let store = PedestalStore::from_map(map, &config.histograms);
        store.write(&self.store_path)?;
        log::info!("Wrote pedestal store {}", self.store_path.display());
        log_summary(&store);

        self.state = PipelineState::PedestalReady;
        Ok(self.store.insert(store))
    }

    fn expect_state(&self, expected: PipelineState, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{operation} requires {expected:?}, pipeline is {:?}",
                self.state
            )))
        }
    }
}

fn rebin_plan(config: &PipelineConfig) -> RebinPlan {
    config.rebin.plan(config.geometry.dims())
}

fn log_summary(store: &PedestalStore) {
    let summary = store.summary();
    log::info!(
        "Pedestal: {} frames, {}x{} at rebin {}, mean {:.3}, rms {:.3}",
        summary.entries,
        summary.width,
        summary.height,
        summary.rebin,
        summary.mean_pedestal,
        summary.mean_rms
    );
}
