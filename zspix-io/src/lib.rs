//! zspix-io: Image archives, pedestal stores and the processing pipeline.
//!
//! Native `.zsf` archives are read through memory maps (memmap2); HDF5
//! archives are available behind the `hdf5` feature. The [`Pipeline`]
//! ties archives, the pedestal store and the core algorithms together.
//!

pub mod archive;
pub mod config;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod native;
pub mod pipeline;
pub mod store;
mod writer;

pub use archive::{open_archive, ArchiveFormat, ImageArchive, RecordInfo, RecordStream};
pub use config::{config_from_json, load_config};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{Hdf5Archive, Hdf5ArchiveWriter};
pub use native::{NativeArchive, NativeArchiveWriter};
pub use pipeline::{FrameOutput, PedestalSource, Pipeline, PipelineState, RunSummary};
pub use store::{load_matching, pedestal_store_path, PedestalStore, StoreSummary};
pub use writer::DataFileWriter;
