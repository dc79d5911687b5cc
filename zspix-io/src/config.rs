//! JSON configuration files.
//!
//! Every field is optional; missing fields keep their defaults.
//!
//! ```json
//! {
//!   "geometry": { "width": 2048, "height": 2048 },
//!   "rebin": 10,
//!   "quality": { "max_mean": 110.0, "min_stddev": 0.2, "max_stddev": 5.0 },
//!   "suppression": { "noise_multiplier": 5.0, "parallel": true },
//!   "max_entries": 500
//! }
//! ```

use crate::Result;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zspix_core::PipelineConfig;

/// Parses and validates a configuration from a JSON string.
///
/// # Errors
/// Returns [`crate::Error::Json`] on malformed input and
/// [`crate::Error::CoreError`] if the values are inconsistent.
pub fn config_from_json(json: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

/// Loads and validates a configuration file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or if the values
/// are inconsistent.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let reader = BufReader::new(File::open(path)?);
    let config: PipelineConfig = serde_json::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}
