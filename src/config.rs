//! Run settings.
//!
//! Layered with the `config` crate: built-in defaults, then an optional config
//! file, then `TABLE_BATCHER_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use ::config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::{Result, SplitError};

pub const DEFAULT_ROWS_PER_BATCH: usize = 10_000;
pub const DEFAULT_OUTPUT_DIR: &str = "./output";
const ENV_PREFIX: &str = "TABLE_BATCHER";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// Max data rows per batch file.
    pub rows_per_batch: usize,
    /// Root of the `structure/` and `data/` directories.
    pub output_dir: PathBuf,
    /// Stop reading input once the boundary marker is seen instead of draining it.
    pub stop_at_boundary: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rows_per_batch: DEFAULT_ROWS_PER_BATCH,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            stop_at_boundary: false,
        }
    }
}

/// Values given on the command line; they win over every other source.
#[derive(Debug, Default)]
pub struct Overrides {
    pub rows_per_batch: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub stop_at_boundary: bool,
}

impl Settings {
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("rows_per_batch", DEFAULT_ROWS_PER_BATCH as u64)
            .and_then(|b| b.set_default("output_dir", DEFAULT_OUTPUT_DIR))
            .and_then(|b| b.set_default("stop_at_boundary", false))
            .map_err(config_error)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        if let Some(rows) = overrides.rows_per_batch {
            builder = builder
                .set_override("rows_per_batch", rows as u64)
                .map_err(config_error)?;
        }
        if let Some(dir) = &overrides.output_dir {
            builder = builder
                .set_override("output_dir", dir.to_string_lossy().into_owned())
                .map_err(config_error)?;
        }
        if overrides.stop_at_boundary {
            builder = builder
                .set_override("stop_at_boundary", true)
                .map_err(config_error)?;
        }

        let settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rows_per_batch == 0 {
            return Err(SplitError::Config("rows_per_batch must be at least 1".into()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(SplitError::Config("output_dir must not be empty".into()));
        }
        Ok(())
    }
}

fn config_error(e: ConfigError) -> SplitError {
    SplitError::Config(e.to_string())
}
