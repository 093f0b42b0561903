//! Configuration surface of the reader.
//!
//! `ReaderConfig` holds the pipeline-wide knobs; each feature stream that
//! goes through the transform chain gets a `TransformConfig`. Enumerated
//! options (crop type, jitter type, interpolations) are kept as strings here
//! and parsed by the transform constructors, so malformed values surface as
//! configuration errors during reader construction.

use anyhow::{ensure, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Per-epoch parameters handed down the pipeline when a minibatch loop
/// starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochConfiguration {
    /// Zero-based epoch index.
    pub index: usize,
    /// Epoch size in samples; `None` means "one sweep over the corpus".
    pub total_size: Option<usize>,
    pub minibatch_size: usize,
    pub worker_rank: usize,
    pub number_of_workers: usize,
}

impl EpochConfiguration {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.number_of_workers > 0,
            "Number of workers must be > 0, got {}",
            self.number_of_workers
        );
        ensure!(
            self.worker_rank < self.number_of_workers,
            "Invalid worker rank {}, must be in [0, {})",
            self.worker_rank,
            self.number_of_workers
        );
        ensure!(
            self.minibatch_size > 0,
            "Minibatch size must be > 0"
        );
        Ok(())
    }
}

/// Transform parameters for one feature stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Name of the stream the transform chain applies to.
    pub stream_name: String,
    /// Output width after scaling.
    pub width: usize,
    /// Output height after scaling.
    pub height: usize,
    /// Output channel count after scaling.
    pub channels: usize,
    /// Colon-separated interpolation list (`nearest`, `linear`, `cubic`,
    /// `lanczos`); case-insensitive, unknown entries ignored, empty means
    /// `linear`.
    pub interpolations: String,
    /// `center` (default) or `random`.
    pub crop_type: String,
    /// One ratio, or a `[min, max]` pair, each in (0, 1].
    pub crop_ratio: Vec<f64>,
    /// `none` (default), `uniRatio`, `uniLength` or `uniArea`.
    pub jitter_type: String,
    /// Horizontal mirror with a fair coin; defaults to true iff
    /// `crop_type == random`.
    pub hflip: Option<bool>,
    /// Path of the serialized mean image; empty or absent disables mean
    /// subtraction.
    pub mean_file: Option<PathBuf>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            width: 0,
            height: 0,
            channels: 0,
            interpolations: String::new(),
            crop_type: String::new(),
            crop_ratio: vec![1.0],
            jitter_type: String::new(),
            hflip: None,
            mean_file: None,
        }
    }
}

impl TransformConfig {
    pub fn new(stream_name: impl Into<String>, width: usize, height: usize, channels: usize) -> Self {
        Self {
            stream_name: stream_name.into(),
            width,
            height,
            channels,
            ..Self::default()
        }
    }

    pub fn with_interpolations(mut self, interpolations: impl Into<String>) -> Self {
        self.interpolations = interpolations.into();
        self
    }

    pub fn with_crop_type(mut self, crop_type: impl Into<String>) -> Self {
        self.crop_type = crop_type.into();
        self
    }

    pub fn with_crop_ratio(mut self, ratio: &[f64]) -> Self {
        self.crop_ratio = ratio.to_vec();
        self
    }

    pub fn with_jitter_type(mut self, jitter_type: impl Into<String>) -> Self {
        self.jitter_type = jitter_type.into();
        self
    }

    pub fn with_hflip(mut self, hflip: bool) -> Self {
        self.hflip = Some(hflip);
        self
    }

    pub fn with_mean_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mean_file = Some(path.into());
        self
    }
}

/// Pipeline-wide configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Base seed for the transform PRNG pools.
    pub seed: u64,
    /// Randomization window in samples: the maximum width of resident data
    /// around the current output position.
    pub randomization_window: usize,
    /// Number of parallel sequences the minibatch layout advertises before
    /// the first batch; frame mode always repacks it per batch.
    pub num_parallel_sequences: usize,
    /// Verbosity of the randomizer's logging.
    pub verbosity: usize,
    /// One entry per feature stream going through the transform chain.
    pub features: Vec<TransformConfig>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            randomization_window: 0,
            num_parallel_sequences: 1,
            verbosity: 0,
            features: Vec::new(),
        }
    }
}

impl ReaderConfig {
    pub fn builder() -> ReaderConfigBuilder {
        ReaderConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.randomization_window > 0,
            "randomization_window must be > 0 samples"
        );
        ensure!(
            self.num_parallel_sequences > 0,
            "num_parallel_sequences must be > 0"
        );
        ensure!(
            !self.features.is_empty(),
            "At least one feature stream must be configured"
        );
        for feature in &self.features {
            ensure!(
                !feature.stream_name.is_empty(),
                "Feature stream configuration is missing a stream name"
            );
        }
        Ok(())
    }
}

/// Builder for `ReaderConfig` with method chaining.
#[derive(Default)]
pub struct ReaderConfigBuilder {
    config: ReaderConfig,
}

impl ReaderConfigBuilder {
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn randomization_window(mut self, samples: usize) -> Self {
        self.config.randomization_window = samples;
        self
    }

    pub fn num_parallel_sequences(mut self, count: usize) -> Self {
        self.config.num_parallel_sequences = count;
        self
    }

    pub fn verbosity(mut self, verbosity: usize) -> Self {
        self.config.verbosity = verbosity;
        self
    }

    pub fn feature(mut self, feature: TransformConfig) -> Self {
        self.config.features.push(feature);
        self
    }

    pub fn build(self) -> ReaderConfig {
        self.config
    }
}
