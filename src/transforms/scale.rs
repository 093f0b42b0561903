//! Fixed-size rescale of the feature stream.

use crate::config::TransformConfig;
use crate::stream::{ElementType, SampleLayout, StreamDescription};
use crate::transforms::mat::{Filter, MatBuffer};
use anyhow::{ensure, Result};
use rand::{rngs::StdRng, Rng};

#[derive(Debug, Clone)]
pub struct ScaleTransform {
    out_rows: usize,
    out_cols: usize,
    channels: usize,
    target: ElementType,
    filters: Vec<Filter>,
}

impl ScaleTransform {
    pub fn new(config: &TransformConfig, stream: &StreamDescription) -> Result<Self> {
        let elements = config
            .width
            .checked_mul(config.height)
            .and_then(|v| v.checked_mul(config.channels))
            .unwrap_or(usize::MAX);
        ensure!(
            elements > 0 && elements <= usize::MAX / 2,
            "Invalid image dimensions {}x{}x{}",
            config.width,
            config.height,
            config.channels
        );

        // Rescaling happens in floating point; u8 streams are promoted to
        // f32 on the fly.
        let target = match stream.element_type {
            ElementType::F64 => ElementType::F64,
            _ => ElementType::F32,
        };

        Ok(Self {
            out_rows: config.width,
            out_cols: config.height,
            channels: config.channels,
            target,
            filters: parse_interpolations(&config.interpolations),
        })
    }

    /// Element type of the stream after scaling.
    pub fn output_element_type(&self) -> ElementType {
        self.target
    }

    /// Sample layout of the stream after scaling.
    pub fn output_layout(&self) -> SampleLayout {
        SampleLayout::new(self.out_rows, self.out_cols, self.channels)
    }

    pub(crate) fn apply(&self, mat: &mut MatBuffer, rng: &mut StdRng) -> Result<()> {
        if mat.element_type() != self.target {
            mat.convert_to(self.target)?;
        }
        ensure!(
            mat.channels() == self.channels,
            "Sample has {} channels, scale is configured for {}",
            mat.channels(),
            self.channels
        );
        let filter = self.filters[rng.random_range(0..self.filters.len())];
        mat.resize(self.out_rows, self.out_cols, filter)
    }
}

/// Splits the colon-separated interpolation list. Matching is
/// case-insensitive, unknown entries are skipped, and an empty result falls
/// back to `linear`.
fn parse_interpolations(value: &str) -> Vec<Filter> {
    let mut filters: Vec<Filter> = value
        .split(':')
        .filter_map(|token| match token.trim().to_ascii_lowercase().as_str() {
            "nearest" => Some(Filter::Nearest),
            "linear" => Some(Filter::Linear),
            "cubic" => Some(Filter::Cubic),
            "lanczos" => Some(Filter::Lanczos),
            _ => None,
        })
        .collect();
    if filters.is_empty() {
        filters.push(Filter::Linear);
    }
    filters
}
