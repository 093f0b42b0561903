//! Mean-image subtraction.
//!
//! The mean image comes from a JSON key/value document:
//!
//! ```json
//! {
//!   "MeanImg": [[...], [...]],
//!   "Channel": 3,
//!   "Row": 224,
//!   "Col": 224
//! }
//! ```
//!
//! `MeanImg` is a 2-D matrix of arbitrary shape whose element count must
//! equal `Channel * Row * Col`; it is reshaped to channel-interleaved
//! `Row` x `Col` form after loading.

use crate::config::TransformConfig;
use crate::transforms::mat::{Mat, MatBuffer};
use anyhow::{ensure, Context, Result};
use rand::rngs::StdRng;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct MeanFile {
    #[serde(rename = "MeanImg")]
    mean_img: Vec<Vec<f64>>,
    #[serde(rename = "Channel")]
    channel: usize,
    #[serde(rename = "Row")]
    row: usize,
    #[serde(rename = "Col")]
    col: usize,
}

#[derive(Debug, Clone)]
pub struct MeanTransform {
    mean: Option<Mat<f64>>,
}

impl MeanTransform {
    pub fn new(config: &TransformConfig) -> Result<Self> {
        let mean = match &config.mean_file {
            Some(path) if !path.as_os_str().is_empty() => Some(load_mean_file(path)?),
            _ => None,
        };
        Ok(Self { mean })
    }

    /// Subtracts the mean image elementwise.
    ///
    /// When no mean file is configured, or when the mean's dimensions or
    /// channel count disagree with the input, the sample passes through
    /// unchanged rather than failing.
    pub(crate) fn apply(&self, mat: &mut MatBuffer, _rng: &mut StdRng) -> Result<()> {
        if let Some(mean) = &self.mean {
            if mean.rows() == mat.rows()
                && mean.cols() == mat.cols()
                && mean.channels() == mat.channels()
            {
                mat.subtract(mean)?;
            }
        }
        Ok(())
    }
}

fn load_mean_file(path: &Path) -> Result<Mat<f64>> {
    let file = File::open(path)
        .with_context(|| format!("Could not open mean file: {}", path.display()))?;
    let mean: MeanFile = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Malformed mean file: {}", path.display()))?;

    let values: Vec<f64> = mean.mean_img.into_iter().flatten().collect();
    let expected = mean.channel * mean.row * mean.col;
    ensure!(
        expected > 0 && values.len() == expected,
        "Invalid data in mean file {}: {} elements for Channel={} Row={} Col={}",
        path.display(),
        values.len(),
        mean.channel,
        mean.row,
        mean.col
    );
    Mat::from_vec(mean.row, mean.col, mean.channel, values)
}
