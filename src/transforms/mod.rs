//! The pull-through transform chain.
//!
//! Every pipeline stage implements [`SequenceSource`]; a [`TransformStage`]
//! wraps an upstream source and applies one [`ImageTransform`] variant to the
//! configured feature streams of every batch it forwards. Per-sample work
//! inside a batch runs on the rayon pool with an ordered barrier, so the
//! output vector keeps the upstream order; randomness comes from a shared
//! pop-or-create PRNG pool.

pub mod crop;
pub mod mat;
pub mod mean;
pub mod rng_pool;
pub mod scale;

pub use crop::{CropTransform, CropType, JitterType};
pub use mat::{Filter, Mat, MatBuffer};
pub use mean::MeanTransform;
pub use rng_pool::RngPool;
pub use scale::ScaleTransform;

use crate::config::EpochConfiguration;
use crate::stream::{StorageType, StreamDescription};
use crate::timeline::{DenseSequenceData, SequenceData, Sequences};
use anyhow::{anyhow, bail, ensure, Result};
use rand::rngs::StdRng;
use rayon::prelude::*;

/// A stage of the pull-based pipeline: the packer pulls from the outermost
/// transform, transforms pull from their upstream stage, the innermost pull
/// reaches the randomizer.
pub trait SequenceSource: Send {
    /// Stream descriptions as seen downstream of this stage.
    fn streams(&self) -> Vec<StreamDescription>;

    /// Starts an epoch; forwarded upstream to the randomizer and
    /// deserializer.
    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()>;

    /// Returns up to `count` sequences in randomized-timeline order.
    fn get_next_sequences(&mut self, count: usize) -> Result<Sequences>;
}

/// The transform applied by one stage.
#[derive(Debug, Clone)]
pub enum ImageTransform {
    Crop(CropTransform),
    Scale(ScaleTransform),
    Mean(MeanTransform),
}

impl ImageTransform {
    fn apply(&self, mat: &mut MatBuffer, rng: &mut StdRng) -> Result<()> {
        match self {
            ImageTransform::Crop(crop) => crop.apply(mat, rng),
            ImageTransform::Scale(scale) => scale.apply(mat, rng),
            ImageTransform::Mean(mean) => mean.apply(mat, rng),
        }
    }
}

/// Applies one transform to each sample of every batch pulled through it.
pub struct TransformStage {
    next: Box<dyn SequenceSource>,
    transform: ImageTransform,
    feature_stream_ids: Vec<usize>,
    /// Streams as this stage receives them.
    input_streams: Vec<StreamDescription>,
    /// Streams as this stage hands them downstream (scale rewrites element
    /// type and layout of its feature streams).
    output_streams: Vec<StreamDescription>,
    rngs: RngPool,
}

impl TransformStage {
    pub fn new(
        next: Box<dyn SequenceSource>,
        transform: ImageTransform,
        feature_stream_names: &[String],
        seed: u64,
    ) -> Result<Self> {
        let input_streams = next.streams();
        let mut feature_stream_ids = Vec::with_capacity(feature_stream_names.len());
        for name in feature_stream_names {
            let id = input_streams
                .iter()
                .position(|stream| &stream.name == name)
                .ok_or_else(|| anyhow!("Unknown feature stream '{}'", name))?;
            ensure!(
                input_streams[id].storage == StorageType::Dense,
                "Feature stream '{}' must use dense storage",
                name
            );
            feature_stream_ids.push(id);
        }

        let mut output_streams = input_streams.clone();
        if let ImageTransform::Scale(scale) = &transform {
            for &id in &feature_stream_ids {
                output_streams[id].element_type = scale.output_element_type();
                output_streams[id].sample_layout = scale.output_layout();
            }
        }

        Ok(Self {
            next,
            transform,
            feature_stream_ids,
            input_streams,
            output_streams,
            rngs: RngPool::new(seed),
        })
    }

    /// Gives the upstream source back, tearing this stage down.
    pub fn into_source(self) -> Box<dyn SequenceSource> {
        self.next
    }
}

impl SequenceSource for TransformStage {
    fn streams(&self) -> Vec<StreamDescription> {
        self.output_streams.clone()
    }

    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()> {
        self.next.start_epoch(config)
    }

    fn get_next_sequences(&mut self, count: usize) -> Result<Sequences> {
        let mut sequences = self.next.get_next_sequences(count)?;
        if sequences.is_empty() {
            return Ok(sequences);
        }

        let transform = &self.transform;
        let feature_stream_ids = &self.feature_stream_ids;
        let input_streams = &self.input_streams;
        let rngs = &self.rngs;

        let data = std::mem::take(&mut sequences.data);
        let transformed = data
            .into_par_iter()
            .map(|mut sample| {
                ensure!(
                    sample.len() == input_streams.len(),
                    "Sample carries {} streams, expected {}",
                    sample.len(),
                    input_streams.len()
                );
                for &id in feature_stream_ids {
                    let stream = &input_streams[id];
                    let dense = match &sample[id] {
                        SequenceData::Dense(dense) => dense,
                        SequenceData::Sparse(_) => bail!(
                            "Feature stream '{}' delivered sparse data to a transform",
                            stream.name
                        ),
                    };
                    let number_of_samples = dense.number_of_samples;
                    let mut mat = MatBuffer::from_bytes(
                        &dense.data,
                        dense.sample_layout,
                        stream.element_type,
                    )?;

                    let mut rng = rngs.pop();
                    let applied = transform.apply(&mut mat, &mut rng);
                    rngs.push(rng);
                    applied?;

                    let sample_layout = mat.layout();
                    sample[id] = SequenceData::Dense(DenseSequenceData {
                        data: mat.into_bytes(),
                        number_of_samples,
                        sample_layout,
                    });
                }
                Ok(sample)
            })
            .collect::<Result<Vec<_>>>()?;
        sequences.data = transformed;
        Ok(sequences)
    }
}
