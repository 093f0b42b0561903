//! The reader facade consumed by the training loop.
//!
//! Wires the pipeline together — randomizer, per-feature crop/scale/mean
//! stages, packer — and exposes the minibatch loop: start an epoch (optionally
//! distributed), then fill caller-provided named destinations until the epoch
//! is exhausted.

use crate::config::{EpochConfiguration, ReaderConfig};
use crate::deserializer::Deserializer;
use crate::memory::MemoryProvider;
use crate::packer::{FrameModePacker, MinibatchLayout};
use crate::randomizer::BlockRandomizer;
use crate::stream::{ElementType, StreamDescription};
use crate::transforms::{
    CropTransform, ImageTransform, MeanTransform, ScaleTransform, SequenceSource, TransformStage,
};
use anyhow::{anyhow, bail, ensure, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A caller-owned destination matrix `get_minibatch` fills by stream name:
/// `rows` sample elements by `cols` samples, column-major by sample.
#[derive(Debug, Default, Clone)]
pub struct DenseMatrix {
    element_type: Option<ElementType>,
    rows: usize,
    cols: usize,
    data: Vec<u8>,
}

impl DenseMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&mut self, rows: usize, cols: usize, element_type: ElementType, bytes: &[u8]) {
        self.rows = rows;
        self.cols = cols;
        self.element_type = Some(element_type);
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn element_type(&self) -> Option<ElementType> {
        self.element_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the buffer as f32 values.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self.element_type {
            Some(ElementType::F32) => Ok(self
                .data
                .chunks_exact(4)
                .map(|chunk| f32::from_ne_bytes(chunk.try_into().expect("4-byte chunk")))
                .collect()),
            other => bail!("Matrix holds {:?}, not f32", other),
        }
    }

    /// Decodes the buffer as f64 values.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        match self.element_type {
            Some(ElementType::F64) => Ok(self
                .data
                .chunks_exact(8)
                .map(|chunk| f64::from_ne_bytes(chunk.try_into().expect("8-byte chunk")))
                .collect()),
            other => bail!("Matrix holds {:?}, not f64", other),
        }
    }
}

enum Pipeline {
    /// Built chain, no packer yet; the packer is created on the first
    /// minibatch loop once the minibatch size is known.
    Chain(Box<dyn SequenceSource>),
    Packed(FrameModePacker),
}

pub struct Reader {
    pipeline: Option<Pipeline>,
    memory_provider: Arc<dyn MemoryProvider>,
    output_streams: Vec<StreamDescription>,
    name_to_stream_id: HashMap<String, usize>,
    layout: MinibatchLayout,
    end_of_epoch: bool,
}

impl Reader {
    /// Validates the configuration and assembles
    /// randomizer -> (crop -> scale -> mean per feature) pipeline stages.
    pub fn new<D: Deserializer + 'static>(
        config: &ReaderConfig,
        deserializer: D,
        memory_provider: Arc<dyn MemoryProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let randomizer = BlockRandomizer::new(
            config.verbosity,
            config.randomization_window,
            deserializer,
        )?;
        let mut source: Box<dyn SequenceSource> = Box::new(randomizer);

        let mut stage_seed = config.seed;
        for feature in &config.features {
            let stream = source
                .streams()
                .into_iter()
                .find(|stream| stream.name == feature.stream_name)
                .ok_or_else(|| {
                    anyhow!("Configured feature stream '{}' does not exist", feature.stream_name)
                })?;
            let feature_names = std::slice::from_ref(&feature.stream_name);

            let crop = CropTransform::new(feature)?;
            source = Box::new(TransformStage::new(
                source,
                ImageTransform::Crop(crop),
                feature_names,
                stage_seed,
            )?);
            stage_seed = stage_seed.wrapping_add(1);

            let scale = ScaleTransform::new(feature, &stream)?;
            source = Box::new(TransformStage::new(
                source,
                ImageTransform::Scale(scale),
                feature_names,
                stage_seed,
            )?);
            stage_seed = stage_seed.wrapping_add(1);

            let mean = MeanTransform::new(feature)?;
            source = Box::new(TransformStage::new(
                source,
                ImageTransform::Mean(mean),
                feature_names,
                stage_seed,
            )?);
            stage_seed = stage_seed.wrapping_add(1);
        }

        // Sparse streams are densified by the packer, so every output
        // stream is dense.
        let mut output_streams = source.streams();
        for stream in &mut output_streams {
            stream.storage = crate::stream::StorageType::Dense;
        }

        // Minibatch streams are addressed by position, so the name map only
        // works when stream ids are positional.
        for (position, stream) in output_streams.iter().enumerate() {
            ensure!(
                stream.id == position,
                "Stream '{}' has id {} at position {}; stream ids must be 0, 1, 2, ...",
                stream.name,
                stream.id,
                position
            );
        }
        let name_to_stream_id = output_streams
            .iter()
            .map(|stream| (stream.name.clone(), stream.id))
            .collect();

        info!(
            streams = ?output_streams.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            features = config.features.len(),
            "initialized reader pipeline"
        );

        Ok(Self {
            pipeline: Some(Pipeline::Chain(source)),
            memory_provider,
            output_streams,
            name_to_stream_id,
            layout: MinibatchLayout::new(config.num_parallel_sequences, 0),
            end_of_epoch: false,
        })
    }

    /// Begins an epoch for a single worker.
    pub fn start_minibatch_loop(
        &mut self,
        minibatch_size: usize,
        epoch: usize,
        requested_epoch_samples: Option<usize>,
    ) -> Result<()> {
        self.start_distributed_minibatch_loop(minibatch_size, epoch, 0, 1, requested_epoch_samples)
    }

    /// Begins an epoch for one worker of a distributed run.
    /// `requested_epoch_samples = None` means "one sweep".
    pub fn start_distributed_minibatch_loop(
        &mut self,
        minibatch_size: usize,
        epoch: usize,
        subset_index: usize,
        num_subsets: usize,
        requested_epoch_samples: Option<usize>,
    ) -> Result<()> {
        let epoch_config = EpochConfiguration {
            index: epoch,
            total_size: requested_epoch_samples,
            minibatch_size,
            worker_rank: subset_index,
            number_of_workers: num_subsets,
        };

        let mut packer = match self.pipeline.take() {
            Some(Pipeline::Packed(packer)) if packer.minibatch_size() == minibatch_size => packer,
            Some(Pipeline::Packed(packer)) => FrameModePacker::new(
                self.memory_provider.clone(),
                packer.into_source(),
                minibatch_size,
                self.output_streams.clone(),
            )?,
            Some(Pipeline::Chain(source)) => FrameModePacker::new(
                self.memory_provider.clone(),
                source,
                minibatch_size,
                self.output_streams.clone(),
            )?,
            None => bail!("Reader pipeline is gone after an earlier failure"),
        };

        let started = packer.start_epoch(&epoch_config);
        self.pipeline = Some(Pipeline::Packed(packer));
        started?;

        self.end_of_epoch = false;
        Ok(())
    }

    /// Fills every destination in `matrices` from the next minibatch.
    ///
    /// Returns `false` once the epoch is exhausted and nothing remains; a
    /// partial terminal minibatch is still delivered (returning `true`), and
    /// every later call returns `false` until a new loop starts.
    pub fn get_minibatch(&mut self, matrices: &mut HashMap<String, DenseMatrix>) -> Result<bool> {
        if self.end_of_epoch {
            return Ok(false);
        }

        let packer = match &mut self.pipeline {
            Some(Pipeline::Packed(packer)) => packer,
            _ => bail!("start_minibatch_loop must be called before get_minibatch"),
        };

        let minibatch = packer.read_minibatch()?;
        if minibatch.at_end_of_epoch {
            self.end_of_epoch = true;
        }
        if minibatch.is_empty() {
            return Ok(false);
        }
        self.layout = minibatch.layout.clone();

        for (name, destination) in matrices.iter_mut() {
            let &stream_id = self
                .name_to_stream_id
                .get(name)
                .ok_or_else(|| anyhow!("Unknown stream '{}' requested from the reader", name))?;
            let stream = &minibatch.streams[stream_id];
            destination.set_value(
                stream.sample_elements,
                stream.num_samples,
                stream.element_type,
                stream.data,
            );
        }
        Ok(true)
    }

    /// Stream descriptions of the packed output.
    pub fn streams(&self) -> &[StreamDescription] {
        &self.output_streams
    }

    pub fn num_parallel_sequences(&self) -> usize {
        self.layout.num_parallel_sequences()
    }

    pub fn copy_layout_to(&self, layout: &mut MinibatchLayout) {
        layout.copy_from(&self.layout);
    }
}
