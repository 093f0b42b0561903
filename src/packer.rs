//! Packs transformed single-sample sequences into per-stream minibatch
//! buffers.
//!
//! The packer pulls `minibatch_size` sequences from the transform chain and
//! materializes one contiguous buffer per output stream, sample `i` at byte
//! offset `i * sample_bytes`. Buffers come from the `MemoryProvider` once at
//! construction and are reused for every minibatch.

use crate::config::EpochConfiguration;
use crate::memory::{MemoryProvider, StreamBuffer};
use crate::stream::{ElementType, StorageType, StreamDescription};
use crate::timeline::SequenceData;
use crate::transforms::SequenceSource;
use anyhow::{bail, ensure, Result};
use std::sync::Arc;

/// Logical layout shared by every stream of a minibatch: how many parallel
/// sequences it carries and how many time steps each spans. Frame mode packs
/// one time step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinibatchLayout {
    num_parallel_sequences: usize,
    num_time_steps: usize,
}

impl MinibatchLayout {
    pub fn new(num_parallel_sequences: usize, num_time_steps: usize) -> Self {
        Self {
            num_parallel_sequences,
            num_time_steps,
        }
    }

    pub fn init(&mut self, num_parallel_sequences: usize, num_time_steps: usize) {
        self.num_parallel_sequences = num_parallel_sequences;
        self.num_time_steps = num_time_steps;
    }

    pub fn num_parallel_sequences(&self) -> usize {
        self.num_parallel_sequences
    }

    pub fn num_time_steps(&self) -> usize {
        self.num_time_steps
    }

    pub fn copy_from(&mut self, other: &MinibatchLayout) {
        *self = other.clone();
    }
}

/// One stream's slice of a packed minibatch.
#[derive(Debug)]
pub struct StreamMinibatch<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
    pub num_samples: usize,
    pub element_type: ElementType,
    pub sample_elements: usize,
}

/// A packed minibatch. The per-stream data borrows the packer's reusable
/// buffers, so it is valid until the next `read_minibatch` call.
#[derive(Debug)]
pub struct Minibatch<'a> {
    pub streams: Vec<StreamMinibatch<'a>>,
    pub at_end_of_epoch: bool,
    pub layout: MinibatchLayout,
}

impl Minibatch<'_> {
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

pub struct FrameModePacker {
    source: Box<dyn SequenceSource>,
    output_streams: Vec<StreamDescription>,
    stream_buffers: Vec<StreamBuffer>,
    /// Bytes of one sample per stream, derived from the output description.
    sample_bytes: Vec<usize>,
    layout: MinibatchLayout,
    minibatch_size: usize,
}

impl FrameModePacker {
    /// Allocates one reusable buffer per output stream and validates that
    /// the chain's streams line up with the requested output.
    pub fn new(
        memory_provider: Arc<dyn MemoryProvider>,
        source: Box<dyn SequenceSource>,
        minibatch_size: usize,
        output_streams: Vec<StreamDescription>,
    ) -> Result<Self> {
        ensure!(minibatch_size > 0, "Minibatch size must be > 0");

        let input_streams = source.streams();
        ensure!(
            input_streams.len() == output_streams.len(),
            "Chain produces {} streams but {} output streams were configured",
            input_streams.len(),
            output_streams.len()
        );

        let mut stream_buffers = Vec::with_capacity(output_streams.len());
        let mut sample_bytes = Vec::with_capacity(output_streams.len());
        for (input, output) in input_streams.iter().zip(output_streams.iter()) {
            ensure!(
                output.storage != StorageType::SparseCsc,
                "Output stream '{}' cannot be sparse",
                output.name
            );
            ensure!(
                output.element_type.is_float(),
                "Output stream '{}' must be f32 or f64",
                output.name
            );
            ensure!(
                input.element_type == output.element_type
                    && input.sample_layout.num_elements() == output.sample_layout.num_elements(),
                "Transformed stream '{}' ({:?}, {} elements) does not match the configured output ({:?}, {} elements)",
                input.name,
                input.element_type,
                input.sample_layout.num_elements(),
                output.element_type,
                output.sample_layout.num_elements()
            );

            let bytes = output.sample_bytes()?;
            stream_buffers.push(StreamBuffer::allocate(
                memory_provider.clone(),
                output.element_type.size_in_bytes(),
                minibatch_size * output.sample_layout.num_elements(),
            )?);
            sample_bytes.push(bytes);
        }

        Ok(Self {
            source,
            output_streams,
            stream_buffers,
            sample_bytes,
            layout: MinibatchLayout::default(),
            minibatch_size,
        })
    }

    pub fn streams(&self) -> &[StreamDescription] {
        &self.output_streams
    }

    pub fn minibatch_size(&self) -> usize {
        self.minibatch_size
    }

    /// Tears the packer down, giving the upstream chain back.
    pub fn into_source(self) -> Box<dyn SequenceSource> {
        self.source
    }

    pub fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()> {
        self.source.start_epoch(config)
    }

    /// Pulls one minibatch through the chain and packs it.
    ///
    /// A partial batch at the end of the epoch is still packed and returned
    /// with `at_end_of_epoch` set; an exhausted epoch yields an empty batch.
    pub fn read_minibatch(&mut self) -> Result<Minibatch<'_>> {
        let sequences = self.source.get_next_sequences(self.minibatch_size)?;
        let at_end_of_epoch = sequences.end_of_epoch;
        let num_samples = sequences.len();

        for (i, sample) in sequences.data.iter().enumerate() {
            ensure!(
                sample.len() == self.stream_buffers.len(),
                "Sample {} carries {} streams, expected {}",
                i,
                sample.len(),
                self.stream_buffers.len()
            );
            for (j, data) in sample.iter().enumerate() {
                let sample_bytes = self.sample_bytes[j];
                let element_size = self.output_streams[j].element_type.size_in_bytes();
                let slot =
                    &mut self.stream_buffers[j].as_mut_slice()[i * sample_bytes..(i + 1) * sample_bytes];
                match data {
                    SequenceData::Dense(dense) => {
                        ensure!(
                            dense.number_of_samples == 1,
                            "Frame-mode packing requires single-sample sequences, got {}",
                            dense.number_of_samples
                        );
                        ensure!(
                            dense.data.len() == sample_bytes,
                            "Stream '{}' sample has {} bytes, expected {}",
                            self.output_streams[j].name,
                            dense.data.len(),
                            sample_bytes
                        );
                        slot.copy_from_slice(&dense.data);
                    }
                    SequenceData::Sparse(sparse) => {
                        ensure!(
                            sparse.indices.len() == 1,
                            "Frame-mode packing requires single-sample sequences, got {}",
                            sparse.indices.len()
                        );
                        slot.fill(0);
                        let rows = &sparse.indices[0];
                        ensure!(
                            sparse.values.len() >= rows.len() * element_size,
                            "Sparse stream '{}' carries {} values for {} indices",
                            self.output_streams[j].name,
                            sparse.values.len() / element_size,
                            rows.len()
                        );
                        for (n, &row) in rows.iter().enumerate() {
                            let Some(slot_range) = row
                                .checked_mul(element_size)
                                .filter(|&offset| offset + element_size <= sample_bytes)
                            else {
                                bail!(
                                    "Sparse row index {} out of range for stream '{}'",
                                    row,
                                    self.output_streams[j].name
                                );
                            };
                            slot[slot_range..slot_range + element_size].copy_from_slice(
                                &sparse.values[n * element_size..(n + 1) * element_size],
                            );
                        }
                    }
                }
            }
        }

        if num_samples == 0 {
            return Ok(Minibatch {
                streams: Vec::new(),
                at_end_of_epoch,
                layout: self.layout.clone(),
            });
        }

        self.layout.init(num_samples, 1);
        let layout = self.layout.clone();
        let streams = self
            .output_streams
            .iter()
            .zip(self.stream_buffers.iter())
            .zip(self.sample_bytes.iter())
            .map(|((stream, buffer), &bytes)| StreamMinibatch {
                name: &stream.name,
                data: &buffer.as_slice()[..num_samples * bytes],
                num_samples,
                element_type: stream.element_type,
                sample_elements: stream.sample_layout.num_elements(),
            })
            .collect();

        Ok(Minibatch {
            streams,
            at_end_of_epoch,
            layout,
        })
    }
}
