use anyhow::{ensure, Result};
use input_pipeline::{
    DenseSequenceData, Deserializer, ElementType, EpochConfiguration, SampleLayout, SequenceData,
    SequenceDescription, Sequences, SparseSequenceData, StorageType, StreamDescription,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Chunk residency bookkeeping shared with the test body.
#[derive(Debug, Default)]
pub struct ResidencyStats {
    pub resident: HashSet<usize>,
    pub max_resident_samples: usize,
    pub require_calls: usize,
    pub release_calls: usize,
}

/// Frame-mode in-memory corpus: `num_chunks` chunks of `sequences_per_chunk`
/// single-sample f32 sequences. Element `k` of sequence `id` holds
/// `id * 10_000 + k`, so ids and full payloads can be recovered from packed
/// minibatches. Optionally adds a sparse one-hot "labels" stream with class
/// `id % classes`.
pub struct InMemoryDeserializer {
    streams: Vec<StreamDescription>,
    timeline: Vec<SequenceDescription>,
    sequences_per_chunk: usize,
    sample_layout: SampleLayout,
    label_classes: Option<usize>,
    stats: Arc<Mutex<ResidencyStats>>,
}

impl InMemoryDeserializer {
    pub fn new(num_chunks: usize, sequences_per_chunk: usize, sample_layout: SampleLayout) -> Self {
        let timeline = (0..num_chunks * sequences_per_chunk)
            .map(|id| SequenceDescription {
                id,
                chunk_id: id / sequences_per_chunk,
                number_of_samples: 1,
            })
            .collect();
        Self {
            streams: vec![StreamDescription::new(
                0,
                "features",
                ElementType::F32,
                StorageType::Dense,
                sample_layout,
            )],
            timeline,
            sequences_per_chunk,
            sample_layout,
            label_classes: None,
            stats: Arc::new(Mutex::new(ResidencyStats::default())),
        }
    }

    /// Adds a sparse CSC one-hot "labels" stream of `classes` rows.
    pub fn with_one_hot_labels(mut self, classes: usize) -> Self {
        self.streams.push(StreamDescription::new(
            1,
            "labels",
            ElementType::F32,
            StorageType::SparseCsc,
            SampleLayout::new(classes, 1, 1),
        ));
        self.label_classes = Some(classes);
        self
    }

    pub fn stats(&self) -> Arc<Mutex<ResidencyStats>> {
        self.stats.clone()
    }

    pub fn feature_payload(&self, id: usize) -> Vec<f32> {
        (0..self.sample_layout.num_elements())
            .map(|k| (id * 10_000 + k) as f32)
            .collect()
    }

    fn feature_data(&self, id: usize) -> SequenceData {
        let bytes: Vec<u8> = self
            .feature_payload(id)
            .into_iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        SequenceData::Dense(DenseSequenceData {
            data: Arc::from(bytes.into_boxed_slice()),
            number_of_samples: 1,
            sample_layout: self.sample_layout,
        })
    }

    fn label_data(&self, id: usize, classes: usize) -> SequenceData {
        let bytes: Vec<u8> = 1.0f32.to_ne_bytes().to_vec();
        SequenceData::Sparse(SparseSequenceData {
            values: Arc::from(bytes.into_boxed_slice()),
            indices: vec![vec![id % classes]],
            number_of_samples: 1,
            sample_layout: SampleLayout::new(classes, 1, 1),
        })
    }
}

impl Deserializer for InMemoryDeserializer {
    fn stream_descriptions(&self) -> &[StreamDescription] {
        &self.streams
    }

    fn sequence_descriptions(&self) -> &[SequenceDescription] {
        &self.timeline
    }

    fn start_epoch(&mut self, _config: &EpochConfiguration) -> Result<()> {
        Ok(())
    }

    fn require_chunk(&mut self, chunk_index: usize) -> Result<()> {
        let mut stats = self.stats.lock().unwrap();
        stats.require_calls += 1;
        stats.resident.insert(chunk_index);
        let resident_samples = stats.resident.len() * self.sequences_per_chunk;
        stats.max_resident_samples = stats.max_resident_samples.max(resident_samples);
        Ok(())
    }

    fn release_chunk(&mut self, chunk_index: usize) {
        let mut stats = self.stats.lock().unwrap();
        stats.release_calls += 1;
        stats.resident.remove(&chunk_index);
    }

    fn sequences_by_id(&mut self, ids: &[usize]) -> Result<Vec<Vec<SequenceData>>> {
        let resident = self.stats.lock().unwrap().resident.clone();
        ids.iter()
            .map(|&id| {
                ensure!(
                    resident.contains(&(id / self.sequences_per_chunk)),
                    "Sequence {} requested from chunk {} which is not resident",
                    id,
                    id / self.sequences_per_chunk
                );
                let mut sample = vec![self.feature_data(id)];
                if let Some(classes) = self.label_classes {
                    sample.push(self.label_data(id, classes));
                }
                Ok(sample)
            })
            .collect()
    }
}

/// Recovers the original sequence ids from a batch produced by the
/// deserializer above (first payload element / 10_000).
pub fn sequence_ids(sequences: &Sequences) -> Vec<usize> {
    sequences
        .data
        .iter()
        .map(|sample| match &sample[0] {
            SequenceData::Dense(dense) => {
                let first = f32::from_ne_bytes(dense.data[0..4].try_into().unwrap());
                first as usize / 10_000
            }
            SequenceData::Sparse(_) => panic!("feature stream is dense"),
        })
        .collect()
}
