//! Corpus timeline and the sequence transport passed between pipeline stages.

use crate::stream::SampleLayout;
use anyhow::{ensure, Result};
use std::sync::Arc;

/// A logical record of the corpus.
///
/// Inside the randomizer, `chunk_id` is rewritten to the chunk's position on
/// the randomized timeline; in the corpus timeline it is the physical chunk
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceDescription {
    pub id: usize,
    pub chunk_id: usize,
    pub number_of_samples: usize,
}

/// The ordered sequence descriptions of the whole corpus, as supplied by the
/// deserializer.
pub type Timeline = Vec<SequenceDescription>;

/// Checks the structural invariants of a corpus timeline:
/// ids form the sequence `0, 1, 2, ...`; chunk ids start at 0 and are
/// non-decreasing with steps of at most 1; every sequence holds at least one
/// sample.
pub fn validate_timeline(timeline: &[SequenceDescription]) -> Result<()> {
    ensure!(!timeline.is_empty(), "Corpus timeline must not be empty");

    let mut previous_chunk = 0;
    for (position, sequence) in timeline.iter().enumerate() {
        ensure!(
            sequence.id == position,
            "Sequence at position {} has id {}; ids must be 0, 1, 2, ...",
            position,
            sequence.id
        );
        ensure!(
            sequence.number_of_samples >= 1,
            "Sequence {} has no samples",
            sequence.id
        );
        if position == 0 {
            ensure!(
                sequence.chunk_id == 0,
                "First sequence must belong to chunk 0, got chunk {}",
                sequence.chunk_id
            );
        } else {
            ensure!(
                sequence.chunk_id >= previous_chunk && sequence.chunk_id <= previous_chunk + 1,
                "Sequence {} has chunk id {} after chunk id {}; chunk ids must be non-decreasing with steps of at most 1",
                sequence.id,
                sequence.chunk_id,
                previous_chunk
            );
        }
        previous_chunk = sequence.chunk_id;
    }
    Ok(())
}

/// First sequence and sample position of a physical chunk on the corpus
/// timeline. A sentinel element carrying the corpus totals follows the last
/// real chunk so `info[k + 1] - info[k]` works for every `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInformation {
    pub sequence_position_start: usize,
    pub sample_position_start: usize,
}

/// Decoded payload of one dense sequence: raw bytes of
/// `number_of_samples * sample_layout.num_elements()` values, interleaved by
/// channel. The bytes are shared so chunk ownership can stay with the
/// deserializer while downstream stages hold views.
#[derive(Debug, Clone)]
pub struct DenseSequenceData {
    pub data: Arc<[u8]>,
    pub number_of_samples: usize,
    pub sample_layout: SampleLayout,
}

/// Decoded payload of one sparse (CSC) sequence: the non-zero values packed
/// back to back, and for each sample the row index of every non-zero value.
#[derive(Debug, Clone)]
pub struct SparseSequenceData {
    pub values: Arc<[u8]>,
    pub indices: Vec<Vec<usize>>,
    pub number_of_samples: usize,
    pub sample_layout: SampleLayout,
}

/// Per-stream payload of one sequence.
#[derive(Debug, Clone)]
pub enum SequenceData {
    Dense(DenseSequenceData),
    Sparse(SparseSequenceData),
}

impl SequenceData {
    pub fn number_of_samples(&self) -> usize {
        match self {
            SequenceData::Dense(dense) => dense.number_of_samples,
            SequenceData::Sparse(sparse) => sparse.number_of_samples,
        }
    }

    pub fn sample_layout(&self) -> SampleLayout {
        match self {
            SequenceData::Dense(dense) => dense.sample_layout,
            SequenceData::Sparse(sparse) => sparse.sample_layout,
        }
    }
}

/// Batch transport between pipeline stages.
///
/// `data` is indexed `[sample][stream]`. `end_of_epoch` is set when the epoch
/// sample budget is exhausted; the batch may still carry a final partial set
/// of sequences.
#[derive(Debug, Default)]
pub struct Sequences {
    pub data: Vec<Vec<SequenceData>>,
    pub end_of_epoch: bool,
}

impl Sequences {
    pub fn empty(end_of_epoch: bool) -> Self {
        Self {
            data: Vec::new(),
            end_of_epoch,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(id: usize, chunk_id: usize, samples: usize) -> SequenceDescription {
        SequenceDescription {
            id,
            chunk_id,
            number_of_samples: samples,
        }
    }

    #[test]
    fn accepts_well_formed_timeline() {
        let timeline = vec![
            sequence(0, 0, 1),
            sequence(1, 0, 1),
            sequence(2, 1, 1),
            sequence(3, 2, 1),
            sequence(4, 2, 1),
        ];
        assert!(validate_timeline(&timeline).is_ok());
    }

    #[test]
    fn rejects_empty_timeline() {
        assert!(validate_timeline(&[]).is_err());
    }

    #[test]
    fn rejects_non_monotonic_ids() {
        let timeline = vec![sequence(0, 0, 1), sequence(2, 0, 1)];
        assert!(validate_timeline(&timeline).is_err());
    }

    #[test]
    fn rejects_chunk_gap() {
        let timeline = vec![sequence(0, 0, 1), sequence(1, 2, 1)];
        assert!(validate_timeline(&timeline).is_err());
    }

    #[test]
    fn rejects_decreasing_chunk_ids() {
        let timeline = vec![sequence(0, 0, 1), sequence(1, 1, 1), sequence(2, 0, 1)];
        assert!(validate_timeline(&timeline).is_err());
    }

    #[test]
    fn rejects_empty_sequences() {
        let timeline = vec![sequence(0, 0, 0)];
        assert!(validate_timeline(&timeline).is_err());
    }

    #[test]
    fn rejects_nonzero_first_chunk() {
        let timeline = vec![sequence(0, 1, 1)];
        assert!(validate_timeline(&timeline).is_err());
    }
}
