//! Interface to the on-disk data deserializer.
//!
//! The deserializer owns the decoded chunk data; the randomizer only drives
//! chunk residency through `require_chunk` / `release_chunk` and pulls
//! decoded payloads by original sequence id. Both calls are idempotent on
//! the deserializer side.

use crate::config::EpochConfiguration;
use crate::stream::StreamDescription;
use crate::timeline::{SequenceData, SequenceDescription};
use anyhow::Result;

pub trait Deserializer: Send {
    /// Descriptions of the streams this deserializer produces.
    fn stream_descriptions(&self) -> &[StreamDescription];

    /// The corpus timeline. Read once at randomizer construction.
    fn sequence_descriptions(&self) -> &[SequenceDescription];

    /// Signals the start of a new epoch.
    fn start_epoch(&mut self, config: &EpochConfiguration) -> Result<()>;

    /// Ensures the chunk with the given original index is decoded and
    /// resident. Idempotent.
    fn require_chunk(&mut self, chunk_index: usize) -> Result<()>;

    /// Releases the chunk with the given original index. Idempotent; called
    /// for chunks that may never have been required.
    fn release_chunk(&mut self, chunk_index: usize);

    /// Fetches decoded payloads for the given original sequence ids, indexed
    /// `[sequence][stream]`. Every requested sequence must belong to a
    /// currently required chunk.
    fn sequences_by_id(&mut self, ids: &[usize]) -> Result<Vec<Vec<SequenceData>>>;
}
