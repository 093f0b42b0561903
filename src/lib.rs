//! Core of a training-data input pipeline: a composable reader that globally
//! randomizes a chunked corpus under a bounded-memory window and assembles
//! fixed-size minibatches after a chain of image transformations.
//!
//! # Architecture Overview
//!
//! The pipeline is pull-based; control flows downstream-to-upstream, data
//! flows upstream-to-downstream:
//!
//! ```text
//!   ┌──────────────┐
//!   │ Deserializer │  (external: owns decoded chunks, serves sequences)
//!   └──────┬───────┘
//!          │ require/release chunks, sequences by id
//!          ↓
//!   ┌─────────────────┐
//!   │ BlockRandomizer │  (sweep-keyed shuffle under a locality window,
//!   └──────┬──────────┘   distributed worker partition)
//!          │ randomized sequences
//!          ↓
//!   ┌─────────────────────┐
//!   │ TransformStage chain│  (crop → scale → mean, parallel per sample)
//!   └──────┬──────────────┘
//!          │ transformed sequences
//!          ↓
//!   ┌─────────────────┐
//!   │ FrameModePacker │  (contiguous per-stream minibatch buffers)
//!   └──────┬──────────┘
//!          │ minibatches
//!          ↓
//!   ┌────────┐
//!   │ Reader │  (epoch loop, named destination matrices)
//!   └────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let config = ReaderConfig::builder()
//!     .seed(42)
//!     .randomization_window(30_000)
//!     .feature(
//!         TransformConfig::new("features", 224, 224, 3)
//!             .with_crop_type("random")
//!             .with_crop_ratio(&[0.875])
//!             .with_interpolations("linear:cubic"),
//!     )
//!     .build();
//!
//! let mut reader = Reader::new(&config, deserializer, Arc::new(HeapMemoryProvider::new()))?;
//! reader.start_minibatch_loop(256, 0, None)?;
//!
//! let mut matrices = HashMap::new();
//! matrices.insert("features".to_string(), DenseMatrix::new());
//! while reader.get_minibatch(&mut matrices)? {
//!     // feed matrices["features"] to the trainer
//! }
//! ```

pub mod config;
pub mod deserializer;
pub mod memory;
pub mod packer;
pub mod randomizer;
pub mod reader;
pub mod stream;
pub mod timeline;
pub mod transforms;

pub use config::{EpochConfiguration, ReaderConfig, TransformConfig};
pub use deserializer::Deserializer;
pub use memory::{HeapMemoryProvider, MemoryProvider, StreamBuffer};
pub use packer::{FrameModePacker, Minibatch, MinibatchLayout, StreamMinibatch};
pub use randomizer::BlockRandomizer;
pub use reader::{DenseMatrix, Reader};
pub use stream::{ElementType, SampleLayout, StorageType, StreamDescription};
pub use timeline::{
    DenseSequenceData, SequenceData, SequenceDescription, Sequences, SparseSequenceData, Timeline,
};
pub use transforms::{
    CropTransform, CropType, Filter, ImageTransform, JitterType, Mat, MatBuffer, MeanTransform,
    RngPool, ScaleTransform, SequenceSource, TransformStage,
};
