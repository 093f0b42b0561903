use anyhow::{bail, Result};

/// Element type of the values carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    F32,
    F64,
    U8,
}

impl ElementType {
    /// Returns the size of one element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            ElementType::F32 => std::mem::size_of::<f32>(),
            ElementType::F64 => std::mem::size_of::<f64>(),
            ElementType::U8 => std::mem::size_of::<u8>(),
        }
    }

    /// Whether this is one of the floating-point element types.
    pub fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }
}

/// How a stream's sample values are stored on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Dense,
    SparseCsc,
}

/// Dimensions of a single sample: width x height with interleaved channels.
///
/// A sample wraps as a 2-D matrix with `rows = width` and `cols = height`;
/// the channel values of one pixel are adjacent in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl SampleLayout {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
        }
    }

    /// Total number of scalar elements in one sample.
    pub fn num_elements(&self) -> usize {
        self.width * self.height * self.channels
    }

    /// Total number of bytes one sample occupies for the given element type.
    pub fn num_bytes(&self, element_type: ElementType) -> usize {
        self.num_elements() * element_type.size_in_bytes()
    }
}

/// A named data stream produced by the pipeline (e.g. "features", "labels").
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescription {
    pub id: usize,
    pub name: String,
    pub element_type: ElementType,
    pub storage: StorageType,
    pub sample_layout: SampleLayout,
}

impl StreamDescription {
    pub fn new(
        id: usize,
        name: impl Into<String>,
        element_type: ElementType,
        storage: StorageType,
        sample_layout: SampleLayout,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            element_type,
            storage,
            sample_layout,
        }
    }

    /// Bytes occupied by one sample of this stream.
    pub fn sample_bytes(&self) -> Result<usize> {
        if self.sample_layout.num_elements() == 0 {
            bail!(
                "Stream '{}' has an empty sample layout {:?}",
                self.name,
                self.sample_layout
            );
        }
        Ok(self.sample_layout.num_bytes(self.element_type))
    }
}
