//! Element-generic pixel matrix the transform bodies operate on.
//!
//! A `Mat` wraps one decoded sample as a 2-D matrix (`rows = width`,
//! `cols = height`) with interleaved channels, the layout the deserializer
//! emits. `MatBuffer` erases the element type so one transform chain can
//! serve u8, f32 and f64 streams.

use crate::stream::{ElementType, SampleLayout};
use anyhow::{bail, ensure, Result};
use std::sync::Arc;

/// Scalar types a pixel matrix can hold.
pub trait Element: Copy + Send + Sync + 'static {
    const ELEMENT_TYPE: ElementType;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    fn from_ne_bytes(bytes: &[u8]) -> Self;
    fn extend_ne_bytes(self, out: &mut Vec<u8>);
}

impl Element for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::F32;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_ne_bytes(bytes: &[u8]) -> Self {
        f32::from_ne_bytes(bytes.try_into().expect("4-byte chunk"))
    }

    fn extend_ne_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }
}

impl Element for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::F64;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_ne_bytes(bytes: &[u8]) -> Self {
        f64::from_ne_bytes(bytes.try_into().expect("8-byte chunk"))
    }

    fn extend_ne_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }
}

impl Element for u8 {
    const ELEMENT_TYPE: ElementType = ElementType::U8;

    fn from_f64(value: f64) -> Self {
        value.round().clamp(0.0, 255.0) as u8
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_ne_bytes(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn extend_ne_bytes(self, out: &mut Vec<u8>) {
        out.push(self);
    }
}

/// Resampling filter used by `Mat::resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
    Cubic,
    Lanczos,
}

/// A 2-D pixel matrix with interleaved channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Mat<T> {
    rows: usize,
    cols: usize,
    channels: usize,
    data: Vec<T>,
}

impl<T: Element> Mat<T> {
    pub fn from_vec(rows: usize, cols: usize, channels: usize, data: Vec<T>) -> Result<Self> {
        ensure!(
            rows > 0 && cols > 0 && channels > 0,
            "Matrix dimensions must be positive (got {}x{}x{})",
            rows,
            cols,
            channels
        );
        ensure!(
            data.len() == rows * cols * channels,
            "Matrix data has {} elements, expected {}x{}x{} = {}",
            data.len(),
            rows,
            cols,
            channels,
            rows * cols * channels
        );
        Ok(Self {
            rows,
            cols,
            channels,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    fn index(&self, row: usize, col: usize, channel: usize) -> usize {
        (row * self.cols + col) * self.channels + channel
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize, channel: usize) -> T {
        self.data[self.index(row, col, channel)]
    }

    /// Copies out the square sub-matrix of side `side` whose top-left corner
    /// sits at column `x_offset`, row `y_offset`.
    pub fn crop(&self, x_offset: usize, y_offset: usize, side: usize) -> Result<Mat<T>> {
        ensure!(side > 0, "Crop side must be positive");
        ensure!(
            x_offset + side <= self.cols && y_offset + side <= self.rows,
            "Crop rectangle {}x{} at ({}, {}) exceeds matrix {}x{}",
            side,
            side,
            x_offset,
            y_offset,
            self.cols,
            self.rows
        );
        let mut data = Vec::with_capacity(side * side * self.channels);
        for row in y_offset..y_offset + side {
            let start = self.index(row, x_offset, 0);
            data.extend_from_slice(&self.data[start..start + side * self.channels]);
        }
        Mat::from_vec(side, side, self.channels, data)
    }

    /// Mirrors the matrix in place along its columns, keeping each pixel's
    /// channel order.
    pub fn flip_horizontal(&mut self) {
        for row in 0..self.rows {
            for col in 0..self.cols / 2 {
                let left = self.index(row, col, 0);
                let right = self.index(row, self.cols - 1 - col, 0);
                for channel in 0..self.channels {
                    self.data.swap(left + channel, right + channel);
                }
            }
        }
    }

    /// Converts every element to another scalar type.
    pub fn convert<U: Element>(&self) -> Mat<U> {
        Mat {
            rows: self.rows,
            cols: self.cols,
            channels: self.channels,
            data: self.data.iter().map(|&v| U::from_f64(v.to_f64())).collect(),
        }
    }

    /// Subtracts `other` elementwise. Shapes must match exactly.
    pub fn subtract(&mut self, other: &Mat<f64>) -> Result<()> {
        ensure!(
            self.rows == other.rows && self.cols == other.cols && self.channels == other.channels,
            "Cannot subtract a {}x{}x{} matrix from a {}x{}x{} one",
            other.rows,
            other.cols,
            other.channels,
            self.rows,
            self.cols,
            self.channels
        );
        for (value, &mean) in self.data.iter_mut().zip(other.data.iter()) {
            *value = T::from_f64(value.to_f64() - mean);
        }
        Ok(())
    }

    /// Resamples to `out_rows` x `out_cols` with the given filter.
    ///
    /// Source coordinates use half-pixel centers with edge clamp, so an
    /// identity-sized resize reproduces the input exactly for every filter.
    pub fn resize(&self, out_rows: usize, out_cols: usize, filter: Filter) -> Result<Mat<T>> {
        ensure!(
            out_rows > 0 && out_cols > 0,
            "Resize target must be positive (got {}x{})",
            out_rows,
            out_cols
        );
        if out_rows == self.rows && out_cols == self.cols {
            return Ok(self.clone());
        }

        let row_scale = self.rows as f64 / out_rows as f64;
        let col_scale = self.cols as f64 / out_cols as f64;

        if filter == Filter::Nearest {
            let mut data = Vec::with_capacity(out_rows * out_cols * self.channels);
            for row in 0..out_rows {
                let src_row = nearest_source(row, row_scale, self.rows);
                for col in 0..out_cols {
                    let src_col = nearest_source(col, col_scale, self.cols);
                    let start = self.index(src_row, src_col, 0);
                    data.extend_from_slice(&self.data[start..start + self.channels]);
                }
            }
            return Mat::from_vec(out_rows, out_cols, self.channels, data);
        }

        let (radius, weight): (f64, fn(f64) -> f64) = match filter {
            Filter::Linear => (1.0, linear_weight),
            Filter::Cubic => (2.0, catmull_rom_weight),
            Filter::Lanczos => (3.0, lanczos3_weight),
            Filter::Nearest => unreachable!(),
        };

        let mut data = vec![T::from_f64(0.0); out_rows * out_cols * self.channels];
        let mut accum = vec![0.0f64; self.channels];
        for row in 0..out_rows {
            let src_row = (row as f64 + 0.5) * row_scale - 0.5;
            let (row_taps, row_weights) = filter_taps(src_row, radius, weight, self.rows);
            for col in 0..out_cols {
                let src_col = (col as f64 + 0.5) * col_scale - 0.5;
                let (col_taps, col_weights) = filter_taps(src_col, radius, weight, self.cols);

                accum.iter_mut().for_each(|v| *v = 0.0);
                let mut weight_sum = 0.0;
                for (tap_row, &row_weight) in row_taps.clone().zip(row_weights.iter()) {
                    for (tap_col, &col_weight) in col_taps.clone().zip(col_weights.iter()) {
                        let tap_weight = row_weight * col_weight;
                        weight_sum += tap_weight;
                        let start = self.index(tap_row, tap_col, 0);
                        for channel in 0..self.channels {
                            accum[channel] += self.data[start + channel].to_f64() * tap_weight;
                        }
                    }
                }

                let out_start = (row * out_cols + col) * self.channels;
                for channel in 0..self.channels {
                    data[out_start + channel] = T::from_f64(accum[channel] / weight_sum);
                }
            }
        }
        Mat::from_vec(out_rows, out_cols, self.channels, data)
    }
}

#[inline]
fn nearest_source(dst: usize, scale: f64, limit: usize) -> usize {
    let src = (dst as f64 + 0.5) * scale - 0.5;
    (src.round().max(0.0) as usize).min(limit - 1)
}

/// Clamped tap positions around `center` plus their filter weights.
fn filter_taps(
    center: f64,
    radius: f64,
    weight: fn(f64) -> f64,
    limit: usize,
) -> (std::ops::Range<usize>, Vec<f64>) {
    let first = (center - radius).ceil().max(0.0) as usize;
    let last = ((center + radius).floor().min(limit as f64 - 1.0)) as usize;
    let weights = (first..=last).map(|tap| weight(center - tap as f64)).collect();
    (first..last + 1, weights)
}

fn linear_weight(x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 {
        1.0 - x
    } else {
        0.0
    }
}

/// Catmull-Rom spline (bicubic, a = -0.5).
fn catmull_rom_weight(x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 {
        1.5 * x * x * x - 2.5 * x * x + 1.0
    } else if x < 2.0 {
        -0.5 * x * x * x + 2.5 * x * x - 4.0 * x + 2.0
    } else {
        0.0
    }
}

/// Lanczos window of size 3.
fn lanczos3_weight(x: f64) -> f64 {
    let x = x.abs();
    if x < 1e-8 {
        1.0
    } else if x < 3.0 {
        let pi_x = std::f64::consts::PI * x;
        3.0 * pi_x.sin() * (pi_x / 3.0).sin() / (pi_x * pi_x)
    } else {
        0.0
    }
}

/// A pixel matrix whose element type is chosen at runtime by the stream
/// descriptor.
#[derive(Debug, Clone)]
pub enum MatBuffer {
    U8(Mat<u8>),
    F32(Mat<f32>),
    F64(Mat<f64>),
}

impl MatBuffer {
    /// Wraps the raw bytes of one decoded sample.
    pub fn from_bytes(
        bytes: &[u8],
        layout: SampleLayout,
        element_type: ElementType,
    ) -> Result<Self> {
        ensure!(
            bytes.len() == layout.num_bytes(element_type),
            "Sample payload has {} bytes, expected {} for layout {:?} of {:?}",
            bytes.len(),
            layout.num_bytes(element_type),
            layout,
            element_type
        );
        let rows = layout.width;
        let cols = layout.height;
        match element_type {
            ElementType::U8 => Ok(MatBuffer::U8(Mat::from_vec(
                rows,
                cols,
                layout.channels,
                bytes.to_vec(),
            )?)),
            ElementType::F32 => Ok(MatBuffer::F32(Mat::from_vec(
                rows,
                cols,
                layout.channels,
                decode_elements(bytes, 4),
            )?)),
            ElementType::F64 => Ok(MatBuffer::F64(Mat::from_vec(
                rows,
                cols,
                layout.channels,
                decode_elements(bytes, 8),
            )?)),
        }
    }

    /// Serializes back into a shareable byte buffer.
    pub fn into_bytes(self) -> Arc<[u8]> {
        fn encode<T: Element>(mat: Mat<T>) -> Arc<[u8]> {
            let mut bytes =
                Vec::with_capacity(mat.data.len() * T::ELEMENT_TYPE.size_in_bytes());
            for value in mat.data {
                value.extend_ne_bytes(&mut bytes);
            }
            bytes.into()
        }
        match self {
            MatBuffer::U8(mat) => encode(mat),
            MatBuffer::F32(mat) => encode(mat),
            MatBuffer::F64(mat) => encode(mat),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            MatBuffer::U8(_) => ElementType::U8,
            MatBuffer::F32(_) => ElementType::F32,
            MatBuffer::F64(_) => ElementType::F64,
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            MatBuffer::U8(mat) => mat.rows(),
            MatBuffer::F32(mat) => mat.rows(),
            MatBuffer::F64(mat) => mat.rows(),
        }
    }

    pub fn cols(&self) -> usize {
        match self {
            MatBuffer::U8(mat) => mat.cols(),
            MatBuffer::F32(mat) => mat.cols(),
            MatBuffer::F64(mat) => mat.cols(),
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            MatBuffer::U8(mat) => mat.channels(),
            MatBuffer::F32(mat) => mat.channels(),
            MatBuffer::F64(mat) => mat.channels(),
        }
    }

    /// The sample layout this matrix serializes back to.
    pub fn layout(&self) -> SampleLayout {
        SampleLayout::new(self.rows(), self.cols(), self.channels())
    }

    /// Converts the matrix to the given floating-point element type.
    pub fn convert_to(&mut self, target: ElementType) -> Result<()> {
        if self.element_type() == target {
            return Ok(());
        }
        let converted = match (&*self, target) {
            (MatBuffer::U8(mat), ElementType::F32) => MatBuffer::F32(mat.convert()),
            (MatBuffer::U8(mat), ElementType::F64) => MatBuffer::F64(mat.convert()),
            (MatBuffer::F32(mat), ElementType::F64) => MatBuffer::F64(mat.convert()),
            (MatBuffer::F64(mat), ElementType::F32) => MatBuffer::F32(mat.convert()),
            (_, ElementType::U8) => bail!("Conversion to u8 is not supported"),
            _ => return Ok(()),
        };
        *self = converted;
        Ok(())
    }

    pub fn crop(&mut self, x_offset: usize, y_offset: usize, side: usize) -> Result<()> {
        let cropped = match &*self {
            MatBuffer::U8(mat) => MatBuffer::U8(mat.crop(x_offset, y_offset, side)?),
            MatBuffer::F32(mat) => MatBuffer::F32(mat.crop(x_offset, y_offset, side)?),
            MatBuffer::F64(mat) => MatBuffer::F64(mat.crop(x_offset, y_offset, side)?),
        };
        *self = cropped;
        Ok(())
    }

    pub fn flip_horizontal(&mut self) {
        match self {
            MatBuffer::U8(mat) => mat.flip_horizontal(),
            MatBuffer::F32(mat) => mat.flip_horizontal(),
            MatBuffer::F64(mat) => mat.flip_horizontal(),
        }
    }

    pub fn resize(&mut self, out_rows: usize, out_cols: usize, filter: Filter) -> Result<()> {
        let resized = match &*self {
            MatBuffer::U8(mat) => MatBuffer::U8(mat.resize(out_rows, out_cols, filter)?),
            MatBuffer::F32(mat) => MatBuffer::F32(mat.resize(out_rows, out_cols, filter)?),
            MatBuffer::F64(mat) => MatBuffer::F64(mat.resize(out_rows, out_cols, filter)?),
        };
        *self = resized;
        Ok(())
    }

    pub fn subtract(&mut self, mean: &Mat<f64>) -> Result<()> {
        match self {
            MatBuffer::U8(mat) => mat.subtract(mean),
            MatBuffer::F32(mat) => mat.subtract(mean),
            MatBuffer::F64(mat) => mat.subtract(mean),
        }
    }
}

fn decode_elements<T: Element>(bytes: &[u8], width: usize) -> Vec<T> {
    bytes.chunks_exact(width).map(T::from_ne_bytes).collect()
}
