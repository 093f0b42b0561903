//! Square crop with optional ratio jitter and horizontal mirroring.

use crate::config::TransformConfig;
use crate::transforms::mat::MatBuffer;
use anyhow::{bail, ensure, Result};
use rand::{rngs::StdRng, Rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropType {
    Center,
    Random,
}

impl CropType {
    /// Parses the configuration value; empty means `center`.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() || value.eq_ignore_ascii_case("center") {
            Ok(CropType::Center)
        } else if value.eq_ignore_ascii_case("random") {
            Ok(CropType::Random)
        } else {
            bail!("Invalid crop type: '{}'", value)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterType {
    None,
    UniRatio,
    UniLength,
    UniArea,
}

impl JitterType {
    /// Parses the configuration value; empty means `none`. `uniLength` and
    /// `uniArea` are accepted here but rejected on first use.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            Ok(JitterType::None)
        } else if value.eq_ignore_ascii_case("uniratio") {
            Ok(JitterType::UniRatio)
        } else if value.eq_ignore_ascii_case("unilength") {
            Ok(JitterType::UniLength)
        } else if value.eq_ignore_ascii_case("uniarea") {
            Ok(JitterType::UniArea)
        } else {
            bail!("Invalid jitter type: '{}'", value)
        }
    }
}

#[derive(Debug, Clone)]
pub struct CropTransform {
    crop_type: CropType,
    ratio_min: f64,
    ratio_max: f64,
    jitter_type: JitterType,
    hflip: bool,
}

impl CropTransform {
    pub fn new(config: &TransformConfig) -> Result<Self> {
        let crop_type = CropType::parse(&config.crop_type)?;
        let (ratio_min, ratio_max) = match *config.crop_ratio.as_slice() {
            [] => (1.0, 1.0),
            [ratio] => (ratio, ratio),
            [min, max] => (min, max),
            _ => bail!(
                "crop_ratio takes one value or a [min, max] pair, got {} values",
                config.crop_ratio.len()
            ),
        };
        ensure!(
            0.0 < ratio_min && ratio_min <= ratio_max && ratio_max <= 1.0,
            "Invalid crop ratio [{}, {}]: must satisfy 0 < min <= max <= 1",
            ratio_min,
            ratio_max
        );
        let jitter_type = JitterType::parse(&config.jitter_type)?;
        let hflip = config.hflip.unwrap_or(crop_type == CropType::Random);
        Ok(Self {
            crop_type,
            ratio_min,
            ratio_max,
            jitter_type,
            hflip,
        })
    }

    pub(crate) fn apply(&self, mat: &mut MatBuffer, rng: &mut StdRng) -> Result<()> {
        let ratio = match self.jitter_type {
            JitterType::None => self.ratio_min,
            JitterType::UniRatio => {
                if self.ratio_min == self.ratio_max {
                    self.ratio_min
                } else {
                    rng.random_range(self.ratio_min..self.ratio_max)
                }
            }
            JitterType::UniLength | JitterType::UniArea => {
                bail!("Jitter type {:?} is not implemented", self.jitter_type)
            }
        };

        let rows = mat.rows();
        let cols = mat.cols();
        let side = (rows.min(cols) as f64 * ratio) as usize;
        ensure!(
            side > 0,
            "Crop ratio {} yields an empty crop for a {}x{} sample",
            ratio,
            rows,
            cols
        );

        let (x_offset, y_offset) = match self.crop_type {
            CropType::Center => ((cols - side) / 2, (rows - side) / 2),
            CropType::Random => (
                rng.random_range(0..=cols - side),
                rng.random_range(0..=rows - side),
            ),
        };
        mat.crop(x_offset, y_offset, side)?;

        if self.hflip && rng.random_bool(0.5) {
            mat.flip_horizontal();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ElementType, SampleLayout};
    use rand::SeedableRng;

    fn buffer(width: usize, height: usize, channels: usize) -> MatBuffer {
        let bytes: Vec<u8> = (0..width * height * channels)
            .flat_map(|i| (i as f32).to_ne_bytes())
            .collect();
        MatBuffer::from_bytes(
            &bytes,
            SampleLayout::new(width, height, channels),
            ElementType::F32,
        )
        .unwrap()
    }

    fn config(crop_type: &str, ratio: &[f64]) -> TransformConfig {
        TransformConfig::new("features", 8, 8, 3)
            .with_crop_type(crop_type)
            .with_crop_ratio(ratio)
    }

    #[test]
    fn parses_enums_case_insensitively() {
        assert_eq!(CropType::parse("RANDOM").unwrap(), CropType::Random);
        assert_eq!(CropType::parse("").unwrap(), CropType::Center);
        assert!(CropType::parse("diagonal").is_err());
        assert_eq!(JitterType::parse("UniRatio").unwrap(), JitterType::UniRatio);
        assert!(JitterType::parse("gaussian").is_err());
    }

    #[test]
    fn rejects_out_of_range_ratios() {
        assert!(CropTransform::new(&config("center", &[0.0])).is_err());
        assert!(CropTransform::new(&config("center", &[1.5])).is_err());
        assert!(CropTransform::new(&config("center", &[0.8, 0.4])).is_err());
        assert!(CropTransform::new(&config("center", &[0.2, 0.4, 0.6])).is_err());
    }

    #[test]
    fn center_crop_takes_the_middle_square() {
        // A 100x200x3 sample with ratio 0.5 crops a 50x50 square at
        // x = 75, y = 25.
        let mut mat = buffer(100, 200, 3);
        let transform = CropTransform::new(&config("center", &[0.5])).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        transform.apply(&mut mat, &mut rng).unwrap();

        assert_eq!(mat.rows(), 50);
        assert_eq!(mat.cols(), 50);
        assert_eq!(mat.channels(), 3);
        match &mat {
            MatBuffer::F32(cropped) => {
                // Top-left element of the crop was at (row 25, col 75).
                assert_eq!(cropped.at(0, 0, 0), ((25 * 200 + 75) * 3) as f32);
            }
            other => panic!("expected f32 matrix, got {:?}", other.element_type()),
        }
    }

    #[test]
    fn random_crop_stays_in_bounds() {
        let transform = CropTransform::new(&config("random", &[0.3])).unwrap();
        for seed in 0..32 {
            let mut mat = buffer(10, 17, 1);
            let mut rng = StdRng::seed_from_u64(seed);
            transform.apply(&mut mat, &mut rng).unwrap();
            assert_eq!(mat.rows(), 3);
            assert_eq!(mat.cols(), 3);
        }
    }

    #[test]
    fn hflip_defaults_follow_crop_type() {
        let center = CropTransform::new(&config("center", &[1.0])).unwrap();
        assert!(!center.hflip);
        let random = CropTransform::new(&config("random", &[1.0])).unwrap();
        assert!(random.hflip);
        let overridden =
            CropTransform::new(&config("random", &[1.0]).with_hflip(false)).unwrap();
        assert!(!overridden.hflip);
    }

    #[test]
    fn unimplemented_jitter_fails_on_use_not_parse() {
        let config = config("center", &[0.4, 0.8]).with_jitter_type("uniLength");
        let transform = CropTransform::new(&config).unwrap();
        let mut mat = buffer(8, 8, 1);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(transform.apply(&mut mat, &mut rng).is_err());
    }

    #[test]
    fn uni_ratio_jitter_stays_within_bounds() {
        let config = config("center", &[0.4, 0.8]).with_jitter_type("uniRatio");
        let transform = CropTransform::new(&config).unwrap();
        for seed in 0..16 {
            let mut mat = buffer(100, 100, 1);
            let mut rng = StdRng::seed_from_u64(seed);
            transform.apply(&mut mat, &mut rng).unwrap();
            assert!(mat.rows() >= 40 && mat.rows() < 80);
        }
    }
}
