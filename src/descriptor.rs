//! Everything needed to decode one image, pulled out of its IFD and validated.

use crate::decompress::Compression;
use crate::error::{DngError, Result};
use crate::ifd::{Ifd, IfdPath};
use crate::tags::{ifd, IfdFieldDescriptor, IfdType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanarConfiguration {
    /// The samples of one pixel are stored next to each other.
    Chunky,
    /// Every sample has its own plane.
    Planar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    None,
    Horizontal,
    FloatingPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Uint,
    Int,
    Float,
}

/// What `NewSubfileType` says about the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubfileKind {
    Main,
    ReducedResolution,
    Other(u32),
}

impl SubfileKind {
    fn from_new_subfile_type(value: u32) -> Self {
        match value {
            0 => SubfileKind::Main,
            v if v & 1 == 1 => SubfileKind::ReducedResolution,
            v => SubfileKind::Other(v),
        }
    }
}

/// How the image data is cut into independently stored blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLayout {
    Strips { rows_per_strip: u32 },
    Tiles { tile_width: u32, tile_height: u32 },
}

/// Metadata carried along for raw processing. None of it is applied to the samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMetadata {
    pub cfa_repeat_pattern_dim: Option<[u16; 2]>,
    pub cfa_pattern: Option<Vec<u8>>,
    pub cfa_plane_color: Option<Vec<u8>>,
    pub cfa_layout: Option<u16>,
    /// top, left, bottom, right
    pub active_area: Option<[u32; 4]>,
    pub default_crop_origin: Option<[f64; 2]>,
    pub default_crop_size: Option<[f64; 2]>,
    pub dng_version: Option<[u8; 4]>,
    pub unique_camera_model: Option<String>,
    pub linearization_table: Option<Vec<u16>>,
    pub black_level_repeat_dim: Option<[u16; 2]>,
    pub color_matrix1: Option<Vec<f64>>,
    pub color_matrix2: Option<Vec<f64>>,
    pub forward_matrix1: Option<Vec<f64>>,
    pub forward_matrix2: Option<Vec<f64>>,
    pub camera_calibration1: Option<Vec<f64>>,
    pub camera_calibration2: Option<Vec<f64>>,
    pub analog_balance: Option<Vec<f64>>,
    pub as_shot_neutral: Option<Vec<f64>>,
    pub calibration_illuminant1: Option<u16>,
    pub calibration_illuminant2: Option<u16>,
}

impl RawMetadata {
    /// Image level tags come from the image IFD itself. Camera level tags (version, color
    /// calibration) are usually only stored in IFD0, so they fall back to `root`.
    fn from_ifds(image: &Ifd, root: &Ifd) -> Self {
        let either = move |tag: &IfdFieldDescriptor| {
            if image.contains(tag) {
                image
            } else {
                root
            }
        };
        let pair_u16 = |dir: &Ifd, tag| {
            let v = dir.get_u32_list(tag)?;
            Some([u16::try_from(*v.first()?).ok()?, u16::try_from(*v.get(1)?).ok()?])
        };
        let pair_f64 = |dir: &Ifd, tag| {
            let v = dir.get_f64_list(tag)?;
            Some([*v.first()?, *v.get(1)?])
        };
        let f64s = |tag| either(tag).get_f64_list(tag);
        let u16_scalar = |dir: &Ifd, tag| dir.get_u32(tag).and_then(|v| u16::try_from(v).ok());

        Self {
            cfa_repeat_pattern_dim: pair_u16(image, &ifd::CFARepeatPatternDim),
            cfa_pattern: image.get_u8_list(&ifd::CFAPattern),
            cfa_plane_color: image.get_u8_list(&ifd::CFAPlaneColor),
            cfa_layout: u16_scalar(image, &ifd::CFALayout),
            active_area: image.get_u32_list(&ifd::ActiveArea).and_then(|v| v.try_into().ok()),
            default_crop_origin: pair_f64(image, &ifd::DefaultCropOrigin),
            default_crop_size: pair_f64(image, &ifd::DefaultCropSize),
            dng_version: either(&ifd::DNGVersion)
                .get_u8_list(&ifd::DNGVersion)
                .and_then(|v| v.try_into().ok()),
            unique_camera_model: either(&ifd::UniqueCameraModel)
                .get_value(&ifd::UniqueCameraModel)
                .and_then(|v| v.as_str())
                .map(str::to_string),
            linearization_table: image
                .get_u32_list(&ifd::LinearizationTable)
                .map(|v| v.into_iter().map(|x| x as u16).collect()),
            black_level_repeat_dim: pair_u16(image, &ifd::BlackLevelRepeatDim),
            color_matrix1: f64s(&ifd::ColorMatrix1),
            color_matrix2: f64s(&ifd::ColorMatrix2),
            forward_matrix1: f64s(&ifd::ForwardMatrix1),
            forward_matrix2: f64s(&ifd::ForwardMatrix2),
            camera_calibration1: f64s(&ifd::CameraCalibration1),
            camera_calibration2: f64s(&ifd::CameraCalibration2),
            analog_balance: f64s(&ifd::AnalogBalance),
            as_shot_neutral: f64s(&ifd::AsShotNeutral),
            calibration_illuminant1: u16_scalar(
                either(&ifd::CalibrationIlluminant1),
                &ifd::CalibrationIlluminant1,
            ),
            calibration_illuminant2: u16_scalar(
                either(&ifd::CalibrationIlluminant2),
                &ifd::CalibrationIlluminant2,
            ),
        }
    }
}

/// The validated geometry and decoding parameters of one image-bearing IFD.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub path: IfdPath,
    pub width: u32,
    pub height: u32,
    /// One entry per sample, all equal.
    pub bits_per_sample: Vec<u16>,
    pub samples_per_pixel: u16,
    pub compression: Compression,
    pub photometric_interpretation: Option<u16>,
    pub planar_configuration: PlanarConfiguration,
    pub predictor: Predictor,
    pub sample_format: SampleFormat,
    pub subfile_kind: SubfileKind,
    pub layout: BlockLayout,
    pub block_offsets: Vec<u64>,
    pub block_byte_counts: Vec<u64>,
    pub orientation: u16,
    /// One value per sample (or per repeat cell, as stored).
    pub black_level: Vec<f64>,
    pub white_level: Vec<f64>,
    pub metadata: RawMetadata,
}

impl ImageDescriptor {
    /// Whether an IFD describes image data at all. Only those are turned into descriptors;
    /// a missing geometry tag on one of them is an error for that image.
    pub fn is_image_bearing(dir: &Ifd) -> bool {
        dir.ifd_type == IfdType::Ifd
            && [
                &ifd::ImageWidth,
                &ifd::ImageLength,
                &ifd::StripOffsets,
                &ifd::TileOffsets,
            ]
            .iter()
            .any(|tag| dir.contains(tag))
    }

    pub fn from_ifd(image: &Ifd, root: &Ifd) -> Result<Self> {
        let width = required_u32(image, &ifd::ImageWidth)?;
        let height = required_u32(image, &ifd::ImageLength)?;
        if width == 0 || height == 0 {
            return Err(DngError::geometry(format!("image is {width}x{height}")));
        }

        let samples_per_pixel = match image.get_u32(&ifd::SamplesPerPixel).unwrap_or(1) {
            spp @ 1..=0xFFFF => spp as u16,
            spp => return Err(DngError::geometry(format!("{spp} samples per pixel"))),
        };

        let compression = Compression::from_code(image.get_u32(&ifd::Compression).unwrap_or(1));

        let sample_format = match image.get_u32(&ifd::SampleFormat).unwrap_or(1) {
            1 | 4 => SampleFormat::Uint,
            2 => SampleFormat::Int,
            3 => SampleFormat::Float,
            other => return Err(DngError::geometry(format!("sample format {other}"))),
        };

        let bits_per_sample = bits_per_sample(image, samples_per_pixel, sample_format)?;

        let planar_configuration = match image.get_u32(&ifd::PlanarConfiguration).unwrap_or(1) {
            1 => PlanarConfiguration::Chunky,
            2 if samples_per_pixel == 1 => PlanarConfiguration::Chunky,
            2 => PlanarConfiguration::Planar,
            other => {
                return Err(DngError::geometry(format!(
                    "planar configuration {other}"
                )))
            }
        };

        let predictor = match image.get_u32(&ifd::Predictor).unwrap_or(1) {
            1 => Predictor::None,
            2 => Predictor::Horizontal,
            3 => Predictor::FloatingPoint,
            other => {
                return Err(DngError::unsupported(
                    compression.code(),
                    format!("predictor {other}"),
                ))
            }
        };

        let (layout, block_offsets, block_byte_counts) = if image.contains(&ifd::TileOffsets) {
            let tile_width = required_u32(image, &ifd::TileWidth)?;
            let tile_height = required_u32(image, &ifd::TileLength)?;
            if tile_width == 0 || tile_height == 0 {
                return Err(DngError::geometry(format!(
                    "tiles of {tile_width}x{tile_height}"
                )));
            }
            (
                BlockLayout::Tiles {
                    tile_width,
                    tile_height,
                },
                required_u64_list(image, &ifd::TileOffsets)?,
                required_u64_list(image, &ifd::TileByteCounts)?,
            )
        } else {
            let rows_per_strip = match image.get_u32(&ifd::RowsPerStrip) {
                Some(0) => return Err(DngError::geometry("zero rows per strip")),
                Some(rows) => rows.min(height),
                None => height,
            };
            (
                BlockLayout::Strips { rows_per_strip },
                required_u64_list(image, &ifd::StripOffsets)?,
                required_u64_list(image, &ifd::StripByteCounts)?,
            )
        };

        let white_level = image.get_f64_list(&ifd::WhiteLevel).unwrap_or_else(|| {
            let default = match sample_format {
                SampleFormat::Float => 1.0,
                _ => ((1u64 << bits_per_sample[0]) - 1) as f64,
            };
            vec![default; samples_per_pixel as usize]
        });
        let black_level = image
            .get_f64_list(&ifd::BlackLevel)
            .unwrap_or_else(|| vec![0.0; samples_per_pixel as usize]);

        let descriptor = Self {
            path: image.path.clone(),
            width,
            height,
            bits_per_sample,
            samples_per_pixel,
            compression,
            photometric_interpretation: image
                .get_u32(&ifd::PhotometricInterpretation)
                .and_then(|v| u16::try_from(v).ok()),
            planar_configuration,
            predictor,
            sample_format,
            subfile_kind: SubfileKind::from_new_subfile_type(
                image.get_u32(&ifd::NewSubfileType).unwrap_or(0),
            ),
            layout,
            block_offsets,
            block_byte_counts,
            orientation: image
                .get_u32(&ifd::Orientation)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(1),
            black_level,
            white_level,
            metadata: RawMetadata::from_ifds(image, root),
        };
        descriptor.check_block_count()?;
        Ok(descriptor)
    }

    pub fn bits(&self) -> u16 {
        self.bits_per_sample[0]
    }

    /// Number of separately stored planes.
    pub fn planes(&self) -> usize {
        match self.planar_configuration {
            PlanarConfiguration::Chunky => 1,
            PlanarConfiguration::Planar => self.samples_per_pixel as usize,
        }
    }

    /// Samples stored per pixel inside one block.
    pub fn block_samples_per_pixel(&self) -> usize {
        match self.planar_configuration {
            PlanarConfiguration::Chunky => self.samples_per_pixel as usize,
            PlanarConfiguration::Planar => 1,
        }
    }

    /// Number of blocks across and down one plane.
    pub fn blocks_across_down(&self) -> (usize, usize) {
        match self.layout {
            BlockLayout::Strips { rows_per_strip } => {
                (1, self.height.div_ceil(rows_per_strip) as usize)
            }
            BlockLayout::Tiles {
                tile_width,
                tile_height,
            } => (
                self.width.div_ceil(tile_width) as usize,
                self.height.div_ceil(tile_height) as usize,
            ),
        }
    }

    /// Total samples of the decoded image.
    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize * self.samples_per_pixel as usize
    }

    fn check_block_count(&self) -> Result<()> {
        if self.block_offsets.len() != self.block_byte_counts.len() {
            return Err(DngError::geometry(format!(
                "{} block offsets but {} byte counts",
                self.block_offsets.len(),
                self.block_byte_counts.len()
            )));
        }
        let (across, down) = self.blocks_across_down();
        let expected = across * down * self.planes();
        if self.block_offsets.len() != expected {
            return Err(DngError::geometry(format!(
                "{} blocks stored but the geometry needs {expected}",
                self.block_offsets.len()
            )));
        }
        Ok(())
    }
}

fn required_u32(image: &Ifd, tag: &IfdFieldDescriptor) -> Result<u32> {
    image
        .get_u32(tag)
        .ok_or(DngError::MissingRequiredTag(tag.name))
}

fn required_u64_list(image: &Ifd, tag: &IfdFieldDescriptor) -> Result<Vec<u64>> {
    match image.get_value(tag) {
        None => Err(DngError::MissingRequiredTag(tag.name)),
        Some(_) => image
            .get_u64_list(tag)
            .ok_or_else(|| DngError::geometry(format!("{} is not an integer list", tag.name))),
    }
}

fn bits_per_sample(image: &Ifd, spp: u16, sample_format: SampleFormat) -> Result<Vec<u16>> {
    let mut bits = image
        .get_u32_list(&ifd::BitsPerSample)
        .unwrap_or_else(|| vec![1]);
    if bits.len() == 1 && spp > 1 {
        bits = vec![bits[0]; spp as usize];
    }
    if bits.len() != spp as usize {
        return Err(DngError::geometry(format!(
            "{} bits-per-sample values for {spp} samples per pixel",
            bits.len()
        )));
    }
    if bits.iter().any(|b| *b != bits[0]) {
        return Err(DngError::geometry(format!("mixed sample depths {bits:?}")));
    }
    let valid = match sample_format {
        SampleFormat::Float => matches!(bits[0], 16 | 24 | 32 | 64),
        _ => (1..=32).contains(&bits[0]),
    };
    if !valid {
        return Err(DngError::geometry(format!(
            "{} bit {sample_format:?} samples",
            bits[0]
        )));
    }
    Ok(bits.into_iter().map(|b| b as u16).collect())
}
