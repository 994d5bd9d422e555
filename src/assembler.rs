//! Reassembles the stored strips or tiles of one image into a contiguous sample buffer.

use crate::bit_unpacker::{BitUnpacker, BlockSamples};
use crate::byte_order_rw::{ByteOrderReader, Endian};
use crate::decompress::predictor::{undo_floating_point, undo_horizontal};
use crate::decompress::{BlockData, Compression};
use crate::descriptor::{BlockLayout, ImageDescriptor, Predictor, SampleFormat};
use crate::error::{DngError, Result};
use tracing::debug;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// The decoded samples of an image.
///
/// Chunky images are stored pixel interleaved, row by row. Planar images store one full
/// plane per sample, one after another.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::U16(v) => v.len(),
            Samples::U32(v) => v.len(),
            Samples::F32(v) => v.len(),
            Samples::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes per sample.
    pub fn sample_size(&self) -> usize {
        match self {
            Samples::U8(_) => 1,
            Samples::U16(_) => 2,
            Samples::U32(_) | Samples::F32(_) => 4,
            Samples::F64(_) => 8,
        }
    }

    /// Sample `index` widened to `f64`.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            Samples::U8(v) => v.get(index).map(|x| *x as f64),
            Samples::U16(v) => v.get(index).map(|x| *x as f64),
            Samples::U32(v) => v.get(index).map(|x| *x as f64),
            Samples::F32(v) => v.get(index).map(|x| *x as f64),
            Samples::F64(v) => v.get(index).copied(),
        }
    }

    pub fn as_u16(&self) -> Option<&[u16]> {
        match self {
            Samples::U16(v) => Some(v),
            _ => None,
        }
    }

    fn zeroed(like: SampleKind, len: usize) -> Self {
        match like {
            SampleKind::U8 => Samples::U8(vec![0; len]),
            SampleKind::U16 => Samples::U16(vec![0; len]),
            SampleKind::U32 => Samples::U32(vec![0; len]),
            SampleKind::F32 => Samples::F32(vec![0.0; len]),
            SampleKind::F64 => Samples::F64(vec![0.0; len]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl SampleKind {
    fn of(descriptor: &ImageDescriptor) -> Self {
        if descriptor.compression == Compression::LosslessJpeg {
            return SampleKind::U16;
        }
        match (descriptor.sample_format, descriptor.bits()) {
            (SampleFormat::Float, 64) => SampleKind::F64,
            (SampleFormat::Float, _) => SampleKind::F32,
            (_, 0..=8) => SampleKind::U8,
            (_, 9..=16) => SampleKind::U16,
            _ => SampleKind::U32,
        }
    }

    fn size(&self) -> usize {
        match self {
            SampleKind::U8 => 1,
            SampleKind::U16 => 2,
            SampleKind::U32 | SampleKind::F32 => 4,
            SampleKind::F64 => 8,
        }
    }
}

/// One stored block and the part of the image it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRegion {
    /// Index into the offset and byte count arrays.
    pub index: usize,
    pub plane: usize,
    pub x: usize,
    pub y: usize,
    /// Stored size, which for edge tiles reaches past the image.
    pub width: usize,
    pub rows: usize,
}

pub struct StripTileAssembler<'a> {
    reader: ByteOrderReader<'a>,
    descriptor: &'a ImageDescriptor,
}

impl<'a> StripTileAssembler<'a> {
    pub fn new(reader: ByteOrderReader<'a>, descriptor: &'a ImageDescriptor) -> Self {
        Self { reader, descriptor }
    }

    /// Every block in storage order: plane by plane, then in raster order.
    pub fn blocks(&self) -> Vec<BlockRegion> {
        let d = self.descriptor;
        let (across, down) = d.blocks_across_down();
        let (block_width, block_height) = match d.layout {
            BlockLayout::Strips { rows_per_strip } => (d.width as usize, rows_per_strip as usize),
            BlockLayout::Tiles {
                tile_width,
                tile_height,
            } => (tile_width as usize, tile_height as usize),
        };
        let mut blocks = Vec::with_capacity(across * down * d.planes());
        for plane in 0..d.planes() {
            for row in 0..down {
                for column in 0..across {
                    let y = row * block_height;
                    let rows = match d.layout {
                        // the last strip only stores the rows that are left
                        BlockLayout::Strips { .. } => block_height.min(d.height as usize - y),
                        BlockLayout::Tiles { .. } => block_height,
                    };
                    blocks.push(BlockRegion {
                        index: blocks.len(),
                        plane,
                        x: column * block_width,
                        y,
                        width: block_width,
                        rows,
                    });
                }
            }
        }
        blocks
    }

    fn unpacker(&self, block: &BlockRegion, endian: Endian) -> BitUnpacker {
        let d = self.descriptor;
        BitUnpacker {
            bits: d.bits(),
            sample_format: d.sample_format,
            endian,
            row_samples: block.width * d.block_samples_per_pixel(),
            rows: block.rows,
            row_aligned: matches!(d.layout, BlockLayout::Tiles { .. }),
        }
    }

    /// Reads, decompresses and unpacks one block.
    pub fn decode_block(&self, block: &BlockRegion) -> Result<BlockSamples> {
        let d = self.descriptor;
        let data = self.reader.slice(
            d.block_offsets[block.index],
            d.block_byte_counts[block.index],
        )?;
        let mut unpacker = self.unpacker(block, self.reader.endian());
        debug!(
            "decoding block {} of {} ({} bytes, {})",
            block.index, d.path, data.len(), d.compression
        );

        let packed = match d.compression.decompress(data, unpacker.packed_len(), unpacker.sample_count())? {
            BlockData::Samples(samples) => {
                return Ok(BlockSamples::Int(samples.into_iter().map(u32::from).collect()))
            }
            BlockData::Packed(packed) => packed,
        };

        match (d.predictor, d.sample_format) {
            (Predictor::None, _) => unpacker.unpack(&packed),
            (Predictor::Horizontal, SampleFormat::Uint | SampleFormat::Int) => {
                let mut samples = match unpacker.unpack(&packed)? {
                    BlockSamples::Int(samples) => samples,
                    other => return Ok(other),
                };
                undo_horizontal(
                    &mut samples,
                    unpacker.row_samples,
                    d.block_samples_per_pixel(),
                    d.bits(),
                );
                Ok(BlockSamples::Int(samples))
            }
            (Predictor::FloatingPoint, SampleFormat::Float) => {
                let mut bytes = packed.into_owned();
                undo_floating_point(
                    &mut bytes,
                    unpacker.row_samples,
                    unpacker.rows,
                    d.bits() as usize / 8,
                    d.block_samples_per_pixel(),
                )?;
                unpacker.endian = Endian::Big;
                unpacker.unpack(&bytes)
            }
            (predictor, format) => Err(DngError::unsupported(
                d.compression.code(),
                format!("{predictor:?} predictor on {format:?} samples"),
            )),
        }
    }

    /// Decodes every block and copies it into place.
    pub fn assemble(&self, max_image_bytes: usize) -> Result<Samples> {
        let d = self.descriptor;
        let kind = SampleKind::of(d);
        let sample_count = d.sample_count();
        let image_bytes = sample_count
            .checked_mul(kind.size())
            .filter(|bytes| *bytes <= max_image_bytes)
            .ok_or_else(|| {
                DngError::geometry(format!(
                    "{}x{}x{} samples exceed the limit of {max_image_bytes} bytes",
                    d.width, d.height, d.samples_per_pixel
                ))
            })?;
        debug!("assembling {} into {image_bytes} bytes", d.path);

        let blocks = self.blocks();
        for block in &blocks {
            self.check_block_size(block, kind, max_image_bytes)?;
        }
        #[cfg(feature = "rayon")]
        let decoded: Vec<BlockSamples> = blocks
            .par_iter()
            .map(|block| self.decode_block(block))
            .collect::<Result<_>>()?;
        #[cfg(not(feature = "rayon"))]
        let decoded: Vec<BlockSamples> = blocks
            .iter()
            .map(|block| self.decode_block(block))
            .collect::<Result<_>>()?;

        let mut out = Samples::zeroed(kind, sample_count);
        for (block, samples) in blocks.iter().zip(decoded) {
            self.place(&mut out, block, samples)?;
        }
        Ok(out)
    }

    /// Holds one stored block, padding included, to the image byte limit.
    fn check_block_size(&self, block: &BlockRegion, kind: SampleKind, max_bytes: usize) -> Result<()> {
        block
            .width
            .checked_mul(block.rows)
            .and_then(|n| n.checked_mul(self.descriptor.block_samples_per_pixel()))
            .and_then(|n| n.checked_mul(kind.size()))
            .filter(|bytes| *bytes <= max_bytes)
            .map(|_| ())
            .ok_or_else(|| {
                DngError::geometry(format!(
                    "block {} of {}x{} pixels exceeds the limit of {max_bytes} bytes",
                    block.index, block.width, block.rows
                ))
            })
    }

    fn place(&self, out: &mut Samples, block: &BlockRegion, samples: BlockSamples) -> Result<()> {
        let region = Region::new(self.descriptor, block);
        match (out, samples) {
            (Samples::U8(dst), BlockSamples::Int(src)) => region.copy(dst, &src, |v| v as u8),
            (Samples::U16(dst), BlockSamples::Int(src)) => region.copy(dst, &src, |v| v as u16),
            (Samples::U32(dst), BlockSamples::Int(src)) => region.copy(dst, &src, |v| v),
            (Samples::F32(dst), BlockSamples::F32(src)) => region.copy(dst, &src, |v| v),
            (Samples::F64(dst), BlockSamples::F64(src)) => region.copy(dst, &src, |v| v),
            (dst, src) => {
                return Err(DngError::geometry(format!(
                    "block {} decoded to {} samples that do not fit a buffer of {}-byte samples",
                    block.index,
                    src.len(),
                    dst.sample_size()
                )))
            }
        }
        Ok(())
    }
}

/// Where the visible part of a block lands in the output buffer.
struct Region {
    /// Samples per stored row of the block.
    src_stride: usize,
    /// Samples per row of the output plane.
    dst_stride: usize,
    dst_start: usize,
    visible_rows: usize,
    visible_samples: usize,
}

impl Region {
    fn new(d: &ImageDescriptor, block: &BlockRegion) -> Self {
        let spp = d.block_samples_per_pixel();
        let (width, height) = (d.width as usize, d.height as usize);
        let plane_len = width * height * spp;
        Self {
            src_stride: block.width * spp,
            dst_stride: width * spp,
            dst_start: block.plane * plane_len + block.y * width * spp + block.x * spp,
            visible_rows: block.rows.min(height - block.y),
            visible_samples: block.width.min(width - block.x) * spp,
        }
    }

    fn copy<S: Copy, T>(&self, dst: &mut [T], src: &[S], convert: impl Fn(S) -> T) {
        for row in 0..self.visible_rows {
            let src_row = &src[row * self.src_stride..][..self.visible_samples];
            let dst_row = &mut dst[self.dst_start + row * self.dst_stride..][..self.visible_samples];
            for (d, s) in dst_row.iter_mut().zip(src_row) {
                *d = convert(*s);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{PlanarConfiguration, RawMetadata, SubfileKind};
    use crate::ifd::IfdPath;

    fn descriptor(width: u32, height: u32, spp: u16, bits: u16, layout: BlockLayout) -> ImageDescriptor {
        ImageDescriptor {
            path: IfdPath::root(0),
            width,
            height,
            bits_per_sample: vec![bits; spp as usize],
            samples_per_pixel: spp,
            compression: Compression::None,
            photometric_interpretation: None,
            planar_configuration: PlanarConfiguration::Chunky,
            predictor: Predictor::None,
            sample_format: SampleFormat::Uint,
            subfile_kind: SubfileKind::Main,
            layout,
            block_offsets: vec![],
            block_byte_counts: vec![],
            orientation: 1,
            black_level: vec![0.0],
            white_level: vec![255.0],
            metadata: RawMetadata::default(),
        }
    }

    /// Lays the given blocks out back to back and points the descriptor at them.
    fn store(d: &mut ImageDescriptor, blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut data = Vec::new();
        for block in blocks {
            d.block_offsets.push(data.len() as u64);
            d.block_byte_counts.push(block.len() as u64);
            data.extend_from_slice(block);
        }
        data
    }

    #[test]
    fn strips_with_short_last_strip() {
        let mut d = descriptor(3, 5, 1, 8, BlockLayout::Strips { rows_per_strip: 2 });
        let data = store(
            &mut d,
            &[
                vec![1, 2, 3, 4, 5, 6],
                vec![7, 8, 9, 10, 11, 12],
                vec![13, 14, 15],
            ],
        );
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Little), &d);
        assert_eq!(assembler.blocks()[2].rows, 1);
        assert_eq!(
            assembler.assemble(1 << 20).unwrap(),
            Samples::U8((1..=15).collect())
        );
    }

    #[test]
    fn edge_tiles_are_cropped() {
        // 3x3 image in 2x2 tiles, padding marked with 0xFF
        let mut d = descriptor(
            3,
            3,
            1,
            8,
            BlockLayout::Tiles {
                tile_width: 2,
                tile_height: 2,
            },
        );
        let data = store(
            &mut d,
            &[
                vec![1, 2, 4, 5],
                vec![3, 0xFF, 6, 0xFF],
                vec![7, 8, 0xFF, 0xFF],
                vec![9, 0xFF, 0xFF, 0xFF],
            ],
        );
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Big), &d);
        assert_eq!(
            assembler.assemble(1 << 20).unwrap(),
            Samples::U8((1..=9).collect())
        );
    }

    #[test]
    fn planar_planes_follow_each_other() {
        let mut d = descriptor(2, 1, 3, 16, BlockLayout::Strips { rows_per_strip: 1 });
        d.planar_configuration = PlanarConfiguration::Planar;
        let data = store(&mut d, &[vec![1, 0, 2, 0], vec![3, 0, 4, 0], vec![5, 0, 6, 0]]);
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Little), &d);
        assert_eq!(
            assembler.assemble(1 << 20).unwrap(),
            Samples::U16(vec![1, 2, 3, 4, 5, 6])
        );
    }

    #[test]
    fn packed_12_bit_strip_with_horizontal_predictor() {
        let mut d = descriptor(2, 2, 1, 12, BlockLayout::Strips { rows_per_strip: 2 });
        d.predictor = Predictor::Horizontal;
        // rows [0x100, +0x010] and [0xFFF, +0x002], strips carry bits across rows
        let data = store(&mut d, &[vec![0x10, 0x00, 0x10, 0xFF, 0xF0, 0x02]]);
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Little), &d);
        assert_eq!(
            assembler.assemble(1 << 20).unwrap(),
            Samples::U16(vec![0x100, 0x110, 0xFFF, 0x001])
        );
    }

    #[test]
    fn block_out_of_bounds_is_truncated_data() {
        let mut d = descriptor(2, 1, 1, 8, BlockLayout::Strips { rows_per_strip: 1 });
        d.block_offsets = vec![100];
        d.block_byte_counts = vec![2];
        let data = [0u8; 8];
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Little), &d);
        assert!(matches!(
            assembler.assemble(1 << 20),
            Err(DngError::TruncatedData { offset: 100, .. })
        ));
    }

    #[test]
    fn short_block_is_corrupt() {
        let mut d = descriptor(4, 1, 1, 16, BlockLayout::Strips { rows_per_strip: 1 });
        let data = store(&mut d, &[vec![0; 6]]);
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Little), &d);
        assert!(matches!(
            assembler.assemble(1 << 20),
            Err(DngError::CorruptStream(_))
        ));
    }

    #[test]
    fn image_size_limit() {
        let mut d = descriptor(100, 100, 1, 16, BlockLayout::Strips { rows_per_strip: 100 });
        let data = store(&mut d, &[vec![0; 20000]]);
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Little), &d);
        assert!(matches!(
            assembler.assemble(19999),
            Err(DngError::InvalidGeometry(_))
        ));
        assert!(assembler.assemble(20000).is_ok());
    }

    #[test]
    fn oversized_tile_is_invalid_geometry() {
        let mut d = descriptor(
            1,
            1,
            1,
            16,
            BlockLayout::Tiles {
                tile_width: 1 << 31,
                tile_height: 1 << 31,
            },
        );
        d.compression = Compression::Lzw;
        let data = store(&mut d, &[crate::decompress::lzw::tests::encode(&[0, 0], true)]);
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Little), &d);
        assert!(matches!(
            assembler.assemble(1 << 30),
            Err(DngError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn floating_point_predictor_tile() {
        let mut d = descriptor(
            2,
            1,
            1,
            32,
            BlockLayout::Tiles {
                tile_width: 2,
                tile_height: 1,
            },
        );
        d.sample_format = SampleFormat::Float;
        d.predictor = Predictor::FloatingPoint;
        // planes of [1.0, -2.0] = 3F800000 C0000000, then byte differenced
        let planes: [u8; 8] = [0x3F, 0xC0, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut encoded = planes;
        for i in (1..8).rev() {
            encoded[i] = encoded[i].wrapping_sub(encoded[i - 1]);
        }
        let data = store(&mut d, &[encoded.to_vec()]);
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Little), &d);
        assert_eq!(
            assembler.assemble(1 << 20).unwrap(),
            Samples::F32(vec![1.0, -2.0])
        );
    }

    #[test]
    fn horizontal_predictor_on_floats_is_unsupported() {
        let mut d = descriptor(1, 1, 1, 32, BlockLayout::Strips { rows_per_strip: 1 });
        d.sample_format = SampleFormat::Float;
        d.predictor = Predictor::Horizontal;
        let data = store(&mut d, &[vec![0; 4]]);
        let assembler = StripTileAssembler::new(ByteOrderReader::new(&data, Endian::Little), &d);
        assert!(matches!(
            assembler.assemble(1 << 20),
            Err(DngError::UnsupportedCompression { code: 1, .. })
        ));
    }
}
