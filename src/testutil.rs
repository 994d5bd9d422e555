//! Builders for small in-memory DNG files.

use crate::byte_order_rw::Endian;
use crate::dng_writer::write_dng_to_vec;
use crate::ifd::{Ifd, IfdPath, IfdValue};
use crate::tags::{ifd, IfdType};
use std::sync::Arc;

pub(crate) fn empty_ifd() -> Ifd {
    Ifd::new(IfdType::Ifd, IfdPath::default())
}

fn one_or_list(mut values: Vec<IfdValue>) -> IfdValue {
    if values.len() == 1 {
        values.remove(0)
    } else {
        IfdValue::List(values)
    }
}

fn block_offsets(blocks: &[Vec<u8>]) -> IfdValue {
    one_or_list(
        blocks
            .iter()
            .map(|block| IfdValue::Offsets(Arc::from(block.as_slice())))
            .collect(),
    )
}

fn block_byte_counts(blocks: &[Vec<u8>]) -> IfdValue {
    one_or_list(
        blocks
            .iter()
            .map(|block| IfdValue::Long(block.len() as u32))
            .collect(),
    )
}

fn geometry(width: u32, height: u32, bits: u16, samples_per_pixel: u16, compression: u16) -> Ifd {
    empty_ifd()
        .with(ifd::ImageWidth, IfdValue::Long(width))
        .with(ifd::ImageLength, IfdValue::Long(height))
        .with(
            ifd::BitsPerSample,
            one_or_list(vec![IfdValue::Short(bits); samples_per_pixel as usize]),
        )
        .with(ifd::Compression, IfdValue::Short(compression))
        .with(ifd::SamplesPerPixel, IfdValue::Short(samples_per_pixel))
}

/// A strip organised image IFD storing `strips` as they are.
pub(crate) fn strip_image(
    width: u32,
    height: u32,
    bits: u16,
    samples_per_pixel: u16,
    compression: u16,
    rows_per_strip: u32,
    strips: Vec<Vec<u8>>,
) -> Ifd {
    geometry(width, height, bits, samples_per_pixel, compression)
        .with(ifd::RowsPerStrip, IfdValue::Long(rows_per_strip))
        .with(ifd::StripOffsets, block_offsets(&strips))
        .with(ifd::StripByteCounts, block_byte_counts(&strips))
}

/// A tile organised image IFD storing `tiles` in raster order.
#[allow(clippy::too_many_arguments)]
pub(crate) fn tile_image(
    width: u32,
    height: u32,
    bits: u16,
    samples_per_pixel: u16,
    compression: u16,
    tile_width: u32,
    tile_height: u32,
    tiles: Vec<Vec<u8>>,
) -> Ifd {
    geometry(width, height, bits, samples_per_pixel, compression)
        .with(ifd::TileWidth, IfdValue::Long(tile_width))
        .with(ifd::TileLength, IfdValue::Long(tile_height))
        .with(ifd::TileOffsets, block_offsets(&tiles))
        .with(ifd::TileByteCounts, block_byte_counts(&tiles))
}

pub(crate) fn with_sub_ifds(dir: Ifd, children: Vec<Ifd>) -> Ifd {
    dir.with(
        ifd::SubIFDs,
        one_or_list(children.into_iter().map(IfdValue::Ifd).collect()),
    )
}

pub(crate) fn write(endian: Endian, ifds: Vec<Ifd>) -> Vec<u8> {
    write_dng_to_vec(endian, ifds).unwrap()
}

/// 16 bit samples in the byte order of the file.
pub(crate) fn pack_u16(samples: &[u16], endian: Endian) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| match endian {
            Endian::Little => s.to_le_bytes(),
            Endian::Big => s.to_be_bytes(),
        })
        .collect()
}

/// 12 bit samples packed MSB first; an odd count leaves the last nibble empty.
pub(crate) fn pack_u12(samples: &[u16]) -> Vec<u8> {
    let mut out = Vec::new();
    for pair in samples.chunks(2) {
        let a = pair[0];
        let b = pair.get(1).copied().unwrap_or(0);
        out.push((a >> 4) as u8);
        out.push((((a & 0xF) << 4) | (b >> 8)) as u8);
        if pair.len() == 2 {
            out.push((b & 0xFF) as u8);
        }
    }
    out
}
