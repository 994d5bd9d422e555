//! Expands the stored bytes of one block into samples.

use crate::byte_order_rw::Endian;
use crate::descriptor::SampleFormat;
use crate::error::{DngError, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use half::f16;

/// Reads MSB-first bit fields of up to 32 bits.
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// `None` once fewer than `n` bits are left.
    pub fn read(&mut self, n: u32) -> Option<u32> {
        if self.bit_pos + n as usize > self.data.len() * 8 {
            return None;
        }
        let mut value = 0u64;
        let mut remaining = n;
        while remaining > 0 {
            let byte = self.data[self.bit_pos / 8] as u64;
            let available = 8 - (self.bit_pos % 8) as u32;
            let take = available.min(remaining);
            let bits = (byte >> (available - take)) & ((1 << take) - 1);
            value = (value << take) | bits;
            self.bit_pos += take as usize;
            remaining -= take;
        }
        Some(value as u32)
    }

    /// Skips to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }
}

/// Decoded samples of one block before they are placed into the image.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockSamples {
    Int(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl BlockSamples {
    pub fn len(&self) -> usize {
        match self {
            BlockSamples::Int(v) => v.len(),
            BlockSamples::F32(v) => v.len(),
            BlockSamples::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Describes how the samples of one block are packed.
///
/// Depths of 8, 16 and 32 bits are byte aligned and stored in the file's byte order.
/// Every other integer depth is packed MSB first, independent of the byte order.
#[derive(Debug, Clone, Copy)]
pub struct BitUnpacker {
    pub bits: u16,
    pub sample_format: SampleFormat,
    pub endian: Endian,
    /// Samples in one stored row of the block.
    pub row_samples: usize,
    pub rows: usize,
    /// Whether every row starts on a byte boundary. Strips let bits run on across rows.
    pub row_aligned: bool,
}

impl BitUnpacker {
    fn byte_aligned(&self) -> bool {
        self.bits % 8 == 0
    }

    /// Stored bytes of one row, rounded up.
    pub fn row_bytes(&self) -> usize {
        (self.row_samples * self.bits as usize).div_ceil(8)
    }

    /// Bytes the block needs to hold all of its samples.
    pub fn packed_len(&self) -> usize {
        if self.row_aligned || self.byte_aligned() {
            self.row_bytes() * self.rows
        } else {
            (self.row_samples * self.rows * self.bits as usize).div_ceil(8)
        }
    }

    pub fn sample_count(&self) -> usize {
        self.row_samples * self.rows
    }

    pub fn unpack(&self, data: &[u8]) -> Result<BlockSamples> {
        let needed = self.packed_len();
        if data.len() < needed {
            return Err(DngError::corrupt(format!(
                "block holds {} bytes but {needed} are needed",
                data.len()
            )));
        }
        let data = &data[..needed];
        match self.sample_format {
            SampleFormat::Float => self.unpack_floats(data),
            _ => Ok(BlockSamples::Int(self.unpack_integers(data)?)),
        }
    }

    fn unpack_integers(&self, data: &[u8]) -> Result<Vec<u32>> {
        let count = self.sample_count();
        let out: Vec<u32> = match (self.bits, self.endian) {
            (8, _) => data.iter().map(|b| *b as u32).collect(),
            (16, Endian::Little) => data.chunks_exact(2).map(|c| LittleEndian::read_u16(c) as u32).collect(),
            (16, Endian::Big) => data.chunks_exact(2).map(|c| BigEndian::read_u16(c) as u32).collect(),
            (32, Endian::Little) => data.chunks_exact(4).map(LittleEndian::read_u32).collect(),
            (32, Endian::Big) => data.chunks_exact(4).map(BigEndian::read_u32).collect(),
            (bits, _) => {
                let mut reader = BitReader::new(data);
                let mut out = Vec::with_capacity(count);
                for _ in 0..self.rows {
                    for _ in 0..self.row_samples {
                        let value = reader
                            .read(bits as u32)
                            .ok_or_else(|| DngError::corrupt("packed samples ran out of bits"))?;
                        out.push(value);
                    }
                    if self.row_aligned {
                        reader.align_to_byte();
                    }
                }
                out
            }
        };
        Ok(out)
    }

    fn unpack_floats(&self, data: &[u8]) -> Result<BlockSamples> {
        let endian = self.endian;
        Ok(match self.bits {
            16 => BlockSamples::F32(
                data.chunks_exact(2)
                    .map(|c| f16::from_bits(read_u16(c, endian)).to_f32())
                    .collect(),
            ),
            24 => BlockSamples::F32(
                data.chunks_exact(3)
                    .map(|c| {
                        let raw = match endian {
                            Endian::Little => LittleEndian::read_u24(c),
                            Endian::Big => BigEndian::read_u24(c),
                        };
                        f32::from_bits(fp24_to_f32_bits(raw))
                    })
                    .collect(),
            ),
            32 => BlockSamples::F32(
                data.chunks_exact(4)
                    .map(|c| match endian {
                        Endian::Little => LittleEndian::read_f32(c),
                        Endian::Big => BigEndian::read_f32(c),
                    })
                    .collect(),
            ),
            64 => BlockSamples::F64(
                data.chunks_exact(8)
                    .map(|c| match endian {
                        Endian::Little => LittleEndian::read_f64(c),
                        Endian::Big => BigEndian::read_f64(c),
                    })
                    .collect(),
            ),
            other => {
                return Err(DngError::geometry(format!(
                    "{other} bit floating point samples"
                )))
            }
        })
    }
}

fn read_u16(bytes: &[u8], endian: Endian) -> u16 {
    match endian {
        Endian::Little => LittleEndian::read_u16(bytes),
        Endian::Big => BigEndian::read_u16(bytes),
    }
}

/// DNG 24 bit float: 1 sign bit, 7 exponent bits (bias 63), 16 mantissa bits.
fn fp24_to_f32_bits(raw: u32) -> u32 {
    let sign = (raw >> 23) & 1;
    let mut exponent = ((raw >> 16) & 0x7F) as i32;
    let mut mantissa = raw & 0xFFFF;
    if exponent == 0x7F {
        // inf / nan
        return (sign << 31) | 0x7F80_0000 | (mantissa << 7);
    }
    if exponent == 0 {
        if mantissa == 0 {
            return sign << 31;
        }
        // denormal, normalize it
        while mantissa & 0x10000 == 0 {
            mantissa <<= 1;
            exponent -= 1;
        }
        exponent += 1;
        mantissa &= !0x10000;
    }
    let exponent = (exponent + 128 - 64) as u32;
    (sign << 31) | (exponent << 23) | (mantissa << 7)
}
