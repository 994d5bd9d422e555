//! The compression schemes a DNG block may be stored with.

pub mod deflate;
pub mod ljpeg;
pub mod lzw;
pub mod predictor;

use crate::error::{DngError, Result};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};

pub const COMPRESSION_NONE: u32 = 1;
pub const COMPRESSION_LZW: u32 = 5;
pub const COMPRESSION_LOSSLESS_JPEG: u32 = 7;
pub const COMPRESSION_DEFLATE: u32 = 8;
const COMPRESSION_ADOBE_DEFLATE_OLD: u32 = 32946;

/// The value of the `Compression` tag, as far as this crate understands it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
    LosslessJpeg,
    Unsupported(u32),
}

impl Compression {
    pub fn from_code(code: u32) -> Self {
        match code {
            COMPRESSION_NONE => Compression::None,
            COMPRESSION_LZW => Compression::Lzw,
            COMPRESSION_LOSSLESS_JPEG => Compression::LosslessJpeg,
            COMPRESSION_DEFLATE | COMPRESSION_ADOBE_DEFLATE_OLD => Compression::Deflate,
            other => Compression::Unsupported(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Compression::None => COMPRESSION_NONE,
            Compression::Lzw => COMPRESSION_LZW,
            Compression::Deflate => COMPRESSION_DEFLATE,
            Compression::LosslessJpeg => COMPRESSION_LOSSLESS_JPEG,
            Compression::Unsupported(code) => *code,
        }
    }

    /// Decompresses one stored block.
    ///
    /// `packed_len` is the number of bytes the block unpacks from, `sample_count` the
    /// number of samples it holds. Byte oriented schemes stop producing output at
    /// `packed_len`; lossless JPEG yields the samples directly and its frame must hold
    /// exactly `sample_count` of them.
    pub fn decompress<'a>(
        &self,
        data: &'a [u8],
        packed_len: usize,
        sample_count: usize,
    ) -> Result<BlockData<'a>> {
        match self {
            Compression::None => Ok(BlockData::Packed(Cow::Borrowed(data))),
            Compression::Lzw => Ok(BlockData::Packed(lzw::decode(data, packed_len)?.into())),
            Compression::Deflate => {
                Ok(BlockData::Packed(deflate::decode(data, packed_len)?.into()))
            }
            Compression::LosslessJpeg => {
                let (_, samples) = ljpeg::decode(data, sample_count)?;
                Ok(BlockData::Samples(samples))
            }
            Compression::Unsupported(code) => Err(DngError::unsupported(
                *code,
                match code {
                    6 => "old-style JPEG",
                    34892 => "lossy JPEG",
                    _ => "unknown compression",
                },
            )),
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "uncompressed"),
            Compression::Lzw => write!(f, "LZW"),
            Compression::Deflate => write!(f, "Deflate"),
            Compression::LosslessJpeg => write!(f, "lossless JPEG"),
            Compression::Unsupported(code) => write!(f, "unsupported ({code})"),
        }
    }
}

/// One decompressed block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockData<'a> {
    /// Stored sample bytes, still packed at the image's bit depth.
    Packed(Cow<'a, [u8]>),
    /// Samples that came out of the codec fully decoded.
    Samples(Vec<u16>),
}
