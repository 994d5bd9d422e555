//! Decodes DNG raw images into raw sensor sample planes and the metadata needed to
//! process them.
//!
//! ```no_run
//! let result = dng_decode::load_dng_file("image.dng").expect("not a readable DNG");
//! for image in &result.images {
//!     println!("{}x{} at {} bits", image.width(), image.height(), image.bits_per_sample()[0]);
//! }
//! for diagnostic in &result.diagnostics {
//!     eprintln!("skipped {diagnostic}");
//! }
//! ```

pub mod assembler;
pub mod bit_unpacker;
pub mod byte_order_rw;
pub mod decompress;
pub mod descriptor;
pub mod dng_reader;
pub mod dng_writer;
pub mod error;
pub mod ifd;
pub mod ifd_reader;
pub mod tags;

#[cfg(test)]
mod testutil;

pub use assembler::Samples;
pub use byte_order_rw::Endian;
pub use decompress::Compression;
pub use descriptor::ImageDescriptor;
pub use dng_reader::{
    load_dng, load_dng_file, load_dng_with_options, DecodedImage, Diagnostic, DngLoader,
    LoadOptions, LoadResult, LoaderState,
};
pub use dng_writer::DngWriter;
pub use error::{DngError, Result};

/// The TIFF flavour announced by the magic number after the byte order marker.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum FileType {
    Dng = 42,
}

impl FileType {
    pub fn from_magic(magic: u16) -> Option<Self> {
        match magic {
            42 => Some(FileType::Dng),
            _ => None,
        }
    }

    pub fn magic(&self) -> u16 {
        *self as u16
    }
}
