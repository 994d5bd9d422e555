use crate::error::{DngError, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// The byte order of a TIFF container, fixed by its first two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// `II` marks little endian, `MM` big endian.
    pub fn from_marker(marker: [u8; 2]) -> Option<Self> {
        match marker {
            [0x49, 0x49] => Some(Endian::Little),
            [0x4D, 0x4D] => Some(Endian::Big),
            _ => None,
        }
    }

    pub fn marker(&self) -> [u8; 2] {
        match self {
            Endian::Little => [0x49, 0x49],
            Endian::Big => [0x4D, 0x4D],
        }
    }
}

/// Bounds checked, endian aware reads over an immutable byte buffer.
///
/// There is no cursor state: every read takes an absolute offset, so recursive IFD
/// traversal never has to save and restore a position.
#[derive(Clone, Copy)]
pub struct ByteOrderReader<'a> {
    data: &'a [u8],
    endian: Endian,
}

impl<'a> ByteOrderReader<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self { data, endian }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Returns `len` bytes starting at `offset` or fails with [DngError::TruncatedData].
    pub fn slice(&self, offset: u64, len: u64) -> Result<&'a [u8]> {
        let truncated = || DngError::TruncatedData {
            offset,
            len,
            available: self.data.len(),
        };
        let start = usize::try_from(offset).map_err(|_| truncated())?;
        let len_usize = usize::try_from(len).map_err(|_| truncated())?;
        let end = start.checked_add(len_usize).ok_or_else(truncated)?;
        self.data.get(start..end).ok_or_else(truncated)
    }

    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn read_i8(&self, offset: u64) -> Result<i8> {
        Ok(self.read_u8(offset)? as i8)
    }
}

macro_rules! generate_read_function {
    ($name:ident, $kind:ty) => {
        #[allow(unused)]
        pub fn $name(&self, offset: u64) -> Result<$kind> {
            let bytes = self.slice(offset, std::mem::size_of::<$kind>() as u64)?;
            Ok(match self.endian {
                Endian::Little => LittleEndian::$name(bytes),
                Endian::Big => BigEndian::$name(bytes),
            })
        }
    };
}

impl<'a> ByteOrderReader<'a> {
    generate_read_function!(read_u16, u16);
    generate_read_function!(read_i16, i16);
    generate_read_function!(read_u32, u32);
    generate_read_function!(read_i32, i32);
    generate_read_function!(read_u64, u64);
    generate_read_function!(read_i64, i64);
    generate_read_function!(read_f32, f32);
    generate_read_function!(read_f64, f64);
}
