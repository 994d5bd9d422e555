use super::Endian;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};

/// Writes primitives in the byte order of the container being produced.
pub struct ByteOrderWriter<W: Write> {
    writer: W,
    endian: Endian,
}

impl<W: Write> ByteOrderWriter<W> {
    pub fn new(writer: W, endian: Endian) -> Self {
        Self { writer, endian }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

macro_rules! generate_write_function {
    ($name:ident, $kind:ty, single_byte) => {
        #[allow(unused)]
        pub fn $name(&mut self, value: $kind) -> io::Result<()> {
            self.writer.$name(value)
        }
    };
    ($name:ident, $kind:ty) => {
        #[allow(unused)]
        pub fn $name(&mut self, value: $kind) -> io::Result<()> {
            match self.endian {
                Endian::Little => self.writer.$name::<LittleEndian>(value),
                Endian::Big => self.writer.$name::<BigEndian>(value),
            }
        }
    };
}

impl<W: Write> ByteOrderWriter<W> {
    generate_write_function!(write_u8, u8, single_byte);
    generate_write_function!(write_i8, i8, single_byte);
    generate_write_function!(write_u16, u16);
    generate_write_function!(write_i16, i16);
    generate_write_function!(write_u32, u32);
    generate_write_function!(write_i32, i32);
    generate_write_function!(write_u64, u64);
    generate_write_function!(write_i64, i64);
    generate_write_function!(write_f32, f32);
    generate_write_function!(write_f64, f64);
}

impl<W: Write> Deref for ByteOrderWriter<W> {
    type Target = W;

    fn deref(&self) -> &Self::Target {
        &self.writer
    }
}

impl<W: Write> DerefMut for ByteOrderWriter<W> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.writer
    }
}
