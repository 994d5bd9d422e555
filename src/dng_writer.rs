use crate::byte_order_rw::{ByteOrderWriter, Endian};
use crate::ifd::{Ifd, IfdEntry, IfdValue};
use crate::FileType;
use derivative::Derivative;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::io::{Cursor, Seek, Write};
use std::sync::Arc;

#[derive(Derivative)]
#[derivative(Debug)]
pub struct WritePlanEntry<W: Write + Seek> {
    offset: u32,
    size: u32,
    #[derivative(Debug = "ignore")]
    write_fn: Box<dyn FnOnce(&mut ByteOrderWriter<W>) -> io::Result<()>>,
}

/// Space handed out ahead of time; entries are written in the order they were planned.
#[derive(Debug, Derivative)]
#[derivative(Default(bound = ""))]
pub struct WritePlan<W: Write + Seek> {
    to_write: RefCell<VecDeque<WritePlanEntry<W>>>,
    write_ptr: RefCell<u32>,
}
impl<W: Write + Seek> WritePlan<W> {
    pub fn add_entry(
        &self,
        size: u32,
        write_fn: impl FnOnce(&mut ByteOrderWriter<W>) -> io::Result<()> + 'static,
    ) -> u32 {
        let offset = (*self.write_ptr.borrow() + 3) & !3; // word aligned
        self.to_write.borrow_mut().push_back(WritePlanEntry {
            offset,
            size,
            write_fn: Box::new(write_fn),
        });
        *self.write_ptr.borrow_mut() = offset + size;
        offset
    }
    fn execute(&self, writer: &mut ByteOrderWriter<W>) -> io::Result<()> {
        loop {
            let Some(entry) = self.to_write.borrow_mut().pop_front() else {
                return Ok(());
            };
            let current_offset = writer.stream_position()? as u32;
            if entry.offset < current_offset {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "a previous entry wrote past its size (write_offset={current_offset}, expected={})",
                        entry.offset
                    ),
                ));
            }
            for _ in 0..(entry.offset - current_offset) {
                writer.write_u8(0)?;
            }

            (entry.write_fn)(writer)?;

            let current_offset = writer.stream_position()? as u32;
            if entry.offset + entry.size != current_offset {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "entry at {} wrote {} bytes instead of {}",
                        entry.offset,
                        current_offset - entry.offset,
                        entry.size
                    ),
                ));
            }
        }
    }
}

/// Writes an IFD tree as a TIFF container.
///
/// Nested IFDs and every value that does not fit into the 4 byte slot of its entry are
/// placed after the directory referencing them. `IfdValue::Offsets` entries place their
/// bytes the same way and store the pointer.
#[derive(Debug, Derivative)]
#[derivative(Clone(bound = ""))]
pub struct DngWriter<W: Write + Seek> {
    endian: Endian,
    plan: Arc<WritePlan<W>>,
}
impl<W: Write + Seek + 'static> DngWriter<W> {
    /// Writes `ifds` as the top-level chain and hands the writer back.
    pub fn write_dng(writer: W, endian: Endian, file_type: FileType, ifds: Vec<Ifd>) -> io::Result<W> {
        let plan = Arc::new(WritePlan::default());
        let dng_writer = Self { endian, plan };
        let dng_writer_clone = dng_writer.clone();
        dng_writer.plan.add_entry(8, move |writer| {
            writer.write_all(&endian.marker())?;
            writer.write_u16(file_type.magic())?;

            let ifd_address = dng_writer_clone.write_ifds(ifds);
            writer.write_u32(ifd_address)
        });

        let mut writer = ByteOrderWriter::new(writer, endian);
        dng_writer.plan.execute(&mut writer)?;
        Ok(writer.into_inner())
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn write_ifds(&self, mut ifds: Vec<Ifd>) -> u32 {
        if ifds.is_empty() {
            return 0; // the chain ends with a null pointer
        }
        let ifd = ifds.remove(0);

        // 2 byte count, 12 bytes per entry, 4 byte pointer to the next ifd
        let ifd_size = 2 + (ifd.entries.len() as u32 * 12) + 4;
        let self_clone = self.clone();
        self.plan.add_entry(ifd_size, move |writer| {
            writer.write_u16(ifd.entries.len() as u16)?;
            for entry in ifd.entries {
                self_clone.write_ifd_entry(writer, entry)?;
            }
            let next_ifd_address = self_clone.write_ifds(ifds);
            writer.write_u32(next_ifd_address)
        })
    }

    pub fn write_ifd_entry(&self, writer: &mut ByteOrderWriter<W>, entry: IfdEntry) -> io::Result<()> {
        // 2 byte tag, 2 byte type, 4 byte count, 4 byte value or pointer
        let count = entry.value.count();
        writer.write_u16(entry.tag.into())?;
        writer.write_u16(entry.value.type_code())?;
        writer.write_u32(count)?;

        if let IfdValue::Opaque { raw, .. } = entry.value {
            return writer.write_all(&raw);
        }

        let required_bytes = count * entry.value.value_type().map_or(1, |t| t.size() as u32);
        if required_bytes <= 4 {
            write_value(entry.value, writer, self)?;
            for _ in 0..(4 - required_bytes) {
                writer.write_u8(0)?;
            }
            Ok(())
        } else {
            let self_clone = self.clone();
            let value_pointer = self.plan.add_entry(required_bytes, move |writer| {
                write_value(entry.value, writer, &self_clone)
            });
            writer.write_u32(value_pointer)
        }
    }
}

fn write_value<W: Write + Seek + 'static>(
    value: IfdValue,
    writer: &mut ByteOrderWriter<W>,
    dng_writer: &DngWriter<W>,
) -> io::Result<()> {
    match value {
        IfdValue::Byte(v) | IfdValue::Undefined(v) => writer.write_u8(v),
        IfdValue::Ascii(v) => {
            writer.write_all(v.as_bytes())?;
            writer.write_u8(0)
        }
        IfdValue::Short(v) => writer.write_u16(v),
        IfdValue::Long(v) => writer.write_u32(v),
        IfdValue::Rational(num, denom) => {
            writer.write_u32(num)?;
            writer.write_u32(denom)
        }
        IfdValue::SByte(v) => writer.write_i8(v),
        IfdValue::SShort(v) => writer.write_i16(v),
        IfdValue::SLong(v) => writer.write_i32(v),
        IfdValue::SRational(num, denom) => {
            writer.write_i32(num)?;
            writer.write_i32(denom)
        }
        IfdValue::Float(v) => writer.write_f32(v),
        IfdValue::Double(v) => writer.write_f64(v),
        IfdValue::Long8(v) => writer.write_u64(v),
        IfdValue::SLong8(v) => writer.write_i64(v),
        IfdValue::List(list) => {
            for v in list {
                write_value(v, writer, dng_writer)?;
            }
            Ok(())
        }
        IfdValue::Ifd(ifd) => {
            let ifd_offset = dng_writer.write_ifds(vec![ifd]);
            writer.write_u32(ifd_offset)
        }
        IfdValue::Offsets(data) => {
            let offset = dng_writer
                .plan
                .add_entry(data.len() as u32, move |writer| writer.write_all(&data));
            writer.write_u32(offset)
        }
        IfdValue::Opaque { raw, .. } => writer.write_all(&raw),
    }
}

/// Writes a DNG container into memory.
pub fn write_dng_to_vec(endian: Endian, ifds: Vec<Ifd>) -> io::Result<Vec<u8>> {
    Ok(DngWriter::write_dng(Cursor::new(Vec::new()), endian, FileType::Dng, ifds)?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_order_rw::ByteOrderReader;
    use crate::ifd::IfdPath;
    use crate::ifd_reader::IfdReader;
    use crate::tags::{ifd, IfdType};

    #[test]
    fn header_and_inline_values() {
        let dir = Ifd::new(IfdType::Ifd, IfdPath::root(0))
            .with(ifd::ImageWidth, IfdValue::Short(640))
            .with(ifd::ImageLength, IfdValue::Long(480));
        let le = write_dng_to_vec(Endian::Little, vec![dir.clone()]).unwrap();
        assert_eq!(&le[..8], &[0x49, 0x49, 42, 0, 8, 0, 0, 0]);
        // count, then ImageWidth SHORT 1 640
        assert_eq!(&le[8..10], &[2, 0]);
        assert_eq!(&le[10..22], &[0x00, 0x01, 3, 0, 1, 0, 0, 0, 0x80, 0x02, 0, 0]);

        let be = write_dng_to_vec(Endian::Big, vec![dir]).unwrap();
        assert_eq!(&be[..8], &[0x4D, 0x4D, 0, 42, 0, 0, 0, 8]);
        assert_eq!(le.len(), be.len());
    }

    #[test]
    fn nested_and_out_of_line_values_read_back() {
        let child = Ifd::new(IfdType::Ifd, IfdPath::default())
            .with(ifd::ImageWidth, IfdValue::Long(4000))
            .with(ifd::UniqueCameraModel, IfdValue::Ascii("Test Camera".into()));
        let root = Ifd::new(IfdType::Ifd, IfdPath::root(0))
            .with(ifd::ImageWidth, IfdValue::Long(256))
            .with(ifd::SubIFDs, IfdValue::Ifd(child))
            .with(ifd::StripOffsets, IfdValue::Offsets(Arc::from(&[9u8, 8, 7, 6, 5][..])));
        for endian in [Endian::Little, Endian::Big] {
            let bytes = write_dng_to_vec(endian, vec![root.clone()]).unwrap();
            let reader = ByteOrderReader::new(&bytes, endian);
            let dirs = IfdReader::new(reader, 16).read_chain(8).unwrap();
            assert_eq!(dirs.len(), 1);
            let read_child = dirs[0].children().next().unwrap();
            assert_eq!(read_child.get_u32(&ifd::ImageWidth), Some(4000));
            assert_eq!(
                read_child.get_value(&ifd::UniqueCameraModel).and_then(IfdValue::as_str),
                Some("Test Camera")
            );
            let strip = dirs[0].get_u32(&ifd::StripOffsets).unwrap() as u64;
            assert_eq!(reader.slice(strip, 5).unwrap(), &[9, 8, 7, 6, 5]);
        }
    }
}
