use crate::byte_order_rw::ByteOrderReader;
use crate::error::{DngError, Result};
use crate::ifd::{Ifd, IfdEntry, IfdPath, IfdValue};
use crate::tags::{IfdType, IfdTypeInterpretation, IfdValueType, MaybeKnownIfdFieldDescriptor};
use std::collections::HashSet;
use tracing::{debug, info};

/// Walks a chain of IFDs and everything they point to.
///
/// The visited set is shared by the whole traversal: a directory offset that comes up a
/// second time, in the top-level chain or below any pointer tag, is a [DngError::MalformedChain].
pub struct IfdReader<'a> {
    reader: ByteOrderReader<'a>,
    visited: HashSet<u32>,
    max_depth: usize,
}

impl<'a> IfdReader<'a> {
    pub fn new(reader: ByteOrderReader<'a>, max_depth: usize) -> Self {
        Self {
            reader,
            visited: HashSet::new(),
            max_depth,
        }
    }

    /// Reads the top-level chain starting at `first_offset`, in file order.
    pub fn read_chain(&mut self, first_offset: u32) -> Result<Vec<Ifd>> {
        let mut ifds = Vec::new();
        let mut next = first_offset;
        while next != 0 {
            let index = u16::try_from(ifds.len())
                .map_err(|_| DngError::MalformedChain("too many IFDs in chain".to_string()))?;
            let (ifd, next_offset) = self.read_ifd(next, IfdType::Ifd, IfdPath::root(index), 0)?;
            if next_offset != 0 {
                self.checked_ifd_offset(next_offset as u64, || format!("next pointer of {}", ifd.path))?;
            }
            ifds.push(ifd);
            next = next_offset;
        }
        Ok(ifds)
    }

    fn read_ifd(
        &mut self,
        offset: u32,
        ifd_type: IfdType,
        path: IfdPath,
        depth: usize,
    ) -> Result<(Ifd, u32)> {
        if depth > self.max_depth {
            return Err(DngError::MalformedChain(format!(
                "IFD nesting deeper than {} at {path}",
                self.max_depth
            )));
        }
        if !self.visited.insert(offset) {
            return Err(DngError::MalformedChain(format!(
                "IFD at offset {offset:#x} is referenced twice (at {path})"
            )));
        }

        let count = self.reader.read_u16(offset as u64)?;
        if count == 0 {
            return Err(DngError::MalformedChain(format!(
                "IFD at offset {offset:#x} has no entries"
            )));
        }
        debug!("reading {count} entries of {path} at {offset:#x}");

        let mut ifd = Ifd::new(ifd_type, path);
        ifd.offset = offset;
        for i in 0..count as u64 {
            let entry_reader = IfdEntryReader::read(&self.reader, offset as u64 + 2 + i * 12)?;
            let tag = MaybeKnownIfdFieldDescriptor::from_number(entry_reader.tag, ifd_type);
            let value = self.read_value(&entry_reader, tag, &ifd.path, depth)?;
            if !ifd.insert(IfdEntry::new(tag, value)) {
                info!("dropping duplicate tag {tag} in {}", ifd.path);
            }
        }
        let next = self
            .reader
            .read_u32(offset as u64 + 2 + count as u64 * 12)?;
        Ok((ifd, next))
    }

    fn read_value(
        &mut self,
        entry: &IfdEntryReader,
        tag: MaybeKnownIfdFieldDescriptor,
        path: &IfdPath,
        depth: usize,
    ) -> Result<IfdValue> {
        let Some(dtype) = entry.dtype else {
            info!(
                "tag {tag} in {path} has unknown value type {}, keeping it opaque",
                entry.type_code
            );
            return Ok(IfdValue::Opaque {
                type_code: entry.type_code,
                count: entry.count,
                raw: entry.raw,
            });
        };
        if !tag.accepts(dtype, entry.count) {
            info!(
                "tag {tag} in {path} has unexpected type {dtype:?} / count {}",
                entry.count
            );
        }

        let data_offset = entry.data_offset(&self.reader)?;
        if let Some(IfdTypeInterpretation::IfdOffset { ifd_type }) = tag.type_interpretation() {
            if matches!(
                dtype,
                IfdValueType::Long | IfdValueType::Ifd | IfdValueType::Long8 | IfdValueType::Ifd8
            ) {
                return self.read_sub_ifds(entry, dtype, data_offset, tag, *ifd_type, path, depth);
            }
        }
        read_primitive_ifd_value(&self.reader, dtype, entry.count, data_offset)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_sub_ifds(
        &mut self,
        entry: &IfdEntryReader,
        dtype: IfdValueType,
        data_offset: u64,
        tag: MaybeKnownIfdFieldDescriptor,
        ifd_type: IfdType,
        path: &IfdPath,
        depth: usize,
    ) -> Result<IfdValue> {
        let mut children = Vec::new();
        for i in 0..entry.count as u64 {
            let pointer = match dtype.size() {
                8 => self.reader.read_u64(data_offset + i * 8)?,
                _ => self.reader.read_u32(data_offset + i * 4)? as u64,
            };
            // a chain hanging off a pointer is flattened into the same list
            let mut offset = self.checked_ifd_offset(pointer, || format!("{tag} in {path}"))?;
            loop {
                let child_path = path
                    .chain_tag(tag)
                    .chain_list_index(children.len() as u16);
                let (child, next_offset) =
                    self.read_ifd(offset, ifd_type, child_path, depth + 1)?;
                children.push(IfdValue::Ifd(child));
                if next_offset == 0 {
                    break;
                }
                offset = self
                    .checked_ifd_offset(next_offset as u64, || format!("{tag} chain in {path}"))?;
            }
        }
        Ok(match children.len() {
            1 => children.remove(0),
            _ => IfdValue::List(children),
        })
    }

    fn checked_ifd_offset(&self, pointer: u64, source: impl FnOnce() -> String) -> Result<u32> {
        match u32::try_from(pointer) {
            Ok(offset) if offset != 0 && (offset as usize) < self.reader.len() => Ok(offset),
            _ => Err(DngError::MalformedChain(format!(
                "{} points at invalid offset {pointer:#x}",
                source()
            ))),
        }
    }
}

/// The raw 12 bytes of one directory entry.
#[derive(Debug, PartialEq, Eq)]
pub struct IfdEntryReader {
    pub tag: u16,
    pub type_code: u16,
    pub dtype: Option<IfdValueType>,
    pub count: u32,
    raw: [u8; 4],
    own_offset: u64,
}

impl IfdEntryReader {
    pub fn read(reader: &ByteOrderReader, own_offset: u64) -> Result<Self> {
        let tag = reader.read_u16(own_offset)?;
        let type_code = reader.read_u16(own_offset + 2)?;
        let count = reader.read_u32(own_offset + 4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(reader.slice(own_offset + 8, 4)?);
        Ok(Self {
            tag,
            type_code,
            dtype: IfdValueType::try_from(type_code).ok(),
            count,
            raw,
            own_offset,
        })
    }

    fn byte_len(&self) -> Option<u64> {
        self.dtype
            .map(|dtype| self.count as u64 * dtype.size() as u64)
    }

    /// Values of up to 4 bytes live in the entry itself, larger ones are pointed to.
    fn fits_inline(&self) -> bool {
        self.byte_len().is_some_and(|len| len <= 4)
    }

    /// Where the value bytes start, checked to lie fully inside the buffer.
    fn data_offset(&self, reader: &ByteOrderReader) -> Result<u64> {
        let len = self.byte_len().unwrap_or(0);
        let offset = if self.fits_inline() {
            self.own_offset + 8
        } else {
            reader.read_u32(self.own_offset + 8)? as u64
        };
        reader.slice(offset, len)?;
        Ok(offset)
    }
}

fn read_primitive_ifd_value(
    reader: &ByteOrderReader,
    dtype: IfdValueType,
    count: u32,
    offset: u64,
) -> Result<IfdValue> {
    if dtype == IfdValueType::Ascii {
        let bytes = reader.slice(offset, count as u64)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        return Ok(IfdValue::Ascii(
            String::from_utf8_lossy(&bytes[..end]).to_string(),
        ));
    }
    if count != 1 {
        let size = dtype.size() as u64;
        let values: Result<Vec<_>> = (0..count as u64)
            .map(|i| read_single_value(reader, dtype, offset + i * size))
            .collect();
        return Ok(IfdValue::List(values?));
    }
    read_single_value(reader, dtype, offset)
}

fn read_single_value(reader: &ByteOrderReader, dtype: IfdValueType, offset: u64) -> Result<IfdValue> {
    Ok(match dtype {
        IfdValueType::Byte => IfdValue::Byte(reader.read_u8(offset)?),
        IfdValueType::Ascii => IfdValue::Ascii((reader.read_u8(offset)? as char).to_string()),
        IfdValueType::Short => IfdValue::Short(reader.read_u16(offset)?),
        IfdValueType::Long | IfdValueType::Ifd => IfdValue::Long(reader.read_u32(offset)?),
        IfdValueType::Rational => {
            IfdValue::Rational(reader.read_u32(offset)?, reader.read_u32(offset + 4)?)
        }
        IfdValueType::SignedByte => IfdValue::SByte(reader.read_i8(offset)?),
        IfdValueType::Undefined => IfdValue::Undefined(reader.read_u8(offset)?),
        IfdValueType::SignedShort => IfdValue::SShort(reader.read_i16(offset)?),
        IfdValueType::SignedLong => IfdValue::SLong(reader.read_i32(offset)?),
        IfdValueType::SignedRational => {
            IfdValue::SRational(reader.read_i32(offset)?, reader.read_i32(offset + 4)?)
        }
        IfdValueType::Float => IfdValue::Float(reader.read_f32(offset)?),
        IfdValueType::Double => IfdValue::Double(reader.read_f64(offset)?),
        IfdValueType::Long8 | IfdValueType::Ifd8 => IfdValue::Long8(reader.read_u64(offset)?),
        IfdValueType::SignedLong8 => IfdValue::SLong8(reader.read_i64(offset)?),
    })
}
