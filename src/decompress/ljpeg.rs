//! Lossless JPEG (ITU T.81 process 14, SOF3) as used by DNG.
//!
//! Only what DNG writers produce is supported: one interleaved scan, every component
//! sampled 1x1, Huffman coding, predictors 1 to 7 and optional restart intervals.

use super::COMPRESSION_LOSSLESS_JPEG;
use crate::error::{DngError, Result};
use tracing::debug;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOF3: u8 = 0xC3;
const DHT: u8 = 0xC4;
const SOS: u8 = 0xDA;
const DRI: u8 = 0xDD;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;

/// Zero bytes fed to the entropy decoder past the end of the scan before giving up.
const MAX_PADDING_BYTES: usize = 4;

/// The frame header of a lossless JPEG stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub precision: u8,
    pub height: u16,
    pub width: u16,
    pub component_ids: Vec<u8>,
}

impl Frame {
    pub fn components(&self) -> usize {
        self.component_ids.len()
    }

    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize * self.components()
    }
}

fn unsupported(reason: impl Into<String>) -> DngError {
    DngError::unsupported(COMPRESSION_LOSSLESS_JPEG, reason)
}

/// The sample predicted from its left (`ra`), upper (`rb`) and upper left (`rc`) neighbours.
fn predict(predictor: u8, ra: i32, rb: i32, rc: i32) -> i32 {
    match predictor {
        1 => ra,
        2 => rb,
        3 => rc,
        4 => ra + rb - rc,
        5 => ra + ((rb - rc) >> 1),
        6 => rb + ((ra - rc) >> 1),
        _ => (ra + rb) >> 1,
    }
}

#[derive(Debug, Clone)]
struct HuffmanTable {
    values: Vec<u8>,
    min_code: [i32; 16],
    max_code: [i32; 16],
    val_ptr: [i32; 16],
}

impl HuffmanTable {
    fn from_dht(lengths: &[u8; 16], values: &[u8]) -> Result<Self> {
        let total: usize = lengths.iter().map(|l| *l as usize).sum();
        if total != values.len() || total > 256 {
            return Err(DngError::corrupt("Huffman table counts do not match its values"));
        }
        let mut table = Self {
            values: values.to_vec(),
            min_code: [0; 16],
            max_code: [-1; 16],
            val_ptr: [0; 16],
        };
        let mut code = 0i32;
        let mut index = 0i32;
        for (i, count) in lengths.iter().enumerate() {
            let count = *count as i32;
            if count > 0 {
                table.val_ptr[i] = index;
                table.min_code[i] = code;
                code += count;
                index += count;
                table.max_code[i] = code - 1;
            }
            code <<= 1;
        }
        Ok(table)
    }

    fn decode(&self, reader: &mut EntropyReader) -> Result<u8> {
        let mut code = 0i32;
        for i in 0..16 {
            code = (code << 1) | reader.read_bits(1)? as i32;
            if code <= self.max_code[i] {
                let index = self.val_ptr[i] + code - self.min_code[i];
                return self
                    .values
                    .get(index as usize)
                    .copied()
                    .ok_or_else(|| DngError::corrupt("Huffman code points past its table"));
            }
        }
        Err(DngError::corrupt("invalid Huffman code"))
    }
}

/// Bit reader over entropy coded data that removes `FF00` stuffing and stops at markers.
struct EntropyReader<'a> {
    data: &'a [u8],
    position: usize,
    buffer: u32,
    bits: u32,
    padding: usize,
}

impl<'a> EntropyReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            buffer: 0,
            bits: 0,
            padding: 0,
        }
    }

    fn next_byte(&mut self) -> Result<u8> {
        match self.data.get(self.position..self.position + 2) {
            Some([0xFF, 0x00]) => {
                self.position += 2;
                return Ok(0xFF);
            }
            // a marker ends the entropy coded segment
            Some([0xFF, _]) => {}
            _ => {
                if let Some(byte) = self.data.get(self.position).filter(|b| **b != 0xFF) {
                    self.position += 1;
                    return Ok(*byte);
                }
            }
        }
        self.padding += 1;
        if self.padding > MAX_PADDING_BYTES {
            return Err(DngError::corrupt("lossless JPEG scan ended early"));
        }
        Ok(0)
    }

    fn read_bits(&mut self, count: u32) -> Result<u32> {
        if count == 0 {
            return Ok(0);
        }
        while self.bits < count {
            self.buffer = (self.buffer << 8) | self.next_byte()? as u32;
            self.bits += 8;
        }
        self.bits -= count;
        Ok((self.buffer >> self.bits) & ((1 << count) - 1))
    }

    /// Drops the partial byte and consumes the expected `RSTn` marker.
    fn restart(&mut self) -> Result<()> {
        self.buffer = 0;
        self.bits = 0;
        match self.data.get(self.position..self.position + 2) {
            Some([0xFF, marker]) if (RST0..=RST7).contains(marker) => {
                self.position += 2;
                self.padding = 0;
                Ok(())
            }
            _ => Err(DngError::corrupt("missing restart marker")),
        }
    }

    /// The difference for magnitude category `ssss`.
    fn read_difference(&mut self, ssss: u8) -> Result<i32> {
        match ssss {
            0 => Ok(0),
            16 => Ok(32768),
            1..=15 => {
                let bits = ssss as u32;
                let value = self.read_bits(bits)? as i32;
                Ok(if value < 1 << (bits - 1) {
                    value - (1 << bits) + 1
                } else {
                    value
                })
            }
            _ => Err(DngError::corrupt(format!("difference category {ssss}"))),
        }
    }
}

struct Scan {
    table_for_component: Vec<usize>,
    predictor: u8,
    point_transform: u8,
}

fn be_u16(data: &[u8], at: usize) -> Result<u16> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| DngError::corrupt("lossless JPEG header is truncated"))
}

/// The body of the marker segment starting at `at` (just after the marker).
fn segment(data: &[u8], at: usize) -> Result<&[u8]> {
    let len = be_u16(data, at)? as usize;
    if len < 2 {
        return Err(DngError::corrupt("invalid marker segment length"));
    }
    data.get(at + 2..at + len)
        .ok_or_else(|| DngError::corrupt("marker segment runs past the block"))
}

fn parse_frame(body: &[u8]) -> Result<Frame> {
    if body.len() < 6 {
        return Err(DngError::corrupt("short SOF3 segment"));
    }
    let components = body[5] as usize;
    if components == 0 || components > 4 || body.len() < 6 + components * 3 {
        return Err(unsupported(format!("{components} JPEG components")));
    }
    let mut component_ids = Vec::with_capacity(components);
    for c in 0..components {
        let component = &body[6 + c * 3..9 + c * 3];
        if component[1] != 0x11 {
            return Err(unsupported("subsampled JPEG components"));
        }
        component_ids.push(component[0]);
    }
    let frame = Frame {
        precision: body[0],
        height: u16::from_be_bytes([body[1], body[2]]),
        width: u16::from_be_bytes([body[3], body[4]]),
        component_ids,
    };
    if !(2..=16).contains(&frame.precision) || frame.width == 0 || frame.height == 0 {
        return Err(DngError::corrupt(format!("invalid JPEG frame {frame:?}")));
    }
    Ok(frame)
}

fn parse_tables(body: &[u8], tables: &mut [Option<HuffmanTable>; 4]) -> Result<()> {
    let mut rest = body;
    while !rest.is_empty() {
        if rest.len() < 17 {
            return Err(DngError::corrupt("short DHT segment"));
        }
        let id = (rest[0] & 0x0F) as usize;
        let mut lengths = [0u8; 16];
        lengths.copy_from_slice(&rest[1..17]);
        let total: usize = lengths.iter().map(|l| *l as usize).sum();
        let values = rest
            .get(17..17 + total)
            .ok_or_else(|| DngError::corrupt("short DHT segment"))?;
        let slot = tables
            .get_mut(id)
            .ok_or_else(|| DngError::corrupt(format!("Huffman table id {id}")))?;
        *slot = Some(HuffmanTable::from_dht(&lengths, values)?);
        rest = &rest[17 + total..];
    }
    Ok(())
}

fn parse_scan(body: &[u8], frame: &Frame, tables: &[Option<HuffmanTable>; 4]) -> Result<Scan> {
    let count = *body.first().unwrap_or(&0) as usize;
    if count != frame.components() {
        return Err(unsupported("non-interleaved lossless JPEG scans"));
    }
    if body.len() < 1 + count * 2 + 3 {
        return Err(DngError::corrupt("short SOS segment"));
    }
    let mut table_for_component = Vec::with_capacity(count);
    for c in 0..count {
        let table = (body[2 + c * 2] >> 4) as usize;
        if tables.get(table).map_or(true, Option::is_none) {
            return Err(DngError::corrupt(format!("scan uses undefined Huffman table {table}")));
        }
        table_for_component.push(table);
    }
    let predictor = body[1 + count * 2];
    let point_transform = body[3 + count * 2] & 0x0F;
    if !(1..=7).contains(&predictor) {
        return Err(unsupported(format!("lossless JPEG predictor {predictor}")));
    }
    if point_transform >= frame.precision {
        return Err(DngError::corrupt(format!("point transform {point_transform}")));
    }
    Ok(Scan {
        table_for_component,
        predictor,
        point_transform,
    })
}

/// Decodes a complete lossless JPEG stream into row-major, component-interleaved samples.
///
/// The frame has to hold exactly `sample_count` samples; any other frame size is rejected
/// before the sample buffer is allocated.
pub fn decode(data: &[u8], sample_count: usize) -> Result<(Frame, Vec<u16>)> {
    if data.get(0..2) != Some(&[0xFF, SOI]) {
        return Err(DngError::corrupt("lossless JPEG block does not start with SOI"));
    }
    let mut tables: [Option<HuffmanTable>; 4] = Default::default();
    let mut frame = None;
    let mut restart_interval = 0usize;
    let mut at = 2;

    loop {
        // skip fill bytes up to the marker code
        while data.get(at) == Some(&0xFF) && data.get(at + 1) == Some(&0xFF) {
            at += 1;
        }
        let marker = match data.get(at..at + 2) {
            Some([0xFF, marker]) => *marker,
            _ => return Err(DngError::corrupt("expected a JPEG marker")),
        };
        at += 2;
        match marker {
            EOI => return Err(DngError::corrupt("lossless JPEG stream has no scan")),
            SOF3 => frame = Some(parse_frame(segment(data, at)?)?),
            0xC0..=0xC2 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                return Err(unsupported(format!(
                    "JPEG frame type {marker:#04X} is not lossless"
                )))
            }
            DHT => parse_tables(segment(data, at)?, &mut tables)?,
            DRI => restart_interval = be_u16(data, at + 2)? as usize,
            SOS => {
                let frame = frame.ok_or_else(|| DngError::corrupt("SOS before SOF3"))?;
                if frame.sample_count() != sample_count {
                    return Err(DngError::corrupt(format!(
                        "lossless JPEG frame {}x{}x{} does not hold the {sample_count} samples of its block",
                        frame.width,
                        frame.height,
                        frame.components()
                    )));
                }
                let body = segment(data, at)?;
                let scan = parse_scan(body, &frame, &tables)?;
                let scan_start = at + 2 + body.len();
                debug!(
                    "lossless JPEG {}x{}x{} at {} bits, predictor {}",
                    frame.width,
                    frame.height,
                    frame.components(),
                    frame.precision,
                    scan.predictor
                );
                let samples = decode_scan(
                    &data[scan_start..],
                    &frame,
                    &scan,
                    &tables,
                    restart_interval,
                )?;
                return Ok((frame, samples));
            }
            _ => {}
        }
        if marker != SOI {
            at += be_u16(data, at)? as usize;
        }
    }
}

fn decode_scan(
    data: &[u8],
    frame: &Frame,
    scan: &Scan,
    tables: &[Option<HuffmanTable>; 4],
    restart_interval: usize,
) -> Result<Vec<u16>> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let components = frame.components();
    let row_len = width * components;
    let tables: Vec<&HuffmanTable> = scan
        .table_for_component
        .iter()
        .filter_map(|t| tables[*t].as_ref())
        .collect();
    let initial = 1i32 << (frame.precision - scan.point_transform - 1);

    let mut out = vec![0u16; frame.sample_count()];
    let mut reader = EntropyReader::new(data);
    let mut pixels_decoded = 0usize;
    // the line in which the current restart interval began
    let mut interval_row = 0usize;
    let mut interval_start = true;

    for row in 0..height {
        for col in 0..width {
            if restart_interval > 0 && pixels_decoded > 0 && pixels_decoded % restart_interval == 0 {
                reader.restart()?;
                interval_row = row;
                interval_start = true;
            }
            for (c, table) in tables.iter().enumerate() {
                let ssss = table.decode(&mut reader)?;
                let difference = reader.read_difference(ssss)?;
                let at = row * row_len + col * components + c;
                let prediction = if interval_start {
                    initial
                } else if row == interval_row {
                    out[at - components] as i32
                } else if col == 0 {
                    out[at - row_len] as i32
                } else {
                    predict(
                        scan.predictor,
                        out[at - components] as i32,
                        out[at - row_len] as i32,
                        out[at - row_len - components] as i32,
                    )
                };
                out[at] = (prediction + difference) as u16;
            }
            interval_start = false;
            pixels_decoded += 1;
        }
    }

    if scan.point_transform > 0 {
        for sample in out.iter_mut() {
            *sample <<= scan.point_transform;
        }
    }
    Ok(out)
}
