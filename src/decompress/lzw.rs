//! TIFF flavoured LZW: MSB-first codes of 9 to 12 bits, widened one code early.

use crate::bit_unpacker::BitReader;
use crate::error::{DngError, Result};

const CLEAR: u32 = 256;
const END_OF_INFORMATION: u32 = 257;
const FIRST_FREE: usize = 258;
const MAX_ENTRIES: usize = 4096;
const MIN_WIDTH: u32 = 9;
const MAX_WIDTH: u32 = 12;

#[derive(Clone, Copy)]
struct Entry {
    prefix: u16,
    first: u8,
    last: u8,
    len: u32,
}

struct Table {
    entries: Vec<Entry>,
}

impl Table {
    fn new() -> Self {
        let mut entries = Vec::with_capacity(MAX_ENTRIES);
        entries.extend((0..=255u8).map(|b| Entry {
            prefix: 0,
            first: b,
            last: b,
            len: 1,
        }));
        // clear and end-of-information never expand to anything
        entries.extend([Entry {
            prefix: 0,
            first: 0,
            last: 0,
            len: 0,
        }; 2]);
        Self { entries }
    }

    fn reset(&mut self) {
        self.entries.truncate(FIRST_FREE);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Appends the string of `code` to `out` and returns its first byte.
    fn expand(&self, code: u32, out: &mut Vec<u8>) -> u8 {
        let entry = self.entries[code as usize];
        let start = out.len();
        out.resize(start + entry.len as usize, 0);
        let mut current = entry;
        for pos in (start..out.len()).rev() {
            out[pos] = current.last;
            current = self.entries[current.prefix as usize];
        }
        entry.first
    }

    fn push(&mut self, prefix: u32, last: u8) -> Result<()> {
        if self.entries.len() >= MAX_ENTRIES {
            return Err(DngError::corrupt(
                "LZW code table overflow, stream is missing a clear code",
            ));
        }
        let parent = self.entries[prefix as usize];
        self.entries.push(Entry {
            prefix: prefix as u16,
            first: parent.first,
            last,
            len: parent.len + 1,
        });
        Ok(())
    }
}

/// Decodes until the end-of-information code, the end of `data` or `max_len` output bytes.
pub fn decode(data: &[u8], max_len: usize) -> Result<Vec<u8>> {
    let mut table = Table::new();
    let mut reader = BitReader::new(data);
    // max_len is only an upper bound and may be huge
    let mut out = Vec::with_capacity(max_len.min(data.len().saturating_mul(8)));
    let mut width = MIN_WIDTH;
    let mut previous: Option<u32> = None;

    while out.len() < max_len {
        let Some(code) = reader.read(width) else {
            break;
        };
        match code {
            CLEAR => {
                table.reset();
                width = MIN_WIDTH;
                previous = None;
            }
            END_OF_INFORMATION => break,
            code => {
                let Some(prev) = previous else {
                    if code > 255 {
                        return Err(DngError::corrupt(format!(
                            "LZW stream starts with table code {code}"
                        )));
                    }
                    out.push(code as u8);
                    previous = Some(code);
                    continue;
                };
                let first = if (code as usize) < table.len() {
                    table.expand(code, &mut out)
                } else if code as usize == table.len() {
                    let first = table.expand(prev, &mut out);
                    out.push(first);
                    first
                } else {
                    return Err(DngError::corrupt(format!(
                        "LZW code {code} is beyond the {} table entries",
                        table.len()
                    )));
                };
                table.push(prev, first)?;
                if table.len() == (1 << width) - 1 && width < MAX_WIDTH {
                    width += 1;
                }
                previous = Some(code);
            }
        }
    }
    out.truncate(max_len);
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// A TIFF LZW encoder; `clear_when_full = false` keeps coding with a frozen table.
    pub(crate) fn encode(data: &[u8], clear_when_full: bool) -> Vec<u8> {
        let mut codes = Vec::new();
        let fresh = || -> HashMap<Vec<u8>, u32> { (0..=255u8).map(|b| (vec![b], b as u32)).collect() };
        let mut table = fresh();
        let mut next = FIRST_FREE as u32;
        let mut width = MIN_WIDTH;
        codes.push((CLEAR, width));
        let mut current: Vec<u8> = Vec::new();
        for &byte in data {
            let mut candidate = current.clone();
            candidate.push(byte);
            if table.contains_key(&candidate) {
                current = candidate;
                continue;
            }
            codes.push((table[&current], width));
            if (next as usize) < MAX_ENTRIES {
                table.insert(candidate, next);
                next += 1;
                if next == 1 << width && width < MAX_WIDTH {
                    width += 1;
                }
            }
            if clear_when_full && next == 4094 {
                codes.push((CLEAR, width));
                table = fresh();
                next = FIRST_FREE as u32;
                width = MIN_WIDTH;
            }
            current = vec![byte];
        }
        if !current.is_empty() {
            codes.push((table[&current], width));
        }
        codes.push((END_OF_INFORMATION, width));

        let mut out = Vec::new();
        let (mut acc, mut n) = (0u64, 0u32);
        for (code, width) in codes {
            acc = (acc << width) | code as u64;
            n += width;
            while n >= 8 {
                n -= 8;
                out.push((acc >> n) as u8);
            }
        }
        if n > 0 {
            out.push((acc << (8 - n)) as u8);
        }
        out
    }

    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x1234_5678u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state % 7) as u8
            })
            .collect()
    }

    #[test]
    fn golden_block() {
        let compressed = [
            0x80, 0x00, 0x40, 0x40, 0x30, 0x24, 0x0A, 0x09, 0x06, 0x02, 0x01, 0x61, 0x50, 0xB8,
            0x50, 0x02, 0x1D, 0x0F, 0x88, 0x43, 0xA0, 0x20,
        ];
        let expected = [
            1, 2, 3, 4, 1, 2, 3, 4, 1, 2, 3, 4, 5, 5, 5, 5, 5, 5, 5, 5, 0, 0, 0, 0, 0, 0, 0, 0,
            0, 0, 0, 0,
        ];
        assert_eq!(decode(&compressed, 1 << 20).unwrap(), expected);
        assert_eq!(encode(&expected, true), compressed);
    }

    #[test]
    fn output_is_capped() {
        let compressed = encode(&[9; 100], true);
        assert_eq!(decode(&compressed, 10).unwrap(), vec![9; 10]);
    }

    #[test]
    fn unbounded_length_only_yields_the_stream() {
        let compressed = encode(&[3; 40], true);
        assert_eq!(decode(&compressed, usize::MAX).unwrap(), vec![3; 40]);
    }

    #[test]
    fn width_changes_and_clear_codes() {
        let data = noise(200_000);
        assert_eq!(decode(&encode(&data, true), data.len()).unwrap(), data);
    }

    #[test]
    fn table_overflow_is_corrupt() {
        let data = noise(200_000);
        assert!(matches!(
            decode(&encode(&data, false), data.len()),
            Err(DngError::CorruptStream(_))
        ));
    }

    #[test]
    fn code_beyond_table_is_corrupt() {
        // clear, 'A', then code 300 while only 258 entries exist
        let mut acc = 0u64;
        for code in [CLEAR, 65, 300] {
            acc = (acc << 9) | code as u64;
        }
        let bits = acc << (32 - 27);
        let data = (bits as u32).to_be_bytes();
        assert!(matches!(decode(&data, 100), Err(DngError::CorruptStream(_))));
    }
}
