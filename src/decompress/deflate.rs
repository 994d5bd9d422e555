//! Adobe Deflate (compression 8): a zlib stream per block.

use crate::error::{DngError, Result};
use miniz_oxide::inflate::{decompress_to_vec_zlib_with_limit, TINFLStatus};

/// Inflates at most `max_len` bytes. A stream with more data than that is cut off.
pub fn decode(data: &[u8], max_len: usize) -> Result<Vec<u8>> {
    match decompress_to_vec_zlib_with_limit(data, max_len) {
        Ok(out) => Ok(out),
        Err(e) if e.status == TINFLStatus::HasMoreOutput => Ok(e.output),
        Err(e) => Err(DngError::corrupt(format!("inflate failed: {:?}", e.status))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miniz_oxide::deflate::compress_to_vec_zlib;

    #[test]
    fn inflates_a_block() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let compressed = compress_to_vec_zlib(&data, 6);
        assert_eq!(decode(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn stops_at_the_limit() {
        let compressed = compress_to_vec_zlib(&[7; 1000], 6);
        assert_eq!(decode(&compressed, 100).unwrap(), vec![7; 100]);
    }

    #[test]
    fn garbage_is_corrupt() {
        assert!(matches!(
            decode(&[0x12, 0x34, 0x56, 0x78], 100),
            Err(DngError::CorruptStream(_))
        ));
    }
}
