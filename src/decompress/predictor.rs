//! Reversal of the TIFF predictors, applied per block row.

use crate::error::{DngError, Result};

/// Undoes horizontal differencing on unpacked integer samples.
///
/// Every row starts over; each channel is differenced against the same channel of the
/// previous pixel, modulo `2^bits`.
pub fn undo_horizontal(samples: &mut [u32], row_samples: usize, samples_per_pixel: usize, bits: u16) {
    let mask = if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    };
    for row in samples.chunks_mut(row_samples) {
        for i in samples_per_pixel..row.len() {
            row[i] = row[i].wrapping_add(row[i - samples_per_pixel]) & mask;
        }
    }
}

/// Undoes the floating point predictor in place.
///
/// Each row is byte-wise differenced and holds the bytes of its samples as planes, most
/// significant byte first. Afterwards the row contains big endian samples.
pub fn undo_floating_point(
    data: &mut [u8],
    row_samples: usize,
    rows: usize,
    bytes_per_sample: usize,
    samples_per_pixel: usize,
) -> Result<()> {
    let row_bytes = row_samples * bytes_per_sample;
    if data.len() < row_bytes * rows {
        return Err(DngError::corrupt(format!(
            "floating point block holds {} bytes but {} are needed",
            data.len(),
            row_bytes * rows
        )));
    }
    let mut planes = vec![0u8; row_bytes];
    for row in data[..row_bytes * rows].chunks_exact_mut(row_bytes) {
        for i in samples_per_pixel..row.len() {
            row[i] = row[i].wrapping_add(row[i - samples_per_pixel]);
        }
        planes.copy_from_slice(row);
        for sample in 0..row_samples {
            for byte in 0..bytes_per_sample {
                row[sample * bytes_per_sample + byte] = planes[byte * row_samples + sample];
            }
        }
    }
    Ok(())
}
