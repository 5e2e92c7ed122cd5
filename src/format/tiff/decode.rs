//! Chunk decoding: decompression, predictor reversal and sample conversion.
//!
//! ```text
//! compressed chunk ──decompress──▶ raw bytes ──apply_predictor──▶ samples
//!                                                   │
//!                                   samples_to_f64 ◀┘ (file byte order)
//! ```

use std::io::{Cursor, Read};

use crate::error::TiffError;
use crate::raster::DataType;

use super::parser::ByteOrder;
use super::tags::{Compression, SampleFormat};

// =============================================================================
// JPEG tables
// =============================================================================

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Merge a shared `JPEGTables` stream with an abbreviated chunk stream.
///
/// Both streams are framed by SOI/EOI. The result keeps the SOI of the
/// tables, drops their EOI, drops the SOI of the chunk and keeps its EOI.
pub fn merge_jpeg_tables(tables: &[u8], chunk: &[u8]) -> Vec<u8> {
    if tables.is_empty() {
        return chunk.to_vec();
    }
    if chunk.is_empty() {
        return Vec::new();
    }

    let tables_end = if tables.ends_with(&EOI) {
        tables.len() - 2
    } else {
        tables.len()
    };
    let chunk_start = if chunk.starts_with(&SOI) { 2 } else { 0 };

    let mut merged = Vec::with_capacity(tables_end + chunk.len() - chunk_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&chunk[chunk_start..]);
    merged
}

// =============================================================================
// Decompression
// =============================================================================

/// Decompress one tile or strip into `expected_len` raw bytes.
///
/// Uncompressed chunks shorter than expected (last strip) are zero padded.
pub fn decompress(
    data: &[u8],
    compression: Compression,
    expected_len: usize,
    jpeg_tables: Option<&[u8]>,
) -> Result<Vec<u8>, TiffError> {
    let mut raw = match compression {
        Compression::None => data.to_vec(),
        Compression::Deflate => {
            let mut decoder = flate2::read::ZlibDecoder::new(data);
            let mut out = Vec::with_capacity(expected_len);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| TiffError::Decode(format!("deflate: {}", e)))?;
            out
        }
        Compression::Jpeg => decode_jpeg(data, jpeg_tables)?,
        other => return Err(TiffError::UnsupportedCompression(other.name())),
    };

    raw.resize(expected_len, 0);
    Ok(raw)
}

fn decode_jpeg(data: &[u8], tables: Option<&[u8]>) -> Result<Vec<u8>, TiffError> {
    let stream = match tables {
        Some(tables) => merge_jpeg_tables(tables, data),
        None => data.to_vec(),
    };

    let image = image::ImageReader::with_format(Cursor::new(stream), image::ImageFormat::Jpeg)
        .decode()
        .map_err(|e| TiffError::Decode(format!("jpeg: {}", e)))?;

    Ok(match image {
        image::DynamicImage::ImageLuma8(gray) => gray.into_raw(),
        image::DynamicImage::ImageRgb8(rgb) => rgb.into_raw(),
        other => other.to_rgb8().into_raw(),
    })
}

// =============================================================================
// Predictors
// =============================================================================

/// Undo TIFF predictor encoding in place.
///
/// `width` is the chunk width in pixels; rows are independent. Predictor 2
/// differences each sample against the previous pixel's sample of the same
/// band. Predictor 3 stores each row as byte planes (most significant first)
/// that were byte-differenced; the output is written back in file byte order.
pub fn apply_predictor(
    data: &mut [u8],
    predictor: u16,
    width: usize,
    samples_per_pixel: usize,
    bytes_per_sample: usize,
    order: ByteOrder,
) -> Result<(), TiffError> {
    let row_len = width * samples_per_pixel * bytes_per_sample;
    if row_len == 0 {
        return Ok(());
    }

    match predictor {
        1 => Ok(()),
        2 => {
            for row in data.chunks_exact_mut(row_len) {
                horizontal_undo(row, samples_per_pixel, bytes_per_sample, order)?;
            }
            Ok(())
        }
        3 => {
            let mut scratch = vec![0u8; row_len];
            for row in data.chunks_exact_mut(row_len) {
                floating_point_undo(row, &mut scratch, samples_per_pixel, bytes_per_sample, order);
            }
            Ok(())
        }
        other => Err(TiffError::UnsupportedLayout(format!("predictor {}", other))),
    }
}

macro_rules! accumulate {
    ($row:expr, $ty:ty, $n:expr, $stride:expr, $order:expr) => {{
        let samples = $row.len() / $n;
        for i in $stride..samples {
            let prev = &$row[(i - $stride) * $n..(i - $stride + 1) * $n];
            let curr = &$row[i * $n..(i + 1) * $n];
            let (p, c) = match $order {
                ByteOrder::LittleEndian => (
                    <$ty>::from_le_bytes(prev.try_into().unwrap_or_default()),
                    <$ty>::from_le_bytes(curr.try_into().unwrap_or_default()),
                ),
                ByteOrder::BigEndian => (
                    <$ty>::from_be_bytes(prev.try_into().unwrap_or_default()),
                    <$ty>::from_be_bytes(curr.try_into().unwrap_or_default()),
                ),
            };
            let sum = c.wrapping_add(p);
            let bytes = match $order {
                ByteOrder::LittleEndian => sum.to_le_bytes(),
                ByteOrder::BigEndian => sum.to_be_bytes(),
            };
            $row[i * $n..(i + 1) * $n].copy_from_slice(&bytes);
        }
    }};
}

fn horizontal_undo(
    row: &mut [u8],
    spp: usize,
    bytes_per_sample: usize,
    order: ByteOrder,
) -> Result<(), TiffError> {
    match bytes_per_sample {
        1 => {
            for i in spp..row.len() {
                row[i] = row[i].wrapping_add(row[i - spp]);
            }
        }
        2 => accumulate!(row, u16, 2, spp, order),
        4 => accumulate!(row, u32, 4, spp, order),
        8 => accumulate!(row, u64, 8, spp, order),
        other => {
            return Err(TiffError::UnsupportedLayout(format!(
                "horizontal predictor with {}-byte samples",
                other
            )))
        }
    }
    Ok(())
}

fn floating_point_undo(
    row: &mut [u8],
    scratch: &mut [u8],
    spp: usize,
    bytes_per_sample: usize,
    order: ByteOrder,
) {
    for i in spp..row.len() {
        row[i] = row[i].wrapping_add(row[i - spp]);
    }

    let samples = row.len() / bytes_per_sample;
    for s in 0..samples {
        for b in 0..bytes_per_sample {
            // plane b holds byte b (big-endian) of every sample
            let value = row[b * samples + s];
            let target = match order {
                ByteOrder::BigEndian => b,
                ByteOrder::LittleEndian => bytes_per_sample - 1 - b,
            };
            scratch[s * bytes_per_sample + target] = value;
        }
    }
    row.copy_from_slice(scratch);
}

// =============================================================================
// Sample conversion
// =============================================================================

/// Map TIFF sample description to a raster data type.
pub fn data_type_for(format: SampleFormat, bits: u16) -> Result<DataType, TiffError> {
    Ok(match (format, bits) {
        (SampleFormat::Unsigned, 8) => DataType::UInt8,
        (SampleFormat::Signed, 8) => DataType::Int8,
        (SampleFormat::Unsigned, 16) => DataType::UInt16,
        (SampleFormat::Signed, 16) => DataType::Int16,
        (SampleFormat::Unsigned, 32) => DataType::UInt32,
        (SampleFormat::Signed, 32) => DataType::Int32,
        (SampleFormat::Float, 32) => DataType::Float32,
        (SampleFormat::Float, 64) => DataType::Float64,
        (format, bits) => {
            return Err(TiffError::UnsupportedLayout(format!(
                "{:?} samples with {} bits",
                format, bits
            )))
        }
    })
}

/// Read the sample at `index` (in samples, not bytes) as f64.
#[inline]
pub fn sample_at(bytes: &[u8], index: usize, dtype: DataType, order: ByteOrder) -> f64 {
    let size = dtype.size_in_bytes();
    let b = &bytes[index * size..(index + 1) * size];
    match dtype {
        DataType::UInt8 => b[0] as f64,
        DataType::Int8 => b[0] as i8 as f64,
        DataType::UInt16 => order.read_u16(b) as f64,
        DataType::Int16 => order.read_i16(b) as f64,
        DataType::UInt32 => order.read_u32(b) as f64,
        DataType::Int32 => order.read_i32(b) as f64,
        DataType::Float32 => order.read_f32(b) as f64,
        DataType::Float64 => order.read_f64(b),
    }
}

/// Convert a whole decoded chunk to f64 samples.
pub fn samples_to_f64(bytes: &[u8], dtype: DataType, order: ByteOrder) -> Vec<f64> {
    let count = bytes.len() / dtype.size_in_bytes();
    (0..count)
        .map(|i| sample_at(bytes, i, dtype, order))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
