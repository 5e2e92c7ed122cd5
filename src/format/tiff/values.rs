//! Tag value reading.
//!
//! Values are either inline in the IFD entry or stored elsewhere in the file.
//! Arrays (chunk offsets, byte counts, GeoTIFF doubles) are fetched with a
//! single range request.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::{FieldType, TiffTag};

/// Reads tag values for one file, respecting its byte order and layout.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw value bytes of an entry, from inline storage or the file.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        let offset = entry.value_offset(self.header);
        if offset.saturating_add(size) > self.reader.size() {
            return Err(TiffError::InvalidTagValue {
                tag: "entry",
                message: format!(
                    "tag {} value ({} bytes at {}) lies outside the file",
                    entry.tag, size, offset
                ),
            });
        }
        Ok(self.reader.read_exact_at(offset, size as usize).await?)
    }

    /// Unsigned integer array (Byte, Short, Long, Long8).
    pub async fn read_u64_array(
        &self,
        entry: &IfdEntry,
        tag: TiffTag,
    ) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        let order = self.byte_order();
        let width = field_type.size_in_bytes();
        let chunks = bytes.chunks_exact(width);

        let values: Vec<u64> = match field_type {
            FieldType::Byte | FieldType::Undefined => chunks.map(|c| c[0] as u64).collect(),
            FieldType::Short => chunks.map(|c| order.read_u16(c) as u64).collect(),
            FieldType::Long => chunks.map(|c| order.read_u32(c) as u64).collect(),
            FieldType::Long8 => chunks.map(|c| order.read_u64(c)).collect(),
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag: tag.name(),
                    message: format!("expected unsigned integer type, got {:?}", other),
                })
            }
        };
        Ok(values)
    }

    /// Single unsigned integer value.
    pub async fn read_u64(&self, entry: &IfdEntry, tag: TiffTag) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.byte_order()) {
            return Ok(value);
        }
        self.read_u64_array(entry, tag)
            .await?
            .first()
            .copied()
            .ok_or(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: "empty value".to_string(),
            })
    }

    /// Any numeric array, widened to f64.
    pub async fn read_f64_array(
        &self,
        entry: &IfdEntry,
        tag: TiffTag,
    ) -> Result<Vec<f64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        let order = self.byte_order();
        let chunks = bytes.chunks_exact(field_type.size_in_bytes());

        let values: Vec<f64> = match field_type {
            FieldType::Byte | FieldType::Undefined => chunks.map(|c| c[0] as f64).collect(),
            FieldType::SByte => chunks.map(|c| c[0] as i8 as f64).collect(),
            FieldType::Short => chunks.map(|c| order.read_u16(c) as f64).collect(),
            FieldType::SShort => chunks.map(|c| order.read_i16(c) as f64).collect(),
            FieldType::Long => chunks.map(|c| order.read_u32(c) as f64).collect(),
            FieldType::SLong => chunks.map(|c| order.read_i32(c) as f64).collect(),
            FieldType::Long8 => chunks.map(|c| order.read_u64(c) as f64).collect(),
            FieldType::SLong8 => chunks.map(|c| order.read_i64(c) as f64).collect(),
            FieldType::Float => chunks.map(|c| order.read_f32(c) as f64).collect(),
            FieldType::Double => chunks.map(|c| order.read_f64(c)).collect(),
            FieldType::Rational => chunks
                .map(|c| order.read_u32(&c[0..4]) as f64 / order.read_u32(&c[4..8]) as f64)
                .collect(),
            FieldType::SRational => chunks
                .map(|c| order.read_i32(&c[0..4]) as f64 / order.read_i32(&c[4..8]) as f64)
                .collect(),
            FieldType::Ascii => {
                return Err(TiffError::InvalidTagValue {
                    tag: tag.name(),
                    message: "expected numeric type, got Ascii".to_string(),
                })
            }
        };
        Ok(values)
    }

    /// ASCII value with the trailing NUL stripped.
    pub async fn read_string(&self, entry: &IfdEntry, tag: TiffTag) -> Result<String, TiffError> {
        if entry.field_type != Some(FieldType::Ascii) {
            return Err(TiffError::InvalidTagValue {
                tag: tag.name(),
                message: format!("expected Ascii type, got {:?}", entry.field_type),
            });
        }
        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

// =============================================================================
// Tests
// =============================================================================
