//! TIFF header and IFD parsing.
//!
//! ## Classic TIFF (8-byte header, 12-byte entries)
//! ```text
//! Bytes 0-1: Byte order ("II" little-endian, "MM" big-endian)
//! Bytes 2-3: Version (42)
//! Bytes 4-7: Offset to first IFD
//! ```
//!
//! ## BigTIFF (16-byte header, 20-byte entries)
//! ```text
//! Bytes 0-1:  Byte order
//! Bytes 2-3:  Version (43)
//! Bytes 4-5:  Offset byte size (8)
//! Bytes 6-7:  Reserved
//! Bytes 8-15: Offset to first IFD
//! ```
//!
//! An IFD is an entry count, the entries, then the offset of the next IFD.
//! Each entry is `tag, type, count, value-or-offset`; values that fit in the
//! value field are stored inline.

use crate::error::TiffError;

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

const BYTE_ORDER_LITTLE_ENDIAN: [u8; 2] = *b"II";
const BYTE_ORDER_BIG_ENDIAN: [u8; 2] = *b"MM";
const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on entries in a single IFD
const MAX_IFD_ENTRIES: u64 = 4096;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) declared by the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

macro_rules! read_fn {
    ($name:ident, $ty:ty, $n:expr) => {
        #[inline]
        pub fn $name(self, bytes: &[u8]) -> $ty {
            let mut buf = [0u8; $n];
            buf.copy_from_slice(&bytes[..$n]);
            match self {
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(buf),
                ByteOrder::BigEndian => <$ty>::from_be_bytes(buf),
            }
        }
    };
}

impl ByteOrder {
    read_fn!(read_u16, u16, 2);
    read_fn!(read_u32, u32, 4);
    read_fn!(read_u64, u64, 8);
    read_fn!(read_i16, i16, 2);
    read_fn!(read_i32, i32, 4);
    read_fn!(read_i64, i64, 8);
    read_fn!(read_f32, f32, 4);
    read_fn!(read_f64, f64, 8);
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a header from the first bytes of a file.
    ///
    /// Pass at least 16 bytes when available so BigTIFF headers can be read.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let byte_order = match [bytes[0], bytes[1]] {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(u16::from_le_bytes([bytes[0], bytes[1]]))),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            other => return Err(TiffError::InvalidVersion(other)),
        };

        if first_ifd_offset == 0 || first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Size of one IFD entry: 12 bytes classic, 20 bytes BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count at the start of an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the value/offset field, also the next-IFD pointer size.
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Decode an IFD entry count from its leading bytes.
    pub fn read_entry_count(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u16(bytes) as u64
        }
    }

    fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One directory entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u64,
    /// Raw value/offset field (4 or 8 significant bytes)
    pub value_offset_bytes: [u8; 8],
    /// Whether the value is stored in `value_offset_bytes`
    pub is_inline: bool,
}

impl IfdEntry {
    fn parse(bytes: &[u8], header: &TiffHeader) -> Self {
        let order = header.byte_order;
        let tag = order.read_u16(&bytes[0..2]);
        let field_type_raw = order.read_u16(&bytes[2..4]);
        let field_type = FieldType::from_u16(field_type_raw);

        let (count, value_start) = if header.is_bigtiff {
            (order.read_u64(&bytes[4..12]), 12)
        } else {
            (order.read_u32(&bytes[4..8]) as u64, 8)
        };

        let size = header.value_offset_size();
        let mut value_offset_bytes = [0u8; 8];
        value_offset_bytes[..size].copy_from_slice(&bytes[value_start..value_start + size]);

        let is_inline = field_type
            .map(|ft| ft.fits_inline(count, header.is_bigtiff))
            .unwrap_or(false);

        IfdEntry {
            tag,
            field_type,
            field_type_raw,
            count,
            value_offset_bytes,
            is_inline,
        }
    }

    /// Total size of the value in bytes, if the field type is known.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|ft| ft.size_in_bytes() as u64)
            .and_then(|size| size.checked_mul(self.count))
    }

    /// File offset of the value (only meaningful when not inline).
    pub fn value_offset(&self, header: &TiffHeader) -> u64 {
        header.read_offset(&self.value_offset_bytes)
    }

    /// A single inline unsigned integer, when the entry holds one.
    pub fn inline_u64(&self, order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        match self.field_type? {
            FieldType::Byte => Some(self.value_offset_bytes[0] as u64),
            FieldType::Short => Some(order.read_u16(&self.value_offset_bytes) as u64),
            FieldType::Long => Some(order.read_u32(&self.value_offset_bytes) as u64),
            FieldType::Long8 => Some(order.read_u64(&self.value_offset_bytes)),
            _ => None,
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Byte size of an IFD with `entry_count` entries.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.value_offset_size()
    }

    /// Parse a complete IFD (count, entries, next offset).
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count_size = header.ifd_count_size();
        if bytes.len() < count_size {
            return Err(TiffError::FileTooSmall {
                required: count_size as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_count = header.read_entry_count(bytes);
        if entry_count == 0 || entry_count > MAX_IFD_ENTRIES {
            return Err(TiffError::InvalidTagValue {
                tag: "IFD",
                message: format!("implausible entry count {}", entry_count),
            });
        }

        let required = Self::calculate_size(entry_count, header);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let entries = (0..entry_count as usize)
            .map(|i| {
                let start = count_size + i * entry_size;
                IfdEntry::parse(&bytes[start..start + entry_size], header)
            })
            .collect();

        let next_start = count_size + entry_count as usize * entry_size;
        let next_ifd_offset = header.read_offset(&bytes[next_start..]);

        Ok(Ifd {
            entries,
            next_ifd_offset,
        })
    }

    /// Look up an entry by tag.
    pub fn entry(&self, tag: TiffTag) -> Option<&IfdEntry> {
        let id = tag.as_u16();
        self.entries.iter().find(|e| e.tag == id)
    }

    /// Look up an inline single-valued integer tag.
    pub fn inline_u64(&self, tag: TiffTag, order: ByteOrder) -> Option<u64> {
        self.entry(tag).and_then(|e| e.inline_u64(order))
    }
}

// =============================================================================
// Tests
// =============================================================================
