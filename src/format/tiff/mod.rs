//! TIFF parsing primitives for GeoTIFF rasters.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian, MM = big-endian)
//!   in the header. All multi-byte values must be read respecting this order.
//!
//! - **Classic TIFF vs BigTIFF**: Classic TIFF uses 32-bit offsets (max 4GB files),
//!   while BigTIFF uses 64-bit offsets. The parser handles both transparently.
//!
//! - **IFD (Image File Directory)**: Contains metadata and pointers to image data.
//!   A COG has one IFD for the full-resolution image followed by one per overview.
//!
//! - **Chunks**: pixel data is stored in tiles or strips, each compressed
//!   independently and optionally predictor-encoded.

mod decode;
mod geokeys;
mod parser;
mod tags;
mod values;

pub use decode::{
    apply_predictor, data_type_for, decompress, merge_jpeg_tables, sample_at, samples_to_f64,
};
pub use geokeys::GeoKeys;
pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use tags::{
    Compression, FieldType, SampleFormat, TiffTag, SUBFILE_MASK, SUBFILE_REDUCED_IMAGE,
};
pub use values::ValueReader;
