//! Raster file formats.
//!
//! Currently one format: GeoTIFF, including Cloud-Optimized GeoTIFFs with
//! internal overviews. [`tiff`] holds the container-level primitives
//! (header, IFDs, tag values, chunk decoding); [`GeoTiffDataset`] layers
//! georeferencing and window reads on top.

mod geotiff;
pub mod tiff;

#[cfg(test)]
pub(crate) mod testing;

pub use geotiff::GeoTiffDataset;
