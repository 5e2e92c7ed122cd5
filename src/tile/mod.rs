//! Tile addressing.
//!
//! - [`Tile`]: `z/x/y` address with Bing-style quadkey encoding
//! - [`TileMatrixSet`]: zoom ↔ resolution mapping, tile footprints and
//!   tile enumeration for a bounding box
//! - [`WebMercatorQuad`]: the default matrix set (EPSG:3857)
//!
//! The catalog indexes coverage by quadkey. Because a tile's quadkey is a
//! prefix of all its descendants' quadkeys, parent lookups and child range
//! scans are both string operations on the index keys.

mod quadkey;
mod tms;

pub use quadkey::{Tile, MAX_QUADKEY_ZOOM};
pub use tms::{TileMatrixSet, WebMercatorQuad};
