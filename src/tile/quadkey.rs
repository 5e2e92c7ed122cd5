use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TileError;

/// Deepest zoom a quadkey can address.
pub const MAX_QUADKEY_ZOOM: u8 = 30;

/// A tile address in a quadtree tile matrix set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl Tile {
    /// Build a tile, validating that x and y lie inside the matrix.
    pub fn new(x: u32, y: u32, z: u8) -> Result<Self, TileError> {
        if z > MAX_QUADKEY_ZOOM {
            return Err(TileError::InvalidZoom {
                zoom: z,
                min: 0,
                max: MAX_QUADKEY_ZOOM,
            });
        }
        let size = 1u64 << z;
        if x as u64 >= size || y as u64 >= size {
            return Err(TileError::OutOfRange { z, x, y });
        }
        Ok(Self { x, y, z })
    }

    /// Bing-style quadkey: one digit per zoom level, empty at zoom 0.
    pub fn quadkey(&self) -> String {
        let mut key = String::with_capacity(self.z as usize);
        for i in (1..=self.z).rev() {
            let mask = 1u32 << (i - 1);
            let mut digit = b'0';
            if self.x & mask != 0 {
                digit += 1;
            }
            if self.y & mask != 0 {
                digit += 2;
            }
            key.push(digit as char);
        }
        key
    }

    pub fn from_quadkey(quadkey: &str) -> Result<Self, TileError> {
        if quadkey.len() > MAX_QUADKEY_ZOOM as usize {
            return Err(TileError::InvalidQuadkey(quadkey.to_string()));
        }
        let z = quadkey.len() as u8;
        let (mut x, mut y) = (0u32, 0u32);
        for (i, c) in quadkey.chars().enumerate() {
            let mask = 1u32 << (z as usize - i - 1);
            match c {
                '0' => {}
                '1' => x |= mask,
                '2' => y |= mask,
                '3' => {
                    x |= mask;
                    y |= mask;
                }
                _ => return Err(TileError::InvalidQuadkey(quadkey.to_string())),
            }
        }
        Ok(Self { x, y, z })
    }

    /// Ancestor at `zoom`, or `None` when `zoom` is deeper than this tile.
    pub fn parent_at(&self, zoom: u8) -> Option<Tile> {
        if zoom > self.z {
            return None;
        }
        let shift = self.z - zoom;
        Some(Tile {
            x: self.x >> shift,
            y: self.y >> shift,
            z: zoom,
        })
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
