//! Tile matrix sets: the zoom ↔ resolution mapping used to derive asset zoom
//! ranges and to bucket catalog coverage.

use crate::geo::{Bounds, Crs, HALF_EARTH};

use super::Tile;

/// Relative tolerance when comparing resolutions.
const RESOLUTION_EPSILON: f64 = 1e-8;

/// A quadtree tile matrix set.
///
/// Implementors supply the matrix geometry; zoom selection and tile
/// enumeration have default implementations in terms of it.
pub trait TileMatrixSet: Send + Sync {
    fn id(&self) -> &str;

    /// CRS the matrices are defined in.
    fn crs(&self) -> Crs;

    /// Tile edge in pixels.
    fn tile_size(&self) -> u32;

    fn min_zoom(&self) -> u8;

    fn max_zoom(&self) -> u8;

    /// Pixel size in CRS units at `zoom`.
    fn resolution_for_zoom(&self, zoom: u8) -> f64;

    /// Top-left corner of the matrix in CRS units.
    fn origin(&self) -> (f64, f64);

    /// Zoom whose resolution best matches `resolution`.
    ///
    /// Picks the first zoom at least as fine as `resolution`, then steps back
    /// one level when the coarser zoom is closer in ratio.
    fn zoom_for_resolution(&self, resolution: f64) -> u8 {
        let (min_z, max_z) = (self.min_zoom(), self.max_zoom());

        let mut zoom = max_z;
        for z in min_z..=max_z {
            let matrix_res = self.resolution_for_zoom(z);
            if resolution > matrix_res
                || (resolution - matrix_res).abs() / matrix_res <= RESOLUTION_EPSILON
            {
                zoom = z;
                break;
            }
        }

        let matrix_res = self.resolution_for_zoom(zoom);
        if zoom > min_z && (resolution - matrix_res).abs() / matrix_res > RESOLUTION_EPSILON {
            let coarser = self.resolution_for_zoom(zoom - 1);
            if coarser / resolution < resolution / matrix_res {
                zoom -= 1;
            }
        }
        zoom
    }

    /// Tile footprint in the matrix CRS.
    fn tile_bounds(&self, tile: &Tile) -> Bounds {
        let (ox, oy) = self.origin();
        let span = self.resolution_for_zoom(tile.z) * self.tile_size() as f64;
        Bounds::new(
            ox + tile.x as f64 * span,
            oy - (tile.y as f64 + 1.0) * span,
            ox + (tile.x as f64 + 1.0) * span,
            oy - tile.y as f64 * span,
        )
    }

    /// Tiles at `zoom` whose interior overlaps `bounds` (matrix CRS). Tiles
    /// that only share an edge are excluded.
    fn tiles_for_bounds(&self, bounds: &Bounds, zoom: u8) -> Vec<Tile> {
        let (ox, oy) = self.origin();
        let span = self.resolution_for_zoom(zoom) * self.tile_size() as f64;
        let last = (1i64 << zoom) - 1;

        let x0 = (((bounds.min_x - ox) / span).floor() as i64).clamp(0, last);
        let x1 = ((((bounds.max_x - ox) / span).ceil() as i64) - 1).clamp(-1, last);
        let y0 = (((oy - bounds.max_y) / span).floor() as i64).clamp(0, last);
        let y1 = ((((oy - bounds.min_y) / span).ceil() as i64) - 1).clamp(-1, last);

        let mut tiles = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                let tile = Tile {
                    x: x as u32,
                    y: y as u32,
                    z: zoom,
                };
                if self.tile_bounds(&tile).intersects(bounds) {
                    tiles.push(tile);
                }
            }
        }
        tiles
    }

    /// Tile at `zoom` containing a point in the matrix CRS.
    fn tile_for_point(&self, x: f64, y: f64, zoom: u8) -> Tile {
        let (ox, oy) = self.origin();
        let span = self.resolution_for_zoom(zoom) * self.tile_size() as f64;
        let last = (1i64 << zoom) - 1;
        Tile {
            x: (((x - ox) / span).floor() as i64).clamp(0, last) as u32,
            y: (((oy - y) / span).floor() as i64).clamp(0, last) as u32,
            z: zoom,
        }
    }
}

/// The `WebMercatorQuad` tile matrix set (EPSG:3857, 256px tiles).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebMercatorQuad;

impl TileMatrixSet for WebMercatorQuad {
    fn id(&self) -> &str {
        "WebMercatorQuad"
    }

    fn crs(&self) -> Crs {
        Crs::WEB_MERCATOR
    }

    fn tile_size(&self) -> u32 {
        256
    }

    fn min_zoom(&self) -> u8 {
        0
    }

    fn max_zoom(&self) -> u8 {
        24
    }

    fn resolution_for_zoom(&self, zoom: u8) -> f64 {
        2.0 * HALF_EARTH / (256.0 * (1u64 << zoom) as f64)
    }

    fn origin(&self) -> (f64, f64) {
        (-HALF_EARTH, HALF_EARTH)
    }
}
