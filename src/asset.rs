//! Asset footprints: bounds, zoom range and band metadata of one raster.
//!
//! A footprint is derived from the raster's own metadata through the
//! [`RasterReader`] collaborator and a [`TileMatrixSet`] that supplies the
//! zoom ↔ resolution mapping:
//!
//! ```text
//!   maxzoom = zoom matching the native resolution
//!   minzoom = zoom at which the whole raster fits in about one tile
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AssetError, GeoError};
use crate::geo::{Bounds, Crs};
use crate::raster::{BandInfo, RasterReader};
use crate::tile::TileMatrixSet;

/// A source raster with its resolved footprint.
///
/// Assets are immutable once resolved; if the underlying file changes the
/// asset has to be resolved again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub path: String,

    /// Footprint in EPSG:4326 (lon/lat)
    pub bounds: Bounds,

    /// Native CRS of the raster
    pub crs: Crs,

    pub minzoom: u8,
    pub maxzoom: u8,

    pub band_count: usize,

    #[serde(default)]
    pub bands: Vec<BandInfo>,
}

/// Derives [`Asset`]s from raster paths.
///
/// Cheap to clone; clones share the reader and the tile matrix set.
#[derive(Clone)]
pub struct FootprintResolver {
    reader: Arc<dyn RasterReader>,
    tms: Arc<dyn TileMatrixSet>,
}

impl FootprintResolver {
    pub fn new(reader: Arc<dyn RasterReader>, tms: Arc<dyn TileMatrixSet>) -> Self {
        Self { reader, tms }
    }

    pub fn tms(&self) -> &Arc<dyn TileMatrixSet> {
        &self.tms
    }

    pub fn reader(&self) -> &Arc<dyn RasterReader> {
        &self.reader
    }

    /// Resolve the footprint of one asset.
    ///
    /// Fails with [`AssetError`] when the raster is missing, corrupt or
    /// georeferenced in a CRS that cannot be brought into lon/lat.
    pub async fn resolve(&self, path: &str) -> Result<Asset, AssetError> {
        let info = self.reader.info(path).await?;
        if info.width == 0 || info.height == 0 {
            return Err(AssetError::unreadable(path, "raster has no pixels"));
        }

        let unsupported =
            |e: GeoError| AssetError::unreadable(path, format!("unsupported CRS: {}", e));
        let bounds = info
            .crs
            .transform_bounds(Crs::WGS84, &info.bounds)
            .map_err(unsupported)?;
        let matrix_bounds = info
            .crs
            .transform_bounds(self.tms.crs(), &info.bounds)
            .map_err(unsupported)?;

        let resolution = (matrix_bounds.width() / info.width as f64)
            .max(matrix_bounds.height() / info.height as f64);
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(AssetError::unreadable(path, "degenerate raster extent"));
        }

        let maxzoom = self.tms.zoom_for_resolution(resolution);
        let max_side = info.width.max(info.height) as f64;
        let levels = (max_side / self.tms.tile_size() as f64).log2().ceil().max(0.0);
        let minzoom = self
            .tms
            .zoom_for_resolution(resolution * 2f64.powi(levels as i32))
            .min(maxzoom);

        debug!(
            path = path,
            minzoom = minzoom,
            maxzoom = maxzoom,
            crs = %info.crs,
            "Resolved asset footprint"
        );

        Ok(Asset {
            path: path.to_string(),
            bounds,
            crs: info.crs,
            minzoom,
            maxzoom,
            band_count: info.bands.len(),
            bands: info.bands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{DataType, DatasetInfo, RasterWindow, WindowRequest};
    use crate::tile::WebMercatorQuad;
    use async_trait::async_trait;

    struct FixedInfo(DatasetInfo);

    #[async_trait]
    impl RasterReader for FixedInfo {
        async fn info(&self, path: &str) -> Result<DatasetInfo, AssetError> {
            if path == "missing.tif" {
                return Err(AssetError::NotFound {
                    path: path.to_string(),
                });
            }
            Ok(self.0.clone())
        }

        async fn read_window(
            &self,
            path: &str,
            _request: &WindowRequest,
        ) -> Result<RasterWindow, AssetError> {
            Err(AssetError::unreadable(path, "not readable"))
        }
    }

    fn info(crs: Crs, bounds: Bounds, width: u32, height: u32) -> DatasetInfo {
        DatasetInfo {
            crs,
            bounds,
            width,
            height,
            bands: vec![BandInfo {
                index: 1,
                dtype: DataType::UInt8,
                nodata: Some(0.0),
                description: None,
            }],
            overviews: vec![],
        }
    }

    fn resolver(info: DatasetInfo) -> FootprintResolver {
        FootprintResolver::new(Arc::new(FixedInfo(info)), Arc::new(WebMercatorQuad))
    }

    #[tokio::test]
    async fn test_mercator_asset_zooms() {
        let tms = WebMercatorQuad;
        // 4096 px at the zoom 12 resolution: native zoom 12, fits one tile 4 levels up
        let res = tms.resolution_for_zoom(12);
        let size = 4096.0 * res;
        let asset = resolver(info(
            Crs::WEB_MERCATOR,
            Bounds::new(0.0, 0.0, size, size),
            4096,
            4096,
        ))
        .resolve("a.tif")
        .await
        .unwrap();

        assert_eq!(asset.maxzoom, 12);
        assert_eq!(asset.minzoom, 8);
        assert_eq!(asset.band_count, 1);
        assert_eq!(asset.bands[0].nodata, Some(0.0));
        assert!(asset.bounds.min_x.abs() < 1e-9);
        assert!(asset.bounds.max_x > 0.0 && asset.bounds.max_y > 0.0);
    }

    #[tokio::test]
    async fn test_small_asset_has_single_zoom() {
        let tms = WebMercatorQuad;
        let res = tms.resolution_for_zoom(10);
        let asset = resolver(info(
            Crs::WEB_MERCATOR,
            Bounds::new(0.0, 0.0, 100.0 * res, 100.0 * res),
            100,
            100,
        ))
        .resolve("a.tif")
        .await
        .unwrap();
        assert_eq!(asset.minzoom, asset.maxzoom);
        assert_eq!(asset.maxzoom, 10);
    }

    #[tokio::test]
    async fn test_geographic_asset_bounds_kept() {
        let asset = resolver(info(
            Crs::WGS84,
            Bounds::new(10.0, 40.0, 11.0, 41.0),
            1000,
            1000,
        ))
        .resolve("a.tif")
        .await
        .unwrap();
        assert_eq!(asset.bounds, Bounds::new(10.0, 40.0, 11.0, 41.0));
        assert!(asset.minzoom <= asset.maxzoom);
    }

    #[tokio::test]
    async fn test_unreadable_assets() {
        let r = resolver(info(
            Crs::from_epsg(32633),
            Bounds::new(0.0, 0.0, 1000.0, 1000.0),
            10,
            10,
        ));
        match r.resolve("utm.tif").await {
            Err(AssetError::Unreadable { reason, .. }) => assert!(reason.contains("CRS")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            r.resolve("missing.tif").await,
            Err(AssetError::NotFound { .. })
        ));

        let empty = resolver(info(Crs::WGS84, Bounds::new(0.0, 0.0, 1.0, 1.0), 0, 10));
        assert!(empty.resolve("empty.tif").await.is_err());
    }
}
