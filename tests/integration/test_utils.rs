//! Test utilities for integration tests.
//!
//! Provides a GeoTIFF byte builder and helpers wiring a statistics service
//! over in-memory assets and catalogs.

use std::io::Write;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use cog_mosaic::mosaic::{CreateOptions, MemoryStore, MosaicRegistry, PrefixPathResolver};
use cog_mosaic::raster::{CogRasterReader, UrlAssetSource};
use cog_mosaic::service::{ServiceConfig, StatisticsService};
use cog_mosaic::tile::WebMercatorQuad;

/// Pixel size of the test assets in degrees (exact in binary).
pub const PIXEL: f64 = 1.0 / 64.0;

// =============================================================================
// GeoTIFF Builder
// =============================================================================

/// Builds little-endian tiled GeoTIFFs with 8-bit samples.
pub struct GeoTiffBuilder {
    width: u32,
    height: u32,
    tile: u32,
    bands: u16,
    deflate: bool,
    nodata: Option<String>,
    origin: (f64, f64),
    pixel_size: f64,
    epsg: u16,
}

impl GeoTiffBuilder {
    /// A lon/lat raster with [`PIXEL`] sized pixels and its top-left corner
    /// at `(west, north)`.
    pub fn lonlat(width: u32, height: u32, west: f64, north: f64) -> Self {
        Self {
            width,
            height,
            tile: 16,
            bands: 1,
            deflate: false,
            nodata: None,
            origin: (west, north),
            pixel_size: PIXEL,
            epsg: 4326,
        }
    }

    pub fn bands(mut self, bands: u16) -> Self {
        self.bands = bands;
        self
    }

    pub fn deflate(mut self) -> Self {
        self.deflate = true;
        self
    }

    pub fn nodata(mut self, nodata: &str) -> Self {
        self.nodata = Some(nodata.to_string());
        self
    }

    pub fn epsg(mut self, epsg: u16) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn pixel_size(mut self, pixel_size: f64) -> Self {
        self.pixel_size = pixel_size;
        self
    }

    /// Encode the raster; `value(band, col, row)` gives each sample.
    pub fn build(&self, value: impl Fn(usize, u32, u32) -> u8) -> Vec<u8> {
        let mut data = vec![0x49, 0x49, 0x2A, 0x00, 0, 0, 0, 0];

        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for ty in 0..self.height.div_ceil(self.tile) {
            for tx in 0..self.width.div_ceil(self.tile) {
                let chunk = self.encode_tile(tx, ty, &value);
                offsets.push(data.len() as u32);
                counts.push(chunk.len() as u32);
                data.extend_from_slice(&chunk);
            }
        }
        if data.len() % 2 == 1 {
            data.push(0);
        }

        let ifd_offset = data.len() as u32;
        data[4..8].copy_from_slice(&ifd_offset.to_le_bytes());

        let entries = self.entries(&offsets, &counts);
        let mut overflow_at = ifd_offset as usize + 2 + entries.len() * 12 + 4;
        let mut overflow = Vec::new();

        data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, field_type, count, bytes) in &entries {
            data.extend_from_slice(&tag.to_le_bytes());
            data.extend_from_slice(&field_type.to_le_bytes());
            data.extend_from_slice(&count.to_le_bytes());
            if bytes.len() <= 4 {
                let mut inline = bytes.clone();
                inline.resize(4, 0);
                data.extend_from_slice(&inline);
            } else {
                data.extend_from_slice(&(overflow_at as u32).to_le_bytes());
                overflow.extend_from_slice(bytes);
                overflow_at += bytes.len();
            }
        }
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&overflow);
        data
    }

    fn encode_tile(&self, tx: u32, ty: u32, value: &impl Fn(usize, u32, u32) -> u8) -> Vec<u8> {
        let mut raw = Vec::with_capacity((self.tile * self.tile) as usize * self.bands as usize);
        for y in 0..self.tile {
            for x in 0..self.tile {
                for band in 0..self.bands as usize {
                    raw.push(value(band, tx * self.tile + x, ty * self.tile + y));
                }
            }
        }
        if !self.deflate {
            return raw;
        }
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&raw).unwrap();
        encoder.finish().unwrap()
    }

    fn entries(&self, offsets: &[u32], counts: &[u32]) -> Vec<(u16, u16, u32, Vec<u8>)> {
        let u16s = |v: u16| v.to_le_bytes().to_vec();
        let u32s = |v: &[u32]| v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>();
        let f64s = |v: &[f64]| v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>();

        let geographic = self.epsg == 4326;
        let geokeys: [u16; 12] = [
            1,
            1,
            0,
            2,
            1024,
            0,
            1,
            if geographic { 2 } else { 1 },
            if geographic { 2048 } else { 3072 },
            0,
            1,
            self.epsg,
        ];

        let mut entries = vec![
            (256, 4, 1, self.width.to_le_bytes().to_vec()),
            (257, 4, 1, self.height.to_le_bytes().to_vec()),
            (258, 3, 1, u16s(8)),
            (259, 3, 1, u16s(if self.deflate { 8 } else { 1 })),
            (277, 3, 1, u16s(self.bands)),
            (322, 3, 1, u16s(self.tile as u16)),
            (323, 3, 1, u16s(self.tile as u16)),
            (324, 4, offsets.len() as u32, u32s(offsets)),
            (325, 4, counts.len() as u32, u32s(counts)),
            (
                33550,
                12,
                3,
                f64s(&[self.pixel_size, self.pixel_size, 0.0]),
            ),
            (
                33922,
                12,
                6,
                f64s(&[0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0]),
            ),
            (
                34735,
                3,
                geokeys.len() as u32,
                geokeys.iter().flat_map(|k| k.to_le_bytes()).collect(),
            ),
        ];
        if let Some(nodata) = &self.nodata {
            let mut text = nodata.as_bytes().to_vec();
            text.push(0);
            entries.push((42113, 2, text.len() as u32, text));
        }
        entries
    }
}

// =============================================================================
// Test Fixtures
// =============================================================================

/// `memory://a.tif`: 20x20 px over `[0, 0, 0.3125, 0.3125]`, value `col + 1`.
pub fn asset_a() -> Vec<u8> {
    GeoTiffBuilder::lonlat(20, 20, 0.0, 20.0 * PIXEL).build(|_, col, _| col as u8 + 1)
}

/// `memory://b.tif`: 20x20 px over `[0.15625, 0, 0.46875, 0.3125]`, value 50.
///
/// Its left half overlaps the right half of [`asset_a`].
pub fn asset_b() -> Vec<u8> {
    GeoTiffBuilder::lonlat(20, 20, 10.0 * PIXEL, 20.0 * PIXEL)
        .deflate()
        .build(|_, _, _| 50)
}

/// An in-memory service plus the reader its assets are served by.
pub struct TestService {
    pub service: StatisticsService,
    pub reader: Arc<CogRasterReader<UrlAssetSource>>,
}

/// Build a service whose assets live under `memory://{name}` and whose
/// catalogs are kept in memory.
pub fn memory_service(assets: Vec<(&str, Vec<u8>)>, config: ServiceConfig) -> TestService {
    let source = UrlAssetSource::new(None);
    for (name, bytes) in assets {
        source.insert_memory(name, bytes);
    }
    let reader = Arc::new(CogRasterReader::new(source));
    let mosaics = MosaicRegistry::new(
        Arc::new(MemoryStore::new()),
        Arc::new(PrefixPathResolver::new(Some("memory://mosaics".to_string()))),
        Arc::new(WebMercatorQuad),
    );
    let service = StatisticsService::new(reader.clone(), Arc::new(mosaics), config);
    TestService { service, reader }
}

/// Service with `a.tif` and `b.tif` and a catalog `demo` listing them in
/// that order.
pub async fn demo_service() -> StatisticsService {
    let test = memory_service(
        vec![("a.tif", asset_a()), ("b.tif", asset_b())],
        ServiceConfig::default(),
    );
    test.service
        .create_mosaic(
            "demo",
            &["memory://a.tif".to_string(), "memory://b.tif".to_string()],
            &CreateOptions::default(),
            false,
        )
        .await
        .unwrap();
    test.service
}

// =============================================================================
// HTTP Helpers
// =============================================================================

pub async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}

pub async fn post_json(router: Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

/// Assert two floats agree to within `1e-9`.
pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {}, got {}",
        expected,
        actual
    );
}
