use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Bounds;
use crate::error::GeoError;

/// Half the circumference of the Web Mercator sphere in meters.
pub const HALF_EARTH: f64 = 20037508.342789244;

/// Latitude limit of the Web Mercator square.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// A coordinate reference system identified by its EPSG code.
///
/// Only EPSG:4326 and EPSG:3857 can be transformed between; any other pair
/// (other than identity) is reported as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    pub const WGS84: Crs = Crs { epsg: 4326 };
    pub const WEB_MERCATOR: Crs = Crs { epsg: 3857 };

    pub const fn from_epsg(epsg: u32) -> Self {
        // 900913 is the legacy Google code for the same projection
        if epsg == 900913 || epsg == 3785 {
            return Crs::WEB_MERCATOR;
        }
        Crs { epsg }
    }

    #[inline]
    pub const fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Parse `EPSG:xxxx`, a bare code, or the `CRS84`/`OGC:CRS84` alias.
    pub fn parse(value: &str) -> Result<Self, GeoError> {
        let trimmed = value.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "CRS84" || upper == "OGC:CRS84" {
            return Ok(Crs::WGS84);
        }
        let code = upper.strip_prefix("EPSG:").unwrap_or(&upper);
        code.parse::<u32>()
            .map(Crs::from_epsg)
            .map_err(|_| GeoError::UnknownCrs(trimmed.to_string()))
    }

    pub fn is_geographic(&self) -> bool {
        self.epsg == 4326
    }

    /// Transform a single point into `to`.
    pub fn transform_point(&self, to: Crs, x: f64, y: f64) -> Result<(f64, f64), GeoError> {
        match (self.epsg, to.epsg) {
            (a, b) if a == b => Ok((x, y)),
            (4326, 3857) => Ok(lonlat_to_mercator(x, y)),
            (3857, 4326) => Ok(mercator_to_lonlat(x, y)),
            _ => Err(GeoError::UnsupportedTransform { from: *self, to }),
        }
    }

    /// Transform a bounding box. Both supported projections are monotonic
    /// per axis, so transforming the corners is exact.
    pub fn transform_bounds(&self, to: Crs, bounds: &Bounds) -> Result<Bounds, GeoError> {
        let (min_x, min_y) = self.transform_point(to, bounds.min_x, bounds.min_y)?;
        let (max_x, max_y) = self.transform_point(to, bounds.max_x, bounds.max_y)?;
        Ok(Bounds::new(min_x, min_y, max_x, max_y))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl TryFrom<String> for Crs {
    type Error = GeoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Crs::parse(&value)
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

/// Forward spherical Mercator. Latitude is clamped to the Mercator square.
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = lon * HALF_EARTH / 180.0;
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() * HALF_EARTH / PI;
    (x, y)
}

pub fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 180.0 / HALF_EARTH;
    let y_rad = y * PI / HALF_EARTH;
    let lat = (2.0 * y_rad.exp().atan() - PI / 2.0) * 180.0 / PI;
    (lon, lat)
}
