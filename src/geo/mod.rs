//! Bounding boxes, coordinate reference systems and region geometries.

mod bounds;
mod crs;
mod geometry;

pub use bounds::Bounds;
pub use crs::{lonlat_to_mercator, mercator_to_lonlat, Crs, HALF_EARTH, MAX_MERCATOR_LAT};
pub use geometry::{features, Geometry, Polygon};
