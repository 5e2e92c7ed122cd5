use serde::{Deserialize, Serialize};

use crate::error::GeoError;

/// Axis-aligned bounding box `[min_x, min_y, max_x, max_y]`.
///
/// Serialized as a 4-element array, the MosaicJSON/STAC convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse `"minx,miny,maxx,maxy"`.
    pub fn parse(value: &str) -> Result<Self, GeoError> {
        let parts: Vec<f64> = value
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| GeoError::InvalidGeometry(format!("invalid bbox '{}'", value)))?;

        match parts.as_slice() {
            [min_x, min_y, max_x, max_y] => {
                let bounds = Bounds::new(*min_x, *min_y, *max_x, *max_y);
                if bounds.is_valid() {
                    Ok(bounds)
                } else {
                    Err(GeoError::InvalidGeometry(format!(
                        "bbox '{}' has min greater than max",
                        value
                    )))
                }
            }
            _ => Err(GeoError::InvalidGeometry(format!(
                "bbox '{}' must have 4 values",
                value
            ))),
        }
    }

    /// Finite coordinates with `min <= max` on both axes.
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Overlap with positive area. Boxes that only share an edge do not
    /// intersect.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        if !self.intersects(other) {
            return None;
        }
        Some(Bounds::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Inclusive on all edges.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

impl From<[f64; 4]> for Bounds {
    fn from(v: [f64; 4]) -> Self {
        Bounds::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Bounds> for [f64; 4] {
    fn from(b: Bounds) -> Self {
        [b.min_x, b.min_y, b.max_x, b.max_y]
    }
}
