//! Polygon geometries parsed from GeoJSON.

use serde_json::Value;

use super::{Bounds, Crs};
use crate::error::GeoError;

/// A polygon: exterior ring followed by optional holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub rings: Vec<Vec<[f64; 2]>>,
}

impl Polygon {
    pub fn new(rings: Vec<Vec<[f64; 2]>>) -> Result<Self, GeoError> {
        if rings.is_empty() {
            return Err(GeoError::InvalidGeometry("polygon has no rings".to_string()));
        }
        for ring in &rings {
            if ring.len() < 3 {
                return Err(GeoError::InvalidGeometry(format!(
                    "ring has {} positions, need at least 3",
                    ring.len()
                )));
            }
            if ring.iter().flatten().any(|v| !v.is_finite()) {
                return Err(GeoError::InvalidGeometry(
                    "ring has non-finite coordinates".to_string(),
                ));
            }
        }
        Ok(Self { rings })
    }

    /// Even-odd point test over all rings, so holes are excluded.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        for ring in &self.rings {
            let n = ring.len();
            let mut j = n - 1;
            for i in 0..n {
                let [xi, yi] = ring[i];
                let [xj, yj] = ring[j];
                if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                    inside = !inside;
                }
                j = i;
            }
        }
        inside
    }

    fn bounds(&self) -> Bounds {
        let mut b = Bounds::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for [x, y] in self.rings.iter().flatten() {
            b = b.union(&Bounds::new(*x, *y, *x, *y));
        }
        b
    }

    fn transform(&self, from: Crs, to: Crs) -> Result<Polygon, GeoError> {
        let rings = self
            .rings
            .iter()
            .map(|ring| {
                ring.iter()
                    .map(|[x, y]| from.transform_point(to, *x, *y).map(|(x, y)| [x, y]))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Polygon { rings })
    }
}

/// Region geometry: a polygon or a set of polygons.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
}

impl Geometry {
    pub fn from_bounds(b: &Bounds) -> Self {
        Geometry::Polygon(Polygon {
            rings: vec![vec![
                [b.min_x, b.min_y],
                [b.max_x, b.min_y],
                [b.max_x, b.max_y],
                [b.min_x, b.max_y],
                [b.min_x, b.min_y],
            ]],
        })
    }

    /// Parse a GeoJSON geometry, Feature or FeatureCollection.
    ///
    /// Collections are flattened into one MultiPolygon.
    pub fn from_geojson(value: &Value) -> Result<Self, GeoError> {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "Polygon" => Ok(Geometry::Polygon(parse_polygon(coordinates(value)?)?)),
            "MultiPolygon" => {
                let polygons = coordinates(value)?
                    .as_array()
                    .ok_or_else(|| invalid("MultiPolygon coordinates must be an array"))?
                    .iter()
                    .map(parse_polygon)
                    .collect::<Result<Vec<_>, _>>()?;
                if polygons.is_empty() {
                    return Err(invalid("MultiPolygon has no polygons"));
                }
                Ok(Geometry::MultiPolygon(polygons))
            }
            "Feature" => {
                let geometry = value
                    .get("geometry")
                    .ok_or_else(|| invalid("Feature has no geometry"))?;
                Geometry::from_geojson(geometry)
            }
            "FeatureCollection" => {
                let mut polygons = Vec::new();
                for geometry in features(value)?.iter().map(Geometry::from_geojson) {
                    polygons.extend(geometry?.into_polygons());
                }
                if polygons.is_empty() {
                    return Err(invalid("FeatureCollection has no features"));
                }
                Ok(Geometry::MultiPolygon(polygons))
            }
            other => Err(GeoError::InvalidGeometry(format!(
                "unsupported GeoJSON type '{}'",
                other
            ))),
        }
    }

    pub fn polygons(&self) -> &[Polygon] {
        match self {
            Geometry::Polygon(p) => std::slice::from_ref(p),
            Geometry::MultiPolygon(ps) => ps,
        }
    }

    fn into_polygons(self) -> Vec<Polygon> {
        match self {
            Geometry::Polygon(p) => vec![p],
            Geometry::MultiPolygon(ps) => ps,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.polygons().iter().any(|p| p.contains(x, y))
    }

    pub fn bounds(&self) -> Bounds {
        self.polygons()
            .iter()
            .map(Polygon::bounds)
            .reduce(|a, b| a.union(&b))
            .unwrap_or(Bounds::new(0.0, 0.0, 0.0, 0.0))
    }

    /// Reproject every vertex. Straight edges stay straight, which is exact
    /// for the axis-aligned edges bbox regions produce.
    pub fn transform(&self, from: Crs, to: Crs) -> Result<Geometry, GeoError> {
        if from == to {
            return Ok(self.clone());
        }
        Ok(match self {
            Geometry::Polygon(p) => Geometry::Polygon(p.transform(from, to)?),
            Geometry::MultiPolygon(ps) => Geometry::MultiPolygon(
                ps.iter()
                    .map(|p| p.transform(from, to))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// The `features` array of a FeatureCollection.
pub fn features(value: &Value) -> Result<&Vec<Value>, GeoError> {
    value
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("FeatureCollection has no features array"))
}

fn invalid(message: &str) -> GeoError {
    GeoError::InvalidGeometry(message.to_string())
}

fn coordinates(value: &Value) -> Result<&Value, GeoError> {
    value
        .get("coordinates")
        .ok_or_else(|| invalid("geometry has no coordinates"))
}

fn parse_polygon(value: &Value) -> Result<Polygon, GeoError> {
    let rings = value
        .as_array()
        .ok_or_else(|| invalid("polygon coordinates must be an array of rings"))?
        .iter()
        .map(|ring| {
            ring.as_array()
                .ok_or_else(|| invalid("ring must be an array of positions"))?
                .iter()
                .map(parse_position)
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Polygon::new(rings)
}

fn parse_position(value: &Value) -> Result<[f64; 2], GeoError> {
    let pos = value
        .as_array()
        .ok_or_else(|| invalid("position must be an array"))?;
    match (
        pos.first().and_then(Value::as_f64),
        pos.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => Ok([x, y]),
        _ => Err(invalid("position needs two numbers")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square_with_hole() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [
                [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]],
                [[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0], [4.0, 4.0]]
            ]
        })
    }

    #[test]
    fn test_polygon_with_hole() {
        let g = Geometry::from_geojson(&square_with_hole()).unwrap();
        assert!(g.contains(1.0, 1.0));
        assert!(!g.contains(5.0, 5.0));
        assert!(!g.contains(11.0, 5.0));
        assert_eq!(g.bounds(), Bounds::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_feature_collection_flattens() {
        let fc = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {}, "geometry": square_with_hole()},
                {"type": "Feature", "properties": {}, "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [[[[20.0, 20.0], [30.0, 20.0], [30.0, 30.0], [20.0, 20.0]]]]
                }}
            ]
        });
        let g = Geometry::from_geojson(&fc).unwrap();
        assert_eq!(g.polygons().len(), 2);
        assert_eq!(g.bounds(), Bounds::new(0.0, 0.0, 30.0, 30.0));
        assert!(g.contains(28.0, 22.0));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(Geometry::from_geojson(&json!({"type": "Point", "coordinates": [0, 0]})).is_err());
        assert!(Geometry::from_geojson(&json!({"type": "Polygon"})).is_err());
        assert!(Geometry::from_geojson(
            &json!({"type": "Polygon", "coordinates": [[[0, 0], [1, 1]]]})
        )
        .is_err());
        assert!(
            Geometry::from_geojson(&json!({"type": "FeatureCollection", "features": []})).is_err()
        );
    }

    #[test]
    fn test_transform_to_mercator() {
        let g = Geometry::from_bounds(&Bounds::new(-180.0, 0.0, 180.0, 10.0));
        let m = g.transform(Crs::WGS84, Crs::WEB_MERCATOR).unwrap();
        let b = m.bounds();
        assert!((b.max_x - crate::geo::HALF_EARTH).abs() < 1e-6);
        assert!(b.min_y.abs() < 1e-6);
        assert!(m.contains(0.0, 500_000.0));
    }
}
