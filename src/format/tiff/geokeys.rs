//! GeoKeyDirectory decoding.
//!
//! The directory is a SHORT array: a 4-value header
//! `(version, revision, minor, key_count)` followed by `key_count` entries of
//! `(key_id, tag_location, count, value)`. Only keys stored inline
//! (`tag_location == 0`) are needed to identify the CRS.

use crate::error::TiffError;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

/// Georeferencing keys relevant to locating pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GeoKeys {
    pub model_type: Option<u16>,
    pub raster_type: Option<u16>,
    pub geographic_type: Option<u16>,
    pub projected_type: Option<u16>,
}

impl GeoKeys {
    pub fn parse(directory: &[u64]) -> Result<Self, TiffError> {
        if directory.len() < 4 {
            return Err(TiffError::InvalidTagValue {
                tag: "GeoKeyDirectory",
                message: format!("{} values, header needs 4", directory.len()),
            });
        }

        let key_count = directory[3] as usize;
        let mut keys = GeoKeys::default();
        for entry in directory[4..].chunks_exact(4).take(key_count) {
            let (id, location, value) = (entry[0] as u16, entry[1], entry[3] as u16);
            if location != 0 {
                continue;
            }
            match id {
                GT_MODEL_TYPE => keys.model_type = Some(value),
                GT_RASTER_TYPE => keys.raster_type = Some(value),
                GEOGRAPHIC_TYPE => keys.geographic_type = Some(value),
                PROJECTED_CS_TYPE => keys.projected_type = Some(value),
                _ => {}
            }
        }
        Ok(keys)
    }

    /// Whether tie points refer to pixel centers instead of corners.
    pub fn is_pixel_is_point(&self) -> bool {
        self.raster_type == Some(RASTER_PIXEL_IS_POINT)
    }

    /// EPSG code of the model CRS.
    pub fn epsg(&self) -> Result<u32, TiffError> {
        let code = match self.model_type {
            Some(MODEL_TYPE_PROJECTED) => self.projected_type,
            Some(MODEL_TYPE_GEOGRAPHIC) => self.geographic_type,
            _ => self.projected_type.or(self.geographic_type),
        };

        match code {
            Some(USER_DEFINED) => Err(TiffError::MissingGeoreference(
                "user-defined CRS is not supported".to_string(),
            )),
            Some(code) if code > 0 => Ok(code as u32),
            _ => Err(TiffError::MissingGeoreference(
                "no EPSG code in GeoKeyDirectory".to_string(),
            )),
        }
    }
}
