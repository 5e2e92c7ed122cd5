//! MosaicJSON 0.0.3 documents.
//!
//! The persisted form of a catalog is a regular MosaicJSON document. Two
//! optional extension members carry what plain MosaicJSON cannot express:
//!
//! - `assets`: the full asset sequence with footprints, in precedence order
//! - `zoom_override`: zoom limits fixed at creation time
//!
//! Documents without the extensions (as written by other MosaicJSON tools)
//! still load; see [`MosaicCatalog::from_document`](super::MosaicCatalog::from_document).

use std::collections::BTreeMap;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::error::CatalogError;
use crate::geo::Bounds;

/// MosaicJSON specification version written by this crate.
pub const MOSAICJSON_VERSION: &str = "0.0.3";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Zoom limits set explicitly when a catalog was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,
}

impl ZoomOverride {
    pub fn is_empty(&self) -> bool {
        self.minzoom.is_none() && self.maxzoom.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicDocument {
    pub mosaicjson: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,

    pub minzoom: u8,
    pub maxzoom: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quadkey_zoom: Option<u8>,

    pub bounds: Bounds,

    /// `[lon, lat, zoom]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<[f64; 3]>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilematrixset: Option<String>,

    pub tiles: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<Asset>,

    #[serde(default, skip_serializing_if = "ZoomOverride::is_empty")]
    pub zoom_override: ZoomOverride,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Serialize a document, gzip-compressing it when `gzip` is set.
pub fn encode(document: &MosaicDocument, gzip: bool) -> Result<Bytes, CatalogError> {
    let json = serde_json::to_vec(document).map_err(|e| CatalogError::Document(e.to_string()))?;
    if !gzip {
        return Ok(Bytes::from(json));
    }

    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map(Bytes::from)
        .map_err(|e| CatalogError::Document(format!("gzip: {}", e)))
}

/// Parse a document. Gzip input is detected by its magic bytes.
pub fn decode(data: &[u8]) -> Result<MosaicDocument, CatalogError> {
    let document: MosaicDocument = if data.starts_with(&GZIP_MAGIC) {
        let mut json = Vec::new();
        GzDecoder::new(data)
            .read_to_end(&mut json)
            .map_err(|e| CatalogError::Document(format!("gzip: {}", e)))?;
        serde_json::from_slice(&json)
    } else {
        serde_json::from_slice(data)
    }
    .map_err(|e| CatalogError::Document(e.to_string()))?;

    if document.minzoom > document.maxzoom {
        return Err(CatalogError::InvalidZoom(format!(
            "minzoom {} is greater than maxzoom {}",
            document.minzoom, document.maxzoom
        )));
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> MosaicDocument {
        let mut tiles = BTreeMap::new();
        tiles.insert("0313".to_string(), vec!["a.tif".to_string()]);
        MosaicDocument {
            mosaicjson: MOSAICJSON_VERSION.to_string(),
            name: Some("test".to_string()),
            description: None,
            version: default_version(),
            minzoom: 4,
            maxzoom: 9,
            quadkey_zoom: Some(4),
            bounds: Bounds::new(-10.0, -5.0, 10.0, 5.0),
            center: Some([0.0, 0.0, 4.0]),
            tilematrixset: None,
            tiles,
            assets: vec![],
            zoom_override: ZoomOverride::default(),
        }
    }

    #[test]
    fn test_plain_and_gzip_decode() {
        let doc = document();
        let plain = encode(&doc, false).unwrap();
        assert_eq!(plain[0], b'{');
        let gz = encode(&doc, true).unwrap();
        assert_eq!(&gz[..2], &GZIP_MAGIC);

        assert_eq!(decode(&plain).unwrap(), doc);
        assert_eq!(decode(&gz).unwrap(), doc);
    }

    #[test]
    fn test_extensions_omitted_when_empty() {
        let json: serde_json::Value =
            serde_json::from_slice(&encode(&document(), false).unwrap()).unwrap();
        assert_eq!(json["mosaicjson"], "0.0.3");
        assert_eq!(json["bounds"], serde_json::json!([-10.0, -5.0, 10.0, 5.0]));
        assert!(json.get("assets").is_none());
        assert!(json.get("zoom_override").is_none());
    }

    #[test]
    fn test_external_document_without_version() {
        let doc = decode(
            br#"{"mosaicjson":"0.0.2","minzoom":1,"maxzoom":2,
                 "bounds":[0,0,1,1],"tiles":{"0":["x.tif"]}}"#,
        )
        .unwrap();
        assert_eq!(doc.version, "1.0.0");
        assert!(doc.quadkey_zoom.is_none());
        assert!(doc.assets.is_empty());
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(decode(b"not json"), Err(CatalogError::Document(_))));
        assert!(matches!(
            decode(br#"{"mosaicjson":"0.0.3","minzoom":5,"maxzoom":2,"bounds":[0,0,1,1],"tiles":{}}"#),
            Err(CatalogError::InvalidZoom(_))
        ));
    }
}
