//! Mosaic name → catalog location.

use crate::error::CatalogError;

/// Turns a mosaic identifier from a request into a catalog location.
pub trait PathResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<String, CatalogError>;
}

/// Resolves short names against a configured backend prefix.
///
/// ```text
///   prefix = "s3://bucket/mosaics"
///   "landsat"            -> "s3://bucket/mosaics/landsat.json"
///   "2024/landsat.json.gz" -> "s3://bucket/mosaics/2024/landsat.json.gz"
///   "s3://other/m.json"  -> unchanged
/// ```
///
/// Without a prefix, short names resolve relative to the working directory.
#[derive(Debug, Clone, Default)]
pub struct PrefixPathResolver {
    prefix: Option<String>,
}

impl PrefixPathResolver {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        }
    }
}

impl PathResolver for PrefixPathResolver {
    fn resolve(&self, name: &str) -> Result<String, CatalogError> {
        let name = name.trim();
        if name.contains("://") || name.starts_with('/') {
            return Ok(name.to_string());
        }

        let valid = !name.is_empty()
            && name.split('/').all(|s| !s.is_empty() && s != "." && s != "..")
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
        if !valid {
            return Err(CatalogError::InvalidName(name.to_string()));
        }

        let last = name.rsplit('/').next().unwrap_or(name);
        let file = if last.contains('.') {
            name.to_string()
        } else {
            format!("{}.json", name)
        };

        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, file),
            None => file,
        })
    }
}
