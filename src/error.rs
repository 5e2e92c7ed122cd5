use thiserror::Error;

use crate::geo::Crs;

/// I/O errors that can occur when reading from local or remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object or file not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Local filesystem error
    #[error("File error: {0}")]
    Local(String),

    /// Location string could not be understood
    #[error("Invalid location: {0}")]
    InvalidLocation(String),
}

/// Errors that can occur when parsing and decoding GeoTIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Unsupported sample layout (bit depth, sample format, planar configuration)
    #[error("Unsupported sample layout: {0}")]
    UnsupportedLayout(String),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// The file carries no usable georeferencing
    #[error("Missing georeference: {0}")]
    MissingGeoreference(String),

    /// A chunk could not be decompressed
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Errors raised while deriving or reading a single raster asset.
///
/// Both variants are "asset unreadable" conditions: they are localized to one
/// asset and never abort a batch on their own.
#[derive(Debug, Clone, Error)]
pub enum AssetError {
    /// The asset does not exist at the given location
    #[error("Asset not found: {path}")]
    NotFound { path: String },

    /// The asset exists but could not be opened or decoded
    #[error("Asset unreadable: {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

impl AssetError {
    /// Build an `Unreadable` error from any displayable cause.
    pub fn unreadable(path: impl Into<String>, reason: impl ToString) -> Self {
        AssetError::Unreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Map a parse/read failure for `path` into an asset error.
    pub fn from_tiff(path: &str, err: TiffError) -> Self {
        match err {
            TiffError::Io(IoError::NotFound(_)) => AssetError::NotFound {
                path: path.to_string(),
            },
            other => AssetError::unreadable(path, other),
        }
    }

    /// Path of the asset this error refers to.
    pub fn path(&self) -> &str {
        match self {
            AssetError::NotFound { path } | AssetError::Unreadable { path, .. } => path,
        }
    }
}

/// Geometry and coordinate reference errors
#[derive(Debug, Clone, Error)]
pub enum GeoError {
    /// Transformation between the two reference systems is not available
    #[error("Unsupported CRS transformation: {from} -> {to}")]
    UnsupportedTransform { from: Crs, to: Crs },

    /// CRS identifier could not be parsed
    #[error("Unknown CRS: {0}")]
    UnknownCrs(String),

    /// Geometry input is malformed or of an unsupported type
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
}

/// Tile coordinate errors
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Quadkey contains characters other than 0-3 or is too long
    #[error("Invalid quadkey: '{0}'")]
    InvalidQuadkey(String),

    /// Zoom level outside the tile matrix set range
    #[error("Invalid zoom level {zoom}: must be between {min} and {max}")]
    InvalidZoom { zoom: u8, min: u8, max: u8 },

    /// Tile column/row outside the matrix at this zoom
    #[error("Tile {x}/{y} is outside the matrix at zoom {z}")]
    OutOfRange { z: u8, x: u32, y: u32 },
}

/// Mosaic catalog errors
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// One or more assets of a batch could not be resolved.
    ///
    /// `resolved` carries the assets that did resolve (in input order) so the
    /// caller can retry with the subset.
    #[error("Failed to resolve {} of {} assets", .failed.len(), .failed.len() + .resolved.len())]
    PartialResolutionFailure {
        failed: Vec<AssetError>,
        resolved: Vec<crate::asset::Asset>,
    },

    /// Destination exists and overwrite was not requested
    #[error("Catalog already exists at {destination}")]
    WriteConflict { destination: String },

    /// No catalog exists at the destination
    #[error("Catalog not found: {0}")]
    NotFound(String),

    /// The catalog document could not be encoded or decoded
    #[error("Invalid catalog document: {0}")]
    Document(String),

    /// Underlying storage failure
    #[error("Catalog storage error: {0}")]
    Store(#[from] IoError),

    /// Zoom parameters are inconsistent
    #[error("Invalid zoom range: {0}")]
    InvalidZoom(String),

    /// Mosaic name cannot be turned into a location
    #[error("Invalid mosaic name: {0}")]
    InvalidName(String),

    /// A catalog needs at least one asset
    #[error("Catalog has no assets")]
    Empty,
}

/// Region resolution errors
#[derive(Debug, Clone, Error)]
pub enum RegionError {
    /// The requested region does not intersect the target extent
    #[error("Region does not intersect the dataset extent")]
    EmptyRegion,

    /// Region geometry is malformed
    #[error(transparent)]
    Geometry(#[from] GeoError),

    /// Requested output size is unusable
    #[error("Invalid output size: {0}")]
    InvalidSize(String),
}

/// Band-math expression errors
#[derive(Debug, Clone, Error)]
pub enum ExpressionError {
    /// Expression text could not be parsed
    #[error("Invalid expression '{expression}' at position {position}: {message}")]
    Parse {
        expression: String,
        position: usize,
        message: String,
    },

    /// Expression references a band the dataset does not have
    #[error("Expression references band b{band} but only {available} band(s) are available")]
    UnknownBand { band: usize, available: usize },

    /// Function name is not recognized or has the wrong number of arguments
    #[error("Invalid function call: {0}")]
    Function(String),
}

/// Errors returned by the statistics orchestrator
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// Request parameters are invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No asset finished before the request deadline
    #[error("Request timed out before any of {pending} asset(s) completed")]
    Timeout { pending: usize },

    /// The caller aborted the request
    #[error("Request cancelled")]
    Cancelled,
}

impl From<GeoError> for ServiceError {
    fn from(err: GeoError) -> Self {
        ServiceError::Region(RegionError::Geometry(err))
    }
}
