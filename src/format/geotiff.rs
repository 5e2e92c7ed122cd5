//! GeoTIFF / COG dataset reader.
//!
//! Opening a dataset walks the IFD chain once and keeps everything needed to
//! locate pixels: per-level chunk tables, sample layout, the geotransform and
//! the nodata value. Window reads then fetch only the chunks that the output
//! grid samples.
//!
//! ```text
//!  IFD 0 (full resolution) ──▶ IFD 1 (overview /2) ──▶ IFD 2 (/4) ──▶ ...
//!        │                            │
//!        ▼                            ▼
//!  ImageLevel {chunks...}       ImageLevel {chunks...}
//! ```
//!
//! Window reads use nearest-neighbour sampling at output pixel centers, from
//! the coarsest level whose resolution is still at least as fine as the
//! requested one.

use std::collections::{BTreeSet, HashMap, HashSet};

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::geo::{Bounds, Crs};
use crate::io::RangeReader;
use crate::raster::{BandInfo, DataType, DatasetInfo, RasterWindow, WindowRequest};

use super::tiff::{
    apply_predictor, data_type_for, decompress, sample_at, ByteOrder, Compression, GeoKeys, Ifd,
    SampleFormat, TiffHeader, TiffTag, ValueReader, BIGTIFF_HEADER_SIZE, SUBFILE_MASK,
    SUBFILE_REDUCED_IMAGE,
};

/// Upper bound on IFDs followed in one file.
const MAX_IFDS: usize = 64;

/// PlanarConfiguration value for interleaved samples.
const PLANAR_CHUNKY: u64 = 1;

/// ExtraSamples values marking an alpha channel.
const EXTRA_SAMPLE_ASSOCIATED_ALPHA: u64 = 1;
const EXTRA_SAMPLE_UNASSOCIATED_ALPHA: u64 = 2;

// =============================================================================
// ImageLevel
// =============================================================================

/// One resolution level: the full image or an overview.
#[derive(Debug, Clone)]
struct ImageLevel {
    width: u32,
    height: u32,
    chunk_width: u32,
    chunk_height: u32,
    chunks_across: u32,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    compression: Compression,
    predictor: u16,
    samples_per_pixel: usize,
    dtype: DataType,
    jpeg_tables: Option<Bytes>,
}

impl ImageLevel {
    async fn parse<R: RangeReader>(
        values: &ValueReader<'_, R>,
        ifd: &Ifd,
    ) -> Result<Self, TiffError> {
        let width = required_u64(values, ifd, TiffTag::ImageWidth).await? as u32;
        let height = required_u64(values, ifd, TiffTag::ImageLength).await? as u32;
        if width == 0 || height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::ImageWidth.name(),
                message: format!("empty image {}x{}", width, height),
            });
        }

        let compression = Compression::from_u16(
            optional_u64(values, ifd, TiffTag::Compression).await?.unwrap_or(1) as u16,
        );
        if !compression.is_supported() {
            return Err(TiffError::UnsupportedCompression(compression.name()));
        }

        let planar = optional_u64(values, ifd, TiffTag::PlanarConfiguration)
            .await?
            .unwrap_or(PLANAR_CHUNKY);
        let samples_per_pixel = optional_u64(values, ifd, TiffTag::SamplesPerPixel)
            .await?
            .unwrap_or(1) as usize;
        if planar != PLANAR_CHUNKY && samples_per_pixel > 1 {
            return Err(TiffError::UnsupportedLayout(
                "separate planes (PlanarConfiguration=2)".to_string(),
            ));
        }

        let bits = first_u64(values, ifd, TiffTag::BitsPerSample).await?.unwrap_or(1) as u16;
        let format = first_u64(values, ifd, TiffTag::SampleFormat)
            .await?
            .map(|v| v as u16)
            .unwrap_or(1);
        let format = SampleFormat::from_u16(format).ok_or_else(|| {
            TiffError::UnsupportedLayout(format!("sample format {}", format))
        })?;
        let dtype = data_type_for(format, bits)?;
        if compression == Compression::Jpeg && dtype != DataType::UInt8 {
            return Err(TiffError::UnsupportedLayout(
                "JPEG compression requires 8-bit samples".to_string(),
            ));
        }

        let (chunk_width, chunk_height, offsets_tag, counts_tag) =
            match optional_u64(values, ifd, TiffTag::TileWidth).await? {
                Some(tile_width) => (
                    tile_width as u32,
                    required_u64(values, ifd, TiffTag::TileLength).await? as u32,
                    TiffTag::TileOffsets,
                    TiffTag::TileByteCounts,
                ),
                None => {
                    let rows = optional_u64(values, ifd, TiffTag::RowsPerStrip)
                        .await?
                        .unwrap_or(height as u64)
                        .min(height as u64);
                    (
                        width,
                        rows as u32,
                        TiffTag::StripOffsets,
                        TiffTag::StripByteCounts,
                    )
                }
            };
        if chunk_width == 0 || chunk_height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: offsets_tag.name(),
                message: "zero chunk size".to_string(),
            });
        }

        let chunks_across = width.div_ceil(chunk_width);
        let chunks_down = height.div_ceil(chunk_height);
        let expected = chunks_across as usize * chunks_down as usize;

        let offsets = required_array(values, ifd, offsets_tag).await?;
        let byte_counts = required_array(values, ifd, counts_tag).await?;
        if offsets.len() < expected || byte_counts.len() < expected {
            return Err(TiffError::InvalidTagValue {
                tag: offsets_tag.name(),
                message: format!(
                    "expected {} chunks, found {} offsets and {} byte counts",
                    expected,
                    offsets.len(),
                    byte_counts.len()
                ),
            });
        }

        let jpeg_tables = match ifd.entry(TiffTag::JpegTables) {
            Some(entry) if compression == Compression::Jpeg => {
                Some(values.read_bytes(entry).await?)
            }
            _ => None,
        };

        let predictor = optional_u64(values, ifd, TiffTag::Predictor)
            .await?
            .unwrap_or(1) as u16;

        Ok(Self {
            width,
            height,
            chunk_width,
            chunk_height,
            chunks_across,
            offsets,
            byte_counts,
            compression,
            predictor,
            samples_per_pixel,
            dtype,
            jpeg_tables,
        })
    }

    /// Decoded byte length of one chunk.
    fn chunk_len(&self) -> usize {
        self.chunk_width as usize
            * self.chunk_height as usize
            * self.samples_per_pixel
            * self.dtype.size_in_bytes()
    }

    fn chunk_index(&self, col: u32, row: u32) -> usize {
        (row / self.chunk_height) as usize * self.chunks_across as usize
            + (col / self.chunk_width) as usize
    }

    async fn read_chunk<R: RangeReader>(
        &self,
        reader: &R,
        order: ByteOrder,
        index: usize,
    ) -> Result<Option<Vec<u8>>, TiffError> {
        let (offset, count) = (self.offsets[index], self.byte_counts[index]);
        // Sparse COGs leave unwritten chunks with a zero offset/size
        if offset == 0 || count == 0 {
            return Ok(None);
        }

        let compressed = reader.read_exact_at(offset, count as usize).await?;
        let mut raw = decompress(
            &compressed,
            self.compression,
            self.chunk_len(),
            self.jpeg_tables.as_deref(),
        )?;
        apply_predictor(
            &mut raw,
            self.predictor,
            self.chunk_width as usize,
            self.samples_per_pixel,
            self.dtype.size_in_bytes(),
            order,
        )?;
        Ok(Some(raw))
    }
}

async fn optional_u64<R: RangeReader>(
    values: &ValueReader<'_, R>,
    ifd: &Ifd,
    tag: TiffTag,
) -> Result<Option<u64>, TiffError> {
    match ifd.entry(tag) {
        Some(entry) => Ok(Some(values.read_u64(entry, tag).await?)),
        None => Ok(None),
    }
}

async fn required_u64<R: RangeReader>(
    values: &ValueReader<'_, R>,
    ifd: &Ifd,
    tag: TiffTag,
) -> Result<u64, TiffError> {
    optional_u64(values, ifd, tag)
        .await?
        .ok_or(TiffError::MissingTag(tag.name()))
}

/// First element of a possibly multi-valued tag (BitsPerSample, SampleFormat).
async fn first_u64<R: RangeReader>(
    values: &ValueReader<'_, R>,
    ifd: &Ifd,
    tag: TiffTag,
) -> Result<Option<u64>, TiffError> {
    match ifd.entry(tag) {
        Some(entry) => Ok(values.read_u64_array(entry, tag).await?.first().copied()),
        None => Ok(None),
    }
}

async fn required_array<R: RangeReader>(
    values: &ValueReader<'_, R>,
    ifd: &Ifd,
    tag: TiffTag,
) -> Result<Vec<u64>, TiffError> {
    let entry = ifd.entry(tag).ok_or(TiffError::MissingTag(tag.name()))?;
    values.read_u64_array(entry, tag).await
}

// =============================================================================
// GeoTransform
// =============================================================================

/// North-up affine transform: pixel (col, row) → (x, y) of its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GeoTransform {
    origin_x: f64,
    origin_y: f64,
    pixel_width: f64,
    pixel_height: f64,
}

impl GeoTransform {
    async fn parse<R: RangeReader>(
        values: &ValueReader<'_, R>,
        ifd: &Ifd,
        keys: &GeoKeys,
    ) -> Result<Self, TiffError> {
        let mut transform = if let Some(entry) = ifd.entry(TiffTag::ModelTransformation) {
            let m = values
                .read_f64_array(entry, TiffTag::ModelTransformation)
                .await?;
            if m.len() < 16 {
                return Err(TiffError::InvalidTagValue {
                    tag: TiffTag::ModelTransformation.name(),
                    message: format!("{} values, expected 16", m.len()),
                });
            }
            if m[1] != 0.0 || m[4] != 0.0 {
                return Err(TiffError::UnsupportedLayout(
                    "rotated or sheared geotransform".to_string(),
                ));
            }
            GeoTransform {
                origin_x: m[3],
                origin_y: m[7],
                pixel_width: m[0],
                pixel_height: -m[5],
            }
        } else {
            let scale_entry = ifd.entry(TiffTag::ModelPixelScale).ok_or_else(|| {
                TiffError::MissingGeoreference("no ModelPixelScale or ModelTransformation".into())
            })?;
            let tie_entry = ifd.entry(TiffTag::ModelTiepoint).ok_or_else(|| {
                TiffError::MissingGeoreference("no ModelTiepoint".to_string())
            })?;
            let scale = values
                .read_f64_array(scale_entry, TiffTag::ModelPixelScale)
                .await?;
            let tie = values
                .read_f64_array(tie_entry, TiffTag::ModelTiepoint)
                .await?;
            if scale.len() < 2 || tie.len() < 6 {
                return Err(TiffError::InvalidTagValue {
                    tag: TiffTag::ModelTiepoint.name(),
                    message: "too few values".to_string(),
                });
            }
            GeoTransform {
                origin_x: tie[3] - tie[0] * scale[0],
                origin_y: tie[4] + tie[1] * scale[1],
                pixel_width: scale[0],
                pixel_height: scale[1],
            }
        };

        if !(transform.pixel_width > 0.0 && transform.pixel_height > 0.0) {
            return Err(TiffError::UnsupportedLayout(format!(
                "pixel size {} x {} is not north-up",
                transform.pixel_width, transform.pixel_height
            )));
        }

        if keys.is_pixel_is_point() {
            transform.origin_x -= transform.pixel_width / 2.0;
            transform.origin_y += transform.pixel_height / 2.0;
        }
        Ok(transform)
    }

    fn bounds(&self, width: u32, height: u32) -> Bounds {
        Bounds::new(
            self.origin_x,
            self.origin_y - height as f64 * self.pixel_height,
            self.origin_x + width as f64 * self.pixel_width,
            self.origin_y,
        )
    }
}

// =============================================================================
// GeoTiffDataset
// =============================================================================

/// A parsed GeoTIFF, ready for window reads through the same reader.
#[derive(Debug, Clone)]
pub struct GeoTiffDataset {
    byte_order: ByteOrder,
    /// Full resolution first, then overviews from finest to coarsest
    levels: Vec<ImageLevel>,
    transform: GeoTransform,
    nodata: Option<f64>,
    /// Zero-based sample index of an alpha channel
    alpha: Option<usize>,
    info: DatasetInfo,
}

impl GeoTiffDataset {
    /// Parse header, IFD chain and georeferencing.
    pub async fn open<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let size = reader.size();
        let head_len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
        let head = reader.read_exact_at(0, head_len).await?;
        let header = TiffHeader::parse(&head, size)?;
        let values = ValueReader::new(reader, &header);

        let ifds = read_ifd_chain(reader, &header).await?;
        let (first, rest) = ifds
            .split_first()
            .ok_or(TiffError::InvalidIfdOffset(header.first_ifd_offset))?;

        let full = ImageLevel::parse(&values, first).await?;

        let mut overviews = Vec::new();
        for ifd in rest {
            let subfile = ifd
                .inline_u64(TiffTag::NewSubfileType, header.byte_order)
                .unwrap_or(0);
            if subfile & SUBFILE_REDUCED_IMAGE == 0 || subfile & SUBFILE_MASK != 0 {
                continue;
            }
            match ImageLevel::parse(&values, ifd).await {
                Ok(level) if level.samples_per_pixel == full.samples_per_pixel => {
                    overviews.push(level)
                }
                Ok(_) => debug!(
                    identifier = reader.identifier(),
                    "Skipping overview with a different band count"
                ),
                Err(e) => debug!(
                    identifier = reader.identifier(),
                    error = %e,
                    "Skipping unreadable overview"
                ),
            }
        }
        overviews.sort_by(|a, b| b.width.cmp(&a.width));

        let keys = match first.entry(TiffTag::GeoKeyDirectory) {
            Some(entry) => {
                GeoKeys::parse(&values.read_u64_array(entry, TiffTag::GeoKeyDirectory).await?)?
            }
            None => {
                return Err(TiffError::MissingGeoreference(
                    "no GeoKeyDirectory".to_string(),
                ))
            }
        };
        let crs = Crs::from_epsg(keys.epsg()?);
        let transform = GeoTransform::parse(&values, first, &keys).await?;

        let nodata = match first.entry(TiffTag::GdalNodata) {
            Some(entry) => parse_nodata(&values.read_string(entry, TiffTag::GdalNodata).await?),
            None => None,
        };

        let alpha = match first.entry(TiffTag::ExtraSamples) {
            Some(entry) => {
                let extra = values.read_u64_array(entry, TiffTag::ExtraSamples).await?;
                let first_extra = full.samples_per_pixel.saturating_sub(extra.len());
                extra
                    .iter()
                    .position(|&v| {
                        v == EXTRA_SAMPLE_ASSOCIATED_ALPHA || v == EXTRA_SAMPLE_UNASSOCIATED_ALPHA
                    })
                    .map(|i| first_extra + i)
            }
            None => None,
        };

        let bands = (0..full.samples_per_pixel)
            .filter(|&i| Some(i) != alpha)
            .enumerate()
            .map(|(n, _)| BandInfo {
                index: n + 1,
                dtype: full.dtype,
                nodata,
                description: None,
            })
            .collect();

        let info = DatasetInfo {
            crs,
            bounds: transform.bounds(full.width, full.height),
            width: full.width,
            height: full.height,
            bands,
            overviews: overviews
                .iter()
                .map(|o| (full.width as f64 / o.width as f64).round() as u32)
                .collect(),
        };

        debug!(
            identifier = reader.identifier(),
            width = info.width,
            height = info.height,
            bands = info.bands.len(),
            overviews = overviews.len(),
            crs = %crs,
            "Opened GeoTIFF"
        );

        let mut levels = Vec::with_capacity(overviews.len() + 1);
        levels.push(full);
        levels.extend(overviews);

        Ok(Self {
            byte_order: header.byte_order,
            levels,
            transform,
            nodata,
            alpha,
            info,
        })
    }

    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    /// Sample position of a 1-based band index.
    fn sample_index(&self, band: usize) -> Option<usize> {
        (0..self.levels[0].samples_per_pixel)
            .filter(|&i| Some(i) != self.alpha)
            .nth(band.checked_sub(1)?)
    }

    /// Coarsest level whose pixels are no larger than `target_res`.
    fn level_for(&self, target_res: f64) -> usize {
        let full_width = self.levels[0].width as f64;
        let mut best = 0;
        for (i, level) in self.levels.iter().enumerate().skip(1) {
            let res = self.transform.pixel_width * full_width / level.width as f64;
            if res <= target_res * (1.0 + 1e-6) {
                best = i;
            }
        }
        best
    }

    /// Resample `request.bounds` onto the requested grid.
    pub async fn read_window<R: RangeReader>(
        &self,
        reader: &R,
        request: &WindowRequest,
    ) -> Result<RasterWindow, TiffError> {
        let band_indexes = match &request.bands {
            Some(bands) => bands.clone(),
            None => (1..=self.info.bands.len()).collect(),
        };
        let samples = band_indexes
            .iter()
            .map(|&b| {
                self.sample_index(b).ok_or_else(|| {
                    TiffError::UnsupportedLayout(format!(
                        "band {} out of range 1..={}",
                        b,
                        self.info.bands.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (width, height) = (request.width, request.height);
        let mut window = RasterWindow::empty(width, height, band_indexes);
        if width == 0 || height == 0 {
            return Ok(window);
        }

        let res_x = request.bounds.width() / width as f64;
        let res_y = request.bounds.height() / height as f64;
        let level = &self.levels[self.level_for(res_x.min(res_y))];
        let scale_x = self.info.width as f64 / level.width as f64;
        let scale_y = self.info.height as f64 / level.height as f64;
        let level_px_w = self.transform.pixel_width * scale_x;
        let level_px_h = self.transform.pixel_height * scale_y;

        // Level pixel sampled by each output column and row
        let cols: Vec<Option<u32>> = (0..width)
            .map(|c| {
                let x = request.bounds.min_x + (c as f64 + 0.5) * res_x;
                let px = ((x - self.transform.origin_x) / level_px_w).floor();
                (px >= 0.0 && px < level.width as f64).then_some(px as u32)
            })
            .collect();
        let rows: Vec<Option<u32>> = (0..height)
            .map(|r| {
                let y = request.bounds.max_y - (r as f64 + 0.5) * res_y;
                let py = ((self.transform.origin_y - y) / level_px_h).floor();
                (py >= 0.0 && py < level.height as f64).then_some(py as u32)
            })
            .collect();

        let mut needed = BTreeSet::new();
        for row in rows.iter().flatten() {
            for col in cols.iter().flatten() {
                needed.insert(level.chunk_index(*col, *row));
            }
        }

        let mut chunks: HashMap<usize, Vec<u8>> = HashMap::with_capacity(needed.len());
        for index in needed {
            if let Some(raw) = level.read_chunk(reader, self.byte_order, index).await? {
                chunks.insert(index, raw);
            }
        }

        let spp = level.samples_per_pixel;
        for (r, row) in rows.iter().enumerate() {
            let Some(row) = *row else { continue };
            for (c, col) in cols.iter().enumerate() {
                let Some(col) = *col else { continue };
                let Some(chunk) = chunks.get(&level.chunk_index(col, row)) else {
                    continue;
                };

                let within = ((row % level.chunk_height) * level.chunk_width
                    + col % level.chunk_width) as usize
                    * spp;
                let pixel = r * width + c;

                let mut any_valid = false;
                for (band, &sample) in samples.iter().enumerate() {
                    let value = sample_at(chunk, within + sample, level.dtype, self.byte_order);
                    window.bands[band][pixel] = value;
                    if !is_nodata(value, self.nodata) {
                        any_valid = true;
                    }
                }
                if let Some(alpha) = self.alpha {
                    if sample_at(chunk, within + alpha, level.dtype, self.byte_order) == 0.0 {
                        any_valid = false;
                    }
                }
                window.mask[pixel] = any_valid;
            }
        }

        Ok(window)
    }
}

fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) if nd.is_nan() => false,
        Some(nd) => value == nd,
        None => false,
    }
}

/// GDAL_NODATA is ASCII: a number, "nan" or "inf".
fn parse_nodata(text: &str) -> Option<f64> {
    text.trim().trim_end_matches('\0').parse::<f64>().ok()
}

/// Parse every IFD in the chain, guarding against cycles.
async fn read_ifd_chain<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
) -> Result<Vec<Ifd>, TiffError> {
    let size = reader.size();
    let mut seen = HashSet::new();
    let mut ifds = Vec::new();
    let mut offset = header.first_ifd_offset;

    while offset != 0 && ifds.len() < MAX_IFDS {
        if !seen.insert(offset) || offset >= size {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let count_size = header.ifd_count_size();
        let count_bytes = reader.read_exact_at(offset, count_size).await?;
        let count = header.read_entry_count(&count_bytes);
        let ifd_size = Ifd::calculate_size(count, header) as u64;
        if offset.saturating_add(ifd_size) > size {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let bytes = reader.read_exact_at(offset, ifd_size as usize).await?;
        let ifd = Ifd::parse(&bytes, header)?;
        offset = ifd.next_ifd_offset;
        ifds.push(ifd);
    }

    Ok(ifds)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::testing::TestTiff;
    use crate::io::MemoryRangeReader;

    fn simple(deflate: bool) -> Vec<u8> {
        TestTiff {
            deflate,
            nodata: Some("0"),
            ..TestTiff::new(32, 32)
        }
        .build(|_, x, y| if x < 4 && y < 4 { 0 } else { (x + y) as u8 })
    }

    #[tokio::test]
    async fn test_open_reads_georeference() {
        let reader = MemoryRangeReader::new("mem://a.tif", simple(false));
        let ds = GeoTiffDataset::open(&reader).await.unwrap();
        let info = ds.info();

        assert_eq!(info.crs, Crs::WEB_MERCATOR);
        assert_eq!(info.width, 32);
        assert_eq!(info.bounds, Bounds::new(1000.0, 1680.0, 1320.0, 2000.0));
        assert_eq!(info.resolution(), (10.0, 10.0));
        assert_eq!(info.bands.len(), 1);
        assert_eq!(info.bands[0].nodata, Some(0.0));
        assert_eq!(info.bands[0].dtype, DataType::UInt8);
        assert!(info.overviews.is_empty());
    }

    #[tokio::test]
    async fn test_read_full_window_native_resolution() {
        for deflate in [false, true] {
            let reader = MemoryRangeReader::new("mem://a.tif", simple(deflate));
            let ds = GeoTiffDataset::open(&reader).await.unwrap();
            let request = WindowRequest {
                bounds: ds.info().bounds,
                width: 32,
                height: 32,
                bands: None,
            };
            let window = ds.read_window(&reader, &request).await.unwrap();

            assert_eq!(window.band_indexes, vec![1]);
            assert_eq!(window.bands[0][20 * 32 + 17], 37.0);
            // nodata corner
            assert!(!window.mask[0]);
            assert!(!window.mask[3 * 32 + 3]);
            assert!(window.mask[4 * 32 + 4]);
            assert_eq!(window.mask.iter().filter(|v| !**v).count(), 16);
        }
    }

    #[tokio::test]
    async fn test_read_window_outside_coverage_is_masked() {
        let reader = MemoryRangeReader::new("mem://a.tif", simple(false));
        let ds = GeoTiffDataset::open(&reader).await.unwrap();
        // Half of the window lies east of the raster
        let request = WindowRequest {
            bounds: Bounds::new(1160.0, 1680.0, 1480.0, 2000.0),
            width: 32,
            height: 32,
            bands: None,
        };
        let window = ds.read_window(&reader, &request).await.unwrap();
        assert!(window.mask[10 * 32 + 5]);
        assert_eq!(window.bands[0][10 * 32 + 5], (16 + 5 + 10) as f64);
        assert!(!window.mask[10 * 32 + 20]);
    }

    #[tokio::test]
    async fn test_band_selection_multiband() {
        let bytes = TestTiff {
            bands: 3,
            ..TestTiff::new(16, 16)
        }
        .build(|b, _, _| (b as u8 + 1) * 10);
        let reader = MemoryRangeReader::new("mem://rgb.tif", bytes);
        let ds = GeoTiffDataset::open(&reader).await.unwrap();
        assert_eq!(ds.info().bands.len(), 3);

        let request = WindowRequest {
            bounds: ds.info().bounds,
            width: 4,
            height: 4,
            bands: Some(vec![3, 1]),
        };
        let window = ds.read_window(&reader, &request).await.unwrap();
        assert_eq!(window.band_indexes, vec![3, 1]);
        assert!(window.bands[0].iter().all(|v| *v == 30.0));
        assert!(window.bands[1].iter().all(|v| *v == 10.0));
        assert!(window.mask.iter().all(|v| *v));

        let bad = WindowRequest {
            bands: Some(vec![4]),
            ..request
        };
        assert!(ds.read_window(&reader, &bad).await.is_err());
    }

    #[tokio::test]
    async fn test_overview_selected_for_coarse_reads() {
        let bytes = TestTiff {
            overviews: &[2, 4],
            ..TestTiff::new(64, 64)
        }
        .build(|_, x, y| (x + y) as u8);
        let reader = MemoryRangeReader::new("mem://cog.tif", bytes);
        let ds = GeoTiffDataset::open(&reader).await.unwrap();
        assert_eq!(ds.info().overviews, vec![2, 4]);
        assert_eq!(ds.info().width, 64);

        let coarse = WindowRequest {
            bounds: ds.info().bounds,
            width: 16,
            height: 16,
            bands: None,
        };
        let window = ds.read_window(&reader, &coarse).await.unwrap();
        // overview /4 pixel (3, 2) holds full-resolution pixel (12, 8)
        assert_eq!(window.bands[0][2 * 16 + 3], 20.0);

        let native = WindowRequest {
            width: 64,
            height: 64,
            ..coarse
        };
        let window = ds.read_window(&reader, &native).await.unwrap();
        assert_eq!(window.bands[0][9 * 64 + 13], 22.0);
    }

    #[tokio::test]
    async fn test_missing_georeference_rejected() {
        let mut bytes = simple(false);
        // Rename the GeoKeyDirectory tag so it is no longer recognized
        let needle = 34735u16.to_le_bytes();
        let pos = bytes
            .windows(4)
            .rposition(|w| w[0..2] == needle && w[2..4] == 3u16.to_le_bytes())
            .unwrap();
        bytes[pos..pos + 2].copy_from_slice(&34999u16.to_le_bytes());

        let reader = MemoryRangeReader::new("mem://nogeo.tif", bytes);
        assert!(matches!(
            GeoTiffDataset::open(&reader).await,
            Err(TiffError::MissingGeoreference(_))
        ));
    }

    #[test]
    fn test_nodata_parsing() {
        assert_eq!(parse_nodata("-9999"), Some(-9999.0));
        assert!(parse_nodata("nan").unwrap().is_nan());
        assert_eq!(parse_nodata(" 0 "), Some(0.0));
        assert_eq!(parse_nodata("none"), None);
        assert!(is_nodata(f64::NAN, None));
        assert!(!is_nodata(1.0, Some(f64::NAN)));
    }
}
