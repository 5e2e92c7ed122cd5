//! In-memory GeoTIFF writer used by unit tests.

use std::io::Write;

/// Little-endian tiled GeoTIFF with 8-bit samples.
///
/// Pixel `(col, row)` of the full image covers
/// `[origin_x + col * pixel_size, origin_y - row * pixel_size]` (top-left).
pub(crate) struct TestTiff {
    pub width: u32,
    pub height: u32,
    pub tile: u32,
    pub bands: u16,
    pub deflate: bool,
    pub nodata: Option<&'static str>,
    pub origin: (f64, f64),
    pub pixel_size: f64,
    pub epsg: u16,
    /// Decimation factors of overview IFDs
    pub overviews: &'static [u32],
}

impl TestTiff {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile: 16,
            bands: 1,
            deflate: false,
            nodata: None,
            origin: (1000.0, 2000.0),
            pixel_size: 10.0,
            epsg: 3857,
            overviews: &[],
        }
    }

    /// Build the file; `value(band, col, row)` gives full-resolution samples.
    /// Overview pixels take the value at `(col * factor, row * factor)`.
    pub fn build(&self, value: impl Fn(usize, u32, u32) -> u8) -> Vec<u8> {
        let mut data = vec![0x49, 0x49, 0x2A, 0x00, 0, 0, 0, 0];

        let mut levels = vec![(self.width, self.height, 1u32)];
        for &f in self.overviews {
            levels.push((self.width.div_ceil(f), self.height.div_ceil(f), f));
        }

        // Chunk data first, remembering offsets per level
        let mut tables = Vec::new();
        for &(width, height, factor) in &levels {
            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            for ty in 0..height.div_ceil(self.tile) {
                for tx in 0..width.div_ceil(self.tile) {
                    let blob = self.chunk(tx, ty, factor, &value);
                    offsets.push(data.len() as u32);
                    counts.push(blob.len() as u32);
                    data.extend_from_slice(&blob);
                }
            }
            tables.push((offsets, counts));
        }

        let mut previous_next: Option<usize> = None;
        for (i, (&(width, height, _), (offsets, counts))) in
            levels.iter().zip(tables.iter()).enumerate()
        {
            if data.len() % 2 == 1 {
                data.push(0);
            }
            let ifd_offset = data.len() as u32;
            match previous_next {
                None => data[4..8].copy_from_slice(&ifd_offset.to_le_bytes()),
                Some(at) => data[at..at + 4].copy_from_slice(&ifd_offset.to_le_bytes()),
            }

            let entries = self.entries(i > 0, width, height, offsets, counts);
            let ifd_len = 2 + entries.len() * 12 + 4;
            let mut extra_offset = ifd_offset as usize + ifd_len;
            let mut extra = Vec::new();

            data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for (tag, typ, count, value) in &entries {
                data.extend_from_slice(&tag.to_le_bytes());
                data.extend_from_slice(&typ.to_le_bytes());
                data.extend_from_slice(&count.to_le_bytes());
                if value.len() <= 4 {
                    let mut inline = value.clone();
                    inline.resize(4, 0);
                    data.extend_from_slice(&inline);
                } else {
                    data.extend_from_slice(&(extra_offset as u32).to_le_bytes());
                    extra.extend_from_slice(value);
                    extra_offset += value.len();
                }
            }
            previous_next = Some(data.len());
            data.extend_from_slice(&0u32.to_le_bytes());
            data.extend_from_slice(&extra);
        }
        data
    }

    fn chunk(&self, tx: u32, ty: u32, factor: u32, value: &impl Fn(usize, u32, u32) -> u8) -> Vec<u8> {
        let mut raw = Vec::new();
        for y in 0..self.tile {
            for x in 0..self.tile {
                let col = (tx * self.tile + x) * factor;
                let row = (ty * self.tile + y) * factor;
                for b in 0..self.bands as usize {
                    raw.push(value(b, col, row));
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

    fn entries(
        &self,
        overview: bool,
        width: u32,
        height: u32,
        offsets: &[u32],
        counts: &[u32],
    ) -> Vec<(u16, u16, u32, Vec<u8>)> {
        let le_u32 = |v: &[u32]| v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>();
        let le_f64 = |v: &[f64]| v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>();

        let mut entries = Vec::new();
        if overview {
            entries.push((254, 4, 1, 1u32.to_le_bytes().to_vec()));
        }
        entries.extend([
            (256, 4, 1, width.to_le_bytes().to_vec()),
            (257, 4, 1, height.to_le_bytes().to_vec()),
            (258, 3, 1, 8u16.to_le_bytes().to_vec()),
            (259, 3, 1, (if self.deflate { 8u16 } else { 1 }).to_le_bytes().to_vec()),
            (277, 3, 1, self.bands.to_le_bytes().to_vec()),
            (322, 3, 1, (self.tile as u16).to_le_bytes().to_vec()),
            (323, 3, 1, (self.tile as u16).to_le_bytes().to_vec()),
            (324, 4, offsets.len() as u32, le_u32(offsets)),
            (325, 4, counts.len() as u32, le_u32(counts)),
        ]);
        if overview {
            return entries;
        }

        let model_type: u16 = if self.epsg == 4326 { 2 } else { 1 };
        let crs_key: u16 = if self.epsg == 4326 { 2048 } else { 3072 };
        let keys = [1u16, 1, 0, 2, 1024, 0, 1, model_type, crs_key, 0, 1, self.epsg];
        entries.extend([
            (33550, 12, 3, le_f64(&[self.pixel_size, self.pixel_size, 0.0])),
            (
                33922,
                12,
                6,
                le_f64(&[0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0]),
            ),
            (
                34735,
                3,
                keys.len() as u32,
                keys.iter().flat_map(|v| v.to_le_bytes()).collect(),
            ),
        ]);
        if let Some(nd) = self.nodata {
            let mut text = nd.as_bytes().to_vec();
            text.push(0);
            entries.push((42113, 2, text.len() as u32, text));
        }
        entries
    }
}
