//! COG (Cloud Optimized `GeoTIFF`) reader built on byte-range access.
//!
//! Opening a raster reads only the TIFF header and the IFD chain: the
//! full-resolution image plus any reduced-resolution overviews. Tile data is
//! fetched on demand, one internal tile per range request, and is never
//! retained by the reader.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::AnyResult;
use crate::geometry::BoundingBox;
use crate::range_reader::{RangeReader, SourceOptions, create_range_reader};

const TAG_NEW_SUBFILE_TYPE: u16 = 254;
const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_PLANAR_CONFIG: u16 = 284;
const TAG_PREDICTOR: u16 = 317;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_SAMPLE_FORMAT: u16 = 339;
const TAG_JPEG_TABLES: u16 = 347;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const GEO_KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEO_KEY_PROJECTED_CRS: u16 = 3072;

// NewSubfileType bits
const SUBFILE_REDUCED_RESOLUTION: u64 = 1;
const SUBFILE_MASK: u64 = 4;

const SAMPLE_FORMAT_UINT: u16 = 1;
const SAMPLE_FORMAT_INT: u16 = 2;
const SAMPLE_FORMAT_FLOAT: u16 = 3;

/// Initial read size for an IFD. Larger directories trigger a second read.
const IFD_PREFETCH: usize = 4096;

/// Upper bound on the IFD chain, guards against offset loops
const MAX_IFDS: usize = 32;

/// Sample data type detected from `BitsPerSample` and `SampleFormat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CogDataType {
    UInt8,
    UInt16,
    UInt32,
    Int8,
    Int16,
    Int32,
    Float32,
    Float64,
}

impl CogDataType {
    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    #[must_use]
    pub fn from_tags(bits_per_sample: u16, sample_format: u16) -> Option<Self> {
        match (sample_format, bits_per_sample) {
            (SAMPLE_FORMAT_INT, 8) => Some(Self::Int8),
            (SAMPLE_FORMAT_INT, 16) => Some(Self::Int16),
            (SAMPLE_FORMAT_INT, 32) => Some(Self::Int32),
            (SAMPLE_FORMAT_FLOAT, 32) => Some(Self::Float32),
            (SAMPLE_FORMAT_FLOAT, 64) => Some(Self::Float64),
            (SAMPLE_FORMAT_INT | SAMPLE_FORMAT_FLOAT, _) => None,
            // Unsigned, or SampleFormat absent
            (_, 8) => Some(Self::UInt8),
            (_, 16) => Some(Self::UInt16),
            (_, 32) => Some(Self::UInt32),
            _ => None,
        }
    }
}

/// Compression method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Jpeg,
    Deflate,
    Zstd,
}

impl Compression {
    #[must_use]
    pub fn from_tag(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::None),
            5 => Some(Self::Lzw),
            7 => Some(Self::Jpeg),
            // 32946 is the pre-standard Adobe deflate code
            8 | 32946 => Some(Self::Deflate),
            50000 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// `GeoTIFF` pixel-to-model transform from `ModelPixelScale` and `ModelTiepoint`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// Pixel size in CRS units (x, y, z)
    pub pixel_scale: [f64; 3],
    /// Raster point (i, j, k) anchored at model point (x, y, z)
    pub tiepoint: [f64; 6],
}

impl GeoTransform {
    /// Full-resolution pixel coordinates to CRS coordinates
    #[must_use]
    pub fn pixel_to_world(&self, px: f64, py: f64) -> (f64, f64) {
        let world_x = self.tiepoint[3] + (px - self.tiepoint[0]) * self.pixel_scale[0];
        let world_y = self.tiepoint[4] - (py - self.tiepoint[1]) * self.pixel_scale[1];
        (world_x, world_y)
    }

    /// CRS coordinates to (fractional) full-resolution pixel coordinates
    #[must_use]
    pub fn world_to_pixel(&self, wx: f64, wy: f64) -> (f64, f64) {
        let px = self.tiepoint[0] + (wx - self.tiepoint[3]) / self.pixel_scale[0];
        let py = self.tiepoint[1] + (self.tiepoint[4] - wy) / self.pixel_scale[1];
        (px, py)
    }
}

/// Chunk layout of one image in the IFD chain.
///
/// Stripped images are described as a single column of full-width chunks.
#[derive(Debug, Clone)]
pub struct TileGrid {
    pub width: usize,
    pub height: usize,
    pub tile_width: usize,
    pub tile_height: usize,
    pub tiles_across: usize,
    pub tiles_down: usize,
    pub tile_offsets: Vec<u64>,
    pub tile_byte_counts: Vec<u64>,
}

impl TileGrid {
    /// Index of the chunk containing pixel (px, py), or `None` outside the image
    #[must_use]
    pub fn tile_index_for_pixel(&self, px: usize, py: usize) -> Option<usize> {
        if px >= self.width || py >= self.height {
            return None;
        }
        Some((py / self.tile_height) * self.tiles_across + px / self.tile_width)
    }

    /// Pixel coordinates of the chunk's top-left corner
    #[must_use]
    pub fn tile_origin(&self, tile_index: usize) -> (usize, usize) {
        let col = tile_index % self.tiles_across;
        let row = tile_index / self.tiles_across;
        (col * self.tile_width, row * self.tile_height)
    }
}

/// Full-resolution image metadata, read from the first IFD
#[derive(Debug, Clone)]
pub struct CogMetadata {
    pub grid: TileGrid,
    /// Samples per pixel
    pub bands: usize,
    pub data_type: CogDataType,
    pub compression: Compression,
    /// 1 = none, 2 = horizontal differencing, 3 = floating point
    pub predictor: u16,
    pub little_endian: bool,
    /// Tiled (true) or stripped (false) layout
    pub is_tiled: bool,
    pub geo_transform: Option<GeoTransform>,
    /// EPSG code from the `GeoKey` directory
    pub crs_code: Option<i32>,
    pub nodata: Option<f64>,
    /// Shared JPEG quantization/Huffman tables (tag 347)
    pub jpeg_tables: Option<Vec<u8>>,
}

impl CogMetadata {
    #[must_use]
    pub fn width(&self) -> usize {
        self.grid.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.grid.height
    }
}

/// Reduced-resolution overview image
#[derive(Debug, Clone)]
pub struct OverviewMetadata {
    pub grid: TileGrid,
    /// Full-resolution pixels per overview pixel along x
    pub scale_x: f64,
    /// Full-resolution pixels per overview pixel along y
    pub scale_y: f64,
}

/// Read-only COG handle. Holds metadata only; tile data is fetched per call.
pub struct CogReader {
    reader: Arc<dyn RangeReader>,
    pub metadata: CogMetadata,
    /// Overviews sorted from finest to coarsest
    pub overviews: Vec<OverviewMetadata>,
}

impl CogReader {
    /// Open a raster from an http(s) URL (or a local path when allowed)
    pub fn open(source: &str, options: &SourceOptions) -> AnyResult<Self> {
        let reader = create_range_reader(source, options)?;
        Self::from_reader(reader)
    }

    /// Parse header and IFD chain from an existing range reader
    pub fn from_reader(reader: Arc<dyn RangeReader>) -> AnyResult<Self> {
        let header = reader.read_range(0, 8)?;
        if header.len() < 8 {
            return Err("File too small for a TIFF header".into());
        }

        let little_endian = match &header[0..2] {
            b"II" => true,
            b"MM" => false,
            _ => return Err("Invalid TIFF signature".into()),
        };

        let version = read_u16(&header[2..4], little_endian);
        if version == 43 {
            return Err("BigTIFF is not supported".into());
        }
        if version != 42 {
            return Err(format!("Invalid TIFF version: {version}").into());
        }

        let parser = IfdParser {
            reader: reader.as_ref(),
            little_endian,
        };

        let first_offset = u64::from(read_u32(&header[4..8], little_endian));
        let (tags, mut next_offset) = parser.read_ifd(first_offset)?;
        let metadata = parser.parse_main_image(&tags)?;

        let mut overviews = Vec::new();
        let mut visited = 1;
        while next_offset != 0 && visited < MAX_IFDS {
            visited += 1;
            let (tags, next) = parser.read_ifd(next_offset)?;
            next_offset = next;

            let subfile_type = parser.first_value(&tags, TAG_NEW_SUBFILE_TYPE)?.unwrap_or(0);
            if subfile_type & SUBFILE_MASK != 0 || subfile_type & SUBFILE_REDUCED_RESOLUTION == 0 {
                continue;
            }
            let bands = parser.first_value(&tags, TAG_SAMPLES_PER_PIXEL)?.unwrap_or(1) as usize;
            if bands != metadata.bands {
                continue;
            }

            let grid = parser.parse_grid(&tags)?;
            if grid.width == 0 || grid.height == 0 {
                continue;
            }
            overviews.push(OverviewMetadata {
                scale_x: metadata.width() as f64 / grid.width as f64,
                scale_y: metadata.height() as f64 / grid.height as f64,
                grid,
            });
        }

        overviews.sort_by(|a, b| a.scale_x.total_cmp(&b.scale_x));

        debug!(
            source = reader.identifier(),
            width = metadata.width(),
            height = metadata.height(),
            bands = metadata.bands,
            crs = ?metadata.crs_code,
            overviews = overviews.len(),
            "Parsed COG header"
        );

        Ok(Self {
            reader,
            metadata,
            overviews,
        })
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    /// Tile grid of the full image (`None`) or of an overview (`Some(idx)`)
    #[must_use]
    pub fn grid(&self, overview_idx: Option<usize>) -> Option<&TileGrid> {
        match overview_idx {
            None => Some(&self.metadata.grid),
            Some(idx) => self.overviews.get(idx).map(|ovr| &ovr.grid),
        }
    }

    /// Extent of the raster in its native CRS
    #[must_use]
    pub fn native_extent(&self) -> Option<BoundingBox> {
        let gt = self.metadata.geo_transform?;
        let corners = [
            gt.pixel_to_world(0.0, 0.0),
            gt.pixel_to_world(self.metadata.width() as f64, self.metadata.height() as f64),
        ];
        BoundingBox::from_points(corners)
    }

    /// Choose the overview to sample for an output of `output_size` pixels
    /// covering `extent_src_width` x `extent_src_height` full-resolution pixels.
    ///
    /// Returns the coarsest overview whose downsampling does not exceed the
    /// needed scale, or `None` to read full resolution.
    #[must_use]
    pub fn best_overview_for_resolution(
        &self,
        extent_src_width: f64,
        extent_src_height: f64,
        output_size: usize,
    ) -> Option<usize> {
        let output_size = output_size as f64;
        let needed_scale = (extent_src_width / output_size).max(extent_src_height / output_size);

        if needed_scale < 1.5 {
            return None;
        }

        let mut best: Option<(usize, f64)> = None;
        for (idx, ovr) in self.overviews.iter().enumerate() {
            if ovr.scale_x <= needed_scale && best.is_none_or(|(_, scale)| ovr.scale_x > scale) {
                best = Some((idx, ovr.scale_x));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Read and decode a full-resolution tile as interleaved f32 samples
    pub fn read_tile(&self, tile_index: usize) -> AnyResult<Vec<f32>> {
        self.decode_tile(&self.metadata.grid, tile_index)
    }

    /// Read and decode a tile from an overview level
    pub fn read_overview_tile(&self, overview_idx: usize, tile_index: usize) -> AnyResult<Vec<f32>> {
        let ovr = self
            .overviews
            .get(overview_idx)
            .ok_or_else(|| format!("Overview index {overview_idx} out of range"))?;
        self.decode_tile(&ovr.grid, tile_index)
    }

    fn decode_tile(&self, grid: &TileGrid, tile_index: usize) -> AnyResult<Vec<f32>> {
        let meta = &self.metadata;
        let (Some(&offset), Some(&byte_count)) = (
            grid.tile_offsets.get(tile_index),
            grid.tile_byte_counts.get(tile_index),
        ) else {
            return Err(format!(
                "Tile index {tile_index} out of range (have {})",
                grid.tile_offsets.len()
            )
            .into());
        };

        let samples = grid.tile_width * grid.tile_height * meta.bands;

        // Sparse tile
        if byte_count == 0 {
            return Ok(vec![f32::NAN; samples]);
        }

        let compressed = self.reader.read_range(offset, usize::try_from(byte_count)?)?;
        if (compressed.len() as u64) < byte_count {
            return Err(format!(
                "Short read for tile {tile_index}: got {} of {byte_count} bytes",
                compressed.len()
            )
            .into());
        }

        let bytes_per_sample = meta.data_type.bytes_per_sample();
        let mut decompressed = decompress_tile(&compressed, meta.compression, meta.jpeg_tables.as_deref())?;
        // Edge strips and truncated encoders produce short buffers
        decompressed.resize(samples * bytes_per_sample, 0);

        apply_predictor(
            &mut decompressed,
            meta.predictor,
            grid.tile_width * meta.bands,
            meta.bands,
            bytes_per_sample,
            meta.little_endian,
        )?;

        Ok(convert_to_f32(&decompressed, meta.data_type, meta.little_endian))
    }
}

// ============================================================================
// IFD parsing
// ============================================================================

#[inline]
fn read_u16(bytes: &[u8], little_endian: bool) -> u16 {
    let b = [bytes[0], bytes[1]];
    if little_endian { u16::from_le_bytes(b) } else { u16::from_be_bytes(b) }
}

#[inline]
fn read_u32(bytes: &[u8], little_endian: bool) -> u32 {
    let b = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if little_endian { u32::from_le_bytes(b) } else { u32::from_be_bytes(b) }
}

#[inline]
fn read_u64(bytes: &[u8], little_endian: bool) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[..8]);
    if little_endian { u64::from_le_bytes(b) } else { u64::from_be_bytes(b) }
}

#[inline]
fn read_f64(bytes: &[u8], little_endian: bool) -> f64 {
    f64::from_bits(read_u64(bytes, little_endian))
}

#[derive(Debug, Clone, Copy)]
struct IfdEntry {
    field_type: u16,
    count: u64,
    /// Inline value or offset to the value, still in file byte order
    value: [u8; 4],
}

impl IfdEntry {
    fn type_size(&self) -> Option<usize> {
        match self.field_type {
            1 | 2 | 6 | 7 => Some(1), // BYTE, ASCII, SBYTE, UNDEFINED
            3 | 8 => Some(2),         // SHORT, SSHORT
            4 | 9 | 11 => Some(4),    // LONG, SLONG, FLOAT
            12 | 16 => Some(8),       // DOUBLE, LONG8
            _ => None,
        }
    }
}

type TagMap = HashMap<u16, IfdEntry>;

struct IfdParser<'a> {
    reader: &'a dyn RangeReader,
    little_endian: bool,
}

impl IfdParser<'_> {
    /// Read one IFD; returns its entries and the offset of the next IFD
    fn read_ifd(&self, offset: u64) -> AnyResult<(TagMap, u64)> {
        let le = self.little_endian;
        let mut bytes = self.reader.read_range(offset, IFD_PREFETCH)?;
        if bytes.len() < 2 {
            return Err(format!("Truncated IFD at offset {offset}").into());
        }

        let entry_count = read_u16(&bytes[0..2], le) as usize;
        let ifd_len = 2 + entry_count * 12 + 4;
        if bytes.len() < ifd_len {
            bytes = self.reader.read_range(offset, ifd_len)?;
        }
        if bytes.len() < 2 + entry_count * 12 {
            return Err(format!("Truncated IFD at offset {offset}").into());
        }

        let mut tags = TagMap::with_capacity(entry_count);
        for i in 0..entry_count {
            let at = 2 + i * 12;
            let entry = &bytes[at..at + 12];
            tags.insert(
                read_u16(&entry[0..2], le),
                IfdEntry {
                    field_type: read_u16(&entry[2..4], le),
                    count: u64::from(read_u32(&entry[4..8], le)),
                    value: [entry[8], entry[9], entry[10], entry[11]],
                },
            );
        }

        let next_at = 2 + entry_count * 12;
        let next = if bytes.len() >= next_at + 4 {
            u64::from(read_u32(&bytes[next_at..next_at + 4], le))
        } else {
            0
        };

        Ok((tags, next))
    }

    /// Raw value bytes of an entry, from the inline slot or from the file
    fn entry_bytes(&self, entry: &IfdEntry) -> AnyResult<Vec<u8>> {
        let size = entry
            .type_size()
            .ok_or_else(|| format!("Unsupported TIFF field type {}", entry.field_type))?;
        let total = usize::try_from(entry.count)? * size;
        if total <= 4 {
            return Ok(entry.value[..total].to_vec());
        }
        let offset = u64::from(read_u32(&entry.value, self.little_endian));
        let bytes = self.reader.read_range(offset, total)?;
        if bytes.len() < total {
            return Err(format!("Truncated tag value at offset {offset}").into());
        }
        Ok(bytes)
    }

    /// Integer values of a tag (BYTE, SHORT, LONG or LONG8)
    fn values(&self, tags: &TagMap, tag: u16) -> AnyResult<Option<Vec<u64>>> {
        let Some(entry) = tags.get(&tag) else {
            return Ok(None);
        };
        let le = self.little_endian;
        let bytes = self.entry_bytes(entry)?;
        let values = match entry.field_type {
            1 | 7 => bytes.iter().map(|&b| u64::from(b)).collect(),
            3 => bytes.chunks_exact(2).map(|c| u64::from(read_u16(c, le))).collect(),
            4 => bytes.chunks_exact(4).map(|c| u64::from(read_u32(c, le))).collect(),
            16 => bytes.chunks_exact(8).map(|c| read_u64(c, le)).collect(),
            other => return Err(format!("Tag {tag} has non-integer type {other}").into()),
        };
        Ok(Some(values))
    }

    fn first_value(&self, tags: &TagMap, tag: u16) -> AnyResult<Option<u64>> {
        Ok(self.values(tags, tag)?.and_then(|v| v.first().copied()))
    }

    fn doubles(&self, tags: &TagMap, tag: u16, min_count: usize) -> AnyResult<Option<Vec<f64>>> {
        let Some(entry) = tags.get(&tag) else {
            return Ok(None);
        };
        if entry.field_type != 12 || entry.count < min_count as u64 {
            return Ok(None);
        }
        let bytes = self.entry_bytes(entry)?;
        Ok(Some(
            bytes
                .chunks_exact(8)
                .map(|c| read_f64(c, self.little_endian))
                .collect(),
        ))
    }

    fn ascii(&self, tags: &TagMap, tag: u16) -> AnyResult<Option<String>> {
        let Some(entry) = tags.get(&tag) else {
            return Ok(None);
        };
        let bytes = self.entry_bytes(entry)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(Some(text.trim_end_matches('\0').trim().to_string()))
    }

    fn parse_grid(&self, tags: &TagMap) -> AnyResult<TileGrid> {
        let width = self
            .first_value(tags, TAG_IMAGE_WIDTH)?
            .ok_or("Missing ImageWidth tag")? as usize;
        let height = self
            .first_value(tags, TAG_IMAGE_LENGTH)?
            .ok_or("Missing ImageLength tag")? as usize;

        let (tile_width, tile_height, offsets_tag, counts_tag) = if tags.contains_key(&TAG_TILE_OFFSETS) {
            let tw = self.first_value(tags, TAG_TILE_WIDTH)?.ok_or("Missing TileWidth tag")? as usize;
            let th = self.first_value(tags, TAG_TILE_LENGTH)?.ok_or("Missing TileLength tag")? as usize;
            (tw, th, TAG_TILE_OFFSETS, TAG_TILE_BYTE_COUNTS)
        } else if tags.contains_key(&TAG_STRIP_OFFSETS) {
            let rows = self
                .first_value(tags, TAG_ROWS_PER_STRIP)?
                .map_or(height, |r| (r as usize).min(height));
            (width, rows, TAG_STRIP_OFFSETS, TAG_STRIP_BYTE_COUNTS)
        } else {
            return Err("TIFF has neither tile nor strip tags".into());
        };

        if tile_width == 0 || tile_height == 0 {
            return Err("Zero tile dimensions".into());
        }

        let tiles_across = width.div_ceil(tile_width);
        let tiles_down = height.div_ceil(tile_height);

        let tile_offsets = self
            .values(tags, offsets_tag)?
            .ok_or_else(|| format!("Missing tag {offsets_tag}"))?;
        let tile_byte_counts = self
            .values(tags, counts_tag)?
            .ok_or_else(|| format!("Missing tag {counts_tag}"))?;

        let expected = tiles_across * tiles_down;
        if tile_offsets.len() < expected || tile_byte_counts.len() < expected {
            return Err(format!(
                "Expected {expected} chunks, found {} offsets and {} byte counts",
                tile_offsets.len(),
                tile_byte_counts.len()
            )
            .into());
        }

        Ok(TileGrid {
            width,
            height,
            tile_width,
            tile_height,
            tiles_across,
            tiles_down,
            tile_offsets,
            tile_byte_counts,
        })
    }

    fn parse_main_image(&self, tags: &TagMap) -> AnyResult<CogMetadata> {
        let grid = self.parse_grid(tags)?;
        let is_tiled = tags.contains_key(&TAG_TILE_OFFSETS);

        let bands = self.first_value(tags, TAG_SAMPLES_PER_PIXEL)?.unwrap_or(1) as usize;
        let bits_per_sample = self.first_value(tags, TAG_BITS_PER_SAMPLE)?.unwrap_or(8) as u16;
        let sample_format = self
            .first_value(tags, TAG_SAMPLE_FORMAT)?
            .unwrap_or(u64::from(SAMPLE_FORMAT_UINT)) as u16;
        let compression_val = self.first_value(tags, TAG_COMPRESSION)?.unwrap_or(1) as u16;
        let predictor = self.first_value(tags, TAG_PREDICTOR)?.unwrap_or(1) as u16;
        let planar_config = self.first_value(tags, TAG_PLANAR_CONFIG)?.unwrap_or(1);

        if planar_config != 1 && bands > 1 {
            return Err("Separate-plane (PlanarConfiguration=2) TIFFs are not supported".into());
        }

        let data_type = CogDataType::from_tags(bits_per_sample, sample_format).ok_or_else(|| {
            format!("Unsupported data type: bits={bits_per_sample}, format={sample_format}")
        })?;
        let compression = Compression::from_tag(compression_val)
            .ok_or_else(|| format!("Unsupported compression: {compression_val}"))?;

        let pixel_scale = self.doubles(tags, TAG_MODEL_PIXEL_SCALE, 3)?;
        let tiepoint = self.doubles(tags, TAG_MODEL_TIEPOINT, 6)?;
        let geo_transform = match (pixel_scale, tiepoint) {
            (Some(s), Some(t)) if s[0] != 0.0 && s[1] != 0.0 => Some(GeoTransform {
                pixel_scale: [s[0], s[1], s[2]],
                tiepoint: [t[0], t[1], t[2], t[3], t[4], t[5]],
            }),
            _ => None,
        };

        let crs_code = self.crs_from_geokeys(tags)?;
        let nodata = self
            .ascii(tags, TAG_GDAL_NODATA)?
            .and_then(|s| s.parse::<f64>().ok());

        let jpeg_tables = match tags.get(&TAG_JPEG_TABLES) {
            Some(entry) if compression == Compression::Jpeg => Some(self.entry_bytes(entry)?),
            _ => None,
        };

        Ok(CogMetadata {
            grid,
            bands,
            data_type,
            compression,
            predictor,
            little_endian: self.little_endian,
            is_tiled,
            geo_transform,
            crs_code,
            nodata,
            jpeg_tables,
        })
    }

    /// EPSG code from `ProjectedCSTypeGeoKey` or `GeographicTypeGeoKey`
    fn crs_from_geokeys(&self, tags: &TagMap) -> AnyResult<Option<i32>> {
        let Some(dir) = self.values(tags, TAG_GEO_KEY_DIRECTORY)? else {
            return Ok(None);
        };
        // Header: version, revision, minor revision, key count; then 4 shorts per key
        if dir.len() < 4 {
            return Ok(None);
        }

        let mut geographic = None;
        for key in dir[4..].chunks_exact(4).take(dir[3] as usize) {
            let (key_id, location, value) = (key[0] as u16, key[1], key[3]);
            // Location 0 means the value is stored in place
            if location != 0 || value == 0 || value == 32767 {
                continue;
            }
            match key_id {
                GEO_KEY_PROJECTED_CRS => return Ok(Some(value as i32)),
                GEO_KEY_GEOGRAPHIC_TYPE => geographic = Some(value as i32),
                _ => {}
            }
        }
        Ok(geographic)
    }
}

// ============================================================================
// Decompression and sample decoding
// ============================================================================

fn decompress_tile(compressed: &[u8], compression: Compression, jpeg_tables: Option<&[u8]>) -> AnyResult<Vec<u8>> {
    match compression {
        Compression::None => Ok(compressed.to_vec()),
        Compression::Deflate => {
            use std::io::Read;
            let mut decoder = flate2::read::ZlibDecoder::new(compressed);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
        Compression::Lzw => {
            let mut decoder = weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
            Ok(decoder.decode(compressed)?)
        }
        Compression::Zstd => Ok(zstd::stream::decode_all(compressed)?),
        Compression::Jpeg => decode_jpeg(compressed, jpeg_tables),
    }
}

/// Decode a JPEG chunk, splicing in the shared tables when the file has them.
fn decode_jpeg(compressed: &[u8], jpeg_tables: Option<&[u8]>) -> AnyResult<Vec<u8>> {
    use std::io::Cursor;

    // Tables stream is SOI..EOI; drop its EOI and the chunk's SOI
    let stream = match jpeg_tables {
        Some(tables) if tables.len() > 4 && compressed.len() > 2 => {
            let mut merged = Vec::with_capacity(tables.len() + compressed.len());
            merged.extend_from_slice(&tables[..tables.len() - 2]);
            merged.extend_from_slice(&compressed[2..]);
            merged
        }
        _ => compressed.to_vec(),
    };

    let img = image::ImageReader::with_format(Cursor::new(stream), image::ImageFormat::Jpeg)
        .decode()
        .map_err(|e| format!("JPEG decode error: {e}"))?;

    Ok(match img {
        image::DynamicImage::ImageLuma8(gray) => gray.into_raw(),
        image::DynamicImage::ImageRgb8(rgb) => rgb.into_raw(),
        other => other.to_rgb8().into_raw(),
    })
}

/// Undo TIFF predictor encoding in place.
///
/// Predictor 2 accumulates whole samples (not bytes) along each row so carries
/// between bytes of multi-byte samples propagate. Predictor 3 accumulates the
/// byte-shuffled row, then restores sample byte order. Rows are independent.
fn apply_predictor(
    data: &mut [u8],
    predictor: u16,
    samples_per_row: usize,
    bands: usize,
    bytes_per_sample: usize,
    little_endian: bool,
) -> AnyResult<()> {
    let row_bytes = samples_per_row * bytes_per_sample;
    if row_bytes == 0 {
        return Ok(());
    }

    match predictor {
        1 => Ok(()),
        2 => {
            for row in data.chunks_exact_mut(row_bytes) {
                match bytes_per_sample {
                    1 => {
                        for i in bands..row.len() {
                            row[i] = row[i].wrapping_add(row[i - bands]);
                        }
                    }
                    2 => accumulate_samples::<2>(row, bands, little_endian, |a, b| {
                        (a as u16).wrapping_add(b as u16) as u64
                    }),
                    4 => accumulate_samples::<4>(row, bands, little_endian, |a, b| {
                        (a as u32).wrapping_add(b as u32) as u64
                    }),
                    8 => accumulate_samples::<8>(row, bands, little_endian, u64::wrapping_add),
                    n => return Err(format!("Predictor 2 with {n}-byte samples").into()),
                }
            }
            Ok(())
        }
        3 => {
            let mut shuffled = vec![0u8; row_bytes];
            for row in data.chunks_exact_mut(row_bytes) {
                for i in bands..row.len() {
                    row[i] = row[i].wrapping_add(row[i - bands]);
                }
                shuffled.copy_from_slice(row);
                // Byte planes are stored most significant first
                for sample in 0..samples_per_row {
                    for byte in 0..bytes_per_sample {
                        let plane = if little_endian { bytes_per_sample - 1 - byte } else { byte };
                        row[sample * bytes_per_sample + byte] = shuffled[plane * samples_per_row + sample];
                    }
                }
            }
            Ok(())
        }
        other => Err(format!("Unsupported predictor: {other}").into()),
    }
}

/// Sample-wise horizontal accumulation for `N`-byte integers
fn accumulate_samples<const N: usize>(
    row: &mut [u8],
    bands: usize,
    little_endian: bool,
    add: impl Fn(u64, u64) -> u64,
) {
    let load = |bytes: &[u8]| -> u64 {
        let mut buf = [0u8; 8];
        if little_endian {
            buf[..N].copy_from_slice(&bytes[..N]);
            u64::from_le_bytes(buf)
        } else {
            buf[8 - N..].copy_from_slice(&bytes[..N]);
            u64::from_be_bytes(buf)
        }
    };

    let samples = row.len() / N;
    for i in bands..samples {
        let prev = load(&row[(i - bands) * N..]);
        let curr = load(&row[i * N..]);
        let sum = add(curr, prev);
        let out = &mut row[i * N..(i + 1) * N];
        if little_endian {
            out.copy_from_slice(&sum.to_le_bytes()[..N]);
        } else {
            out.copy_from_slice(&sum.to_be_bytes()[8 - N..]);
        }
    }
}

fn convert_to_f32(data: &[u8], data_type: CogDataType, little_endian: bool) -> Vec<f32> {
    macro_rules! decode {
        ($ty:ty, $n:expr) => {
            data.chunks_exact($n)
                .map(|c| {
                    let mut b = [0u8; $n];
                    b.copy_from_slice(c);
                    let v = if little_endian { <$ty>::from_le_bytes(b) } else { <$ty>::from_be_bytes(b) };
                    v as f32
                })
                .collect()
        };
    }

    match data_type {
        CogDataType::UInt8 => data.iter().map(|&b| f32::from(b)).collect(),
        CogDataType::Int8 => data.iter().map(|&b| f32::from(b as i8)).collect(),
        CogDataType::UInt16 => decode!(u16, 2),
        CogDataType::Int16 => decode!(i16, 2),
        CogDataType::UInt32 => decode!(u32, 4),
        CogDataType::Int32 => decode!(i32, 4),
        CogDataType::Float32 => decode!(f32, 4),
        CogDataType::Float64 => decode!(f64, 8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_reader::MemoryRangeReader;
    use crate::test_fixtures::GeoTiffBuilder;

    fn open(bytes: Vec<u8>) -> CogReader {
        CogReader::from_reader(Arc::new(MemoryRangeReader::new(bytes, "fixture.tif"))).unwrap()
    }

    #[test]
    fn test_data_type_detection() {
        assert_eq!(CogDataType::from_tags(8, 1), Some(CogDataType::UInt8));
        assert_eq!(CogDataType::from_tags(16, 2), Some(CogDataType::Int16));
        assert_eq!(CogDataType::from_tags(32, 3), Some(CogDataType::Float32));
        assert_eq!(CogDataType::from_tags(16, 0), Some(CogDataType::UInt16));
        assert_eq!(CogDataType::from_tags(12, 1), None);
        assert_eq!(CogDataType::from_tags(16, 3), None);
    }

    #[test]
    fn test_compression_detection() {
        assert_eq!(Compression::from_tag(1), Some(Compression::None));
        assert_eq!(Compression::from_tag(5), Some(Compression::Lzw));
        assert_eq!(Compression::from_tag(8), Some(Compression::Deflate));
        assert_eq!(Compression::from_tag(32946), Some(Compression::Deflate));
        assert_eq!(Compression::from_tag(50000), Some(Compression::Zstd));
        assert_eq!(Compression::from_tag(34887), None);
    }

    #[test]
    fn test_geo_transform() {
        let gt = GeoTransform {
            pixel_scale: [0.5, 0.25, 0.0],
            tiepoint: [0.0, 0.0, 0.0, 100.0, 50.0, 0.0],
        };
        assert_eq!(gt.pixel_to_world(0.0, 0.0), (100.0, 50.0));
        assert_eq!(gt.pixel_to_world(10.0, 20.0), (105.0, 45.0));
        assert_eq!(gt.world_to_pixel(105.0, 45.0), (10.0, 20.0));
    }

    #[test]
    fn test_rejects_non_tiff() {
        let reader = Arc::new(MemoryRangeReader::new(b"GIF89a\0\0\0\0".to_vec(), "x"));
        assert!(CogReader::from_reader(reader).is_err());
    }

    #[test]
    fn test_reads_fixture_metadata() {
        let cog = open(GeoTiffBuilder::new(600, 300).with_overview().build());
        let meta = &cog.metadata;

        assert_eq!(meta.width(), 600);
        assert_eq!(meta.height(), 300);
        assert_eq!(meta.bands, 3);
        assert_eq!(meta.data_type, CogDataType::UInt8);
        assert!(meta.is_tiled);
        assert_eq!(meta.grid.tile_width, 256);
        assert_eq!(meta.grid.tiles_across, 3);
        assert_eq!(meta.grid.tiles_down, 2);
        assert_eq!(meta.crs_code, Some(4326));
        assert_eq!(meta.nodata, Some(0.0));

        assert_eq!(cog.overviews.len(), 1);
        assert_eq!(cog.overviews[0].grid.width, 300);
        assert_eq!(cog.overviews[0].scale_x, 2.0);

        let extent = cog.native_extent().unwrap();
        assert!((extent.minx - (-122.5)).abs() < 1e-9);
        assert!((extent.maxy - 47.9).abs() < 1e-9);
    }

    #[test]
    fn test_read_tile_values() {
        let builder = GeoTiffBuilder::new(300, 300);
        let cog = open(builder.build());

        // Second tile across starts at pixel x=256
        let tile = cog.read_tile(1).unwrap();
        assert_eq!(tile.len(), 256 * 256 * 3);
        let expected = (builder.pixel)(256 + 10, 5);
        let at = (5 * 256 + 10) * 3;
        assert_eq!(&tile[at..at + 3], &[f32::from(expected[0]), f32::from(expected[1]), f32::from(expected[2])]);
    }

    #[test]
    fn test_deflate_matches_uncompressed() {
        let plain = open(GeoTiffBuilder::new(200, 200).build());
        let deflated = open(GeoTiffBuilder::new(200, 200).with_deflate().build());
        assert_eq!(deflated.metadata.compression, Compression::Deflate);
        assert_eq!(plain.read_tile(0).unwrap(), deflated.read_tile(0).unwrap());
    }

    #[test]
    fn test_overview_tile_is_downsampled() {
        let builder = GeoTiffBuilder::new(512, 512).with_overview();
        let cog = open(builder.build());
        let tile = cog.read_overview_tile(0, 0).unwrap();

        // Overview pixel (3, 7) samples full-resolution pixel (6, 14)
        let expected = (builder.pixel)(6, 14);
        let at = (7 * 256 + 3) * 3;
        assert_eq!(tile[at], f32::from(expected[0]));
        assert!(cog.read_overview_tile(1, 0).is_err());
    }

    #[test]
    fn test_tile_index_out_of_range() {
        let cog = open(GeoTiffBuilder::new(100, 100).build());
        assert!(cog.read_tile(1).is_err());
    }

    #[test]
    fn test_best_overview_selection() {
        let mut cog = open(GeoTiffBuilder::new(1024, 1024).with_overview().build());
        let ovr = cog.overviews[0].clone();
        cog.overviews.push(OverviewMetadata { scale_x: 4.0, scale_y: 4.0, ..ovr.clone() });
        cog.overviews.push(OverviewMetadata { scale_x: 8.0, scale_y: 8.0, ..ovr });

        // Close to 1:1 keeps full resolution
        assert_eq!(cog.best_overview_for_resolution(300.0, 300.0, 256), None);
        // Needed 2.5 -> 2x
        assert_eq!(cog.best_overview_for_resolution(640.0, 100.0, 256), Some(0));
        // Needed 5 -> 4x
        assert_eq!(cog.best_overview_for_resolution(1280.0, 1280.0, 256), Some(1));
        // Needed 100 -> coarsest
        assert_eq!(cog.best_overview_for_resolution(25_600.0, 25_600.0, 256), Some(2));
    }

    #[test]
    fn test_predictor2_8bit_multiband() {
        // Two RGB pixels, second stored as difference
        let mut data = vec![10, 20, 30, 1, 2, 3];
        apply_predictor(&mut data, 2, 6, 3, 1, true).unwrap();
        assert_eq!(data, vec![10, 20, 30, 11, 22, 33]);
    }

    #[test]
    fn test_predictor2_16bit_carries() {
        // 255 + 1 must carry into the high byte
        let mut data = Vec::new();
        data.extend_from_slice(&255u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        apply_predictor(&mut data, 2, 2, 1, 2, true).unwrap();
        assert_eq!(u16::from_le_bytes([data[2], data[3]]), 256);

        let mut data = Vec::new();
        data.extend_from_slice(&255u16.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        apply_predictor(&mut data, 2, 2, 1, 2, false).unwrap();
        assert_eq!(u16::from_be_bytes([data[2], data[3]]), 256);
    }

    #[test]
    fn test_predictor2_rows_are_independent() {
        let mut data = vec![5, 1, 7, 1];
        apply_predictor(&mut data, 2, 2, 1, 1, true).unwrap();
        assert_eq!(data, vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_predictor3_float32() {
        let values = [1.5f32, -2.25, 100.0];
        // Encode: shuffle big-endian byte planes, then difference
        let n = values.len();
        let mut encoded = vec![0u8; n * 4];
        for (i, v) in values.iter().enumerate() {
            for (b, byte) in v.to_be_bytes().iter().enumerate() {
                encoded[b * n + i] = *byte;
            }
        }
        for i in (1..encoded.len()).rev() {
            encoded[i] = encoded[i].wrapping_sub(encoded[i - 1]);
        }

        apply_predictor(&mut encoded, 3, n, 1, 4, true).unwrap();
        assert_eq!(convert_to_f32(&encoded, CogDataType::Float32, true), values.to_vec());
    }

    #[test]
    fn test_convert_to_f32_endianness() {
        let le = 1000u16.to_le_bytes();
        let be = 1000u16.to_be_bytes();
        assert_eq!(convert_to_f32(&le, CogDataType::UInt16, true), vec![1000.0]);
        assert_eq!(convert_to_f32(&be, CogDataType::UInt16, false), vec![1000.0]);
        assert_eq!(convert_to_f32(&[0xFF], CogDataType::Int8, true), vec![-1.0]);
    }
}
