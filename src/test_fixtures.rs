//! Synthetic tiled GeoTIFF writer for tests.
//!
//! Produces little-endian, 8-bit RGB, chunky COG-style files: tile data
//! first, then the full-resolution IFD, then an optional 2x overview IFD.
//! Also serves byte ranges over HTTP the way object stores do.
//! Shared with the integration tests through `#[path]`, so it depends on
//! nothing inside the crate.

#![allow(dead_code)]

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_DOUBLE: u16 = 12;

/// Default raster: 0.5 x 0.5 degrees over Seattle at 512 px per half degree
pub const DEFAULT_ORIGIN: (f64, f64) = (-122.5, 47.9);
pub const DEFAULT_PIXEL_SIZE: f64 = 0.5 / 512.0;

/// Gradient that never produces the nodata value 0
pub fn gradient(x: u32, y: u32) -> [u8; 3] {
    [
        (x % 250 + 1) as u8,
        (y % 250 + 1) as u8,
        ((x + y) % 250 + 1) as u8,
    ]
}

/// Columns left of x=256 are nodata, the rest is a gradient
pub fn left_nodata(x: u32, y: u32) -> [u8; 3] {
    if x < 256 { [0, 0, 0] } else { gradient(x, y) }
}

#[derive(Clone)]
pub struct GeoTiffBuilder {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    /// Top-left corner in CRS units
    pub origin: (f64, f64),
    pub pixel_size: f64,
    pub epsg: u16,
    pub nodata: Option<String>,
    pub deflate: bool,
    pub overview: bool,
    /// Full-resolution pixel values
    pub pixel: fn(u32, u32) -> [u8; 3],
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    data: Vec<u8>,
}

impl Entry {
    fn shorts(tag: u16, values: &[u16]) -> Self {
        Self {
            tag,
            field_type: TYPE_SHORT,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn longs(tag: u16, values: &[u32]) -> Self {
        Self {
            tag,
            field_type: TYPE_LONG,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn doubles(tag: u16, values: &[f64]) -> Self {
        Self {
            tag,
            field_type: TYPE_DOUBLE,
            count: values.len() as u32,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    fn ascii(tag: u16, text: &str) -> Self {
        let mut data = text.as_bytes().to_vec();
        data.push(0);
        Self {
            tag,
            field_type: TYPE_ASCII,
            count: data.len() as u32,
            data,
        }
    }
}

impl GeoTiffBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile_size: 256,
            origin: DEFAULT_ORIGIN,
            pixel_size: DEFAULT_PIXEL_SIZE,
            epsg: 4326,
            nodata: Some("0".to_string()),
            deflate: false,
            overview: false,
            pixel: gradient,
        }
    }

    pub fn with_overview(mut self) -> Self {
        self.overview = true;
        self
    }

    pub fn with_deflate(mut self) -> Self {
        self.deflate = true;
        self
    }

    pub fn with_pixels(mut self, pixel: fn(u32, u32) -> [u8; 3]) -> Self {
        self.pixel = pixel;
        self
    }

    pub fn with_georef(mut self, epsg: u16, origin: (f64, f64), pixel_size: f64) -> Self {
        self.epsg = epsg;
        self.origin = origin;
        self.pixel_size = pixel_size;
        self
    }

    pub fn without_nodata(mut self) -> Self {
        self.nodata = None;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![b'I', b'I', 42, 0, 0, 0, 0, 0];

        let full = self.write_tiles(&mut out, self.width, self.height, 1);
        let overview = self.overview.then(|| {
            let (w, h) = (self.width.div_ceil(2), self.height.div_ceil(2));
            (w, h, self.write_tiles(&mut out, w, h, 2))
        });

        pad_even(&mut out);
        let first_ifd = out.len() as u32;
        out[4..8].copy_from_slice(&first_ifd.to_le_bytes());

        let entries = self.main_entries(&full);
        let next_ptr = write_ifd(&mut out, entries);

        if let Some((w, h, chunks)) = overview {
            pad_even(&mut out);
            let at = out.len() as u32;
            out[next_ptr..next_ptr + 4].copy_from_slice(&at.to_le_bytes());
            let entries = self.overview_entries(w, h, &chunks);
            write_ifd(&mut out, entries);
        }

        out
    }

    /// Append every tile of a `width` x `height` level; returns (offsets, byte counts)
    fn write_tiles(&self, out: &mut Vec<u8>, width: u32, height: u32, step: u32) -> (Vec<u32>, Vec<u32>) {
        let ts = self.tile_size;
        let mut offsets = Vec::new();
        let mut counts = Vec::new();

        for row in 0..height.div_ceil(ts) {
            for col in 0..width.div_ceil(ts) {
                let mut raw = Vec::with_capacity((ts * ts * 3) as usize);
                for ty in 0..ts {
                    for tx in 0..ts {
                        let (px, py) = (col * ts + tx, row * ts + ty);
                        if px < width && py < height {
                            raw.extend_from_slice(&(self.pixel)(px * step, py * step));
                        } else {
                            raw.extend_from_slice(&[0, 0, 0]);
                        }
                    }
                }

                let bytes = if self.deflate {
                    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                    encoder.write_all(&raw).unwrap();
                    encoder.finish().unwrap()
                } else {
                    raw
                };

                pad_even(out);
                offsets.push(out.len() as u32);
                counts.push(bytes.len() as u32);
                out.extend_from_slice(&bytes);
            }
        }

        (offsets, counts)
    }

    fn layout_entries(&self, width: u32, height: u32, chunks: &(Vec<u32>, Vec<u32>), subfile: u32) -> Vec<Entry> {
        let compression = if self.deflate { 8 } else { 1 };
        vec![
            Entry::longs(254, &[subfile]),
            Entry::longs(256, &[width]),
            Entry::longs(257, &[height]),
            Entry::shorts(258, &[8, 8, 8]),
            Entry::shorts(259, &[compression]),
            Entry::shorts(262, &[2]),
            Entry::shorts(277, &[3]),
            Entry::shorts(284, &[1]),
            Entry::shorts(322, &[self.tile_size as u16]),
            Entry::shorts(323, &[self.tile_size as u16]),
            Entry::longs(324, &chunks.0),
            Entry::longs(325, &chunks.1),
            Entry::shorts(339, &[1, 1, 1]),
        ]
    }

    fn main_entries(&self, chunks: &(Vec<u32>, Vec<u32>)) -> Vec<Entry> {
        let mut entries = self.layout_entries(self.width, self.height, chunks, 0);
        entries.push(Entry::doubles(33550, &[self.pixel_size, self.pixel_size, 0.0]));
        entries.push(Entry::doubles(
            33922,
            &[0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0],
        ));

        let (model_type, crs_key) = if self.epsg == 4326 { (2, 2048) } else { (1, 3072) };
        entries.push(Entry::shorts(
            34735,
            &[1, 1, 0, 3, 1024, 0, 1, model_type, 1025, 0, 1, 1, crs_key, 0, 1, self.epsg],
        ));

        if let Some(nodata) = &self.nodata {
            entries.push(Entry::ascii(42113, nodata));
        }
        entries
    }

    fn overview_entries(&self, width: u32, height: u32, chunks: &(Vec<u32>, Vec<u32>)) -> Vec<Entry> {
        let mut entries = self.layout_entries(width, height, chunks, 1);
        if let Some(nodata) = &self.nodata {
            entries.push(Entry::ascii(42113, nodata));
        }
        entries
    }
}

fn pad_even(out: &mut Vec<u8>) {
    if out.len() % 2 == 1 {
        out.push(0);
    }
}

/// Write an IFD with its out-of-line values; returns the position of its next-IFD pointer
fn write_ifd(out: &mut Vec<u8>, entries: Vec<Entry>) -> usize {
    let start = out.len();
    let values_start = start + 2 + entries.len() * 12 + 4;
    let mut values = Vec::new();

    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.tag.to_le_bytes());
        out.extend_from_slice(&entry.field_type.to_le_bytes());
        out.extend_from_slice(&entry.count.to_le_bytes());
        if entry.data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..entry.data.len()].copy_from_slice(&entry.data);
            out.extend_from_slice(&inline);
        } else {
            let offset = (values_start + values.len()) as u32;
            out.extend_from_slice(&offset.to_le_bytes());
            values.extend_from_slice(&entry.data);
            pad_even(&mut values);
        }
    }

    let next_ptr = out.len();
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&values);
    next_ptr
}

/// Serve `data` on an ephemeral local port, answering ranged GETs with 206
/// and refusing HEAD with 403 like a presigned object-store URL.
/// Returns the file URL.
pub async fn serve_ranges_without_head(data: Vec<u8>) -> String {
    use std::sync::Arc;

    use axum::http::{HeaderMap, Method, StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;

    async fn ranged(data: Arc<Vec<u8>>, method: Method, headers: HeaderMap) -> Response {
        if method == Method::HEAD {
            return StatusCode::FORBIDDEN.into_response();
        }
        let len = data.len() as u64;
        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(a, b)| Some((a.parse::<u64>().ok()?, b.parse::<u64>().ok()?)));
        let Some((start, end)) = range else {
            return (StatusCode::OK, data.to_vec()).into_response();
        };
        if start >= len {
            return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
        }
        let end = end.min(len - 1);
        (
            StatusCode::PARTIAL_CONTENT,
            [(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))],
            data[start as usize..=end as usize].to_vec(),
        )
            .into_response()
    }

    let data = Arc::new(data);
    let app = axum::Router::new().route(
        "/scene.tif",
        get(move |method: Method, headers: HeaderMap| ranged(data.clone(), method, headers)),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/scene.tif")
}
