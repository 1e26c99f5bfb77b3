//! Range-based reader interface for COG files
//!
//! COGs are designed to be read via HTTP Range requests: the header, the IFDs
//! and each internal tile are fetched as separate byte ranges so a map tile
//! never downloads the whole file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use tracing::debug;

use crate::error::AnyResult;

/// Trait for reading byte ranges from any source
pub trait RangeReader: Send + Sync {
    /// Read up to `length` bytes starting at `offset`.
    ///
    /// Reads that run past the end of the source return the available bytes.
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>>;

    /// Total size of the source in bytes, when known
    fn size(&self) -> Option<u64>;

    /// Human-readable identifier for this source (for logging/errors)
    fn identifier(&self) -> &str;
}

/// How client-supplied raster sources may be opened.
#[derive(Debug, Clone, Copy)]
pub struct SourceOptions {
    /// Timeout applied to every HTTP request against the source
    pub timeout: Duration,
    /// Accept plain filesystem paths in addition to http(s) URLs
    pub allow_local: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
            allow_local: false,
        }
    }
}

/// Local file range reader
pub struct LocalRangeReader {
    path: PathBuf,
    display: String,
    size: u64,
}

impl LocalRangeReader {
    pub fn new(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path)?;
        Ok(Self {
            display: path.to_string_lossy().into_owned(),
            path,
            size: metadata.len(),
        })
    }
}

impl RangeReader for LocalRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        if offset >= self.size {
            return Err(format!("Offset {offset} is past the end of {}", self.display).into());
        }
        let available = (self.size - offset).min(length as u64) as usize;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; available];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn identifier(&self) -> &str {
        &self.display
    }
}

/// In-memory range reader, mainly for tests and pre-fetched data
pub struct MemoryRangeReader {
    data: Vec<u8>,
    name: String,
}

impl MemoryRangeReader {
    pub fn new(data: Vec<u8>, name: impl Into<String>) -> Self {
        Self {
            data,
            name: name.into(),
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        let start = usize::try_from(offset)?;
        if start >= self.data.len() {
            return Err(format!("Offset {offset} is past the end of {}", self.name).into());
        }
        let end = start.saturating_add(length).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn identifier(&self) -> &str {
        &self.name
    }
}

/// HTTP range reader for remote COG files.
///
/// Uses the blocking reqwest client; callers in async code run it on the
/// blocking thread pool.
pub struct HttpRangeReader {
    url: String,
    /// Learned from the `Content-Range` of the first 206 reply
    size: OnceLock<u64>,
    client: reqwest::blocking::Client,
}

impl HttpRangeReader {
    /// Build a reader without touching the network. Sources that refuse HEAD
    /// but serve ranged GETs (presigned object-store URLs) stay readable.
    pub fn new(url: &str, timeout: Duration) -> AnyResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            url: url.to_string(),
            size: OnceLock::new(),
            client,
        })
    }
}

/// Total length from a `Content-Range: bytes <start>-<end>/<total>` value
fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().strip_prefix("bytes ")?.rsplit_once('/')?;
    total.trim().parse().ok()
}

impl RangeReader for HttpRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> AnyResult<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + length as u64 - 1);
        let response = self.client
            .get(&self.url)
            .header(RANGE, range)
            .send()?;

        let status = response.status();
        if status == StatusCode::OK {
            // The server ignored the Range header and is sending the whole file
            return Err("Server does not support HTTP Range requests".into());
        }
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(format!("HTTP range request failed: {status}").into());
        }
        match response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
        {
            Some(total) => {
                if self.size.set(total).is_ok() {
                    debug!(url = %self.url, size = total, "Remote raster size");
                }
            }
            None => debug!(url = %self.url, "206 response without a usable Content-Range"),
        }

        let mut bytes = response.bytes()?.to_vec();
        bytes.truncate(length);
        Ok(bytes)
    }

    fn size(&self) -> Option<u64> {
        self.size.get().copied()
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

/// Create a range reader for a client-supplied source.
///
/// `http://` and `https://` URLs are always accepted. Filesystem paths are
/// accepted only when `options.allow_local` is set; every other scheme is rejected.
pub fn create_range_reader(source: &str, options: &SourceOptions) -> AnyResult<Arc<dyn RangeReader>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        url::Url::parse(source)?;
        return Ok(Arc::new(HttpRangeReader::new(source, options.timeout)?));
    }

    if source.contains("://") {
        return Err(format!("Unsupported raster URL scheme in '{source}'").into());
    }

    if options.allow_local {
        let path = source.strip_prefix("file:").unwrap_or(source);
        return Ok(Arc::new(LocalRangeReader::new(path)?));
    }

    Err("Raster source must be an http(s) URL".into())
}
