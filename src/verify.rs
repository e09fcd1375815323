use async_trait::async_trait;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

/// Failure to verify one candidate
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("HTTP 404 for {url}")]
    NotFound { url: String },
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("verification of {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("could not decode PNG from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("thumbnail lookup failed for {url}: {reason}")]
    Lookup { url: String, reason: String },
}

impl VerifyError {
    pub(crate) fn from_transport(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return VerifyError::Timeout {
                url: url.to_string(),
            };
        }
        VerifyError::Transport {
            url: url.to_string(),
            source,
        }
    }

    /// Dead links and timeouts are expected in the dataset; anything else hints at a
    /// problem on this side
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VerifyError::NotFound { .. } | VerifyError::Timeout { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            VerifyError::NotFound { .. } => Some(404),
            VerifyError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Outcome of checking an image for transparency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    /// The image is stored as RGBA
    pub has_four_channels: bool,
    /// At least one pixel is (semi-)transparent
    pub uses_alpha: bool,
}

impl Verdict {
    pub fn accepted(&self) -> bool {
        self.has_four_channels && self.uses_alpha
    }
}

/// Checks an image URL for alpha transparency
#[async_trait]
pub trait VisualVerifier: Send + Sync {
    async fn verify(&self, url: &str) -> Result<Verdict, VerifyError>;
}

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Signature + IHDR length, type, 13 data bytes and CRC
pub const IHDR_END: usize = 33;

const COLOR_TYPE_RGBA: u8 = 6;

/// The fields of a PNG's IHDR chunk that matter here
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngHeader {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
}

impl PngHeader {
    /// Parse from the first bytes of a PNG file
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < 29 {
            return Err(format!("need 29 header bytes, got {}", bytes.len()));
        }
        if bytes[..8] != PNG_SIGNATURE {
            return Err("missing PNG signature".to_string());
        }
        if &bytes[12..16] != b"IHDR" {
            return Err("first chunk is not IHDR".to_string());
        }
        let be_u32 = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Ok(Self {
            width: be_u32(16),
            height: be_u32(20),
            bit_depth: bytes[24],
            color_type: bytes[25],
        })
    }

    pub fn is_rgba(&self) -> bool {
        self.color_type == COLOR_TYPE_RGBA
    }
}

/// Decode a PNG and report whether any pixel has partial transparency.
///
/// With `semitransparent_only` fully transparent pixels do not count; otherwise any
/// alpha below the maximum does. Non-RGBA images never count.
pub fn has_transparency(png_bytes: &[u8], semitransparent_only: bool) -> Result<bool, String> {
    let mut decoder = png::Decoder::new(png_bytes);
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info().map_err(|e| e.to_string())?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf).map_err(|e| e.to_string())?;
    if info.color_type != png::ColorType::Rgba {
        return Ok(false);
    }
    let data = &buf[..info.buffer_size()];
    let counts = |alpha: u32, max: u32| {
        if semitransparent_only {
            alpha > 0 && alpha < max
        } else {
            alpha < max
        }
    };
    Ok(match info.bit_depth {
        png::BitDepth::Sixteen => data
            .chunks_exact(8)
            .any(|px| counts(u32::from(u16::from_be_bytes([px[6], px[7]])), 0xFFFF)),
        _ => data.chunks_exact(4).any(|px| counts(u32::from(px[3]), 0xFF)),
    })
}

/// [`VisualVerifier`] that fetches images over HTTP.
///
/// A ranged request for the header comes first so that images without an alpha channel
/// are rejected after a few dozen bytes; only RGBA images are downloaded in full.
#[derive(Debug, Clone)]
pub struct HttpPngVerifier {
    client: reqwest::Client,
    semitransparent_only: bool,
}

impl HttpPngVerifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            semitransparent_only: true,
        }
    }

    /// Whether fully transparent pixels are ignored (only partial alpha counts)
    pub fn with_semitransparent_only(mut self, semitransparent_only: bool) -> Self {
        self.semitransparent_only = semitransparent_only;
        self
    }

    pub fn semitransparent_only(&self) -> bool {
        self.semitransparent_only
    }

    /// GET `url`, returning the body and whether the server honoured the range
    async fn fetch(&self, url: &str, range: Option<&str>) -> Result<(Vec<u8>, bool), VerifyError> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        let response = request
            .send()
            .await
            .map_err(|source| VerifyError::from_transport(url, source))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(VerifyError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(VerifyError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let partial = status == StatusCode::PARTIAL_CONTENT;
        let body = response
            .bytes()
            .await
            .map_err(|source| VerifyError::from_transport(url, source))?;
        Ok((body.to_vec(), partial))
    }
}

#[async_trait]
impl VisualVerifier for HttpPngVerifier {
    async fn verify(&self, url: &str) -> Result<Verdict, VerifyError> {
        let range = format!("bytes=0-{}", IHDR_END - 1);
        let (head, partial) = self.fetch(url, Some(&range)).await?;
        let header = PngHeader::parse(&head).map_err(|reason| VerifyError::Decode {
            url: url.to_string(),
            reason,
        })?;
        if !header.is_rgba() {
            debug!("{} has colour type {}, no alpha channel", url, header.color_type);
            return Ok(Verdict::default());
        }

        let body = if partial { self.fetch(url, None).await?.0 } else { head };
        let semitransparent_only = self.semitransparent_only;
        // WHY: decoding is CPU-bound; keep it off the async workers
        let uses_alpha = tokio::task::spawn_blocking(move || has_transparency(&body, semitransparent_only))
            .await
            .map_err(|e| VerifyError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            })?
            .map_err(|reason| VerifyError::Decode {
                url: url.to_string(),
                reason,
            })?;
        Ok(Verdict {
            has_four_channels: true,
            uses_alpha,
        })
    }
}
