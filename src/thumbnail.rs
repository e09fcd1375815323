use crate::verify::VerifyError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// URL prefix of images hosted on Wikimedia Commons
pub const COMMONS_PREFIX: &str = "https://upload.wikimedia.org/wikipedia/commons/";

/// MediaWiki API used to look up thumbnails of images hosted elsewhere
pub const THUMBNAIL_API_URL: &str = "https://en.wikipedia.org/w/api.php";

/// Which URL a candidate's pixels are checked at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationTarget {
    /// The image is small enough to fetch as is
    Original(String),
    /// Commons thumbnail derived from the image URL
    Thumbnail(String),
    /// The thumbnail URL must be looked up through a [`ThumbnailResolver`]
    Lookup { width: u32 },
}

/// Final path segment of a URL
pub fn file_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// Derive the Commons thumbnail URL for an image, or `None` for images not on Commons.
///
/// `https://upload.wikimedia.org/wikipedia/commons/a/ab/Foo.png` at width 100 becomes
/// `https://upload.wikimedia.org/wikipedia/commons/thumb/a/ab/Foo.png/100px-Foo.png`.
pub fn derive_thumbnail_url(image_url: &str, width: u32) -> Option<String> {
    let url = match image_url.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => image_url.to_string(),
    };
    let path = url.strip_prefix(COMMONS_PREFIX)?;
    let name = file_name(path);
    if name.is_empty() {
        return None;
    }
    let subdirs = &path[..path.len() - name.len()];
    Some(format!("{COMMONS_PREFIX}thumb/{subdirs}{name}/{width}px-{name}"))
}

/// Pick how a candidate of the given width gets verified
pub fn verification_target(image_url: &str, image_width: u32, thumbnail_width: u32) -> VerificationTarget {
    if image_width <= thumbnail_width {
        return VerificationTarget::Original(image_url.to_string());
    }
    match derive_thumbnail_url(image_url, thumbnail_width) {
        Some(url) => VerificationTarget::Thumbnail(url),
        None => VerificationTarget::Lookup {
            width: thumbnail_width,
        },
    }
}

/// Resolves a thumbnail URL that cannot be derived from the image URL alone
#[async_trait]
pub trait ThumbnailResolver: Send + Sync {
    async fn resolve(&self, image_url: &str, width: u32) -> Result<String, VerifyError>;
}

/// Pull the thumbnail URL out of an `imageinfo` query response
pub fn parse_thumbnail_response(response: &Value) -> Option<String> {
    let pages = response.pointer("/query/pages")?.as_object()?;
    pages.values().find_map(|page| {
        page.pointer("/imageinfo/0/thumburl")
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

/// [`ThumbnailResolver`] backed by the MediaWiki `imageinfo` API
#[derive(Debug, Clone)]
pub struct WikimediaApiResolver {
    client: reqwest::Client,
    api_url: String,
}

impl WikimediaApiResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_api_url(client, THUMBNAIL_API_URL)
    }

    pub fn with_api_url(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }
}

#[async_trait]
impl ThumbnailResolver for WikimediaApiResolver {
    async fn resolve(&self, image_url: &str, width: u32) -> Result<String, VerifyError> {
        let title = format!("File:{}", file_name(image_url));
        let width = width.to_string();
        debug!("Looking up {} at width {}", title, width);

        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("prop", "imageinfo"),
                ("titles", title.as_str()),
                ("iiurlwidth", width.as_str()),
                ("iiprop", "url"),
            ])
            .send()
            .await
            .map_err(|source| VerifyError::from_transport(&self.api_url, source))?;
        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::Status {
                status: status.as_u16(),
                url: self.api_url.clone(),
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|source| VerifyError::from_transport(&self.api_url, source))?;
        parse_thumbnail_response(&body).ok_or_else(|| VerifyError::Lookup {
            url: image_url.to_string(),
            reason: "response carries no thumbnail URL".to_string(),
        })
    }
}
