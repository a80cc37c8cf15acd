//! Input resolution: fetch the source file and decide what it really is.
//!
//! The uploader's MIME type and the URL extension are hints only. Stored
//! files are frequently served as `application/octet-stream`, or renamed by
//! the user, so the format is read from the leading bytes.

use crate::error::ReceiptError;
use std::time::Duration;
use tracing::{debug, info, warn};

const PDF_MAGIC: &[u8] = b"%PDF";
const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
const JPEG_MAGIC: &[u8] = &[0xff, 0xd8, 0xff];

/// Source formats the normalizer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Pdf,
    Png,
    Jpeg,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Png => "png",
            SourceFormat::Jpeg => "jpeg",
        }
    }
}

/// A downloaded source file.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub bytes: Vec<u8>,
    /// `Content-Type` header as served, for logging only.
    pub content_type: Option<String>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Identify the format from the leading bytes.
///
/// PDF and PNG are matched on their full signatures; JPEG on the SOI marker
/// followed by a segment marker.
pub fn sniff_format(bytes: &[u8]) -> Result<SourceFormat, ReceiptError> {
    if bytes.starts_with(PDF_MAGIC) {
        Ok(SourceFormat::Pdf)
    } else if bytes.starts_with(PNG_MAGIC) {
        Ok(SourceFormat::Png)
    } else if bytes.starts_with(JPEG_MAGIC) {
        Ok(SourceFormat::Jpeg)
    } else {
        Err(ReceiptError::UnsupportedFormat {
            magic: bytes.iter().take(8).copied().collect(),
        })
    }
}

/// True when the hint or the URL path says PDF.
///
/// Only consulted in [`crate::config::DocumentSourceMode::RemoteUrl`] mode.
pub fn is_pdf_like(mime_hint: Option<&str>, url: &str) -> bool {
    if mime_hint.is_some_and(|m| m.to_ascii_lowercase().contains("pdf")) {
        return true;
    }
    file_name_from_url(url).is_some_and(|name| name.to_ascii_lowercase().ends_with(".pdf"))
}

/// Build the shared HTTP client used for downloads.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ReceiptError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ReceiptError::Internal(format!("Failed to build HTTP client: {e}")))
}

/// Download `url` into memory.
///
/// Any 2xx status is accepted regardless of `Content-Type`. Non-2xx
/// responses fail with [`ReceiptError::DownloadFailed`] carrying the status.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    timeout_secs: u64,
    max_bytes: usize,
) -> Result<Downloaded, ReceiptError> {
    if !is_url(url) {
        return Err(ReceiptError::InvalidInput {
            input: url.to_string(),
        });
    }
    info!("Downloading source file from: {}", url);

    let map_transport = |e: reqwest::Error| {
        if e.is_timeout() {
            ReceiptError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ReceiptError::DownloadFailed {
                url: url.to_string(),
                status: None,
                reason: e.to_string(),
            }
        }
    };

    let response = client
        .get(url)
        .timeout(Duration::from_secs(timeout_secs))
        .send()
        .await
        .map_err(map_transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(ReceiptError::DownloadFailed {
            url: url.to_string(),
            status: Some(status.as_u16()),
            reason: format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )
            .trim_end()
            .to_string(),
        });
    }

    if let Some(len) = response.content_length() {
        if len as usize > max_bytes {
            return Err(ReceiptError::DocumentTooLarge {
                url: url.to_string(),
                size: len as usize,
                limit: max_bytes,
            });
        }
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = response.bytes().await.map_err(map_transport)?;
    if bytes.len() > max_bytes {
        return Err(ReceiptError::DocumentTooLarge {
            url: url.to_string(),
            size: bytes.len(),
            limit: max_bytes,
        });
    }
    if bytes.is_empty() {
        warn!("Empty body downloaded from {}", url);
    }

    debug!(
        "Downloaded {} bytes (content-type: {})",
        bytes.len(),
        content_type.as_deref().unwrap_or("none")
    );

    Ok(Downloaded {
        bytes: bytes.to_vec(),
        content_type,
    })
}

/// Last path segment of the URL when it looks like a file name.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    (!last.is_empty() && last.contains('.')).then(|| last.to_string())
}
