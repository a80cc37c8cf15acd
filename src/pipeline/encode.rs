//! Canonical document construction: source URL → base64 PDF for the model.
//!
//! Every document that reaches inference is a PDF: either the original file
//! (verified by its `%PDF` signature) or a one-page PDF synthesised around
//! the scanned image. Nothing else is ever sent.

use crate::config::{DocumentSourceMode, ExtractionConfig};
use crate::error::ReceiptError;
use crate::pipeline::embed::image_to_pdf;
use crate::pipeline::input::{self, SourceFormat};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info, warn};

/// Media type of every canonical document.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// A document in the only form inference accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalDocument {
    /// The provider fetches the PDF itself.
    RemoteUrl { url: String },
    /// Base64-encoded PDF bytes.
    InlinePdf { data: String },
}

impl CanonicalDocument {
    /// Wrap PDF bytes; the caller guarantees the `%PDF` signature.
    pub fn from_pdf_bytes(bytes: &[u8]) -> Self {
        let data = STANDARD.encode(bytes);
        debug!("Encoded PDF → {} bytes base64", data.len());
        CanonicalDocument::InlinePdf { data }
    }

    /// Always `application/pdf`.
    pub fn media_type(&self) -> &'static str {
        PDF_MEDIA_TYPE
    }

    /// Decoded PDF bytes for inline documents.
    pub fn pdf_bytes(&self) -> Option<Vec<u8>> {
        match self {
            CanonicalDocument::InlinePdf { data } => STANDARD.decode(data).ok(),
            CanonicalDocument::RemoteUrl { .. } => None,
        }
    }
}

/// Outcome of normalisation, with what was learned about the source.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub document: CanonicalDocument,
    /// `None` when the document was passed by reference without download.
    pub detected: Option<SourceFormat>,
    pub source_bytes: usize,
}

/// Normalise `url` into a [`CanonicalDocument`].
///
/// In [`DocumentSourceMode::Inline`] the file is always downloaded and the
/// byte signature decides; the MIME hint and `Content-Type` are only logged.
pub async fn build_document(
    client: &reqwest::Client,
    url: &str,
    mime_hint: Option<&str>,
    config: &ExtractionConfig,
) -> Result<NormalizedDocument, ReceiptError> {
    if config.document_source == DocumentSourceMode::RemoteUrl && input::is_pdf_like(mime_hint, url)
    {
        if !input::is_url(url) {
            return Err(ReceiptError::InvalidInput {
                input: url.to_string(),
            });
        }
        debug!("PDF-like source passed by reference: {}", url);
        return Ok(NormalizedDocument {
            document: CanonicalDocument::RemoteUrl {
                url: url.to_string(),
            },
            detected: None,
            source_bytes: 0,
        });
    }

    let downloaded = input::download(
        client,
        url,
        config.download_timeout_secs,
        config.max_document_bytes,
    )
    .await?;
    let format = input::sniff_format(&downloaded.bytes)?;

    let claimed = mime_hint.or(downloaded.content_type.as_deref());
    if let Some(claimed) = claimed {
        if !claimed_matches(claimed, format) {
            warn!(
                "Source claims '{}' but bytes are {}; trusting the bytes",
                claimed,
                format.as_str()
            );
        }
    }

    let document = match format {
        SourceFormat::Pdf => CanonicalDocument::from_pdf_bytes(&downloaded.bytes),
        SourceFormat::Png | SourceFormat::Jpeg => {
            let bytes = downloaded.bytes.clone();
            let pdf = tokio::task::spawn_blocking(move || image_to_pdf(&bytes, format))
                .await
                .map_err(|e| ReceiptError::Internal(format!("Embed task panicked: {e}")))??;
            CanonicalDocument::from_pdf_bytes(&pdf)
        }
    };

    info!(
        "Normalised {} source ({} bytes) into a PDF document",
        format.as_str(),
        downloaded.bytes.len()
    );

    Ok(NormalizedDocument {
        document,
        detected: Some(format),
        source_bytes: downloaded.bytes.len(),
    })
}

/// Whether a claimed MIME type agrees with the sniffed format.
/// Generic types (`application/octet-stream`, ...) never disagree.
fn claimed_matches(claimed: &str, format: SourceFormat) -> bool {
    let claimed = claimed.to_ascii_lowercase();
    let specific = ["pdf", "png", "jpeg", "jpg"]
        .iter()
        .any(|k| claimed.contains(k));
    if !specific {
        return true;
    }
    match format {
        SourceFormat::Pdf => claimed.contains("pdf"),
        SourceFormat::Png => claimed.contains("png"),
        SourceFormat::Jpeg => claimed.contains("jpeg") || claimed.contains("jpg"),
    }
}
