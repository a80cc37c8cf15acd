//! Error types for the weighticket-extract library.
//!
//! Two distinct shapes reflect two distinct failure policies:
//!
//! * [`ReceiptError`] (**fatal**): the run cannot continue, for example when
//!   the source file is unreachable or the model reply is unusable. Returned
//!   as `Err(ReceiptError)` from [`crate::job::JobRunner`] and
//!   [`crate::network::Network::run`].
//!
//! * [`SaveFailure`] (**recoverable**): the store write or the metering call
//!   failed. The persistence agent folds it into a
//!   [`crate::agents::SaveResult`] instead of propagating it, so the network
//!   can offer the save step again on its next tick.

use thiserror::Error;

/// All fatal errors returned by the weighticket-extract library.
#[derive(Debug, Error)]
pub enum ReceiptError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The source URL is not an HTTP/HTTPS URL.
    #[error("Invalid source '{input}': not a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// The file could not be fetched or the server answered non-2xx.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// Downloaded body exceeds `max_document_bytes`.
    #[error("Document at '{url}' is {size} bytes, above the {limit} byte limit")]
    DocumentTooLarge { url: String, size: usize, limit: usize },

    // ── Format errors ─────────────────────────────────────────────────────
    /// Bytes carry none of the PDF, PNG or JPEG signatures.
    #[error("Unsupported document format, first bytes: {magic:02x?}")]
    UnsupportedFormat { magic: Vec<u8> },

    /// Image bytes had a valid signature but could not be decoded or wrapped.
    #[error("Failed to embed {format} image into a PDF page: {detail}")]
    EmbedFailed { format: String, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API returned a non-retryable error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// HTTP 429 from the inference provider.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimitExceeded {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// Inference call did not finish within `api_timeout_secs`.
    #[error("Inference call timed out after {elapsed_ms}ms")]
    ApiTimeout { elapsed_ms: u64 },

    /// 401/403 from the inference provider.
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    /// The model replied, but not with the expected JSON object.
    #[error("Model reply is not a valid weigh-ticket record: {detail}")]
    InvalidResponse { detail: String },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The receipt store rejected or failed the write.
    #[error("Failed to save receipt '{receipt_id}': {reason}")]
    PersistenceFailed { receipt_id: String, reason: String },

    /// The usage metering call failed.
    #[error("Failed to record usage event '{event}': {reason}")]
    MeteringFailed { event: String, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReceiptError {
    /// True for failures to obtain the source bytes.
    pub fn is_download_error(&self) -> bool {
        matches!(
            self,
            ReceiptError::InvalidInput { .. }
                | ReceiptError::DownloadFailed { .. }
                | ReceiptError::DownloadTimeout { .. }
                | ReceiptError::DocumentTooLarge { .. }
        )
    }

    /// True for failures at the LLM boundary, including unusable replies.
    pub fn is_inference_error(&self) -> bool {
        matches!(
            self,
            ReceiptError::ProviderNotConfigured { .. }
                | ReceiptError::LlmApiError { .. }
                | ReceiptError::RateLimitExceeded { .. }
                | ReceiptError::ApiTimeout { .. }
                | ReceiptError::AuthError { .. }
                | ReceiptError::InvalidResponse { .. }
        )
    }
}

/// A recoverable failure of the persistence step.
///
/// Carried in the error arm of [`crate::agents::SaveResult`]; the network
/// never sees it as an `Err`.
#[derive(Debug, Clone, Error, serde::Serialize)]
#[error("Save of receipt '{receipt_id}' failed: {reason}")]
pub struct SaveFailure {
    pub receipt_id: String,
    pub reason: String,
}

impl SaveFailure {
    pub fn new(receipt_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            receipt_id: receipt_id.into(),
            reason: reason.into(),
        }
    }
}

impl From<(&str, ReceiptError)> for SaveFailure {
    fn from((receipt_id, err): (&str, ReceiptError)) -> Self {
        SaveFailure::new(receipt_id, err.to_string())
    }
}
