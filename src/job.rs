//! Job entry points: one trigger event in, one network run, one receipt id out.
//!
//! ## Why one network per job?
//!
//! Network state carries the completion flag. Sharing it across jobs would
//! let one job's save halt another, so every [`JobRunner::process`] call
//! creates fresh state and drops it afterwards. Batch runs get concurrency
//! by running independent jobs side by side, never by sharing a run.

use crate::agents::{Agent, ExtractionAgent, PersistenceAgent};
use crate::config::ExtractionConfig;
use crate::error::ReceiptError;
use crate::network::{Network, RunOutput};
use crate::pipeline::embed::pdf_page_sizes;
use crate::pipeline::encode::build_document;
use crate::pipeline::input::{http_client, SourceFormat};
use crate::pipeline::llm::resolve_inference;
use crate::prompts::task_prompt;
use crate::store::{ReceiptStore, UsageMeter};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Payload of the trigger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReceiptEvent {
    pub url: String,
    #[serde(rename = "receiptId")]
    pub receipt_id: String,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ProcessReceiptEvent {
    pub fn new(
        url: impl Into<String>,
        receipt_id: impl Into<String>,
        mime_type: Option<String>,
    ) -> Self {
        Self {
            url: url.into(),
            receipt_id: receipt_id.into(),
            mime_type,
        }
    }
}

/// Everything the agents need to know about the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTask {
    pub source_url: String,
    pub receipt_id: String,
    pub mime_type: Option<String>,
    /// Natural-language task given to the network.
    pub prompt: String,
}

impl JobTask {
    pub fn new(
        source_url: impl Into<String>,
        receipt_id: impl Into<String>,
        mime_type: Option<String>,
    ) -> Self {
        let source_url = source_url.into();
        let receipt_id = receipt_id.into();
        let prompt = task_prompt(&source_url, &receipt_id, mime_type.as_deref());
        Self {
            source_url,
            receipt_id,
            mime_type,
            prompt,
        }
    }
}

impl From<&ProcessReceiptEvent> for JobTask {
    fn from(event: &ProcessReceiptEvent) -> Self {
        JobTask::new(&event.url, &event.receipt_id, event.mime_type.clone())
    }
}

/// Outcome of one job in a batch.
#[derive(Debug)]
pub struct JobOutcome {
    pub receipt_id: String,
    pub result: Result<Option<String>, ReceiptError>,
}

/// Runs receipt jobs against a fixed set of collaborators.
pub struct JobRunner {
    network: Network,
    config: ExtractionConfig,
}

impl JobRunner {
    /// Resolve the inference backend and assemble the two-agent network.
    pub fn new(
        config: ExtractionConfig,
        store: Arc<dyn ReceiptStore>,
        meter: Arc<dyn UsageMeter>,
    ) -> Result<Self, ReceiptError> {
        let inference = resolve_inference(&config)?;
        info!("Inference backend: {}", inference.name());

        let agents: Vec<Arc<dyn Agent>> = vec![
            Arc::new(ExtractionAgent::new(inference, config.clone())?),
            Arc::new(PersistenceAgent::new(store, meter)),
        ];
        Ok(Self {
            network: Network::new(agents, &config),
            config,
        })
    }

    /// Wrap an already-built network.
    pub fn with_network(network: Network, config: ExtractionConfig) -> Self {
        Self { network, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Run one job and return the terminal `receipt` value: the job's
    /// receipt id when the save succeeded, `None` otherwise.
    pub async fn process(
        &self,
        event: &ProcessReceiptEvent,
    ) -> Result<Option<String>, ReceiptError> {
        Ok(self.run(event).await?.receipt)
    }

    /// Like [`JobRunner::process`], returning the whole run output.
    pub async fn run(&self, event: &ProcessReceiptEvent) -> Result<RunOutput, ReceiptError> {
        let task = JobTask::from(event);
        info!(
            "Processing receipt {} from {} (mime: {})",
            task.receipt_id,
            task.source_url,
            task.mime_type.as_deref().unwrap_or("unknown")
        );
        self.network.run(&task).await
    }

    /// Run independent jobs concurrently, at most `config.concurrency` at
    /// once. Results come back in input order.
    pub async fn process_batch(&self, events: &[ProcessReceiptEvent]) -> Vec<JobOutcome> {
        let mut outcomes: Vec<(usize, JobOutcome)> = stream::iter(events.iter().enumerate())
            .map(|(idx, event)| async move {
                let result = self.process(event).await;
                if let Err(ref e) = result {
                    warn!("Receipt {} failed: {}", event.receipt_id, e);
                }
                (
                    idx,
                    JobOutcome {
                        receipt_id: event.receipt_id.clone(),
                        result,
                    },
                )
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        outcomes.sort_by_key(|(idx, _)| *idx);
        outcomes.into_iter().map(|(_, o)| o).collect()
    }
}

/// Read trigger events from a JSON-lines file. Blank lines and lines
/// starting with `#` are ignored.
pub async fn load_events(path: impl AsRef<Path>) -> Result<Vec<ProcessReceiptEvent>, ReceiptError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        ReceiptError::InvalidInput {
            input: format!("{}: {e}", path.display()),
        }
    })?;
    parse_events(&text)
}

/// Parse JSON-lines trigger events.
pub fn parse_events(text: &str) -> Result<Vec<ProcessReceiptEvent>, ReceiptError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| ReceiptError::InvalidInput {
                input: format!("event on line {}: {e}", n + 1),
            })
        })
        .collect()
}

/// What normalization found out about a source, without any model call.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub url: String,
    /// `None` when the source would be passed by reference.
    pub detected: Option<SourceFormat>,
    pub source_bytes: usize,
    pub pdf_bytes: usize,
    pub page_count: usize,
    /// Width and height of the first page in points.
    pub first_page_size: Option<(f32, f32)>,
}

/// Run normalization only and describe the resulting PDF.
pub async fn inspect_document(
    url: &str,
    mime_type: Option<&str>,
    config: &ExtractionConfig,
) -> Result<DocumentInfo, ReceiptError> {
    let client = http_client(config.download_timeout_secs)?;
    let normalized = build_document(&client, url, mime_type, config).await?;

    let (pdf_bytes, sizes) = match normalized.document.pdf_bytes() {
        Some(bytes) => {
            let sizes = pdf_page_sizes(&bytes)?;
            (bytes.len(), sizes)
        }
        None => (0, Vec::new()),
    };

    Ok(DocumentInfo {
        url: url.to_string(),
        detected: normalized.detected,
        source_bytes: normalized.source_bytes,
        pdf_bytes,
        page_count: sizes.len(),
        first_page_size: sizes.first().copied(),
    })
}
