//! `receipt_scanning_agent`: source file → structured record.

use super::{Agent, AgentOutput, EXTRACTION_AGENT};
use crate::config::ExtractionConfig;
use crate::error::ReceiptError;
use crate::job::JobTask;
use crate::network::NetworkState;
use crate::pipeline::encode::build_document;
use crate::pipeline::input::http_client;
use crate::pipeline::llm::{InferenceClient, InferenceRequest};
use crate::pipeline::postprocess::parse_receipt_reply;
use crate::prompts::{EXTRACTION_INSTRUCTION, EXTRACTION_SYSTEM_PROMPT};
use crate::receipt::StructuredReceipt;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of the `analyze_receipt_file` tool.
#[derive(Debug, Clone)]
pub struct ExtractedReceipt {
    pub record: StructuredReceipt,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

pub struct ExtractionAgent {
    inference: Arc<dyn InferenceClient>,
    http: reqwest::Client,
    config: ExtractionConfig,
}

impl ExtractionAgent {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        config: ExtractionConfig,
    ) -> Result<Self, ReceiptError> {
        Ok(Self {
            inference,
            http: http_client(config.download_timeout_secs)?,
            config,
        })
    }

    /// Normalise the file, make exactly one inference call, decode the reply.
    ///
    /// Errors from any stage are returned unchanged; nothing is retried.
    pub async fn analyze_receipt_file(
        &self,
        file_url: &str,
        mime_type: Option<&str>,
    ) -> Result<ExtractedReceipt, ReceiptError> {
        let normalized = build_document(&self.http, file_url, mime_type, &self.config).await?;

        let request = InferenceRequest {
            system: self
                .config
                .system_prompt
                .clone()
                .unwrap_or_else(|| EXTRACTION_SYSTEM_PROMPT.to_string()),
            instruction: EXTRACTION_INSTRUCTION.to_string(),
            document: normalized.document,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let start = Instant::now();
        let response = tokio::time::timeout(
            Duration::from_secs(self.config.api_timeout_secs),
            self.inference.infer(&request),
        )
        .await
        .map_err(|_| ReceiptError::ApiTimeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        })??;
        debug!(
            "{} replied in {}ms ({} chars)",
            self.inference.name(),
            start.elapsed().as_millis(),
            response.text.len()
        );

        let record = parse_receipt_reply(&response.text)?;

        if let Some(gap) = record.weight_discrepancy() {
            warn!(
                "Net weight {:?} is off by {:.1} kg from |entree - sortie| ({:?} / {:?})",
                record.poids_net_kg, gap, record.poids_entree_kg, record.poids_sortie_kg
            );
        }
        if record.is_blank() {
            info!("No readable fields on {}", file_url);
        }

        Ok(ExtractedReceipt {
            record,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        })
    }
}

#[async_trait]
impl Agent for ExtractionAgent {
    fn name(&self) -> &str {
        EXTRACTION_AGENT
    }

    fn description(&self) -> &str {
        "Reads a weigh-ticket file (PDF, PNG or JPEG) and extracts its data as structured JSON."
    }

    async fn run(
        &self,
        task: &JobTask,
        state: &mut NetworkState,
    ) -> Result<AgentOutput, ReceiptError> {
        if state.extracted().is_some() {
            return Ok(AgentOutput::Skipped {
                reason: "record already extracted".into(),
            });
        }

        let extracted = self
            .analyze_receipt_file(&task.source_url, task.mime_type.as_deref())
            .await?;
        state.set_extracted(extracted.record.clone());

        Ok(AgentOutput::Extracted {
            record: extracted.record,
            input_tokens: extracted.input_tokens,
            output_tokens: extracted.output_tokens,
        })
    }
}
