//! The two agents of the receipt network.
//!
//! | Agent | Tool | Effect on state |
//! |-------|------|-----------------|
//! | [`ExtractionAgent`] (`receipt_scanning_agent`) | `analyze_receipt_file` | stores the extracted record |
//! | [`PersistenceAgent`] (`database_agent`) | `save_to_database` | sets `saved-to-database` and `receipt` on success |
//!
//! Extraction failures are fatal (`Err`). Save failures are data: the
//! persistence agent returns `Ok(AgentOutput::Saved(Err(..)))` so the
//! network can offer the save again.

mod extraction;
mod persistence;

pub use extraction::{ExtractedReceipt, ExtractionAgent};
pub use persistence::{display_name_for, PersistenceAgent};

use crate::error::{ReceiptError, SaveFailure};
use crate::job::JobTask;
use crate::network::NetworkState;
use crate::receipt::StructuredReceipt;
use async_trait::async_trait;
use serde::Serialize;

pub const EXTRACTION_AGENT: &str = "receipt_scanning_agent";
pub const PERSISTENCE_AGENT: &str = "database_agent";

/// A successful save.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedReceipt {
    pub receipt_id: String,
    pub file_display_name: String,
    pub owner_id: String,
    pub parsed_data: StructuredReceipt,
}

/// Outcome of the persistence tool.
pub type SaveResult = Result<SavedReceipt, SaveFailure>;

/// What one agent dispatch produced.
#[derive(Debug, Clone)]
pub enum AgentOutput {
    Extracted {
        record: StructuredReceipt,
        input_tokens: u64,
        output_tokens: u64,
    },
    Saved(SaveResult),
    /// The agent found nothing to do.
    Skipped { reason: String },
}

impl AgentOutput {
    /// One-line description for logs and the run transcript.
    pub fn summary(&self) -> String {
        match self {
            AgentOutput::Extracted {
                record,
                input_tokens,
                output_tokens,
            } => {
                let filled = record
                    .text_fields()
                    .iter()
                    .filter(|(_, v)| !v.is_empty())
                    .count();
                format!(
                    "extracted {filled} text fields ({input_tokens} in / {output_tokens} out tokens)"
                )
            }
            AgentOutput::Saved(Ok(saved)) => format!("saved receipt {}", saved.receipt_id),
            AgentOutput::Saved(Err(failure)) => format!("save failed: {}", failure.reason),
            AgentOutput::Skipped { reason } => format!("skipped: {reason}"),
        }
    }

    pub fn is_save_failure(&self) -> bool {
        matches!(self, AgentOutput::Saved(Err(_)))
    }
}

/// A unit the network can dispatch.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn run(
        &self,
        task: &JobTask,
        state: &mut NetworkState,
    ) -> Result<AgentOutput, ReceiptError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries() {
        let extracted = AgentOutput::Extracted {
            record: StructuredReceipt {
                entreprise: "X".into(),
                produit: "Sable".into(),
                ..Default::default()
            },
            input_tokens: 10,
            output_tokens: 5,
        };
        assert!(extracted.summary().starts_with("extracted 2 text fields"));

        let failed = AgentOutput::Saved(Err(SaveFailure::new("r1", "store down")));
        assert_eq!(failed.summary(), "save failed: store down");
        assert!(failed.is_save_failure());

        let skipped = AgentOutput::Skipped {
            reason: "already saved".into(),
        };
        assert!(!skipped.is_save_failure());
    }
}
