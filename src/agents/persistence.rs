//! `database_agent`: structured record → receipts store + usage meter.

use super::{Agent, AgentOutput, SaveResult, SavedReceipt, PERSISTENCE_AGENT};
use crate::error::{ReceiptError, SaveFailure};
use crate::job::JobTask;
use crate::network::NetworkState;
use crate::pipeline::input::file_name_from_url;
use crate::prompts::PERSISTENCE_SYSTEM_PROMPT;
use crate::receipt::StructuredReceipt;
use crate::store::{ReceiptStore, ReceiptUpdate, UsageEvent, UsageMeter};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PersistenceAgent {
    store: Arc<dyn ReceiptStore>,
    meter: Arc<dyn UsageMeter>,
}

impl PersistenceAgent {
    pub fn new(store: Arc<dyn ReceiptStore>, meter: Arc<dyn UsageMeter>) -> Self {
        Self { store, meter }
    }

    /// Write the record, then record one `scan` event for the receipt owner.
    ///
    /// Both calls must succeed for the save to count. Failures are returned
    /// as [`SaveFailure`], never as `Err` of the agent.
    pub async fn save_to_database(
        &self,
        receipt_id: &str,
        file_display_name: &str,
        parsed_data: &StructuredReceipt,
    ) -> SaveResult {
        let update = ReceiptUpdate::new(receipt_id, file_display_name, parsed_data.normalized());

        let owner_id = self
            .store
            .update_receipt_with_extracted_data(&update)
            .await
            .map_err(|e| SaveFailure::from((receipt_id, e)))?;

        self.meter
            .track(&UsageEvent::scan(owner_id.as_str()))
            .await
            .map_err(|e| SaveFailure::from((receipt_id, e)))?;

        Ok(SavedReceipt {
            receipt_id: update.receipt_id,
            file_display_name: update.file_display_name,
            owner_id,
            parsed_data: update.parsed_data,
        })
    }
}

/// Human-readable name: record data first, then the URL's file name, then
/// the receipt id.
pub fn display_name_for(record: &StructuredReceipt, source_url: &str, receipt_id: &str) -> String {
    record
        .display_name()
        .or_else(|| file_name_from_url(source_url))
        .unwrap_or_else(|| format!("Receipt {receipt_id}"))
}

#[async_trait]
impl Agent for PersistenceAgent {
    fn name(&self) -> &str {
        PERSISTENCE_AGENT
    }

    fn description(&self) -> &str {
        PERSISTENCE_SYSTEM_PROMPT
    }

    async fn run(
        &self,
        task: &JobTask,
        state: &mut NetworkState,
    ) -> Result<AgentOutput, ReceiptError> {
        if state.is_done() {
            return Ok(AgentOutput::Skipped {
                reason: format!(
                    "receipt {} already saved",
                    state.receipt().unwrap_or_default()
                ),
            });
        }

        let Some(record) = state.extracted().cloned() else {
            return Ok(AgentOutput::Saved(Err(SaveFailure::new(
                task.receipt_id.as_str(),
                "no extracted record to save",
            ))));
        };

        let display_name = display_name_for(&record, &task.source_url, &task.receipt_id);
        let result = self
            .save_to_database(&task.receipt_id, &display_name, &record)
            .await;

        match &result {
            Ok(saved) => {
                state.mark_saved(&saved.receipt_id);
                info!("Saved receipt {} as '{}'", saved.receipt_id, display_name);
            }
            Err(failure) => warn!("Save of receipt {} failed: {}", failure.receipt_id, failure.reason),
        }
        Ok(AgentOutput::Saved(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RecordingMeter};

    fn task(receipt_id: &str) -> JobTask {
        JobTask::new("https://files.example/ticket-48213.jpg", receipt_id, None)
    }

    fn agent(store: &Arc<MemoryStore>, meter: &Arc<RecordingMeter>) -> PersistenceAgent {
        PersistenceAgent::new(store.clone(), meter.clone())
    }

    #[tokio::test]
    async fn successful_save_sets_flags_and_meters_once() {
        let store = Arc::new(MemoryStore::new());
        let meter = Arc::new(RecordingMeter::new());
        store.insert_pending("r1", "user_1");
        let agent = agent(&store, &meter);

        let mut state = NetworkState::new();
        state.set_extracted(StructuredReceipt {
            entreprise: "Carrières du Nord".into(),
            numero_pesee: "48213".into(),
            ..Default::default()
        });

        let out = agent.run(&task("r1"), &mut state).await.unwrap();
        let AgentOutput::Saved(Ok(saved)) = out else {
            panic!("expected a successful save");
        };
        assert_eq!(saved.file_display_name, "Carrières du Nord - Ticket 48213");
        assert_eq!(saved.owner_id, "user_1");
        assert!(state.is_done());
        assert_eq!(state.receipt(), Some("r1"));
        assert_eq!(meter.events(), vec![UsageEvent::scan("user_1")]);
    }

    #[tokio::test]
    async fn store_failure_leaves_flags_unset() {
        let store = Arc::new(MemoryStore::new());
        let meter = Arc::new(RecordingMeter::new());
        store.insert_pending("r1", "u");
        store.fail_next(1);
        let agent = agent(&store, &meter);

        let mut state = NetworkState::new();
        state.set_extracted(StructuredReceipt::default());
        let out = agent.run(&task("r1"), &mut state).await.unwrap();

        assert!(out.is_save_failure());
        assert!(!state.is_done());
        assert_eq!(state.saved_to_database(), None);
        assert!(meter.events().is_empty());
    }

    #[tokio::test]
    async fn meter_failure_is_a_save_failure() {
        let store = Arc::new(MemoryStore::new());
        let meter = Arc::new(RecordingMeter::new());
        store.insert_pending("r1", "u");
        meter.fail_next(1);
        let agent = agent(&store, &meter);

        let mut state = NetworkState::new();
        state.set_extracted(StructuredReceipt::default());
        let out = agent.run(&task("r1"), &mut state).await.unwrap();

        assert!(out.is_save_failure());
        assert!(!state.is_done());
    }

    #[tokio::test]
    async fn refuses_second_save() {
        let store = Arc::new(MemoryStore::new());
        let meter = Arc::new(RecordingMeter::new());
        store.insert_pending("r1", "u");
        let agent = agent(&store, &meter);

        let mut state = NetworkState::new();
        state.set_extracted(StructuredReceipt::default());
        agent.run(&task("r1"), &mut state).await.unwrap();
        let again = agent.run(&task("r1"), &mut state).await.unwrap();

        assert!(matches!(again, AgentOutput::Skipped { .. }));
        assert_eq!(store.write_count(), 1);
        assert_eq!(meter.events().len(), 1);
    }

    #[tokio::test]
    async fn nothing_extracted_is_a_save_failure() {
        let store = Arc::new(MemoryStore::new());
        let meter = Arc::new(RecordingMeter::new());
        let agent = agent(&store, &meter);

        let mut state = NetworkState::new();
        let out = agent.run(&task("r1"), &mut state).await.unwrap();
        assert!(out.is_save_failure());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn describes_the_save_step() {
        let agent = agent(&Arc::new(MemoryStore::new()), &Arc::new(RecordingMeter::new()));
        assert_eq!(agent.name(), PERSISTENCE_AGENT);
        assert_eq!(agent.description(), PERSISTENCE_SYSTEM_PROMPT);
        assert!(agent.description().contains("receipts database"));
    }

    #[test]
    fn display_name_fallbacks() {
        let blank = StructuredReceipt::default();
        assert_eq!(
            display_name_for(&blank, "https://x/files/scan-01.pdf", "r1"),
            "scan-01.pdf"
        );
        assert_eq!(
            display_name_for(&blank, "https://x/api/storage/8f2c", "r1"),
            "Receipt r1"
        );
        let named = StructuredReceipt {
            entreprise: "Sablières".into(),
            ..Default::default()
        };
        assert_eq!(display_name_for(&named, "https://x/a.pdf", "r1"), "Sablières");
    }
}
