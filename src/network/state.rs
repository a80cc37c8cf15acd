//! Per-run shared state.
//!
//! Created fresh for every job and dropped when the run's output has been
//! read. The two flag keys (`saved-to-database`, `receipt`) are write-once:
//! only a fully successful save sets them, and nothing clears them.

use crate::receipt::StructuredReceipt;
use serde::Serialize;
use tracing::warn;

/// Wire key of the completion flag.
pub const SAVED_TO_DATABASE_KEY: &str = "saved-to-database";
/// Wire key of the terminal receipt id.
pub const RECEIPT_KEY: &str = "receipt";

/// One dispatch in the run transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub agent: String,
    pub summary: String,
}

/// Key/value store shared by the agents of one network run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkState {
    #[serde(rename = "saved-to-database", skip_serializing_if = "Option::is_none")]
    saved_to_database: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    receipt: Option<String>,
    #[serde(skip)]
    extracted: Option<StructuredReceipt>,
    #[serde(skip)]
    history: Vec<StepRecord>,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a save has fully succeeded.
    pub fn is_done(&self) -> bool {
        self.saved_to_database == Some(true)
    }

    pub fn saved_to_database(&self) -> Option<bool> {
        self.saved_to_database
    }

    pub fn receipt(&self) -> Option<&str> {
        self.receipt.as_deref()
    }

    /// Set both flag keys. Returns `false` (and changes nothing) when the
    /// run is already marked saved.
    pub fn mark_saved(&mut self, receipt_id: &str) -> bool {
        if self.is_done() {
            warn!(
                "Ignoring second save mark for '{}'; run already saved '{}'",
                receipt_id,
                self.receipt.as_deref().unwrap_or_default()
            );
            return false;
        }
        self.saved_to_database = Some(true);
        self.receipt = Some(receipt_id.to_string());
        true
    }

    pub fn extracted(&self) -> Option<&StructuredReceipt> {
        self.extracted.as_ref()
    }

    pub fn set_extracted(&mut self, record: StructuredReceipt) {
        self.extracted = Some(record);
    }

    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    pub(crate) fn record_step(&mut self, step: usize, agent: &str, summary: impl Into<String>) {
        self.history.push(StepRecord {
            step,
            agent: agent.to_string(),
            summary: summary.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_not_done() {
        let s = NetworkState::new();
        assert!(!s.is_done());
        assert_eq!(s.saved_to_database(), None);
        assert_eq!(s.receipt(), None);
    }

    #[test]
    fn mark_saved_is_write_once() {
        let mut s = NetworkState::new();
        assert!(s.mark_saved("r1"));
        assert!(!s.mark_saved("r2"));
        assert!(s.is_done());
        assert_eq!(s.receipt(), Some("r1"));
    }

    #[test]
    fn serialises_flag_keys_only() {
        let mut s = NetworkState::new();
        assert_eq!(serde_json::to_value(&s).unwrap(), serde_json::json!({}));

        s.set_extracted(StructuredReceipt::default());
        s.mark_saved("r1");
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v[SAVED_TO_DATABASE_KEY], true);
        assert_eq!(v[RECEIPT_KEY], "r1");
        assert_eq!(v.as_object().unwrap().len(), 2);
    }
}
