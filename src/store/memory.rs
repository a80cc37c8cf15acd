//! In-memory store and meter for dry runs and tests.

use super::{ReceiptStore, ReceiptUpdate, UsageEvent, UsageMeter};
use crate::error::ReceiptError;
use crate::receipt::StructuredReceipt;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Receipt lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Pending,
    Processed,
    Error,
}

/// A receipt as held by [`MemoryStore`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReceipt {
    pub user_id: String,
    pub status: ReceiptStatus,
    pub file_display_name: Option<String>,
    pub receipt_summary: Option<String>,
    pub parsed_data: Option<StructuredReceipt>,
}

/// [`ReceiptStore`] over a `HashMap`.
///
/// Receipts must be registered with [`MemoryStore::insert_pending`] first,
/// as the upload flow does; writing to an unknown id fails.
#[derive(Default)]
pub struct MemoryStore {
    receipts: Mutex<HashMap<String, StoredReceipt>>,
    writes: AtomicUsize,
    fail_next: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pending(&self, receipt_id: impl Into<String>, user_id: impl Into<String>) {
        self.lock().insert(
            receipt_id.into(),
            StoredReceipt {
                user_id: user_id.into(),
                status: ReceiptStatus::Pending,
                file_display_name: None,
                receipt_summary: None,
                parsed_data: None,
            },
        );
    }

    /// Make the next `n` writes fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn get(&self, receipt_id: &str) -> Option<StoredReceipt> {
        self.lock().get(receipt_id).cloned()
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredReceipt>> {
        self.receipts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ReceiptStore for MemoryStore {
    async fn update_receipt_with_extracted_data(
        &self,
        update: &ReceiptUpdate,
    ) -> Result<String, ReceiptError> {
        if take_failure(&self.fail_next) {
            return Err(ReceiptError::PersistenceFailed {
                receipt_id: update.receipt_id.clone(),
                reason: "store unavailable".into(),
            });
        }

        let mut receipts = self.lock();
        let receipt = receipts.get_mut(&update.receipt_id).ok_or_else(|| {
            ReceiptError::PersistenceFailed {
                receipt_id: update.receipt_id.clone(),
                reason: "Receipt not found".into(),
            }
        })?;
        receipt.file_display_name = Some(update.file_display_name.clone());
        receipt.receipt_summary = Some(update.receipt_summary.clone());
        receipt.parsed_data = Some(update.parsed_data.clone());
        receipt.status = ReceiptStatus::Processed;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(receipt.user_id.clone())
    }
}

/// [`UsageMeter`] that records events in memory.
#[derive(Default)]
pub struct RecordingMeter {
    events: Mutex<Vec<UsageEvent>>,
    fail_next: AtomicUsize,
}

impl RecordingMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl UsageMeter for RecordingMeter {
    async fn track(&self, event: &UsageEvent) -> Result<(), ReceiptError> {
        if take_failure(&self.fail_next) {
            return Err(ReceiptError::MeteringFailed {
                event: event.event.clone(),
                reason: "meter unavailable".into(),
            });
        }
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Decrement `counter` if positive; true when a failure was consumed.
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
