//! External collaborators of the persistence step.
//!
//! * [`ReceiptStore`]: the receipts database. One operation: attach an
//!   extracted record to an existing receipt and report the receipt owner.
//! * [`UsageMeter`]: the billing/usage service. One operation: record a
//!   `scan` event for the owner.
//!
//! HTTP implementations ([`convex::ConvexStore`], [`schematic::SchematicMeter`])
//! talk to the hosted services; the in-memory ones ([`memory::MemoryStore`],
//! [`memory::RecordingMeter`]) back dry runs and tests.

pub mod convex;
pub mod memory;
pub mod schematic;

use crate::error::ReceiptError;
use crate::receipt::StructuredReceipt;
use async_trait::async_trait;
use serde::Serialize;

pub use convex::ConvexStore;
pub use memory::{MemoryStore, ReceiptStatus, RecordingMeter, StoredReceipt};
pub use schematic::SchematicMeter;

/// Event name recorded once per successfully saved receipt.
pub const SCAN_EVENT: &str = "scan";

/// Payload of the store write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptUpdate {
    #[serde(rename = "id")]
    pub receipt_id: String,
    pub file_display_name: String,
    /// Always the record's `description`.
    pub receipt_summary: String,
    pub parsed_data: StructuredReceipt,
}

impl ReceiptUpdate {
    pub fn new(
        receipt_id: impl Into<String>,
        file_display_name: impl Into<String>,
        parsed_data: StructuredReceipt,
    ) -> Self {
        Self {
            receipt_id: receipt_id.into(),
            file_display_name: file_display_name.into(),
            receipt_summary: parsed_data.description.clone(),
            parsed_data,
        }
    }
}

/// One usage event; company and user are both the receipt owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEvent {
    pub event: String,
    pub company_id: String,
    pub user_id: String,
}

impl UsageEvent {
    pub fn scan(owner_id: impl Into<String>) -> Self {
        let owner = owner_id.into();
        Self {
            event: SCAN_EVENT.to_string(),
            company_id: owner.clone(),
            user_id: owner,
        }
    }
}

/// The receipts database.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Attach `update` to its receipt, mark the receipt processed, and return
    /// the owner's user id. Fails when the receipt does not exist.
    async fn update_receipt_with_extracted_data(
        &self,
        update: &ReceiptUpdate,
    ) -> Result<String, ReceiptError>;
}

/// The usage-metering service.
#[async_trait]
pub trait UsageMeter: Send + Sync {
    async fn track(&self, event: &UsageEvent) -> Result<(), ReceiptError>;
}
