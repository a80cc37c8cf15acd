//! # weighticket-extract
//!
//! Turn a scanned weigh ticket (PDF, PNG or JPEG) into a structured record
//! and save it against an existing receipt, using a multimodal LLM.
//!
//! ## Why a two-agent network?
//!
//! Extraction and persistence fail differently. A ticket that cannot be read
//! will not become readable on a second try, so extraction errors end the
//! job. A store or metering hiccup usually clears up, so a failed save is
//! reported back to the network and offered again, with backoff, until the
//! step budget runs out. Keeping the two as separate agents over shared
//! state makes that split explicit.
//!
//! ## Pipeline Overview
//!
//! ```text
//! event { url, receiptId, mimeType? }
//!  │
//!  ├─ 1. Input    download, identify by signature (%PDF / PNG / JPEG)
//!  ├─ 2. Embed    images → one-page PDF sized to the image
//!  ├─ 3. Encode   base64 PDF document (or URL reference)
//!  ├─ 4. Infer    one call to claude / gpt / gemini / …
//!  ├─ 5. Decode   strip fences, decode the fixed-schema record
//!  └─ 6. Persist  store write + one "scan" usage event, then halt
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weighticket_extract::{
//!     ExtractionConfig, JobRunner, MemoryStore, ProcessReceiptEvent, RecordingMeter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Backend auto-detected from ANTHROPIC_API_KEY / OPENAI_API_KEY / ...
//!     let config = ExtractionConfig::default();
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert_pending("rcpt_1", "user_1");
//!
//!     let runner = JobRunner::new(config, store.clone(), Arc::new(RecordingMeter::new()))?;
//!     let event = ProcessReceiptEvent::new(
//!         "https://files.example.com/ticket-48213.jpg",
//!         "rcpt_1",
//!         Some("image/jpeg".into()),
//!     );
//!     let receipt = runner.process(&event).await?;
//!     println!("saved: {receipt:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ticket2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! weighticket-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agents;
pub mod config;
pub mod error;
pub mod job;
pub mod network;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod receipt;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agents::{Agent, AgentOutput, ExtractionAgent, PersistenceAgent, SaveResult, SavedReceipt};
pub use config::{DocumentSourceMode, ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ReceiptError, SaveFailure};
pub use job::{
    inspect_document, load_events, DocumentInfo, JobOutcome, JobRunner, JobTask,
    ProcessReceiptEvent,
};
pub use network::{Network, NetworkState, PipelineRouter, Router, RunOutput};
pub use pipeline::encode::CanonicalDocument;
pub use pipeline::input::SourceFormat;
pub use pipeline::llm::{InferenceClient, InferenceRequest, InferenceResponse};
pub use progress::{NoopObserver, RunObserver, RunObserverRef};
pub use receipt::{Installer, StructuredReceipt};
pub use store::{
    ConvexStore, MemoryStore, ReceiptStore, ReceiptUpdate, RecordingMeter, SchematicMeter,
    UsageEvent, UsageMeter,
};
