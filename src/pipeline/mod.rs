//! Pipeline stages for turning a source file into a weigh-ticket record.
//!
//! Each submodule implements exactly one transformation step. The agents in
//! [`crate::agents`] compose them; nothing here knows about jobs or stores.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ embed ──▶ encode ──▶ llm ──▶ postprocess
//! (fetch,   (image    (base64   (one     (JSON
//!  sniff)    → PDF)    PDF)      call)    cleanup)
//! ```
//!
//! 1. [`input`]: download the source and identify it by signature
//! 2. [`embed`]: wrap PNG/JPEG scans in a one-page PDF; runs in
//!    `spawn_blocking` because decoding is CPU-bound
//! 3. [`encode`]: produce the [`encode::CanonicalDocument`] sent to the model
//! 4. [`llm`] / [`anthropic`]: the inference seam and its backends; the only
//!    stage that talks to a model
//! 5. [`postprocess`]: strip fences and prose, decode the record

pub mod anthropic;
pub mod embed;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
