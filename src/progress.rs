//! Observer trait for per-step run events.
//!
//! Inject an [`Arc<dyn RunObserver>`] via
//! [`crate::config::ExtractionConfigBuilder::observer`] to receive events as
//! the network dispatches agents for each job.
//!
//! # Example
//!
//! ```rust
//! use weighticket_extract::{ExtractionConfig, RunObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct SaveCounter {
//!     saved: AtomicUsize,
//! }
//!
//! impl RunObserver for SaveCounter {
//!     fn on_run_complete(&self, _receipt_id: &str, receipt: Option<&str>, _steps: usize) {
//!         if receipt.is_some() {
//!             self.saved.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .observer(Arc::new(SaveCounter { saved: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the network as it runs a job.
///
/// Implementations must be `Send + Sync`: batch runs drive several jobs at
/// once and every job reports to the same observer. All methods default to
/// no-ops.
pub trait RunObserver: Send + Sync {
    /// Called once when a job's network run starts.
    ///
    /// `task` is the job's prompt, built by [`crate::prompts::task_prompt`].
    fn on_run_start(&self, receipt_id: &str, task: &str) {
        let _ = (receipt_id, task);
    }

    /// Called before an agent is dispatched.
    ///
    /// # Arguments
    /// * `step`: 1-indexed dispatch number within the run
    /// * `agent`: agent name, e.g. `receipt_scanning_agent`
    fn on_agent_start(&self, receipt_id: &str, step: usize, agent: &str) {
        let _ = (receipt_id, step, agent);
    }

    /// Called when an agent returns normally (including a failed save).
    fn on_agent_complete(&self, receipt_id: &str, step: usize, agent: &str, summary: &str) {
        let _ = (receipt_id, step, agent, summary);
    }

    /// Called when an agent fails fatally; the run ends right after.
    fn on_agent_error(&self, receipt_id: &str, step: usize, agent: &str, error: &str) {
        let _ = (receipt_id, step, agent, error);
    }

    /// Called once when the run halts, with the terminal receipt value.
    fn on_run_complete(&self, receipt_id: &str, receipt: Option<&str>, steps: usize) {
        let _ = (receipt_id, receipt, steps);
    }
}

/// A no-op observer, used when none is configured.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type RunObserverRef = Arc<dyn RunObserver>;
