//! The agent network: a router-driven loop over shared state.
//!
//! ```text
//!            ┌──────────── flag set? ──── yes ──▶ halt
//!            ▼
//!   router ──▶ receipt_scanning_agent ──▶ record in state
//!            ▼
//!            database_agent ──▶ ok: flags set ──▶ halt
//!                           └─▶ failure: backoff, loop
//! ```
//!
//! The loop ends when the completion flag is set, when the router returns
//! `None`, when an agent fails fatally, or when `max_steps` dispatches have
//! been made.

mod router;
mod state;

pub use router::{find as find_agent, PipelineRouter, Router};
pub use state::{NetworkState, StepRecord, RECEIPT_KEY, SAVED_TO_DATABASE_KEY};

use crate::agents::{Agent, AgentOutput};
use crate::config::ExtractionConfig;
use crate::error::ReceiptError;
use crate::job::JobTask;
use crate::progress::{NoopObserver, RunObserverRef};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Result of one network run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// The `receipt` state key: the job id when the save succeeded.
    pub receipt: Option<String>,
    /// Number of agent dispatches made.
    pub steps: usize,
    pub state: NetworkState,
}

pub struct Network {
    agents: Vec<Arc<dyn Agent>>,
    router: Arc<dyn Router>,
    max_steps: usize,
    retry_backoff_ms: u64,
    observer: RunObserverRef,
}

impl Network {
    /// Build a network with the default [`PipelineRouter`].
    pub fn new(agents: Vec<Arc<dyn Agent>>, config: &ExtractionConfig) -> Self {
        Self {
            agents,
            router: Arc::new(PipelineRouter),
            max_steps: config.max_steps,
            retry_backoff_ms: config.retry_backoff_ms,
            observer: config
                .observer
                .clone()
                .unwrap_or_else(|| Arc::new(NoopObserver)),
        }
    }

    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = router;
        self
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    /// Run one job to completion with fresh state.
    ///
    /// # Errors
    /// Fatal agent errors (download, format, inference) end the run at once
    /// and are returned unchanged. Save failures are not errors: the run
    /// continues until the budget is spent and returns `receipt: None`.
    pub async fn run(&self, task: &JobTask) -> Result<RunOutput, ReceiptError> {
        let receipt_id = task.receipt_id.as_str();
        let mut state = NetworkState::new();
        let mut steps = 0usize;
        let mut save_failures = 0u32;

        info!("Network run started for receipt {}", receipt_id);
        debug!("Receipt {} task: {}", receipt_id, task.prompt);
        self.observer.on_run_start(receipt_id, &task.prompt);

        loop {
            if state.is_done() {
                debug!("Receipt {} saved; halting", receipt_id);
                break;
            }
            if steps >= self.max_steps {
                warn!(
                    "Receipt {}: step budget of {} exhausted without a save",
                    receipt_id, self.max_steps
                );
                break;
            }
            let Some(agent) = self.router.route(&state, &self.agents) else {
                debug!("Router returned no agent for receipt {}", receipt_id);
                break;
            };

            steps += 1;
            let name = agent.name().to_string();
            debug!(
                "Receipt {}: step {} → {} ({})",
                receipt_id,
                steps,
                name,
                agent.description()
            );
            self.observer.on_agent_start(receipt_id, steps, &name);

            let output = match agent.run(task, &mut state).await {
                Ok(output) => output,
                Err(e) => {
                    let msg = e.to_string();
                    state.record_step(steps, &name, format!("error: {msg}"));
                    self.observer.on_agent_error(receipt_id, steps, &name, &msg);
                    self.observer.on_run_complete(receipt_id, None, steps);
                    return Err(e);
                }
            };

            let summary = output.summary();
            state.record_step(steps, &name, summary.as_str());
            self.observer
                .on_agent_complete(receipt_id, steps, &name, &summary);

            if let AgentOutput::Saved(Err(ref failure)) = output {
                save_failures += 1;
                if steps < self.max_steps {
                    let backoff = self
                        .retry_backoff_ms
                        .saturating_mul(2u64.saturating_pow(save_failures - 1));
                    warn!(
                        "Receipt {}: save attempt {} failed ({}); retrying in {}ms",
                        receipt_id, save_failures, failure.reason, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
            }
        }

        let receipt = state.receipt().map(str::to_string);
        info!(
            "Network run for receipt {} finished after {} steps (saved: {})",
            receipt_id,
            steps,
            receipt.is_some()
        );
        self.observer
            .on_run_complete(receipt_id, receipt.as_deref(), steps);

        Ok(RunOutput {
            receipt,
            steps,
            state,
        })
    }
}
