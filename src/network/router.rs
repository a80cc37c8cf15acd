//! Agent selection.

use crate::agents::{Agent, EXTRACTION_AGENT, PERSISTENCE_AGENT};
use crate::network::NetworkState;
use std::sync::Arc;

/// Picks the next agent to dispatch, or `None` to halt.
///
/// The network checks the completion flag itself before calling the router,
/// so a router never needs to guard against re-running a finished job.
pub trait Router: Send + Sync {
    fn route(&self, state: &NetworkState, agents: &[Arc<dyn Agent>]) -> Option<Arc<dyn Agent>>;
}

/// extract → save (repeated while it fails) → halt.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineRouter;

impl Router for PipelineRouter {
    fn route(&self, state: &NetworkState, agents: &[Arc<dyn Agent>]) -> Option<Arc<dyn Agent>> {
        if state.is_done() {
            return None;
        }
        let wanted = if state.extracted().is_none() {
            EXTRACTION_AGENT
        } else {
            PERSISTENCE_AGENT
        };
        find(agents, wanted)
    }
}

/// Look an agent up by name.
pub fn find(agents: &[Arc<dyn Agent>], name: &str) -> Option<Arc<dyn Agent>> {
    agents.iter().find(|a| a.name() == name).cloned()
}
