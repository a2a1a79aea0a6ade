use crate::executor::StepResult;
use crate::plan::ExecutionPlan;
use crate::registry::SUMMARIZER;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Synthesis strategy chosen after the tools ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Single-pass answer from the step outputs
    Generator,
    /// Researcher → analyst → writer
    MultiAgentSystem,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Generator => write!(f, "generator"),
            Route::MultiAgentSystem => write!(f, "multi_agent_system"),
        }
    }
}

/// Escalate to multi-agent synthesis when no non-summarizer step produced
/// anything. Error outputs count as empty.
pub fn route(plan: &ExecutionPlan, results: &[StepResult]) -> Route {
    let has_material = results
        .iter()
        .filter(|r| r.tool != SUMMARIZER)
        .any(|r| !r.output.is_empty());
    let route = if has_material {
        Route::Generator
    } else {
        Route::MultiAgentSystem
    };
    tracing::info!(
        steps = plan.steps.len(),
        results = results.len(),
        "Routing to {}",
        route
    );
    route
}
