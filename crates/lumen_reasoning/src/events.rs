use crate::executor::StepResult;
use crate::plan::ExecutionPlan;
use lumen_core::{Evaluation, Metrics, SecurityAssessment};
use serde::{Deserialize, Serialize};

/// Progress events of a streamed request, in emission order.
///
/// Every stream ends with exactly one `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Security { assessment: SecurityAssessment },
    Status { content: String },
    Plan { content: ExecutionPlan },
    StepResult { content: StepResult },
    Token { content: String },
    Evaluation { evaluation: Evaluation, metrics: Metrics },
    Error { content: String },
    Complete,
}

impl EngineEvent {
    pub fn status(content: impl Into<String>) -> Self {
        EngineEvent::Status {
            content: content.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineEvent::Complete | EngineEvent::Error { .. })
    }
}
