//! Step dispatch. Every step yields a `StepResult`; failures become
//! `StepOutput::Error` and never abort the rest of the plan.

use crate::plan::PlanStep;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use lumen_core::RetrievedPassage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// A callable capability the planner can reference by name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn execute(&self, input: &str) -> Result<StepOutput>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepOutput {
    Passages(Vec<RetrievedPassage>),
    Text(String),
    Structured(Value),
    Error(String),
}

impl StepOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, StepOutput::Error(_))
    }

    /// Errors count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            StepOutput::Passages(p) => p.is_empty(),
            StepOutput::Text(t) => t.trim().is_empty(),
            StepOutput::Structured(v) => match v {
                Value::Null => true,
                Value::Array(a) => a.is_empty(),
                Value::Object(o) => o.is_empty(),
                Value::String(s) => s.trim().is_empty(),
                _ => false,
            },
            StepOutput::Error(_) => true,
        }
    }

    /// Text handed to the generator and the grounding scorer. `None` for errors.
    pub fn context_text(&self) -> Option<String> {
        match self {
            StepOutput::Passages(p) => Some(
                p.iter()
                    .map(|x| x.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            StepOutput::Text(t) => Some(t.clone()),
            StepOutput::Structured(v) => Some(v.to_string()),
            StepOutput::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: u32,
    pub tool: String,
    pub output: StepOutput,
}

impl StepResult {
    fn error(step: &PlanStep, message: String) -> Self {
        tracing::warn!(step = step.step_id, tool = %step.tool, "{}", message);
        Self {
            step_id: step.step_id,
            tool: step.tool.clone(),
            output: StepOutput::Error(message),
        }
    }
}

pub struct ToolExecutor {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    step_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            step_timeout,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Run one step. Never fails; problems are reported in the output.
    #[tracing::instrument(skip_all, fields(step = step.step_id, tool = %step.tool))]
    pub async fn execute_step(&self, step: &PlanStep) -> StepResult {
        if step.tool.trim().is_empty() {
            return StepResult::error(
                step,
                "Error: Malformed step (missing name or input)".to_string(),
            );
        }

        let input = match step.input.normalize() {
            Ok(s) => s,
            Err(e) => return StepResult::error(step, format!("Error: {}", e)),
        };

        let Some(handler) = self.handlers.get(&step.tool) else {
            return StepResult::error(step, format!("Error: Unknown tool '{}'", step.tool));
        };

        let run = tokio::time::timeout(self.step_timeout, handler.execute(&input));
        let output = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(e))) => return StepResult::error(step, format!("Error: {:#}", e)),
            Ok(Err(_)) => {
                return StepResult::error(
                    step,
                    format!(
                        "Error: {} timed out after {}s",
                        step.tool,
                        self.step_timeout.as_secs()
                    ),
                )
            }
            Err(_) => return StepResult::error(step, format!("Error: {} panicked", step.tool)),
        };

        tracing::debug!(empty = output.is_empty(), "Step finished");
        StepResult {
            step_id: step.step_id,
            tool: step.tool.clone(),
            output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepInput;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input"
        }
        async fn execute(&self, input: &str) -> Result<StepOutput> {
            Ok(StepOutput::Text(input.to_string()))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandler for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        async fn execute(&self, _input: &str) -> Result<StepOutput> {
            anyhow::bail!("backend offline")
        }
    }

    struct Panicking;

    #[async_trait]
    impl ToolHandler for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn description(&self) -> &str {
            "Panics"
        }
        async fn execute(&self, _input: &str) -> Result<StepOutput> {
            panic!("boom")
        }
    }

    struct Sleepy;

    #[async_trait]
    impl ToolHandler for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Never returns in time"
        }
        async fn execute(&self, _input: &str) -> Result<StepOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(StepOutput::Text("late".into()))
        }
    }

    fn executor() -> ToolExecutor {
        ToolExecutor::new(Duration::from_secs(5))
            .with_handler(Arc::new(Echo))
            .with_handler(Arc::new(Failing))
            .with_handler(Arc::new(Panicking))
            .with_handler(Arc::new(Sleepy))
    }

    fn step(tool: &str, input: StepInput) -> PlanStep {
        PlanStep {
            step_id: 1,
            tool: tool.into(),
            input,
            reason: String::new(),
        }
    }

    fn error_text(r: &StepResult) -> &str {
        match &r.output {
            StepOutput::Error(e) => e,
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_object_input_is_normalized_before_dispatch() {
        let input: StepInput = serde_json::from_value(json!({"query": "pods"})).unwrap();
        let r = executor().execute_step(&step("echo", input)).await;
        assert_eq!(r.output, StepOutput::Text("pods".into()));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error_result() {
        let r = executor().execute_step(&step("document_retriever", "x".into())).await;
        assert!(error_text(&r).contains("Unknown tool"));
        assert_eq!(r.tool, "document_retriever");
    }

    #[tokio::test]
    async fn test_missing_input_and_blank_tool() {
        let r = executor().execute_step(&step("echo", StepInput::default())).await;
        assert!(error_text(&r).contains("Malformed step"));
        let r = executor().execute_step(&step("  ", "x".into())).await;
        assert!(error_text(&r).contains("Malformed step"));
        let r = executor()
            .execute_step(&step("echo", StepInput::Other(json!(7))))
            .await;
        assert!(error_text(&r).contains("type mismatch"));
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_are_contained() {
        let ex = executor();
        let r = ex.execute_step(&step("failing", "x".into())).await;
        assert!(error_text(&r).contains("backend offline"));
        let r = ex.execute_step(&step("panicking", "x".into())).await;
        assert!(error_text(&r).contains("panicked"));
        // The executor is still usable afterwards
        let r = ex.execute_step(&step("echo", "ok".into())).await;
        assert_eq!(r.output, StepOutput::Text("ok".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout() {
        let r = executor().execute_step(&step("sleepy", "x".into())).await;
        assert!(error_text(&r).contains("timed out after 5s"));
    }

    #[test]
    fn test_output_emptiness_and_context() {
        assert!(StepOutput::Error("x".into()).is_empty());
        assert!(StepOutput::Passages(vec![]).is_empty());
        assert!(StepOutput::Structured(json!({})).is_empty());
        assert!(!StepOutput::Structured(json!(42)).is_empty());
        assert!(StepOutput::Error("x".into()).context_text().is_none());
        assert_eq!(
            serde_json::to_value(StepOutput::Text("hi".into())).unwrap(),
            json!({"kind": "text", "value": "hi"})
        );
    }
}
