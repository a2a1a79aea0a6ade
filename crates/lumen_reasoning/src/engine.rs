//! The feedback-loop controller.
//!
//! SCREEN → GATE → { PLAN → VALIDATE → EXECUTE → ROUTE → GENERATE → EVALUATE }
//! with at most `max_retries + 1` passes through the braces. Buffered and
//! streamed requests run the same `run` function; the streamed form passes
//! an event sink and forwards tokens as they arrive.

use crate::api_types::StreamEvent;
use crate::classifier::QueryClassifier;
use crate::error::{EngineError, LlmError};
use crate::evaluator::ResponseEvaluator;
use crate::events::EngineEvent;
use crate::executor::{StepResult, ToolExecutor};
use crate::generator::{Generator, NO_CONTEXT_ANSWER};
use crate::grounding::grounding_score;
use crate::llm::GuardedClient;
use crate::multi_agent::MultiAgentSynthesizer;
use crate::plan::{ExecutionPlan, PlanAction};
use crate::planner::Planner;
use crate::registry::ToolRegistry;
use crate::router::{self, Route};
use crate::security::SecurityScreener;
use crate::telemetry::{self, CostModel, RequestTimer};
use crate::token_budget::TokenBudget;
use crate::tools::standard_executor;
use futures_util::FutureExt;
use lumen_core::config::{LumenConfig, PolicyConfig};
use lumen_core::{Evaluation, Grade, Query, SecurityAssessment};
use lumen_retrieval::{PassageRetriever, WebSearcher};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Judge passed, or attempts ran out with an answer in hand
    Accepted,
    /// Grounding fell below the abort threshold
    Aborted,
    Blocked,
    ContextInsufficient,
    Refused,
    /// Every attempt produced an invalid plan
    Exhausted,
    RetrievalUnavailable,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Aborted => "aborted",
            Outcome::Blocked => "blocked",
            Outcome::ContextInsufficient => "context_insufficient",
            Outcome::Refused => "refused",
            Outcome::Exhausted => "exhausted",
            Outcome::RetrievalUnavailable => "retrieval_unavailable",
        }
    }

    /// Outcomes that produced an answer and an evaluation.
    pub fn answered(&self) -> bool {
        matches!(self, Outcome::Accepted | Outcome::Aborted)
    }
}

/// Final structure of a request. For outcomes without an answer, `response`
/// holds the user-visible reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    pub query_id: Uuid,
    pub outcome: Outcome,
    pub response: String,
    pub security: SecurityAssessment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
    pub attempts: u32,
}

impl EngineResult {
    /// The event that closes a stream for this result.
    pub fn terminal_event(&self) -> EngineEvent {
        if self.outcome.answered() {
            EngineEvent::Complete
        } else {
            EngineEvent::Error {
                content: self.response.clone(),
            }
        }
    }
}

// ============================================================================
// Plan validation
// ============================================================================

/// Why a plan was sent back to the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRejection {
    /// Short form for status lines and the exhaustion message
    pub summary: String,
    /// Fed verbatim to the next planning call
    pub critique: String,
}

/// Engine-side check of a plan against the registry snapshot that produced it.
pub fn validate_plan(plan: &ExecutionPlan, registry: &ToolRegistry) -> Result<(), PlanRejection> {
    let names = registry.names();

    if plan.action == PlanAction::RegistryViolation {
        let critique = if plan.violations.is_empty() {
            "Your previous plan failed: Registry Violation. You MUST use ONLY tool names from the provided JSON list.".to_string()
        } else {
            format!(
                "Your previous plan failed: Registry Violation. It used {:?}, which are not available. You MUST use ONLY tool names from the provided JSON list: {:?}.",
                plan.violations, names
            )
        };
        return Err(PlanRejection {
            summary: "Tool Registry Violation".to_string(),
            critique,
        });
    }

    let mut invalid: Vec<String> = Vec::new();
    let mut last_id: Option<u32> = None;
    for step in &plan.steps {
        if !registry.contains(&step.tool) {
            invalid.push(step.tool.clone());
        }
        if step.input.normalize().is_err() {
            invalid.push(format!("{}(invalid_input_type)", step.tool));
        }
        // Ids must be unique and ascending
        if last_id.is_some_and(|last| step.step_id <= last) {
            invalid.push(format!("{}(step_id {} out of order)", step.tool, step.step_id));
        }
        last_id = Some(last_id.map_or(step.step_id, |last| last.max(step.step_id)));
    }

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(PlanRejection {
            summary: format!("Invalid tools or inputs {:?}", invalid),
            critique: format!(
                "Your previous plan used unknown or malformed tools: {:?}. You MUST use ONLY: {:?} and ensure 'input' is a string.",
                invalid, names
            ),
        })
    }
}

// ============================================================================
// Event sink
// ============================================================================

/// Where progress goes. Buffered requests have no sink.
struct Emitter<'a>(Option<&'a mpsc::Sender<EngineEvent>>);

impl Emitter<'_> {
    fn streaming(&self) -> bool {
        self.0.is_some()
    }

    /// A closed receiver means the client went away.
    async fn emit(&self, event: EngineEvent) -> Result<(), EngineError> {
        match self.0 {
            Some(tx) => tx.send(event).await.map_err(|_| EngineError::Cancelled),
            None => Ok(()),
        }
    }

    async fn status(&self, content: impl Into<String>) -> Result<(), EngineError> {
        if self.streaming() {
            self.emit(EngineEvent::status(content)).await
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// One attempt's worth of state, kept only for the current request.
struct Attempt {
    plan: ExecutionPlan,
    results: Vec<StepResult>,
    route: Route,
    response: String,
    evaluation: Evaluation,
    grounding: f32,
}

pub struct ReasoningEngine {
    screener: SecurityScreener,
    classifier: QueryClassifier,
    retriever: Arc<dyn PassageRetriever>,
    planner: Planner,
    executor: ToolExecutor,
    generator: Generator,
    multi_agent: MultiAgentSynthesizer,
    evaluator: ResponseEvaluator,
    budget: Arc<TokenBudget>,
    policy: PolicyConfig,
    cost: CostModel,
    retrieval_timeout: Duration,
}

impl ReasoningEngine {
    /// Wire every component from configuration. `llm` carries the shared
    /// lock table; pass the same client to anything else that calls a model.
    pub fn new(
        config: &LumenConfig,
        llm: GuardedClient,
        retriever: Arc<dyn PassageRetriever>,
        web: Arc<dyn WebSearcher>,
    ) -> Self {
        let llm_cfg = &config.llm;
        let generation_tiers = llm_cfg.generation_tiers();
        let deep_tiers = dedup(vec![
            llm_cfg.primary_model.clone(),
            llm_cfg.generation_model.clone(),
        ]);

        Self {
            screener: SecurityScreener::new(llm.clone(), llm_cfg.security_model.clone()),
            classifier: QueryClassifier::new(llm.clone(), llm_cfg.fast_model.clone()),
            planner: Planner::new(llm.clone(), llm_cfg.planner_tiers()),
            executor: standard_executor(config, retriever.clone(), web, llm.clone()),
            generator: Generator::new(
                llm.clone(),
                generation_tiers,
                llm_cfg.max_tokens,
                llm_cfg.temperature,
            ),
            multi_agent: MultiAgentSynthesizer::new(llm.clone(), deep_tiers, llm_cfg.max_tokens),
            evaluator: ResponseEvaluator::new(
                llm.clone(),
                llm_cfg.judge_model.clone(),
                config.policy.judge_attempts,
            ),
            budget: llm.budget().clone(),
            retriever,
            policy: config.policy.clone(),
            cost: CostModel::from(&config.telemetry),
            retrieval_timeout: Duration::from_secs(config.timeouts.retrieval_secs),
        }
    }

    /// Replace the tool executor (custom handlers, tests).
    pub fn with_executor(mut self, executor: ToolExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn budget(&self) -> &Arc<TokenBudget> {
        &self.budget
    }

    pub async fn generate_title(&self, text: &str) -> String {
        self.generator.generate_title(text).await
    }

    /// Buffered mode: run to completion and return the final structure.
    pub async fn process_query(&self, query: &Query) -> Result<EngineResult, EngineError> {
        self.run(query, Emitter(None)).instrument(request_span(query)).await
    }

    /// Streaming mode. The receiver yields progress events and then exactly
    /// one `Complete` or `Error`. Dropping it cancels the request.
    pub fn process_query_stream(self: &Arc<Self>, query: Query) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(64);
        let engine = Arc::clone(self);
        let span = request_span(&query);

        tokio::spawn(
            async move {
                let run = AssertUnwindSafe(engine.run(&query, Emitter(Some(&tx)))).catch_unwind();
                let terminal = match run.await {
                    Ok(Ok(result)) => result.terminal_event(),
                    Ok(Err(EngineError::Cancelled)) => {
                        tracing::info!("Client disconnected; request cancelled");
                        return;
                    }
                    Ok(Err(e)) => {
                        tracing::error!("Request failed: {}", e);
                        telemetry::record_request("error", 0, 0.0);
                        EngineEvent::Error {
                            content: e.to_string(),
                        }
                    }
                    Err(_) => {
                        tracing::error!("Engine panicked while processing request");
                        EngineEvent::Error {
                            content: "Internal error while processing the request.".to_string(),
                        }
                    }
                };
                let _ = tx.send(terminal).await;
            }
            .instrument(span),
        );
        rx
    }

    // ------------------------------------------------------------------------
    // The loop
    // ------------------------------------------------------------------------

    async fn run(&self, query: &Query, out: Emitter<'_>) -> Result<EngineResult, EngineError> {
        let timer = RequestTimer::start();
        let text = query.text.as_str();
        tracing::info!("Reasoning engine started");

        // SCREEN
        let security = self.screener.inspect(text).await;
        out.emit(EngineEvent::Security {
            assessment: security.clone(),
        })
        .await?;

        let finish = |outcome: Outcome, response: String, plan: Option<ExecutionPlan>, attempts: u32| {
            telemetry::record_request(outcome.as_str(), attempts, timer.elapsed_ms());
            EngineResult {
                query_id: query.id,
                outcome,
                response,
                security: security.clone(),
                plan,
                results: Vec::new(),
                route: None,
                evaluation: None,
                attempts,
            }
        };

        if !security.is_safe {
            return Ok(finish(
                Outcome::Blocked,
                format!("Security Block: {}", security.reasoning),
                None,
                0,
            ));
        }

        if security.risk_score > self.policy.human_review_risk {
            tracing::warn!(
                risk = security.risk_score,
                "HIGH RISK QUERY FLAGGED FOR HUMAN VALIDATION (auto-approved)"
            );
            out.status("High-risk query flagged for human review. Auto-approved.")
                .await?;
        }

        // GATE
        let intent = self.classifier.classify(text).await;
        if !intent.requires_computation {
            if let Some((outcome, message)) = self.retrieval_gate(text).await {
                return Ok(finish(outcome, message, None, 0));
            }
        }

        // PLAN ... EVALUATE
        let max_attempts = self.policy.max_attempts();
        let mut critique: Option<String> = None;
        let mut attempt = 0u32;

        let (outcome, last) = loop {
            attempt += 1;
            if attempt > 1 {
                tracing::info!("Feedback loop: attempt {}/{}", attempt, max_attempts);
                out.status(format!("Re-planning attempt {}/{}...", attempt, max_attempts))
                    .await?;
            }
            self.report_budget(&out).await?;

            let registry = ToolRegistry::for_intent(&intent);
            out.status("Planning execution strategy...").await?;
            let plan = self
                .planner
                .create_plan(text, &registry, critique.as_deref())
                .await;

            if plan.action == PlanAction::Refuse {
                tracing::warn!("Planner refused query: {}", plan.final_instruction);
                let message = format!("Refusal: {}", plan.final_instruction);
                return Ok(finish(Outcome::Refused, message, Some(plan), attempt));
            }

            // VALIDATE
            if let Err(rejection) = validate_plan(&plan, &registry) {
                tracing::warn!("Plan rejected: {}", rejection.summary);
                if attempt >= max_attempts {
                    let message = format!("Planning Exhausted: {}", rejection.summary);
                    return Ok(finish(Outcome::Exhausted, message, Some(plan), attempt));
                }
                out.status(format!("Plan rejected: {}. Re-aligning...", rejection.summary))
                    .await?;
                critique = Some(rejection.critique);
                continue;
            }
            out.emit(EngineEvent::Plan {
                content: plan.clone(),
            })
            .await?;

            // EXECUTE
            let results = self.execute(&plan, &out).await?;

            // ROUTE
            let route = router::route(&plan, &results);
            telemetry::record_route(match route {
                Route::Generator => "generator",
                Route::MultiAgentSystem => "multi_agent_system",
            });
            out.status(format!("Routing to: {}", route)).await?;

            // GENERATE
            let response = self.generate(text, route, &results, &out).await?;

            // EVALUATE
            let grounding = grounding_score(&response, &results);

            // Below the abort line the judge's verdict cannot change the outcome
            if grounding < self.policy.grounding_abort_threshold {
                tracing::error!(
                    "Catastrophic grounding failure ({:.2}). Aborting pipeline.",
                    grounding
                );
                let evaluation = Evaluation::grounding_abort(grounding);
                let last = Attempt {
                    plan,
                    results,
                    route,
                    response,
                    evaluation,
                    grounding,
                };
                break (Outcome::Aborted, last);
            }

            let mut evaluation = self.evaluator.evaluate(text, &response, &results).await;
            if grounding < self.policy.grounding_retry_threshold {
                tracing::warn!(
                    "Grounding score {:.2} below {:.2}; marking as Fail",
                    grounding,
                    self.policy.grounding_retry_threshold
                );
                evaluation.overall_grade = Grade::Fail;
                evaluation.reasoning.push_str(&format!(
                    " [System Critique: Low grounding score ({:.2}). Response may be hallucinated.]",
                    grounding
                ));
            }

            let done = evaluation.passed() || attempt >= max_attempts;
            let next_critique = if evaluation.reasoning.trim().is_empty() {
                "The previous response was insufficient.".to_string()
            } else {
                evaluation.reasoning.clone()
            };
            let last = Attempt {
                plan,
                results,
                route,
                response,
                evaluation,
                grounding,
            };
            if done {
                break (Outcome::Accepted, last);
            }
            critique = Some(next_critique);
        };

        // Telemetry
        let metrics = self.cost.metrics(&timer, attempt, last.grounding);
        let mut evaluation = last.evaluation;
        evaluation.metrics = Some(metrics);
        telemetry::record_request(outcome.as_str(), attempt, metrics.latency_ms);
        tracing::info!(
            outcome = outcome.as_str(),
            attempts = attempt,
            grade = %evaluation.overall_grade,
            grounding = last.grounding,
            latency_ms = metrics.latency_ms,
            "Request finished"
        );

        out.emit(EngineEvent::Evaluation {
            evaluation: evaluation.clone(),
            metrics,
        })
        .await?;

        Ok(EngineResult {
            query_id: query.id,
            outcome,
            response: last.response,
            security,
            plan: Some(last.plan),
            results: last.results,
            route: Some(last.route),
            evaluation: Some(evaluation),
            attempts: attempt,
        })
    }

    /// Cheap top-1 pre-check. `Some` ends the request before planning.
    async fn retrieval_gate(&self, text: &str) -> Option<(Outcome, String)> {
        let probe = tokio::time::timeout(self.retrieval_timeout, self.retriever.retrieve(text, 1, None)).await;
        let passages = match probe {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => {
                tracing::error!("Retrieval gate failed: {:#}", e);
                return Some((
                    Outcome::RetrievalUnavailable,
                    EngineError::Retrieval(e.to_string()).to_string(),
                ));
            }
            Err(_) => {
                tracing::error!("Retrieval gate timed out");
                return Some((
                    Outcome::RetrievalUnavailable,
                    EngineError::Retrieval(format!(
                        "timed out after {}s",
                        self.retrieval_timeout.as_secs()
                    ))
                    .to_string(),
                ));
            }
        };

        let top = passages.first().map(|p| p.score);
        match top {
            Some(score) if score >= self.policy.retrieval_gate_threshold => None,
            _ => {
                tracing::warn!(
                    top_score = ?top,
                    threshold = self.policy.retrieval_gate_threshold,
                    "Retrieval gate: insufficient context"
                );
                Some((Outcome::ContextInsufficient, NO_CONTEXT_ANSWER.to_string()))
            }
        }
    }

    async fn report_budget(&self, out: &Emitter<'_>) -> Result<(), EngineError> {
        let tiers = self.planner.tiers();
        let Some(preferred) = tiers.first() else {
            return Ok(());
        };
        let message = if self.budget.can_use(preferred) {
            format!("Control Plane: Budget healthy. Ready for {} tier.", preferred)
        } else {
            match tiers.iter().find(|m| self.budget.can_use(m)) {
                Some(m) => format!("Control Plane: Failover active. Using {} tier.", m),
                None => "Control Plane: All planner tiers are rate limited.".to_string(),
            }
        };
        tracing::info!("{}", message);
        out.status(message).await
    }

    async fn execute(
        &self,
        plan: &ExecutionPlan,
        out: &Emitter<'_>,
    ) -> Result<Vec<StepResult>, EngineError> {
        let mut results = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let label = if step.reason.trim().is_empty() {
                step.tool.as_str()
            } else {
                step.reason.as_str()
            };
            // A closed sink stops here, before the step runs
            out.status(format!("Executing: {}", label)).await?;
            let result = self.executor.execute_step(step).await;
            out.emit(EngineEvent::StepResult {
                content: result.clone(),
            })
            .await?;
            results.push(result);
        }
        Ok(results)
    }

    async fn generate(
        &self,
        text: &str,
        route: Route,
        results: &[StepResult],
        out: &Emitter<'_>,
    ) -> Result<String, EngineError> {
        if !out.streaming() {
            return match route {
                Route::Generator => {
                    let response = self.generator.generate(text, results).await?;
                    if let Some(usage) = &response.usage {
                        tracing::debug!(
                            input_tokens = usage.input_tokens,
                            output_tokens = usage.output_tokens,
                            cost_usd = self.cost.token_cost(usage),
                            "Generation usage"
                        );
                    }
                    Ok(response.text)
                }
                Route::MultiAgentSystem => Ok(self.multi_agent.synthesize(text, results).await?),
            };
        }

        let mut rx = match route {
            Route::Generator => self.generator.generate_stream(text, results).await?,
            Route::MultiAgentSystem => self.multi_agent.synthesize_stream(text, results).await?,
        };
        let mut response = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta(delta) => {
                    response.push_str(&delta);
                    out.emit(EngineEvent::Token { content: delta }).await?;
                }
                StreamEvent::Done { .. } => break,
                StreamEvent::Error(e) => {
                    return Err(EngineError::Generation(LlmError::Other(anyhow::anyhow!(e))))
                }
            }
        }
        Ok(response)
    }
}

fn request_span(query: &Query) -> tracing::Span {
    tracing::info_span!(
        "request",
        query_id = %query.id,
        session_id = %query.session_id,
        user_id = %query.user_id
    )
}

fn dedup(models: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    models.into_iter().filter(|m| seen.insert(m.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::QueryIntent;
    use crate::plan::{PlanStep, StepInput};
    use crate::registry::{HYBRID_RETRIEVER, WEB_SEARCH};
    use serde_json::json;

    fn step(id: u32, tool: &str, input: StepInput) -> PlanStep {
        PlanStep {
            step_id: id,
            tool: tool.into(),
            input,
            reason: String::new(),
        }
    }

    fn plan(steps: Vec<PlanStep>) -> ExecutionPlan {
        ExecutionPlan {
            query_analysis: "a".into(),
            action: PlanAction::Execute,
            steps,
            final_instruction: "b".into(),
            violations: vec![],
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::for_intent(&QueryIntent::conservative())
    }

    #[test]
    fn test_valid_plan_passes() {
        let p = plan(vec![
            step(1, HYBRID_RETRIEVER, "pods".into()),
            step(2, WEB_SEARCH, serde_json::from_value(json!({"query": "pods"})).unwrap()),
        ]);
        assert!(validate_plan(&p, &registry()).is_ok());
    }

    #[test]
    fn test_violation_critique_names_the_tool() {
        let mut p = plan(vec![]);
        p.action = PlanAction::RegistryViolation;
        p.violations = vec!["document_retriever".into()];
        let r = validate_plan(&p, &registry()).unwrap_err();
        assert!(r.critique.contains("document_retriever"));
        assert!(r.critique.contains("hybrid_retriever"));
    }

    #[test]
    fn test_bad_inputs_and_ids_are_rejected() {
        let p = plan(vec![
            step(1, HYBRID_RETRIEVER, StepInput::Other(json!(true))),
            step(1, WEB_SEARCH, "x".into()),
        ]);
        let r = validate_plan(&p, &registry()).unwrap_err();
        assert!(r.critique.contains("hybrid_retriever(invalid_input_type)"));
        assert!(r.critique.contains("out of order"));
    }

    #[test]
    fn test_terminal_event_mapping() {
        let base = EngineResult {
            query_id: Uuid::new_v4(),
            outcome: Outcome::Accepted,
            response: "answer".into(),
            security: SecurityAssessment::permissive("ok"),
            plan: None,
            results: vec![],
            route: None,
            evaluation: None,
            attempts: 1,
        };
        assert_eq!(base.terminal_event(), EngineEvent::Complete);
        let blocked = EngineResult {
            outcome: Outcome::Blocked,
            response: "Security Block: nope".into(),
            ..base
        };
        assert_eq!(
            blocked.terminal_event(),
            EngineEvent::Error {
                content: "Security Block: nope".into()
            }
        );
    }
}
