use crate::error::LlmError;
use crate::llm::{CompletionParams, GuardedClient};
use crate::plan::{ExecutionPlan, PlanAction};
use crate::prompts;
use crate::registry::ToolRegistry;

/// Produces execution plans, falling through an ordered list of model tiers.
///
/// A tier is skipped when it is locked, rate limited, errors, or returns an
/// object that does not parse as a plan. The first valid plan wins; if every
/// tier fails the result is `ExecutionPlan::fallback_refusal()`.
pub struct Planner {
    llm: GuardedClient,
    tiers: Vec<String>,
    max_tokens: u32,
}

impl Planner {
    pub fn new(llm: GuardedClient, tiers: Vec<String>) -> Self {
        Self {
            llm,
            tiers,
            max_tokens: 1024,
        }
    }

    pub fn tiers(&self) -> &[String] {
        &self.tiers
    }

    #[tracing::instrument(skip_all, fields(critique = critique.is_some()))]
    pub async fn create_plan(
        &self,
        query: &str,
        registry: &ToolRegistry,
        critique: Option<&str>,
    ) -> ExecutionPlan {
        let system = prompts::planner(&registry.to_prompt_json(), critique);
        let user = format!("User Query: {}", query);

        for tier in &self.tiers {
            let result = self
                .llm
                .complete_json::<ExecutionPlan>(
                    tier,
                    &system,
                    &user,
                    CompletionParams::json(self.max_tokens, 0.0),
                )
                .await;

            match result {
                Ok(plan) => {
                    let plan = enforce_registry(plan, registry);
                    tracing::info!(
                        tier = %tier,
                        action = ?plan.action,
                        steps = plan.steps.len(),
                        "Plan created"
                    );
                    return plan;
                }
                Err(LlmError::Locked { remaining_secs, .. }) => {
                    tracing::warn!(
                        "{} is locked for {:.0}s. Trying next tier.",
                        tier,
                        remaining_secs
                    );
                }
                Err(LlmError::RateLimited { .. }) => {
                    tracing::warn!("{} hit a rate limit. Trying next tier.", tier);
                }
                Err(LlmError::Malformed(detail)) => {
                    tracing::error!("Planner output on {} failed validation: {}", tier, detail);
                }
                Err(e) => {
                    tracing::error!("Planning failed on {}: {}", tier, e);
                }
            }
        }

        tracing::error!("All planner tiers exhausted; refusing");
        ExecutionPlan::fallback_refusal()
    }
}

/// Re-check every step against the registry, whatever the model claimed.
/// Any unknown tool turns the plan into a `registry_violation` with no steps.
pub fn enforce_registry(mut plan: ExecutionPlan, registry: &ToolRegistry) -> ExecutionPlan {
    let mut offending: Vec<String> = Vec::new();
    for step in &plan.steps {
        if !registry.contains(&step.tool) && !offending.contains(&step.tool) {
            offending.push(step.tool.clone());
        }
    }

    if !offending.is_empty() {
        tracing::error!(
            "Registry violation: plan used {:?}, allowed {:?}",
            offending,
            registry.names()
        );
        plan.action = PlanAction::RegistryViolation;
        plan.violations = offending;
    }
    if plan.action == PlanAction::RegistryViolation {
        plan.steps.clear();
    }
    plan
}
