//! Execution plan types produced by the planner.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    #[default]
    Execute,
    Refuse,
    RegistryViolation,
}

/// Step input as the model wrote it. Normalised to one string before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepInput {
    Text(String),
    List(Vec<Value>),
    Object(Map<String, Value>),
    Other(Value),
}

impl Default for StepInput {
    fn default() -> Self {
        StepInput::Other(Value::Null)
    }
}

impl From<&str> for StepInput {
    fn from(s: &str) -> Self {
        StepInput::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Malformed step (missing name or input)")]
    Missing,
    #[error("Input type mismatch (expected string, got {0})")]
    TypeMismatch(&'static str),
}

/// Keys checked, in order, when the model wraps the input in an object.
const CONVENTIONAL_KEYS: &[&str] = &["query", "input", "code"];

impl StepInput {
    /// Reduce to the single string a tool handler receives.
    ///
    /// Objects yield the first non-empty conventional key or their JSON text;
    /// lists are joined with spaces. Null, booleans and numbers are rejected.
    pub fn normalize(&self) -> Result<String, InputError> {
        match self {
            StepInput::Text(s) => Ok(s.clone()),
            StepInput::Object(map) => {
                let picked = CONVENTIONAL_KEYS.iter().find_map(|k| {
                    map.get(*k)
                        .and_then(Value::as_str)
                        .filter(|s| !s.trim().is_empty())
                });
                Ok(match picked {
                    Some(s) => s.to_string(),
                    None => Value::Object(map.clone()).to_string(),
                })
            }
            StepInput::List(items) => Ok(items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ")),
            StepInput::Other(Value::Null) => Err(InputError::Missing),
            StepInput::Other(Value::Bool(_)) => Err(InputError::TypeMismatch("boolean")),
            StepInput::Other(Value::Number(_)) => Err(InputError::TypeMismatch("number")),
            // Strings, arrays and objects always match an earlier variant
            StepInput::Other(other) => Ok(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: u32,
    pub tool: String,
    #[serde(default)]
    pub input: StepInput,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub query_analysis: String,
    #[serde(default)]
    pub action: PlanAction,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    pub final_instruction: String,
    /// Tool names removed by the registry check.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

impl ExecutionPlan {
    /// Terminal plan returned when no model tier produced a valid plan.
    pub fn fallback_refusal() -> Self {
        Self {
            query_analysis: "Critical system failure during planning.".to_string(),
            action: PlanAction::Refuse,
            steps: Vec::new(),
            final_instruction: "System unavailable. Suggesting retry later.".to_string(),
            violations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(v: Value) -> StepInput {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_untagged_input_variants() {
        assert_eq!(input(json!("pods")), StepInput::Text("pods".into()));
        assert!(matches!(input(json!(["a", "b"])), StepInput::List(_)));
        assert!(matches!(input(json!({"query": "x"})), StepInput::Object(_)));
        assert_eq!(input(json!(null)), StepInput::Other(Value::Null));
    }

    #[test]
    fn test_normalize_object_prefers_conventional_keys() {
        assert_eq!(
            input(json!({"input": "", "code": "print(2)"})).normalize().unwrap(),
            "print(2)"
        );
        assert_eq!(
            input(json!({"query": "pods", "code": "x"})).normalize().unwrap(),
            "pods"
        );
        assert_eq!(
            input(json!({"topic": "pods"})).normalize().unwrap(),
            r#"{"topic":"pods"}"#
        );
    }

    #[test]
    fn test_normalize_list_and_rejections() {
        assert_eq!(input(json!(["kubernetes", 3])).normalize().unwrap(), "kubernetes 3");
        assert_eq!(input(json!(null)).normalize(), Err(InputError::Missing));
        assert_eq!(
            input(json!(true)).normalize(),
            Err(InputError::TypeMismatch("boolean"))
        );
        assert_eq!(
            input(json!(4.5)).normalize(),
            Err(InputError::TypeMismatch("number"))
        );
    }

    #[test]
    fn test_plan_parses_with_defaults() {
        let plan: ExecutionPlan = serde_json::from_value(json!({
            "query_analysis": "a",
            "steps": [{"step_id": 1, "tool": "web_search", "input": "k8s"}],
            "final_instruction": "b"
        }))
        .unwrap();
        assert_eq!(plan.action, PlanAction::Execute);
        assert_eq!(plan.steps[0].reason, "");
        assert!(plan.violations.is_empty());
    }

    #[test]
    fn test_plan_missing_required_field_is_rejected() {
        let r: Result<ExecutionPlan, _> =
            serde_json::from_value(json!({"query_analysis": "a", "steps": []}));
        assert!(r.is_err());
        let r: Result<ExecutionPlan, _> = serde_json::from_value(json!({
            "query_analysis": "a",
            "final_instruction": "b",
            "steps": [{"step_id": -1, "tool": "x", "input": "y"}]
        }));
        assert!(r.is_err());
    }

    #[test]
    fn test_action_wire_names() {
        assert_eq!(
            serde_json::to_value(PlanAction::RegistryViolation).unwrap(),
            json!("registry_violation")
        );
    }
}
