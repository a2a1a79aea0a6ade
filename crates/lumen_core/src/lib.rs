pub mod config;
pub mod text;

pub use config::LumenConfig;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Free-form passage metadata, also used as an equality filter on retrieval.
pub type Metadata = serde_json::Map<String, Value>;

// ============================================================================
// Query
// ============================================================================

/// An inbound question. Built once per request and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    pub session_id: String,
    pub user_id: String,
    /// Unix timestamp (seconds)
    pub received_at: i64,
}

impl Query {
    pub fn new(text: impl Into<String>, session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            received_at: chrono::Utc::now().timestamp(),
        }
    }
}

// ============================================================================
// Security
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAssessment {
    pub is_safe: bool,
    #[serde(rename = "threat_detected", default = "no_threat")]
    pub threat: String,
    #[serde(default)]
    pub risk_score: f32,
    #[serde(default)]
    pub reasoning: String,
}

fn no_threat() -> String {
    "None".to_string()
}

impl SecurityAssessment {
    /// The assessment used when the screener itself fails. Permits the query.
    pub fn permissive(reason: impl Into<String>) -> Self {
        Self {
            is_safe: true,
            threat: no_threat(),
            risk_score: 0.0,
            reasoning: reason.into(),
        }
    }

    /// Clamp model-reported values into their documented ranges.
    pub fn normalized(mut self) -> Self {
        self.risk_score = if self.risk_score.is_finite() {
            self.risk_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

// ============================================================================
// Retrieval
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Dense,
    Keyword,
    /// Found by both the dense and keyword passes
    Hybrid,
    Web,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Relevance in [0, 1]
    pub score: f32,
    pub provenance: Provenance,
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    Pass,
    Fail,
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Pass => write!(f, "Pass"),
            Grade::Fail => write!(f, "Fail"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scores {
    pub faithfulness: f32,
    pub relevance: f32,
    pub helpfulness: f32,
    pub context_adherence: f32,
}

impl Scores {
    pub fn clamped(self) -> Self {
        let c = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            faithfulness: c(self.faithfulness),
            relevance: c(self.relevance),
            helpfulness: c(self.helpfulness),
            context_adherence: c(self.context_adherence),
        }
    }

    pub fn min(&self) -> f32 {
        self.faithfulness
            .min(self.relevance)
            .min(self.helpfulness)
            .min(self.context_adherence)
    }
}

/// Per-request cost/latency counters attached to the final evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub latency_ms: f64,
    pub estimated_cost: f64,
    pub grounding_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default)]
    pub scores: Scores,
    pub overall_grade: Grade,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl Evaluation {
    /// Fail-closed verdict used when the judge cannot be reached.
    pub fn judge_outage(detail: impl fmt::Display) -> Self {
        Self {
            scores: Scores::default(),
            overall_grade: Grade::Fail,
            reasoning: format!("Judge System Failure: {}. Defaulting to safety.", detail),
            metrics: None,
        }
    }

    /// Verdict for a response too far from its sources to be worth judging.
    pub fn grounding_abort(grounding: f32) -> Self {
        Self {
            scores: Scores::default(),
            overall_grade: Grade::Fail,
            reasoning: format!("Aborted due to critical grounding failure ({:.2}).", grounding),
            metrics: None,
        }
    }

    pub fn passed(&self) -> bool {
        self.overall_grade == Grade::Pass
    }
}
