use crate::llm::{CompletionParams, GuardedClient};
use crate::prompts;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntent {
    #[serde(rename = "type", default = "general_kind")]
    pub kind: String,
    #[serde(default)]
    pub requires_computation: bool,
    #[serde(default)]
    pub requires_external_execution: bool,
}

fn general_kind() -> String {
    "general".to_string()
}

impl QueryIntent {
    /// Used whenever classification fails: no powerful tools.
    pub fn conservative() -> Self {
        Self {
            kind: general_kind(),
            requires_computation: false,
            requires_external_execution: false,
        }
    }
}

/// Lightweight intent tagger on the fast tier.
pub struct QueryClassifier {
    llm: GuardedClient,
    model: String,
}

impl QueryClassifier {
    pub fn new(llm: GuardedClient, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn classify(&self, query: &str) -> QueryIntent {
        let result = self
            .llm
            .complete_json::<QueryIntent>(
                &self.model,
                &prompts::classifier(),
                query,
                CompletionParams::json(150, 0.0),
            )
            .await;
        match result {
            Ok(intent) => {
                tracing::debug!(kind = %intent.kind, computation = intent.requires_computation, "Query classified");
                intent
            }
            Err(e) => {
                tracing::warn!("Classification failed, using conservative default: {}", e);
                QueryIntent::conservative()
            }
        }
    }
}
