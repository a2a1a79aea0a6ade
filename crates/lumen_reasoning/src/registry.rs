//! Per-attempt capability registry shown to the planner.

use crate::classifier::QueryIntent;
use serde::Serialize;

pub const HYBRID_RETRIEVER: &str = "hybrid_retriever";
pub const WEB_SEARCH: &str = "web_search";
pub const SUMMARIZER: &str = "summarizer";
pub const CODE_INTERPRETER: &str = "code_interpreter";

pub const HYBRID_RETRIEVER_DESC: &str = "Search across the vector index (semantic) and the passage store (keywords). Use this for internal document knowledge.";
pub const WEB_SEARCH_DESC: &str = "Search the live internet. Use this for real-time information or when internal documents are insufficient.";
pub const SUMMARIZER_DESC: &str = "Summarize a piece of text, such as retrieved content.";
pub const CODE_INTERPRETER_DESC: &str = "Execute Python code for calculations, data analysis, or logic. The input is the code; print the result.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

/// Ordered name → description list. Order is what the planner sees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRegistry {
    tools: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard registry for an intent. `code_interpreter` is only
    /// offered when the classifier flagged computation.
    pub fn for_intent(intent: &QueryIntent) -> Self {
        let mut registry = Self::new()
            .with_tool(HYBRID_RETRIEVER, HYBRID_RETRIEVER_DESC)
            .with_tool(WEB_SEARCH, WEB_SEARCH_DESC)
            .with_tool(SUMMARIZER, SUMMARIZER_DESC);
        if intent.requires_computation {
            registry = registry.with_tool(CODE_INTERPRETER, CODE_INTERPRETER_DESC);
        }
        registry
    }

    /// Adds a tool; re-registering a name replaces its description in place.
    pub fn with_tool(mut self, name: &str, description: &str) -> Self {
        match self.tools.iter_mut().find(|t| t.name == name) {
            Some(existing) => existing.description = description.to_string(),
            None => self.tools.push(ToolSpec {
                name: name.to_string(),
                description: description.to_string(),
            }),
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// JSON list of `{name, description}` for the planner prompt.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(&self.tools).unwrap_or_else(|_| "[]".to_string())
    }
}
