pub mod mock;
pub mod openai;
pub(crate) mod sse;

pub use mock::MockProvider;
pub use openai::OpenAiCompatibleClient;

use crate::llm::LlmClient;
use anyhow::Result;
use lumen_core::config::LlmConfig;
use std::sync::Arc;

/// Build the configured provider. Unknown names are an error, not a silent mock.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai_compatible" | "openai" | "groq" => {
            Ok(Arc::new(OpenAiCompatibleClient::new(config)?))
        }
        "mock" => {
            tracing::warn!("Using the mock LLM provider; answers are canned");
            Ok(Arc::new(MockProvider::new()))
        }
        other => anyhow::bail!("Unknown LLM provider '{}'", other),
    }
}
