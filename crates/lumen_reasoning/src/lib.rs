pub mod api_types;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod executor;
pub mod generator;
pub mod grounding;
pub mod llm;
pub mod multi_agent;
pub mod plan;
pub mod planner;
pub mod prompts;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod router;
pub mod security;
pub mod telemetry;
pub mod token_budget;
pub mod tools;

pub use engine::{EngineResult, Outcome, ReasoningEngine};
pub use error::{EngineError, LlmError};
pub use events::EngineEvent;
pub use generator::LlmQueryExpander;
pub use llm::{GuardedClient, LlmClient};
pub use token_budget::TokenBudget;
