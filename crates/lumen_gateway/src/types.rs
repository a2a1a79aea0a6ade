use lumen_core::Query;
use serde::{Deserialize, Serialize};

fn default_session() -> String {
    "default".to_string()
}

fn anonymous() -> String {
    "anonymous".to_string()
}

/// Inbound question, over HTTP or as one WebSocket text frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_session")]
    pub session_id: String,
    #[serde(default = "anonymous")]
    pub user_id: String,
}

impl QueryRequest {
    /// `None` for a blank question.
    pub fn into_query(self) -> Option<Query> {
        if self.query.trim().is_empty() {
            return None;
        }
        Some(Query::new(self.query, self.session_id, self.user_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleResponse {
    pub title: String,
}

/// Body of every non-2xx response and of WebSocket protocol errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
